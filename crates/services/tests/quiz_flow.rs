use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use quiz_core::model::{
    Difficulty, Language, PersistedSession, Question, QuestionDraft, QuestionId, QuizState,
    SessionMode, SubjectId, UserStats,
};
use quiz_core::time::{fixed_clock, fixed_now};
use services::quiz::{LoadOutcome, QuizPhase, TimerTick};
use services::{AppServices, BatchRequest, GenerationError, QuestionGenerator};
use storage::keys::progress_key;
use storage::repository::{
    KeyValueStore, ProgressRepository, StatsRepository, Storage, StorageError,
};

type Reply = Result<Vec<Question>, GenerationError>;

/// Provider double replaying a fixed script of replies.
struct ScriptedGenerator {
    replies: Mutex<VecDeque<(Duration, Reply)>>,
    requests: Mutex<Vec<BatchRequest>>,
}

impl ScriptedGenerator {
    fn with(replies: Vec<Reply>) -> Arc<Self> {
        Self::with_delays(replies.into_iter().map(|r| (Duration::ZERO, r)).collect())
    }

    /// Each reply is handed out only after its delay has passed.
    fn with_delays(replies: Vec<(Duration, Reply)>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<BatchRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl QuestionGenerator for ScriptedGenerator {
    async fn generate(&self, request: &BatchRequest) -> Result<Vec<Question>, GenerationError> {
        self.requests.lock().unwrap().push(request.clone());
        let next = self.replies.lock().unwrap().pop_front();
        let Some((delay, reply)) = next else {
            return Err(GenerationError::Provider("script exhausted".into()));
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        reply
    }
}

/// Stats store whose writes take a second to land.
struct SlowStats {
    inner: Arc<dyn StatsRepository>,
}

#[async_trait]
impl StatsRepository for SlowStats {
    async fn read_stats(&self) -> Result<UserStats, StorageError> {
        self.inner.read_stats().await
    }

    async fn write_stats(&self, stats: &UserStats) -> Result<(), StorageError> {
        tokio::time::sleep(Duration::from_secs(1)).await;
        self.inner.write_stats(stats).await
    }
}

/// Questions whose correct option is always 0.
fn batch(subject: &str, start: usize, n: usize) -> Vec<Question> {
    (start..start + n)
        .map(|i| {
            QuestionDraft {
                id: QuestionId::new(format!("{subject}-{i}")),
                question_text: format!("Question {i}"),
                options: vec!["right".into(), "wrong".into(), "also wrong".into()],
                correct_answer_index: 0,
                explanation: format!("Option 0 is right for {i}."),
                explanation_summary: Some("Option 0.".into()),
                subject: SubjectId::new(subject),
                difficulty: Difficulty::Medium,
            }
            .validate()
            .unwrap()
        })
        .collect()
}

fn app(storage: &Storage, generator: Arc<ScriptedGenerator>) -> AppServices {
    AppServices::from_storage(storage, generator, Language::English, fixed_clock())
}

#[tokio::test]
async fn practice_session_scores_and_records_one_result() {
    let storage = Storage::in_memory();
    let generator = ScriptedGenerator::with(vec![Ok(batch("math", 0, 5))]);
    let app = app(&storage, Arc::clone(&generator));
    let math = SubjectId::new("math");
    let mut quiz = app.open_quiz(math.clone());

    let loaded = quiz.select_difficulty(Difficulty::Medium).await.unwrap();
    assert_eq!(loaded, LoadOutcome::Appended { added: 5 });
    assert_eq!(generator.requests()[0].count, 5);

    // correct, wrong, skip, correct, correct
    assert!(quiz.submit_answer(0).await.unwrap().unwrap().is_correct);
    quiz.advance().await.unwrap();
    assert!(!quiz.submit_answer(1).await.unwrap().unwrap().is_correct);
    quiz.advance().await.unwrap();
    quiz.advance().await.unwrap();
    quiz.submit_answer(0).await.unwrap();
    assert!(quiz.save().await.unwrap());
    assert!(quiz.has_saved_session().await.unwrap());
    quiz.advance().await.unwrap();
    quiz.submit_answer(0).await.unwrap();

    assert_eq!(quiz.machine().state().score(), 3);
    assert!(!quiz.machine().state().is_finished());

    assert!(quiz.finish().await);
    assert!(!quiz.finish().await);
    assert_eq!(quiz.phase(), &QuizPhase::Finished);

    let stats = app.stats().get_stats().await.unwrap();
    assert_eq!(stats.history.len(), 1);
    let result = &stats.history[0];
    assert_eq!(result.score, 3);
    assert_eq!(result.total_questions, 5);
    assert_eq!(result.mode, SessionMode::Practice);
    assert_eq!(result.subject_name, "Mathematics");
    assert_eq!(stats.total_questions, 4);
    assert_eq!(stats.total_correct, 3);
    assert_eq!(stats.subject_stats[&math].total_attempted, 4);

    assert!(!quiz.has_saved_session().await.unwrap());

    let review = quiz.review().unwrap();
    assert_eq!(review.attempted, 4);
    assert_eq!(review.accuracy, 75);
    assert!(review.show_explanations());
}

#[tokio::test]
async fn exam_timer_adds_time_per_batch() {
    let storage = Storage::in_memory();
    let generator = ScriptedGenerator::with(vec![Ok(batch("gk", 0, 5)), Ok(batch("gk", 5, 5))]);
    let app = app(&storage, generator);
    let mut quiz = app.open_quiz(SubjectId::new("gk"));
    quiz.set_mode(SessionMode::Exam).unwrap();

    quiz.select_difficulty(Difficulty::Hard).await.unwrap();
    assert_eq!(quiz.progress().remaining_seconds, Some(300));
    assert_eq!(quiz.progress().countdown.as_deref(), Some("5:00"));
    assert!(quiz.is_timer_running());

    for _ in 0..4 {
        quiz.submit_answer(0).await.unwrap();
        quiz.advance().await.unwrap();
    }
    quiz.submit_answer(0).await.unwrap();
    let more = quiz.advance().await.unwrap();
    assert_eq!(more, Some(LoadOutcome::Appended { added: 5 }));
    assert_eq!(quiz.progress().remaining_seconds, Some(600));
}

#[tokio::test]
async fn exam_save_writes_nothing() {
    let storage = Storage::in_memory();
    let generator = ScriptedGenerator::with(vec![Ok(batch("english", 0, 5))]);
    let app = app(&storage, generator);
    let english = SubjectId::new("english");
    let mut quiz = app.open_quiz(english.clone());
    quiz.set_mode(SessionMode::Exam).unwrap();
    quiz.select_difficulty(Difficulty::Easy).await.unwrap();
    quiz.submit_answer(0).await.unwrap();

    assert!(!quiz.save().await.unwrap());
    assert!(storage.kv.get(&progress_key(&english)).await.unwrap().is_none());
    assert!(quiz.machine().notice().is_none());
}

#[tokio::test(start_paused = true)]
async fn exam_expiry_finishes_once_and_stops_ticking() {
    let storage = Storage::in_memory();
    let generator = ScriptedGenerator::with(vec![Ok(batch("history", 0, 1))]);
    let app = app(&storage, generator);
    let mut quiz = app.open_quiz(SubjectId::new("history"));
    quiz.set_mode(SessionMode::Exam).unwrap();
    quiz.select_difficulty(Difficulty::Easy).await.unwrap();

    let start = tokio::time::Instant::now();
    let mut ticks = 0;
    while let Some(tick) = quiz.wait_tick().await {
        ticks += 1;
        if tick == TimerTick::Expired {
            break;
        }
    }
    assert_eq!(ticks, 60);
    assert_eq!(start.elapsed(), Duration::from_secs(60));
    assert_eq!(quiz.phase(), &QuizPhase::Finished);
    assert!(!quiz.is_timer_running());
    assert!(quiz.wait_tick().await.is_none());
    assert!(!quiz.finish().await);

    let history = app.stats().get_stats().await.unwrap().history;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].mode, SessionMode::Exam);
    assert_eq!(history[0].score, 0);
}

#[tokio::test(start_paused = true)]
async fn exam_time_runs_out_while_the_next_batch_is_loading() {
    let storage = Storage::in_memory();
    let generator = ScriptedGenerator::with_delays(vec![
        (Duration::ZERO, Ok(batch("history", 0, 1))),
        (Duration::from_secs(120), Ok(batch("history", 1, 5))),
    ]);
    let app = app(&storage, generator);
    let mut quiz = app.open_quiz(SubjectId::new("history"));
    quiz.set_mode(SessionMode::Exam).unwrap();
    quiz.select_difficulty(Difficulty::Easy).await.unwrap();
    quiz.submit_answer(0).await.unwrap();

    let start = tokio::time::Instant::now();
    let outcome = quiz.advance().await.unwrap();
    assert_eq!(outcome, Some(LoadOutcome::Discarded));
    assert_eq!(start.elapsed(), Duration::from_secs(60));
    assert_eq!(quiz.phase(), &QuizPhase::Finished);
    assert_eq!(quiz.progress().loaded, 1);
    assert!(!quiz.is_timer_running());
    assert!(quiz.submit_answer(0).await.is_err());

    let stats = app.stats().get_stats().await.unwrap();
    assert_eq!(stats.total_questions, 1);
    assert_eq!(stats.history.len(), 1);
    assert_eq!(stats.history[0].total_questions, 1);
    assert_eq!(stats.history[0].score, 1);
}

#[tokio::test(start_paused = true)]
async fn expiry_result_is_written_even_when_input_wins_the_race() {
    let base = Storage::in_memory();
    let storage = Storage {
        stats: Arc::new(SlowStats {
            inner: Arc::clone(&base.stats),
        }),
        ..base.clone()
    };
    let generator = ScriptedGenerator::with(vec![Ok(batch("history", 0, 1))]);
    let app = app(&storage, generator);
    let mut quiz = app.open_quiz(SubjectId::new("history"));
    quiz.set_mode(SessionMode::Exam).unwrap();
    quiz.select_difficulty(Difficulty::Easy).await.unwrap();

    let input = tokio::time::sleep(Duration::from_millis(60_500));
    tokio::pin!(input);
    loop {
        tokio::select! {
            () = &mut input => break,
            Some(_) = quiz.wait_tick() => {}
        }
    }
    assert_eq!(quiz.phase(), &QuizPhase::Finished);
    assert_eq!(quiz.pending_writes(), 2);
    assert!(base.stats.read_stats().await.unwrap().history.is_empty());

    assert!(quiz.wait_tick().await.is_none());
    assert_eq!(quiz.pending_writes(), 0);
    let history = base.stats.read_stats().await.unwrap().history;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].mode, SessionMode::Exam);
}

#[tokio::test]
async fn restart_stops_countdown_and_keeps_stats() {
    let storage = Storage::in_memory();
    let generator = ScriptedGenerator::with(vec![Ok(batch("reasoning", 0, 5))]);
    let app = app(&storage, generator);
    let mut quiz = app.open_quiz(SubjectId::new("reasoning"));
    quiz.set_mode(SessionMode::Exam).unwrap();
    quiz.select_difficulty(Difficulty::Medium).await.unwrap();
    quiz.submit_answer(0).await.unwrap();

    quiz.restart();
    assert!(!quiz.is_timer_running());
    assert_eq!(quiz.phase(), &QuizPhase::SelectingDifficulty);
    assert_eq!(quiz.machine().mode(), SessionMode::Exam);
    assert_eq!(app.stats().get_stats().await.unwrap().total_questions, 1);
}

#[tokio::test]
async fn failed_first_batch_can_be_retried() {
    let storage = Storage::in_memory();
    let generator = ScriptedGenerator::with(vec![
        Err(GenerationError::Provider("offline".into())),
        Ok(Vec::new()),
        Ok(batch("gen_science", 0, 5)),
    ]);
    let app = app(&storage, Arc::clone(&generator));
    let mut quiz = app.open_quiz(SubjectId::new("gen_science"));

    quiz.select_difficulty(Difficulty::Easy).await.unwrap();
    assert_eq!(
        quiz.phase(),
        &QuizPhase::Error {
            message: "Failed to load questions. Check your connection.".into()
        }
    );

    quiz.retry().await.unwrap();
    assert_eq!(
        quiz.phase(),
        &QuizPhase::Error {
            message: "No questions generated. Please try again.".into()
        }
    );

    assert_eq!(
        quiz.retry().await.unwrap(),
        LoadOutcome::Appended { added: 5 }
    );
    assert_eq!(quiz.phase(), &QuizPhase::Active);
    let requests = generator.requests();
    assert_eq!(requests.len(), 3);
    assert!(requests.iter().all(|r| r.difficulty == Difficulty::Easy));
}

#[tokio::test]
async fn failed_append_keeps_answers_and_retries() {
    let storage = Storage::in_memory();
    let generator = ScriptedGenerator::with(vec![
        Ok(batch("geography", 0, 5)),
        Err(GenerationError::Malformed("not json".into())),
        Ok(batch("geography", 5, 5)),
    ]);
    let app = app(&storage, generator);
    let mut quiz = app.open_quiz(SubjectId::new("geography"));
    quiz.select_difficulty(Difficulty::Hard).await.unwrap();
    for _ in 0..4 {
        quiz.submit_answer(0).await.unwrap();
        quiz.advance().await.unwrap();
    }
    quiz.submit_answer(1).await.unwrap();

    let failed = quiz.advance().await.unwrap();
    assert!(matches!(failed, Some(LoadOutcome::Failed { .. })));
    assert_eq!(quiz.phase(), &QuizPhase::Active);
    assert!(quiz.machine().banner().is_some());
    assert_eq!(quiz.progress().current_index, 4);
    assert_eq!(quiz.progress().answered, 5);
    assert_eq!(quiz.machine().state().score(), 4);

    quiz.retry().await.unwrap();
    assert_eq!(quiz.progress().loaded, 10);
    assert_eq!(quiz.progress().current_index, 5);
    assert!(quiz.machine().banner().is_none());
}

#[tokio::test]
async fn comprehensive_exam_requests_twenty_five() {
    let storage = Storage::in_memory();
    let generator = ScriptedGenerator::with(vec![Ok(batch("all_subjects", 0, 25))]);
    let app = app(&storage, Arc::clone(&generator));
    let mut quiz = app.open_quiz(SubjectId::new("all_subjects"));
    quiz.set_mode(SessionMode::Exam).unwrap();
    quiz.select_difficulty(Difficulty::Medium).await.unwrap();

    assert_eq!(generator.requests()[0].count, 25);
    assert_eq!(quiz.progress().remaining_seconds, Some(1500));
    quiz.finish().await;
    let history = app.stats().get_stats().await.unwrap().history;
    assert_eq!(history[0].subject_name, "Full Mock Exam");
}

#[tokio::test]
async fn saved_practice_session_resumes_verbatim() {
    let storage = Storage::in_memory();
    let generator = ScriptedGenerator::with(vec![Ok(batch("current_affairs", 0, 5))]);
    let app = app(&storage, Arc::clone(&generator));
    let subject = SubjectId::new("current_affairs");

    let mut first = app.open_quiz(subject.clone());
    first.select_difficulty(Difficulty::Hard).await.unwrap();
    first.submit_answer(0).await.unwrap();
    first.advance().await.unwrap();
    first.submit_answer(2).await.unwrap();
    first.save().await.unwrap();
    assert_eq!(first.machine().notice(), Some("Progress saved successfully!"));
    let saved_state = first.machine().state().clone();
    drop(first);

    let mut second = app.open_quiz(subject.clone());
    assert!(second.has_saved_session().await.unwrap());
    assert!(second.resume().await.unwrap());
    assert_eq!(second.phase(), &QuizPhase::Active);
    assert_eq!(second.machine().state(), &saved_state);
    assert_eq!(second.machine().difficulty(), Some(Difficulty::Hard));
    assert_eq!(second.machine().notice(), Some("Session resumed successfully!"));
    assert_eq!(generator.requests().len(), 1);

    assert!(second.resume().await.is_err());
}

#[tokio::test]
async fn corrupt_snapshot_is_reported_and_left_in_place() {
    let storage = Storage::in_memory();
    let app = app(&storage, ScriptedGenerator::with(Vec::new()));
    let subject = SubjectId::new("english");
    storage
        .kv
        .set(&progress_key(&subject), "{\"subject\": \"english\", \"state\":")
        .await
        .unwrap();

    let mut quiz = app.open_quiz(subject.clone());
    assert!(!quiz.resume().await.unwrap());
    assert_eq!(quiz.phase(), &QuizPhase::SelectingDifficulty);
    assert_eq!(quiz.machine().banner(), Some("Failed to load saved session."));
    assert!(quiz.has_saved_session().await.unwrap());
}

#[tokio::test]
async fn exam_snapshot_is_not_resumable() {
    let storage = Storage::in_memory();
    let app = app(&storage, ScriptedGenerator::with(Vec::new()));
    let subject = SubjectId::new("math");
    let mut state = QuizState::new();
    state.append(batch("math", 0, 2));
    storage
        .progress
        .save_progress(&PersistedSession {
            subject: subject.clone(),
            difficulty: Difficulty::Easy,
            mode: SessionMode::Exam,
            state,
            date: fixed_now(),
        })
        .await
        .unwrap();

    let mut quiz = app.open_quiz(subject);
    assert!(!quiz.resume().await.unwrap());
    assert!(quiz.machine().banner().is_some());
}

#[tokio::test]
async fn bookmark_follows_current_question() {
    let storage = Storage::in_memory();
    let generator = ScriptedGenerator::with(vec![Ok(batch("gk", 0, 3))]);
    let app = app(&storage, generator);
    let mut quiz = app.open_quiz(SubjectId::new("gk"));
    quiz.select_difficulty(Difficulty::Easy).await.unwrap();

    assert!(!quiz.is_bookmarked());
    assert!(quiz.toggle_bookmark().await.unwrap());
    assert!(quiz.is_bookmarked());
    assert_eq!(quiz.machine().notice(), Some("Question bookmarked"));

    quiz.advance().await.unwrap();
    assert!(!quiz.is_bookmarked());
    quiz.jump_to(0).await.unwrap();
    assert!(quiz.is_bookmarked());

    assert!(!quiz.toggle_bookmark().await.unwrap());
    assert_eq!(quiz.machine().notice(), Some("Bookmark removed"));
    assert!(app.stats().bookmarks().await.unwrap().is_empty());
}

#[tokio::test]
async fn bookmark_needs_a_current_question() {
    let storage = Storage::in_memory();
    let app = app(&storage, ScriptedGenerator::with(Vec::new()));
    let mut quiz = app.open_quiz(SubjectId::new("gk"));
    assert!(quiz.toggle_bookmark().await.is_err());
}
