use std::fmt;

use quiz_core::model::{Difficulty, SUBJECTS, SessionMode, Subject, SubjectId};
use quiz_core::model::subject::COMPREHENSIVE_SUBJECT_ID;
use quiz_core::time::format_countdown;
use services::config::normalize_sqlite_url;
use services::quiz::{QuestionOutcome, QuizPhase, QuizSessionService, TimerTick};
use services::telemetry::init_tracing;
use services::{AppServices, Clock, QuizConfig, QuizError};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    UnknownArg(String),
    UnknownCommand(String),
    MissingSubject,
    UnknownSubject(String),
    InvalidDifficulty { raw: String },
    InvalidDbUrl { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::UnknownCommand(cmd) => write!(f, "unknown subcommand: {cmd}"),
            ArgsError::MissingSubject => write!(f, "play requires a subject id"),
            ArgsError::UnknownSubject(raw) => write!(f, "unknown subject: {raw}"),
            ArgsError::InvalidDifficulty { raw } => write!(f, "invalid --difficulty value: {raw}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  quiz subjects [--db <sqlite_url>]");
    eprintln!("  quiz stats    [--db <sqlite_url>]");
    eprintln!("  quiz play <subject> [--exam] [--difficulty easy|medium|hard] [--resume] [--db <sqlite_url>]");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  QUIZ_DB_URL, QUIZ_LANGUAGE, QUIZ_AI_API_KEY, QUIZ_AI_BASE_URL, QUIZ_AI_MODEL, QUIZ_AI_TIMEOUT_SECS, QUIZ_LOG");
}

struct PlayArgs {
    subject: SubjectId,
    mode: SessionMode,
    difficulty: Difficulty,
    resume: bool,
}

enum Command {
    Subjects,
    Stats,
    Play(PlayArgs),
}

struct Args {
    db_url: Option<String>,
    command: Command,
}

impl Args {
    /// `Ok(None)` means help was requested.
    fn parse(mut args: impl Iterator<Item = String>) -> Result<Option<Self>, ArgsError> {
        let mut command = match args.next().as_deref() {
            None | Some("--help" | "-h") => return Ok(None),
            Some("subjects") => Command::Subjects,
            Some("stats") => Command::Stats,
            Some("play") => {
                let raw = args.next().ok_or(ArgsError::MissingSubject)?;
                let subject = SubjectId::new(raw.trim());
                if !subject.is_comprehensive() && Subject::find(&subject).is_none() {
                    return Err(ArgsError::UnknownSubject(raw));
                }
                Command::Play(PlayArgs {
                    subject,
                    mode: SessionMode::Practice,
                    difficulty: Difficulty::Medium,
                    resume: false,
                })
            }
            Some(other) => return Err(ArgsError::UnknownCommand(other.to_string())),
        };

        let mut db_url = None;
        while let Some(arg) = args.next() {
            match (arg.as_str(), &mut command) {
                ("--db", _) => {
                    let value = require_value(&mut args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    db_url = Some(normalize_sqlite_url(value));
                }
                ("--exam", Command::Play(play)) => play.mode = SessionMode::Exam,
                ("--resume", Command::Play(play)) => play.resume = true,
                ("--difficulty", Command::Play(play)) => {
                    let value = require_value(&mut args, "--difficulty")?;
                    play.difficulty = value
                        .parse()
                        .map_err(|_| ArgsError::InvalidDifficulty { raw: value.clone() })?;
                }
                ("--help" | "-h", _) => return Ok(None),
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        Ok(Some(Self { db_url, command }))
    }
}

fn prepare_sqlite_file(db_url: &str) -> Result<(), Box<dyn std::error::Error>> {
    if db_url.starts_with("sqlite::memory:") {
        return Ok(());
    }

    let path = db_url
        .strip_prefix("sqlite://")
        .ok_or_else(|| ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        })?;
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() {
        return Err(ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        }
        .into());
    }

    let path = std::path::Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    if !path.exists() {
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?;
    }

    Ok(())
}

//
// ─── COMMANDS ──────────────────────────────────────────────────────────────────
//

fn print_subjects() {
    for subject in &SUBJECTS {
        println!("{:<16} {}", subject.id, subject.name);
    }
    println!("{COMPREHENSIVE_SUBJECT_ID:<16} Full Mock Exam");
}

const RECENT_RESULTS: usize = 5;

async fn print_stats(app: &AppServices) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(user) = app.current_user().await? {
        println!("Signed in as {} <{}>", user.name, user.email);
    }
    let overview = app.stats().overview().await?;
    println!(
        "{} answered, {} correct ({}%)",
        overview.total_questions, overview.total_correct, overview.accuracy
    );
    for subject in &overview.subjects {
        println!(
            "  {:<20} {:>3}%  {}/{}",
            subject.name, subject.accuracy, subject.total_correct, subject.total_attempted
        );
    }
    if let Some(weakest) = &overview.weakest {
        println!("Needs work: {} ({}%)", weakest.name, weakest.accuracy);
    }
    println!(
        "{} sessions in history, {} bookmarks",
        overview.exams_taken, overview.bookmark_count
    );
    let stats = app.stats().get_stats().await?;
    for result in stats.history.iter().take(RECENT_RESULTS) {
        println!(
            "  {}  {:<20} {:<8} {}/{} ({}%)",
            result.date.format("%Y-%m-%d %H:%M"),
            result.subject_name,
            result.mode.as_str(),
            result.score,
            result.total_questions,
            result.percentage()
        );
    }
    Ok(())
}

enum Input {
    Line(Option<String>),
    Tick(TimerTick),
}

async fn play(app: &AppServices, args: PlayArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut quiz = app.open_quiz(args.subject.clone());
    quiz.set_mode(args.mode)?;

    let resumed = args.mode == SessionMode::Practice && args.resume && quiz.resume().await?;
    if !resumed {
        quiz.select_difficulty(args.difficulty).await?;
    }
    info!(subject = %args.subject, mode = %args.mode, resumed, "playing");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut render = true;
    loop {
        // A tick cut short by input may have left writes queued.
        quiz.flush_writes().await;
        print_messages(&mut quiz);
        if render {
            match quiz.phase() {
                QuizPhase::Finished => {
                    print_review(&quiz);
                    return Ok(());
                }
                QuizPhase::Error { message } => println!("{message} [r]etry or [q]uit"),
                QuizPhase::Active => print_question(&quiz),
                _ => {}
            }
        }

        let input = tokio::select! {
            line = lines.next_line() => Input::Line(line?),
            Some(tick) = quiz.wait_tick() => Input::Tick(tick),
        };

        render = true;
        let line = match input {
            Input::Tick(TimerTick::Expired) => {
                println!("Time is up.");
                continue;
            }
            Input::Tick(TimerTick::Running { remaining }) => {
                if remaining % 60 == 0 {
                    println!("{} left", format_countdown(remaining));
                }
                render = false;
                continue;
            }
            Input::Tick(TimerTick::Idle) => {
                render = false;
                continue;
            }
            Input::Line(None) => break,
            Input::Line(Some(line)) => line,
        };

        match line.trim() {
            "q" => break,
            "n" => {
                report(quiz.advance().await);
            }
            "f" => {
                quiz.finish().await;
            }
            "r" => {
                report(quiz.retry().await);
            }
            "s" => {
                if !report(quiz.save().await).unwrap_or(false) {
                    println!("Only practice sessions can be saved.");
                }
            }
            "b" => {
                report(quiz.toggle_bookmark().await);
            }
            cmd => {
                if let Some(target) = cmd.strip_prefix("g ") {
                    match target.trim().parse::<usize>() {
                        Ok(n) if n > 0 => {
                            report(quiz.jump_to(n - 1).await);
                        }
                        _ => println!("usage: g <question number>"),
                    }
                } else if let Ok(n) = cmd.parse::<usize>() {
                    answer(&mut quiz, n).await;
                } else {
                    println!("commands: <option number>, n, g <k>, b, s, f, r, q");
                    render = false;
                }
            }
        }
    }

    if quiz.phase() == &QuizPhase::Active && quiz.save().await? {
        println!("Progress saved. Resume with --resume.");
    }
    quiz.flush_writes().await;
    Ok(())
}

async fn answer(quiz: &mut QuizSessionService, number: usize) {
    let Some(option) = number.checked_sub(1) else {
        println!("options start at 1");
        return;
    };
    let Some(Some(outcome)) = report(quiz.submit_answer(option).await) else {
        return;
    };
    if !outcome.reveal {
        println!("Answer recorded.");
        return;
    }
    if outcome.is_correct {
        println!("Correct!");
    } else {
        println!("Wrong. The answer is {}.", outcome.correct_index + 1);
    }
    if let Some(question) = quiz.current_question() {
        println!("{}", question.explanation_summary().unwrap_or(question.explanation()));
    }
}

fn report<T>(result: Result<T, QuizError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(err) => {
            println!("{err}");
            None
        }
    }
}

fn print_messages(quiz: &mut QuizSessionService) {
    if let Some(banner) = quiz.machine().banner() {
        println!("! {banner}");
    }
    if let Some(notice) = quiz.machine().notice() {
        println!("{notice}");
    }
    quiz.clear_messages();
}

fn print_question(quiz: &QuizSessionService) {
    let Some(question) = quiz.current_question() else {
        return;
    };
    let progress = quiz.progress();
    let mut header = format!(
        "\nQuestion {}/{}  score {}",
        progress.current_index + 1,
        progress.loaded,
        progress.score
    );
    if let Some(countdown) = &progress.countdown {
        header.push_str(&format!("  time {countdown}"));
    }
    if quiz.is_bookmarked() {
        header.push_str("  *");
    }
    println!("{header}");
    println!("{}", question.text());

    let selected = quiz.machine().state().answer(progress.current_index);
    for (i, option) in question.options().iter().enumerate() {
        let marker = if selected == Some(i) { ">" } else { " " };
        println!("{marker} {}. {option}", i + 1);
    }
}

fn print_review(quiz: &QuizSessionService) {
    let Some(review) = quiz.review() else {
        return;
    };
    println!(
        "\nScore {}/{}  attempted {}  accuracy {}%",
        review.score, review.total, review.attempted, review.accuracy
    );
    for (n, item) in review.items.iter().enumerate() {
        let tag = match item.outcome {
            QuestionOutcome::Correct => "correct",
            QuestionOutcome::Wrong => "wrong",
            QuestionOutcome::Skipped => "skipped",
        };
        println!("{:>3}. [{tag}] {}", n + 1, item.question.text());
        if review.show_explanations() {
            println!("     {}", item.question.explanation());
        }
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let args = Args::parse(std::env::args().skip(1)).map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;
    let Some(args) = args else {
        print_usage();
        return Ok(());
    };

    let mut config = QuizConfig::from_env()?;
    if let Some(db_url) = args.db_url {
        config.db_url = db_url;
    }

    // Open + migrate SQLite at startup; the library crates never touch the filesystem.
    prepare_sqlite_file(&config.db_url)?;
    let app = AppServices::new_sqlite(&config, Clock::default()).await?;

    match args.command {
        Command::Subjects => {
            print_subjects();
            Ok(())
        }
        Command::Stats => print_stats(&app).await,
        Command::Play(play_args) => play(&app, play_args).await,
    }
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}
