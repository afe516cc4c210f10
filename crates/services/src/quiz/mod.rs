//! Quiz session: a pure state machine, its exam countdown and the async
//! service that wires both to storage and the question provider.

mod machine;
mod progress;
mod session;
mod timer;

pub use machine::{AnswerOutcome, Effect, LoadOutcome, LoadTicket, QuizMachine, QuizPhase};
pub use progress::{QuestionOutcome, QuizProgress, QuizReview, ReviewItem};
pub use session::QuizSessionService;
pub use timer::{ExamTimer, SECONDS_PER_QUESTION, TICK_PERIOD, Ticker, TimerTick};
