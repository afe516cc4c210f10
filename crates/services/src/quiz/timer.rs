use std::time::Duration;

use quiz_core::time::format_countdown;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Seconds granted for every question loaded in exam mode.
pub const SECONDS_PER_QUESTION: u32 = 60;

/// Period of the exam countdown.
pub const TICK_PERIOD: Duration = Duration::from_secs(1);

const TICK_BUFFER: usize = 64;

/// Result of feeding one tick to the countdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerTick {
    /// Timer was not running; nothing changed.
    Idle,
    Running { remaining: u32 },
    /// This tick took the clock from 1 to 0.
    Expired,
}

/// Exam countdown. Time is only ever added per loaded batch and removed per tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExamTimer {
    remaining: u32,
}

impl ExamTimer {
    #[must_use]
    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    #[must_use]
    pub fn formatted(&self) -> String {
        format_countdown(self.remaining)
    }

    /// Grants time for `questions` newly appended questions.
    pub fn extend_for(&mut self, questions: usize) {
        let questions = u32::try_from(questions).unwrap_or(u32::MAX);
        self.remaining = self
            .remaining
            .saturating_add(questions.saturating_mul(SECONDS_PER_QUESTION));
    }

    pub fn tick(&mut self) -> TimerTick {
        match self.remaining {
            0 => TimerTick::Idle,
            1 => {
                self.remaining = 0;
                TimerTick::Expired
            }
            n => {
                self.remaining = n - 1;
                TimerTick::Running {
                    remaining: self.remaining,
                }
            }
        }
    }

    pub fn reset(&mut self) {
        self.remaining = 0;
    }
}

/// Background task delivering one message per period.
///
/// The task is aborted when the `Ticker` is dropped, so releasing the owner
/// is enough to stop the countdown.
#[derive(Debug)]
pub struct Ticker {
    handle: JoinHandle<()>,
    rx: mpsc::Receiver<()>,
}

impl Ticker {
    /// Start ticking every `period`. Must be called inside a Tokio runtime.
    #[must_use]
    pub fn spawn(period: Duration) -> Self {
        let (tx, rx) = mpsc::channel(TICK_BUFFER);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await; // consume first immediate tick
            loop {
                interval.tick().await;
                if tx.send(()).await.is_err() {
                    break;
                }
            }
        });
        Self { handle, rx }
    }

    /// Wait for the next tick. Returns `None` once the task has stopped.
    pub async fn recv(&mut self) -> Option<()> {
        self.rx.recv().await
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
