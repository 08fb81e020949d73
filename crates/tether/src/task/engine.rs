//! Frame-based driver for [`AsyncTask`]s

use std::time::Duration;

use tokio::time::{Instant, sleep_until};

use super::{AsyncTask, StateMachine, Step, TaskOutcome};

/// Ticks a task at a fixed frame rate until it ends
#[derive(Debug, Clone, Copy)]
pub struct Engine {
    frame: Duration,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(Duration::from_millis(16))
    }
}

impl Engine {
    pub fn new(frame: Duration) -> Self {
        Self { frame }
    }

    pub fn frame(&self) -> Duration {
        self.frame
    }

    /// Tick `task` until it reaches a terminal state.
    ///
    /// The task must have been started with [`AsyncTask::run`]; a task that
    /// was never run is started here.
    pub async fn drive<M: StateMachine>(&self, task: &mut AsyncTask<M>) -> TaskOutcome {
        if matches!(task.status(), super::TaskStatus::Idle) {
            task.run();
        }

        let mut next_frame = Instant::now();
        loop {
            match task.tick() {
                Step::Done(outcome) => return outcome,
                Step::Continue => {
                    next_frame += self.frame;
                    let now = Instant::now();
                    if next_frame < now {
                        next_frame = now;
                    }
                    sleep_until(next_frame).await;
                }
                Step::Sleep(deadline) => {
                    next_frame = Instant::from_std(deadline);
                    sleep_until(next_frame).await;
                }
            }
        }
    }

    /// Re-arm `task` and drive it to completion
    pub async fn run_to_completion<M: StateMachine>(&self, task: &mut AsyncTask<M>) -> TaskOutcome {
        task.run();
        self.drive(task).await
    }
}
