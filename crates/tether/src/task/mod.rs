//! Cooperative state-machine tasks
//!
//! A [`StateMachine`] describes a protocol as an enumerated state plus a
//! `multiplex` step. [`AsyncTask`] wraps it with the universal lifecycle
//! (initializing, running, finished, aborted) and turns the directives issued
//! through [`Control`] into scheduling decisions. Nothing here blocks: the
//! task is advanced one [`tick`](AsyncTask::tick) at a time by an external
//! scheduler such as [`Engine`].

mod engine;

pub use engine::Engine;

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

/// Re-entries allowed within one tick when a step only changes state
const MAX_REENTRIES: usize = 64;

/// A protocol driven by [`AsyncTask`]
pub trait StateMachine {
    /// Task-specific states
    type State: Copy + PartialEq + fmt::Debug;

    /// Human-readable task name for logs
    fn name(&self) -> &str;

    /// Reset per-run state and pick the first state (or abort)
    fn initialize(&mut self, cx: &mut Control<Self::State>);

    /// Advance from `state`
    fn multiplex(&mut self, state: Self::State, cx: &mut Control<Self::State>);

    /// Extra teardown for an aborted run, before `finish_impl`
    fn abort_impl(&mut self) {}

    /// Teardown common to every terminal outcome
    fn finish_impl(&mut self) {}
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Directive {
    None,
    Yield,
    YieldFor(Duration),
    Finish,
    Abort,
}

/// Handle through which a step steers its task
#[derive(Debug)]
pub struct Control<S> {
    state: Option<S>,
    changed: bool,
    directive: Directive,
}

impl<S: Copy + PartialEq> Control<S> {
    fn new(state: Option<S>) -> Self {
        Self {
            state,
            changed: false,
            directive: Directive::None,
        }
    }

    pub fn state(&self) -> Option<S> {
        self.state
    }

    /// Move to `state`; without a yield the task re-enters it in this tick
    pub fn set_state(&mut self, state: S) {
        if self.state != Some(state) {
            self.changed = true;
        }
        self.state = Some(state);
    }

    /// Return to the scheduler, re-enter next tick
    pub fn yield_now(&mut self) {
        self.directive = Directive::Yield;
    }

    /// Return to the scheduler, re-enter no earlier than `duration` from now
    pub fn yield_for(&mut self, duration: Duration) {
        self.directive = Directive::YieldFor(duration);
    }

    pub fn finish(&mut self) {
        self.directive = Directive::Finish;
    }

    pub fn abort(&mut self) {
        self.directive = Directive::Abort;
    }
}

/// Lifecycle of a task
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TaskStatus<S> {
    /// Never run
    Idle,
    Initializing,
    Running(S),
    Finished,
    Aborted,
}

impl<S> TaskStatus<S> {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Finished | TaskStatus::Aborted)
    }
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Finished,
    Aborted,
}

/// Result of one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Call again next frame
    Continue,
    /// Nothing to do before this instant
    Sleep(Instant),
    Done(TaskOutcome),
}

/// A reusable cooperative task around a [`StateMachine`]
pub struct AsyncTask<M: StateMachine> {
    machine: M,
    status: TaskStatus<M::State>,
    resume_at: Option<Instant>,
}

impl<M: StateMachine> AsyncTask<M> {
    pub fn new(machine: M) -> Self {
        Self {
            machine,
            status: TaskStatus::Idle,
            resume_at: None,
        }
    }

    /// Start a run. A task that already finished or aborted is re-armed.
    ///
    /// Returns false if the task is still active.
    pub fn run(&mut self) -> bool {
        if !matches!(self.status, TaskStatus::Idle) && !self.status.is_terminal() {
            warn!("Task {} is already running", self.machine.name());
            return false;
        }

        debug!("Starting task {}", self.machine.name());
        self.status = TaskStatus::Initializing;
        self.resume_at = None;

        let mut cx = Control::new(None);
        self.machine.initialize(&mut cx);
        match cx.directive {
            Directive::Abort => self.abort(),
            Directive::Finish => self.finish(),
            directive => match cx.state {
                Some(state) => {
                    self.status = TaskStatus::Running(state);
                    if let Directive::YieldFor(duration) = directive {
                        self.resume_at = Some(Instant::now() + duration);
                    }
                }
                None => {
                    warn!("Task {} did not choose a first state", self.machine.name());
                    self.abort();
                }
            },
        }
        true
    }

    /// Advance the task by one scheduler tick
    pub fn tick(&mut self) -> Step {
        let mut state = match self.status {
            TaskStatus::Running(state) => state,
            TaskStatus::Finished => return Step::Done(TaskOutcome::Finished),
            TaskStatus::Aborted => return Step::Done(TaskOutcome::Aborted),
            TaskStatus::Idle | TaskStatus::Initializing => return Step::Continue,
        };

        let now = Instant::now();
        if let Some(deadline) = self.resume_at {
            if deadline > now {
                return Step::Sleep(deadline);
            }
            self.resume_at = None;
        }

        for _ in 0..MAX_REENTRIES {
            let mut cx = Control::new(Some(state));
            self.machine.multiplex(state, &mut cx);
            if let Some(next) = cx.state {
                self.status = TaskStatus::Running(next);
            }

            match cx.directive {
                Directive::Abort => {
                    self.abort();
                    return Step::Done(TaskOutcome::Aborted);
                }
                Directive::Finish => {
                    self.finish();
                    return Step::Done(TaskOutcome::Finished);
                }
                Directive::YieldFor(duration) => {
                    let deadline = Instant::now() + duration;
                    self.resume_at = Some(deadline);
                    return Step::Sleep(deadline);
                }
                Directive::Yield => return Step::Continue,
                Directive::None => match cx.state {
                    Some(next) if cx.changed => state = next,
                    _ => return Step::Continue,
                },
            }
        }

        debug!("Task {} changed state {} times in one tick", self.machine.name(), MAX_REENTRIES);
        Step::Continue
    }

    /// Abort the run, invoking teardown. No-op unless the task is active.
    pub fn abort(&mut self) {
        if matches!(self.status, TaskStatus::Idle) || self.status.is_terminal() {
            return;
        }
        debug!("Aborting task {}", self.machine.name());
        self.machine.abort_impl();
        self.machine.finish_impl();
        self.status = TaskStatus::Aborted;
        self.resume_at = None;
    }

    /// Finish the run, invoking teardown. No-op unless the task is active.
    pub fn finish(&mut self) {
        if matches!(self.status, TaskStatus::Idle) || self.status.is_terminal() {
            return;
        }
        debug!("Finished task {}", self.machine.name());
        self.machine.finish_impl();
        self.status = TaskStatus::Finished;
        self.resume_at = None;
    }

    pub fn status(&self) -> TaskStatus<M::State> {
        self.status
    }

    /// Current task-specific state while running
    pub fn state(&self) -> Option<M::State> {
        match self.status {
            TaskStatus::Running(state) => Some(state),
            _ => None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status == TaskStatus::Finished
    }

    pub fn is_aborted(&self) -> bool {
        self.status == TaskStatus::Aborted
    }

    pub fn into_inner(self) -> M {
        self.machine
    }
}

impl<M: StateMachine> Deref for AsyncTask<M> {
    type Target = M;

    fn deref(&self) -> &M {
        &self.machine
    }
}

impl<M: StateMachine> DerefMut for AsyncTask<M> {
    fn deref_mut(&mut self) -> &mut M {
        &mut self.machine
    }
}
