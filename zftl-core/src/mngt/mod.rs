// vim: tw=80
//! Management processes
//!
//! A management process is an ordered list of named steps run against one
//! context, usually a [`Dev`](crate::device::Dev).  Each step reports whether
//! the process should move on, run the same step again, or give up.  Giving
//! up rolls back every step that has run so far, newest first.

use std::{
    fmt,
    future::Future,
    pin::Pin,
    time::{Duration, Instant},
};

use crate::types::*;

mod startup;
mod steps;

pub use self::startup::{run_shutdown, run_startup, shutdown_process,
                        startup_process};

/// Outcome of one invocation of a step
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StepStatus {
    /// The step is complete.  Advance to the next one.
    Next,
    /// The step's completion condition isn't met yet.  Invoke it again.
    Continue,
    /// Unrecoverable error.  Roll back and fail the process.
    Fail(Error),
}

pub type StepFut<'a> = Pin<Box<dyn Future<Output=StepStatus> + Send + 'a>>;

type Action<C> = Box<dyn for<'a> FnMut(&'a mut C) -> StepFut<'a> + Send>;
type Cleanup<C> = Box<dyn FnMut(&mut C) -> Result<()> + Send>;

/// Wrap a synchronously computed status as a step future.
pub fn ready<'a>(status: StepStatus) -> StepFut<'a> {
    Box::pin(futures::future::ready(status))
}

pub struct Step<C> {
    name: &'static str,
    action: Action<C>,
    cleanup: Option<Cleanup<C>>,
}

impl<C> Step<C> {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn new<F>(name: &'static str, action: F) -> Self
        where F: for<'a> FnMut(&'a mut C) -> StepFut<'a> + Send + 'static
    {
        Step{name, action: Box::new(action), cleanup: None}
    }

    /// Undo this step's effects if a later step, or the step itself, fails.
    pub fn with_cleanup<F>(mut self, cleanup: F) -> Self
        where F: FnMut(&mut C) -> Result<()> + Send + 'static
    {
        self.cleanup = Some(Box::new(cleanup));
        self
    }
}

impl<C> fmt::Debug for Step<C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("cleanup", &self.cleanup.is_some())
            .finish()
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProcessState {
    /// Executing, or about to execute, the step at this index
    Running(usize),
    Succeeded,
    Failed,
}

/// What happened to one step
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StepTrace {
    pub name: &'static str,
    pub result: Result<()>,
    /// How many times the step's action was invoked
    pub invocations: u32,
    pub duration: Duration,
}

pub struct Process<C> {
    name: &'static str,
    steps: Vec<Step<C>>,
    state: ProcessState,
    trace: Vec<StepTrace>,
}

impl<C> Process<C> {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn new(name: &'static str) -> Self {
        Process {
            name,
            steps: Vec::new(),
            state: ProcessState::Running(0),
            trace: Vec::new(),
        }
    }

    /// Append a step to the pipeline.
    pub fn push(&mut self, step: Step<C>) -> &mut Self {
        assert!(self.trace.is_empty(), "Can't add steps to a started process");
        self.steps.push(step);
        self
    }

    /// Undo steps `0..=failed`, newest first.  Cleanup failures don't stop
    /// the rollback.
    fn rollback(&mut self, ctx: &mut C, failed: usize) {
        let process = self.name;
        for step in self.steps[..=failed].iter_mut().rev() {
            if let Some(cleanup) = step.cleanup.as_mut() {
                match cleanup(ctx) {
                    Ok(()) => tracing::debug!(process, step = step.name,
                        "rolled back"),
                    Err(e) => tracing::error!(process, step = step.name,
                        error = ?e, "rollback failed")
                }
            }
        }
    }

    /// Execute every step in order.
    ///
    /// Stops at the first failing step, rolls back, and returns that step's
    /// error.  Afterwards the process's state and trace remain available for
    /// inspection.
    #[tracing::instrument(skip(self, ctx), fields(process = self.name))]
    pub async fn run(&mut self, ctx: &mut C) -> Result<()> {
        assert_eq!(self.state, ProcessState::Running(0),
            "A management process may only run once");
        let process = self.name;
        for i in 0..self.steps.len() {
            self.state = ProcessState::Running(i);
            let name = self.steps[i].name;
            let start = Instant::now();
            let mut invocations = 0;
            let result = loop {
                invocations += 1;
                match (self.steps[i].action)(ctx).await {
                    StepStatus::Next => break Ok(()),
                    StepStatus::Fail(e) => break Err(e),
                    StepStatus::Continue => tokio::task::yield_now().await
                }
            };
            let duration = start.elapsed();
            self.trace.push(StepTrace{name, result, invocations, duration});
            match result {
                Ok(()) => {
                    tracing::info!(process, step = name, invocations,
                        ?duration, "step succeeded");
                }
                Err(e) => {
                    tracing::error!(process, step = name, invocations,
                        ?duration, error = ?e, "step failed");
                    self.rollback(ctx, i);
                    self.state = ProcessState::Failed;
                    return Err(e);
                }
            }
        }
        self.state = ProcessState::Succeeded;
        Ok(())
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn steps(&self) -> impl Iterator<Item=&'static str> + '_ {
        self.steps.iter().map(Step::name)
    }

    pub fn trace(&self) -> &[StepTrace] {
        &self.trace[..]
    }
}

impl<C> fmt::Debug for Process<C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Process")
            .field("name", &self.name)
            .field("steps", &self.steps)
            .field("state", &self.state)
            .finish()
    }
}

// LCOV_EXCL_STOP
