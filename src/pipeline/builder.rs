// src/pipeline/builder.rs

//! Pipeline declaration and the sequential runner.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use anyhow::anyhow;
use tracing::{debug, error, info};

use super::journal::Journal;
use super::step::{ActionStep, AnyContext, ErasedStep, StepHandle, StepOptions, SubsequenceStep};
use super::{Context, Merge, PipelineState};
use crate::errors::PipelineError;

/// An ordered list of named steps turning an `I` into a `C`.
///
/// Every `add_*` call consumes the pipeline and returns one whose context
/// type reflects the new step. Runs are strictly sequential.
pub struct Pipeline<I, C> {
    name: Arc<str>,
    error_message: Option<String>,
    steps: Vec<Box<dyn ErasedStep>>,
    _context: PhantomData<fn(I) -> C>,
}

impl<I: Context> Pipeline<I, I> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Arc::from(name.into()),
            error_message: None,
            steps: Vec::new(),
            _context: PhantomData,
        }
    }
}

impl<I: Context, C: Context> Pipeline<I, C> {
    /// Message prefixed to the error returned when a step fails.
    pub fn with_error_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Top-level step names in declaration order.
    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|step| step.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    fn push<D: Context>(self, step: Box<dyn ErasedStep>) -> Pipeline<I, D> {
        let mut steps = self.steps;
        steps.push(step);
        Pipeline {
            name: self.name,
            error_message: self.error_message,
            steps,
            _context: PhantomData,
        }
    }

    /// Append a step whose patch is always merged.
    pub fn add_step<P, F, Fut>(
        self,
        name: impl Into<String>,
        action: F,
        options: StepOptions<C>,
    ) -> Pipeline<I, <C as Merge<P>>::Output>
    where
        C: Merge<P>,
        P: Send + 'static,
        F: Fn(Arc<C>, StepHandle) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<P>> + Send + 'static,
    {
        let step = ActionStep::required(Arc::from(name.into()), action, options);
        self.push(Box::new(step))
    }

    /// Append a step that only runs when `enabled` returns true.
    ///
    /// Its patch is merged as `Option<P>`: `None` when the step was skipped.
    pub fn add_conditional_step<P, E, F, Fut>(
        self,
        name: impl Into<String>,
        enabled: E,
        action: F,
        options: StepOptions<C>,
    ) -> Pipeline<I, <C as Merge<Option<P>>>::Output>
    where
        C: Merge<Option<P>>,
        P: Send + 'static,
        E: Fn(&C) -> bool + Send + Sync + 'static,
        F: Fn(Arc<C>, StepHandle) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<P>> + Send + 'static,
    {
        let step = ActionStep::conditional(Arc::from(name.into()), enabled, action, options);
        self.push(Box::new(step))
    }

    /// Append a nested pipeline, built when the step is reached.
    ///
    /// `build` receives the current context and an empty pipeline seeded with
    /// it. A failure inside the nested pipeline rolls back its own steps
    /// first, then fails this step.
    pub fn add_subsequence<D, B>(
        self,
        name: impl Into<String>,
        build: B,
        options: StepOptions<C>,
    ) -> Pipeline<I, D>
    where
        D: Context,
        B: Fn(&C, Pipeline<C, C>) -> Pipeline<C, D> + Send + Sync + 'static,
    {
        let step = SubsequenceStep::new(Arc::from(name.into()), build, options);
        self.push(Box::new(step))
    }

    /// Append a nested pipeline that only runs when `enabled` returns true.
    ///
    /// The nested pipeline must hand back the context type it was given, so
    /// a skipped subsequence passes the context through unchanged. A skipped
    /// subsequence is journaled without its rollback.
    pub fn add_conditional_subsequence<E, B>(
        self,
        name: impl Into<String>,
        enabled: E,
        build: B,
        options: StepOptions<C>,
    ) -> Pipeline<I, C>
    where
        E: Fn(&C) -> bool + Send + Sync + 'static,
        B: Fn(&C, Pipeline<C, C>) -> Pipeline<C, C> + Send + Sync + 'static,
    {
        let step = SubsequenceStep::conditional(Arc::from(name.into()), enabled, build, options);
        self.push(Box::new(step))
    }

    fn failure(
        &self,
        step: &str,
        source: anyhow::Error,
        journal: &Journal,
    ) -> PipelineError {
        let message = self
            .error_message
            .clone()
            .unwrap_or_else(|| format!("Pipeline '{}' failed at step '{step}'", self.name));
        PipelineError::new(message, self.name.as_ref(), step, source, journal.last_snapshot())
    }

    /// Run every step in order, threading the context through.
    ///
    /// On failure all journaled rollbacks have run by the time the error is
    /// returned.
    pub async fn run(self, initial: I) -> Result<C, PipelineError> {
        let mut journal = Journal::new(Arc::clone(&self.name));
        let mut state = PipelineState::Idle;
        let mut ctx: AnyContext = Box::new(initial);

        info!(pipeline = %self.name, steps = self.steps.len(), "starting pipeline");

        for (index, step) in self.steps.iter().enumerate() {
            state = transition(&self.name, state, PipelineState::Running(index));

            match step.run(ctx, &mut journal).await {
                Ok(next) => ctx = next,
                Err(source) => {
                    error!(
                        pipeline = %self.name,
                        step = step.name(),
                        error = %format!("{source:#}"),
                        "step failed"
                    );
                    state = transition(&self.name, state, PipelineState::RollingBack);
                    let err = self.failure(step.name(), source, &journal);
                    journal.unwind().await;
                    transition(&self.name, state, PipelineState::Failed);
                    return Err(err);
                }
            }
        }

        let ctx = ctx.downcast::<C>().map(|ctx| *ctx).map_err(|_| {
            self.failure(
                "<end>",
                anyhow!("pipeline produced an unexpected context type"),
                &journal,
            )
        })?;

        transition(&self.name, state, PipelineState::Succeeded);
        info!(pipeline = %self.name, "pipeline finished");
        Ok(ctx)
    }
}

fn transition(pipeline: &str, from: PipelineState, to: PipelineState) -> PipelineState {
    debug!(pipeline, %from, %to, "pipeline state change");
    to
}
