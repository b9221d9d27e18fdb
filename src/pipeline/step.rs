// src/pipeline/step.rs

//! Step definitions and their type-erased runner.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use futures::future::BoxFuture;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::builder::Pipeline;
use super::journal::{Compensation, Journal, PendingRollback};
use super::{Context, Merge};

pub(crate) type AnyContext = Box<dyn Any + Send>;

type Action<C, P> = Arc<dyn Fn(Arc<C>, StepHandle) -> BoxFuture<'static, anyhow::Result<P>> + Send + Sync>;
type Rollback<C> = Arc<dyn Fn(Arc<C>, StepHandle) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;
type Predicate<C> = Arc<dyn Fn(&C) -> bool + Send + Sync>;
type Snapshotter<C> = Arc<dyn Fn(&C) -> C + Send + Sync>;
type Build<C, D> = Arc<dyn Fn(&C, Pipeline<C, C>) -> Pipeline<C, D> + Send + Sync>;

/// Side channel handed to step actions and rollbacks.
#[derive(Debug, Clone)]
pub struct StepHandle {
    pipeline: Arc<str>,
    step: Arc<str>,
    attempt: u32,
}

impl StepHandle {
    pub(crate) fn new(pipeline: Arc<str>, step: Arc<str>, attempt: u32) -> Self {
        Self {
            pipeline,
            step,
            attempt,
        }
    }

    pub fn pipeline(&self) -> &str {
        &self.pipeline
    }

    pub fn step(&self) -> &str {
        &self.step
    }

    /// 0-based attempt index when the step has a retry policy.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Report progress. Informational only.
    pub fn output(&self, message: impl fmt::Display) {
        info!(pipeline = %self.pipeline, step = %self.step, "{message}");
    }

    fn with_attempt(&self, attempt: u32) -> Self {
        Self {
            attempt,
            ..self.clone()
        }
    }
}

/// Re-invoke a failing action before giving up on the step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepRetry {
    /// Additional attempts after the first.
    pub tries: u32,
    pub delay: Duration,
}

/// Optional per-step behaviour.
pub struct StepOptions<C> {
    rollback: Option<Rollback<C>>,
    retry: Option<StepRetry>,
    snapshot: Option<Snapshotter<C>>,
}

impl<C> Default for StepOptions<C> {
    fn default() -> Self {
        Self {
            rollback: None,
            retry: None,
            snapshot: None,
        }
    }
}

impl<C> fmt::Debug for StepOptions<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepOptions")
            .field("rollback", &self.rollback.is_some())
            .field("retry", &self.retry)
            .field("snapshot", &self.snapshot.is_some())
            .finish()
    }
}

impl<C: Context> StepOptions<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called with the pre-step snapshot if this or any later step fails.
    pub fn rollback<F, Fut>(mut self, rollback: F) -> Self
    where
        F: Fn(Arc<C>, StepHandle) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.rollback = Some(Arc::new(move |ctx, handle| Box::pin(rollback(ctx, handle))));
        self
    }

    pub fn retry(mut self, tries: u32, delay: Duration) -> Self {
        self.retry = Some(StepRetry { tries, delay });
        self
    }

    /// Replace `Clone` when taking the pre-step snapshot, e.g. to deep-copy
    /// state behind shared handles.
    pub fn snapshot_with(mut self, snapshot: impl Fn(&C) -> C + Send + Sync + 'static) -> Self {
        self.snapshot = Some(Arc::new(snapshot));
        self
    }

    fn take_snapshot(&self, ctx: &C) -> Arc<C> {
        Arc::new(match &self.snapshot {
            Some(snapshot) => snapshot(ctx),
            None => ctx.clone(),
        })
    }

    fn pending_rollback(&self, snapshot: &Arc<C>, handle: &StepHandle) -> Option<PendingRollback> {
        let rollback = Arc::clone(self.rollback.as_ref()?);
        let snapshot = Arc::clone(snapshot);
        let handle = handle.clone();
        Some(Box::new(move || rollback(snapshot, handle)))
    }

    /// Snapshot `ctx` and journal it with this step's rollback.
    fn record(&self, journal: &mut Journal, name: &Arc<str>, ctx: &C, runs: bool) -> StepHandle {
        let snapshot = self.take_snapshot(ctx);
        let handle = journal.handle(name, 0);
        let rollback = if runs {
            self.pending_rollback(&snapshot, &handle)
        } else {
            None
        };
        journal.push(Compensation::new(Arc::clone(name), snapshot, rollback));
        handle
    }
}

/// A step with its context types erased, so differently typed steps can live
/// in one list.
pub(crate) trait ErasedStep: Send + Sync {
    fn name(&self) -> &str;

    fn run<'a>(
        &'a self,
        ctx: AnyContext,
        journal: &'a mut Journal,
    ) -> BoxFuture<'a, anyhow::Result<AnyContext>>;
}

fn unwrap_context<C: Context>(ctx: AnyContext, step: &str) -> anyhow::Result<C> {
    ctx.downcast::<C>()
        .map(|ctx| *ctx)
        .map_err(|_| anyhow!("context type mismatch entering step '{step}'"))
}

/// Skip policy of a conditional step: the predicate and the patch merged
/// when it is false.
struct Gate<C, Q> {
    enabled: Predicate<C>,
    absent: fn() -> Q,
}

/// A leaf step wrapping a user action.
pub(crate) struct ActionStep<C, P, Q> {
    name: Arc<str>,
    action: Action<C, P>,
    lift: fn(P) -> Q,
    gate: Option<Gate<C, Q>>,
    options: StepOptions<C>,
}

impl<C: Context, P> ActionStep<C, P, P> {
    pub(crate) fn required<F, Fut>(name: Arc<str>, action: F, options: StepOptions<C>) -> Self
    where
        F: Fn(Arc<C>, StepHandle) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<P>> + Send + 'static,
    {
        Self {
            name,
            action: Arc::new(move |ctx, handle| Box::pin(action(ctx, handle))),
            lift: std::convert::identity,
            gate: None,
            options,
        }
    }
}

impl<C: Context, P> ActionStep<C, P, Option<P>> {
    pub(crate) fn conditional<E, F, Fut>(
        name: Arc<str>,
        enabled: E,
        action: F,
        options: StepOptions<C>,
    ) -> Self
    where
        E: Fn(&C) -> bool + Send + Sync + 'static,
        F: Fn(Arc<C>, StepHandle) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<P>> + Send + 'static,
    {
        Self {
            name,
            action: Arc::new(move |ctx, handle| Box::pin(action(ctx, handle))),
            lift: Some,
            gate: Some(Gate {
                enabled: Arc::new(enabled),
                absent: || None,
            }),
            options,
        }
    }
}

impl<C, P, Q> ActionStep<C, P, Q>
where
    C: Context,
{
    async fn invoke(&self, live: &Arc<C>, handle: StepHandle) -> anyhow::Result<P> {
        let Some(retry) = self.options.retry else {
            return (self.action)(Arc::clone(live), handle).await;
        };

        let mut attempt = 0;
        loop {
            match (self.action)(Arc::clone(live), handle.with_attempt(attempt)).await {
                Ok(patch) => return Ok(patch),
                Err(err) if attempt < retry.tries => {
                    warn!(
                        pipeline = %handle.pipeline(),
                        step = %self.name,
                        attempt,
                        error = %format!("{err:#}"),
                        "step failed; retrying"
                    );
                    attempt += 1;
                    sleep(retry.delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl<C, P, Q> ErasedStep for ActionStep<C, P, Q>
where
    C: Context + Merge<Q>,
    P: Send + 'static,
    Q: Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn run<'a>(
        &'a self,
        ctx: AnyContext,
        journal: &'a mut Journal,
    ) -> BoxFuture<'a, anyhow::Result<AnyContext>> {
        Box::pin(async move {
            let ctx: C = unwrap_context(ctx, &self.name)?;

            if let Some(gate) = &self.gate {
                if !(gate.enabled)(&ctx) {
                    info!(pipeline = %journal.pipeline(), step = %self.name, "step disabled; skipping");
                    self.options.record(journal, &self.name, &ctx, false);
                    return Ok(Box::new(ctx.merge((gate.absent)())) as AnyContext);
                }
            }

            let handle = self.options.record(journal, &self.name, &ctx, true);
            debug!(pipeline = %journal.pipeline(), step = %self.name, "running step");

            let live = Arc::new(ctx);
            let patch = self.invoke(&live, handle).await?;

            // The action may still hold a clone of the context.
            let ctx = Arc::try_unwrap(live).unwrap_or_else(|shared| C::clone(&shared));
            Ok(Box::new(ctx.merge((self.lift)(patch))) as AnyContext)
        })
    }
}

/// A nested pipeline built at run time from the current context.
pub(crate) struct SubsequenceStep<C, D> {
    name: Arc<str>,
    build: Build<C, D>,
    gate: Option<PassThrough<C, D>>,
    options: StepOptions<C>,
}

/// Skip policy of a conditional subsequence: the predicate and how the
/// untouched context becomes the output when it is false.
struct PassThrough<C, D> {
    enabled: Predicate<C>,
    forward: fn(C) -> D,
}

impl<C: Context, D: Context> SubsequenceStep<C, D> {
    pub(crate) fn new<B>(name: Arc<str>, build: B, options: StepOptions<C>) -> Self
    where
        B: Fn(&C, Pipeline<C, C>) -> Pipeline<C, D> + Send + Sync + 'static,
    {
        Self {
            name,
            build: Arc::new(build),
            gate: None,
            options,
        }
    }
}

impl<C: Context> SubsequenceStep<C, C> {
    /// A subsequence that is neither built nor run when `enabled` is false.
    pub(crate) fn conditional<E, B>(name: Arc<str>, enabled: E, build: B, options: StepOptions<C>) -> Self
    where
        E: Fn(&C) -> bool + Send + Sync + 'static,
        B: Fn(&C, Pipeline<C, C>) -> Pipeline<C, C> + Send + Sync + 'static,
    {
        Self {
            name,
            build: Arc::new(build),
            gate: Some(PassThrough {
                enabled: Arc::new(enabled),
                forward: std::convert::identity,
            }),
            options,
        }
    }
}

impl<C: Context, D: Context> ErasedStep for SubsequenceStep<C, D> {
    fn name(&self) -> &str {
        &self.name
    }

    fn run<'a>(
        &'a self,
        ctx: AnyContext,
        journal: &'a mut Journal,
    ) -> BoxFuture<'a, anyhow::Result<AnyContext>> {
        Box::pin(async move {
            let ctx: C = unwrap_context(ctx, &self.name)?;

            if let Some(gate) = &self.gate {
                if !(gate.enabled)(&ctx) {
                    info!(pipeline = %journal.pipeline(), step = %self.name, "subsequence disabled; skipping");
                    self.options.record(journal, &self.name, &ctx, false);
                    return Ok(Box::new((gate.forward)(ctx)) as AnyContext);
                }
            }

            self.options.record(journal, &self.name, &ctx, true);

            let nested_name = format!("{}/{}", journal.pipeline(), self.name);
            let nested = (self.build)(&ctx, Pipeline::new(nested_name));
            debug!(pipeline = %journal.pipeline(), step = %self.name, steps = nested.len(), "running subsequence");

            // The nested run unwinds its own steps before reporting failure.
            let ctx = nested.run(ctx).await?;
            Ok(Box::new(ctx) as AnyContext)
        })
    }
}
