//! Staged pipelines
//!
//! A pipeline is an ordered list of named stages sharing one mutable context.
//! The first failing stage aborts the run and the failure is reported once, as
//! a [`PipelineError`] naming that stage.

use crate::bus::{panic_message, EventBus, HandlerResult, SubscriptionId};
use crate::error::PipelineError;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Result of one pipeline run: the final context, or the stage that aborted it
pub type PipelineOutcome<C> = Result<C, PipelineError>;

type StageFn<C> = Box<dyn Fn(&mut C) -> HandlerResult + Send + Sync>;

struct Stage<C> {
    name: String,
    run: StageFn<C>,
}

/// Ordered stages executed against a shared context
///
/// # Example
///
/// ```rust
/// use event_bus::Pipeline;
///
/// let pipeline = Pipeline::<Vec<&str>>::new("capture")
///     .stage("expose", |ctx| { ctx.push("expose"); Ok(()) })
///     .stage("store", |ctx| { ctx.push("store"); Ok(()) });
///
/// let ctx = pipeline.begin(Vec::new()).unwrap();
/// assert_eq!(ctx, vec!["expose", "store"]);
/// ```
pub struct Pipeline<C> {
    name: String,
    stages: Vec<Stage<C>>,
}

impl<C> Pipeline<C> {
    /// Create a pipeline with no stages
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
        }
    }

    /// Append a stage
    pub fn stage<F>(mut self, name: impl Into<String>, run: F) -> Self
    where
        F: Fn(&mut C) -> HandlerResult + Send + Sync + 'static,
    {
        self.stages.push(Stage {
            name: name.into(),
            run: Box::new(run),
        });
        self
    }

    /// Name used in logs and errors
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of stages
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// True when no stage has been added
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Stage names in execution order
    pub fn stage_names(&self) -> impl Iterator<Item = &str> {
        self.stages.iter().map(|s| s.name.as_str())
    }

    /// Run every stage in order against `context`
    ///
    /// Returns the final context when every stage succeeded.
    pub fn begin(&self, mut context: C) -> PipelineOutcome<C> {
        tracing::debug!(pipeline = %self.name, "Pipeline started ({} stages)", self.stages.len());

        for (index, stage) in self.stages.iter().enumerate() {
            let outcome = catch_unwind(AssertUnwindSafe(|| (stage.run)(&mut context)));
            let error = match outcome {
                Ok(Ok(())) => {
                    tracing::trace!(pipeline = %self.name, stage = %stage.name, "Stage complete");
                    continue;
                }
                Ok(Err(source)) => PipelineError::StageFailed {
                    pipeline: self.name.clone(),
                    stage: stage.name.clone(),
                    index,
                    source,
                },
                Err(panic) => PipelineError::StagePanicked {
                    pipeline: self.name.clone(),
                    stage: stage.name.clone(),
                    index,
                    message: panic_message(panic.as_ref()),
                },
            };
            tracing::error!(pipeline = %self.name, stage = %stage.name, "{}", error);
            return Err(error);
        }

        tracing::debug!(pipeline = %self.name, "Pipeline complete");
        Ok(context)
    }
}

impl<C: 'static> Pipeline<C> {
    /// Subscribe this pipeline to a bus
    ///
    /// Each trigger builds a fresh context with `seed` and runs the pipeline.
    /// Failures are logged by [`begin`](Self::begin) and never surface as
    /// subscriber errors.
    pub fn attach<A, S>(self: &Arc<Self>, bus: &EventBus<A>, priority: i32, seed: S) -> SubscriptionId
    where
        S: Fn(&A) -> C + Send + Sync + 'static,
    {
        let pipeline = Arc::clone(self);
        tracing::debug!(pipeline = %self.name, bus = %bus.name(), "Attaching pipeline");
        bus.register(priority, move |args| {
            let _ = pipeline.begin(seed(args));
            Ok(())
        })
    }
}

impl<C> std::fmt::Debug for Pipeline<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("stages", &self.stage_names().collect::<Vec<_>>())
            .finish()
    }
}
