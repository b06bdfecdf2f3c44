//! Inbound façade: build requests in, Ready/Failed out.
//!
//! Each build runs as its own task; a semaphore bounds how many run at once so
//! a burst of scene edits queues instead of stampeding the generation
//! collaborator. The breaker and the registry are shared across all builds.

use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::{
    breaker::CircuitBreaker,
    error::{VignetteError, VignetteResult},
    registry::DependencyRegistry,
    repair::{BuildOutcome, BuildRequest, RepairLoop, SceneGenerator},
    validate::RepairPolicy,
};

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub max_concurrent_builds: usize,
    pub generation_timeout: std::time::Duration,
    pub compile_timeout: std::time::Duration,
    pub policy: RepairPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_builds: 8,
            generation_timeout: crate::repair::DEFAULT_GENERATION_TIMEOUT,
            compile_timeout: crate::repair::DEFAULT_COMPILE_TIMEOUT,
            policy: RepairPolicy::default(),
        }
    }
}

#[derive(Clone)]
pub struct Pipeline {
    inner: Arc<Inner>,
}

struct Inner {
    repair: RepairLoop,
    queue: Semaphore,
    breaker: Arc<CircuitBreaker>,
    registry: Arc<DependencyRegistry>,
}

impl Pipeline {
    pub fn new(generator: Arc<dyn SceneGenerator>) -> Self {
        Self::with_config(generator, PipelineConfig::default())
    }

    pub fn with_config(generator: Arc<dyn SceneGenerator>, config: PipelineConfig) -> Self {
        let breaker = Arc::new(CircuitBreaker::new());
        let registry = Arc::new(DependencyRegistry::builtin());
        let repair = RepairLoop::new(generator, Arc::clone(&breaker), Arc::clone(&registry))
            .with_policy(config.policy)
            .with_timeouts(config.generation_timeout, config.compile_timeout);
        Self {
            inner: Arc::new(Inner {
                repair,
                queue: Semaphore::new(config.max_concurrent_builds),
                breaker,
                registry,
            }),
        }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.inner.breaker
    }

    pub fn registry(&self) -> &Arc<DependencyRegistry> {
        &self.inner.registry
    }

    /// Build one scene to a terminal state, waiting for a queue slot first.
    #[tracing::instrument(skip(self, request), fields(scene = %request.scene_id))]
    pub async fn build(&self, request: BuildRequest) -> VignetteResult<BuildOutcome> {
        let _permit = self
            .inner
            .queue
            .acquire()
            .await
            .map_err(|_| VignetteError::Other(anyhow::anyhow!("pipeline queue closed")))?;
        self.inner.repair.run(&request).await
    }

    /// Spawn a build as an independent task. Aborting the handle cancels the
    /// build without corrupting shared breaker state.
    pub fn spawn_build(
        &self,
        request: BuildRequest,
    ) -> tokio::task::JoinHandle<VignetteResult<BuildOutcome>> {
        let this = self.clone();
        tokio::spawn(async move { this.build(request).await })
    }
}
