//! Lazy, cached, fault-isolated consumer of module artifacts (interactive
//! preview context).
//!
//! Loading is cooperative: `load` suspends the consuming render boundary until
//! the module resolves. The cache is keyed by (artifact id, module format
//! version), so a module is never evaluated twice in one session. Host
//! primitives resolve through the dependency registry; a stale manifest is a
//! load failure, recovered locally as the deterministic error placeholder.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{
    artifact::{CompiledArtifact, ExecutionContext, FaultLog},
    ast::Program,
    interp::{Limits, run_scene},
    registry::DependencyRegistry,
    scene::{FrameCtx, FramePlan},
};

#[derive(Debug)]
struct LoadedModule {
    artifact_id: Uuid,
    program: Program,
    entry: String,
    acquired: BTreeSet<String>,
    duration_frames: u64,
}

pub struct ModuleLoader {
    registry: Arc<DependencyRegistry>,
    limits: Limits,
    cache: Mutex<HashMap<(Uuid, u32), Arc<LoadedModule>>>,
    faults: Arc<FaultLog>,
    evaluations: AtomicU64,
}

impl ModuleLoader {
    pub fn new(registry: Arc<DependencyRegistry>) -> Self {
        Self {
            registry,
            limits: Limits::default(),
            cache: Mutex::new(HashMap::new()),
            faults: Arc::new(FaultLog::new()),
            evaluations: AtomicU64::new(0),
        }
    }

    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    pub fn fault_log(&self) -> &Arc<FaultLog> {
        &self.faults
    }

    /// Number of cache-miss module evaluations performed so far.
    pub fn evaluations(&self) -> u64 {
        self.evaluations.load(Ordering::Acquire)
    }

    /// The fixed loading-fallback plan shown while a load is in flight.
    pub fn loading_fallback(ctx: &FrameCtx) -> FramePlan {
        FramePlan::loading_placeholder(ctx)
    }

    /// Resolve a component for one compiled artifact.
    ///
    /// Never fails: an unresolvable module yields a component that renders the
    /// error placeholder, and the fault is recorded. Sibling scenes on the
    /// same timeline are unaffected.
    #[tracing::instrument(skip(self, artifact), fields(artifact = %artifact.id))]
    pub async fn load(&self, artifact: &CompiledArtifact) -> SceneComponent {
        let key = (artifact.id, artifact.module.version);
        let mut cache = self.cache.lock().await;
        if let Some(module) = cache.get(&key) {
            tracing::debug!("module cache hit");
            return self.component(ComponentState::Ready(Arc::clone(module)));
        }

        match self.resolve(artifact) {
            Ok(module) => {
                let module = Arc::new(module);
                cache.insert(key, Arc::clone(&module));
                self.evaluations.fetch_add(1, Ordering::AcqRel);
                tracing::debug!("module loaded and cached");
                self.component(ComponentState::Ready(module))
            }
            Err(reason) => {
                self.faults
                    .record_recovered(artifact.id, ExecutionContext::Browser, reason.clone());
                self.component(ComponentState::Failed { reason })
            }
        }
    }

    fn component(&self, state: ComponentState) -> SceneComponent {
        SceneComponent {
            state,
            faults: Arc::clone(&self.faults),
            limits: self.limits,
        }
    }

    /// Registry resolution for one module: the manifest must still be current
    /// and every external must resolve.
    fn resolve(&self, artifact: &CompiledArtifact) -> Result<LoadedModule, String> {
        if !self.registry.is_compatible(&artifact.manifest) {
            return Err(format!(
                "artifact {} was compiled against a stale host-primitive set",
                artifact.id
            ));
        }
        let mut acquired = BTreeSet::new();
        for name in &artifact.module.externals {
            if self.registry.resolve(name).is_none() {
                return Err(format!("host primitive '{name}' is not registered"));
            }
            acquired.insert(name.clone());
        }
        Ok(LoadedModule {
            artifact_id: artifact.id,
            program: artifact.module.program.clone(),
            entry: artifact.module.entry.clone(),
            acquired,
            duration_frames: artifact.duration_frames(),
        })
    }
}

enum ComponentState {
    Ready(Arc<LoadedModule>),
    Failed { reason: String },
}

/// Lazily-resolved handle for one scene instance. The module's sole export is
/// a pure factory; rendering calls it with an explicit frame context. There
/// is no shared mutable "current component" anywhere.
pub struct SceneComponent {
    state: ComponentState,
    faults: Arc<FaultLog>,
    limits: Limits,
}

impl SceneComponent {
    pub fn is_ready(&self) -> bool {
        matches!(self.state, ComponentState::Ready(_))
    }

    pub fn duration_frames(&self) -> Option<u64> {
        match &self.state {
            ComponentState::Ready(module) => Some(module.duration_frames),
            ComponentState::Failed { .. } => None,
        }
    }

    /// Render one frame. Any evaluation failure is absorbed at this boundary:
    /// the result is the error placeholder plan plus a recorded fault.
    pub fn render(&self, ctx: &FrameCtx) -> FramePlan {
        match &self.state {
            ComponentState::Failed { reason } => {
                FramePlan::error_placeholder(ctx, reason.clone())
            }
            ComponentState::Ready(module) => {
                match run_scene(
                    &module.program,
                    &module.entry,
                    &module.acquired,
                    ctx,
                    self.limits,
                ) {
                    Ok(node) => FramePlan::from_tree(ctx, &node),
                    Err(e) => {
                        self.faults.record_recovered(
                            module.artifact_id,
                            ExecutionContext::Browser,
                            e.to_string(),
                        );
                        FramePlan::error_placeholder(ctx, e.to_string())
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        compile::compile,
        core::{Canvas, Fps, FrameIndex},
        registry::DependencyManifest,
    };

    const VALID: &str = r##"
use container, image, frame, interpolate;
export const DURATION = 60;
function scene() {
  let x = interpolate(frame(), [0, 30], [0, 100]);
  return container({ fill: "#000" }, [
    image("logo.png", { x: x, width: 24, height: 24 }),
  ]);
}
export default scene;
"##;

    fn ctx(frame: u64) -> FrameCtx {
        FrameCtx {
            frame: FrameIndex(frame),
            duration: FrameIndex(60),
            fps: Fps::default(),
            canvas: Canvas::default(),
        }
    }

    fn compiled() -> CompiledArtifact {
        compile(
            Uuid::new_v4(),
            VALID,
            &DependencyRegistry::builtin(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn loads_and_renders_a_component() {
        let loader = ModuleLoader::new(Arc::new(DependencyRegistry::builtin()));
        let artifact = compiled();
        let component = loader.load(&artifact).await;
        assert!(component.is_ready());
        assert_eq!(component.duration_frames(), Some(60));
        let plan = component.render(&ctx(15));
        assert_eq!(plan.nodes.len(), 2);
        assert!(!plan.is_placeholder());
    }

    #[tokio::test]
    async fn cache_never_evaluates_the_same_artifact_twice() {
        let loader = ModuleLoader::new(Arc::new(DependencyRegistry::builtin()));
        let artifact = compiled();
        let a = loader.load(&artifact).await;
        let b = loader.load(&artifact).await;
        assert!(a.is_ready() && b.is_ready());
        assert_eq!(loader.evaluations(), 1);

        // a different artifact is its own cache entry
        let other = compiled();
        loader.load(&other).await;
        assert_eq!(loader.evaluations(), 2);
    }

    #[tokio::test]
    async fn stale_manifest_yields_error_placeholder_component() {
        let loader = ModuleLoader::new(Arc::new(DependencyRegistry::builtin()));
        let mut artifact = compiled();
        artifact.manifest = DependencyManifest {
            registry_version: "0.1.0".to_string(),
            primitives: [("frame".to_string(), "0.1.0".to_string())]
                .into_iter()
                .collect(),
        };
        let component = loader.load(&artifact).await;
        assert!(!component.is_ready());
        let plan = component.render(&ctx(0));
        assert!(plan.is_placeholder());
        assert_eq!(loader.fault_log().len(), 1);
    }

    #[tokio::test]
    async fn runtime_failure_is_recovered_at_the_scene_boundary() {
        // `frames` is not acquired, and not a primitive; evaluation fails at
        // run time and must produce the placeholder, not an error
        let src = "use group; export const DURATION = 10; \
                   function scene() { return group([missingThing()]); } export default scene;";
        let artifact = compile(Uuid::new_v4(), src, &DependencyRegistry::builtin()).unwrap();
        let loader = ModuleLoader::new(Arc::new(DependencyRegistry::builtin()));
        let component = loader.load(&artifact).await;
        assert!(component.is_ready());
        let plan = component.render(&ctx(0));
        assert!(plan.is_placeholder());
        assert_eq!(loader.fault_log().len(), 1);
        assert!(loader.fault_log().snapshot()[0].recovered);
    }

    #[tokio::test]
    async fn loading_fallback_is_the_fixed_contract() {
        let plan = ModuleLoader::loading_fallback(&ctx(0));
        assert!(plan.is_placeholder());
    }
}
