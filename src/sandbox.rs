//! Per-frame, fault-isolated execution of sandbox scripts (batch render
//! context).
//!
//! `prepare` evaluates a sandbox script exactly once per job and hands back a
//! factory; `render` invokes the factory once per frame with only the fixed
//! whitelist injected. Every failure (parse, evaluation, budget exhaustion,
//! even a panic) is caught at the owning scene's boundary and replaced with
//! the visibly-marked placeholder frame. A render job never aborts because one
//! scene is broken.

use std::collections::BTreeSet;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use rayon::prelude::*;
use uuid::Uuid;

use crate::{
    artifact::{CompiledArtifact, ExecutionContext, FaultLog},
    ast::Program,
    core::{Canvas, Fps, FrameIndex},
    error::{VignetteError, VignetteResult},
    interp::{Limits, run_scene},
    parser::parse,
    registry::HOST_PRIMITIVES,
    scene::{FrameCtx, FramePlan},
};

/// Prepared factory for one scene, valid for the duration of a render job.
#[derive(Debug)]
pub struct SceneFactory {
    pub artifact_id: Uuid,
    program: Program,
    entry: String,
    duration_frames: u64,
}

impl SceneFactory {
    pub fn duration_frames(&self) -> u64 {
        self.duration_frames
    }
}

pub struct SandboxHost {
    limits: Limits,
    whitelist: BTreeSet<String>,
    faults: Arc<FaultLog>,
}

impl Default for SandboxHost {
    fn default() -> Self {
        Self::new()
    }
}

impl SandboxHost {
    pub fn new() -> Self {
        Self {
            limits: Limits::default(),
            whitelist: HOST_PRIMITIVES
                .iter()
                .map(|(n, _)| n.to_string())
                .collect(),
            faults: Arc::new(FaultLog::new()),
        }
    }

    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    pub fn fault_log(&self) -> &Arc<FaultLog> {
        &self.faults
    }

    /// Evaluate the sandbox script once, yielding the factory used for every
    /// frame of the job.
    #[tracing::instrument(skip(self, artifact), fields(artifact = %artifact.id))]
    pub fn prepare(&self, artifact: &CompiledArtifact) -> VignetteResult<SceneFactory> {
        let program = parse(&artifact.sandbox.text)
            .map_err(|e| VignetteError::sandbox(format!("sandbox script rejected: {e}")))?;
        let entry = artifact.sandbox.entry.clone();
        let declared = program
            .items
            .iter()
            .any(|i| matches!(i, crate::ast::Item::Function(f) if f.name == entry));
        if !declared {
            return Err(VignetteError::sandbox(format!(
                "sandbox script does not declare factory '{entry}'"
            )));
        }
        Ok(SceneFactory {
            artifact_id: artifact.id,
            program,
            entry,
            duration_frames: artifact.duration_frames(),
        })
    }

    /// Render one frame through the factory. Deterministic for a given
    /// (artifact, frame); never fails outward.
    pub fn render(
        &self,
        factory: &SceneFactory,
        frame: FrameIndex,
        canvas: Canvas,
        fps: Fps,
    ) -> FramePlan {
        let ctx = FrameCtx {
            frame,
            duration: FrameIndex(factory.duration_frames),
            fps,
            canvas,
        };
        let result = catch_unwind(AssertUnwindSafe(|| {
            run_scene(
                &factory.program,
                &factory.entry,
                &self.whitelist,
                &ctx,
                self.limits,
            )
        }));
        match result {
            Ok(Ok(node)) => FramePlan::from_tree(&ctx, &node),
            Ok(Err(e)) => {
                self.faults.record_recovered(
                    factory.artifact_id,
                    ExecutionContext::Sandbox,
                    e.to_string(),
                );
                FramePlan::error_placeholder(&ctx, e.to_string())
            }
            Err(_) => {
                self.faults.record_recovered(
                    factory.artifact_id,
                    ExecutionContext::Sandbox,
                    "scene factory panicked",
                );
                FramePlan::error_placeholder(&ctx, "scene factory panicked")
            }
        }
    }

    /// Render a whole job: every frame of every scene. Scenes run in parallel
    /// worker slots; their sandbox state is independent. One broken scene
    /// yields placeholder frames for itself and nothing else.
    #[tracing::instrument(skip(self, artifacts))]
    pub fn render_job(
        &self,
        artifacts: &[CompiledArtifact],
        canvas: Canvas,
        fps: Fps,
    ) -> JobReport {
        let scenes: Vec<SceneReport> = artifacts
            .par_iter()
            .map(|artifact| self.render_scene(artifact, canvas, fps))
            .collect();
        let total_frames = scenes.iter().map(|s| s.plans.len() as u64).sum();
        let placeholder_frames = scenes.iter().map(|s| s.placeholder_frames).sum();
        tracing::info!(
            scenes = scenes.len(),
            total_frames,
            placeholder_frames,
            "render job complete"
        );
        JobReport {
            scenes,
            total_frames,
            placeholder_frames,
        }
    }

    fn render_scene(&self, artifact: &CompiledArtifact, canvas: Canvas, fps: Fps) -> SceneReport {
        match self.prepare(artifact) {
            Ok(factory) => {
                let plans: Vec<FramePlan> = (0..factory.duration_frames)
                    .map(|f| self.render(&factory, FrameIndex(f), canvas, fps))
                    .collect();
                let placeholder_frames =
                    plans.iter().filter(|p| p.is_placeholder()).count() as u64;
                SceneReport {
                    artifact_id: artifact.id,
                    plans,
                    placeholder_frames,
                }
            }
            Err(e) => {
                self.faults.record_recovered(
                    artifact.id,
                    ExecutionContext::Sandbox,
                    e.to_string(),
                );
                let duration = artifact.duration_frames().max(1);
                let plans: Vec<FramePlan> = (0..duration)
                    .map(|f| {
                        let ctx = FrameCtx {
                            frame: FrameIndex(f),
                            duration: FrameIndex(duration),
                            fps,
                            canvas,
                        };
                        FramePlan::error_placeholder(&ctx, e.to_string())
                    })
                    .collect();
                let placeholder_frames = plans.len() as u64;
                SceneReport {
                    artifact_id: artifact.id,
                    plans,
                    placeholder_frames,
                }
            }
        }
    }
}

#[derive(Clone, Debug, serde::Serialize)]
pub struct SceneReport {
    pub artifact_id: Uuid,
    pub plans: Vec<FramePlan>,
    pub placeholder_frames: u64,
}

#[derive(Clone, Debug, serde::Serialize)]
pub struct JobReport {
    pub scenes: Vec<SceneReport>,
    pub total_frames: u64,
    pub placeholder_frames: u64,
}
