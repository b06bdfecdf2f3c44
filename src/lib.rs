//! Vignette turns model-generated scene source into running artifacts.
//!
//! The pipeline: **validate** (deterministic repair of known generation
//! faults) → **repair loop** (bounded regeneration with structured feedback,
//! gated by a process-wide circuit breaker) → **compile** (one validated
//! source, two executable forms) → **execute** (a lazy cached module loader
//! for interactive preview, and a per-frame fault-isolated sandbox host for
//! batch rendering).
//!
//! Key design constraints:
//!
//! - **No unsafe**: `unsafe` is forbidden in this crate.
//! - **Deterministic-by-default**: validation, compilation and per-frame
//!   evaluation are pure and stable for a given input.
//! - **Bounded failure**: at most three repair attempts per artifact, breaker
//!   cooldowns for systemic failure, and placeholder output (never a crash)
//!   at both execution boundaries.

#![forbid(unsafe_code)]

pub mod artifact;
pub mod assets;
pub mod ast;
pub mod breaker;
pub mod compile;
pub mod core;
pub mod error;
pub mod interp;
pub mod lexer;
pub mod loader;
pub mod parser;
pub mod pipeline;
pub mod registry;
pub mod repair;
pub mod sandbox;
pub mod scene;
pub mod validate;

pub use artifact::{
    ArtifactStatus, AttemptOutcome, CompiledArtifact, ExecutionContext, ExecutionFault, FaultLog,
    ModuleArtifact, RepairAttempt, SandboxScript, SourceArtifact,
};
pub use breaker::{Acquire, BreakerSnapshot, BreakerState, CircuitBreaker};
pub use compile::{MODULE_FORMAT_VERSION, compile};
pub use core::{Canvas, Fps, FrameIndex, FrameRange};
pub use error::{VignetteError, VignetteResult};
pub use interp::Limits;
pub use loader::{ModuleLoader, SceneComponent};
pub use pipeline::{Pipeline, PipelineConfig};
pub use registry::{DependencyManifest, DependencyRegistry, HOST_PRIMITIVES, REGISTRY_VERSION};
pub use repair::{
    BuildOutcome, BuildRequest, MAX_REPAIR_ATTEMPTS, RepairLoop, SceneGenerator,
};
pub use sandbox::{JobReport, SandboxHost, SceneFactory, SceneReport};
pub use scene::{FrameCtx, FramePlan, MediaKind, PlanNode, PlanNodeKind, SceneNode};
pub use validate::{
    AppliedFix, FixKind, Issue, IssueKind, RepairPolicy, ValidationResult, validate,
};
