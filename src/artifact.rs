//! Pipeline data model: source artifacts, repair bookkeeping, compiled output
//! and execution faults.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    ast::Program,
    registry::DependencyManifest,
    validate::Issue,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ArtifactStatus {
    Draft,
    Validating,
    Repairing,
    Compiling,
    Ready,
    Failed,
}

impl ArtifactStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Ready | Self::Failed)
    }
}

/// One generation attempt's raw text plus identity. Owned by the repair loop
/// for its lifetime; superseded when a later attempt replaces it.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct SourceArtifact {
    pub id: Uuid,
    pub scene_id: Uuid,
    pub prompt: String,
    pub source: String,
    /// Monotonic per scene, starting at 1.
    pub attempt: u32,
    pub status: ArtifactStatus,
    pub created_at: DateTime<Utc>,
}

impl SourceArtifact {
    pub fn new(scene_id: Uuid, prompt: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            scene_id,
            prompt: prompt.into(),
            source: source.into(),
            attempt: 1,
            status: ArtifactStatus::Draft,
            created_at: Utc::now(),
        }
    }

    /// Next-attempt artifact replacing this one. Keeps scene identity and
    /// prompt, bumps the attempt counter.
    pub fn superseded_by(&self, source: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            scene_id: self.scene_id,
            prompt: self.prompt.clone(),
            source: source.into(),
            attempt: self.attempt + 1,
            status: ArtifactStatus::Draft,
            created_at: Utc::now(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum AttemptOutcome {
    Fixed,
    StillInvalid,
    GenerationFailed,
}

/// One repair-loop iteration. At most [`crate::repair::MAX_REPAIR_ATTEMPTS`]
/// per artifact, enforced by the loop.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct RepairAttempt {
    pub artifact_id: Uuid,
    pub attempt_number: u32,
    pub triggering_issue: Issue,
    pub outcome: AttemptOutcome,
}

/// Browser-loadable form: the parsed program with host primitives left as
/// named external references, resolved through the registry at load time.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct ModuleArtifact {
    pub program: Program,
    pub entry: String,
    /// Host primitives this module expects the session runtime to provide.
    pub externals: Vec<String>,
    /// Compiled-format version; part of the loader cache key.
    pub version: u32,
}

/// Sandbox-executable form: self-contained script text with module syntax
/// stripped and icon assets inlined, callable as a factory.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct SandboxScript {
    pub text: String,
    pub entry: String,
    pub duration_frames: u64,
}

/// Paired output of one successful compile. Immutable once produced.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct CompiledArtifact {
    pub id: Uuid,
    pub source_artifact_id: Uuid,
    pub module: ModuleArtifact,
    pub sandbox: SandboxScript,
    pub manifest: DependencyManifest,
    pub compiled_at: DateTime<Utc>,
}

impl CompiledArtifact {
    pub fn duration_frames(&self) -> u64 {
        self.sandbox.duration_frames
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ExecutionContext {
    Browser,
    Sandbox,
}

/// Run-time fault recovered at a scene boundary. Observability only; never
/// mutates the artifact it refers to.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct ExecutionFault {
    pub compiled_artifact_id: Uuid,
    pub context: ExecutionContext,
    pub occurred_at: DateTime<Utc>,
    pub message: String,
    pub recovered: bool,
}

/// Append-only fault log. The loader and the sandbox host each own one for
/// their execution context.
#[derive(Debug, Default)]
pub struct FaultLog {
    entries: std::sync::Mutex<Vec<ExecutionFault>>,
}

impl FaultLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<ExecutionFault>> {
        // a poisoned log is still a log
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn record(&self, fault: ExecutionFault) {
        tracing::warn!(
            artifact = %fault.compiled_artifact_id,
            context = ?fault.context,
            message = %fault.message,
            "execution fault recovered"
        );
        self.lock().push(fault);
    }

    pub fn record_recovered(
        &self,
        compiled_artifact_id: Uuid,
        context: ExecutionContext,
        message: impl Into<String>,
    ) {
        self.record(ExecutionFault {
            compiled_artifact_id,
            context,
            occurred_at: Utc::now(),
            message: message.into(),
            recovered: true,
        });
    }

    pub fn snapshot(&self) -> Vec<ExecutionFault> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
