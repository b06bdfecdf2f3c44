//! Bounded repair loop: validate, regenerate with structured feedback, retry.
//!
//! One loop instance drives one scene build. The per-artifact ceiling of three
//! repair attempts is enforced here, independent of the circuit breaker; the
//! breaker only decides whether a new generation call may start at all. A
//! rejected acquire fails fast with `CircuitOpen` and consumes nothing.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    artifact::{ArtifactStatus, AttemptOutcome, CompiledArtifact, RepairAttempt, SourceArtifact},
    breaker::{Acquire, CircuitBreaker},
    compile,
    error::{VignetteError, VignetteResult},
    registry::DependencyRegistry,
    validate::{Issue, RepairPolicy, ValidationResult, validate},
};

/// Hard ceiling on repair attempts per artifact. The third failed attempt
/// forces `Failed`; there is never a fourth.
pub const MAX_REPAIR_ATTEMPTS: u32 = 3;

pub const DEFAULT_GENERATION_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_COMPILE_TIMEOUT: Duration = Duration::from_secs(10);

/// Build request consumed from the orchestrator tier.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct BuildRequest {
    pub scene_id: Uuid,
    pub prompt: String,
    #[serde(default)]
    pub previous_issues: Vec<Issue>,
}

impl BuildRequest {
    pub fn new(scene_id: Uuid, prompt: impl Into<String>) -> Self {
        Self {
            scene_id,
            prompt: prompt.into(),
            previous_issues: Vec::new(),
        }
    }
}

/// Terminal result surfaced to the caller, with the full attempt history.
#[derive(Clone, Debug)]
pub enum BuildOutcome {
    Ready {
        artifact: Box<CompiledArtifact>,
        attempts: Vec<RepairAttempt>,
    },
    Failed {
        last_issues: Vec<Issue>,
        attempts: Vec<RepairAttempt>,
    },
}

impl BuildOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }

    pub fn attempts(&self) -> &[RepairAttempt] {
        match self {
            Self::Ready { attempts, .. } | Self::Failed { attempts, .. } => attempts,
        }
    }

    /// Collapse into a plain result for callers that only want the artifact.
    pub fn into_result(self) -> VignetteResult<CompiledArtifact> {
        match self {
            Self::Ready { artifact, .. } => Ok(*artifact),
            Self::Failed { last_issues, .. } => Err(VignetteError::repair_exhausted(
                last_issues
                    .iter()
                    .map(|i| i.message.as_str())
                    .collect::<Vec<_>>()
                    .join("; "),
            )),
        }
    }
}

/// External code-generation collaborator. Implementations are network-backed;
/// the loop owns timeouts and never trusts the returned text.
#[async_trait]
pub trait SceneGenerator: Send + Sync {
    async fn generate(&self, request: &BuildRequest, feedback: &[Issue])
    -> anyhow::Result<String>;
}

pub struct RepairLoop {
    generator: Arc<dyn SceneGenerator>,
    breaker: Arc<CircuitBreaker>,
    registry: Arc<DependencyRegistry>,
    policy: RepairPolicy,
    generation_timeout: Duration,
    compile_timeout: Duration,
}

enum Step {
    Regenerated(ValidationResult),
    Exhausted(Vec<Issue>),
}

enum GenFailure {
    /// Transient breaker rejection; never counted against the ceiling.
    CircuitOpen,
    Issue(Issue),
}

impl RepairLoop {
    pub fn new(
        generator: Arc<dyn SceneGenerator>,
        breaker: Arc<CircuitBreaker>,
        registry: Arc<DependencyRegistry>,
    ) -> Self {
        Self {
            generator,
            breaker,
            registry,
            policy: RepairPolicy::default(),
            generation_timeout: DEFAULT_GENERATION_TIMEOUT,
            compile_timeout: DEFAULT_COMPILE_TIMEOUT,
        }
    }

    pub fn with_policy(mut self, policy: RepairPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_timeouts(mut self, generation: Duration, compile: Duration) -> Self {
        self.generation_timeout = generation;
        self.compile_timeout = compile;
        self
    }

    /// Drive one scene build to a terminal state.
    ///
    /// Returns `Err(CircuitOpen)` when the breaker rejects a generation call;
    /// that is a transient rejection, not a `Failed` artifact, and does not
    /// consume any of the artifact's attempts.
    #[tracing::instrument(skip(self, request), fields(scene = %request.scene_id))]
    pub async fn run(&self, request: &BuildRequest) -> VignetteResult<BuildOutcome> {
        let mut attempts: Vec<RepairAttempt> = Vec::new();

        let text = match self.generate(request, &request.previous_issues).await {
            Ok(text) => text,
            Err(GenFailure::CircuitOpen) => {
                return Err(VignetteError::circuit_open(
                    "generation rejected; back off and retry later",
                ));
            }
            Err(GenFailure::Issue(issue)) => {
                return Ok(BuildOutcome::Failed {
                    last_issues: vec![issue],
                    attempts,
                });
            }
        };

        let mut artifact = SourceArtifact::new(request.scene_id, request.prompt.clone(), text);
        artifact.status = ArtifactStatus::Validating;
        let mut validation = validate(&artifact.source, &self.policy);
        self.breaker.record_outcome(validation.valid);

        loop {
            if validation.valid {
                artifact.status = ArtifactStatus::Compiling;
                match self.compile(&artifact, &validation.source).await {
                    Ok(compiled) => {
                        artifact.status = ArtifactStatus::Ready;
                        tracing::info!(
                            attempt = artifact.attempt,
                            repairs = attempts.len(),
                            "scene build ready"
                        );
                        return Ok(BuildOutcome::Ready {
                            artifact: Box::new(compiled),
                            attempts,
                        });
                    }
                    Err(e) => {
                        let issue = Issue::compile(e.to_string());
                        match self
                            .repair_step(request, &mut artifact, issue.clone(), &[issue], &mut attempts)
                            .await?
                        {
                            Step::Regenerated(v) => validation = v,
                            Step::Exhausted(last_issues) => {
                                return self.fail(artifact, last_issues, attempts);
                            }
                        }
                    }
                }
            } else {
                let issues = validation.remaining_issues.clone();
                let trigger = issues
                    .first()
                    .cloned()
                    .unwrap_or_else(|| Issue::unresolved("artifact is invalid"));
                match self
                    .repair_step(request, &mut artifact, trigger, &issues, &mut attempts)
                    .await?
                {
                    Step::Regenerated(v) => validation = v,
                    Step::Exhausted(last_issues) => {
                        return self.fail(artifact, last_issues, attempts);
                    }
                }
            }
        }
    }

    fn fail(
        &self,
        mut artifact: SourceArtifact,
        last_issues: Vec<Issue>,
        attempts: Vec<RepairAttempt>,
    ) -> VignetteResult<BuildOutcome> {
        artifact.status = ArtifactStatus::Failed;
        tracing::warn!(
            attempts = attempts.len(),
            issues = last_issues.len(),
            "scene build failed"
        );
        Ok(BuildOutcome::Failed {
            last_issues,
            attempts,
        })
    }

    /// One transition into `Repairing`: gate on the breaker, regenerate, and
    /// record the attempt with its outcome.
    async fn repair_step(
        &self,
        request: &BuildRequest,
        artifact: &mut SourceArtifact,
        trigger: Issue,
        feedback: &[Issue],
        attempts: &mut Vec<RepairAttempt>,
    ) -> VignetteResult<Step> {
        if attempts.len() as u32 >= MAX_REPAIR_ATTEMPTS {
            return Ok(Step::Exhausted(feedback.to_vec()));
        }

        artifact.status = ArtifactStatus::Repairing;
        let attempt_number = attempts.len() as u32 + 1;
        let repaired_id = artifact.id;

        match self.generate(request, feedback).await {
            Err(GenFailure::CircuitOpen) => Err(VignetteError::circuit_open(
                "repair rejected; back off and retry later",
            )),
            Err(GenFailure::Issue(issue)) => {
                attempts.push(RepairAttempt {
                    artifact_id: repaired_id,
                    attempt_number,
                    triggering_issue: trigger,
                    outcome: AttemptOutcome::GenerationFailed,
                });
                if attempt_number >= MAX_REPAIR_ATTEMPTS {
                    Ok(Step::Exhausted(vec![issue]))
                } else {
                    // no new text; the loop re-enters with the same artifact
                    Ok(Step::Regenerated(validate(&artifact.source, &self.policy)))
                }
            }
            Ok(text) => {
                *artifact = artifact.superseded_by(text);
                artifact.status = ArtifactStatus::Validating;
                let validation = validate(&artifact.source, &self.policy);
                self.breaker.record_outcome(validation.valid);
                attempts.push(RepairAttempt {
                    artifact_id: repaired_id,
                    attempt_number,
                    triggering_issue: trigger,
                    outcome: if validation.valid {
                        AttemptOutcome::Fixed
                    } else {
                        AttemptOutcome::StillInvalid
                    },
                });
                if !validation.valid && attempt_number >= MAX_REPAIR_ATTEMPTS {
                    Ok(Step::Exhausted(validation.remaining_issues))
                } else {
                    Ok(Step::Regenerated(validation))
                }
            }
        }
    }

    /// Gated, time-bounded generation call. Timeouts and transport errors are
    /// failures for both the breaker and (at the call sites) the ceiling.
    async fn generate(
        &self,
        request: &BuildRequest,
        feedback: &[Issue],
    ) -> Result<String, GenFailure> {
        if self.breaker.try_acquire() == Acquire::Rejected {
            return Err(GenFailure::CircuitOpen);
        }
        match tokio::time::timeout(
            self.generation_timeout,
            self.generator.generate(request, feedback),
        )
        .await
        {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(e)) => {
                self.breaker.record_outcome(false);
                Err(GenFailure::Issue(Issue::generation(format!(
                    "generation failed: {e}"
                ))))
            }
            Err(_) => {
                self.breaker.record_outcome(false);
                Err(GenFailure::Issue(Issue::generation("generation timed out")))
            }
        }
    }

    async fn compile(
        &self,
        artifact: &SourceArtifact,
        validated: &str,
    ) -> VignetteResult<CompiledArtifact> {
        let source_artifact_id = artifact.id;
        let source = validated.to_string();
        let registry = Arc::clone(&self.registry);
        let compiled = tokio::time::timeout(
            self.compile_timeout,
            tokio::task::spawn_blocking(move || {
                compile::compile(source_artifact_id, &source, &registry)
            }),
        )
        .await;
        match compiled {
            Ok(Ok(result)) => {
                if result.is_err() {
                    self.breaker.record_outcome(false);
                }
                result
            }
            Ok(Err(join)) => {
                self.breaker.record_outcome(false);
                Err(VignetteError::compile(format!("compile task failed: {join}")))
            }
            Err(_) => {
                self.breaker.record_outcome(false);
                Err(VignetteError::compile("compile timed out"))
            }
        }
    }
}
