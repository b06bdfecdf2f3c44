use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use vignette::{
    AttemptOutcome, BuildOutcome, BuildRequest, CircuitBreaker, DependencyRegistry, Issue,
    IssueKind, MAX_REPAIR_ATTEMPTS, RepairLoop, SceneGenerator, VignetteError,
};

const GOOD: &str = "use group; export const DURATION = 30; \
                    function scene() { return group([]); } export default scene;";

/// Unfixable by the validator: broken syntax every time.
const BROKEN: &str = "function scene( {";

/// Fixable without a model round-trip: the validator injects the acquisition
/// and the duration itself.
const FIXABLE: &str =
    "function scene() { return container({}, []); } export default scene;";

struct ScriptedGenerator {
    responses: Mutex<Vec<anyhow::Result<String>>>,
    calls: Mutex<Vec<Vec<Issue>>>,
}

impl ScriptedGenerator {
    fn new(responses: Vec<anyhow::Result<String>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn feedback_for_call(&self, i: usize) -> Vec<Issue> {
        self.calls.lock().unwrap()[i].clone()
    }
}

#[async_trait]
impl SceneGenerator for ScriptedGenerator {
    async fn generate(
        &self,
        _request: &BuildRequest,
        feedback: &[Issue],
    ) -> anyhow::Result<String> {
        self.calls.lock().unwrap().push(feedback.to_vec());
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            anyhow::bail!("generator exhausted");
        }
        responses.remove(0)
    }
}

fn repair_loop(generator: Arc<ScriptedGenerator>) -> (RepairLoop, Arc<CircuitBreaker>) {
    let breaker = Arc::new(CircuitBreaker::new());
    let repair = RepairLoop::new(
        generator,
        Arc::clone(&breaker),
        Arc::new(DependencyRegistry::builtin()),
    );
    (repair, breaker)
}

#[tokio::test]
async fn deterministically_fixable_faults_never_call_the_generator_twice() {
    let generator = ScriptedGenerator::new(vec![Ok(FIXABLE.to_string())]);
    let (repair, _) = repair_loop(Arc::clone(&generator));
    let outcome = repair
        .run(&BuildRequest::new(Uuid::new_v4(), "a fading card"))
        .await
        .unwrap();
    assert!(outcome.is_ready());
    assert!(outcome.attempts().is_empty());
    assert_eq!(generator.call_count(), 1);
}

#[tokio::test]
async fn unrecoverable_syntax_fails_after_exactly_three_attempts() {
    let generator = ScriptedGenerator::new(vec![
        Ok(BROKEN.to_string()),
        Ok(BROKEN.to_string()),
        Ok(BROKEN.to_string()),
        Ok(BROKEN.to_string()),
        Ok(GOOD.to_string()), // a 4th repair must never happen
    ]);
    let (repair, _) = repair_loop(Arc::clone(&generator));
    let outcome = repair
        .run(&BuildRequest::new(Uuid::new_v4(), "a scene"))
        .await
        .unwrap();

    let BuildOutcome::Failed {
        last_issues,
        attempts,
    } = outcome
    else {
        panic!("expected Failed");
    };
    assert_eq!(attempts.len(), MAX_REPAIR_ATTEMPTS as usize);
    assert!(attempts.iter().all(|a| a.outcome == AttemptOutcome::StillInvalid));
    assert_eq!(attempts[0].attempt_number, 1);
    assert_eq!(attempts[2].attempt_number, 3);
    assert_eq!(last_issues[0].kind, IssueKind::Syntax);
    // initial generation + 3 repairs, never a 5th call
    assert_eq!(generator.call_count(), 4);
}

#[tokio::test]
async fn repair_feedback_carries_the_remaining_issues() {
    let generator = ScriptedGenerator::new(vec![
        Ok(BROKEN.to_string()),
        Ok(GOOD.to_string()),
    ]);
    let (repair, _) = repair_loop(Arc::clone(&generator));
    let outcome = repair
        .run(&BuildRequest::new(Uuid::new_v4(), "a scene"))
        .await
        .unwrap();
    assert!(outcome.is_ready());
    assert_eq!(outcome.attempts().len(), 1);
    assert_eq!(outcome.attempts()[0].outcome, AttemptOutcome::Fixed);

    // first call gets the (empty) orchestrator issues, the repair call gets
    // the validator's structured feedback
    assert!(generator.feedback_for_call(0).is_empty());
    let feedback = generator.feedback_for_call(1);
    assert_eq!(feedback[0].kind, IssueKind::Syntax);
}

#[tokio::test]
async fn systemic_generator_failure_opens_the_breaker_across_artifacts() {
    let generator = ScriptedGenerator::new(vec![
        Err(anyhow::anyhow!("down")),
        Err(anyhow::anyhow!("down")),
        Err(anyhow::anyhow!("down")),
        Err(anyhow::anyhow!("down")),
        Err(anyhow::anyhow!("down")),
        Err(anyhow::anyhow!("down")),
    ]);
    let (repair, breaker) = repair_loop(Arc::clone(&generator));

    // a handful of unrelated scene builds against a dead collaborator
    let mut circuit_open_seen = false;
    for _ in 0..8 {
        match repair
            .run(&BuildRequest::new(Uuid::new_v4(), "a scene"))
            .await
        {
            Err(VignetteError::CircuitOpen(_)) => {
                circuit_open_seen = true;
                break;
            }
            Ok(_) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert!(circuit_open_seen, "breaker never opened");
    assert_eq!(breaker.state(), vignette::BreakerState::Open);
    // once open, no further generator calls are made
    let calls_when_open = generator.call_count();
    let result = repair
        .run(&BuildRequest::new(Uuid::new_v4(), "another scene"))
        .await;
    assert!(matches!(result, Err(VignetteError::CircuitOpen(_))));
    assert_eq!(generator.call_count(), calls_when_open);
}

#[tokio::test]
async fn breaker_recovers_through_half_open_probe() {
    let generator = ScriptedGenerator::new(vec![
        Err(anyhow::anyhow!("down")),
        Ok(GOOD.to_string()),
    ]);
    let breaker = Arc::new(CircuitBreaker::with_config(1, Duration::from_millis(20)));
    let repair = RepairLoop::new(
        Arc::clone(&generator) as Arc<dyn SceneGenerator>,
        Arc::clone(&breaker),
        Arc::new(DependencyRegistry::builtin()),
    );

    // first build trips the (threshold 1) breaker
    let first = repair
        .run(&BuildRequest::new(Uuid::new_v4(), "a scene"))
        .await
        .unwrap();
    assert!(!first.is_ready());
    assert_eq!(breaker.state(), vignette::BreakerState::Open);

    // before cooldown: fail fast
    assert!(matches!(
        repair
            .run(&BuildRequest::new(Uuid::new_v4(), "a scene"))
            .await,
        Err(VignetteError::CircuitOpen(_))
    ));

    // after cooldown: the probe goes through and closes the breaker
    tokio::time::sleep(Duration::from_millis(30)).await;
    let probe = repair
        .run(&BuildRequest::new(Uuid::new_v4(), "a scene"))
        .await
        .unwrap();
    assert!(probe.is_ready());
    assert_eq!(breaker.state(), vignette::BreakerState::Closed);
}

#[tokio::test]
async fn attempt_count_never_exceeds_the_ceiling() {
    // every mix of broken, erroring and eventually-good generations stays
    // inside the ceiling
    let scripts: Vec<Vec<anyhow::Result<String>>> = vec![
        vec![Ok(BROKEN.into()), Ok(BROKEN.into()), Ok(GOOD.into())],
        vec![Ok(BROKEN.into()), Err(anyhow::anyhow!("flake")), Ok(GOOD.into())],
        vec![
            Ok(BROKEN.into()),
            Err(anyhow::anyhow!("flake")),
            Err(anyhow::anyhow!("flake")),
            Err(anyhow::anyhow!("flake")),
        ],
        vec![Ok(GOOD.into())],
    ];
    for script in scripts {
        let generator = ScriptedGenerator::new(script);
        let (repair, _) = repair_loop(Arc::clone(&generator));
        let outcome = repair
            .run(&BuildRequest::new(Uuid::new_v4(), "a scene"))
            .await
            .unwrap();
        assert!(outcome.attempts().len() <= MAX_REPAIR_ATTEMPTS as usize);
        for (i, attempt) in outcome.attempts().iter().enumerate() {
            assert_eq!(attempt.attempt_number, i as u32 + 1);
        }
    }
}
