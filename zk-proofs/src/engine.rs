//! Proving engine: drives one witness through artifact loading, assignment
//! synthesis and Groth16 proving, with progress reporting and cooperative
//! cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::artifacts::{ArtifactCache, CircuitArtifacts, LoadedCircuit};
use crate::circuit::check_assignment;
use crate::error::{ProofError, Result};
use crate::groth16;
use crate::packager::{package, ProofArtifact, ProofBytes};
use crate::witness::Witness;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProverState {
    Idle,
    LoadingArtifacts,
    BuildingInternalAssignment,
    Proving,
    Done,
    Cancelled,
    Failed,
}

impl ProverState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Cancelled | Self::Failed)
    }

    pub fn can_transition_to(self, next: ProverState) -> bool {
        use ProverState::*;
        match (self, next) {
            (Idle, LoadingArtifacts)
            | (LoadingArtifacts, BuildingInternalAssignment)
            | (BuildingInternalAssignment, Proving)
            | (Proving, Done) => true,
            (from, Cancelled | Failed) => !from.is_terminal(),
            _ => false,
        }
    }

    pub fn transition(self, next: ProverState) -> Result<ProverState> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(ProofError::Proving(format!("illegal prover transition {self:?} -> {next:?}")))
        }
    }

    /// Percent reported on entering this state.
    fn start_percent(self) -> u8 {
        match self {
            Self::Idle | Self::LoadingArtifacts => 0,
            Self::BuildingInternalAssignment => 20,
            Self::Proving => 40,
            Self::Done => 100,
            Self::Cancelled | Self::Failed => 0,
        }
    }
}

/// Cooperative cancellation flag, shared between the caller and the engine.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    pub state: ProverState,
    pub percent: u8,
}

/// One-way progress channel. Implementations must return promptly.
pub trait ProgressSink: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

impl<F> ProgressSink for F
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn report(&self, event: ProgressEvent) {
        self(event)
    }
}

/// Discards every event.
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Wraps a sink and enforces the reporting contract: state changes follow the
/// state machine, percent never decreases, and 100 is only ever reported by `Done`.
pub struct ProgressTracker<'a> {
    sink: &'a dyn ProgressSink,
    state: ProverState,
    percent: u8,
}

impl<'a> ProgressTracker<'a> {
    pub fn new(sink: &'a dyn ProgressSink) -> Self {
        Self {
            sink,
            state: ProverState::Idle,
            percent: 0,
        }
    }

    pub fn state(&self) -> ProverState {
        self.state
    }

    pub fn percent(&self) -> u8 {
        self.percent
    }

    pub fn enter(&mut self, next: ProverState) -> Result<()> {
        self.state = self.state.transition(next)?;
        let floor = if next == ProverState::Done { 100 } else { next.start_percent().min(99) };
        self.percent = self.percent.max(floor);
        self.emit();
        Ok(())
    }

    /// Report progress within the current state. Capped at 99 until `Done`.
    pub fn advance(&mut self, percent: u8) {
        let capped = percent.min(99);
        if capped > self.percent {
            self.percent = capped;
            self.emit();
        }
    }

    /// Move to a terminal failure state, keeping the last percent.
    fn terminate(&mut self, terminal: ProverState) {
        if self.state.can_transition_to(terminal) {
            self.state = terminal;
            self.emit();
        }
    }

    fn emit(&self) {
        self.sink.report(ProgressEvent {
            state: self.state,
            percent: self.percent,
        });
    }
}

/// Result of a proving attempt that did not fail.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProvingOutcome {
    Completed(ProofArtifact),
    /// Caller asked to stop; no artifact was produced.
    Cancelled,
}

pub struct ProvingEngine {
    cache: ArtifactCache,
    seed: Option<u64>,
}

impl Default for ProvingEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ProvingEngine {
    pub fn new() -> Self {
        Self {
            cache: ArtifactCache::new(),
            seed: None,
        }
    }

    /// Engine whose proving randomness is derived from `seed`. Tests only.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            cache: ArtifactCache::new(),
            seed: Some(seed),
        }
    }

    /// Pin-check and load (or re-acquire from cache) the artifact pair.
    pub fn load_artifacts(&self, artifacts: &CircuitArtifacts) -> Result<Arc<LoadedCircuit>> {
        self.cache.get_or_load(artifacts)
    }

    fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }

    /// Prove `witness`. Consumes it so the secret assignment does not outlive the attempt.
    ///
    /// Cancellation is checked before each phase and once more after the proof is
    /// computed; a cancelled run returns [`ProvingOutcome::Cancelled`] and never
    /// reports 100.
    pub fn prove(
        &self,
        witness: Witness,
        artifacts: &CircuitArtifacts,
        cancel: &CancelToken,
        progress: &dyn ProgressSink,
    ) -> Result<ProvingOutcome> {
        self.drive(witness, || self.load_artifacts(artifacts), cancel, progress)
    }

    /// Like [`prove`](Self::prove), for a circuit already acquired through
    /// [`load_artifacts`](Self::load_artifacts). The files are not read again.
    pub fn prove_loaded(
        &self,
        witness: Witness,
        circuit: Arc<LoadedCircuit>,
        cancel: &CancelToken,
        progress: &dyn ProgressSink,
    ) -> Result<ProvingOutcome> {
        self.drive(witness, move || Ok(circuit), cancel, progress)
    }

    fn drive(
        &self,
        witness: Witness,
        acquire: impl FnOnce() -> Result<Arc<LoadedCircuit>>,
        cancel: &CancelToken,
        progress: &dyn ProgressSink,
    ) -> Result<ProvingOutcome> {
        let mut tracker = ProgressTracker::new(progress);

        match self.run_phases(witness, acquire, cancel, &mut tracker) {
            Ok(Some(artifact)) => Ok(ProvingOutcome::Completed(artifact)),
            Ok(None) => {
                info!(state = ?tracker.state(), percent = tracker.percent(), "proving cancelled");
                tracker.terminate(ProverState::Cancelled);
                Ok(ProvingOutcome::Cancelled)
            }
            Err(e) => {
                warn!(state = ?tracker.state(), error = %e, "proving failed");
                tracker.terminate(ProverState::Failed);
                Err(e)
            }
        }
    }

    fn run_phases(
        &self,
        witness: Witness,
        acquire: impl FnOnce() -> Result<Arc<LoadedCircuit>>,
        cancel: &CancelToken,
        tracker: &mut ProgressTracker<'_>,
    ) -> Result<Option<ProofArtifact>> {
        if cancel.is_cancelled() {
            return Ok(None);
        }
        tracker.enter(ProverState::LoadingArtifacts)?;
        let loaded = acquire()?;
        tracker.advance(20);

        if cancel.is_cancelled() {
            return Ok(None);
        }
        tracker.enter(ProverState::BuildingInternalAssignment)?;
        if let Err(e) = check_assignment(&witness) {
            if let ProofError::ConstraintViolation { constraint } = &e {
                error!(
                    phase = ?tracker.state(),
                    constraint = %constraint,
                    preconditions = "index, identity, signature, threshold, amount range",
                    "witness passed builder preconditions but violates the circuit"
                );
            }
            return Err(e);
        }
        let public_signals = witness.public_signals().to_field_elements();
        tracker.advance(40);

        if cancel.is_cancelled() {
            return Ok(None);
        }
        tracker.enter(ProverState::Proving)?;
        let mut rng = self.rng();
        let proof = groth16::create_proof(&loaded.proving_key, witness, &mut rng)?;
        tracker.advance(90);

        if !groth16::verify(&loaded.prepared_vk, &proof, &public_signals)? {
            error!(phase = ?tracker.state(), "proof failed self-verification against the loaded key");
            return Err(ProofError::ConstraintViolation {
                constraint: "proof self-verification".to_string(),
            });
        }
        tracker.advance(95);

        // A proof computed after cancellation is discarded.
        if cancel.is_cancelled() {
            return Ok(None);
        }

        let artifact = package(ProofBytes::from_proof(&proof)?, public_signals)?;
        tracker.enter(ProverState::Done)?;
        info!(
            proving_key = %loaded.pin.proving_key_sha256,
            "proof generated"
        );
        Ok(Some(artifact))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{eth, fixture_pool, fixture_request, fixture_snapshot};
    use crate::types::{Address, InstanceId};
    use std::sync::Mutex;

    #[test]
    fn test_state_machine() {
        use ProverState::*;
        assert!(Idle.can_transition_to(LoadingArtifacts));
        assert!(!Idle.can_transition_to(Proving));
        assert!(Proving.can_transition_to(Done));
        assert!(LoadingArtifacts.can_transition_to(Cancelled));
        assert!(Idle.can_transition_to(Failed));
        assert!(!Done.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(Failed));
        assert!(Done.transition(Idle).is_err());
    }

    #[test]
    fn test_tracker_is_monotonic_and_capped() {
        let events = Mutex::new(Vec::new());
        let sink = |e: ProgressEvent| events.lock().unwrap().push(e);
        let mut tracker = ProgressTracker::new(&sink);

        tracker.enter(ProverState::LoadingArtifacts).unwrap();
        tracker.advance(30);
        tracker.advance(10);
        tracker.enter(ProverState::BuildingInternalAssignment).unwrap();
        tracker.enter(ProverState::Proving).unwrap();
        tracker.advance(100);
        assert_eq!(tracker.percent(), 99);
        tracker.enter(ProverState::Done).unwrap();

        let events = events.into_inner().unwrap();
        let percents: Vec<u8> = events.iter().map(|e| e.percent).collect();
        assert!(percents.windows(2).all(|w| w[0] <= w[1]), "{percents:?}");
        assert_eq!(percents.iter().filter(|p| **p == 100).count(), 1);
        assert_eq!(events.last().unwrap().state, ProverState::Done);
    }

    #[test]
    fn test_tracker_rejects_skipped_phase() {
        let mut tracker = ProgressTracker::new(&NoProgress);
        assert!(tracker.enter(ProverState::Proving).is_err());
    }

    #[test]
    fn test_cancel_before_start() {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = CircuitArtifacts {
            constraint_system: dir.path().join("missing.json"),
            proving_key: dir.path().join("missing.bin"),
            pin: crate::artifacts::ArtifactPin {
                constraint_system_sha256: String::new(),
                proving_key_sha256: String::new(),
            },
        };
        let cancel = CancelToken::new();
        cancel.cancel();

        let events = Mutex::new(Vec::new());
        let sink = |e: ProgressEvent| events.lock().unwrap().push(e);
        let outcome = ProvingEngine::new()
            .prove(Witness::blank(), &artifacts, &cancel, &sink)
            .unwrap();

        assert_eq!(outcome, ProvingOutcome::Cancelled);
        let events = events.into_inner().unwrap();
        assert!(events.iter().all(|e| e.percent < 100));
        assert_eq!(events.last().unwrap().state, ProverState::Cancelled);
    }

    #[test]
    fn test_missing_artifacts_fail() {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = CircuitArtifacts {
            constraint_system: dir.path().join("missing.json"),
            proving_key: dir.path().join("missing.bin"),
            pin: crate::artifacts::ArtifactPin {
                constraint_system_sha256: String::new(),
                proving_key_sha256: String::new(),
            },
        };
        let result = ProvingEngine::new().prove(Witness::blank(), &artifacts, &CancelToken::new(), &NoProgress);
        assert!(matches!(result, Err(ProofError::ArtifactLoad { .. })));
    }

    #[test]
    fn test_unsatisfiable_witness_fails_loudly() {
        let dir = tempfile::tempdir().unwrap();
        crate::artifacts::setup_artifacts(dir.path(), &mut StdRng::seed_from_u64(3)).unwrap();
        let artifacts = CircuitArtifacts::from_dir(dir.path()).unwrap();

        let request = fixture_request(InstanceId(Address([1u8; 20])), 15, eth(10));
        let mut witness = crate::witness::build(&request, &fixture_pool(), &fixture_snapshot(1000)).unwrap();
        witness.balances[3] += 1;

        let events = Mutex::new(Vec::new());
        let sink = |e: ProgressEvent| events.lock().unwrap().push(e);
        let engine = ProvingEngine::with_seed(4);
        let circuit = engine.load_artifacts(&artifacts).unwrap();
        let result = engine.prove_loaded(witness, circuit, &CancelToken::new(), &sink);

        match result {
            Err(ProofError::ConstraintViolation { constraint }) => {
                assert!(constraint.contains("commitment"), "{constraint}");
            }
            other => panic!("expected a constraint violation, got {other:?}"),
        }
        let events = events.into_inner().unwrap();
        assert!(events.iter().all(|e| e.percent < 100), "{events:?}");
        assert_eq!(events.last().unwrap().state, ProverState::Failed);
        assert!(events.iter().all(|e| e.state != ProverState::Proving));
    }
}
