//! End-to-end proof generation: fetch, check, build, prove, package.

use tracing::info;

use crate::artifacts::CircuitArtifacts;
use crate::commitment::CommitmentSource;
use crate::engine::{CancelToken, ProgressSink, ProvingEngine, ProvingOutcome};
use crate::error::Result;
use crate::types::{ProofRequest, Snapshot, WalletPool};
use crate::witness;

pub struct ProofPipeline<'a> {
    engine: &'a ProvingEngine,
    artifacts: &'a CircuitArtifacts,
}

impl<'a> ProofPipeline<'a> {
    pub fn new(engine: &'a ProvingEngine, artifacts: &'a CircuitArtifacts) -> Self {
        Self { engine, artifacts }
    }

    /// Fetch the instance's pool and latest snapshot, then [`prove_against`](Self::prove_against).
    pub fn run(
        &self,
        request: &ProofRequest,
        source: &dyn CommitmentSource,
        cancel: &CancelToken,
        progress: &dyn ProgressSink,
    ) -> Result<ProvingOutcome> {
        let pool = source.pool_of(&request.instance_id)?;
        let snapshot = source.snapshot_of(&request.instance_id)?;
        self.prove_against(request, &pool, &snapshot, cancel, progress)
    }

    /// Input errors surface before any artifact I/O, and artifact mismatches
    /// surface before any witness exists.
    pub fn prove_against(
        &self,
        request: &ProofRequest,
        pool: &WalletPool,
        snapshot: &Snapshot,
        cancel: &CancelToken,
        progress: &dyn ProgressSink,
    ) -> Result<ProvingOutcome> {
        let validated = witness::validate(request, pool, snapshot)?;
        let circuit = self.engine.load_artifacts(self.artifacts)?;

        let witness = witness::assemble(validated, request, pool, snapshot)?;
        info!(
            instance = %request.instance_id,
            block = snapshot.block_number(),
            "witness built, proving"
        );
        self.engine.prove_loaded(witness, circuit, cancel, progress)
    }
}
