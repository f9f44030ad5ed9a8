use crate::config::Config;
use crate::db::Db;
use crate::errors::ApiError;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, Mutex, OnceCell, Semaphore};
use uuid::Uuid;
use zkflex_proofs::groth16::serialize_vk;
use zkflex_proofs::{
    setup_artifacts, CancelToken, CircuitArtifacts, Groth16ViewVerifier, LoadedCircuit, ProgressEvent,
    ProvingEngine,
};

use rand::rngs::OsRng;

#[derive(Clone)]
pub struct AppState {
    pub db: Db,
    pub config: Arc<Config>,
    pub engine: Arc<ProvingEngine>,
    /// Proving is CPU-bound; one job proves at a time, the rest wait.
    pub prover_slots: Arc<Semaphore>,
    zk: Arc<OnceCell<ZkContext>>,
    jobs: Arc<Mutex<HashMap<Uuid, LiveJob>>>,
}

#[derive(Clone)]
pub struct ZkContext {
    pub artifacts: CircuitArtifacts,
    pub circuit: Arc<LoadedCircuit>,
    pub verifier: Arc<Groth16ViewVerifier>,
    pub vk_bytes: Arc<Vec<u8>>,
}

/// In-flight job handle. Dropped once the job's final state is persisted.
#[derive(Clone)]
pub struct LiveJob {
    pub cancel: CancelToken,
    pub progress: watch::Receiver<ProgressEvent>,
}

impl AppState {
    pub fn new(db: Db, config: Config) -> Self {
        Self {
            db,
            config: Arc::new(config),
            engine: Arc::new(ProvingEngine::new()),
            prover_slots: Arc::new(Semaphore::new(1)),
            zk: Arc::new(OnceCell::new()),
            jobs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Ensure circuit artifacts exist on disk and are loaded and pin-checked.
    ///
    /// Runs the Groth16 setup on first use when the artifact directory is empty.
    pub async fn ensure_zk(&self) -> Result<ZkContext, ApiError> {
        let dir = self.config.artifact_dir.clone();
        let engine = self.engine.clone();

        self.zk
            .get_or_try_init(|| async move {
                tokio::task::spawn_blocking(move || {
                    if !CircuitArtifacts::exists_in(&dir) {
                        // Single-party setup. Deployments should ship artifacts from a ceremony instead.
                        let pin = setup_artifacts(&dir, &mut OsRng)?;
                        tracing::info!(
                            dir = %dir.display(),
                            constraint_system = %pin.constraint_system_sha256,
                            proving_key = %pin.proving_key_sha256,
                            "generated circuit artifacts"
                        );
                    }

                    let artifacts = CircuitArtifacts::from_dir(&dir)?;
                    let circuit = engine.load_artifacts(&artifacts)?;
                    let verifier = Groth16ViewVerifier::from_prepared(circuit.prepared_vk.clone());
                    let vk_bytes = serialize_vk(circuit.verifying_key())?;

                    Ok::<ZkContext, ApiError>(ZkContext {
                        artifacts,
                        circuit,
                        verifier: Arc::new(verifier),
                        vk_bytes: Arc::new(vk_bytes),
                    })
                })
                .await
                .map_err(|_| ApiError::Internal)?
            })
            .await
            .cloned()
    }

    pub async fn register_job(&self, job_id: Uuid, job: LiveJob) {
        self.jobs.lock().await.insert(job_id, job);
    }

    pub async fn live_job(&self, job_id: Uuid) -> Option<LiveJob> {
        self.jobs.lock().await.get(&job_id).cloned()
    }

    pub async fn forget_job(&self, job_id: Uuid) {
        self.jobs.lock().await.remove(&job_id);
    }
}
