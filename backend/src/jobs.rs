use crate::db::{self, Db, StoredInstance};
use crate::errors::ApiError;
use crate::state::{AppState, LiveJob};
use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;
use zkflex_proofs::{
    CancelToken, ProgressEvent, ProofPipeline, ProofRequest, ProverState, ProvingOutcome,
};

/// Register a proof job and start it in the background.
///
/// The request was validated against the snapshot current at submission. The
/// job re-reads the instance once it holds a proving slot and validates again,
/// so it always proves against the latest published snapshot.
pub async fn spawn_proof_job(state: AppState, job_id: Uuid, request: ProofRequest) {
    let cancel = CancelToken::new();
    let (tx, rx) = watch::channel(ProgressEvent {
        state: ProverState::Idle,
        percent: 0,
    });

    state
        .register_job(
            job_id,
            LiveJob {
                cancel: cancel.clone(),
                progress: rx,
            },
        )
        .await;

    tokio::spawn(async move {
        let res = run_proof_job(state.clone(), job_id, request, cancel, tx).await;
        if let Err(e) = res {
            warn!(%job_id, error = %e, "proof job failed");
            let _ = db::finish_job(&state.db, job_id, ProverState::Failed, 0, Some(e.to_string().as_str()), None).await;
        }
        state.forget_job(job_id).await;
    });
}

async fn run_proof_job(
    state: AppState,
    job_id: Uuid,
    request: ProofRequest,
    cancel: CancelToken,
    tx: watch::Sender<ProgressEvent>,
) -> Result<(), ApiError> {
    let _permit = state.prover_slots.clone().acquire_owned().await.map_err(|_| ApiError::Internal)?;

    if cancel.is_cancelled() {
        info!(%job_id, "proof job cancelled while queued");
        db::finish_job(&state.db, job_id, ProverState::Cancelled, 0, None, None).await?;
        return Ok(());
    }

    let zk = state.ensure_zk().await?;
    let engine = state.engine.clone();
    let instance = latest_instance(&state.db, &request).await?;

    info!(
        %job_id,
        instance = %request.instance_id,
        block = instance.latest.as_ref().map(|s| s.block_number()),
        "starting proof job"
    );

    let outcome = tokio::task::spawn_blocking(move || {
        let sink = move |event: ProgressEvent| {
            let _ = tx.send(event);
        };
        ProofPipeline::new(&engine, &zk.artifacts).run(&request, &instance, &cancel, &sink)
    })
    .await
    .map_err(|_| ApiError::Internal)?;

    match outcome {
        Ok(ProvingOutcome::Completed(artifact)) => {
            let artifact_json = String::from_utf8(artifact.to_bytes()).map_err(|_| ApiError::Internal)?;
            db::finish_job(&state.db, job_id, ProverState::Done, 100, None, Some(artifact_json.as_str())).await?;
            info!(%job_id, "proof job done");
        }
        Ok(ProvingOutcome::Cancelled) => {
            let progress = last_percent(&state, job_id).await;
            db::finish_job(&state.db, job_id, ProverState::Cancelled, progress, None, None).await?;
            info!(%job_id, progress, "proof job cancelled");
        }
        Err(e) => {
            let message = e.to_string();
            let progress = last_percent(&state, job_id).await;
            warn!(%job_id, kind = ?e.kind(), error = %message, "proof pipeline error");
            db::finish_job(&state.db, job_id, ProverState::Failed, progress, Some(message.as_str()), None).await?;
        }
    }

    Ok(())
}

/// The instance as it stands now, not as it was when the job was queued.
async fn latest_instance(db: &Db, request: &ProofRequest) -> Result<StoredInstance, ApiError> {
    db::get_instance(db, request.instance_id).await
}

async fn last_percent(state: &AppState, job_id: Uuid) -> u8 {
    match state.live_job(job_id).await {
        Some(job) => {
            let event = *job.progress.borrow();
            event.percent
        }
        None => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zkflex_proofs::{Address, CommitmentSource, InstanceId, Snapshot, WalletPool, Wei};

    #[tokio::test]
    async fn test_queued_job_sees_snapshot_published_after_submission() {
        let db = db::memory_db().await;
        let id = InstanceId(Address([0xAB; 20]));
        let pool = WalletPool::new((1..=32u8).map(|i| Address([i; 20])).collect()).unwrap();
        db::insert_instance(&db, id, &pool).await.unwrap();

        let balances = || (0..32u128).map(Wei::from).collect::<Vec<_>>();
        db::insert_snapshot(&db, id, &Snapshot::new(1000, balances()).unwrap()).await.unwrap();

        let request = ProofRequest {
            instance_id: id,
            claimed_index: 0,
            threshold_wei: Wei::from(0u64),
            signature: vec![0u8; 65],
            signer_address: Address([1; 20]),
        };
        let at_submission = db::get_instance(&db, id).await.unwrap();

        db::insert_snapshot(&db, id, &Snapshot::new(1001, balances()).unwrap()).await.unwrap();

        let at_start = latest_instance(&db, &request).await.unwrap();
        assert_eq!(at_submission.snapshot_of(&id).unwrap().block_number(), 1000);
        assert_eq!(at_start.snapshot_of(&id).unwrap().block_number(), 1001);
    }
}
