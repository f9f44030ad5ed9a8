use crate::db;
use crate::errors::ApiError;
use crate::jobs;
use crate::models::*;
use crate::state::AppState;
use axum::{
    extract::{Path, Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::Engine;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;
use zkflex_proofs::commitment::{check_balances, derive_instance_id};
use zkflex_proofs::constants::{CHALLENGE_MESSAGE, CIRCUIT_ID, CIRCUIT_VERSION};
use zkflex_proofs::packager::{CURVE, PROTOCOL};
use zkflex_proofs::signature::challenge_hash;
use zkflex_proofs::types::FrHex;
use zkflex_proofs::{
    pool_commitment, unpackage, witness, InstanceId, ProofRequest, Snapshot, VerifierClient, WalletPool, Wei,
};

pub fn router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/api/v1/instances", post(create_instance))
        .route("/api/v1/instances/:id/snapshots", post(publish_snapshot))
        .route("/api/v1/proofs", post(create_proof))
        .route("/api/v1/proofs/:id/cancel", post(cancel_proof))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/v1/challenge", get(get_challenge))
        .route("/api/v1/instances/:id", get(get_instance))
        .route("/api/v1/proofs/:id", get(get_proof))
        .route("/api/v1/proofs/:id/artifact", get(get_proof_artifact))
        .route("/api/v1/verify", post(verify))
        .route("/api/v1/zk/vk", get(get_vk))
        .merge(protected_routes)
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

async fn auth_middleware(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    if let Some(provided_key) = headers.get("X-API-KEY") {
        if provided_key == state.config.api_key.as_str() {
            return Ok(next.run(request).await);
        }
    }

    tracing::warn!("unauthorized access attempt");
    Err(StatusCode::UNAUTHORIZED)
}

fn parse_instance_id(raw: &str) -> Result<InstanceId, ApiError> {
    raw.parse().map_err(|_| ApiError::BadRequest(format!("invalid instance id: {raw}")))
}

fn parse_job_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::BadRequest(format!("invalid job id: {raw}")))
}

fn parse_wei(field: &str, raw: &str) -> Result<Wei, ApiError> {
    raw.parse::<Wei>()
        .map_err(|_| ApiError::BadRequest(format!("{field} must be a decimal or 0x-prefixed wei amount")))
}

async fn get_challenge() -> Json<ChallengeResponse> {
    Json(ChallengeResponse {
        message: CHALLENGE_MESSAGE.to_string(),
        message_hash_hex: format!("0x{}", hex::encode(challenge_hash())),
    })
}

async fn create_instance(
    State(state): State<AppState>,
    Json(req): Json<InstanceCreateRequest>,
) -> Result<(StatusCode, Json<InstanceCreateResponse>), ApiError> {
    let pool = WalletPool::new(req.addresses)?;
    let instance_id = derive_instance_id(rand::random::<u64>(), &pool);

    db::insert_instance(&state.db, instance_id, &pool).await?;
    tracing::info!(instance = %instance_id, "instance created");

    Ok((StatusCode::CREATED, Json(InstanceCreateResponse { instance_id })))
}

async fn get_instance(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<InstanceGetResponse>, ApiError> {
    let instance_id = parse_instance_id(&id)?;
    let stored = db::get_instance(&state.db, instance_id).await?;

    let latest_snapshot = match (&stored.latest, &stored.latest_published_at) {
        (Some(snapshot), Some(published_at)) => {
            let commitment = pool_commitment(&stored.pool, snapshot)?;
            Some(SnapshotView {
                block_number: snapshot.block_number(),
                balances: snapshot.balances().iter().map(|b| b.to_string()).collect(),
                published_at: published_at.clone(),
                pool_commitment_hex: FrHex::from_fr(&commitment).hex,
            })
        }
        _ => None,
    };

    Ok(Json(InstanceGetResponse {
        instance_id,
        created_at: stored.created_at,
        addresses: stored.pool.addresses().to_vec(),
        latest_snapshot,
    }))
}

async fn publish_snapshot(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<SnapshotPublishRequest>,
) -> Result<StatusCode, ApiError> {
    let instance_id = parse_instance_id(&id)?;
    let balances = req
        .balances
        .iter()
        .map(|b| parse_wei("balances", b))
        .collect::<Result<Vec<_>, _>>()?;
    let snapshot = Snapshot::new(req.block_number, balances)?;

    check_balances(&snapshot)?;

    db::insert_snapshot(&state.db, instance_id, &snapshot).await?;
    tracing::info!(instance = %instance_id, block = req.block_number, "snapshot published");

    Ok(StatusCode::CREATED)
}

async fn create_proof(
    State(state): State<AppState>,
    Json(req): Json<ProofCreateRequest>,
) -> Result<(StatusCode, Json<ProofCreateResponse>), ApiError> {
    let signature_hex = req.signature.strip_prefix("0x").unwrap_or(&req.signature);
    let signature =
        hex::decode(signature_hex).map_err(|_| ApiError::BadRequest("signature must be hex".to_string()))?;

    let request = ProofRequest {
        instance_id: req.instance_id,
        claimed_index: req.claimed_index,
        threshold_wei: parse_wei("threshold_wei", &req.threshold_wei)?,
        signature,
        signer_address: req.signer_address,
    };

    let instance = db::get_instance(&state.db, request.instance_id).await?;
    let snapshot = instance
        .latest
        .as_ref()
        .ok_or(zkflex_proofs::CommitmentError::SnapshotNotFound(request.instance_id))?;
    witness::validate(&request, &instance.pool, snapshot)?;

    let job_id = Uuid::new_v4();
    db::insert_job(&state.db, job_id, request.instance_id).await?;
    jobs::spawn_proof_job(state.clone(), job_id, request).await;

    Ok((StatusCode::ACCEPTED, Json(ProofCreateResponse { job_id })))
}

async fn get_proof(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ProofJobResponse>, ApiError> {
    let job_id = parse_job_id(&id)?;
    let job = db::get_job(&state.db, job_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("proof job {job_id}")))?;

    // Running jobs report live progress; the row only holds the final state.
    let (state_now, progress) = match state.live_job(job_id).await {
        Some(live) if !job.state.is_terminal() => {
            let event = *live.progress.borrow();
            (event.state, event.percent)
        }
        _ => (job.state, job.progress),
    };

    let artifact = match &job.artifact_json {
        Some(json) => Some(unpackage(json.as_bytes()).map_err(|_| ApiError::Internal)?),
        None => None,
    };
    let public_signals = match &artifact {
        Some(a) => Some(a.signals().map_err(|_| ApiError::Internal)?),
        None => None,
    };

    Ok(Json(ProofJobResponse {
        job_id,
        instance_id: job.instance_id,
        created_at: job.created_at,
        updated_at: job.updated_at,
        state: state_now,
        progress,
        error: job.error,
        public_signals,
        artifact,
    }))
}

async fn get_proof_artifact(State(state): State<AppState>, Path(id): Path<String>) -> Result<Response, ApiError> {
    let job_id = parse_job_id(&id)?;
    let job = db::get_job(&state.db, job_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("proof job {job_id}")))?;

    let Some(artifact_json) = job.artifact_json else {
        return Err(ApiError::Conflict(format!("proof job {job_id} has no artifact (state {:?})", job.state)));
    };

    Ok((
        [
            (header::CONTENT_TYPE, "application/json".to_string()),
            (header::CONTENT_DISPOSITION, format!("attachment; filename=\"proof-{job_id}.json\"")),
        ],
        artifact_json,
    )
        .into_response())
}

async fn cancel_proof(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<CancelResponse>), ApiError> {
    let job_id = parse_job_id(&id)?;

    if let Some(live) = state.live_job(job_id).await {
        live.cancel.cancel();
        tracing::info!(%job_id, "cancellation requested");
        return Ok((StatusCode::ACCEPTED, Json(CancelResponse { job_id, cancelling: true })));
    }

    match db::get_job(&state.db, job_id).await? {
        Some(job) => Err(ApiError::Conflict(format!(
            "proof job {job_id} already finished (state {:?})",
            job.state
        ))),
        None => Err(ApiError::NotFound(format!("proof job {job_id}"))),
    }
}

async fn verify(State(state): State<AppState>, Json(req): Json<VerifyRequest>) -> Result<Json<VerifyResponse>, ApiError> {
    let required = req
        .required_threshold_wei
        .as_deref()
        .map(|r| parse_wei("required_threshold_wei", r))
        .transpose()?;

    let instance = db::get_instance(&state.db, req.instance_id).await?;
    let zk = state.ensure_zk().await?;

    let outcome = VerifierClient::new(&instance, zk.verifier.as_ref()).verify_claim(
        &req.artifact,
        &req.instance_id,
        required,
    )?;
    let public_signals = req.artifact.signals().ok();

    Ok(Json(VerifyResponse { outcome, public_signals }))
}

async fn get_vk(State(state): State<AppState>) -> Result<Json<ZkVkResponse>, ApiError> {
    let zk = state.ensure_zk().await?;

    Ok(Json(ZkVkResponse {
        curve: CURVE,
        proof_system: PROTOCOL,
        circuit_id: CIRCUIT_ID,
        circuit_version: CIRCUIT_VERSION,
        pin: zk.circuit.pin.clone(),
        vk_b64: base64::engine::general_purpose::STANDARD.encode(zk.vk_bytes.as_slice()),
    }))
}
