use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zkflex_proofs::{
    Address, ArtifactPin, InstanceId, ProofArtifact, ProverState, PublicSignals, VerificationOutcome,
};

#[derive(Debug, Serialize)]
pub struct ChallengeResponse {
    pub message: String,
    /// EIP-191 prehash the wallet signs, hex encoded.
    pub message_hash_hex: String,
}

#[derive(Debug, Deserialize)]
pub struct InstanceCreateRequest {
    pub addresses: Vec<Address>,
}

#[derive(Debug, Serialize)]
pub struct InstanceCreateResponse {
    pub instance_id: InstanceId,
}

/// Balances are decimal or `0x`-prefixed wei strings, one per pool slot.
#[derive(Debug, Deserialize)]
pub struct SnapshotPublishRequest {
    pub block_number: u64,
    pub balances: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct SnapshotView {
    pub block_number: u64,
    pub balances: Vec<String>,
    pub published_at: String,
    pub pool_commitment_hex: String,
}

#[derive(Debug, Serialize)]
pub struct InstanceGetResponse {
    pub instance_id: InstanceId,
    pub created_at: String,
    pub addresses: Vec<Address>,
    pub latest_snapshot: Option<SnapshotView>,
}

#[derive(Debug, Deserialize)]
pub struct ProofCreateRequest {
    pub instance_id: InstanceId,
    pub claimed_index: usize,
    pub threshold_wei: String,
    /// 65-byte `r || s || v`, hex with or without `0x`.
    pub signature: String,
    pub signer_address: Address,
}

#[derive(Debug, Serialize)]
pub struct ProofCreateResponse {
    pub job_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct ProofJobResponse {
    pub job_id: Uuid,
    pub instance_id: String,
    pub created_at: String,
    pub updated_at: String,
    pub state: ProverState,
    pub progress: u8,
    pub error: Option<String>,
    pub public_signals: Option<PublicSignals>,
    pub artifact: Option<ProofArtifact>,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub job_id: Uuid,
    pub cancelling: bool,
}

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub instance_id: InstanceId,
    pub artifact: ProofArtifact,
    pub required_threshold_wei: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    #[serde(flatten)]
    pub outcome: VerificationOutcome,
    pub public_signals: Option<PublicSignals>,
}

#[derive(Debug, Serialize)]
pub struct ZkVkResponse {
    pub curve: &'static str,
    pub proof_system: &'static str,
    pub circuit_id: &'static str,
    pub circuit_version: u32,
    pub pin: ArtifactPin,
    pub vk_b64: String,
}
