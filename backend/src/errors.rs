use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use serde::Serialize;
use thiserror::Error;
use zkflex_proofs::{CommitmentError, ErrorKind, PoolError, ProofError};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("internal error")]
    Internal,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, msg) = match &self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            ApiError::Conflict(m) => (StatusCode::CONFLICT, m.clone()),
            ApiError::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string()),
        };

        (status, Json(ErrorBody { error: msg })).into_response()
    }
}

impl From<CommitmentError> for ApiError {
    fn from(e: CommitmentError) -> Self {
        match e {
            CommitmentError::InstanceNotFound(_) | CommitmentError::SnapshotNotFound(_) => {
                ApiError::NotFound(e.to_string())
            }
            CommitmentError::Stale { .. } | CommitmentError::NonMonotonicSnapshot { .. } => {
                ApiError::Conflict(e.to_string())
            }
            CommitmentError::InvalidPool(_) | CommitmentError::BalanceOutOfRange { .. } => {
                ApiError::BadRequest(e.to_string())
            }
        }
    }
}

impl From<PoolError> for ApiError {
    fn from(e: PoolError) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}

impl From<ProofError> for ApiError {
    fn from(e: ProofError) -> Self {
        match (e.kind(), e) {
            (_, ProofError::Commitment(c)) => c.into(),
            (ErrorKind::Input | ErrorKind::Serialization, e) => ApiError::BadRequest(e.to_string()),
            (kind, e) => {
                tracing::error!(?kind, error = %e, "proof pipeline failure");
                ApiError::Internal
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zkflex_proofs::{Address, InstanceId};

    #[test]
    fn test_proof_error_mapping() {
        let e: ApiError = ProofError::ThresholdNotMet {
            threshold: "100".into(),
            block_number: 1000,
        }
        .into();
        assert!(matches!(e, ApiError::BadRequest(_)));

        let id = InstanceId(Address([1u8; 20]));
        let e: ApiError = ProofError::Commitment(CommitmentError::InstanceNotFound(id)).into();
        assert!(matches!(e, ApiError::NotFound(_)));

        let e: ApiError = CommitmentError::NonMonotonicSnapshot { block: 5, latest: 9 }.into();
        assert!(matches!(e, ApiError::Conflict(_)));

        let e: ApiError = CommitmentError::BalanceOutOfRange { index: 0, value: "1".into() }.into();
        assert!(matches!(e, ApiError::BadRequest(_)));

        let e: ApiError = ProofError::ArtifactVersionMismatch {
            artifact: "proving key",
            expected: "aa".into(),
            found: "bb".into(),
        }
        .into();
        assert!(matches!(e, ApiError::Internal));
    }
}
