use crate::errors::ApiError;
use chrono::Utc;
use sqlx::{sqlite::SqlitePoolOptions, Pool, Row, Sqlite};
use uuid::Uuid;
use zkflex_proofs::{
    Address, CommitmentError, CommitmentSource, InstanceId, ProverState, Snapshot, WalletPool, Wei,
};

pub type Db = Pool<Sqlite>;

pub async fn connect(db_url: &str) -> Result<Db, ApiError> {
    SqlitePoolOptions::new()
        .max_connections(5)
        .connect(db_url)
        .await
        .map_err(|_| ApiError::Internal)
}

pub async fn init_schema(db: &Db) -> Result<(), ApiError> {
    // Balances are stored as decimal strings; sqlite integers stop at 2^63.
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS instances (
  id TEXT PRIMARY KEY,
  created_at TEXT NOT NULL,
  addresses_json TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS snapshots (
  instance_id TEXT NOT NULL,
  block_number INTEGER NOT NULL,
  balances_json TEXT NOT NULL,
  published_at TEXT NOT NULL,
  PRIMARY KEY(instance_id, block_number)
);

CREATE TABLE IF NOT EXISTS proof_jobs (
  id TEXT PRIMARY KEY,
  instance_id TEXT NOT NULL,
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL,
  state TEXT NOT NULL,
  progress INTEGER NOT NULL,
  error TEXT,
  artifact_json TEXT
);
"#,
    )
    .execute(db)
    .await
    .map_err(|_| ApiError::Internal)?;

    Ok(())
}

/// One instance as stored, with its latest snapshot if any has been published.
#[derive(Clone, Debug)]
pub struct StoredInstance {
    pub id: InstanceId,
    pub created_at: String,
    pub pool: WalletPool,
    pub latest: Option<Snapshot>,
    pub latest_published_at: Option<String>,
}

impl CommitmentSource for StoredInstance {
    fn pool_of(&self, id: &InstanceId) -> Result<WalletPool, CommitmentError> {
        if *id != self.id {
            return Err(CommitmentError::InstanceNotFound(*id));
        }
        Ok(self.pool.clone())
    }

    fn snapshot_of(&self, id: &InstanceId) -> Result<Snapshot, CommitmentError> {
        if *id != self.id {
            return Err(CommitmentError::InstanceNotFound(*id));
        }
        self.latest.clone().ok_or(CommitmentError::SnapshotNotFound(*id))
    }
}

pub async fn insert_instance(db: &Db, id: InstanceId, pool: &WalletPool) -> Result<(), ApiError> {
    let addresses_json = serde_json::to_string(pool.addresses()).map_err(|_| ApiError::Internal)?;

    sqlx::query(r#"INSERT INTO instances (id, created_at, addresses_json) VALUES (?, ?, ?)"#)
        .bind(id.to_string())
        .bind(Utc::now().to_rfc3339())
        .bind(addresses_json)
        .execute(db)
        .await
        .map_err(|_| ApiError::Internal)?;

    Ok(())
}

pub async fn get_instance(db: &Db, id: InstanceId) -> Result<StoredInstance, ApiError> {
    let row = sqlx::query(r#"SELECT created_at, addresses_json FROM instances WHERE id = ?"#)
        .bind(id.to_string())
        .fetch_optional(db)
        .await
        .map_err(|_| ApiError::Internal)?
        .ok_or(CommitmentError::InstanceNotFound(id))?;

    let created_at: String = row.get(0);
    let addresses_json: String = row.get(1);
    let addresses: Vec<Address> = serde_json::from_str(&addresses_json).map_err(|_| ApiError::Internal)?;
    let pool = WalletPool::new(addresses).map_err(|_| ApiError::Internal)?;

    let latest = sqlx::query(
        r#"SELECT block_number, balances_json, published_at FROM snapshots
           WHERE instance_id = ? ORDER BY block_number DESC LIMIT 1"#,
    )
    .bind(id.to_string())
    .fetch_optional(db)
    .await
    .map_err(|_| ApiError::Internal)?;

    let (latest, latest_published_at) = match latest {
        Some(row) => {
            let block_number: i64 = row.get(0);
            let balances_json: String = row.get(1);
            let published_at: String = row.get(2);
            let snapshot = decode_snapshot(block_number, &balances_json).ok_or(ApiError::Internal)?;
            (Some(snapshot), Some(published_at))
        }
        None => (None, None),
    };

    Ok(StoredInstance {
        id,
        created_at,
        pool,
        latest,
        latest_published_at,
    })
}

fn decode_snapshot(block_number: i64, balances_json: &str) -> Option<Snapshot> {
    let raw: Vec<String> = serde_json::from_str(balances_json).ok()?;
    let balances = raw.iter().map(|b| b.parse::<Wei>().ok()).collect::<Option<Vec<_>>>()?;
    Snapshot::new(u64::try_from(block_number).ok()?, balances).ok()
}

/// Append a snapshot; block numbers must strictly increase per instance.
pub async fn insert_snapshot(db: &Db, id: InstanceId, snapshot: &Snapshot) -> Result<(), ApiError> {
    let block = i64::try_from(snapshot.block_number())
        .map_err(|_| ApiError::BadRequest("block_number out of range".to_string()))?;
    let balances: Vec<String> = snapshot.balances().iter().map(|b| b.to_string()).collect();
    let balances_json = serde_json::to_string(&balances).map_err(|_| ApiError::Internal)?;

    let mut tx = db.begin().await.map_err(|_| ApiError::Internal)?;

    let exists = sqlx::query(r#"SELECT 1 FROM instances WHERE id = ?"#)
        .bind(id.to_string())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|_| ApiError::Internal)?;
    if exists.is_none() {
        return Err(CommitmentError::InstanceNotFound(id).into());
    }

    let latest: Option<i64> = sqlx::query(r#"SELECT MAX(block_number) FROM snapshots WHERE instance_id = ?"#)
        .bind(id.to_string())
        .fetch_one(&mut *tx)
        .await
        .map_err(|_| ApiError::Internal)?
        .get(0);
    if let Some(latest) = latest {
        if block <= latest {
            return Err(CommitmentError::NonMonotonicSnapshot {
                block: snapshot.block_number(),
                latest: latest as u64,
            }
            .into());
        }
    }

    sqlx::query(
        r#"INSERT INTO snapshots (instance_id, block_number, balances_json, published_at)
           VALUES (?, ?, ?, ?)"#,
    )
    .bind(id.to_string())
    .bind(block)
    .bind(balances_json)
    .bind(Utc::now().to_rfc3339())
    .execute(&mut *tx)
    .await
    .map_err(|_| ApiError::Internal)?;

    tx.commit().await.map_err(|_| ApiError::Internal)?;
    Ok(())
}

fn state_str(state: ProverState) -> &'static str {
    match state {
        ProverState::Idle => "idle",
        ProverState::LoadingArtifacts => "loading_artifacts",
        ProverState::BuildingInternalAssignment => "building_internal_assignment",
        ProverState::Proving => "proving",
        ProverState::Done => "done",
        ProverState::Cancelled => "cancelled",
        ProverState::Failed => "failed",
    }
}

fn parse_state(s: &str) -> Option<ProverState> {
    Some(match s {
        "idle" => ProverState::Idle,
        "loading_artifacts" => ProverState::LoadingArtifacts,
        "building_internal_assignment" => ProverState::BuildingInternalAssignment,
        "proving" => ProverState::Proving,
        "done" => ProverState::Done,
        "cancelled" => ProverState::Cancelled,
        "failed" => ProverState::Failed,
        _ => return None,
    })
}

#[derive(Clone, Debug)]
pub struct JobRow {
    pub instance_id: String,
    pub created_at: String,
    pub updated_at: String,
    pub state: ProverState,
    pub progress: u8,
    pub error: Option<String>,
    pub artifact_json: Option<String>,
}

pub async fn insert_job(db: &Db, job_id: Uuid, instance_id: InstanceId) -> Result<(), ApiError> {
    let now = Utc::now().to_rfc3339();

    sqlx::query(
        r#"INSERT INTO proof_jobs (id, instance_id, created_at, updated_at, state, progress)
           VALUES (?, ?, ?, ?, ?, 0)"#,
    )
    .bind(job_id.to_string())
    .bind(instance_id.to_string())
    .bind(&now)
    .bind(&now)
    .bind(state_str(ProverState::Idle))
    .execute(db)
    .await
    .map_err(|_| ApiError::Internal)?;

    Ok(())
}

/// Record a job's final state. Only terminal states are persisted past `idle`;
/// live progress is served from memory.
pub async fn finish_job(
    db: &Db,
    job_id: Uuid,
    state: ProverState,
    progress: u8,
    error: Option<&str>,
    artifact_json: Option<&str>,
) -> Result<(), ApiError> {
    sqlx::query(
        r#"UPDATE proof_jobs SET state = ?, progress = ?, error = ?, artifact_json = ?, updated_at = ?
           WHERE id = ?"#,
    )
    .bind(state_str(state))
    .bind(i64::from(progress))
    .bind(error)
    .bind(artifact_json)
    .bind(Utc::now().to_rfc3339())
    .bind(job_id.to_string())
    .execute(db)
    .await
    .map_err(|_| ApiError::Internal)?;

    Ok(())
}

pub async fn get_job(db: &Db, job_id: Uuid) -> Result<Option<JobRow>, ApiError> {
    let row = sqlx::query(
        r#"SELECT instance_id, created_at, updated_at, state, progress, error, artifact_json
           FROM proof_jobs WHERE id = ?"#,
    )
    .bind(job_id.to_string())
    .fetch_optional(db)
    .await
    .map_err(|_| ApiError::Internal)?;

    let Some(row) = row else {
        return Ok(None);
    };

    let state: String = row.get(3);
    let progress: i64 = row.get(4);
    Ok(Some(JobRow {
        instance_id: row.get(0),
        created_at: row.get(1),
        updated_at: row.get(2),
        state: parse_state(&state).ok_or(ApiError::Internal)?,
        progress: u8::try_from(progress).map_err(|_| ApiError::Internal)?,
        error: row.get(5),
        artifact_json: row.get(6),
    }))
}

/// Jobs still open at startup lost their worker with the previous process.
pub async fn fail_interrupted_jobs(db: &Db) -> Result<u64, ApiError> {
    let res = sqlx::query(
        r#"UPDATE proof_jobs SET state = ?, error = ?, updated_at = ?
           WHERE state NOT IN (?, ?, ?)"#,
    )
    .bind(state_str(ProverState::Failed))
    .bind("interrupted by restart")
    .bind(Utc::now().to_rfc3339())
    .bind(state_str(ProverState::Done))
    .bind(state_str(ProverState::Cancelled))
    .bind(state_str(ProverState::Failed))
    .execute(db)
    .await
    .map_err(|_| ApiError::Internal)?;

    Ok(res.rows_affected())
}

#[cfg(test)]
pub(crate) async fn memory_db() -> Db {
    // One connection: every sqlite::memory: connection is its own database.
    let db = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    init_schema(&db).await.unwrap();
    db
}
