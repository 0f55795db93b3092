#![deny(clippy::print_stdout, clippy::print_stderr)]

use std::sync::Arc;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

pub type CompanyId = String;
pub type AuditLogResult<T> = Result<T, AuditLogError>;

#[derive(Debug, Error)]
pub enum AuditLogError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("storage failure: {0}")]
    Storage(String),
    #[error("corrupted chain: {0}")]
    Corrupted(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionType {
    Created,
    Updated,
    Posted,
    Reversed,
    Approved,
    Rejected,
    PostCommitFailure,
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ActionType::Created => "CREATED",
            ActionType::Updated => "UPDATED",
            ActionType::Posted => "POSTED",
            ActionType::Reversed => "REVERSED",
            ActionType::Approved => "APPROVED",
            ActionType::Rejected => "REJECTED",
            ActionType::PostCommitFailure => "POST_COMMIT_FAILURE",
        };
        f.write_str(label)
    }
}

/// An append request for a single `AuditLog` row (spec §3 `AuditLog`). Never
/// part of a caller-visible transaction failure — the recording service
/// logs and swallows storage errors from this path after the primary write
/// has already committed (spec §4.5 step 15).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendRequest {
    pub company_id: CompanyId,
    pub actor: String,
    pub action_type: ActionType,
    pub object_type: String,
    pub object_id: String,
    #[serde(default)]
    pub changes: serde_json::Value,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: String,
    pub company_id: CompanyId,
    pub actor: String,
    pub action_type: ActionType,
    pub object_type: String,
    pub object_id: String,
    pub changes: serde_json::Value,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub occurred_at: DateTime<Utc>,
    pub previous_hash: String,
    pub hash: String,
}

#[derive(Debug, Clone, Default)]
pub struct AuditLogFilter {
    pub company_id: Option<CompanyId>,
    pub object_type: Option<String>,
    pub object_id: Option<String>,
    pub limit: Option<usize>,
}

#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn append(&self, request: AppendRequest) -> AuditLogResult<AuditRecord>;

    async fn records(&self, filter: AuditLogFilter) -> AuditLogResult<Vec<AuditRecord>>;
}

#[derive(Default)]
pub struct InMemoryAuditLog {
    records: RwLock<Vec<AuditRecord>>,
}

impl InMemoryAuditLog {
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn compute_hash(
        previous: &str,
        company_id: &str,
        object_type: &str,
        object_id: &str,
        action_type: ActionType,
        occurred_at: DateTime<Utc>,
        changes: &serde_json::Value,
    ) -> String {
        let mut hasher = Sha256::new();
        hasher.update(previous.as_bytes());
        hasher.update(company_id.as_bytes());
        hasher.update(object_type.as_bytes());
        hasher.update(object_id.as_bytes());
        hasher.update(action_type.to_string().as_bytes());
        let nanos = occurred_at
            .timestamp_nanos_opt()
            .unwrap_or_else(|| occurred_at.timestamp_micros() * 1_000);
        hasher.update(nanos.to_be_bytes());
        hasher.update(changes.to_string().as_bytes());
        format!("{:x}", hasher.finalize())
    }

    fn validate_request(request: &AppendRequest) -> AuditLogResult<()> {
        if request.company_id.trim().is_empty() {
            return Err(AuditLogError::Validation("company_id must be provided".into()));
        }
        if request.object_type.trim().is_empty() {
            return Err(AuditLogError::Validation("object_type must be provided".into()));
        }
        if request.object_id.trim().is_empty() {
            return Err(AuditLogError::Validation("object_id must be provided".into()));
        }
        if request.actor.trim().is_empty() {
            return Err(AuditLogError::Validation("actor must be provided".into()));
        }
        Ok(())
    }

    async fn verify_chain(records: &[AuditRecord]) -> AuditLogResult<()> {
        let mut previous = String::from("genesis");
        for record in records {
            if record.previous_hash != previous {
                return Err(AuditLogError::Corrupted(format!(
                    "unexpected previous hash for {}",
                    record.id
                )));
            }
            let expected = Self::compute_hash(
                &record.previous_hash,
                &record.company_id,
                &record.object_type,
                &record.object_id,
                record.action_type,
                record.occurred_at,
                &record.changes,
            );
            if expected != record.hash {
                return Err(AuditLogError::Corrupted(format!(
                    "hash mismatch for {}",
                    record.id
                )));
            }
            previous = record.hash.clone();
        }
        Ok(())
    }
}

#[async_trait]
impl AuditLog for InMemoryAuditLog {
    async fn append(&self, request: AppendRequest) -> AuditLogResult<AuditRecord> {
        Self::validate_request(&request)?;

        let mut guard = self.records.write().await;
        let previous_hash = guard
            .last()
            .map(|record| record.hash.clone())
            .unwrap_or_else(|| "genesis".into());

        let occurred_at = Utc::now();
        let hash = Self::compute_hash(
            &previous_hash,
            &request.company_id,
            &request.object_type,
            &request.object_id,
            request.action_type,
            occurred_at,
            &request.changes,
        );

        let record = AuditRecord {
            id: Uuid::new_v4().to_string(),
            company_id: request.company_id,
            actor: request.actor,
            action_type: request.action_type,
            object_type: request.object_type,
            object_id: request.object_id,
            changes: request.changes,
            ip: request.ip,
            user_agent: request.user_agent,
            occurred_at,
            previous_hash,
            hash,
        };

        guard.push(record.clone());
        Ok(record)
    }

    async fn records(&self, filter: AuditLogFilter) -> AuditLogResult<Vec<AuditRecord>> {
        let guard = self.records.read().await;
        Self::verify_chain(&guard).await?;
        let mut filtered = guard.clone();

        if let Some(company_id) = filter.company_id {
            filtered.retain(|record| record.company_id == company_id);
        }
        if let Some(object_type) = filter.object_type {
            filtered.retain(|record| record.object_type == object_type);
        }
        if let Some(object_id) = filter.object_id {
            filtered.retain(|record| record.object_id == object_id);
        }

        if let Some(limit) = filter.limit
            && filtered.len() > limit
        {
            filtered.truncate(limit);
        }

        Ok(filtered)
    }
}
