#![deny(clippy::print_stdout, clippy::print_stderr)]

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

mod memory;

pub use memory::InMemoryApprovalsService;

pub type ApprovalId = String;
pub type CompanyId = String;
pub type UserId = String;
pub type TargetId = String;

pub type ApprovalsResult<T> = Result<T, ApprovalsError>;

/// Stable error codes for the approval gate (spec §7 "Workflow").
#[derive(Debug, Error)]
pub enum ApprovalsError {
    #[error("approval {0} was not found")]
    NotFound(ApprovalId),
    #[error("no approval rule configured for ({company_id}, {target_type})")]
    RuleNotFound {
        company_id: CompanyId,
        target_type: String,
    },
    #[error("approval required for ({target_type}, {target_id}) but none is approved")]
    ApprovalRequired {
        target_type: String,
        target_id: TargetId,
    },
    #[error("a pending approval already exists for ({target_type}, {target_id})")]
    PendingApprovalExists {
        target_type: String,
        target_id: TargetId,
    },
    #[error("approval {0} is not pending and cannot be decided")]
    ApprovalNotPending(ApprovalId),
    #[error("checker must differ from the requester")]
    SelfApprovalForbidden,
    #[error("validation error: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

/// Admin-configured per-`(company, target_type)` gate (spec §3 `ApprovalRule`).
/// Absence means no approval is required for that target type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRule {
    pub company_id: CompanyId,
    pub target_type: String,
    pub approval_required: bool,
    pub threshold_amount: Option<Decimal>,
    pub auto_approve_below_threshold: bool,
}

impl ApprovalRule {
    /// Whether an amount against this rule needs a satisfied `Approval`
    /// record before the gated action may proceed (spec §4.8).
    #[must_use]
    pub fn requires_approval(&self, amount: Decimal) -> bool {
        if !self.approval_required {
            return false;
        }
        match (self.auto_approve_below_threshold, self.threshold_amount) {
            (true, Some(threshold)) if amount < threshold => false,
            _ => true,
        }
    }
}

/// A single workflow record gating an action, typically voucher posting
/// (spec §3 `Approval`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Approval {
    pub id: ApprovalId,
    pub company_id: CompanyId,
    pub target_type: String,
    pub target_id: TargetId,
    pub status: ApprovalStatus,
    pub requested_by: UserId,
    pub requested_at: DateTime<Utc>,
    pub approved_by: Option<UserId>,
    pub decided_at: Option<DateTime<Utc>>,
    pub remarks: Option<String>,
}

impl Approval {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, ApprovalStatus::Approved | ApprovalStatus::Rejected)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitApprovalRequest {
    pub company_id: CompanyId,
    pub target_type: String,
    pub target_id: TargetId,
    pub requested_by: UserId,
    pub remarks: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ApprovalFilter {
    pub company_id: Option<CompanyId>,
    pub target_type: Option<String>,
    pub status: Option<ApprovalStatus>,
}

impl ApprovalFilter {
    fn matches(&self, approval: &Approval) -> bool {
        if let Some(company_id) = &self.company_id
            && approval.company_id != *company_id
        {
            return false;
        }
        if let Some(target_type) = &self.target_type
            && approval.target_type != *target_type
        {
            return false;
        }
        if let Some(status) = self.status
            && approval.status != status
        {
            return false;
        }
        true
    }
}

#[async_trait]
pub trait ApprovalsService: Send + Sync {
    async fn set_rule(&self, rule: ApprovalRule) -> ApprovalsResult<ApprovalRule>;
    async fn get_rule(
        &self,
        company_id: &CompanyId,
        target_type: &str,
    ) -> ApprovalsResult<Option<ApprovalRule>>;

    /// Creates a `PENDING` approval. Rejects a second concurrent pending
    /// request for the same `(company, target_type, target_id)` (spec §3
    /// invariant, §4.8).
    async fn submit(&self, request: SubmitApprovalRequest) -> ApprovalsResult<Approval>;

    async fn get(&self, approval_id: &ApprovalId) -> ApprovalsResult<Approval>;
    async fn list(&self, filter: ApprovalFilter) -> ApprovalsResult<Vec<Approval>>;

    /// `PENDING → APPROVED`. Forbids `checker == requested_by` (spec §4.8).
    async fn approve(
        &self,
        approval_id: &ApprovalId,
        checker: &UserId,
        remarks: Option<String>,
    ) -> ApprovalsResult<Approval>;

    /// `PENDING → REJECTED`. Forbids `checker == requested_by` (spec §4.8).
    async fn reject(
        &self,
        approval_id: &ApprovalId,
        checker: &UserId,
        remarks: Option<String>,
    ) -> ApprovalsResult<Approval>;

    /// Evaluates the approval gate for `(target_type, target_id)` against
    /// `amount` without mutating state. Returns `Ok(())` when posting may
    /// proceed, `Err(ApprovalRequired)` otherwise (spec §4.8, §4.5 step 8).
    async fn ensure_satisfied(
        &self,
        company_id: &CompanyId,
        target_type: &str,
        target_id: &TargetId,
        amount: Decimal,
    ) -> ApprovalsResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(required: bool, threshold: Option<Decimal>, auto: bool) -> ApprovalRule {
        ApprovalRule {
            company_id: "co-1".into(),
            target_type: "voucher".into(),
            approval_required: required,
            threshold_amount: threshold,
            auto_approve_below_threshold: auto,
        }
    }

    #[test]
    fn rule_not_required_skips_gate() {
        assert!(!rule(false, None, false).requires_approval(Decimal::from(1_000)));
    }

    #[test]
    fn amount_above_threshold_still_requires_approval() {
        let r = rule(true, Some(Decimal::from(500)), true);
        assert!(r.requires_approval(Decimal::from(1_000)));
    }

    #[test]
    fn amount_below_threshold_auto_approves() {
        let r = rule(true, Some(Decimal::from(500)), true);
        assert!(!r.requires_approval(Decimal::from(100)));
    }

    #[test]
    fn without_auto_approve_threshold_is_ignored() {
        let r = rule(true, Some(Decimal::from(500)), false);
        assert!(r.requires_approval(Decimal::from(100)));
    }
}
