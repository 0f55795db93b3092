use std::collections::HashMap;

use rust_decimal::Decimal;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::Approval;
use crate::ApprovalFilter;
use crate::ApprovalId;
use crate::ApprovalRule;
use crate::ApprovalStatus;
use crate::ApprovalsError;
use crate::ApprovalsResult;
use crate::ApprovalsService;
use crate::CompanyId;
use crate::SubmitApprovalRequest;
use crate::UserId;

type RuleKey = (CompanyId, String);

#[derive(Default)]
struct ApprovalsState {
    rules: HashMap<RuleKey, ApprovalRule>,
    approvals: HashMap<ApprovalId, Approval>,
}

#[derive(Default)]
pub struct InMemoryApprovalsService {
    state: RwLock<ApprovalsState>,
}

impl InMemoryApprovalsService {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ApprovalsService for InMemoryApprovalsService {
    async fn set_rule(&self, rule: ApprovalRule) -> ApprovalsResult<ApprovalRule> {
        let mut guard = self.state.write().await;
        let key = (rule.company_id.clone(), rule.target_type.clone());
        guard.rules.insert(key, rule.clone());
        Ok(rule)
    }

    async fn get_rule(
        &self,
        company_id: &CompanyId,
        target_type: &str,
    ) -> ApprovalsResult<Option<ApprovalRule>> {
        let guard = self.state.read().await;
        Ok(guard
            .rules
            .get(&(company_id.clone(), target_type.to_string()))
            .cloned())
    }

    async fn submit(&self, request: SubmitApprovalRequest) -> ApprovalsResult<Approval> {
        let mut guard = self.state.write().await;
        let already_pending = guard.approvals.values().any(|approval| {
            approval.company_id == request.company_id
                && approval.target_type == request.target_type
                && approval.target_id == request.target_id
                && approval.status == ApprovalStatus::Pending
        });
        if already_pending {
            return Err(ApprovalsError::PendingApprovalExists {
                target_type: request.target_type,
                target_id: request.target_id,
            });
        }

        let approval = Approval {
            id: Uuid::new_v4().to_string(),
            company_id: request.company_id,
            target_type: request.target_type,
            target_id: request.target_id,
            status: ApprovalStatus::Pending,
            requested_by: request.requested_by,
            requested_at: chrono::Utc::now(),
            approved_by: None,
            decided_at: None,
            remarks: request.remarks,
        };
        guard.approvals.insert(approval.id.clone(), approval.clone());
        Ok(approval)
    }

    async fn get(&self, approval_id: &ApprovalId) -> ApprovalsResult<Approval> {
        let guard = self.state.read().await;
        guard
            .approvals
            .get(approval_id)
            .cloned()
            .ok_or_else(|| ApprovalsError::NotFound(approval_id.clone()))
    }

    async fn list(&self, filter: ApprovalFilter) -> ApprovalsResult<Vec<Approval>> {
        let guard = self.state.read().await;
        Ok(guard
            .approvals
            .values()
            .filter(|approval| filter.matches(approval))
            .cloned()
            .collect())
    }

    async fn approve(
        &self,
        approval_id: &ApprovalId,
        checker: &UserId,
        remarks: Option<String>,
    ) -> ApprovalsResult<Approval> {
        let mut guard = self.state.write().await;
        let approval = guard
            .approvals
            .get_mut(approval_id)
            .ok_or_else(|| ApprovalsError::NotFound(approval_id.clone()))?;
        if approval.status != ApprovalStatus::Pending {
            return Err(ApprovalsError::ApprovalNotPending(approval_id.clone()));
        }
        if &approval.requested_by == checker {
            return Err(ApprovalsError::SelfApprovalForbidden);
        }
        approval.status = ApprovalStatus::Approved;
        approval.approved_by = Some(checker.clone());
        approval.decided_at = Some(chrono::Utc::now());
        if remarks.is_some() {
            approval.remarks = remarks;
        }
        Ok(approval.clone())
    }

    async fn reject(
        &self,
        approval_id: &ApprovalId,
        checker: &UserId,
        remarks: Option<String>,
    ) -> ApprovalsResult<Approval> {
        let mut guard = self.state.write().await;
        let approval = guard
            .approvals
            .get_mut(approval_id)
            .ok_or_else(|| ApprovalsError::NotFound(approval_id.clone()))?;
        if approval.status != ApprovalStatus::Pending {
            return Err(ApprovalsError::ApprovalNotPending(approval_id.clone()));
        }
        if &approval.requested_by == checker {
            return Err(ApprovalsError::SelfApprovalForbidden);
        }
        approval.status = ApprovalStatus::Rejected;
        approval.approved_by = Some(checker.clone());
        approval.decided_at = Some(chrono::Utc::now());
        if remarks.is_some() {
            approval.remarks = remarks;
        }
        Ok(approval.clone())
    }

    async fn ensure_satisfied(
        &self,
        company_id: &CompanyId,
        target_type: &str,
        target_id: &crate::TargetId,
        amount: Decimal,
    ) -> ApprovalsResult<()> {
        let guard = self.state.read().await;
        let Some(rule) = guard
            .rules
            .get(&(company_id.clone(), target_type.to_string()))
        else {
            return Ok(());
        };
        if !rule.requires_approval(amount) {
            return Ok(());
        }
        let approved = guard.approvals.values().any(|approval| {
            approval.company_id == *company_id
                && approval.target_type == target_type
                && approval.target_id == *target_id
                && approval.status == ApprovalStatus::Approved
        });
        if approved {
            Ok(())
        } else {
            Err(ApprovalsError::ApprovalRequired {
                target_type: target_type.to_string(),
                target_id: target_id.clone(),
            })
        }
    }
}
