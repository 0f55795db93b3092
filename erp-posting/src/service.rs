use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use erp_approvals::Approval;
use erp_approvals::ApprovalsService;
use erp_approvals::SubmitApprovalRequest;
use erp_audit_log::ActionType;
use erp_audit_log::AppendRequest;
use erp_audit_log::AuditLog;
use erp_events::EnqueueRequest;
use erp_events::EventBus;
use erp_inventory::InventoryService;
use erp_inventory::RecordInboundRequest;
use erp_inventory::RecordOutboundRequest;
use erp_ledger::LedgerBalance;
use erp_ledger::LedgerService;
use erp_ledger::Voucher;
use erp_ledger::VoucherLine;
use erp_ledger::VoucherStatus;
use erp_receivables::AgingReport;
use erp_receivables::AllocatePaymentRequest;
use erp_receivables::CreatePaymentRequest;
use erp_receivables::Invoice;
use erp_receivables::Party;
use erp_receivables::Payment;
use erp_receivables::PaymentLine;
use erp_receivables::PaymentLineId;
use erp_receivables::ReceivablesService;
use erp_tenancy::Capability;
use erp_tenancy::Principal;
use erp_tenancy::TenancyService;
use erp_tenancy::ensure_company_active;
use erp_tenancy::ensure_company_unlocked;
use erp_tenancy::ensure_date_within_financial_year;
use erp_tenancy::ensure_financial_year_open;
use erp_tenancy::ensure_override_permitted;
use rust_decimal::Decimal;
use tokio::sync::RwLock;

use crate::CompanyId;
use crate::IdempotencyRecord;
use crate::OrdersService;
use crate::PostingError;
use crate::PostingResult;
use crate::VoucherId;
use crate::idempotency::hash_inputs;
use crate::orders::CreatePurchaseOrderRequest;
use crate::orders::CreateSalesOrderRequest;
use crate::orders::PurchaseOrder;
use crate::orders::PurchaseOrderId;
use crate::orders::SalesOrder;
use crate::orders::SalesOrderId;
use erp_inventory::StockItemId;
use erp_receivables::InvoiceId;
use erp_receivables::PartyId;
use erp_receivables::PaymentId;

/// The voucher lines and (for a SALES invoice) outbound stock requests that
/// `post_invoice` materializes into a real voucher. `erp-receivables::Invoice`
/// carries only a flat `total_value`; splitting it across ledgers and tax
/// accounts is GST/pricing logic this crate does not own (spec §1, §6 names
/// the API layer that does this as out of scope), so the caller supplies the
/// already-computed split.
#[derive(Debug, Clone, PartialEq)]
pub struct InvoicePostingRequest {
    pub voucher_type_id: String,
    pub financial_year_id: String,
    pub date: NaiveDate,
    pub lines: Vec<VoucherLine>,
    pub outbound: Vec<RecordOutboundRequest>,
}

#[derive(Debug, Clone, Default)]
struct StagedMovements {
    inbound: Vec<RecordInboundRequest>,
    outbound: Vec<RecordOutboundRequest>,
}

/// Snapshot used by `trial_balance`: one row per ledger touched in the year.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrialBalanceEntry {
    pub ledger_id: String,
    pub balance: LedgerBalance,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrialBalance {
    pub company_id: CompanyId,
    pub financial_year_id: String,
    pub entries: Vec<TrialBalanceEntry>,
    pub is_balanced: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreditStatus {
    pub party: Party,
    pub outstanding: Decimal,
    pub available_credit: Option<Decimal>,
}

/// The orchestration surface of spec §6: every posting/reversal/payment/order
/// entry point a caller (an out-of-scope HTTP layer) drives the system
/// through.
#[async_trait]
pub trait PostingService: Send + Sync {
    async fn post_voucher(
        &self,
        company_id: &CompanyId,
        voucher_id: &VoucherId,
        principal: &Principal,
        idempotency_key: Option<String>,
        metadata: Option<serde_json::Value>,
    ) -> PostingResult<Voucher>;

    /// Records stock movements a posting voucher should apply once posted.
    /// Exists because `VoucherLine` carries no item/godown fields (the
    /// ledger and inventory subsystems are independent row stores); callers
    /// stage the movements they computed before calling `post_voucher`.
    async fn stage_voucher_inventory(
        &self,
        voucher_id: VoucherId,
        inbound: Vec<RecordInboundRequest>,
        outbound: Vec<RecordOutboundRequest>,
    ) -> PostingResult<()>;

    async fn post_invoice(
        &self,
        invoice_id: &InvoiceId,
        request: InvoicePostingRequest,
        principal: &Principal,
        idempotency_key: Option<String>,
    ) -> PostingResult<Invoice>;

    async fn reverse_voucher(
        &self,
        company_id: &CompanyId,
        voucher_id: &VoucherId,
        principal: &Principal,
        reason: String,
        reversal_date: NaiveDate,
        allow_override: bool,
    ) -> PostingResult<Voucher>;

    async fn create_payment_draft(&self, request: CreatePaymentRequest) -> PostingResult<Payment>;
    async fn allocate_payment(&self, request: AllocatePaymentRequest) -> PostingResult<PaymentLine>;
    async fn remove_allocation(&self, payment_id: &PaymentId, line_id: &PaymentLineId) -> PostingResult<()>;

    async fn post_payment(
        &self,
        company_id: &CompanyId,
        payment_id: &PaymentId,
        voucher_id: &VoucherId,
        principal: &Principal,
        idempotency_key: Option<String>,
        metadata: Option<serde_json::Value>,
    ) -> PostingResult<Payment>;

    async fn reverse_payment(
        &self,
        company_id: &CompanyId,
        payment_id: &PaymentId,
        principal: &Principal,
        reason: String,
        reversal_date: NaiveDate,
        allow_override: bool,
    ) -> PostingResult<Payment>;

    async fn create_sales_order(&self, request: CreateSalesOrderRequest) -> PostingResult<SalesOrder>;
    async fn add_sales_order_item(
        &self,
        order_id: &SalesOrderId,
        item_id: StockItemId,
        quantity: Decimal,
        rate: Decimal,
    ) -> PostingResult<SalesOrder>;
    async fn confirm_sales_order(&self, order_id: &SalesOrderId) -> PostingResult<SalesOrder>;
    async fn cancel_sales_order(&self, order_id: &SalesOrderId, reason: String) -> PostingResult<SalesOrder>;
    async fn get_sales_order(&self, company_id: &CompanyId, order_id: &SalesOrderId) -> PostingResult<SalesOrder>;

    async fn create_purchase_order(&self, request: CreatePurchaseOrderRequest) -> PostingResult<PurchaseOrder>;
    async fn add_purchase_order_item(
        &self,
        order_id: &PurchaseOrderId,
        item_id: StockItemId,
        quantity: Decimal,
        rate: Decimal,
    ) -> PostingResult<PurchaseOrder>;
    async fn confirm_purchase_order(&self, order_id: &PurchaseOrderId) -> PostingResult<PurchaseOrder>;
    async fn get_purchase_order(
        &self,
        company_id: &CompanyId,
        order_id: &PurchaseOrderId,
    ) -> PostingResult<PurchaseOrder>;

    async fn submit_for_approval(&self, request: SubmitApprovalRequest) -> PostingResult<Approval>;
    async fn approve(&self, approval_id: &str, principal: &Principal, remarks: Option<String>) -> PostingResult<Approval>;
    async fn reject(&self, approval_id: &str, principal: &Principal, remarks: Option<String>) -> PostingResult<Approval>;
    async fn approval_status(&self, approval_id: &str) -> PostingResult<Approval>;

    async fn get_voucher(&self, company_id: &CompanyId, voucher_id: &VoucherId) -> PostingResult<Voucher>;
    async fn ledger_balance(
        &self,
        company_id: &CompanyId,
        ledger_id: &str,
        financial_year_id: &str,
    ) -> PostingResult<LedgerBalance>;
    async fn trial_balance(&self, company_id: &CompanyId, financial_year_id: &str) -> PostingResult<TrialBalance>;
    async fn credit_status(&self, company_id: &CompanyId, party_id: &PartyId) -> PostingResult<CreditStatus>;
    async fn aging(&self, company_id: &CompanyId, as_of: NaiveDate) -> PostingResult<AgingReport>;
    async fn outstanding_invoices(&self, company_id: &CompanyId) -> PostingResult<Vec<Invoice>>;
}

/// Composes every subsystem service behind the single orchestration surface
/// above. Holds only what genuinely can't live in a subsystem: the
/// idempotency ledger and the staged-inventory-movements side channel.
pub struct InMemoryPostingService {
    tenancy: Arc<dyn TenancyService>,
    ledger: Arc<dyn LedgerService>,
    inventory: Arc<dyn InventoryService>,
    approvals: Arc<dyn ApprovalsService>,
    receivables: Arc<dyn ReceivablesService>,
    audit_log: Arc<dyn AuditLog>,
    event_bus: Arc<dyn EventBus>,
    orders: Arc<dyn OrdersService>,
    idempotency: RwLock<HashMap<String, IdempotencyRecord>>,
    staged: RwLock<HashMap<VoucherId, StagedMovements>>,
}

impl InMemoryPostingService {
    #[must_use]
    pub fn new(
        tenancy: Arc<dyn TenancyService>,
        ledger: Arc<dyn LedgerService>,
        inventory: Arc<dyn InventoryService>,
        approvals: Arc<dyn ApprovalsService>,
        receivables: Arc<dyn ReceivablesService>,
        audit_log: Arc<dyn AuditLog>,
        event_bus: Arc<dyn EventBus>,
        orders: Arc<dyn OrdersService>,
    ) -> Self {
        Self {
            tenancy,
            ledger,
            inventory,
            approvals,
            receivables,
            audit_log,
            event_bus,
            orders,
            idempotency: RwLock::new(HashMap::new()),
            staged: RwLock::new(HashMap::new()),
        }
    }

    fn ensure_capability(principal: &Principal, capability: Capability) -> PostingResult<()> {
        if principal.has(capability) {
            Ok(())
        } else {
            let user_id = &principal.user_id;
            Err(PostingError::Validation(format!(
                "principal {user_id} lacks required capability {capability:?}"
            )))
        }
    }

    /// Tenant guards common to every posting/reversal entry point (spec
    /// §4.5 steps 1-2, §4.7): company active and unlocked, financial year
    /// open (subject to `allow_override`), voucher date inside it.
    async fn run_tenant_guards(
        &self,
        company_id: &CompanyId,
        financial_year_id: &str,
        date: NaiveDate,
        allow_override: bool,
    ) -> PostingResult<()> {
        let company = self.tenancy.get_company(company_id).await?;
        ensure_company_active(&company)?;
        let feature = self.tenancy.get_feature(company_id).await?;
        ensure_company_unlocked(&feature)?;
        let financial_year = self
            .tenancy
            .get_financial_year(company_id, &financial_year_id.to_string())
            .await?;
        ensure_financial_year_open(&financial_year, allow_override)?;
        ensure_date_within_financial_year(date, &financial_year)?;
        Ok(())
    }

    async fn idempotency_guard(
        &self,
        idempotency_key: &Option<String>,
        company_id: &CompanyId,
        target_id: &str,
        metadata: &serde_json::Value,
    ) -> PostingResult<Option<VoucherId>> {
        let Some(key) = idempotency_key else {
            return Ok(None);
        };
        let hash = hash_inputs(company_id, target_id, metadata);
        let guard = self.idempotency.read().await;
        match guard.get(key) {
            Some(record) if record.input_hash == hash => Ok(Some(record.voucher_id.clone())),
            Some(_) => Err(PostingError::IdempotencyConflict { key: key.clone() }),
            None => Ok(None),
        }
    }

    async fn record_idempotency(
        &self,
        idempotency_key: &Option<String>,
        company_id: &CompanyId,
        target_id: &str,
        metadata: &serde_json::Value,
        voucher_id: VoucherId,
    ) {
        let Some(key) = idempotency_key else {
            return;
        };
        let hash = hash_inputs(company_id, target_id, metadata);
        self.idempotency
            .write()
            .await
            .insert(key.clone(), IdempotencyRecord { voucher_id, input_hash: hash });
    }

    async fn apply_staged_inventory(&self, company_id: &CompanyId, voucher_id: &VoucherId) -> PostingResult<()> {
        let staged = self.staged.write().await.remove(voucher_id);
        let Some(staged) = staged else {
            return Ok(());
        };
        for request in staged.inbound {
            self.inventory.record_inbound(request).await?;
        }
        for request in staged.outbound {
            self.inventory.record_outbound(request).await?;
        }
        let _ = company_id;
        Ok(())
    }

    /// Best-effort post-commit side effects (spec §4.5 step 15): a failure
    /// here is logged, never raised to the caller and never unwinds the
    /// posting that already committed.
    async fn record_post_commit(
        &self,
        company_id: &CompanyId,
        actor: &str,
        action_type: ActionType,
        object_type: &str,
        object_id: &str,
        changes: serde_json::Value,
        event_type: &str,
        event_payload: serde_json::Value,
    ) {
        if let Err(error) = self
            .audit_log
            .append(AppendRequest {
                company_id: company_id.clone(),
                actor: actor.to_string(),
                action_type,
                object_type: object_type.to_string(),
                object_id: object_id.to_string(),
                changes,
                ip: None,
                user_agent: None,
            })
            .await
        {
            tracing::warn!(
                object_id = %object_id,
                error = %error,
                "audit log append failed after commit"
            );
        }

        if let Err(error) = self
            .event_bus
            .enqueue(EnqueueRequest {
                company_id: company_id.clone(),
                event_type: event_type.to_string(),
                payload: event_payload,
            })
            .await
        {
            tracing::warn!(
                object_id = %object_id,
                error = %error,
                "event enqueue failed after commit"
            );
        }
    }
}

#[async_trait]
impl PostingService for InMemoryPostingService {
    async fn post_voucher(
        &self,
        company_id: &CompanyId,
        voucher_id: &VoucherId,
        principal: &Principal,
        idempotency_key: Option<String>,
        metadata: Option<serde_json::Value>,
    ) -> PostingResult<Voucher> {
        let metadata = metadata.unwrap_or(serde_json::Value::Null);
        if let Some(existing) = self
            .idempotency_guard(&idempotency_key, company_id, voucher_id, &metadata)
            .await?
        {
            return Ok(self.ledger.get_voucher(company_id, &existing).await?);
        }

        Self::ensure_capability(principal, Capability::Poster)?;

        let voucher = self.ledger.get_voucher(company_id, voucher_id).await?;
        if voucher.status != VoucherStatus::Draft {
            return Err(PostingError::AlreadyPosted(voucher_id.clone()));
        }

        self.run_tenant_guards(company_id, &voucher.financial_year_id, voucher.date, false)
            .await?;

        let voucher_type = self
            .ledger
            .get_voucher_type(company_id, &voucher.voucher_type_id)
            .await?;
        if !voucher_type.is_active {
            return Err(erp_ledger::LedgerError::VoucherTypeInactive(voucher_type.id).into());
        }

        let ledgers = self.ledger.list_ledgers(company_id).await?;
        let ledger_refs: Vec<&erp_ledger::Ledger> = ledgers.iter().collect();
        erp_ledger::validate_posting(&voucher, &ledger_refs)?;

        self.approvals
            .ensure_satisfied(
                company_id,
                "voucher",
                voucher_id,
                voucher.total_debit().as_decimal(),
            )
            .await?;

        // Inventory phase runs before the ledger commit so a FIFO shortfall
        // aborts the whole post instead of leaving balances applied with no
        // matching stock movement (spec §4.5 steps 10-11).
        self.apply_staged_inventory(company_id, voucher_id).await?;

        let voucher_number = self
            .ledger
            .allocate_sequence(
                company_id,
                &voucher_type.code,
                &voucher.financial_year_id,
                &voucher_type.code,
            )
            .await?;
        let posted = self.ledger.apply_posting(voucher_id, voucher_number).await?;

        self.record_idempotency(&idempotency_key, company_id, voucher_id, &metadata, posted.id.clone())
            .await;

        self.record_post_commit(
            company_id,
            &principal.user_id,
            ActionType::Posted,
            "voucher",
            &posted.id,
            serde_json::json!({"voucher_number": posted.voucher_number}),
            "voucher.posted",
            serde_json::json!({"voucher_id": posted.id, "voucher_number": posted.voucher_number}),
        )
        .await;

        Ok(posted)
    }

    async fn stage_voucher_inventory(
        &self,
        voucher_id: VoucherId,
        inbound: Vec<RecordInboundRequest>,
        outbound: Vec<RecordOutboundRequest>,
    ) -> PostingResult<()> {
        self.staged
            .write()
            .await
            .insert(voucher_id, StagedMovements { inbound, outbound });
        Ok(())
    }

    async fn post_invoice(
        &self,
        invoice_id: &InvoiceId,
        request: InvoicePostingRequest,
        principal: &Principal,
        idempotency_key: Option<String>,
    ) -> PostingResult<Invoice> {
        let invoice = self
            .receivables
            .get_invoice(&principal.company_id, invoice_id)
            .await?;
        if let Some(voucher_id) = &invoice.voucher_id {
            self.post_voucher(
                &principal.company_id,
                voucher_id,
                principal,
                idempotency_key,
                None,
            )
            .await?;
            return Ok(self
                .receivables
                .get_invoice(&principal.company_id, invoice_id)
                .await?);
        }

        let voucher_id = uuid::Uuid::new_v4().to_string();
        let voucher = Voucher {
            id: voucher_id.clone(),
            company_id: principal.company_id.clone(),
            voucher_type_id: request.voucher_type_id,
            financial_year_id: request.financial_year_id,
            voucher_number: None,
            date: request.date,
            status: VoucherStatus::Draft,
            lines: request.lines,
            reversed_voucher_id: None,
            reversal_of: None,
            reversal_reason: None,
            reversal_user: None,
            reversed_at: None,
        };
        self.ledger.create_draft_voucher(voucher).await?;

        if !request.outbound.is_empty() {
            self.stage_voucher_inventory(voucher_id.clone(), Vec::new(), request.outbound)
                .await?;
        }

        self.receivables
            .attach_voucher(invoice_id, voucher_id.clone())
            .await?;

        self.post_voucher(&principal.company_id, &voucher_id, principal, idempotency_key, None)
            .await?;

        Ok(self
            .receivables
            .get_invoice(&principal.company_id, invoice_id)
            .await?)
    }

    async fn reverse_voucher(
        &self,
        company_id: &CompanyId,
        voucher_id: &VoucherId,
        principal: &Principal,
        reason: String,
        reversal_date: NaiveDate,
        allow_override: bool,
    ) -> PostingResult<Voucher> {
        Self::ensure_capability(principal, Capability::Poster)?;

        let voucher = self.ledger.get_voucher(company_id, voucher_id).await?;
        if voucher.status != VoucherStatus::Posted {
            return Err(erp_ledger::LedgerError::InvalidVoucherState(voucher.id, voucher.status).into());
        }

        let override_permitted = ensure_override_permitted(principal, allow_override);
        self.run_tenant_guards(company_id, &voucher.financial_year_id, reversal_date, override_permitted)
            .await?;

        let voucher_type = self
            .ledger
            .get_voucher_type(company_id, &voucher.voucher_type_id)
            .await?;
        let reversal_voucher_id = uuid::Uuid::new_v4().to_string();
        let voucher_number = self
            .ledger
            .allocate_sequence(
                company_id,
                &voucher_type.code,
                &voucher.financial_year_id,
                &voucher_type.code,
            )
            .await?;

        self.ledger
            .apply_reversal(
                voucher_id,
                reversal_voucher_id.clone(),
                voucher_number,
                reason.clone(),
                principal.user_id.clone(),
                reversal_date,
            )
            .await?;

        self.inventory
            .reverse_voucher_movements(company_id, voucher_id, reversal_voucher_id.clone())
            .await?;

        self.record_post_commit(
            company_id,
            &principal.user_id,
            ActionType::Reversed,
            "voucher",
            voucher_id,
            serde_json::json!({"reason": reason, "reversal_voucher_id": reversal_voucher_id}),
            "voucher.reversed",
            serde_json::json!({"voucher_id": voucher_id, "reversal_voucher_id": reversal_voucher_id}),
        )
        .await;

        self.ledger.get_voucher(company_id, voucher_id).await.map_err(Into::into)
    }

    async fn create_payment_draft(&self, request: CreatePaymentRequest) -> PostingResult<Payment> {
        Ok(self.receivables.create_payment(request).await?)
    }

    async fn allocate_payment(&self, request: AllocatePaymentRequest) -> PostingResult<PaymentLine> {
        Ok(self.receivables.allocate_payment(request).await?)
    }

    async fn remove_allocation(&self, payment_id: &PaymentId, line_id: &PaymentLineId) -> PostingResult<()> {
        Ok(self.receivables.remove_allocation(payment_id, line_id).await?)
    }

    async fn post_payment(
        &self,
        company_id: &CompanyId,
        payment_id: &PaymentId,
        voucher_id: &VoucherId,
        principal: &Principal,
        idempotency_key: Option<String>,
        metadata: Option<serde_json::Value>,
    ) -> PostingResult<Payment> {
        self.post_voucher(company_id, voucher_id, principal, idempotency_key, metadata)
            .await?;
        Ok(self.receivables.mark_posted(payment_id, voucher_id.clone()).await?)
    }

    async fn reverse_payment(
        &self,
        company_id: &CompanyId,
        payment_id: &PaymentId,
        principal: &Principal,
        reason: String,
        reversal_date: NaiveDate,
        allow_override: bool,
    ) -> PostingResult<Payment> {
        let payment = self.receivables.get_payment(payment_id).await?;
        let voucher_id = payment
            .voucher_id
            .clone()
            .ok_or_else(|| PostingError::InvoiceNotPosted(payment_id.clone()))?;
        self.reverse_voucher(company_id, &voucher_id, principal, reason, reversal_date, allow_override)
            .await?;
        Ok(self.receivables.mark_reversed(payment_id).await?)
    }

    async fn create_sales_order(&self, request: CreateSalesOrderRequest) -> PostingResult<SalesOrder> {
        Ok(self.orders.create_sales_order(request).await?)
    }

    async fn add_sales_order_item(
        &self,
        order_id: &SalesOrderId,
        item_id: StockItemId,
        quantity: Decimal,
        rate: Decimal,
    ) -> PostingResult<SalesOrder> {
        Ok(self.orders.add_sales_order_item(order_id, item_id, quantity, rate).await?)
    }

    async fn confirm_sales_order(&self, order_id: &SalesOrderId) -> PostingResult<SalesOrder> {
        Ok(self.orders.confirm_sales_order(order_id).await?)
    }

    async fn cancel_sales_order(&self, order_id: &SalesOrderId, reason: String) -> PostingResult<SalesOrder> {
        Ok(self.orders.cancel_sales_order(order_id, reason).await?)
    }

    async fn get_sales_order(&self, company_id: &CompanyId, order_id: &SalesOrderId) -> PostingResult<SalesOrder> {
        Ok(self.orders.get_sales_order(company_id, order_id).await?)
    }

    async fn create_purchase_order(&self, request: CreatePurchaseOrderRequest) -> PostingResult<PurchaseOrder> {
        Ok(self.orders.create_purchase_order(request).await?)
    }

    async fn add_purchase_order_item(
        &self,
        order_id: &PurchaseOrderId,
        item_id: StockItemId,
        quantity: Decimal,
        rate: Decimal,
    ) -> PostingResult<PurchaseOrder> {
        Ok(self.orders.add_purchase_order_item(order_id, item_id, quantity, rate).await?)
    }

    async fn confirm_purchase_order(&self, order_id: &PurchaseOrderId) -> PostingResult<PurchaseOrder> {
        Ok(self.orders.confirm_purchase_order(order_id).await?)
    }

    async fn get_purchase_order(
        &self,
        company_id: &CompanyId,
        order_id: &PurchaseOrderId,
    ) -> PostingResult<PurchaseOrder> {
        Ok(self.orders.get_purchase_order(company_id, order_id).await?)
    }

    async fn submit_for_approval(&self, request: SubmitApprovalRequest) -> PostingResult<Approval> {
        Ok(self.approvals.submit(request).await?)
    }

    async fn approve(&self, approval_id: &str, principal: &Principal, remarks: Option<String>) -> PostingResult<Approval> {
        Self::ensure_capability(principal, Capability::Checker)?;
        Ok(self
            .approvals
            .approve(&approval_id.to_string(), &principal.user_id, remarks)
            .await?)
    }

    async fn reject(&self, approval_id: &str, principal: &Principal, remarks: Option<String>) -> PostingResult<Approval> {
        Self::ensure_capability(principal, Capability::Checker)?;
        Ok(self
            .approvals
            .reject(&approval_id.to_string(), &principal.user_id, remarks)
            .await?)
    }

    async fn approval_status(&self, approval_id: &str) -> PostingResult<Approval> {
        Ok(self.approvals.get(&approval_id.to_string()).await?)
    }

    async fn get_voucher(&self, company_id: &CompanyId, voucher_id: &VoucherId) -> PostingResult<Voucher> {
        Ok(self.ledger.get_voucher(company_id, voucher_id).await?)
    }

    async fn ledger_balance(
        &self,
        company_id: &CompanyId,
        ledger_id: &str,
        financial_year_id: &str,
    ) -> PostingResult<LedgerBalance> {
        Ok(self
            .ledger
            .get_balance(company_id, &ledger_id.to_string(), &financial_year_id.to_string())
            .await?)
    }

    async fn trial_balance(&self, company_id: &CompanyId, financial_year_id: &str) -> PostingResult<TrialBalance> {
        let ledgers = self.ledger.list_ledgers(company_id).await?;
        let mut entries = Vec::with_capacity(ledgers.len());
        let mut total_dr = Decimal::ZERO;
        let mut total_cr = Decimal::ZERO;
        for ledger in ledgers {
            let balance = self
                .ledger
                .get_balance(company_id, &ledger.id, &financial_year_id.to_string())
                .await?;
            total_dr += balance.balance_dr.as_decimal();
            total_cr += balance.balance_cr.as_decimal();
            entries.push(TrialBalanceEntry { ledger_id: ledger.id, balance });
        }
        Ok(TrialBalance {
            company_id: company_id.clone(),
            financial_year_id: financial_year_id.to_string(),
            entries,
            is_balanced: total_dr == total_cr,
        })
    }

    async fn credit_status(&self, company_id: &CompanyId, party_id: &PartyId) -> PostingResult<CreditStatus> {
        let party = self.receivables.get_party(company_id, party_id).await?;
        let outstanding = self.receivables.outstanding_for_party(company_id, party_id).await?;
        let available_credit = party
            .credit_limit
            .map(|limit| (limit - outstanding).max(Decimal::ZERO));
        Ok(CreditStatus { party, outstanding, available_credit })
    }

    async fn aging(&self, company_id: &CompanyId, as_of: NaiveDate) -> PostingResult<AgingReport> {
        Ok(self.receivables.aging_report(company_id, as_of).await?)
    }

    async fn outstanding_invoices(&self, company_id: &CompanyId) -> PostingResult<Vec<Invoice>> {
        Ok(self.receivables.list_outstanding_invoices(company_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use erp_approvals::InMemoryApprovalsService;
    use erp_events::InMemoryEventBus;
    use erp_inventory::InMemoryInventoryService;
    use erp_ledger::AccountType;
    use erp_ledger::EntryType;
    use erp_ledger::InMemoryLedgerService;
    use erp_ledger::Ledger;
    use erp_ledger::Money;
    use erp_ledger::VoucherCategory;
    use erp_ledger::VoucherType;
    use erp_receivables::InMemoryReceivablesService;
    use erp_tenancy::CreateCompanyRequest;
    use erp_tenancy::CreateFinancialYearRequest;
    use erp_tenancy::InMemoryTenancyService;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    struct Harness {
        posting: InMemoryPostingService,
        company_id: CompanyId,
        fy_id: String,
        cash: String,
        sales: String,
        voucher_type: String,
    }

    async fn harness() -> Harness {
        let tenancy = Arc::new(InMemoryTenancyService::new());
        let ledger = Arc::new(InMemoryLedgerService::new());
        let inventory = Arc::new(InMemoryInventoryService::new());
        let approvals = Arc::new(InMemoryApprovalsService::new());
        let receivables = Arc::new(InMemoryReceivablesService::new());
        let audit_log = erp_audit_log::InMemoryAuditLog::shared();
        let event_bus = InMemoryEventBus::shared(erp_events::RetryPolicy::default());
        let orders = Arc::new(crate::orders::InMemoryOrdersService::new(
            receivables.clone(),
            inventory.clone(),
        ));

        let company = tenancy
            .create_company(CreateCompanyRequest {
                code: "ACME".into(),
                name: "Acme".into(),
                base_currency: "INR".into(),
            })
            .await
            .expect("company");
        let fy = tenancy
            .create_financial_year(CreateFinancialYearRequest {
                company_id: company.id.clone(),
                name: "2024-25".into(),
                start_date: NaiveDate::from_ymd_opt(2024, 4, 1).expect("date"),
                end_date: NaiveDate::from_ymd_opt(2025, 3, 31).expect("date"),
                make_current: true,
            })
            .await
            .expect("fy");

        let cash = ledger
            .create_ledger(Ledger {
                id: "cash".into(),
                company_id: company.id.clone(),
                code: "CASH".into(),
                group: "Current Assets".into(),
                account_type: AccountType::Asset,
                is_active: true,
            })
            .await
            .expect("ledger");
        let sales = ledger
            .create_ledger(Ledger {
                id: "sales".into(),
                company_id: company.id.clone(),
                code: "SALES".into(),
                group: "Income".into(),
                account_type: AccountType::Revenue,
                is_active: true,
            })
            .await
            .expect("ledger");
        let voucher_type = ledger
            .create_voucher_type(VoucherType {
                id: "vt-journal".into(),
                company_id: company.id.clone(),
                code: "JV".into(),
                category: VoucherCategory::Journal,
                is_accounting: true,
                is_inventory: false,
                is_active: true,
            })
            .await
            .expect("voucher type");

        let posting = InMemoryPostingService::new(
            tenancy, ledger, inventory, approvals, receivables, audit_log, event_bus, orders,
        );

        Harness {
            posting,
            company_id: company.id,
            fy_id: fy.id,
            cash: cash.id,
            sales: sales.id,
            voucher_type: voucher_type.id,
        }
    }

    fn principal(company_id: &str) -> Principal {
        Principal::new("u1", company_id).with_capability(Capability::Poster)
    }

    fn draft_voucher(h: &Harness, id: &str) -> Voucher {
        Voucher {
            id: id.into(),
            company_id: h.company_id.clone(),
            voucher_type_id: h.voucher_type.clone(),
            financial_year_id: h.fy_id.clone(),
            voucher_number: None,
            date: NaiveDate::from_ymd_opt(2024, 6, 1).expect("date"),
            status: VoucherStatus::Draft,
            lines: vec![
                VoucherLine {
                    line_no: 1,
                    ledger_id: h.cash.clone(),
                    amount: Money::new(dec!(100.00)),
                    entry_type: EntryType::Debit,
                    cost_center: None,
                    against_voucher: None,
                },
                VoucherLine {
                    line_no: 2,
                    ledger_id: h.sales.clone(),
                    amount: Money::new(dec!(100.00)),
                    entry_type: EntryType::Credit,
                    cost_center: None,
                    against_voucher: None,
                },
            ],
            reversed_voucher_id: None,
            reversal_of: None,
            reversal_reason: None,
            reversal_user: None,
            reversed_at: None,
        }
    }

    #[tokio::test]
    async fn posts_a_balanced_voucher_and_assigns_a_number() {
        let h = harness().await;
        h.posting.ledger.create_draft_voucher(draft_voucher(&h, "v1")).await.expect("draft");

        let posted = h
            .posting
            .post_voucher(&h.company_id, &"v1".to_string(), &principal(&h.company_id), None, None)
            .await
            .expect("post");

        assert_eq!(posted.status, VoucherStatus::Posted);
        assert_eq!(posted.voucher_number.as_deref(), Some("JV-1"));
    }

    #[tokio::test]
    async fn reposting_the_same_voucher_is_rejected() {
        let h = harness().await;
        h.posting.ledger.create_draft_voucher(draft_voucher(&h, "v1")).await.expect("draft");
        h.posting
            .post_voucher(&h.company_id, &"v1".to_string(), &principal(&h.company_id), None, None)
            .await
            .expect("first post");

        let err = h
            .posting
            .post_voucher(&h.company_id, &"v1".to_string(), &principal(&h.company_id), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, PostingError::AlreadyPosted(_)));
    }

    #[tokio::test]
    async fn idempotency_key_short_circuits_a_retry() {
        let h = harness().await;
        h.posting.ledger.create_draft_voucher(draft_voucher(&h, "v1")).await.expect("draft");

        let first = h
            .posting
            .post_voucher(
                &h.company_id,
                &"v1".to_string(),
                &principal(&h.company_id),
                Some("key-1".into()),
                None,
            )
            .await
            .expect("first post");

        let second = h
            .posting
            .post_voucher(
                &h.company_id,
                &"v1".to_string(),
                &principal(&h.company_id),
                Some("key-1".into()),
                None,
            )
            .await
            .expect("idempotent replay");

        assert_eq!(first.id, second.id);
        assert_eq!(second.voucher_number, first.voucher_number);
    }

    #[tokio::test]
    async fn same_key_different_voucher_is_a_conflict() {
        let h = harness().await;
        h.posting.ledger.create_draft_voucher(draft_voucher(&h, "v1")).await.expect("draft");
        h.posting.ledger.create_draft_voucher(draft_voucher(&h, "v2")).await.expect("draft");

        h.posting
            .post_voucher(
                &h.company_id,
                &"v1".to_string(),
                &principal(&h.company_id),
                Some("shared-key".into()),
                None,
            )
            .await
            .expect("first post");

        let err = h
            .posting
            .post_voucher(
                &h.company_id,
                &"v2".to_string(),
                &principal(&h.company_id),
                Some("shared-key".into()),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PostingError::IdempotencyConflict { .. }));
    }

    #[tokio::test]
    async fn reversing_a_posted_voucher_mirrors_its_lines() {
        let h = harness().await;
        h.posting.ledger.create_draft_voucher(draft_voucher(&h, "v1")).await.expect("draft");
        h.posting
            .post_voucher(&h.company_id, &"v1".to_string(), &principal(&h.company_id), None, None)
            .await
            .expect("post");

        let reversal_date = NaiveDate::from_ymd_opt(2024, 6, 2).expect("date");
        let reversed = h
            .posting
            .reverse_voucher(
                &h.company_id,
                &"v1".to_string(),
                &principal(&h.company_id),
                "duplicate entry".into(),
                reversal_date,
                false,
            )
            .await
            .expect("reverse");

        assert_eq!(reversed.status, VoucherStatus::Reversed);
        assert!(reversed.reversed_voucher_id.is_some());
    }

    #[tokio::test]
    async fn non_poster_cannot_post() {
        let h = harness().await;
        h.posting.ledger.create_draft_voucher(draft_voucher(&h, "v1")).await.expect("draft");
        let maker_only = Principal::new("u2", h.company_id.clone()).with_capability(Capability::Maker);

        let err = h
            .posting
            .post_voucher(&h.company_id, &"v1".to_string(), &maker_only, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, PostingError::Validation(_)));
    }

    #[tokio::test]
    async fn concurrent_posts_of_the_same_voucher_only_one_succeeds() {
        let h = harness().await;
        h.posting.ledger.create_draft_voucher(draft_voucher(&h, "v1")).await.expect("draft");
        let posting = Arc::new(h.posting);
        let company_id = h.company_id.clone();

        let p1 = posting.clone();
        let c1 = company_id.clone();
        let task1 = tokio::spawn(async move {
            p1.post_voucher(&c1, &"v1".to_string(), &principal(&c1), None, None).await
        });
        let p2 = posting.clone();
        let c2 = company_id.clone();
        let task2 = tokio::spawn(async move {
            p2.post_voucher(&c2, &"v1".to_string(), &principal(&c2), None, None).await
        });

        let (r1, r2) = (task1.await.expect("join"), task2.await.expect("join"));
        let successes = [&r1, &r2].iter().filter(|r| r.is_ok()).count();
        let conflicts = [&r1, &r2]
            .iter()
            .filter(|r| matches!(r, Err(PostingError::AlreadyPosted(_)) | Err(PostingError::Ledger(_))))
            .count();
        assert_eq!(successes, 1);
        assert_eq!(conflicts, 1);
    }
}
