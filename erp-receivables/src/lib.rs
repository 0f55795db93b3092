#![deny(clippy::print_stdout, clippy::print_stderr)]

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

mod memory;

pub use memory::InMemoryReceivablesService;

pub type CompanyId = String;
pub type PartyId = String;
pub type InvoiceId = String;
pub type PaymentId = String;
pub type PaymentLineId = String;
pub type VoucherId = String;
pub type LedgerId = String;

pub type ReceivablesResult<T> = Result<T, ReceivablesError>;

/// Stable error codes for credit control and payment allocation (spec §7).
#[derive(Debug, Error)]
pub enum ReceivablesError {
    #[error("party {0} not found")]
    PartyNotFound(PartyId),
    #[error("invoice {0} not found")]
    InvoiceNotFound(InvoiceId),
    #[error("payment {0} not found")]
    PaymentNotFound(PaymentId),
    #[error(
        "credit limit exceeded: current={current_outstanding}, available={available}, limit={limit}"
    )]
    CreditLimitExceeded {
        current_outstanding: Decimal,
        available: Decimal,
        limit: Decimal,
    },
    #[error("allocation of {amount} to invoice {invoice_id} exceeds its remaining outstanding of {remaining}")]
    AllocationExceedsInvoice {
        invoice_id: InvoiceId,
        amount: Decimal,
        remaining: Decimal,
    },
    #[error("allocations of {allocated} exceed the payment voucher amount of {voucher_amount}")]
    AllocationExceedsVoucherAmount {
        allocated: Decimal,
        voucher_amount: Decimal,
    },
    #[error("payment {0} is not draft and cannot accept new allocations")]
    PaymentNotDraft(PaymentId),
    #[error("validation error: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartyType {
    Customer,
    Supplier,
    Both,
}

/// Every party owns exactly one control ledger (spec §3 `Party`); deleting
/// that ledger is a protected operation enforced by `erp-ledger`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Party {
    pub id: PartyId,
    pub company_id: CompanyId,
    pub party_type: PartyType,
    pub control_ledger_id: LedgerId,
    pub credit_limit: Option<Decimal>,
    pub credit_days: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceType {
    Sales,
    Purchase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceStatus {
    Draft,
    Posted,
    PartiallyPaid,
    Paid,
}

/// Derives status from §3's `outstanding = total_value − amount_received`
/// rule. Only meaningful once the invoice has a voucher attached (i.e. is no
/// longer `DRAFT`); callers are responsible for the `DRAFT → POSTED`
/// transition.
#[must_use]
pub fn derive_invoice_status(total_value: Decimal, amount_received: Decimal) -> InvoiceStatus {
    if amount_received >= total_value {
        InvoiceStatus::Paid
    } else if amount_received > Decimal::ZERO {
        InvoiceStatus::PartiallyPaid
    } else {
        InvoiceStatus::Posted
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: InvoiceId,
    pub company_id: CompanyId,
    pub party_id: PartyId,
    pub invoice_type: InvoiceType,
    pub invoice_number: String,
    pub sales_order_id: Option<String>,
    pub purchase_order_id: Option<String>,
    pub voucher_id: Option<VoucherId>,
    pub total_value: Decimal,
    pub amount_received: Decimal,
    pub due_date: NaiveDate,
    pub status: InvoiceStatus,
}

impl Invoice {
    #[must_use]
    pub fn outstanding(&self) -> Decimal {
        self.total_value - self.amount_received
    }

    #[must_use]
    pub fn is_outstanding(&self) -> bool {
        matches!(self.status, InvoiceStatus::Posted | InvoiceStatus::PartiallyPaid)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentType {
    Payment,
    Receipt,
}

/// Status mirrors its voucher and is not independently modifiable once
/// posted (spec §3 `Payment`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus {
    Draft,
    Posted,
    Reversed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub company_id: CompanyId,
    pub party_id: PartyId,
    pub voucher_id: Option<VoucherId>,
    pub payment_type: PaymentType,
    pub bank_account: String,
    pub payment_mode: String,
    pub amount: Decimal,
    pub status: PaymentStatus,
}

/// `amount_applied` lines are only created while the payment is `DRAFT`
/// (spec §3 `PaymentLine`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentLine {
    pub id: PaymentLineId,
    pub payment_id: PaymentId,
    pub invoice_id: InvoiceId,
    pub amount_applied: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatePartyRequest {
    pub company_id: CompanyId,
    pub party_type: PartyType,
    pub control_ledger_id: LedgerId,
    pub credit_limit: Option<Decimal>,
    pub credit_days: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateInvoiceRequest {
    pub company_id: CompanyId,
    pub party_id: PartyId,
    pub invoice_type: InvoiceType,
    pub invoice_number: String,
    pub sales_order_id: Option<String>,
    pub purchase_order_id: Option<String>,
    pub total_value: Decimal,
    pub due_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatePaymentRequest {
    pub company_id: CompanyId,
    pub party_id: PartyId,
    pub payment_type: PaymentType,
    pub bank_account: String,
    pub payment_mode: String,
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocatePaymentRequest {
    pub payment_id: PaymentId,
    pub invoice_id: InvoiceId,
    pub amount: Decimal,
}

/// `check_credit` (spec §4.10): no check when `credit_limit` is absent or
/// non-positive, otherwise `outstanding_for_party + additional_amount` must
/// not exceed it.
pub fn check_credit(
    credit_limit: Option<Decimal>,
    current_outstanding: Decimal,
    additional_amount: Decimal,
) -> ReceivablesResult<()> {
    let Some(limit) = credit_limit.filter(|limit| *limit > Decimal::ZERO) else {
        return Ok(());
    };
    let projected = current_outstanding + additional_amount;
    if projected > limit {
        return Err(ReceivablesError::CreditLimitExceeded {
            current_outstanding,
            available: (limit - current_outstanding).max(Decimal::ZERO),
            limit,
        });
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgingBucket {
    Days0To30,
    Days31To60,
    Days61To90,
    Over90,
}

impl AgingBucket {
    #[must_use]
    pub fn for_days_overdue(days: i64) -> Self {
        let days = days.max(0);
        if days <= 30 {
            AgingBucket::Days0To30
        } else if days <= 60 {
            AgingBucket::Days31To60
        } else if days <= 90 {
            AgingBucket::Days61To90
        } else {
            AgingBucket::Over90
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgingBuckets {
    pub days_0_to_30: Decimal,
    pub days_31_to_60: Decimal,
    pub days_61_to_90: Decimal,
    pub over_90: Decimal,
}

impl AgingBuckets {
    fn add(&mut self, bucket: AgingBucket, amount: Decimal) {
        match bucket {
            AgingBucket::Days0To30 => self.days_0_to_30 += amount,
            AgingBucket::Days31To60 => self.days_31_to_60 += amount,
            AgingBucket::Days61To90 => self.days_61_to_90 += amount,
            AgingBucket::Over90 => self.over_90 += amount,
        }
    }

    #[must_use]
    pub fn total(&self) -> Decimal {
        self.days_0_to_30 + self.days_31_to_60 + self.days_61_to_90 + self.over_90
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartyAging {
    pub party_id: PartyId,
    pub buckets: AgingBuckets,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgingReport {
    pub company_id: CompanyId,
    pub as_of: NaiveDate,
    pub by_party: Vec<PartyAging>,
    pub company_total: AgingBuckets,
    pub is_balanced: bool,
}

/// `aging(company, as_of)` (spec §4.11). Idempotent for a given
/// `(company, as_of)`; the per-party/company totals are cross-checked with
/// `is_balanced` as a self-check rather than trusted blindly.
#[must_use]
pub fn aging(company_id: &CompanyId, as_of: NaiveDate, invoices: &[Invoice]) -> AgingReport {
    let mut by_party: HashMap<PartyId, AgingBuckets> = HashMap::new();
    for invoice in invoices.iter().filter(|invoice| invoice.is_outstanding()) {
        let days_overdue = (as_of - invoice.due_date).num_days();
        let bucket = AgingBucket::for_days_overdue(days_overdue);
        by_party
            .entry(invoice.party_id.clone())
            .or_default()
            .add(bucket, invoice.outstanding());
    }

    let mut by_party: Vec<PartyAging> = by_party
        .into_iter()
        .map(|(party_id, buckets)| PartyAging { party_id, buckets })
        .collect();
    by_party.sort_by(|a, b| a.party_id.cmp(&b.party_id));

    let mut company_total = AgingBuckets::default();
    for party in &by_party {
        company_total.days_0_to_30 += party.buckets.days_0_to_30;
        company_total.days_31_to_60 += party.buckets.days_31_to_60;
        company_total.days_61_to_90 += party.buckets.days_61_to_90;
        company_total.over_90 += party.buckets.over_90;
    }
    let sum_of_parties: Decimal = by_party.iter().map(|party| party.buckets.total()).sum();
    let is_balanced = company_total.total() == sum_of_parties;

    AgingReport {
        company_id: company_id.clone(),
        as_of,
        by_party,
        company_total,
        is_balanced,
    }
}

#[async_trait]
pub trait ReceivablesService: Send + Sync {
    async fn create_party(&self, request: CreatePartyRequest) -> ReceivablesResult<Party>;
    async fn get_party(&self, company_id: &CompanyId, party_id: &PartyId) -> ReceivablesResult<Party>;

    async fn create_invoice(&self, request: CreateInvoiceRequest) -> ReceivablesResult<Invoice>;
    async fn get_invoice(&self, company_id: &CompanyId, invoice_id: &InvoiceId) -> ReceivablesResult<Invoice>;
    async fn list_outstanding_invoices(&self, company_id: &CompanyId) -> ReceivablesResult<Vec<Invoice>>;

    /// Attaches `voucher_id` to the invoice and moves it out of `DRAFT`
    /// (spec §4.6).
    async fn attach_voucher(
        &self,
        invoice_id: &InvoiceId,
        voucher_id: VoucherId,
    ) -> ReceivablesResult<Invoice>;

    async fn create_payment(&self, request: CreatePaymentRequest) -> ReceivablesResult<Payment>;
    async fn get_payment(&self, payment_id: &PaymentId) -> ReceivablesResult<Payment>;

    /// Adds a `PaymentLine` while the payment is `DRAFT`, rejecting an
    /// allocation that would exceed the invoice's remaining outstanding
    /// (spec §3 `PaymentLine` invariant).
    async fn allocate_payment(
        &self,
        request: AllocatePaymentRequest,
    ) -> ReceivablesResult<PaymentLine>;

    async fn remove_allocation(
        &self,
        payment_id: &PaymentId,
        line_id: &PaymentLineId,
    ) -> ReceivablesResult<()>;

    /// Attaches `voucher_id`, marks the payment `POSTED`, and refreshes
    /// every invoice touched by its allocations (spec §4.9 trigger).
    async fn mark_posted(
        &self,
        payment_id: &PaymentId,
        voucher_id: VoucherId,
    ) -> ReceivablesResult<Payment>;

    /// Marks the payment `REVERSED` and refreshes every invoice touched by
    /// its allocations, excluding them from `amount_received` (spec §4.9,
    /// §4.7 "reversal reverts invoice status").
    async fn mark_reversed(&self, payment_id: &PaymentId) -> ReceivablesResult<Payment>;

    async fn outstanding_for_party(
        &self,
        company_id: &CompanyId,
        party_id: &PartyId,
    ) -> ReceivablesResult<Decimal>;

    async fn check_credit_for_party(
        &self,
        company_id: &CompanyId,
        party_id: &PartyId,
        additional_amount: Decimal,
    ) -> ReceivablesResult<()>;

    async fn aging_report(&self, company_id: &CompanyId, as_of: NaiveDate) -> ReceivablesResult<AgingReport>;
}
