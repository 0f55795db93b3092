#![deny(clippy::print_stdout, clippy::print_stderr)]

use erp_approvals::ApprovalsError;
use erp_inventory::InventoryError;
use erp_ledger::LedgerError;
use erp_receivables::ReceivablesError;
use erp_tenancy::TenancyError;
use thiserror::Error;

mod idempotency;
mod orders;
mod service;

pub use erp_ledger::VoucherId;
pub use idempotency::IdempotencyRecord;
pub use orders::CreatePurchaseOrderRequest;
pub use orders::CreateSalesOrderRequest;
pub use orders::OrderLine;
pub use orders::OrderLineId;
pub use orders::OrderStatus;
pub use orders::OrdersError;
pub use orders::OrdersResult;
pub use orders::OrdersService;
pub use orders::PurchaseOrder;
pub use orders::PurchaseOrderId;
pub use orders::SalesOrder;
pub use orders::SalesOrderId;
pub use service::InMemoryPostingService;
pub use service::InvoicePostingRequest;
pub use service::PostingService;

pub type CompanyId = String;

pub type PostingResult<T> = Result<T, PostingError>;

/// The closed error surface the orchestrator returns (spec §7 "structured
/// error object"): every subsystem's stable codes plus the posting-specific
/// variants the orchestration itself introduces.
#[derive(Debug, Error)]
pub enum PostingError {
    #[error(transparent)]
    Tenancy(#[from] TenancyError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Inventory(#[from] InventoryError),
    #[error(transparent)]
    Approvals(#[from] ApprovalsError),
    #[error(transparent)]
    Receivables(#[from] ReceivablesError),
    #[error(transparent)]
    Orders(#[from] OrdersError),
    #[error("voucher {0} is already posted")]
    AlreadyPosted(String),
    #[error(
        "idempotency key {key} was already used to post a different request"
    )]
    IdempotencyConflict { key: String },
    #[error("invoice {0} has no voucher attached yet")]
    InvoiceNotPosted(String),
    #[error("validation error: {0}")]
    Validation(String),
}
