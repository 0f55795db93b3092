#![deny(clippy::print_stdout, clippy::print_stderr)]

use chrono::NaiveDate;
use rust_decimal::Decimal;
use thiserror::Error;

mod memory;

pub use memory::InMemoryInventoryService;

pub type CompanyId = String;
pub type GodownId = String;
pub type StockItemId = String;
pub type StockBatchId = String;
pub type StockMovementId = String;
pub type VoucherId = String;

pub type InventoryResult<T> = Result<T, InventoryError>;

/// Stable error codes for FIFO allocation and movement validation (spec §7 "Inventory").
#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("stock item {0} not found")]
    StockItemNotFound(StockItemId),
    #[error("godown {0} not found")]
    GodownNotFound(GodownId),
    #[error("insufficient stock for item {item} in godown {godown}: requested {requested}, available {available}")]
    InsufficientStock {
        item: StockItemId,
        godown: GodownId,
        requested: Decimal,
        available: Decimal,
    },
    #[error("no batches available for item {item} in godown {godown}")]
    NoBatchesAvailable { item: StockItemId, godown: GodownId },
    #[error("invalid movement endpoints: exactly one of from/to godown must be set for a pure movement")]
    InvalidMovementEndpoints,
    #[error("movement quantity must be positive, got {0}")]
    NonPositiveQuantity(Decimal),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("conflict: {0}")]
    Conflict(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Godown {
    pub id: GodownId,
    pub company_id: CompanyId,
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockItem {
    pub id: StockItemId,
    pub company_id: CompanyId,
    pub sku: String,
    pub uom: String,
    pub is_stock_item: bool,
    pub is_active: bool,
}

/// A production/purchase lot, the unit of FIFO allocation (spec §3 `StockBatch`).
/// Batches are never modified after creation and are never deleted by an
/// outbound movement — only consumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockBatch {
    pub id: StockBatchId,
    pub company_id: CompanyId,
    pub item_id: StockItemId,
    pub godown_id: GodownId,
    pub batch_number: String,
    pub mfg_date: Option<NaiveDate>,
    pub exp_date: Option<NaiveDate>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// `(mfg_date ASC NULLS LAST, created_at ASC)` as an explicit sort key, so the
/// FIFO tie-break is visible at the call site rather than relying on
/// declaration order (spec §3, supplemented).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSortKey {
    mfg_date_rank: NullsLastDate,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl PartialOrd for BatchSortKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BatchSortKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.mfg_date_rank
            .cmp(&other.mfg_date_rank)
            .then_with(|| self.created_at.cmp(&other.created_at))
    }
}

impl StockBatch {
    #[must_use]
    pub fn sort_key(&self) -> BatchSortKey {
        BatchSortKey {
            mfg_date_rank: NullsLastDate(self.mfg_date),
            created_at: self.created_at,
        }
    }
}

/// `None` (no manufacture date recorded) sorts after every `Some` date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct NullsLastDate(Option<NaiveDate>);

impl PartialOrd for NullsLastDate {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for NullsLastDate {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        match (self.0, other.0) {
            (Some(a), Some(b)) => a.cmp(&b),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MovementKind {
    Inbound,
    Outbound,
    Transfer,
}

/// Append-only audit trail row; every movement references exactly one voucher
/// (spec §3 `StockMovement`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockMovement {
    pub id: StockMovementId,
    pub company_id: CompanyId,
    pub voucher_id: VoucherId,
    pub item_id: StockItemId,
    pub from_godown_id: Option<GodownId>,
    pub to_godown_id: Option<GodownId>,
    pub batch_id: Option<StockBatchId>,
    pub quantity: Decimal,
    pub rate: Decimal,
    pub movement_date: NaiveDate,
}

impl StockMovement {
    pub fn kind(&self) -> InventoryResult<MovementKind> {
        match (&self.from_godown_id, &self.to_godown_id) {
            (Some(_), Some(_)) => Ok(MovementKind::Transfer),
            (Some(_), None) => Ok(MovementKind::Outbound),
            (None, Some(_)) => Ok(MovementKind::Inbound),
            (None, None) => Err(InventoryError::InvalidMovementEndpoints),
        }
    }
}

/// Derived cache: `quantity_on_hand = Σ inbound − Σ outbound` restricted to
/// `(item, godown, batch)`; never negative (spec §3 `StockBalance`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StockBalance {
    pub quantity_on_hand: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchAllocation {
    pub batch_id: StockBatchId,
    pub quantity: Decimal,
}

/// FIFO allocation across pre-locked candidate batches (spec §4.4). The
/// caller is responsible for acquiring row locks on `candidates` in the same
/// order they appear here before calling; this function is pure arithmetic
/// over already-locked state.
pub fn allocate_fifo(
    item_id: &StockItemId,
    godown_id: &GodownId,
    quantity_requested: Decimal,
    candidates: &[(StockBatch, Decimal)],
) -> InventoryResult<Vec<BatchAllocation>> {
    if quantity_requested <= Decimal::ZERO {
        return Err(InventoryError::NonPositiveQuantity(quantity_requested));
    }
    if candidates.is_empty() {
        return Err(InventoryError::NoBatchesAvailable {
            item: item_id.clone(),
            godown: godown_id.clone(),
        });
    }

    let mut ordered: Vec<&(StockBatch, Decimal)> = candidates.iter().collect();
    ordered.sort_by_key(|(batch, _)| batch.sort_key());

    let mut remaining = quantity_requested;
    let mut allocations = Vec::new();
    for (batch, available) in ordered {
        if remaining <= Decimal::ZERO {
            break;
        }
        if *available <= Decimal::ZERO {
            continue;
        }
        let take = remaining.min(*available);
        allocations.push(BatchAllocation {
            batch_id: batch.id.clone(),
            quantity: take,
        });
        remaining -= take;
    }

    if remaining > Decimal::ZERO {
        let available_total: Decimal = candidates.iter().map(|(_, qty)| *qty).sum();
        return Err(InventoryError::InsufficientStock {
            item: item_id.clone(),
            godown: godown_id.clone(),
            requested: quantity_requested,
            available: available_total,
        });
    }

    Ok(allocations)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordInboundRequest {
    pub company_id: CompanyId,
    pub voucher_id: VoucherId,
    pub item_id: StockItemId,
    pub to_godown_id: GodownId,
    pub batch_number: String,
    pub mfg_date: Option<NaiveDate>,
    pub exp_date: Option<NaiveDate>,
    pub quantity: Decimal,
    pub rate: Decimal,
    pub movement_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordOutboundRequest {
    pub company_id: CompanyId,
    pub voucher_id: VoucherId,
    pub item_id: StockItemId,
    pub from_godown_id: GodownId,
    pub quantity: Decimal,
    pub rate: Decimal,
    pub movement_date: NaiveDate,
}

#[async_trait::async_trait]
pub trait InventoryService: Send + Sync {
    async fn create_godown(&self, godown: Godown) -> InventoryResult<Godown>;
    async fn create_stock_item(&self, item: StockItem) -> InventoryResult<StockItem>;

    /// Creates or extends a `StockBatch` and creates-or-updates the matching
    /// `StockBalance` (spec §4.4 "Inbound movements create or extend a batch").
    async fn record_inbound(&self, request: RecordInboundRequest) -> InventoryResult<StockMovement>;

    /// Runs FIFO allocation (`allocate_fifo`) against locked candidate
    /// batches and writes the resulting `StockMovement` rows, one per batch
    /// touched (spec §4.4, §4.5 step 10).
    async fn record_outbound(
        &self,
        request: RecordOutboundRequest,
    ) -> InventoryResult<Vec<StockMovement>>;

    /// Reverses every movement of `voucher_id`: appends new movements with
    /// `from`/`to` swapped, same quantity/batch/rate (spec §4.7).
    async fn reverse_voucher_movements(
        &self,
        company_id: &CompanyId,
        voucher_id: &VoucherId,
        reversal_voucher_id: VoucherId,
    ) -> InventoryResult<Vec<StockMovement>>;

    async fn get_balance(
        &self,
        company_id: &CompanyId,
        item_id: &StockItemId,
        godown_id: &GodownId,
        batch_id: Option<&StockBatchId>,
    ) -> InventoryResult<StockBalance>;

    async fn list_batches(
        &self,
        company_id: &CompanyId,
        item_id: &StockItemId,
        godown_id: &GodownId,
    ) -> InventoryResult<Vec<StockBatch>>;
}
