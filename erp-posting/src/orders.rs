use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use erp_inventory::GodownId;
use erp_inventory::InventoryError;
use erp_inventory::InventoryService;
use erp_inventory::StockItemId;
use erp_receivables::PartyId;
use erp_receivables::ReceivablesError;
use erp_receivables::ReceivablesService;
use rust_decimal::Decimal;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::CompanyId;

pub type SalesOrderId = String;
pub type PurchaseOrderId = String;
pub type OrderLineId = String;

pub type OrdersResult<T> = Result<T, OrdersError>;

/// Stable error codes for order confirmation (spec §4.10, §6 "Orders").
#[derive(Debug, Error)]
pub enum OrdersError {
    #[error("sales order {0} not found")]
    SalesOrderNotFound(SalesOrderId),
    #[error("purchase order {0} not found")]
    PurchaseOrderNotFound(PurchaseOrderId),
    #[error("order {0} is not in DRAFT state")]
    NotDraft(String),
    #[error("order {0} has no lines")]
    NoLines(String),
    #[error("insufficient stock for item {item} in godown {godown}: requested {requested}, available {available}")]
    InsufficientStock {
        item: StockItemId,
        godown: GodownId,
        requested: Decimal,
        available: Decimal,
    },
    #[error(transparent)]
    Receivables(#[from] ReceivablesError),
    #[error(transparent)]
    Inventory(#[from] InventoryError),
    #[error("validation error: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    Draft,
    Confirmed,
    Invoiced,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderLine {
    pub id: OrderLineId,
    pub item_id: StockItemId,
    pub quantity: Decimal,
    pub rate: Decimal,
}

impl OrderLine {
    #[must_use]
    pub fn amount(&self) -> Decimal {
        self.quantity * self.rate
    }
}

/// Sales and purchase orders share the `OrderLine` shape but are kept as two
/// distinct entities rather than one polymorphic `OrderItem` table (spec §9
/// design note names the discriminator-column approach as the alternative;
/// this crate picks separate structs instead since their confirm-time
/// side-effects — credit and stock checks for sales, none yet for purchase
/// — are not actually shared behavior).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SalesOrder {
    pub id: SalesOrderId,
    pub company_id: CompanyId,
    pub party_id: PartyId,
    pub godown_id: GodownId,
    pub status: OrderStatus,
    pub lines: Vec<OrderLine>,
}

impl SalesOrder {
    #[must_use]
    pub fn total(&self) -> Decimal {
        self.lines.iter().map(OrderLine::amount).sum()
    }
}

/// Purchase orders carry no inventory or credit gate at confirm time: goods
/// receipt and supplier payment terms are out of this core's scope (spec
/// §4.6 "for a PURCHASE invoice, inventory is handled separately by
/// goods-receipt"), so this is deliberately a thinner sibling of
/// `SalesOrder`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseOrder {
    pub id: PurchaseOrderId,
    pub company_id: CompanyId,
    pub party_id: PartyId,
    pub status: OrderStatus,
    pub lines: Vec<OrderLine>,
}

impl PurchaseOrder {
    #[must_use]
    pub fn total(&self) -> Decimal {
        self.lines.iter().map(OrderLine::amount).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateSalesOrderRequest {
    pub company_id: CompanyId,
    pub party_id: PartyId,
    pub godown_id: GodownId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatePurchaseOrderRequest {
    pub company_id: CompanyId,
    pub party_id: PartyId,
}

#[async_trait]
pub trait OrdersService: Send + Sync {
    async fn create_sales_order(&self, request: CreateSalesOrderRequest) -> OrdersResult<SalesOrder>;
    async fn add_sales_order_item(
        &self,
        order_id: &SalesOrderId,
        item_id: StockItemId,
        quantity: Decimal,
        rate: Decimal,
    ) -> OrdersResult<SalesOrder>;
    /// Runs credit control (`erp-receivables::check_credit_for_party`) and a
    /// stock availability check (`erp-inventory::get_balance`) before moving
    /// the order to `CONFIRMED` (spec §4.10, §6 "Orders").
    async fn confirm_sales_order(&self, order_id: &SalesOrderId) -> OrdersResult<SalesOrder>;
    async fn cancel_sales_order(&self, order_id: &SalesOrderId, reason: String) -> OrdersResult<SalesOrder>;
    async fn get_sales_order(&self, company_id: &CompanyId, order_id: &SalesOrderId) -> OrdersResult<SalesOrder>;
    /// Marks the order `INVOICED` once its invoice has posted (spec §4.6).
    async fn mark_sales_order_invoiced(&self, order_id: &SalesOrderId) -> OrdersResult<SalesOrder>;

    async fn create_purchase_order(&self, request: CreatePurchaseOrderRequest) -> OrdersResult<PurchaseOrder>;
    async fn add_purchase_order_item(
        &self,
        order_id: &PurchaseOrderId,
        item_id: StockItemId,
        quantity: Decimal,
        rate: Decimal,
    ) -> OrdersResult<PurchaseOrder>;
    async fn confirm_purchase_order(&self, order_id: &PurchaseOrderId) -> OrdersResult<PurchaseOrder>;
    async fn cancel_purchase_order(&self, order_id: &PurchaseOrderId, reason: String) -> OrdersResult<PurchaseOrder>;
    async fn get_purchase_order(
        &self,
        company_id: &CompanyId,
        order_id: &PurchaseOrderId,
    ) -> OrdersResult<PurchaseOrder>;
}

struct OrdersState {
    sales_orders: HashMap<SalesOrderId, SalesOrder>,
    purchase_orders: HashMap<PurchaseOrderId, PurchaseOrder>,
}

/// In-memory `OrdersService`. Confirm-time gates delegate to the real
/// receivables and inventory services rather than duplicating their logic.
pub struct InMemoryOrdersService {
    state: RwLock<OrdersState>,
    receivables: Arc<dyn ReceivablesService>,
    inventory: Arc<dyn InventoryService>,
}

impl InMemoryOrdersService {
    #[must_use]
    pub fn new(receivables: Arc<dyn ReceivablesService>, inventory: Arc<dyn InventoryService>) -> Self {
        Self {
            state: RwLock::new(OrdersState {
                sales_orders: HashMap::new(),
                purchase_orders: HashMap::new(),
            }),
            receivables,
            inventory,
        }
    }

    fn generate_id() -> String {
        Uuid::new_v4().to_string()
    }
}

#[async_trait]
impl OrdersService for InMemoryOrdersService {
    async fn create_sales_order(&self, request: CreateSalesOrderRequest) -> OrdersResult<SalesOrder> {
        let order = SalesOrder {
            id: Self::generate_id(),
            company_id: request.company_id,
            party_id: request.party_id,
            godown_id: request.godown_id,
            status: OrderStatus::Draft,
            lines: Vec::new(),
        };
        self.state
            .write()
            .await
            .sales_orders
            .insert(order.id.clone(), order.clone());
        Ok(order)
    }

    async fn add_sales_order_item(
        &self,
        order_id: &SalesOrderId,
        item_id: StockItemId,
        quantity: Decimal,
        rate: Decimal,
    ) -> OrdersResult<SalesOrder> {
        if quantity <= Decimal::ZERO {
            return Err(OrdersError::Validation("quantity must be positive".into()));
        }
        let mut guard = self.state.write().await;
        let order = guard
            .sales_orders
            .get_mut(order_id)
            .ok_or_else(|| OrdersError::SalesOrderNotFound(order_id.clone()))?;
        if order.status != OrderStatus::Draft {
            return Err(OrdersError::NotDraft(order_id.clone()));
        }
        order.lines.push(OrderLine {
            id: Self::generate_id(),
            item_id,
            quantity,
            rate,
        });
        Ok(order.clone())
    }

    async fn confirm_sales_order(&self, order_id: &SalesOrderId) -> OrdersResult<SalesOrder> {
        let (company_id, party_id, godown_id, total, lines) = {
            let guard = self.state.read().await;
            let order = guard
                .sales_orders
                .get(order_id)
                .ok_or_else(|| OrdersError::SalesOrderNotFound(order_id.clone()))?;
            if order.status != OrderStatus::Draft {
                return Err(OrdersError::NotDraft(order_id.clone()));
            }
            if order.lines.is_empty() {
                return Err(OrdersError::NoLines(order_id.clone()));
            }
            (
                order.company_id.clone(),
                order.party_id.clone(),
                order.godown_id.clone(),
                order.total(),
                order.lines.clone(),
            )
        };

        self.receivables
            .check_credit_for_party(&company_id, &party_id, total)
            .await?;

        for line in &lines {
            let balance = self
                .inventory
                .get_balance(&company_id, &line.item_id, &godown_id, None)
                .await?;
            if balance.quantity_on_hand < line.quantity {
                return Err(OrdersError::InsufficientStock {
                    item: line.item_id.clone(),
                    godown: godown_id.clone(),
                    requested: line.quantity,
                    available: balance.quantity_on_hand,
                });
            }
        }

        let mut guard = self.state.write().await;
        let order = guard
            .sales_orders
            .get_mut(order_id)
            .ok_or_else(|| OrdersError::SalesOrderNotFound(order_id.clone()))?;
        order.status = OrderStatus::Confirmed;
        Ok(order.clone())
    }

    async fn cancel_sales_order(&self, order_id: &SalesOrderId, _reason: String) -> OrdersResult<SalesOrder> {
        let mut guard = self.state.write().await;
        let order = guard
            .sales_orders
            .get_mut(order_id)
            .ok_or_else(|| OrdersError::SalesOrderNotFound(order_id.clone()))?;
        if order.status == OrderStatus::Invoiced {
            return Err(OrdersError::NotDraft(order_id.clone()));
        }
        order.status = OrderStatus::Cancelled;
        Ok(order.clone())
    }

    async fn get_sales_order(&self, company_id: &CompanyId, order_id: &SalesOrderId) -> OrdersResult<SalesOrder> {
        let guard = self.state.read().await;
        let order = guard
            .sales_orders
            .get(order_id)
            .ok_or_else(|| OrdersError::SalesOrderNotFound(order_id.clone()))?;
        if order.company_id != *company_id {
            return Err(OrdersError::SalesOrderNotFound(order_id.clone()));
        }
        Ok(order.clone())
    }

    async fn mark_sales_order_invoiced(&self, order_id: &SalesOrderId) -> OrdersResult<SalesOrder> {
        let mut guard = self.state.write().await;
        let order = guard
            .sales_orders
            .get_mut(order_id)
            .ok_or_else(|| OrdersError::SalesOrderNotFound(order_id.clone()))?;
        order.status = OrderStatus::Invoiced;
        Ok(order.clone())
    }

    async fn create_purchase_order(&self, request: CreatePurchaseOrderRequest) -> OrdersResult<PurchaseOrder> {
        let order = PurchaseOrder {
            id: Self::generate_id(),
            company_id: request.company_id,
            party_id: request.party_id,
            status: OrderStatus::Draft,
            lines: Vec::new(),
        };
        self.state
            .write()
            .await
            .purchase_orders
            .insert(order.id.clone(), order.clone());
        Ok(order)
    }

    async fn add_purchase_order_item(
        &self,
        order_id: &PurchaseOrderId,
        item_id: StockItemId,
        quantity: Decimal,
        rate: Decimal,
    ) -> OrdersResult<PurchaseOrder> {
        if quantity <= Decimal::ZERO {
            return Err(OrdersError::Validation("quantity must be positive".into()));
        }
        let mut guard = self.state.write().await;
        let order = guard
            .purchase_orders
            .get_mut(order_id)
            .ok_or_else(|| OrdersError::PurchaseOrderNotFound(order_id.clone()))?;
        if order.status != OrderStatus::Draft {
            return Err(OrdersError::NotDraft(order_id.clone()));
        }
        order.lines.push(OrderLine {
            id: Self::generate_id(),
            item_id,
            quantity,
            rate,
        });
        Ok(order.clone())
    }

    async fn confirm_purchase_order(&self, order_id: &PurchaseOrderId) -> OrdersResult<PurchaseOrder> {
        let mut guard = self.state.write().await;
        let order = guard
            .purchase_orders
            .get_mut(order_id)
            .ok_or_else(|| OrdersError::PurchaseOrderNotFound(order_id.clone()))?;
        if order.status != OrderStatus::Draft {
            return Err(OrdersError::NotDraft(order_id.clone()));
        }
        if order.lines.is_empty() {
            return Err(OrdersError::NoLines(order_id.clone()));
        }
        order.status = OrderStatus::Confirmed;
        Ok(order.clone())
    }

    async fn cancel_purchase_order(&self, order_id: &PurchaseOrderId, _reason: String) -> OrdersResult<PurchaseOrder> {
        let mut guard = self.state.write().await;
        let order = guard
            .purchase_orders
            .get_mut(order_id)
            .ok_or_else(|| OrdersError::PurchaseOrderNotFound(order_id.clone()))?;
        order.status = OrderStatus::Cancelled;
        Ok(order.clone())
    }

    async fn get_purchase_order(
        &self,
        company_id: &CompanyId,
        order_id: &PurchaseOrderId,
    ) -> OrdersResult<PurchaseOrder> {
        let guard = self.state.read().await;
        let order = guard
            .purchase_orders
            .get(order_id)
            .ok_or_else(|| OrdersError::PurchaseOrderNotFound(order_id.clone()))?;
        if order.company_id != *company_id {
            return Err(OrdersError::PurchaseOrderNotFound(order_id.clone()));
        }
        Ok(order.clone())
    }
}
