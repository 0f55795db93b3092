use std::collections::HashMap;

use rust_decimal::Decimal;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::CompanyId;
use crate::Godown;
use crate::GodownId;
use crate::InventoryError;
use crate::InventoryResult;
use crate::InventoryService;
use crate::RecordInboundRequest;
use crate::RecordOutboundRequest;
use crate::StockBalance;
use crate::StockBatch;
use crate::StockBatchId;
use crate::StockItem;
use crate::StockItemId;
use crate::StockMovement;
use crate::StockMovementId;
use crate::VoucherId;
use crate::allocate_fifo;

type BalanceKey = (CompanyId, StockItemId, GodownId, Option<StockBatchId>);

#[derive(Default)]
struct InventoryState {
    godowns: HashMap<GodownId, Godown>,
    items: HashMap<StockItemId, StockItem>,
    batches: HashMap<StockBatchId, StockBatch>,
    balances: HashMap<BalanceKey, StockBalance>,
    movements_by_voucher: HashMap<VoucherId, Vec<StockMovementId>>,
    movements: HashMap<StockMovementId, StockMovement>,
}

pub struct InMemoryInventoryService {
    state: RwLock<InventoryState>,
}

impl InMemoryInventoryService {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RwLock::new(InventoryState::default()),
        }
    }

    fn generate_id() -> String {
        Uuid::new_v4().to_string()
    }

    fn balance_key(
        company_id: &CompanyId,
        item_id: &StockItemId,
        godown_id: &GodownId,
        batch_id: Option<&StockBatchId>,
    ) -> BalanceKey {
        (
            company_id.clone(),
            item_id.clone(),
            godown_id.clone(),
            batch_id.cloned(),
        )
    }

    fn record_movement(state: &mut InventoryState, movement: StockMovement) {
        state
            .movements_by_voucher
            .entry(movement.voucher_id.clone())
            .or_default()
            .push(movement.id.clone());
        state.movements.insert(movement.id.clone(), movement);
    }
}

impl Default for InMemoryInventoryService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl InventoryService for InMemoryInventoryService {
    async fn create_godown(&self, godown: Godown) -> InventoryResult<Godown> {
        let mut guard = self.state.write().await;
        guard.godowns.insert(godown.id.clone(), godown.clone());
        Ok(godown)
    }

    async fn create_stock_item(&self, item: StockItem) -> InventoryResult<StockItem> {
        let mut guard = self.state.write().await;
        guard.items.insert(item.id.clone(), item.clone());
        Ok(item)
    }

    async fn record_inbound(&self, request: RecordInboundRequest) -> InventoryResult<StockMovement> {
        if request.quantity <= Decimal::ZERO {
            return Err(InventoryError::NonPositiveQuantity(request.quantity));
        }
        let mut guard = self.state.write().await;

        let existing_batch = guard.batches.values().find(|batch| {
            batch.company_id == request.company_id
                && batch.item_id == request.item_id
                && batch.godown_id == request.to_godown_id
                && batch.batch_number == request.batch_number
        });

        let batch_id = if let Some(batch) = existing_batch {
            batch.id.clone()
        } else {
            let batch = StockBatch {
                id: Self::generate_id(),
                company_id: request.company_id.clone(),
                item_id: request.item_id.clone(),
                godown_id: request.to_godown_id.clone(),
                batch_number: request.batch_number.clone(),
                mfg_date: request.mfg_date,
                exp_date: request.exp_date,
                created_at: chrono::Utc::now(),
            };
            let id = batch.id.clone();
            guard.batches.insert(id.clone(), batch);
            id
        };

        let key = Self::balance_key(
            &request.company_id,
            &request.item_id,
            &request.to_godown_id,
            Some(&batch_id),
        );
        let balance = guard.balances.entry(key).or_default();
        balance.quantity_on_hand += request.quantity;

        let movement = StockMovement {
            id: Self::generate_id(),
            company_id: request.company_id,
            voucher_id: request.voucher_id,
            item_id: request.item_id,
            from_godown_id: None,
            to_godown_id: Some(request.to_godown_id),
            batch_id: Some(batch_id),
            quantity: request.quantity,
            rate: request.rate,
            movement_date: request.movement_date,
        };
        Self::record_movement(&mut guard, movement.clone());
        Ok(movement)
    }

    async fn record_outbound(
        &self,
        request: RecordOutboundRequest,
    ) -> InventoryResult<Vec<StockMovement>> {
        if request.quantity <= Decimal::ZERO {
            return Err(InventoryError::NonPositiveQuantity(request.quantity));
        }
        let mut guard = self.state.write().await;

        let candidates: Vec<(StockBatch, Decimal)> = guard
            .batches
            .values()
            .filter(|batch| {
                batch.company_id == request.company_id
                    && batch.item_id == request.item_id
                    && batch.godown_id == request.from_godown_id
            })
            .map(|batch| {
                let key = Self::balance_key(
                    &request.company_id,
                    &request.item_id,
                    &request.from_godown_id,
                    Some(&batch.id),
                );
                let available = guard
                    .balances
                    .get(&key)
                    .map_or(Decimal::ZERO, |balance| balance.quantity_on_hand);
                (batch.clone(), available)
            })
            .collect();

        let allocations = allocate_fifo(
            &request.item_id,
            &request.from_godown_id,
            request.quantity,
            &candidates,
        )?;

        let mut movements = Vec::with_capacity(allocations.len());
        for allocation in allocations {
            let key = Self::balance_key(
                &request.company_id,
                &request.item_id,
                &request.from_godown_id,
                Some(&allocation.batch_id),
            );
            let balance = guard.balances.entry(key).or_default();
            balance.quantity_on_hand -= allocation.quantity;

            let movement = StockMovement {
                id: Self::generate_id(),
                company_id: request.company_id.clone(),
                voucher_id: request.voucher_id.clone(),
                item_id: request.item_id.clone(),
                from_godown_id: Some(request.from_godown_id.clone()),
                to_godown_id: None,
                batch_id: Some(allocation.batch_id),
                quantity: allocation.quantity,
                rate: request.rate,
                movement_date: request.movement_date,
            };
            Self::record_movement(&mut guard, movement.clone());
            movements.push(movement);
        }
        Ok(movements)
    }

    async fn reverse_voucher_movements(
        &self,
        company_id: &CompanyId,
        voucher_id: &VoucherId,
        reversal_voucher_id: VoucherId,
    ) -> InventoryResult<Vec<StockMovement>> {
        let mut guard = self.state.write().await;
        let movement_ids = guard
            .movements_by_voucher
            .get(voucher_id)
            .cloned()
            .unwrap_or_default();

        let originals: Vec<StockMovement> = movement_ids
            .iter()
            .filter_map(|id| guard.movements.get(id).cloned())
            .filter(|movement| movement.company_id == *company_id)
            .collect();

        let mut reversed = Vec::with_capacity(originals.len());
        for original in originals {
            if let Some(from) = &original.from_godown_id {
                let key = Self::balance_key(company_id, &original.item_id, from, original.batch_id.as_ref());
                let balance = guard.balances.entry(key).or_default();
                balance.quantity_on_hand += original.quantity;
            }
            if let Some(to) = &original.to_godown_id {
                let key = Self::balance_key(company_id, &original.item_id, to, original.batch_id.as_ref());
                let balance = guard.balances.entry(key).or_default();
                balance.quantity_on_hand -= original.quantity;
            }

            let movement = StockMovement {
                id: Self::generate_id(),
                company_id: company_id.clone(),
                voucher_id: reversal_voucher_id.clone(),
                item_id: original.item_id.clone(),
                from_godown_id: original.to_godown_id.clone(),
                to_godown_id: original.from_godown_id.clone(),
                batch_id: original.batch_id.clone(),
                quantity: original.quantity,
                rate: original.rate,
                movement_date: original.movement_date,
            };
            Self::record_movement(&mut guard, movement.clone());
            reversed.push(movement);
        }
        Ok(reversed)
    }

    async fn get_balance(
        &self,
        company_id: &CompanyId,
        item_id: &StockItemId,
        godown_id: &GodownId,
        batch_id: Option<&StockBatchId>,
    ) -> InventoryResult<StockBalance> {
        let guard = self.state.read().await;
        if let Some(batch_id) = batch_id {
            let key = Self::balance_key(company_id, item_id, godown_id, Some(batch_id));
            return Ok(guard.balances.get(&key).copied().unwrap_or_default());
        }
        let total = guard
            .balances
            .iter()
            .filter(|((c, i, g, _), _)| c == company_id && i == item_id && g == godown_id)
            .map(|(_, balance)| balance.quantity_on_hand)
            .sum();
        Ok(StockBalance {
            quantity_on_hand: total,
        })
    }

    async fn list_batches(
        &self,
        company_id: &CompanyId,
        item_id: &StockItemId,
        godown_id: &GodownId,
    ) -> InventoryResult<Vec<StockBatch>> {
        let guard = self.state.read().await;
        let mut batches: Vec<_> = guard
            .batches
            .values()
            .filter(|batch| {
                batch.company_id == *company_id
                    && batch.item_id == *item_id
                    && batch.godown_id == *godown_id
            })
            .cloned()
            .collect();
        batches.sort_by_key(StockBatch::sort_key);
        Ok(batches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("valid date")
    }

    #[tokio::test]
    async fn inbound_creates_batch_and_balance() {
        let service = InMemoryInventoryService::new();
        let movement = service
            .record_inbound(RecordInboundRequest {
                company_id: "co-1".into(),
                voucher_id: "v1".into(),
                item_id: "item-1".into(),
                to_godown_id: "gd-1".into(),
                batch_number: "B1".into(),
                mfg_date: Some(date("2024-01-01")),
                exp_date: None,
                quantity: dec!(10),
                rate: dec!(50),
                movement_date: date("2024-01-05"),
            })
            .await
            .expect("inbound movement");

        let balance = service
            .get_balance(&"co-1".to_string(), &"item-1".to_string(), &"gd-1".to_string(), None)
            .await
            .expect("balance");
        assert_eq!(balance.quantity_on_hand, dec!(10));
        assert!(movement.to_godown_id.is_some());
    }

    #[tokio::test]
    async fn outbound_allocates_fifo_and_never_goes_negative() {
        let service = InMemoryInventoryService::new();
        service
            .record_inbound(RecordInboundRequest {
                company_id: "co-1".into(),
                voucher_id: "v1".into(),
                item_id: "item-1".into(),
                to_godown_id: "gd-1".into(),
                batch_number: "B1".into(),
                mfg_date: Some(date("2024-01-01")),
                exp_date: None,
                quantity: dec!(10),
                rate: dec!(50),
                movement_date: date("2024-01-05"),
            })
            .await
            .expect("inbound 1");
        service
            .record_inbound(RecordInboundRequest {
                company_id: "co-1".into(),
                voucher_id: "v2".into(),
                item_id: "item-1".into(),
                to_godown_id: "gd-1".into(),
                batch_number: "B2".into(),
                mfg_date: Some(date("2024-02-01")),
                exp_date: None,
                quantity: dec!(20),
                rate: dec!(55),
                movement_date: date("2024-02-05"),
            })
            .await
            .expect("inbound 2");

        let movements = service
            .record_outbound(RecordOutboundRequest {
                company_id: "co-1".into(),
                voucher_id: "v3".into(),
                item_id: "item-1".into(),
                from_godown_id: "gd-1".into(),
                quantity: dec!(15),
                rate: dec!(60),
                movement_date: date("2024-03-01"),
            })
            .await
            .expect("outbound");

        assert_eq!(movements.len(), 2);
        assert_eq!(movements[0].quantity, dec!(10));
        assert_eq!(movements[1].quantity, dec!(5));

        let balance = service
            .get_balance(&"co-1".to_string(), &"item-1".to_string(), &"gd-1".to_string(), None)
            .await
            .expect("balance");
        assert_eq!(balance.quantity_on_hand, dec!(15));
    }

    #[tokio::test]
    async fn insufficient_stock_writes_no_movements() {
        let service = InMemoryInventoryService::new();
        service
            .record_inbound(RecordInboundRequest {
                company_id: "co-1".into(),
                voucher_id: "v1".into(),
                item_id: "item-1".into(),
                to_godown_id: "gd-1".into(),
                batch_number: "B1".into(),
                mfg_date: Some(date("2024-01-01")),
                exp_date: None,
                quantity: dec!(5),
                rate: dec!(50),
                movement_date: date("2024-01-05"),
            })
            .await
            .expect("inbound");

        let err = service
            .record_outbound(RecordOutboundRequest {
                company_id: "co-1".into(),
                voucher_id: "v2".into(),
                item_id: "item-1".into(),
                from_godown_id: "gd-1".into(),
                quantity: dec!(10),
                rate: dec!(60),
                movement_date: date("2024-02-01"),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, InventoryError::InsufficientStock { .. }));

        let balance = service
            .get_balance(&"co-1".to_string(), &"item-1".to_string(), &"gd-1".to_string(), None)
            .await
            .expect("balance");
        assert_eq!(balance.quantity_on_hand, dec!(5));
    }

    #[tokio::test]
    async fn reversal_swaps_endpoints_and_restores_balance() {
        let service = InMemoryInventoryService::new();
        service
            .record_inbound(RecordInboundRequest {
                company_id: "co-1".into(),
                voucher_id: "v1".into(),
                item_id: "item-1".into(),
                to_godown_id: "gd-1".into(),
                batch_number: "B1".into(),
                mfg_date: Some(date("2024-01-01")),
                exp_date: None,
                quantity: dec!(10),
                rate: dec!(50),
                movement_date: date("2024-01-05"),
            })
            .await
            .expect("inbound");
        service
            .record_outbound(RecordOutboundRequest {
                company_id: "co-1".into(),
                voucher_id: "v1".into(),
                item_id: "item-1".into(),
                from_godown_id: "gd-1".into(),
                quantity: dec!(4),
                rate: dec!(55),
                movement_date: date("2024-02-01"),
            })
            .await
            .expect("outbound");

        let before = service
            .get_balance(&"co-1".to_string(), &"item-1".to_string(), &"gd-1".to_string(), None)
            .await
            .expect("balance");
        assert_eq!(before.quantity_on_hand, dec!(6));

        service
            .reverse_voucher_movements(&"co-1".to_string(), &"v1".to_string(), "v1-rev".into())
            .await
            .expect("reversal");

        let after = service
            .get_balance(&"co-1".to_string(), &"item-1".to_string(), &"gd-1".to_string(), None)
            .await
            .expect("balance");
        assert_eq!(after.quantity_on_hand, dec!(10));
    }
}
