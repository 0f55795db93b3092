use std::collections::HashMap;

use chrono::NaiveDate;
use tokio::sync::RwLock;

use crate::CompanyId;
use crate::EntryType;
use crate::FinancialYearId;
use crate::Ledger;
use crate::LedgerBalance;
use crate::LedgerError;
use crate::LedgerId;
use crate::LedgerResult;
use crate::LedgerService;
use crate::Voucher;
use crate::VoucherId;
use crate::VoucherLine;
use crate::VoucherStatus;
use crate::VoucherType;
use crate::VoucherTypeId;

#[derive(Clone)]
struct Sequence {
    prefix: String,
    last_value: u64,
}

#[derive(Default)]
struct LedgerState {
    ledgers: HashMap<LedgerId, Ledger>,
    voucher_types: HashMap<VoucherTypeId, VoucherType>,
    vouchers: HashMap<VoucherId, Voucher>,
    sequences: HashMap<String, Sequence>,
    balances: HashMap<(CompanyId, LedgerId, FinancialYearId), LedgerBalance>,
}

pub struct InMemoryLedgerService {
    state: RwLock<LedgerState>,
}

impl InMemoryLedgerService {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RwLock::new(LedgerState::default()),
        }
    }

    fn sequence_key(company_id: &CompanyId, voucher_type_code: &str, fy: &FinancialYearId) -> String {
        format!("{company_id}:{voucher_type_code}:{fy}")
    }

    fn apply_lines(
        state: &mut LedgerState,
        company_id: &CompanyId,
        financial_year_id: &FinancialYearId,
        lines: &[VoucherLine],
        voucher_id: &VoucherId,
    ) {
        for line in lines {
            let key = (company_id.clone(), line.ledger_id.clone(), financial_year_id.clone());
            let balance = state.balances.entry(key).or_default();
            if balance.last_posted_voucher_id.as_deref() == Some(voucher_id.as_str()) {
                continue;
            }
            match line.entry_type {
                EntryType::Debit => balance.balance_dr = balance.balance_dr.checked_add(line.amount),
                EntryType::Credit => balance.balance_cr = balance.balance_cr.checked_add(line.amount),
            }
            balance.last_posted_voucher_id = Some(voucher_id.clone());
        }
    }

    fn swapped_lines(lines: &[VoucherLine]) -> Vec<VoucherLine> {
        lines
            .iter()
            .map(|line| {
                let mut reversed = line.clone();
                reversed.entry_type = match line.entry_type {
                    EntryType::Debit => EntryType::Credit,
                    EntryType::Credit => EntryType::Debit,
                };
                reversed
            })
            .collect()
    }
}

impl Default for InMemoryLedgerService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl LedgerService for InMemoryLedgerService {
    async fn create_ledger(&self, ledger: Ledger) -> LedgerResult<Ledger> {
        let mut guard = self.state.write().await;
        if guard.ledgers.values().any(|existing| {
            existing.company_id == ledger.company_id && existing.code == ledger.code
        }) {
            return Err(LedgerError::Conflict(format!(
                "ledger code {} already exists for company {}",
                ledger.code, ledger.company_id
            )));
        }
        guard.ledgers.insert(ledger.id.clone(), ledger.clone());
        Ok(ledger)
    }

    async fn get_ledger(&self, company_id: &CompanyId, ledger_id: &LedgerId) -> LedgerResult<Ledger> {
        let guard = self.state.read().await;
        let ledger = guard
            .ledgers
            .get(ledger_id)
            .ok_or_else(|| LedgerError::LedgerNotFound(ledger_id.clone()))?;
        if ledger.company_id != *company_id {
            return Err(LedgerError::LedgerNotFound(ledger_id.clone()));
        }
        Ok(ledger.clone())
    }

    async fn list_ledgers(&self, company_id: &CompanyId) -> LedgerResult<Vec<Ledger>> {
        let guard = self.state.read().await;
        let mut ledgers: Vec<_> = guard
            .ledgers
            .values()
            .filter(|ledger| ledger.company_id == *company_id)
            .cloned()
            .collect();
        ledgers.sort_by(|left, right| left.code.cmp(&right.code));
        Ok(ledgers)
    }

    async fn create_voucher_type(&self, voucher_type: VoucherType) -> LedgerResult<VoucherType> {
        let mut guard = self.state.write().await;
        guard
            .voucher_types
            .insert(voucher_type.id.clone(), voucher_type.clone());
        Ok(voucher_type)
    }

    async fn get_voucher_type(
        &self,
        company_id: &CompanyId,
        voucher_type_id: &VoucherTypeId,
    ) -> LedgerResult<VoucherType> {
        let guard = self.state.read().await;
        let voucher_type = guard
            .voucher_types
            .get(voucher_type_id)
            .ok_or_else(|| LedgerError::VoucherTypeNotFound(voucher_type_id.clone()))?;
        if voucher_type.company_id != *company_id {
            return Err(LedgerError::VoucherTypeNotFound(voucher_type_id.clone()));
        }
        Ok(voucher_type.clone())
    }

    async fn create_draft_voucher(&self, voucher: Voucher) -> LedgerResult<Voucher> {
        let mut guard = self.state.write().await;
        guard.vouchers.insert(voucher.id.clone(), voucher.clone());
        Ok(voucher)
    }

    async fn get_voucher(&self, company_id: &CompanyId, voucher_id: &VoucherId) -> LedgerResult<Voucher> {
        let guard = self.state.read().await;
        let voucher = guard
            .vouchers
            .get(voucher_id)
            .ok_or_else(|| LedgerError::VoucherNotFound(voucher_id.clone()))?;
        if voucher.company_id != *company_id {
            return Err(LedgerError::VoucherNotFound(voucher_id.clone()));
        }
        Ok(voucher.clone())
    }

    async fn replace_draft_voucher_lines(
        &self,
        company_id: &CompanyId,
        voucher_id: &VoucherId,
        lines: Vec<VoucherLine>,
    ) -> LedgerResult<Voucher> {
        let mut guard = self.state.write().await;
        let voucher = guard
            .vouchers
            .get_mut(voucher_id)
            .ok_or_else(|| LedgerError::VoucherNotFound(voucher_id.clone()))?;
        if voucher.company_id != *company_id {
            return Err(LedgerError::VoucherNotFound(voucher_id.clone()));
        }
        if voucher.status != VoucherStatus::Draft {
            return Err(LedgerError::CannotModifyPostedVoucher(voucher_id.clone()));
        }
        voucher.lines = lines;
        Ok(voucher.clone())
    }

    async fn allocate_sequence(
        &self,
        company_id: &CompanyId,
        voucher_type_code: &str,
        financial_year_id: &FinancialYearId,
        prefix: &str,
    ) -> LedgerResult<String> {
        let mut guard = self.state.write().await;
        let key = Self::sequence_key(company_id, voucher_type_code, financial_year_id);
        let sequence = guard.sequences.entry(key).or_insert_with(|| Sequence {
            prefix: prefix.to_string(),
            last_value: 0,
        });
        sequence.last_value += 1;
        Ok(format!("{}-{}", sequence.prefix, sequence.last_value))
    }

    async fn apply_posting(
        &self,
        voucher_id: &VoucherId,
        voucher_number: String,
    ) -> LedgerResult<Voucher> {
        let mut guard = self.state.write().await;
        let voucher = guard
            .vouchers
            .get(voucher_id)
            .ok_or_else(|| LedgerError::VoucherNotFound(voucher_id.clone()))?;
        if voucher.status != VoucherStatus::Draft {
            return Err(LedgerError::InvalidVoucherState(
                voucher_id.clone(),
                voucher.status,
            ));
        }
        let company_id = voucher.company_id.clone();
        let financial_year_id = voucher.financial_year_id.clone();
        let lines = voucher.lines.clone();

        Self::apply_lines(&mut guard, &company_id, &financial_year_id, &lines, voucher_id);

        let voucher = guard
            .vouchers
            .get_mut(voucher_id)
            .ok_or_else(|| LedgerError::VoucherNotFound(voucher_id.clone()))?;
        voucher.voucher_number = Some(voucher_number);
        voucher.status = VoucherStatus::Posted;
        Ok(voucher.clone())
    }

    async fn get_balance(
        &self,
        company_id: &CompanyId,
        ledger_id: &LedgerId,
        financial_year_id: &FinancialYearId,
    ) -> LedgerResult<LedgerBalance> {
        let guard = self.state.read().await;
        Ok(guard
            .balances
            .get(&(company_id.clone(), ledger_id.clone(), financial_year_id.clone()))
            .cloned()
            .unwrap_or_default())
    }

    async fn apply_reversal(
        &self,
        voucher_id: &VoucherId,
        reversal_voucher_id: VoucherId,
        voucher_number: String,
        reason: String,
        user: String,
        date: NaiveDate,
    ) -> LedgerResult<Voucher> {
        let mut guard = self.state.write().await;
        let original = guard
            .vouchers
            .get(voucher_id)
            .ok_or_else(|| LedgerError::VoucherNotFound(voucher_id.clone()))?;
        if original.status != VoucherStatus::Posted {
            return Err(LedgerError::InvalidVoucherState(
                voucher_id.clone(),
                original.status,
            ));
        }
        if original.reversed_voucher_id.is_some() {
            return Err(LedgerError::AlreadyReversed(voucher_id.clone()));
        }

        let reversal = Voucher {
            id: reversal_voucher_id.clone(),
            company_id: original.company_id.clone(),
            voucher_type_id: original.voucher_type_id.clone(),
            financial_year_id: original.financial_year_id.clone(),
            voucher_number: Some(voucher_number),
            date,
            status: VoucherStatus::Posted,
            lines: Self::swapped_lines(&original.lines),
            reversed_voucher_id: None,
            reversal_of: Some(voucher_id.clone()),
            reversal_reason: None,
            reversal_user: None,
            reversed_at: None,
        };

        let company_id = reversal.company_id.clone();
        let financial_year_id = reversal.financial_year_id.clone();
        Self::apply_lines(
            &mut guard,
            &company_id,
            &financial_year_id,
            &reversal.lines,
            &reversal.id,
        );
        guard.vouchers.insert(reversal.id.clone(), reversal.clone());

        let original = guard
            .vouchers
            .get_mut(voucher_id)
            .ok_or_else(|| LedgerError::VoucherNotFound(voucher_id.clone()))?;
        original.status = VoucherStatus::Reversed;
        original.reversed_voucher_id = Some(reversal.id.clone());
        original.reversal_reason = Some(reason);
        original.reversal_user = Some(user);
        original.reversed_at = Some(chrono::Utc::now());

        Ok(reversal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AccountType;
    use crate::Money;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    fn ledger(id: &str) -> Ledger {
        Ledger {
            id: id.into(),
            company_id: "co-1".into(),
            code: id.into(),
            group: "group".into(),
            account_type: AccountType::Asset,
            is_active: true,
        }
    }

    fn draft_voucher(id: &str, lines: Vec<VoucherLine>) -> Voucher {
        Voucher {
            id: id.into(),
            company_id: "co-1".into(),
            voucher_type_id: "vt-1".into(),
            financial_year_id: "fy-1".into(),
            voucher_number: None,
            date: NaiveDate::from_ymd_opt(2024, 6, 1).expect("valid date"),
            status: VoucherStatus::Draft,
            lines,
            reversed_voucher_id: None,
            reversal_of: None,
            reversal_reason: None,
            reversal_user: None,
            reversed_at: None,
        }
    }

    fn line(ledger_id: &str, amount: rust_decimal::Decimal, entry_type: EntryType) -> VoucherLine {
        VoucherLine {
            line_no: 1,
            ledger_id: ledger_id.into(),
            amount: Money::new(amount),
            entry_type,
            cost_center: None,
            against_voucher: None,
        }
    }

    #[tokio::test]
    async fn sequence_allocator_never_rewinds_on_rollback() {
        let service = InMemoryLedgerService::new();
        let first = service
            .allocate_sequence(&"co-1".to_string(), "JV", &"fy-1".to_string(), "JV")
            .await
            .expect("first allocation");
        assert_eq!(first, "JV-1");

        // Simulate an aborted post: the caller never commits this allocation,
        // but the in-memory counter has no rollback path, matching the
        // relational row-lock semantics where a rollback leaves a hole.
        let second = service
            .allocate_sequence(&"co-1".to_string(), "JV", &"fy-1".to_string(), "JV")
            .await
            .expect("second allocation");
        assert_eq!(second, "JV-2");
    }

    #[tokio::test]
    async fn apply_posting_updates_ledger_balances_once() {
        let service = InMemoryLedgerService::new();
        service.create_ledger(ledger("cash")).await.expect("ledger");
        service.create_ledger(ledger("sales")).await.expect("ledger");

        let voucher = draft_voucher(
            "v1",
            vec![
                line("cash", dec!(100.00), EntryType::Debit),
                line("sales", dec!(100.00), EntryType::Credit),
            ],
        );
        service
            .create_draft_voucher(voucher)
            .await
            .expect("create draft");

        let posted = service
            .apply_posting(&"v1".to_string(), "JV-1".into())
            .await
            .expect("apply posting");
        assert_eq!(posted.status, VoucherStatus::Posted);

        let cash_balance = service
            .get_balance(&"co-1".to_string(), &"cash".to_string(), &"fy-1".to_string())
            .await
            .expect("balance");
        assert_eq!(cash_balance.balance_dr, Money::new(dec!(100.00)));
        assert_eq!(cash_balance.last_posted_voucher_id, Some("v1".to_string()));
    }

    #[tokio::test]
    async fn reversal_nets_ledger_balance_to_zero() {
        let service = InMemoryLedgerService::new();
        service.create_ledger(ledger("cash")).await.expect("ledger");
        service.create_ledger(ledger("sales")).await.expect("ledger");

        let voucher = draft_voucher(
            "v1",
            vec![
                line("cash", dec!(100.00), EntryType::Debit),
                line("sales", dec!(100.00), EntryType::Credit),
            ],
        );
        service
            .create_draft_voucher(voucher)
            .await
            .expect("create draft");
        service
            .apply_posting(&"v1".to_string(), "JV-1".into())
            .await
            .expect("apply posting");

        service
            .apply_reversal(
                &"v1".to_string(),
                "v1-rev".into(),
                "JV-2".into(),
                "correction".into(),
                "admin".into(),
                NaiveDate::from_ymd_opt(2024, 6, 2).expect("valid date"),
            )
            .await
            .expect("apply reversal");

        let cash_balance = service
            .get_balance(&"co-1".to_string(), &"cash".to_string(), &"fy-1".to_string())
            .await
            .expect("balance");
        assert_eq!(cash_balance.net(), dec!(0));

        let original = service
            .get_voucher(&"co-1".to_string(), &"v1".to_string())
            .await
            .expect("voucher");
        assert_eq!(original.status, VoucherStatus::Reversed);
        assert_eq!(original.reversed_voucher_id, Some("v1-rev".to_string()));
    }

    #[tokio::test]
    async fn cannot_reverse_twice() {
        let service = InMemoryLedgerService::new();
        service.create_ledger(ledger("cash")).await.expect("ledger");
        service.create_ledger(ledger("sales")).await.expect("ledger");
        let voucher = draft_voucher(
            "v1",
            vec![
                line("cash", dec!(100.00), EntryType::Debit),
                line("sales", dec!(100.00), EntryType::Credit),
            ],
        );
        service
            .create_draft_voucher(voucher)
            .await
            .expect("create draft");
        service
            .apply_posting(&"v1".to_string(), "JV-1".into())
            .await
            .expect("apply posting");
        service
            .apply_reversal(
                &"v1".to_string(),
                "v1-rev".into(),
                "JV-2".into(),
                "correction".into(),
                "admin".into(),
                NaiveDate::from_ymd_opt(2024, 6, 2).expect("valid date"),
            )
            .await
            .expect("apply reversal");

        let err = service
            .apply_reversal(
                &"v1".to_string(),
                "v1-rev-2".into(),
                "JV-3".into(),
                "again".into(),
                "admin".into(),
                NaiveDate::from_ymd_opt(2024, 6, 3).expect("valid date"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::AlreadyReversed(_)));
    }

    #[tokio::test]
    async fn draft_voucher_lines_can_be_replaced_before_posting() {
        let service = InMemoryLedgerService::new();
        service.create_ledger(ledger("cash")).await.expect("ledger");
        service.create_ledger(ledger("sales")).await.expect("ledger");
        let voucher = draft_voucher("v1", vec![line("cash", dec!(50.00), EntryType::Debit)]);
        service
            .create_draft_voucher(voucher)
            .await
            .expect("create draft");

        let replaced = service
            .replace_draft_voucher_lines(
                &"co-1".to_string(),
                &"v1".to_string(),
                vec![
                    line("cash", dec!(100.00), EntryType::Debit),
                    line("sales", dec!(100.00), EntryType::Credit),
                ],
            )
            .await
            .expect("replace lines");
        assert_eq!(replaced.lines.len(), 2);
        assert_eq!(replaced.total_debit(), Money::new(dec!(100.00)));
    }

    #[tokio::test]
    async fn cannot_modify_a_posted_voucher() {
        let service = InMemoryLedgerService::new();
        service.create_ledger(ledger("cash")).await.expect("ledger");
        service.create_ledger(ledger("sales")).await.expect("ledger");
        let voucher = draft_voucher(
            "v1",
            vec![
                line("cash", dec!(100.00), EntryType::Debit),
                line("sales", dec!(100.00), EntryType::Credit),
            ],
        );
        service
            .create_draft_voucher(voucher)
            .await
            .expect("create draft");
        service
            .apply_posting(&"v1".to_string(), "JV-1".into())
            .await
            .expect("apply posting");

        let err = service
            .replace_draft_voucher_lines(&"co-1".to_string(), &"v1".to_string(), vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::CannotModifyPostedVoucher(_)));
    }
}
