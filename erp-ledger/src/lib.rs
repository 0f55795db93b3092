#![deny(clippy::print_stdout, clippy::print_stderr)]

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal::RoundingStrategy;
use thiserror::Error;

mod memory;

pub use memory::InMemoryLedgerService;

pub type CompanyId = String;
pub type LedgerId = String;
pub type VoucherTypeId = String;
pub type VoucherId = String;
pub type FinancialYearId = String;
pub type SequenceValue = u64;

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Stable error codes for posting validation and voucher state transitions (spec §7).
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger {0} not found")]
    LedgerNotFound(LedgerId),
    #[error("voucher type {0} not found")]
    VoucherTypeNotFound(VoucherTypeId),
    #[error("voucher {0} not found")]
    VoucherNotFound(VoucherId),
    #[error("voucher type {0} is inactive")]
    VoucherTypeInactive(VoucherTypeId),
    #[error("voucher {0} is already posted")]
    AlreadyPosted(VoucherId),
    #[error("voucher {0} is already reversed")]
    AlreadyReversed(VoucherId),
    #[error("voucher {0} is in state {1:?}, expected DRAFT")]
    InvalidVoucherState(VoucherId, VoucherStatus),
    #[error("posted voucher {0} cannot be modified")]
    CannotModifyPostedVoucher(VoucherId),
    #[error("voucher is unbalanced: debit {debit} != credit {credit}")]
    UnbalancedVoucher { debit: Money, credit: Money },
    #[error("voucher line amount must be positive, got {0}")]
    NonPositiveAmount(Money),
    #[error("ledger {ledger} belongs to a different company than voucher {voucher}")]
    CrossCompanyReference { ledger: LedgerId, voucher: VoucherId },
    #[error("voucher must have at least two lines")]
    TooFewLines,
    #[error("validation error: {0}")]
    Validation(String),
    #[error("conflict: {0}")]
    Conflict(String),
}

/// Money is always quantized to 2 decimal places with round-half-up before it
/// crosses an equality or summation boundary (spec §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Money(Decimal);

impl Money {
    pub const ZERO: Money = Money(Decimal::ZERO);

    #[must_use]
    pub fn new(value: Decimal) -> Self {
        Money(value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero))
    }

    #[must_use]
    pub fn from_decimal(value: Decimal) -> Self {
        Self::new(value)
    }

    #[must_use]
    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    #[must_use]
    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0 == Decimal::ZERO
    }

    #[must_use]
    pub fn checked_add(self, other: Money) -> Money {
        Money::new(self.0 + other.0)
    }

    #[must_use]
    pub fn checked_sub(self, other: Money) -> Money {
        Money::new(self.0 - other.0)
    }

    pub fn sum(values: impl IntoIterator<Item = Money>) -> Money {
        values
            .into_iter()
            .fold(Money::ZERO, |total, value| total.checked_add(value))
    }
}

impl FromStr for Money {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Decimal::from_str(s)
            .map(Money::new)
            .map_err(|err| LedgerError::Validation(format!("invalid amount {s}: {err}")))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountType {
    Asset,
    Liability,
    Equity,
    Revenue,
    Expense,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ledger {
    pub id: LedgerId,
    pub company_id: CompanyId,
    pub code: String,
    pub group: String,
    pub account_type: AccountType,
    pub is_active: bool,
}

impl Ledger {
    #[must_use]
    pub fn allows_posting(&self) -> bool {
        self.is_active
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoucherCategory {
    Journal,
    Payment,
    Receipt,
    Contra,
    Sales,
    Purchase,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoucherType {
    pub id: VoucherTypeId,
    pub company_id: CompanyId,
    pub code: String,
    pub category: VoucherCategory,
    pub is_accounting: bool,
    pub is_inventory: bool,
    pub is_active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoucherStatus {
    Draft,
    Posted,
    Reversed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    Debit,
    Credit,
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryType::Debit => write!(f, "DR"),
            EntryType::Credit => write!(f, "CR"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoucherLine {
    pub line_no: u32,
    pub ledger_id: LedgerId,
    pub amount: Money,
    pub entry_type: EntryType,
    pub cost_center: Option<String>,
    pub against_voucher: Option<VoucherId>,
}

impl VoucherLine {
    pub fn validate(&self) -> LedgerResult<()> {
        if !self.amount.is_positive() {
            return Err(LedgerError::NonPositiveAmount(self.amount));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Voucher {
    pub id: VoucherId,
    pub company_id: CompanyId,
    pub voucher_type_id: VoucherTypeId,
    pub financial_year_id: FinancialYearId,
    pub voucher_number: Option<String>,
    pub date: NaiveDate,
    pub status: VoucherStatus,
    pub lines: Vec<VoucherLine>,
    pub reversed_voucher_id: Option<VoucherId>,
    pub reversal_of: Option<VoucherId>,
    pub reversal_reason: Option<String>,
    pub reversal_user: Option<String>,
    pub reversed_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl Voucher {
    #[must_use]
    pub fn total_debit(&self) -> Money {
        Money::sum(
            self.lines
                .iter()
                .filter(|line| line.entry_type == EntryType::Debit)
                .map(|line| line.amount),
        )
    }

    #[must_use]
    pub fn total_credit(&self) -> Money {
        Money::sum(
            self.lines
                .iter()
                .filter(|line| line.entry_type == EntryType::Credit)
                .map(|line| line.amount),
        )
    }
}

/// `(company, ledger, fy)` derived cache of posted-line totals (spec §3 `LedgerBalance`).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LedgerBalance {
    pub balance_dr: Money,
    pub balance_cr: Money,
    pub last_posted_voucher_id: Option<VoucherId>,
}

impl LedgerBalance {
    #[must_use]
    pub fn net(&self) -> Decimal {
        self.balance_dr.as_decimal() - self.balance_cr.as_decimal()
    }
}

/// Validates a draft voucher per spec §4.3: N >= 2 lines, each positive and
/// well-typed, ledgers owned by the voucher's company, and DR == CR under
/// `Money` rounding.
pub fn validate_posting(voucher: &Voucher, ledgers: &[&Ledger]) -> LedgerResult<()> {
    if voucher.lines.len() < 2 {
        return Err(LedgerError::TooFewLines);
    }
    for line in &voucher.lines {
        line.validate()?;
        let ledger = ledgers
            .iter()
            .find(|ledger| ledger.id == line.ledger_id)
            .ok_or_else(|| LedgerError::LedgerNotFound(line.ledger_id.clone()))?;
        if ledger.company_id != voucher.company_id {
            return Err(LedgerError::CrossCompanyReference {
                ledger: ledger.id.clone(),
                voucher: voucher.id.clone(),
            });
        }
    }
    let debit = voucher.total_debit();
    let credit = voucher.total_credit();
    if debit != credit {
        return Err(LedgerError::UnbalancedVoucher { debit, credit });
    }
    Ok(())
}

#[async_trait::async_trait]
pub trait LedgerService: Send + Sync {
    async fn create_ledger(&self, ledger: Ledger) -> LedgerResult<Ledger>;
    async fn get_ledger(&self, company_id: &CompanyId, ledger_id: &LedgerId) -> LedgerResult<Ledger>;
    async fn list_ledgers(&self, company_id: &CompanyId) -> LedgerResult<Vec<Ledger>>;

    async fn create_voucher_type(&self, voucher_type: VoucherType) -> LedgerResult<VoucherType>;
    async fn get_voucher_type(
        &self,
        company_id: &CompanyId,
        voucher_type_id: &VoucherTypeId,
    ) -> LedgerResult<VoucherType>;

    async fn create_draft_voucher(&self, voucher: Voucher) -> LedgerResult<Voucher>;
    async fn get_voucher(&self, company_id: &CompanyId, voucher_id: &VoucherId) -> LedgerResult<Voucher>;

    /// Replaces a draft voucher's lines wholesale (spec §3 `VoucherLine`:
    /// "cascade-deleted with draft voucher; frozen after post"). Rejects with
    /// `CannotModifyPostedVoucher` once the voucher has left `DRAFT`; callers
    /// still run `validate_posting` themselves before relying on the result.
    async fn replace_draft_voucher_lines(
        &self,
        company_id: &CompanyId,
        voucher_id: &VoucherId,
        lines: Vec<VoucherLine>,
    ) -> LedgerResult<Voucher>;

    /// Allocates the next sequence value for `(company, voucher_type_code, fy)`
    /// under a row-level lock (spec §4.2). Never rewinds on failure.
    async fn allocate_sequence(
        &self,
        company_id: &CompanyId,
        voucher_type_code: &str,
        financial_year_id: &FinancialYearId,
        prefix: &str,
    ) -> LedgerResult<String>;

    /// Applies the posting-validator-approved lines of `voucher` to the ledger
    /// balances and marks it `POSTED` with the given voucher number. Caller
    /// (the orchestrator crate) is responsible for guards, approval, and
    /// sequence allocation; this is the last, atomic step of the accounting
    /// phase (spec §4.5 step 11).
    async fn apply_posting(
        &self,
        voucher_id: &VoucherId,
        voucher_number: String,
    ) -> LedgerResult<Voucher>;

    async fn get_balance(
        &self,
        company_id: &CompanyId,
        ledger_id: &LedgerId,
        financial_year_id: &FinancialYearId,
    ) -> LedgerResult<LedgerBalance>;

    /// Creates the reversing voucher (DR/CR swapped lines), applies its
    /// ledger-balance effect, and marks the original `REVERSED` (spec §4.7).
    async fn apply_reversal(
        &self,
        voucher_id: &VoucherId,
        reversal_voucher_id: VoucherId,
        voucher_number: String,
        reason: String,
        user: String,
        date: NaiveDate,
    ) -> LedgerResult<Voucher>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn ledger(id: &str, company_id: &str) -> Ledger {
        Ledger {
            id: id.into(),
            company_id: company_id.into(),
            code: id.into(),
            group: "group".into(),
            account_type: AccountType::Asset,
            is_active: true,
        }
    }

    fn voucher(lines: Vec<VoucherLine>) -> Voucher {
        Voucher {
            id: "v1".into(),
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

    fn line(ledger_id: &str, amount: Decimal, entry_type: EntryType) -> VoucherLine {
        VoucherLine {
            line_no: 1,
            ledger_id: ledger_id.into(),
            amount: Money::new(amount),
            entry_type,
            cost_center: None,
            against_voucher: None,
        }
    }

    #[test]
    fn money_quantizes_half_up() {
        assert_eq!(Money::new(dec!(0.005)).as_decimal(), dec!(0.01));
        assert_eq!(Money::new(dec!(0.004)).as_decimal(), dec!(0.00));
    }

    #[test]
    fn balanced_voucher_passes_validation() {
        let v = voucher(vec![
            line("l1", dec!(100.00), EntryType::Debit),
            line("l2", dec!(100.00), EntryType::Credit),
        ]);
        let l1 = ledger("l1", "co-1");
        let l2 = ledger("l2", "co-1");
        assert!(validate_posting(&v, &[&l1, &l2]).is_ok());
    }

    #[test]
    fn rounding_rejects_near_miss_as_unbalanced() {
        let v = voucher(vec![
            line("l1", dec!(0.005), EntryType::Debit),
            line("l2", dec!(0.004), EntryType::Credit),
        ]);
        let l1 = ledger("l1", "co-1");
        let l2 = ledger("l2", "co-1");
        let err = validate_posting(&v, &[&l1, &l2]).unwrap_err();
        assert!(matches!(err, LedgerError::UnbalancedVoucher { .. }));
    }

    #[test]
    fn cross_company_ledger_rejected() {
        let v = voucher(vec![
            line("l1", dec!(50.00), EntryType::Debit),
            line("l2", dec!(50.00), EntryType::Credit),
        ]);
        let l1 = ledger("l1", "co-1");
        let l2 = ledger("l2", "co-2");
        let err = validate_posting(&v, &[&l1, &l2]).unwrap_err();
        assert!(matches!(err, LedgerError::CrossCompanyReference { .. }));
    }

    #[test]
    fn single_line_voucher_rejected() {
        let v = voucher(vec![line("l1", dec!(50.00), EntryType::Debit)]);
        let l1 = ledger("l1", "co-1");
        let err = validate_posting(&v, &[&l1]).unwrap_err();
        assert!(matches!(err, LedgerError::TooFewLines));
    }
}
