#![deny(clippy::print_stdout, clippy::print_stderr)]

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

mod in_memory;

pub use crate::in_memory::InMemoryTenancyService;

pub type CompanyId = String;
pub type FinancialYearId = String;
pub type UserId = String;

pub type TenancyResult<T> = Result<T, TenancyError>;

/// Stable error codes for the tenant/financial-year guards (spec §7 "Tenant guards").
#[derive(Debug, Error)]
pub enum TenancyError {
    #[error("company {0} not found")]
    CompanyNotFound(CompanyId),
    #[error("financial year {0} not found")]
    FinancialYearNotFound(FinancialYearId),
    #[error("company {0} is inactive")]
    CompanyInactive(CompanyId),
    #[error("company {0} is locked")]
    CompanyLocked(CompanyId),
    #[error("financial year {0} is closed")]
    FinancialYearClosed(FinancialYearId),
    #[error("financial year {0} is not the current year")]
    FinancialYearNotCurrent(FinancialYearId),
    #[error("date {date} is outside financial year {financial_year_id} ({start}..={end})")]
    DateOutsideFinancialYear {
        date: NaiveDate,
        financial_year_id: FinancialYearId,
        start: NaiveDate,
        end: NaiveDate,
    },
    #[error("validation error: {0}")]
    Validation(String),
    #[error("conflict: {0}")]
    Conflict(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Company {
    pub id: CompanyId,
    pub code: String,
    pub name: String,
    pub base_currency: String,
    pub is_active: bool,
}

/// One-to-one companion of `Company` holding feature flags and the webhook
/// configuration the event bus (`erp-events`) delivers to (spec §3 `CompanyFeature`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompanyFeature {
    pub company_id: CompanyId,
    pub inventory_enabled: bool,
    pub accounting_enabled: bool,
    /// `locked=true` blocks all posting and reversal regardless of any other guard.
    pub locked: bool,
    pub webhook_url: Option<String>,
}

impl CompanyFeature {
    #[must_use]
    pub fn disabled(company_id: CompanyId) -> Self {
        Self {
            company_id,
            inventory_enabled: false,
            accounting_enabled: true,
            locked: false,
            webhook_url: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinancialYear {
    pub id: FinancialYearId,
    pub company_id: CompanyId,
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub is_current: bool,
    pub is_closed: bool,
}

impl FinancialYear {
    pub fn validate_range(&self) -> TenancyResult<()> {
        if self.start_date >= self.end_date {
            return Err(TenancyError::Validation(
                "financial year start_date must be before end_date".into(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start_date && date <= self.end_date
    }

    #[must_use]
    pub fn overlaps(&self, other: &FinancialYear) -> bool {
        self.start_date <= other.end_date && other.start_date <= self.end_date
    }
}

/// Capability values a `Principal` may hold (spec §4.8, §9: pass `Principal`
/// explicitly instead of relying on request-scoped globals). `Accountant` is
/// a supplemented capability for the financial-year close/reopen lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Maker,
    Checker,
    Poster,
    Accountant,
    Admin,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: UserId,
    pub company_id: CompanyId,
    pub capabilities: HashSet<Capability>,
}

impl Principal {
    #[must_use]
    pub fn new(user_id: impl Into<UserId>, company_id: impl Into<CompanyId>) -> Self {
        Self {
            user_id: user_id.into(),
            company_id: company_id.into(),
            capabilities: HashSet::new(),
        }
    }

    #[must_use]
    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities.insert(capability);
        self
    }

    #[must_use]
    pub fn has(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.has(Capability::Admin)
    }
}

// --- Guard predicates -------------------------------------------------------
//
// Pure functions: no I/O beyond the row each one is handed. Callers fetch the
// row, then ask the guard whether posting may proceed.

pub fn ensure_company_active(company: &Company) -> TenancyResult<()> {
    if company.is_active {
        Ok(())
    } else {
        Err(TenancyError::CompanyInactive(company.id.clone()))
    }
}

pub fn ensure_company_unlocked(feature: &CompanyFeature) -> TenancyResult<()> {
    if feature.locked {
        Err(TenancyError::CompanyLocked(feature.company_id.clone()))
    } else {
        Ok(())
    }
}

pub fn ensure_financial_year_open(
    financial_year: &FinancialYear,
    allow_override: bool,
) -> TenancyResult<()> {
    if financial_year.is_closed && !allow_override {
        Err(TenancyError::FinancialYearClosed(financial_year.id.clone()))
    } else {
        Ok(())
    }
}

pub fn ensure_financial_year_current(financial_year: &FinancialYear) -> TenancyResult<()> {
    if financial_year.is_current {
        Ok(())
    } else {
        Err(TenancyError::FinancialYearNotCurrent(
            financial_year.id.clone(),
        ))
    }
}

pub fn ensure_date_within_financial_year(
    date: NaiveDate,
    financial_year: &FinancialYear,
) -> TenancyResult<()> {
    if financial_year.contains(date) {
        Ok(())
    } else {
        Err(TenancyError::DateOutsideFinancialYear {
            date,
            financial_year_id: financial_year.id.clone(),
            start: financial_year.start_date,
            end: financial_year.end_date,
        })
    }
}

/// The reversal/override path of spec §4.7 and §7: `allow_override=true` is
/// only honored for an admin-capable principal; non-admins see the original
/// `FinancialYearClosed` regardless of what they passed.
pub fn ensure_override_permitted(principal: &Principal, allow_override: bool) -> bool {
    allow_override && principal.is_admin()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateCompanyRequest {
    pub code: String,
    pub name: String,
    pub base_currency: String,
}

impl CreateCompanyRequest {
    pub fn normalize(mut self) -> TenancyResult<Self> {
        self.code = self.code.trim().to_ascii_uppercase();
        if self.code.is_empty() {
            return Err(TenancyError::Validation("company code is required".into()));
        }
        self.name = self.name.trim().to_string();
        if self.name.is_empty() {
            return Err(TenancyError::Validation("company name is required".into()));
        }
        self.base_currency = self.base_currency.trim().to_ascii_uppercase();
        if self.base_currency.len() != 3 {
            return Err(TenancyError::Validation(
                "base currency must be a 3-letter ISO code".into(),
            ));
        }
        Ok(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateFinancialYearRequest {
    pub company_id: CompanyId,
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub make_current: bool,
}

#[async_trait]
pub trait TenancyService: Send + Sync {
    async fn create_company(&self, request: CreateCompanyRequest) -> TenancyResult<Company>;
    async fn get_company(&self, company_id: &CompanyId) -> TenancyResult<Company>;
    async fn set_company_active(
        &self,
        company_id: &CompanyId,
        is_active: bool,
    ) -> TenancyResult<Company>;

    async fn get_feature(&self, company_id: &CompanyId) -> TenancyResult<CompanyFeature>;
    async fn set_locked(
        &self,
        company_id: &CompanyId,
        locked: bool,
    ) -> TenancyResult<CompanyFeature>;
    async fn set_webhook_url(
        &self,
        company_id: &CompanyId,
        webhook_url: Option<String>,
    ) -> TenancyResult<CompanyFeature>;

    async fn create_financial_year(
        &self,
        request: CreateFinancialYearRequest,
    ) -> TenancyResult<FinancialYear>;
    async fn get_financial_year(
        &self,
        company_id: &CompanyId,
        financial_year_id: &FinancialYearId,
    ) -> TenancyResult<FinancialYear>;
    async fn get_current_financial_year(
        &self,
        company_id: &CompanyId,
    ) -> TenancyResult<FinancialYear>;
    async fn list_financial_years(
        &self,
        company_id: &CompanyId,
    ) -> TenancyResult<Vec<FinancialYear>>;
    /// ACCOUNTANT capability is sufficient to close an open year.
    async fn close_financial_year(
        &self,
        principal: &Principal,
        financial_year_id: &FinancialYearId,
    ) -> TenancyResult<FinancialYear>;
    /// Only ADMIN may reopen a closed year.
    async fn reopen_financial_year(
        &self,
        principal: &Principal,
        financial_year_id: &FinancialYearId,
    ) -> TenancyResult<FinancialYear>;
}
