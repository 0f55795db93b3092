use std::collections::HashMap;

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::Capability;
use crate::Company;
use crate::CompanyFeature;
use crate::CompanyId;
use crate::CreateCompanyRequest;
use crate::CreateFinancialYearRequest;
use crate::FinancialYear;
use crate::FinancialYearId;
use crate::Principal;
use crate::TenancyError;
use crate::TenancyResult;
use crate::TenancyService;

#[derive(Default)]
struct TenancyState {
    companies: HashMap<CompanyId, Company>,
    features: HashMap<CompanyId, CompanyFeature>,
    financial_years: HashMap<FinancialYearId, FinancialYear>,
}

pub struct InMemoryTenancyService {
    state: RwLock<TenancyState>,
}

impl InMemoryTenancyService {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RwLock::new(TenancyState::default()),
        }
    }

    fn generate_company_id() -> CompanyId {
        Uuid::new_v4().to_string()
    }

    fn generate_financial_year_id() -> FinancialYearId {
        Uuid::new_v4().to_string()
    }

    fn ensure_unique_code(state: &TenancyState, code: &str) -> TenancyResult<()> {
        if state.companies.values().any(|company| company.code == code) {
            return Err(TenancyError::Conflict(format!(
                "company code {code} already in use"
            )));
        }
        Ok(())
    }

    fn require_company<'a>(
        company_id: &CompanyId,
        state: &'a TenancyState,
    ) -> TenancyResult<&'a Company> {
        state
            .companies
            .get(company_id)
            .ok_or_else(|| TenancyError::CompanyNotFound(company_id.clone()))
    }

    fn require_financial_year<'a>(
        financial_year_id: &FinancialYearId,
        state: &'a TenancyState,
    ) -> TenancyResult<&'a FinancialYear> {
        state
            .financial_years
            .get(financial_year_id)
            .ok_or_else(|| TenancyError::FinancialYearNotFound(financial_year_id.clone()))
    }

    fn ensure_no_overlap(
        state: &TenancyState,
        company_id: &CompanyId,
        candidate: &FinancialYear,
    ) -> TenancyResult<()> {
        let overlap = state.financial_years.values().any(|year| {
            year.company_id == *company_id && year.id != candidate.id && year.overlaps(candidate)
        });
        if overlap {
            return Err(TenancyError::Conflict(format!(
                "financial year {} overlaps an existing year for company {company_id}",
                candidate.name
            )));
        }
        Ok(())
    }

    fn clear_current(state: &mut TenancyState, company_id: &CompanyId) {
        for year in state.financial_years.values_mut() {
            if year.company_id == *company_id {
                year.is_current = false;
            }
        }
    }
}

impl Default for InMemoryTenancyService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl TenancyService for InMemoryTenancyService {
    async fn create_company(&self, request: CreateCompanyRequest) -> TenancyResult<Company> {
        let normalized = request.normalize()?;
        let mut guard = self.state.write().await;
        Self::ensure_unique_code(&guard, &normalized.code)?;

        let company = Company {
            id: Self::generate_company_id(),
            code: normalized.code,
            name: normalized.name,
            base_currency: normalized.base_currency,
            is_active: true,
        };
        guard.companies.insert(company.id.clone(), company.clone());
        guard.features.insert(
            company.id.clone(),
            CompanyFeature::disabled(company.id.clone()),
        );
        Ok(company)
    }

    async fn get_company(&self, company_id: &CompanyId) -> TenancyResult<Company> {
        let guard = self.state.read().await;
        Self::require_company(company_id, &guard).cloned()
    }

    async fn set_company_active(
        &self,
        company_id: &CompanyId,
        is_active: bool,
    ) -> TenancyResult<Company> {
        let mut guard = self.state.write().await;
        let company = guard
            .companies
            .get_mut(company_id)
            .ok_or_else(|| TenancyError::CompanyNotFound(company_id.clone()))?;
        company.is_active = is_active;
        Ok(company.clone())
    }

    async fn get_feature(&self, company_id: &CompanyId) -> TenancyResult<CompanyFeature> {
        let guard = self.state.read().await;
        Self::require_company(company_id, &guard)?;
        guard
            .features
            .get(company_id)
            .cloned()
            .ok_or_else(|| TenancyError::CompanyNotFound(company_id.clone()))
    }

    async fn set_locked(
        &self,
        company_id: &CompanyId,
        locked: bool,
    ) -> TenancyResult<CompanyFeature> {
        let mut guard = self.state.write().await;
        Self::require_company(company_id, &guard)?;
        let feature = guard
            .features
            .get_mut(company_id)
            .ok_or_else(|| TenancyError::CompanyNotFound(company_id.clone()))?;
        feature.locked = locked;
        Ok(feature.clone())
    }

    async fn set_webhook_url(
        &self,
        company_id: &CompanyId,
        webhook_url: Option<String>,
    ) -> TenancyResult<CompanyFeature> {
        let mut guard = self.state.write().await;
        Self::require_company(company_id, &guard)?;
        let feature = guard
            .features
            .get_mut(company_id)
            .ok_or_else(|| TenancyError::CompanyNotFound(company_id.clone()))?;
        feature.webhook_url = webhook_url;
        Ok(feature.clone())
    }

    async fn create_financial_year(
        &self,
        request: CreateFinancialYearRequest,
    ) -> TenancyResult<FinancialYear> {
        let mut guard = self.state.write().await;
        Self::require_company(&request.company_id, &guard)?;

        let candidate = FinancialYear {
            id: Self::generate_financial_year_id(),
            company_id: request.company_id.clone(),
            name: request.name,
            start_date: request.start_date,
            end_date: request.end_date,
            is_current: request.make_current,
            is_closed: false,
        };
        candidate.validate_range()?;
        Self::ensure_no_overlap(&guard, &request.company_id, &candidate)?;

        if request.make_current {
            Self::clear_current(&mut guard, &request.company_id);
        }
        guard
            .financial_years
            .insert(candidate.id.clone(), candidate.clone());
        Ok(candidate)
    }

    async fn get_financial_year(
        &self,
        company_id: &CompanyId,
        financial_year_id: &FinancialYearId,
    ) -> TenancyResult<FinancialYear> {
        let guard = self.state.read().await;
        let year = Self::require_financial_year(financial_year_id, &guard)?;
        if year.company_id != *company_id {
            return Err(TenancyError::FinancialYearNotFound(
                financial_year_id.clone(),
            ));
        }
        Ok(year.clone())
    }

    async fn get_current_financial_year(
        &self,
        company_id: &CompanyId,
    ) -> TenancyResult<FinancialYear> {
        let guard = self.state.read().await;
        guard
            .financial_years
            .values()
            .find(|year| year.company_id == *company_id && year.is_current)
            .cloned()
            .ok_or_else(|| {
                TenancyError::FinancialYearNotFound(format!(
                    "no current financial year for company {company_id}"
                ))
            })
    }

    async fn list_financial_years(
        &self,
        company_id: &CompanyId,
    ) -> TenancyResult<Vec<FinancialYear>> {
        let guard = self.state.read().await;
        let mut years: Vec<_> = guard
            .financial_years
            .values()
            .filter(|year| year.company_id == *company_id)
            .cloned()
            .collect();
        years.sort_by(|left, right| left.start_date.cmp(&right.start_date));
        Ok(years)
    }

    async fn close_financial_year(
        &self,
        principal: &Principal,
        financial_year_id: &FinancialYearId,
    ) -> TenancyResult<FinancialYear> {
        if !principal.has(Capability::Accountant) && !principal.is_admin() {
            return Err(TenancyError::Validation(
                "accountant or admin capability is required to close a financial year".into(),
            ));
        }
        let mut guard = self.state.write().await;
        let year = guard
            .financial_years
            .get_mut(financial_year_id)
            .ok_or_else(|| TenancyError::FinancialYearNotFound(financial_year_id.clone()))?;
        if year.company_id != principal.company_id {
            return Err(TenancyError::FinancialYearNotFound(
                financial_year_id.clone(),
            ));
        }
        if year.is_closed {
            return Err(TenancyError::Conflict(format!(
                "financial year {financial_year_id} is already closed"
            )));
        }
        year.is_closed = true;
        Ok(year.clone())
    }

    async fn reopen_financial_year(
        &self,
        principal: &Principal,
        financial_year_id: &FinancialYearId,
    ) -> TenancyResult<FinancialYear> {
        if !principal.is_admin() {
            return Err(TenancyError::Validation(
                "admin capability is required to reopen a financial year".into(),
            ));
        }
        let mut guard = self.state.write().await;
        let year = guard
            .financial_years
            .get_mut(financial_year_id)
            .ok_or_else(|| TenancyError::FinancialYearNotFound(financial_year_id.clone()))?;
        if year.company_id != principal.company_id {
            return Err(TenancyError::FinancialYearNotFound(
                financial_year_id.clone(),
            ));
        }
        if !year.is_closed {
            return Err(TenancyError::Conflict(format!(
                "financial year {financial_year_id} is not closed"
            )));
        }
        year.is_closed = false;
        Ok(year.clone())
    }
}
