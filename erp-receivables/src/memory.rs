use std::collections::HashMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::AgingReport;
use crate::AllocatePaymentRequest;
use crate::CompanyId;
use crate::CreateInvoiceRequest;
use crate::CreatePartyRequest;
use crate::CreatePaymentRequest;
use crate::Invoice;
use crate::InvoiceId;
use crate::Party;
use crate::PartyId;
use crate::Payment;
use crate::PaymentId;
use crate::PaymentLine;
use crate::PaymentLineId;
use crate::PaymentStatus;
use crate::ReceivablesError;
use crate::ReceivablesResult;
use crate::ReceivablesService;
use crate::VoucherId;
use crate::aging;
use crate::check_credit;
use crate::derive_invoice_status;

#[derive(Default)]
struct ReceivablesState {
    parties: HashMap<PartyId, Party>,
    invoices: HashMap<InvoiceId, Invoice>,
    payments: HashMap<PaymentId, Payment>,
    payment_lines: HashMap<PaymentLineId, PaymentLine>,
}

#[derive(Default)]
pub struct InMemoryReceivablesService {
    state: RwLock<ReceivablesState>,
}

impl InMemoryReceivablesService {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn recompute_invoice(state: &mut ReceivablesState, invoice_id: &InvoiceId) {
        let amount_received: Decimal = state
            .payment_lines
            .values()
            .filter(|line| &line.invoice_id == invoice_id)
            .filter(|line| {
                state
                    .payments
                    .get(&line.payment_id)
                    .is_some_and(|payment| payment.status == PaymentStatus::Posted)
            })
            .map(|line| line.amount_applied)
            .sum();

        if let Some(invoice) = state.invoices.get_mut(invoice_id) {
            invoice.amount_received = amount_received;
            invoice.status = derive_invoice_status(invoice.total_value, amount_received);
        }
    }
}

#[async_trait::async_trait]
impl ReceivablesService for InMemoryReceivablesService {
    async fn create_party(&self, request: CreatePartyRequest) -> ReceivablesResult<Party> {
        let party = Party {
            id: Uuid::new_v4().to_string(),
            company_id: request.company_id,
            party_type: request.party_type,
            control_ledger_id: request.control_ledger_id,
            credit_limit: request.credit_limit,
            credit_days: request.credit_days,
        };
        let mut guard = self.state.write().await;
        guard.parties.insert(party.id.clone(), party.clone());
        Ok(party)
    }

    async fn get_party(&self, company_id: &CompanyId, party_id: &PartyId) -> ReceivablesResult<Party> {
        let guard = self.state.read().await;
        guard
            .parties
            .get(party_id)
            .filter(|party| party.company_id == *company_id)
            .cloned()
            .ok_or_else(|| ReceivablesError::PartyNotFound(party_id.clone()))
    }

    async fn create_invoice(&self, request: CreateInvoiceRequest) -> ReceivablesResult<Invoice> {
        let invoice = Invoice {
            id: Uuid::new_v4().to_string(),
            company_id: request.company_id,
            party_id: request.party_id,
            invoice_type: request.invoice_type,
            invoice_number: request.invoice_number,
            sales_order_id: request.sales_order_id,
            purchase_order_id: request.purchase_order_id,
            voucher_id: None,
            total_value: request.total_value,
            amount_received: Decimal::ZERO,
            due_date: request.due_date,
            status: crate::InvoiceStatus::Draft,
        };
        let mut guard = self.state.write().await;
        guard.invoices.insert(invoice.id.clone(), invoice.clone());
        Ok(invoice)
    }

    async fn get_invoice(&self, company_id: &CompanyId, invoice_id: &InvoiceId) -> ReceivablesResult<Invoice> {
        let guard = self.state.read().await;
        guard
            .invoices
            .get(invoice_id)
            .filter(|invoice| invoice.company_id == *company_id)
            .cloned()
            .ok_or_else(|| ReceivablesError::InvoiceNotFound(invoice_id.clone()))
    }

    async fn list_outstanding_invoices(&self, company_id: &CompanyId) -> ReceivablesResult<Vec<Invoice>> {
        let guard = self.state.read().await;
        Ok(guard
            .invoices
            .values()
            .filter(|invoice| invoice.company_id == *company_id && invoice.is_outstanding())
            .cloned()
            .collect())
    }

    async fn attach_voucher(
        &self,
        invoice_id: &InvoiceId,
        voucher_id: VoucherId,
    ) -> ReceivablesResult<Invoice> {
        let mut guard = self.state.write().await;
        let invoice = guard
            .invoices
            .get_mut(invoice_id)
            .ok_or_else(|| ReceivablesError::InvoiceNotFound(invoice_id.clone()))?;
        invoice.voucher_id = Some(voucher_id);
        invoice.status = derive_invoice_status(invoice.total_value, invoice.amount_received);
        Ok(invoice.clone())
    }

    async fn create_payment(&self, request: CreatePaymentRequest) -> ReceivablesResult<Payment> {
        let payment = Payment {
            id: Uuid::new_v4().to_string(),
            company_id: request.company_id,
            party_id: request.party_id,
            voucher_id: None,
            payment_type: request.payment_type,
            bank_account: request.bank_account,
            payment_mode: request.payment_mode,
            amount: request.amount,
            status: PaymentStatus::Draft,
        };
        let mut guard = self.state.write().await;
        guard.payments.insert(payment.id.clone(), payment.clone());
        Ok(payment)
    }

    async fn get_payment(&self, payment_id: &PaymentId) -> ReceivablesResult<Payment> {
        let guard = self.state.read().await;
        guard
            .payments
            .get(payment_id)
            .cloned()
            .ok_or_else(|| ReceivablesError::PaymentNotFound(payment_id.clone()))
    }

    async fn allocate_payment(
        &self,
        request: AllocatePaymentRequest,
    ) -> ReceivablesResult<PaymentLine> {
        let mut guard = self.state.write().await;
        let payment = guard
            .payments
            .get(&request.payment_id)
            .ok_or_else(|| ReceivablesError::PaymentNotFound(request.payment_id.clone()))?;
        if payment.status != PaymentStatus::Draft {
            return Err(ReceivablesError::PaymentNotDraft(request.payment_id.clone()));
        }
        let voucher_amount = payment.amount;

        let invoice = guard
            .invoices
            .get(&request.invoice_id)
            .ok_or_else(|| ReceivablesError::InvoiceNotFound(request.invoice_id.clone()))?;
        let already_allocated: Decimal = guard
            .payment_lines
            .values()
            .filter(|line| line.invoice_id == request.invoice_id)
            .map(|line| line.amount_applied)
            .sum();
        let remaining = invoice.outstanding() - already_allocated;
        if request.amount > remaining {
            return Err(ReceivablesError::AllocationExceedsInvoice {
                invoice_id: request.invoice_id,
                amount: request.amount,
                remaining,
            });
        }

        let already_applied_on_payment: Decimal = guard
            .payment_lines
            .values()
            .filter(|line| line.payment_id == request.payment_id)
            .map(|line| line.amount_applied)
            .sum();
        let allocated = already_applied_on_payment + request.amount;
        if allocated > voucher_amount {
            return Err(ReceivablesError::AllocationExceedsVoucherAmount {
                allocated,
                voucher_amount,
            });
        }

        let line = PaymentLine {
            id: Uuid::new_v4().to_string(),
            payment_id: request.payment_id,
            invoice_id: request.invoice_id,
            amount_applied: request.amount,
        };
        guard.payment_lines.insert(line.id.clone(), line.clone());
        Ok(line)
    }

    async fn remove_allocation(
        &self,
        payment_id: &PaymentId,
        line_id: &PaymentLineId,
    ) -> ReceivablesResult<()> {
        let mut guard = self.state.write().await;
        let payment = guard
            .payments
            .get(payment_id)
            .ok_or_else(|| ReceivablesError::PaymentNotFound(payment_id.clone()))?;
        if payment.status != PaymentStatus::Draft {
            return Err(ReceivablesError::PaymentNotDraft(payment_id.clone()));
        }
        guard.payment_lines.remove(line_id);
        Ok(())
    }

    async fn mark_posted(
        &self,
        payment_id: &PaymentId,
        voucher_id: VoucherId,
    ) -> ReceivablesResult<Payment> {
        let mut guard = self.state.write().await;
        let payment = guard
            .payments
            .get_mut(payment_id)
            .ok_or_else(|| ReceivablesError::PaymentNotFound(payment_id.clone()))?;
        payment.status = PaymentStatus::Posted;
        payment.voucher_id = Some(voucher_id);
        let result = payment.clone();

        let invoice_ids: Vec<InvoiceId> = guard
            .payment_lines
            .values()
            .filter(|line| &line.payment_id == payment_id)
            .map(|line| line.invoice_id.clone())
            .collect();
        for invoice_id in invoice_ids {
            Self::recompute_invoice(&mut guard, &invoice_id);
        }
        Ok(result)
    }

    async fn mark_reversed(&self, payment_id: &PaymentId) -> ReceivablesResult<Payment> {
        let mut guard = self.state.write().await;
        let payment = guard
            .payments
            .get_mut(payment_id)
            .ok_or_else(|| ReceivablesError::PaymentNotFound(payment_id.clone()))?;
        payment.status = PaymentStatus::Reversed;
        let result = payment.clone();

        let invoice_ids: Vec<InvoiceId> = guard
            .payment_lines
            .values()
            .filter(|line| &line.payment_id == payment_id)
            .map(|line| line.invoice_id.clone())
            .collect();
        for invoice_id in invoice_ids {
            Self::recompute_invoice(&mut guard, &invoice_id);
        }
        Ok(result)
    }

    async fn outstanding_for_party(
        &self,
        company_id: &CompanyId,
        party_id: &PartyId,
    ) -> ReceivablesResult<Decimal> {
        let guard = self.state.read().await;
        Ok(guard
            .invoices
            .values()
            .filter(|invoice| {
                invoice.company_id == *company_id
                    && invoice.party_id == *party_id
                    && invoice.is_outstanding()
            })
            .map(Invoice::outstanding)
            .sum())
    }

    async fn check_credit_for_party(
        &self,
        company_id: &CompanyId,
        party_id: &PartyId,
        additional_amount: Decimal,
    ) -> ReceivablesResult<()> {
        let party = self.get_party(company_id, party_id).await?;
        let current_outstanding = self.outstanding_for_party(company_id, party_id).await?;
        check_credit(party.credit_limit, current_outstanding, additional_amount)
    }

    async fn aging_report(&self, company_id: &CompanyId, as_of: NaiveDate) -> ReceivablesResult<AgingReport> {
        let guard = self.state.read().await;
        let invoices: Vec<Invoice> = guard
            .invoices
            .values()
            .filter(|invoice| invoice.company_id == *company_id)
            .cloned()
            .collect();
        Ok(aging(company_id, as_of, &invoices))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("valid date")
    }

    async fn seed(service: &InMemoryReceivablesService) -> (PartyId, InvoiceId) {
        let party = service
            .create_party(CreatePartyRequest {
                company_id: "co-1".into(),
                party_type: crate::PartyType::Customer,
                control_ledger_id: "ledger-1".into(),
                credit_limit: Some(dec!(2000)),
                credit_days: 30,
            })
            .await
            .expect("create party");
        let invoice = service
            .create_invoice(CreateInvoiceRequest {
                company_id: "co-1".into(),
                party_id: party.id.clone(),
                invoice_type: crate::InvoiceType::Sales,
                invoice_number: "INV-1".into(),
                sales_order_id: None,
                purchase_order_id: None,
                total_value: dec!(1180),
                due_date: date("2024-07-01"),
            })
            .await
            .expect("create invoice");
        service
            .attach_voucher(&invoice.id, "v1".into())
            .await
            .expect("attach voucher");
        (party.id, invoice.id)
    }

    #[tokio::test]
    async fn partial_then_full_payment_transitions_invoice_status() {
        let service = InMemoryReceivablesService::new();
        let (_, invoice_id) = seed(&service).await;

        let payment_one = service
            .create_payment(CreatePaymentRequest {
                company_id: "co-1".into(),
                party_id: "p1".into(),
                payment_type: crate::PaymentType::Receipt,
                bank_account: "bank-1".into(),
                payment_mode: "NEFT".into(),
                amount: dec!(500),
            })
            .await
            .expect("create payment");
        service
            .allocate_payment(AllocatePaymentRequest {
                payment_id: payment_one.id.clone(),
                invoice_id: invoice_id.clone(),
                amount: dec!(500),
            })
            .await
            .expect("allocate");
        service
            .mark_posted(&payment_one.id, "pv1".into())
            .await
            .expect("post payment");

        let invoice = service
            .get_invoice(&"co-1".to_string(), &invoice_id)
            .await
            .expect("get invoice");
        assert_eq!(invoice.amount_received, dec!(500));
        assert_eq!(invoice.status, crate::InvoiceStatus::PartiallyPaid);

        let payment_two = service
            .create_payment(CreatePaymentRequest {
                company_id: "co-1".into(),
                party_id: "p1".into(),
                payment_type: crate::PaymentType::Receipt,
                bank_account: "bank-1".into(),
                payment_mode: "NEFT".into(),
                amount: dec!(680),
            })
            .await
            .expect("create payment");
        service
            .allocate_payment(AllocatePaymentRequest {
                payment_id: payment_two.id.clone(),
                invoice_id: invoice_id.clone(),
                amount: dec!(680),
            })
            .await
            .expect("allocate");
        service
            .mark_posted(&payment_two.id, "pv2".into())
            .await
            .expect("post payment");

        let invoice = service
            .get_invoice(&"co-1".to_string(), &invoice_id)
            .await
            .expect("get invoice");
        assert_eq!(invoice.amount_received, dec!(1180));
        assert_eq!(invoice.status, crate::InvoiceStatus::Paid);

        service
            .mark_reversed(&payment_two.id)
            .await
            .expect("reverse second payment");
        let invoice = service
            .get_invoice(&"co-1".to_string(), &invoice_id)
            .await
            .expect("get invoice");
        assert_eq!(invoice.amount_received, dec!(500));
        assert_eq!(invoice.status, crate::InvoiceStatus::PartiallyPaid);
    }

    #[tokio::test]
    async fn allocation_exceeding_outstanding_is_rejected() {
        let service = InMemoryReceivablesService::new();
        let (_, invoice_id) = seed(&service).await;
        let payment = service
            .create_payment(CreatePaymentRequest {
                company_id: "co-1".into(),
                party_id: "p1".into(),
                payment_type: crate::PaymentType::Receipt,
                bank_account: "bank-1".into(),
                payment_mode: "NEFT".into(),
                amount: dec!(5000),
            })
            .await
            .expect("create payment");

        let err = service
            .allocate_payment(AllocatePaymentRequest {
                payment_id: payment.id,
                invoice_id,
                amount: dec!(5000),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ReceivablesError::AllocationExceedsInvoice { .. }));
    }

    #[tokio::test]
    async fn allocations_cannot_exceed_the_payment_voucher_amount() {
        let service = InMemoryReceivablesService::new();
        let (_, invoice_id) = seed(&service).await;
        let payment = service
            .create_payment(CreatePaymentRequest {
                company_id: "co-1".into(),
                party_id: "p1".into(),
                payment_type: crate::PaymentType::Receipt,
                bank_account: "bank-1".into(),
                payment_mode: "NEFT".into(),
                amount: dec!(300),
            })
            .await
            .expect("create payment");

        let err = service
            .allocate_payment(AllocatePaymentRequest {
                payment_id: payment.id,
                invoice_id,
                amount: dec!(400),
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ReceivablesError::AllocationExceedsVoucherAmount { .. }
        ));
    }

    #[tokio::test]
    async fn credit_limit_blocks_order_confirmation() {
        let service = InMemoryReceivablesService::new();
        let (party_id, _) = seed(&service).await;

        let err = service
            .check_credit_for_party(&"co-1".to_string(), &party_id, dec!(1000))
            .await
            .unwrap_err();
        assert!(matches!(err, ReceivablesError::CreditLimitExceeded { .. }));
    }
}
