use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;

use dentaflow_core::{ClinicId, Money};
use dentaflow_events::EventEnvelope;
use dentaflow_invoicing::{
    Discount, InvoiceEvent, InvoiceId, InvoiceNumber, InvoiceStatus, InvoiceTotals, LineItem, Payment,
};
use dentaflow_patients::PatientId;
use dentaflow_scheduling::AppointmentId;

use crate::projections::cursor::{Projection, ProjectionError, StreamCursors, decode, ensure_same_stream};
use crate::read_model::ClinicStore;

pub const AGGREGATE_TYPE: &str = "invoicing.invoice";

/// Queryable invoice read model (header, items and payments).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvoiceReadModel {
    pub invoice_id: InvoiceId,
    pub invoice_number: InvoiceNumber,
    pub patient_id: PatientId,
    pub appointment_id: Option<AppointmentId>,
    pub status: InvoiceStatus,
    pub items: Vec<LineItem>,
    /// How the discount is expressed; the computed amount is `totals.discount`.
    #[serde(rename = "discount_terms")]
    pub discount: Discount,
    #[serde(flatten)]
    pub totals: InvoiceTotals,
    pub amount_paid: Money,
    pub amount_refunded: Money,
    pub balance: Money,
    pub payments: Vec<Payment>,
    pub notes: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub issued_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InvoiceReadModel {
    fn refresh_balance(&mut self) {
        self.balance = self.totals.balance(self.amount_paid);
    }
}

/// List filters; all optional.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InvoiceFilter {
    pub patient_id: Option<PatientId>,
    pub status: Option<InvoiceStatus>,
    pub limit: Option<usize>,
}

/// A payment together with the invoice it settles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentEntry {
    pub invoice_id: InvoiceId,
    pub invoice_number: InvoiceNumber,
    pub patient_id: PatientId,
    #[serde(flatten)]
    pub payment: Payment,
}

#[derive(Debug)]
pub struct InvoicesProjection<S>
where
    S: ClinicStore<InvoiceId, InvoiceReadModel>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> InvoicesProjection<S>
where
    S: ClinicStore<InvoiceId, InvoiceReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, clinic_id: ClinicId, invoice_id: &InvoiceId) -> Option<InvoiceReadModel> {
        self.store.get(clinic_id, invoice_id)
    }

    /// Invoices matching `filter`, newest first.
    pub fn list(&self, clinic_id: ClinicId, filter: InvoiceFilter) -> Vec<InvoiceReadModel> {
        let mut invoices: Vec<_> = self
            .store
            .list(clinic_id)
            .into_iter()
            .filter(|i| filter.patient_id.is_none_or(|p| i.patient_id == p))
            .filter(|i| filter.status.is_none_or(|s| i.status == s))
            .collect();
        invoices.sort_by(|a, b| (b.issued_at, b.invoice_id.0).cmp(&(a.issued_at, a.invoice_id.0)));
        if let Some(limit) = filter.limit {
            invoices.truncate(limit);
        }
        invoices
    }

    /// Every payment received by the clinic, most recent first.
    pub fn payments(&self, clinic_id: ClinicId) -> Vec<PaymentEntry> {
        let mut payments: Vec<_> = self
            .store
            .list(clinic_id)
            .into_iter()
            .flat_map(|i| {
                let InvoiceReadModel {
                    invoice_id,
                    invoice_number,
                    patient_id,
                    payments,
                    ..
                } = i;
                payments.into_iter().map(move |payment| PaymentEntry {
                    invoice_id,
                    invoice_number: invoice_number.clone(),
                    patient_id,
                    payment,
                })
            })
            .collect();
        payments.sort_by(|a, b| (b.payment.paid_at, b.payment.payment_id).cmp(&(a.payment.paid_at, a.payment.payment_id)));
        payments
    }

    fn update(
        &self,
        clinic_id: ClinicId,
        invoice_id: InvoiceId,
        occurred_at: DateTime<Utc>,
        f: impl FnOnce(&mut InvoiceReadModel),
    ) {
        if let Some(mut rm) = self.store.get(clinic_id, &invoice_id) {
            f(&mut rm);
            rm.refresh_balance();
            rm.updated_at = occurred_at;
            self.store.upsert(clinic_id, invoice_id, rm);
        }
    }
}

impl<S> Projection for InvoicesProjection<S>
where
    S: ClinicStore<InvoiceId, InvoiceReadModel>,
{
    fn name(&self) -> &'static str {
        "invoicing.invoices"
    }

    fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != AGGREGATE_TYPE || !self.cursors.should_apply(envelope)? {
            return Ok(());
        }

        let ev: InvoiceEvent = decode(envelope)?;
        let (clinic_id, invoice_id) = match &ev {
            InvoiceEvent::InvoiceIssued(e) => (e.clinic_id, e.invoice_id),
            InvoiceEvent::PaymentRecorded(e) => (e.clinic_id, e.invoice_id),
            InvoiceEvent::InvoiceTermsUpdated(e) => (e.clinic_id, e.invoice_id),
            InvoiceEvent::InvoiceItemsReplaced(e) => (e.clinic_id, e.invoice_id),
            InvoiceEvent::InvoiceCancelled(e) => (e.clinic_id, e.invoice_id),
            InvoiceEvent::InvoiceRefunded(e) => (e.clinic_id, e.invoice_id),
        };
        ensure_same_stream(envelope, clinic_id, invoice_id.0)?;

        match ev {
            InvoiceEvent::InvoiceIssued(e) => {
                let mut rm = InvoiceReadModel {
                    invoice_id,
                    invoice_number: e.invoice_number,
                    patient_id: e.patient_id,
                    appointment_id: e.appointment_id,
                    status: InvoiceStatus::Pending,
                    items: e.items,
                    discount: e.discount,
                    totals: e.totals,
                    amount_paid: Money::ZERO,
                    amount_refunded: Money::ZERO,
                    balance: Money::ZERO,
                    payments: vec![],
                    notes: e.notes,
                    due_date: e.due_date,
                    issued_at: e.occurred_at,
                    updated_at: e.occurred_at,
                };
                rm.refresh_balance();
                self.store.upsert(clinic_id, invoice_id, rm);
            }
            InvoiceEvent::PaymentRecorded(e) => self.update(clinic_id, invoice_id, e.occurred_at, |rm| {
                rm.payments.push(e.payment);
                rm.amount_paid = e.amount_paid;
                rm.status = e.status;
            }),
            InvoiceEvent::InvoiceTermsUpdated(e) => self.update(clinic_id, invoice_id, e.occurred_at, |rm| {
                rm.notes = e.notes;
                rm.due_date = e.due_date;
                rm.discount = e.discount;
                rm.totals = e.totals;
                rm.status = e.status;
            }),
            InvoiceEvent::InvoiceItemsReplaced(e) => self.update(clinic_id, invoice_id, e.occurred_at, |rm| {
                rm.items = e.items;
                rm.totals = e.totals;
                rm.status = e.status;
            }),
            InvoiceEvent::InvoiceCancelled(e) => self.update(clinic_id, invoice_id, e.occurred_at, |rm| {
                rm.status = InvoiceStatus::Cancelled;
            }),
            InvoiceEvent::InvoiceRefunded(e) => self.update(clinic_id, invoice_id, e.occurred_at, |rm| {
                rm.amount_refunded = e.amount;
                rm.status = InvoiceStatus::Refunded;
            }),
        }

        self.cursors.advance(envelope);
        Ok(())
    }

    fn clear_clinic(&self, clinic_id: ClinicId) {
        self.store.clear_clinic(clinic_id);
        self.cursors.clear_clinic(clinic_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::TimeZone;
    use dentaflow_core::AggregateId;
    use dentaflow_invoicing::{InvoiceIssued, PaymentMethod, PaymentRecorded};
    use uuid::Uuid;

    use crate::read_model::InMemoryClinicStore;

    type Store = Arc<InMemoryClinicStore<InvoiceId, InvoiceReadModel>>;

    fn apply(p: &InvoicesProjection<Store>, clinic_id: ClinicId, id: InvoiceId, seq: u64, ev: InvoiceEvent) {
        let env = EventEnvelope::new(
            Uuid::now_v7(),
            clinic_id,
            id.0,
            AGGREGATE_TYPE,
            seq,
            serde_json::to_value(&ev).unwrap(),
        );
        p.apply_envelope(&env).unwrap();
    }

    fn issue(p: &InvoicesProjection<Store>, clinic_id: ClinicId, patient_id: PatientId, day: u32) -> InvoiceId {
        issue_as(p, clinic_id, InvoiceId::new(AggregateId::new()), patient_id, day)
    }

    fn issue_as(p: &InvoicesProjection<Store>, clinic_id: ClinicId, id: InvoiceId, patient_id: PatientId, day: u32) -> InvoiceId {
        let total = Money::from_minor(100_000);
        apply(
            p,
            clinic_id,
            id,
            1,
            InvoiceEvent::InvoiceIssued(InvoiceIssued {
                clinic_id,
                invoice_id: id,
                invoice_number: InvoiceNumber::for_invoice(&id.0),
                patient_id,
                appointment_id: None,
                items: vec![LineItem {
                    description: "Scaling".into(),
                    quantity: 1,
                    unit_price: total,
                    clinical_record_id: None,
                }],
                discount: Discount::none(),
                totals: InvoiceTotals {
                    subtotal: total,
                    discount: Money::ZERO,
                    tax: Money::ZERO,
                    total,
                },
                notes: None,
                due_date: None,
                occurred_at: Utc.with_ymd_and_hms(2025, 5, day, 9, 0, 0).unwrap(),
            }),
        );
        id
    }

    fn pay(p: &InvoicesProjection<Store>, clinic_id: ClinicId, id: InvoiceId, amount: u64) {
        apply(
            p,
            clinic_id,
            id,
            2,
            InvoiceEvent::PaymentRecorded(PaymentRecorded {
                clinic_id,
                invoice_id: id,
                payment: Payment {
                    payment_id: AggregateId::new(),
                    amount: Money::from_minor(amount),
                    method: PaymentMethod::Upi,
                    reference: None,
                    notes: None,
                    paid_at: Utc.with_ymd_and_hms(2025, 5, 20, 9, 0, 0).unwrap(),
                },
                amount_paid: Money::from_minor(amount),
                status: InvoiceStatus::Partial,
                occurred_at: Utc.with_ymd_and_hms(2025, 5, 20, 9, 0, 0).unwrap(),
            }),
        );
    }

    #[test]
    fn list_filters_by_patient_and_status_newest_first() {
        let p = InvoicesProjection::new(Store::default());
        let clinic_id = ClinicId::new();
        let asha = PatientId::new(AggregateId::new());
        let ravi = PatientId::new(AggregateId::new());

        let older = issue(&p, clinic_id, asha, 1);
        let newer = issue(&p, clinic_id, asha, 2);
        issue(&p, clinic_id, ravi, 3);
        pay(&p, clinic_id, older, 40_000);

        let ashas = p.list(
            clinic_id,
            InvoiceFilter {
                patient_id: Some(asha),
                ..InvoiceFilter::default()
            },
        );
        assert_eq!(ashas.iter().map(|i| i.invoice_id).collect::<Vec<_>>(), vec![newer, older]);

        let partial = p.list(
            clinic_id,
            InvoiceFilter {
                status: Some(InvoiceStatus::Partial),
                ..InvoiceFilter::default()
            },
        );
        assert_eq!(partial.len(), 1);
        assert_eq!(partial[0].balance, Money::from_minor(60_000));

        let limited = p.list(
            clinic_id,
            InvoiceFilter {
                limit: Some(1),
                ..InvoiceFilter::default()
            },
        );
        assert_eq!(limited.len(), 1);
    }

    #[test]
    fn invoices_issued_together_list_in_a_stable_order() {
        let p = InvoicesProjection::new(Store::default());
        let clinic_id = ClinicId::new();
        let asha = PatientId::new(AggregateId::new());
        let low = InvoiceId::new(AggregateId::from_uuid(Uuid::from_u128(1)));
        let high = InvoiceId::new(AggregateId::from_uuid(Uuid::from_u128(2)));
        issue_as(&p, clinic_id, low, asha, 4);
        issue_as(&p, clinic_id, high, asha, 4);

        for _ in 0..3 {
            let listed = p.list(clinic_id, InvoiceFilter::default());
            assert_eq!(listed.iter().map(|i| i.invoice_id).collect::<Vec<_>>(), vec![high, low]);
        }
    }

    #[test]
    fn payments_are_flattened_across_invoices() {
        let p = InvoicesProjection::new(Store::default());
        let clinic_id = ClinicId::new();
        let patient = PatientId::new(AggregateId::new());
        let id = issue(&p, clinic_id, patient, 1);
        pay(&p, clinic_id, id, 25_000);

        let payments = p.payments(clinic_id);
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].invoice_id, id);
        assert_eq!(payments[0].payment.amount, Money::from_minor(25_000));
        assert!(p.payments(ClinicId::new()).is_empty());
    }
}
