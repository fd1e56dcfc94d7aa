use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use dentaflow_core::{Aggregate, AggregateId, AggregateRoot, ClinicId, DomainError, Money, text};
use dentaflow_events::Event;
use dentaflow_patients::PatientId;
use dentaflow_scheduling::AppointmentId;

use crate::number::InvoiceNumber;
use crate::payment::{Payment, PaymentMethod};
use crate::totals::{Discount, InvoiceTotals, LineItem, compute_totals};

pub const NOTES_MAX: usize = 500;
pub const REFERENCE_MAX: usize = 100;

/// Invoice identifier (clinic-scoped via `clinic_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvoiceId(pub AggregateId);

impl InvoiceId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for InvoiceId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Invoice status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceStatus {
    /// Reserved for imported invoices; never produced by the commands below.
    Draft,
    Pending,
    Partial,
    Paid,
    Cancelled,
    Refunded,
}

impl InvoiceStatus {
    pub const ALL: [InvoiceStatus; 6] = [
        InvoiceStatus::Draft,
        InvoiceStatus::Pending,
        InvoiceStatus::Partial,
        InvoiceStatus::Paid,
        InvoiceStatus::Cancelled,
        InvoiceStatus::Refunded,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "DRAFT",
            InvoiceStatus::Pending => "PENDING",
            InvoiceStatus::Partial => "PARTIAL",
            InvoiceStatus::Paid => "PAID",
            InvoiceStatus::Cancelled => "CANCELLED",
            InvoiceStatus::Refunded => "REFUNDED",
        }
    }

    /// Still expecting money from the patient.
    pub fn is_outstanding(self) -> bool {
        matches!(self, InvoiceStatus::Pending | InvoiceStatus::Partial)
    }

    fn is_closed(self) -> bool {
        matches!(self, InvoiceStatus::Cancelled | InvoiceStatus::Refunded)
    }

    /// Status implied by the amount received against a total.
    fn from_payments(amount_paid: Money, total: Money) -> Self {
        if amount_paid.is_zero() {
            InvoiceStatus::Pending
        } else if amount_paid >= total {
            InvoiceStatus::Paid
        } else {
            InvoiceStatus::Partial
        }
    }
}

impl core::fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for InvoiceStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        InvoiceStatus::ALL
            .into_iter()
            .find(|st| st.as_str() == upper)
            .ok_or_else(|| DomainError::validation(format!("unknown invoice status: {s}")))
    }
}

/// Aggregate root: Invoice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invoice {
    id: InvoiceId,
    clinic_id: Option<ClinicId>,
    number: Option<InvoiceNumber>,
    patient_id: Option<PatientId>,
    appointment_id: Option<AppointmentId>,
    status: InvoiceStatus,
    items: Vec<LineItem>,
    discount: Discount,
    totals: InvoiceTotals,
    amount_paid: Money,
    amount_refunded: Money,
    payments: Vec<Payment>,
    notes: Option<String>,
    due_date: Option<NaiveDate>,
    version: u64,
    created: bool,
}

impl Invoice {
    /// Create an empty, not-yet-issued aggregate instance for rehydration.
    pub fn empty(id: InvoiceId) -> Self {
        Self {
            id,
            clinic_id: None,
            number: None,
            patient_id: None,
            appointment_id: None,
            status: InvoiceStatus::Draft,
            items: Vec::new(),
            discount: Discount::none(),
            totals: InvoiceTotals::default(),
            amount_paid: Money::ZERO,
            amount_refunded: Money::ZERO,
            payments: Vec::new(),
            notes: None,
            due_date: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> InvoiceId {
        self.id
    }

    pub fn clinic_id(&self) -> Option<ClinicId> {
        self.clinic_id
    }

    pub fn number(&self) -> Option<&InvoiceNumber> {
        self.number.as_ref()
    }

    pub fn patient_id(&self) -> Option<PatientId> {
        self.patient_id
    }

    pub fn status(&self) -> InvoiceStatus {
        self.status
    }

    pub fn items(&self) -> &[LineItem] {
        &self.items
    }

    pub fn discount(&self) -> Discount {
        self.discount
    }

    pub fn totals(&self) -> InvoiceTotals {
        self.totals
    }

    pub fn amount_paid(&self) -> Money {
        self.amount_paid
    }

    pub fn amount_refunded(&self) -> Money {
        self.amount_refunded
    }

    pub fn balance(&self) -> Money {
        self.totals.balance(self.amount_paid)
    }

    pub fn payments(&self) -> &[Payment] {
        &self.payments
    }

    pub fn due_date(&self) -> Option<NaiveDate> {
        self.due_date
    }
}

impl AggregateRoot for Invoice {
    type Id = InvoiceId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: IssueInvoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueInvoice {
    pub clinic_id: ClinicId,
    pub invoice_id: InvoiceId,
    pub patient_id: PatientId,
    pub appointment_id: Option<AppointmentId>,
    pub items: Vec<LineItem>,
    pub discount: Discount,
    pub tax: Money,
    pub notes: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordPayment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordPayment {
    pub clinic_id: ClinicId,
    pub invoice_id: InvoiceId,
    pub payment_id: AggregateId,
    pub amount: Money,
    pub method: PaymentMethod,
    pub reference: Option<String>,
    pub notes: Option<String>,
    /// When the money was received; defaults to `occurred_at`.
    pub paid_at: Option<DateTime<Utc>>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdateInvoiceTerms. `None` keeps the current value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateInvoiceTerms {
    pub clinic_id: ClinicId,
    pub invoice_id: InvoiceId,
    pub notes: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub discount: Option<Discount>,
    pub tax: Option<Money>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReplaceInvoiceItems.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplaceInvoiceItems {
    pub clinic_id: ClinicId,
    pub invoice_id: InvoiceId,
    pub items: Vec<LineItem>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelInvoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelInvoice {
    pub clinic_id: ClinicId,
    pub invoice_id: InvoiceId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RefundInvoice. `amount` defaults to everything received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundInvoice {
    pub clinic_id: ClinicId,
    pub invoice_id: InvoiceId,
    pub amount: Option<Money>,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceCommand {
    IssueInvoice(IssueInvoice),
    RecordPayment(RecordPayment),
    UpdateInvoiceTerms(UpdateInvoiceTerms),
    ReplaceInvoiceItems(ReplaceInvoiceItems),
    CancelInvoice(CancelInvoice),
    RefundInvoice(RefundInvoice),
}

/// Event: InvoiceIssued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceIssued {
    pub clinic_id: ClinicId,
    pub invoice_id: InvoiceId,
    pub invoice_number: InvoiceNumber,
    pub patient_id: PatientId,
    pub appointment_id: Option<AppointmentId>,
    pub items: Vec<LineItem>,
    pub discount: Discount,
    pub totals: InvoiceTotals,
    pub notes: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PaymentRecorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecorded {
    pub clinic_id: ClinicId,
    pub invoice_id: InvoiceId,
    pub payment: Payment,
    pub amount_paid: Money,
    pub status: InvoiceStatus,
    pub occurred_at: DateTime<Utc>,
}

/// Event: InvoiceTermsUpdated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceTermsUpdated {
    pub clinic_id: ClinicId,
    pub invoice_id: InvoiceId,
    pub notes: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub discount: Discount,
    pub totals: InvoiceTotals,
    pub status: InvoiceStatus,
    pub occurred_at: DateTime<Utc>,
}

/// Event: InvoiceItemsReplaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceItemsReplaced {
    pub clinic_id: ClinicId,
    pub invoice_id: InvoiceId,
    pub items: Vec<LineItem>,
    pub totals: InvoiceTotals,
    pub status: InvoiceStatus,
    pub occurred_at: DateTime<Utc>,
}

/// Event: InvoiceCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceCancelled {
    pub clinic_id: ClinicId,
    pub invoice_id: InvoiceId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: InvoiceRefunded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceRefunded {
    pub clinic_id: ClinicId,
    pub invoice_id: InvoiceId,
    pub amount: Money,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceEvent {
    InvoiceIssued(InvoiceIssued),
    PaymentRecorded(PaymentRecorded),
    InvoiceTermsUpdated(InvoiceTermsUpdated),
    InvoiceItemsReplaced(InvoiceItemsReplaced),
    InvoiceCancelled(InvoiceCancelled),
    InvoiceRefunded(InvoiceRefunded),
}

impl Event for InvoiceEvent {
    fn event_type(&self) -> &'static str {
        match self {
            InvoiceEvent::InvoiceIssued(_) => "invoicing.invoice.issued",
            InvoiceEvent::PaymentRecorded(_) => "invoicing.invoice.payment_recorded",
            InvoiceEvent::InvoiceTermsUpdated(_) => "invoicing.invoice.terms_updated",
            InvoiceEvent::InvoiceItemsReplaced(_) => "invoicing.invoice.items_replaced",
            InvoiceEvent::InvoiceCancelled(_) => "invoicing.invoice.cancelled",
            InvoiceEvent::InvoiceRefunded(_) => "invoicing.invoice.refunded",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            InvoiceEvent::InvoiceIssued(e) => e.occurred_at,
            InvoiceEvent::PaymentRecorded(e) => e.occurred_at,
            InvoiceEvent::InvoiceTermsUpdated(e) => e.occurred_at,
            InvoiceEvent::InvoiceItemsReplaced(e) => e.occurred_at,
            InvoiceEvent::InvoiceCancelled(e) => e.occurred_at,
            InvoiceEvent::InvoiceRefunded(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Invoice {
    type Command = InvoiceCommand;
    type Event = InvoiceEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            InvoiceEvent::InvoiceIssued(e) => {
                self.id = e.invoice_id;
                self.clinic_id = Some(e.clinic_id);
                self.number = Some(e.invoice_number.clone());
                self.patient_id = Some(e.patient_id);
                self.appointment_id = e.appointment_id;
                self.items = e.items.clone();
                self.discount = e.discount;
                self.totals = e.totals;
                self.notes = e.notes.clone();
                self.due_date = e.due_date;
                self.status = InvoiceStatus::Pending;
                self.created = true;
            }
            InvoiceEvent::PaymentRecorded(e) => {
                self.payments.push(e.payment.clone());
                self.amount_paid = e.amount_paid;
                self.status = e.status;
            }
            InvoiceEvent::InvoiceTermsUpdated(e) => {
                self.notes = e.notes.clone();
                self.due_date = e.due_date;
                self.discount = e.discount;
                self.totals = e.totals;
                self.status = e.status;
            }
            InvoiceEvent::InvoiceItemsReplaced(e) => {
                self.items = e.items.clone();
                self.totals = e.totals;
                self.status = e.status;
            }
            InvoiceEvent::InvoiceCancelled(_) => {
                self.status = InvoiceStatus::Cancelled;
            }
            InvoiceEvent::InvoiceRefunded(e) => {
                self.amount_refunded = e.amount;
                self.status = InvoiceStatus::Refunded;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            InvoiceCommand::IssueInvoice(cmd) => self.handle_issue(cmd),
            InvoiceCommand::RecordPayment(cmd) => self.handle_record_payment(cmd),
            InvoiceCommand::UpdateInvoiceTerms(cmd) => self.handle_update_terms(cmd),
            InvoiceCommand::ReplaceInvoiceItems(cmd) => self.handle_replace_items(cmd),
            InvoiceCommand::CancelInvoice(cmd) => self.handle_cancel(cmd),
            InvoiceCommand::RefundInvoice(cmd) => self.handle_refund(cmd),
        }
    }
}

impl Invoice {
    fn ensure_clinic(&self, clinic_id: ClinicId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.clinic_id != Some(clinic_id) {
            return Err(DomainError::invariant("clinic mismatch"));
        }
        Ok(())
    }

    fn ensure_invoice_id(&self, invoice_id: InvoiceId) -> Result<(), DomainError> {
        if self.id != invoice_id {
            return Err(DomainError::invariant("invoice_id mismatch"));
        }
        Ok(())
    }

    fn ensure_existing(&self, clinic_id: ClinicId, invoice_id: InvoiceId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found("invoice"));
        }
        self.ensure_clinic(clinic_id)?;
        self.ensure_invoice_id(invoice_id)
    }

    fn ensure_open(&self) -> Result<(), DomainError> {
        if self.status.is_closed() {
            return Err(DomainError::invariant(format!(
                "invoice is {}",
                self.status.as_str()
            )));
        }
        Ok(())
    }

    /// Recomputed totals must still cover what the patient already paid.
    fn ensure_covers_payments(&self, totals: &InvoiceTotals) -> Result<(), DomainError> {
        if totals.total < self.amount_paid {
            return Err(DomainError::invariant(format!(
                "invoice total {} would fall below the amount already paid {}",
                totals.total, self.amount_paid
            )));
        }
        Ok(())
    }

    fn handle_issue(&self, cmd: &IssueInvoice) -> Result<Vec<InvoiceEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("invoice already exists"));
        }
        self.ensure_invoice_id(cmd.invoice_id)?;

        let (items, totals) = compute_totals(&cmd.items, &cmd.discount, cmd.tax)?;

        Ok(vec![InvoiceEvent::InvoiceIssued(InvoiceIssued {
            clinic_id: cmd.clinic_id,
            invoice_id: cmd.invoice_id,
            invoice_number: InvoiceNumber::for_invoice(&cmd.invoice_id.0),
            patient_id: cmd.patient_id,
            appointment_id: cmd.appointment_id,
            items,
            discount: cmd.discount,
            totals,
            notes: text::optional("notes", cmd.notes.as_deref(), NOTES_MAX)?,
            due_date: cmd.due_date,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_record_payment(&self, cmd: &RecordPayment) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_existing(cmd.clinic_id, cmd.invoice_id)?;
        self.ensure_open()?;
        if self.status == InvoiceStatus::Paid {
            return Err(DomainError::invariant("invoice is already paid"));
        }

        if cmd.amount.is_zero() {
            return Err(DomainError::validation("payment amount must be greater than 0"));
        }
        if self.payments.iter().any(|p| p.payment_id == cmd.payment_id) {
            return Err(DomainError::conflict("payment already recorded"));
        }

        let amount_paid = self
            .amount_paid
            .checked_add(cmd.amount)
            .ok_or_else(|| DomainError::invariant("payment total overflow"))?;
        if amount_paid > self.totals.total {
            return Err(DomainError::invariant(format!(
                "payment of {} exceeds the balance due {}",
                cmd.amount,
                self.balance()
            )));
        }

        Ok(vec![InvoiceEvent::PaymentRecorded(PaymentRecorded {
            clinic_id: cmd.clinic_id,
            invoice_id: cmd.invoice_id,
            payment: Payment {
                payment_id: cmd.payment_id,
                amount: cmd.amount,
                method: cmd.method,
                reference: text::optional("reference", cmd.reference.as_deref(), REFERENCE_MAX)?,
                notes: text::optional("notes", cmd.notes.as_deref(), NOTES_MAX)?,
                paid_at: cmd.paid_at.unwrap_or(cmd.occurred_at),
            },
            amount_paid,
            status: InvoiceStatus::from_payments(amount_paid, self.totals.total),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update_terms(&self, cmd: &UpdateInvoiceTerms) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_existing(cmd.clinic_id, cmd.invoice_id)?;
        self.ensure_open()?;

        let discount = cmd.discount.unwrap_or(self.discount);
        let tax = cmd.tax.unwrap_or(self.totals.tax);
        let (_, totals) = compute_totals(&self.items, &discount, tax)?;
        self.ensure_covers_payments(&totals)?;

        let notes = match &cmd.notes {
            Some(n) => text::optional("notes", Some(n), NOTES_MAX)?,
            None => self.notes.clone(),
        };
        let due_date = cmd.due_date.or(self.due_date);

        if notes == self.notes && due_date == self.due_date && discount == self.discount && totals == self.totals {
            return Ok(vec![]);
        }

        Ok(vec![InvoiceEvent::InvoiceTermsUpdated(InvoiceTermsUpdated {
            clinic_id: cmd.clinic_id,
            invoice_id: cmd.invoice_id,
            notes,
            due_date,
            discount,
            totals,
            status: InvoiceStatus::from_payments(self.amount_paid, totals.total),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_replace_items(&self, cmd: &ReplaceInvoiceItems) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_existing(cmd.clinic_id, cmd.invoice_id)?;
        self.ensure_open()?;

        let (items, totals) = compute_totals(&cmd.items, &self.discount, self.totals.tax)?;
        self.ensure_covers_payments(&totals)?;

        Ok(vec![InvoiceEvent::InvoiceItemsReplaced(InvoiceItemsReplaced {
            clinic_id: cmd.clinic_id,
            invoice_id: cmd.invoice_id,
            items,
            totals,
            status: InvoiceStatus::from_payments(self.amount_paid, totals.total),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelInvoice) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_existing(cmd.clinic_id, cmd.invoice_id)?;
        if self.status == InvoiceStatus::Cancelled {
            return Err(DomainError::conflict("invoice is already cancelled"));
        }
        self.ensure_open()?;
        if !self.amount_paid.is_zero() {
            return Err(DomainError::invariant(
                "cannot cancel an invoice with payments; refund it instead",
            ));
        }

        Ok(vec![InvoiceEvent::InvoiceCancelled(InvoiceCancelled {
            clinic_id: cmd.clinic_id,
            invoice_id: cmd.invoice_id,
            reason: text::optional("reason", cmd.reason.as_deref(), NOTES_MAX)?,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_refund(&self, cmd: &RefundInvoice) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_existing(cmd.clinic_id, cmd.invoice_id)?;
        if self.status == InvoiceStatus::Refunded {
            return Err(DomainError::conflict("invoice is already refunded"));
        }
        self.ensure_open()?;
        if self.amount_paid.is_zero() {
            return Err(DomainError::invariant(
                "nothing has been paid on this invoice; cancel it instead",
            ));
        }

        let amount = cmd.amount.unwrap_or(self.amount_paid);
        if amount.is_zero() {
            return Err(DomainError::validation("refund amount must be greater than 0"));
        }
        if amount > self.amount_paid {
            return Err(DomainError::invariant("cannot refund more than was paid"));
        }

        Ok(vec![InvoiceEvent::InvoiceRefunded(InvoiceRefunded {
            clinic_id: cmd.clinic_id,
            invoice_id: cmd.invoice_id,
            amount,
            reason: text::optional("reason", cmd.reason.as_deref(), NOTES_MAX)?,
            occurred_at: cmd.occurred_at,
        })])
    }
}
