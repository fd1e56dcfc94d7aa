//! Invoicing domain module (event-sourced).
//!
//! Invoices, payments and the billing arithmetic behind them, implemented
//! purely as deterministic domain logic (no IO, no HTTP, no storage).

pub mod invoice;
pub mod number;
pub mod payment;
pub mod totals;

pub use invoice::{
    CancelInvoice, Invoice, InvoiceCancelled, InvoiceCommand, InvoiceEvent, InvoiceId,
    InvoiceIssued, InvoiceItemsReplaced, InvoiceRefunded, InvoiceStatus, InvoiceTermsUpdated,
    IssueInvoice, PaymentRecorded, RecordPayment, RefundInvoice, ReplaceInvoiceItems,
    UpdateInvoiceTerms,
};
pub use number::InvoiceNumber;
pub use payment::{Payment, PaymentMethod};
pub use totals::{Discount, InvoiceTotals, LineItem, compute_totals};
