//! Domain models for einvoicing-service.

mod credential;
mod invoice;
mod reference;

pub use credential::{Credential, SAFETY_MARGIN_MINUTES};
pub use invoice::{
    AssociatedDocument, AuthorityEvent, InvoiceRequest, InvoiceResult, LineItem, Outcome, VatLine,
};
pub use reference::{
    ConnectivityReport, IssuedInvoice, ReferenceEntry, ReferenceTable, ServerStatus,
};
