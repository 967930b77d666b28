//! einvoicing-service: electronic-invoice authentication and issuance.
//!
//! Library consumed by the retail backend's request-handling code. It signs
//! time-boxed access tickets for the tax authority's authentication service,
//! caches the resulting short-lived credential across process instances, and
//! drives the authority's billing service to obtain an authorization code
//! (CAE) for each sale.

pub mod config;
pub mod error;
pub mod models;
pub mod services;

pub use config::{Environment, FiscalConfig};
pub use error::FiscalError;
pub use models::{Credential, InvoiceRequest, InvoiceResult};
pub use services::{
    CredentialStore, InMemoryCredentialStore, PgCredentialStore, SoapClient, TicketSigner,
    WsTransport, WsaaClient, WsfeClient,
};
