//! Services module for einvoicing-service.

pub mod cache;
pub mod metrics;
pub mod signer;
pub mod soap;
pub mod wsaa;
pub mod wsfe;

pub use cache::{CredentialStore, InMemoryCredentialStore, PgCredentialStore};
pub use signer::TicketSigner;
pub use soap::{SoapClient, WsTransport};
pub use wsaa::WsaaClient;
pub use wsfe::WsfeClient;
