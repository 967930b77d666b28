//! fiscal-core: Shared infrastructure for the retail fiscal services.
pub mod observability;
pub mod retry;

pub use tracing;
