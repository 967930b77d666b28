//! Error taxonomy for the e-invoicing subsystem.
//!
//! The split matters operationally: transport failures may be retried,
//! configuration and protocol failures need an operator, and authority
//! rejections need a data correction before the request is sent again.

use crate::models::AuthorityEvent;
use fiscal_core::retry::Retryable;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FiscalError {
    /// Bad certificate, key, URL or environment; never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Caller-side invariant violation detected before transmission.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Connection, timeout or 5xx failure; safe to retry.
    #[error("transport error: {0}")]
    Transport(String),

    /// Retry budget spent; wraps the last transport failure.
    #[error("{operation} failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        #[source]
        last: Box<FiscalError>,
    },

    /// Response did not match the service contract; never retried.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Deterministic rejection returned by the authority.
    #[error("authority rejection {code}: {message}")]
    Rejection {
        code: u32,
        message: String,
        events: Vec<AuthorityEvent>,
    },

    /// Credential store failure on the load path.
    #[error("credential store error: {0}")]
    Store(#[from] anyhow::Error),
}

impl FiscalError {
    /// Builds a rejection, translating curated codes to plain language.
    /// Unmapped codes keep the authority's raw message.
    pub fn rejection(code: u32, raw_message: String, events: Vec<AuthorityEvent>) -> Self {
        let message = match known_cause(code) {
            Some(cause) => format!("{cause} ({raw_message})"),
            None => raw_message,
        };
        FiscalError::Rejection {
            code,
            message,
            events,
        }
    }

    /// Wraps a retryable error once the attempt budget is spent; fatal
    /// errors pass through untouched.
    pub fn exhausted(self, operation: &str, attempts: u32) -> Self {
        if self.is_retryable() {
            FiscalError::RetriesExhausted {
                operation: operation.to_string(),
                attempts,
                last: Box::new(self),
            }
        } else {
            self
        }
    }
}

impl Retryable for FiscalError {
    fn is_retryable(&self) -> bool {
        matches!(self, FiscalError::Transport(_))
    }
}

/// Plain-language causes for rejection codes the authority returns often.
fn known_cause(code: u32) -> Option<&'static str> {
    match code {
        600 => Some("holder is not authorized for electronic invoicing"),
        601 => Some("access credential does not belong to the holder"),
        602 => Some("sales point is not enabled for electronic invoicing"),
        10015 => Some("buyer identification is required above the threshold amount"),
        10016 => Some("invoice number is not the next in sequence for the sales point"),
        _ => None,
    }
}
