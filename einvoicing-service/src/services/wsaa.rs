//! Authentication client for the authority's access-ticket service (WSAA).
//!
//! Resolution order for a credential: in-process tier, then the shared
//! store, then a fresh exchange (sign ticket, call the service, parse,
//! persist best-effort). The exchange path is serialized per process so a
//! burst of callers produces a single remote login.

use crate::config::FiscalConfig;
use crate::error::FiscalError;
use crate::models::Credential;
use crate::services::cache::CredentialStore;
use crate::services::metrics;
use crate::services::signer::TicketSigner;
use crate::services::soap::{self, xml, WsTransport};
use chrono::{DateTime, Utc};
use fiscal_core::retry::RetryPolicy;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, instrument, warn};

const LOGIN_NS: &str = "http://wsaa.view.sua.dutyfree.gov.ar";

/// SOAPAction of the login operation.
pub const LOGIN_ACTION: &str = "urn:loginCms";

#[derive(Clone)]
pub struct WsaaClient {
    inner: Arc<WsaaInner>,
}

struct WsaaInner {
    auth_url: String,
    holder_id: String,
    service: String,
    signer: TicketSigner,
    store: Arc<dyn CredentialStore>,
    transport: Arc<dyn WsTransport>,
    policy: RetryPolicy,
    current: RwLock<Option<Credential>>,
    refresh_lock: Mutex<()>,
}

impl WsaaClient {
    pub fn new(
        config: &FiscalConfig,
        signer: TicketSigner,
        store: Arc<dyn CredentialStore>,
        transport: Arc<dyn WsTransport>,
    ) -> Self {
        Self {
            inner: Arc::new(WsaaInner {
                auth_url: config.auth_url.clone(),
                holder_id: config.cuit.clone(),
                service: config.service_name.clone(),
                signer,
                store,
                transport,
                policy: config.retry_policy(),
                current: RwLock::new(None),
                refresh_lock: Mutex::new(()),
            }),
        }
    }

    pub fn holder_id(&self) -> &str {
        &self.inner.holder_id
    }

    /// Returns a usable credential, refreshing through the remote exchange
    /// only when neither cache tier has one.
    #[instrument(skip(self), fields(holder = %self.inner.holder_id))]
    pub async fn get_credential(&self) -> Result<Credential, FiscalError> {
        if let Some(credential) = self.usable_in_process().await {
            return Ok(credential);
        }

        let _guard = self.inner.refresh_lock.lock().await;

        // Another task may have refreshed while we waited on the lock.
        if let Some(credential) = self.usable_in_process().await {
            return Ok(credential);
        }

        if let Some(credential) = self.inner.store.load(&self.inner.holder_id).await? {
            info!("adopted credential from shared cache");
            *self.inner.current.write().await = Some(credential.clone());
            return Ok(credential);
        }

        let credential = self.exchange().await?;

        // A lost cache write must not fail an otherwise-successful login;
        // the next refresh re-attempts the save.
        if let Err(err) = self.inner.store.save(&credential).await {
            warn!(error = %err, "credential cache write failed, continuing with in-memory credential");
        }

        *self.inner.current.write().await = Some(credential.clone());
        info!(expires_at = %credential.expires_at, "credential refreshed");
        Ok(credential)
    }

    async fn usable_in_process(&self) -> Option<Credential> {
        self.inner
            .current
            .read()
            .await
            .as_ref()
            .filter(|c| c.is_usable())
            .cloned()
    }

    async fn exchange(&self) -> Result<Credential, FiscalError> {
        let ticket = self.inner.signer.create_signed_ticket(&self.inner.service)?;
        let envelope = login_envelope(&ticket);

        let body = self
            .inner
            .policy
            .run("loginCms", || {
                self.inner
                    .transport
                    .call(&self.inner.auth_url, LOGIN_ACTION, envelope.clone())
            })
            .await
            .map_err(|e| e.exhausted("loginCms", self.inner.policy.max_attempts))?;

        metrics::record_auth_exchange();
        parse_login_response(&self.inner.holder_id, &body)
    }
}

fn login_envelope(ticket: &str) -> String {
    soap::envelope(
        LOGIN_NS,
        &format!("<ar:loginCms><ar:in0>{}</ar:in0></ar:loginCms>", ticket),
    )
}

/// Extracts the credential from a login response. The ticket response
/// document arrives XML-escaped inside `<loginCmsReturn>`; a bare ticket
/// response (no transport envelope) is accepted as well.
fn parse_login_response(holder_id: &str, body: &str) -> Result<Credential, FiscalError> {
    if let Some(fault) = xml::fault_string(body) {
        return Err(FiscalError::Protocol(format!("login fault: {fault}")));
    }

    let document = match xml::first_text(body, "loginCmsReturn")? {
        Some(inner) => inner,
        None => body.to_string(),
    };

    let token = xml::required_text(&document, "token")?;
    let sign = xml::required_text(&document, "sign")?;
    let expiration = xml::required_text(&document, "expirationTime")?;

    if token.is_empty() || sign.is_empty() {
        return Err(FiscalError::Protocol(
            "login response carries an empty token or sign".to_string(),
        ));
    }

    let expires_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&expiration)
        .map_err(|e| {
            FiscalError::Protocol(format!("invalid expirationTime {expiration:?}: {e}"))
        })?
        .with_timezone(&Utc);

    Ok(Credential {
        holder_id: holder_id.to_string(),
        token,
        sign,
        expires_at,
    })
}
