//! Access-ticket signer.
//!
//! Builds the time-boxed login ticket request and wraps it in a CMS
//! (PKCS#7) SignedData structure: SHA-256 digest, signing certificate
//! embedded, content-type / message-digest / signing-time as authenticated
//! attributes. The result travels base64-encoded inside the authentication
//! request.
//!
//! Signing never touches the network; every failure here means the holder
//! certificate or key is misconfigured.

use crate::config::FiscalConfig;
use crate::error::FiscalError;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use openssl::cms::{CMSOptions, CmsContentInfo};
use openssl::pkey::{PKey, Private};
use openssl::x509::X509;
use rand::Rng;
use secrecy::ExposeSecret;

#[derive(Debug)]
pub struct TicketSigner {
    certificate: X509,
    private_key: PKey<Private>,
    ticket_lifetime: Duration,
}

impl TicketSigner {
    /// Parses the PEM certificate and key once; later signing reuses them.
    pub fn from_config(config: &FiscalConfig) -> Result<Self, FiscalError> {
        let certificate = X509::from_pem(config.certificate_pem.as_bytes())
            .map_err(|e| FiscalError::Configuration(format!("invalid signing certificate: {e}")))?;
        let private_key =
            PKey::private_key_from_pem(config.private_key_pem.expose_secret().as_bytes())
                .map_err(|e| FiscalError::Configuration(format!("invalid private key: {e}")))?;
        let ticket_lifetime = Duration::from_std(config.ticket_lifetime).map_err(|_| {
            FiscalError::Configuration(format!(
                "ticket lifetime out of range: {:?}",
                config.ticket_lifetime
            ))
        })?;

        Ok(Self {
            certificate,
            private_key,
            ticket_lifetime,
        })
    }

    /// Builds and signs a login ticket for `service`, returning the base64
    /// CMS blob.
    pub fn create_signed_ticket(&self, service: &str) -> Result<String, FiscalError> {
        let now = Utc::now();
        let unique_id: u32 = rand::thread_rng().gen();
        let request = build_ticket_request(service, unique_id, now, now + self.ticket_lifetime);
        self.sign(request.as_bytes())
    }

    fn sign(&self, document: &[u8]) -> Result<String, FiscalError> {
        let cms = CmsContentInfo::sign(
            Some(&self.certificate),
            Some(&self.private_key),
            None,
            Some(document),
            CMSOptions::empty(),
        )
        .map_err(|e| FiscalError::Configuration(format!("CMS signing failed: {e}")))?;

        let der = cms
            .to_der()
            .map_err(|e| FiscalError::Configuration(format!("CMS serialization failed: {e}")))?;

        Ok(BASE64.encode(der))
    }
}

/// Pure ticket-document builder; the signer feeds it clock and randomness.
fn build_ticket_request(
    service: &str,
    unique_id: u32,
    generation: DateTime<Utc>,
    expiration: DateTime<Utc>,
) -> String {
    format!(
        concat!(
            r#"<?xml version="1.0" encoding="UTF-8"?>"#,
            "\n<loginTicketRequest version=\"1.0\">",
            "<header>",
            "<uniqueId>{unique_id}</uniqueId>",
            "<generationTime>{generation}</generationTime>",
            "<expirationTime>{expiration}</expirationTime>",
            "</header>",
            "<service>{service}</service>",
            "</loginTicketRequest>"
        ),
        unique_id = unique_id,
        generation = generation.to_rfc3339_opts(SecondsFormat::Secs, true),
        expiration = expiration.to_rfc3339_opts(SecondsFormat::Secs, true),
        service = crate::services::soap::escape(service),
    )
}
