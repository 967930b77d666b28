use anyhow::{Context, Result};
use dotenvy::dotenv;
use fiscal_core::retry::RetryPolicy;
use secrecy::Secret;
use std::env;
use std::time::Duration;

const TEST_AUTH_URL: &str = "https://wsaahomo.afip.gov.ar/ws/services/LoginCms";
const TEST_BILLING_URL: &str = "https://wswhomo.afip.gov.ar/wsfev1/service.asmx";
const PRODUCTION_AUTH_URL: &str = "https://wsaa.afip.gov.ar/ws/services/LoginCms";
const PRODUCTION_BILLING_URL: &str = "https://servicios1.afip.gov.ar/wsfev1/service.asmx";

/// Target environment of the authority's services.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Test,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Test => "test",
            Environment::Production => "production",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "production" => Environment::Production,
            _ => Environment::Test,
        }
    }

    fn default_auth_url(&self) -> &'static str {
        match self {
            Environment::Test => TEST_AUTH_URL,
            Environment::Production => PRODUCTION_AUTH_URL,
        }
    }

    fn default_billing_url(&self) -> &'static str {
        match self {
            Environment::Test => TEST_BILLING_URL,
            Environment::Production => PRODUCTION_BILLING_URL,
        }
    }
}

/// Configuration for the authentication and issuance clients.
#[derive(Clone, Debug)]
pub struct FiscalConfig {
    /// Authentication service endpoint (ticket exchange).
    pub auth_url: String,
    /// Billing service endpoint (invoice authorization).
    pub billing_url: String,
    /// Holder tax identifier (CUIT) the certificate was issued for.
    pub cuit: String,
    /// Holder certificate, PEM-encoded.
    pub certificate_pem: String,
    /// Holder private key, PEM-encoded.
    pub private_key_pem: Secret<String>,
    pub environment: Environment,
    /// Service name requested in access tickets.
    pub service_name: String,
    /// Validity window requested for access tickets.
    pub ticket_lifetime: Duration,
    /// Client-side timeout applied to every outbound call.
    pub request_timeout: Duration,
    pub retry_attempts: u32,
    pub retry_delay: Duration,
}

impl FiscalConfig {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let environment = Environment::from_string(
            &env::var("EINVOICING_ENVIRONMENT").unwrap_or_else(|_| "test".to_string()),
        );

        let auth_url = env::var("EINVOICING_AUTH_URL")
            .unwrap_or_else(|_| environment.default_auth_url().to_string());
        let billing_url = env::var("EINVOICING_BILLING_URL")
            .unwrap_or_else(|_| environment.default_billing_url().to_string());

        let cuit = env::var("EINVOICING_CUIT").context("EINVOICING_CUIT must be set")?;

        let certificate_pem = pem_from_env("EINVOICING_CERT_PEM")?;
        let private_key_pem = Secret::new(pem_from_env("EINVOICING_KEY_PEM")?);

        let service_name =
            env::var("EINVOICING_SERVICE_NAME").unwrap_or_else(|_| "wsfe".to_string());

        let ticket_lifetime =
            Duration::from_secs(env_u64("EINVOICING_TICKET_LIFETIME_SECS", 43_200)?);
        let request_timeout = Duration::from_secs(env_u64("EINVOICING_REQUEST_TIMEOUT_SECS", 30)?);
        let retry_attempts = env_u64("EINVOICING_RETRY_ATTEMPTS", 3)? as u32;
        let retry_delay = Duration::from_secs(env_u64("EINVOICING_RETRY_DELAY_SECS", 2)?);

        Ok(Self {
            auth_url,
            billing_url,
            cuit,
            certificate_pem,
            private_key_pem,
            environment,
            service_name,
            ticket_lifetime,
            request_timeout,
            retry_attempts,
            retry_delay,
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_attempts, self.retry_delay)
    }
}

/// Reads PEM material from `<VAR>` directly, or from the file named by
/// `<VAR>_FILE`.
fn pem_from_env(var: &str) -> Result<String> {
    if let Ok(inline) = env::var(var) {
        return Ok(inline);
    }
    let file_var = format!("{var}_FILE");
    let path = env::var(&file_var).with_context(|| format!("{var} or {file_var} must be set"))?;
    std::fs::read_to_string(&path).with_context(|| format!("failed to read {file_var} ({path})"))
}

fn env_u64(var: &str, default: u64) -> Result<u64> {
    match env::var(var) {
        Ok(value) => value
            .parse()
            .with_context(|| format!("{var} must be an integer, got {value:?}")),
        Err(_) => Ok(default),
    }
}
