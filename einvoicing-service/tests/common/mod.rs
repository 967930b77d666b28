#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration, Utc};
use einvoicing_service::config::{Environment, FiscalConfig};
use einvoicing_service::error::FiscalError;
use einvoicing_service::models::Credential;
use einvoicing_service::services::{
    CredentialStore, InMemoryCredentialStore, TicketSigner, WsTransport, WsaaClient, WsfeClient,
};
use openssl::asn1::Asn1Time;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::PKey;
use openssl::rsa::Rsa;
use openssl::x509::{X509NameBuilder, X509};
use secrecy::Secret;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::Mutex;

pub const CUIT: &str = "20111111112";

/// Transport double: canned responses per SOAPAction, with call counting.
pub struct ScriptedTransport {
    scripts: Mutex<HashMap<String, VecDeque<Result<String, FiscalError>>>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
        })
    }

    pub async fn enqueue(&self, action: &str, response: Result<String, FiscalError>) {
        self.scripts
            .lock()
            .await
            .entry(action.to_string())
            .or_default()
            .push_back(response);
    }

    pub async fn calls(&self, action: &str) -> usize {
        self.calls.lock().await.get(action).copied().unwrap_or(0)
    }
}

#[async_trait]
impl WsTransport for ScriptedTransport {
    async fn call(
        &self,
        _url: &str,
        action: &str,
        _envelope: String,
    ) -> Result<String, FiscalError> {
        *self
            .calls
            .lock()
            .await
            .entry(action.to_string())
            .or_insert(0) += 1;

        self.scripts
            .lock()
            .await
            .get_mut(action)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| {
                Err(FiscalError::Protocol(format!("unscripted call to {action}")))
            })
    }
}

/// Store double whose writes always fail; loads see nothing.
pub struct FailingStore;

#[async_trait]
impl CredentialStore for FailingStore {
    async fn load(&self, _holder_id: &str) -> Result<Option<Credential>, FiscalError> {
        Ok(None)
    }

    async fn save(&self, _credential: &Credential) -> Result<(), FiscalError> {
        Err(FiscalError::Store(anyhow::anyhow!("disk full")))
    }
}

/// Self-signed certificate + key pair for signing in tests.
pub fn test_identity() -> (String, String) {
    let rsa = Rsa::generate(2048).unwrap();
    let key = PKey::from_rsa(rsa).unwrap();

    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_nid(Nid::COMMONNAME, "test-holder")
        .unwrap();
    let name = name.build();

    let mut builder = X509::builder().unwrap();
    builder.set_version(2).unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder.set_pubkey(&key).unwrap();
    builder
        .set_not_before(&Asn1Time::days_from_now(0).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::days_from_now(365).unwrap())
        .unwrap();
    builder.sign(&key, MessageDigest::sha256()).unwrap();
    let cert = builder.build();

    (
        String::from_utf8(cert.to_pem().unwrap()).unwrap(),
        String::from_utf8(key.private_key_to_pem_pkcs8().unwrap()).unwrap(),
    )
}

pub fn test_config() -> FiscalConfig {
    let (certificate_pem, key_pem) = test_identity();
    FiscalConfig {
        auth_url: "http://localhost/auth".to_string(),
        billing_url: "http://localhost/billing".to_string(),
        cuit: CUIT.to_string(),
        certificate_pem,
        private_key_pem: Secret::new(key_pem),
        environment: Environment::Test,
        service_name: "wsfe".to_string(),
        ticket_lifetime: StdDuration::from_secs(600),
        request_timeout: StdDuration::from_secs(5),
        retry_attempts: 3,
        retry_delay: StdDuration::from_millis(5),
    }
}

pub struct TestHarness {
    pub transport: Arc<ScriptedTransport>,
    pub store: Arc<InMemoryCredentialStore>,
    pub wsaa: WsaaClient,
    pub wsfe: WsfeClient,
}

pub fn harness() -> TestHarness {
    let config = test_config();
    let transport = ScriptedTransport::new();
    let store = Arc::new(InMemoryCredentialStore::new());
    let signer = TicketSigner::from_config(&config).unwrap();
    let wsaa = WsaaClient::new(
        &config,
        signer,
        store.clone() as Arc<dyn CredentialStore>,
        transport.clone() as Arc<dyn WsTransport>,
    );
    let wsfe = WsfeClient::new(&config, wsaa.clone(), transport.clone() as Arc<dyn WsTransport>);

    TestHarness {
        transport,
        store,
        wsaa,
        wsfe,
    }
}

/// Puts a long-lived credential in the shared store so authenticated calls
/// skip the login exchange.
pub async fn seed_credential(store: &InMemoryCredentialStore) {
    store
        .save(&Credential {
            holder_id: CUIT.to_string(),
            token: "SEEDED-TOKEN".to_string(),
            sign: "SEEDED-SIGN".to_string(),
            expires_at: Utc::now() + Duration::hours(12),
        })
        .await
        .unwrap();
}

pub fn login_body(expires_in_minutes: i64) -> String {
    let expiration = (Utc::now() + Duration::minutes(expires_in_minutes))
        .to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
    format!(
        concat!(
            r#"<?xml version="1.0"?><loginTicketResponse version="1.0">"#,
            "<header><expirationTime>{exp}</expirationTime></header>",
            "<credentials><token>FRESH-TOKEN</token><sign>FRESH-SIGN</sign></credentials>",
            "</loginTicketResponse>"
        ),
        exp = expiration,
    )
}

pub fn last_number_body(number: u64) -> String {
    format!(
        concat!(
            "<FECompUltimoAutorizadoResponse><FECompUltimoAutorizadoResult>",
            "<PtoVta>3</PtoVta><CbteTipo>6</CbteTipo><CbteNro>{n}</CbteNro>",
            "</FECompUltimoAutorizadoResult></FECompUltimoAutorizadoResponse>"
        ),
        n = number,
    )
}

pub fn approved_body(number: u64) -> String {
    format!(
        concat!(
            "<FECAESolicitarResponse><FECAESolicitarResult>",
            "<FeCabResp><Resultado>A</Resultado></FeCabResp>",
            "<FeDetResp><FECAEDetResponse>",
            "<CbteDesde>{n}</CbteDesde><CbteHasta>{n}</CbteHasta>",
            "<Resultado>A</Resultado>",
            "<CAE>76123456789012</CAE><CAEFchVto>20260324</CAEFchVto>",
            "</FECAEDetResponse></FeDetResp>",
            "</FECAESolicitarResult></FECAESolicitarResponse>"
        ),
        n = number,
    )
}

pub fn rejected_body(number: u64, code: u32, message: &str) -> String {
    format!(
        concat!(
            "<FECAESolicitarResponse><FECAESolicitarResult>",
            "<FeCabResp><Resultado>R</Resultado></FeCabResp>",
            "<FeDetResp><FECAEDetResponse>",
            "<CbteDesde>{n}</CbteDesde><Resultado>R</Resultado>",
            "<Observaciones><Obs><Code>{code}</Code><Msg>{msg}</Msg></Obs></Observaciones>",
            "</FECAEDetResponse></FeDetResp>",
            "</FECAESolicitarResult></FECAESolicitarResponse>"
        ),
        n = number,
        code = code,
        msg = message,
    )
}

pub fn dummy_body(app: &str, db: &str, auth: &str) -> String {
    format!(
        concat!(
            "<FEDummyResponse><FEDummyResult>",
            "<AppServer>{app}</AppServer><DbServer>{db}</DbServer><AuthServer>{auth}</AuthServer>",
            "</FEDummyResult></FEDummyResponse>"
        ),
        app = app,
        db = db,
        auth = auth,
    )
}
