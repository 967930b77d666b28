//! Invoice issuance client for the authority's billing service (WSFE).
//!
//! Every authenticated operation resolves a credential first, builds the
//! operation body, and goes out through the transport seam under the retry
//! policy. Authorization (`issue_invoice`) additionally serializes per
//! (sales point, document type) so concurrent callers in this process cannot
//! both claim the same next number; the remote counter stays authoritative.

use crate::config::FiscalConfig;
use crate::error::FiscalError;
use crate::models::{
    AuthorityEvent, ConnectivityReport, Credential, InvoiceRequest, InvoiceResult, IssuedInvoice,
    Outcome, ReferenceEntry, ReferenceTable, ServerStatus,
};
use crate::services::metrics;
use crate::services::soap::{self, xml, WsTransport};
use crate::services::wsaa::WsaaClient;
use chrono::NaiveDate;
use dashmap::DashMap;
use fiscal_core::retry::RetryPolicy;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, instrument};

const SERVICE_NS: &str = "http://ar.gov.afip.dif.FEV1/";

/// SOAPAction for a billing operation.
pub fn action(operation: &str) -> String {
    format!("{SERVICE_NS}{operation}")
}

#[derive(Clone)]
pub struct WsfeClient {
    inner: Arc<WsfeInner>,
}

struct WsfeInner {
    billing_url: String,
    cuit: String,
    auth: WsaaClient,
    transport: Arc<dyn WsTransport>,
    policy: RetryPolicy,
    issuance_locks: DashMap<(u32, u16), Arc<Mutex<()>>>,
}

impl WsfeClient {
    pub fn new(config: &FiscalConfig, auth: WsaaClient, transport: Arc<dyn WsTransport>) -> Self {
        Self {
            inner: Arc::new(WsfeInner {
                billing_url: config.billing_url.clone(),
                cuit: config.cuit.clone(),
                auth,
                transport,
                policy: config.retry_policy(),
                issuance_locks: DashMap::new(),
            }),
        }
    }

    /// Last authorized invoice number for the pair. Failures are fatal: a
    /// synthesized number risks a duplicate or a gap in the sequence.
    #[instrument(skip(self))]
    pub async fn get_last_number(
        &self,
        sales_point: u32,
        document_type: u16,
    ) -> Result<u64, FiscalError> {
        let fields = format!(
            "<ar:PtoVta>{sales_point}</ar:PtoVta><ar:CbteTipo>{document_type}</ar:CbteTipo>"
        );
        let body = self
            .call_authenticated("FECompUltimoAutorizado", &fields)
            .await?;
        fail_on_errors(&body)?;

        let number = xml::required_text(&body, "CbteNro")?;
        number
            .parse::<u64>()
            .map_err(|_| FiscalError::Protocol(format!("non-numeric last number {number:?}")))
    }

    /// Requests an authorization code (CAE) for one sale.
    #[instrument(skip(self, request), fields(sales_point = request.sales_point, document_type = request.document_type))]
    pub async fn issue_invoice(
        &self,
        request: &InvoiceRequest,
    ) -> Result<InvoiceResult, FiscalError> {
        let request = request.rounded();
        request.validate()?;

        // One issuance at a time per sequence; the remote counter is shared
        // state this subsystem cannot lock.
        let lock = self
            .inner
            .issuance_locks
            .entry((request.sales_point, request.document_type))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        let last = self
            .get_last_number(request.sales_point, request.document_type)
            .await?;
        let number = last + 1;

        let fields = format!(
            concat!(
                "<ar:FeCAEReq>",
                "<ar:FeCabReq>",
                "<ar:CantReg>1</ar:CantReg>",
                "<ar:PtoVta>{sales_point}</ar:PtoVta>",
                "<ar:CbteTipo>{document_type}</ar:CbteTipo>",
                "</ar:FeCabReq>",
                "<ar:FeDetReq>{detail}</ar:FeDetReq>",
                "</ar:FeCAEReq>"
            ),
            sales_point = request.sales_point,
            document_type = request.document_type,
            detail = detail_record(&request, number),
        );

        let body = self.call_authenticated("FECAESolicitar", &fields).await?;
        let result = parse_issue_response(&body);

        match &result {
            Ok(approved) => {
                metrics::record_invoice_issued();
                info!(
                    number,
                    cae = approved.cae.as_deref().unwrap_or_default(),
                    "invoice authorized"
                );
            }
            Err(FiscalError::Rejection { code, .. }) => {
                metrics::record_invoice_rejected();
                info!(number, code = *code, "invoice rejected by authority");
            }
            Err(_) => {}
        }

        result
    }

    /// Unauthenticated health probe; no retry, the caller decides next steps.
    #[instrument(skip(self))]
    pub async fn get_server_status(&self) -> Result<ServerStatus, FiscalError> {
        let envelope = soap::envelope(SERVICE_NS, "<ar:FEDummy/>");
        let body = self
            .inner
            .transport
            .call(&self.inner.billing_url, &action("FEDummy"), envelope)
            .await?;

        Ok(ServerStatus {
            app: xml::required_text(&body, "AppServer")?,
            db: xml::required_text(&body, "DbServer")?,
            auth: xml::required_text(&body, "AuthServer")?,
        })
    }

    /// Reads one of the static reference tables. The caller caches; entries
    /// change a few times a year at most.
    #[instrument(skip(self))]
    pub async fn get_reference_table(
        &self,
        table: ReferenceTable,
    ) -> Result<Vec<ReferenceEntry>, FiscalError> {
        let body = self.call_authenticated(table.operation(), "").await?;
        fail_on_errors(&body)?;

        let (record_tag, id_tag, desc_tag) = table.record_tags();
        let scope = xml::section(&body, "ResultGet")?
            .ok_or_else(|| FiscalError::Protocol("response missing <ResultGet>".to_string()))?;

        let records = xml::all_texts(scope, record_tag)?;
        let ids = xml::all_texts(scope, id_tag)?;
        let descriptions = xml::all_texts(scope, desc_tag)?;
        if ids.len() != descriptions.len() || ids.len() < records.len() {
            return Err(FiscalError::Protocol(format!(
                "reference table {record_tag}: {} ids vs {} descriptions",
                ids.len(),
                descriptions.len()
            )));
        }

        Ok(ids
            .into_iter()
            .zip(descriptions)
            .map(|(id, description)| ReferenceEntry { id, description })
            .collect())
    }

    /// Fetches an already-authorized invoice from the authority, for ledger
    /// reconciliation. "Not found" surfaces as the authority's rejection.
    #[instrument(skip(self))]
    pub async fn query_invoice(
        &self,
        sales_point: u32,
        document_type: u16,
        number: u64,
    ) -> Result<IssuedInvoice, FiscalError> {
        let fields = format!(
            concat!(
                "<ar:FeCompConsReq>",
                "<ar:CbteTipo>{document_type}</ar:CbteTipo>",
                "<ar:CbteNro>{number}</ar:CbteNro>",
                "<ar:PtoVta>{sales_point}</ar:PtoVta>",
                "</ar:FeCompConsReq>"
            ),
            document_type = document_type,
            number = number,
            sales_point = sales_point,
        );
        let body = self.call_authenticated("FECompConsultar", &fields).await?;
        fail_on_errors(&body)?;

        let scope = xml::section(&body, "ResultGet")?
            .ok_or_else(|| FiscalError::Protocol("response missing <ResultGet>".to_string()))?;

        let outcome_code = xml::required_text(scope, "Resultado")?;
        let outcome = Outcome::from_code(&outcome_code).ok_or_else(|| {
            FiscalError::Protocol(format!("unknown outcome code {outcome_code:?}"))
        })?;

        let cae = xml::first_text(scope, "CodAutorizacion")?.filter(|c| !c.is_empty());
        let cae_expiry = match xml::first_text(scope, "FchVto")?.filter(|d| !d.is_empty()) {
            Some(date) => Some(parse_wire_date(&date)?),
            None => None,
        };

        Ok(IssuedInvoice {
            sales_point,
            document_type,
            number: xml::required_text(scope, "CbteDesde")?
                .parse()
                .map_err(|_| FiscalError::Protocol("non-numeric invoice number".to_string()))?,
            issue_date: parse_wire_date(&xml::required_text(scope, "CbteFch")?)?,
            total_amount: parse_wire_amount(&xml::required_text(scope, "ImpTotal")?)?,
            outcome,
            cae,
            cae_expiry,
        })
    }

    /// Operator diagnostics. Each check runs independently so every failure
    /// is reported, not just the first.
    #[instrument(skip(self))]
    pub async fn verify_connectivity(
        &self,
        sales_point: u32,
        document_type: u16,
    ) -> ConnectivityReport {
        let mut report = ConnectivityReport::default();

        match self.get_server_status().await {
            Ok(status) if status.is_ok() => report.server = true,
            Ok(status) => report.errors.push(format!(
                "service degraded: app={}, db={}, auth={}",
                status.app, status.db, status.auth
            )),
            Err(err) => report
                .errors
                .push(format!("server status check failed: {err}")),
        }

        match self.inner.auth.get_credential().await {
            Ok(_) => report.authentication = true,
            Err(err) => report.errors.push(format!("authentication failed: {err}")),
        }

        match self.get_last_number(sales_point, document_type).await {
            Ok(_) => report.numbering = true,
            Err(err) => report
                .errors
                .push(format!("numbering query failed: {err}")),
        }

        report
    }

    async fn call_authenticated(
        &self,
        operation: &str,
        fields: &str,
    ) -> Result<String, FiscalError> {
        let credential = self.inner.auth.get_credential().await?;
        let envelope = authenticated_envelope(operation, &credential, &self.inner.cuit, fields);
        let soap_action = action(operation);

        self.inner
            .policy
            .run(operation, || {
                self.inner
                    .transport
                    .call(&self.inner.billing_url, &soap_action, envelope.clone())
            })
            .await
            .map_err(|e| e.exhausted(operation, self.inner.policy.max_attempts))
    }
}

fn authenticated_envelope(
    operation: &str,
    credential: &Credential,
    cuit: &str,
    fields: &str,
) -> String {
    let body = format!(
        concat!(
            "<ar:{operation}>",
            "<ar:Auth>",
            "<ar:Token>{token}</ar:Token>",
            "<ar:Sign>{sign}</ar:Sign>",
            "<ar:Cuit>{cuit}</ar:Cuit>",
            "</ar:Auth>",
            "{fields}",
            "</ar:{operation}>"
        ),
        operation = operation,
        token = soap::escape(&credential.token),
        sign = soap::escape(&credential.sign),
        cuit = cuit,
        fields = fields,
    );
    soap::envelope(SERVICE_NS, &body)
}

/// Wire detail record for one authorization request. The VAT breakdown is
/// emitted only when a non-zero line exists; associated documents only when
/// present.
fn detail_record(request: &InvoiceRequest, number: u64) -> String {
    let mut detail = format!(
        concat!(
            "<ar:FECAEDetRequest>",
            "<ar:Concepto>{concept}</ar:Concepto>",
            "<ar:DocTipo>{buyer_doc_type}</ar:DocTipo>",
            "<ar:DocNro>{buyer_doc_number}</ar:DocNro>",
            "<ar:CbteDesde>{number}</ar:CbteDesde>",
            "<ar:CbteHasta>{number}</ar:CbteHasta>",
            "<ar:CbteFch>{issue_date}</ar:CbteFch>",
            "<ar:ImpTotal>{total}</ar:ImpTotal>",
            "<ar:ImpTotConc>{untaxed}</ar:ImpTotConc>",
            "<ar:ImpNeto>{net}</ar:ImpNeto>",
            "<ar:ImpOpEx>{exempt}</ar:ImpOpEx>",
            "<ar:ImpTrib>0.00</ar:ImpTrib>",
            "<ar:ImpIVA>{vat}</ar:ImpIVA>",
            "<ar:MonId>{currency}</ar:MonId>",
            "<ar:MonCotiz>{currency_rate}</ar:MonCotiz>"
        ),
        concept = request.concept,
        buyer_doc_type = request.buyer_doc_type,
        buyer_doc_number = request.buyer_doc_number,
        number = number,
        issue_date = wire_date(request.issue_date),
        total = wire_amount(request.total_amount),
        untaxed = wire_amount(request.untaxed_amount),
        net = wire_amount(request.net_amount),
        exempt = wire_amount(request.exempt_amount),
        vat = wire_amount(request.vat_amount),
        currency = soap::escape(&request.currency),
        currency_rate = request.currency_rate,
    );

    if !request.associated_documents.is_empty() {
        detail.push_str("<ar:CbtesAsoc>");
        for doc in &request.associated_documents {
            detail.push_str(&format!(
                "<ar:CbteAsoc><ar:Tipo>{}</ar:Tipo><ar:PtoVta>{}</ar:PtoVta><ar:Nro>{}</ar:Nro></ar:CbteAsoc>",
                doc.document_type, doc.sales_point, doc.number
            ));
        }
        detail.push_str("</ar:CbtesAsoc>");
    }

    if request.has_vat() {
        detail.push_str("<ar:Iva>");
        for line in &request.vat_breakdown {
            detail.push_str(&format!(
                "<ar:AlicIva><ar:Id>{}</ar:Id><ar:BaseImp>{}</ar:BaseImp><ar:Importe>{}</ar:Importe></ar:AlicIva>",
                line.rate_id,
                wire_amount(line.base),
                wire_amount(line.amount)
            ));
        }
        detail.push_str("</ar:Iva>");
    }

    detail.push_str("</ar:FECAEDetRequest>");
    detail
}

/// Raises on a non-empty top-level error array or a fault document. These
/// are deterministic rejections; retrying would resend a bad request.
fn fail_on_errors(body: &str) -> Result<(), FiscalError> {
    if let Some(fault) = xml::fault_string(body) {
        return Err(FiscalError::Protocol(format!("service fault: {fault}")));
    }

    if let Some(errors) = xml::section(body, "Errors")? {
        let events = parse_events(errors)?;
        if let Some(first) = events.first() {
            return Err(FiscalError::rejection(
                first.code,
                first.message.clone(),
                events,
            ));
        }
    }

    Ok(())
}

fn parse_events(scope: &str) -> Result<Vec<AuthorityEvent>, FiscalError> {
    let codes = xml::all_texts(scope, "Code")?;
    let messages = xml::all_texts(scope, "Msg")?;
    if codes.len() != messages.len() {
        return Err(FiscalError::Protocol(format!(
            "mismatched event payload: {} codes vs {} messages",
            codes.len(),
            messages.len()
        )));
    }

    codes
        .into_iter()
        .zip(messages)
        .map(|(code, message)| {
            Ok(AuthorityEvent {
                code: code
                    .parse()
                    .map_err(|_| FiscalError::Protocol(format!("non-numeric event code {code:?}")))?,
                message,
            })
        })
        .collect()
}

fn parse_issue_response(body: &str) -> Result<InvoiceResult, FiscalError> {
    fail_on_errors(body)?;

    let detail = xml::section(body, "FECAEDetResponse")?
        .ok_or_else(|| FiscalError::Protocol("response missing detail record".to_string()))?;

    let outcome_code = xml::required_text(detail, "Resultado")?;
    let outcome = Outcome::from_code(&outcome_code)
        .ok_or_else(|| FiscalError::Protocol(format!("unknown outcome code {outcome_code:?}")))?;

    let observations = match xml::section(detail, "Observaciones")? {
        Some(scope) => parse_events(scope)?,
        None => Vec::new(),
    };

    if outcome != Outcome::Approved {
        // Partial counts as failure: the single detail we sent was not
        // approved. Observations go back verbatim.
        let (code, message) = observations
            .first()
            .map(|event| (event.code, event.message.clone()))
            .unwrap_or((0, format!("authority returned outcome {outcome_code}")));
        return Err(FiscalError::rejection(code, message, observations));
    }

    let cae = xml::required_text(detail, "CAE")?;
    if cae.is_empty() {
        // An approved outcome without an authorization code is a contract
        // violation, never a valid result.
        return Err(FiscalError::Protocol(
            "approved response carries an empty CAE".to_string(),
        ));
    }

    let assigned_number: u64 = xml::required_text(detail, "CbteDesde")?
        .parse()
        .map_err(|_| FiscalError::Protocol("non-numeric assigned number".to_string()))?;
    let cae_expiry = parse_wire_date(&xml::required_text(detail, "CAEFchVto")?)?;

    Ok(InvoiceResult {
        outcome,
        cae: Some(cae),
        cae_expiry: Some(cae_expiry),
        assigned_number: Some(assigned_number),
        observations,
        errors: Vec::new(),
    })
}

fn wire_date(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

fn parse_wire_date(s: &str) -> Result<NaiveDate, FiscalError> {
    NaiveDate::parse_from_str(s, "%Y%m%d")
        .map_err(|_| FiscalError::Protocol(format!("invalid wire date {s:?}")))
}

fn wire_amount(amount: Decimal) -> String {
    format!("{:.2}", amount)
}

fn parse_wire_amount(s: &str) -> Result<Decimal, FiscalError> {
    Decimal::from_str(s).map_err(|_| FiscalError::Protocol(format!("invalid wire amount {s:?}")))
}
