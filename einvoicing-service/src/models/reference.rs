//! Service health, reference tables and issued-invoice lookups.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Outcome;

/// Health probe result: one status string per backing server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerStatus {
    pub app: String,
    pub db: String,
    pub auth: String,
}

impl ServerStatus {
    pub fn is_ok(&self) -> bool {
        self.app == "OK" && self.db == "OK" && self.auth == "OK"
    }
}

/// Static reference tables published by the billing service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceTable {
    DocumentTypes,
    ConceptTypes,
    VatRates,
    SalesPoints,
}

impl ReferenceTable {
    /// Remote operation serving this table.
    pub fn operation(&self) -> &'static str {
        match self {
            ReferenceTable::DocumentTypes => "FEParamGetTiposCbte",
            ReferenceTable::ConceptTypes => "FEParamGetTiposConcepto",
            ReferenceTable::VatRates => "FEParamGetTiposIva",
            ReferenceTable::SalesPoints => "FEParamGetPtosVenta",
        }
    }

    /// (record, id, description) element names in the response body.
    pub fn record_tags(&self) -> (&'static str, &'static str, &'static str) {
        match self {
            ReferenceTable::DocumentTypes => ("CbteTipo", "Id", "Desc"),
            ReferenceTable::ConceptTypes => ("ConceptoTipo", "Id", "Desc"),
            ReferenceTable::VatRates => ("IvaTipo", "Id", "Desc"),
            ReferenceTable::SalesPoints => ("PtoVenta", "Nro", "EmisionTipo"),
        }
    }
}

/// One row of a reference table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceEntry {
    pub id: String,
    pub description: String,
}

/// Previously authorized invoice as recorded by the authority.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuedInvoice {
    pub sales_point: u32,
    pub document_type: u16,
    pub number: u64,
    pub issue_date: NaiveDate,
    pub total_amount: Decimal,
    pub outcome: Outcome,
    pub cae: Option<String>,
    pub cae_expiry: Option<NaiveDate>,
}

/// Operator diagnostics: each check runs independently so a single failure
/// does not mask the others.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectivityReport {
    pub server: bool,
    pub authentication: bool,
    pub numbering: bool,
    pub errors: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_status_requires_all_three() {
        let ok = ServerStatus {
            app: "OK".into(),
            db: "OK".into(),
            auth: "OK".into(),
        };
        assert!(ok.is_ok());

        let degraded = ServerStatus {
            app: "OK".into(),
            db: "DOWN".into(),
            auth: "OK".into(),
        };
        assert!(!degraded.is_ok());
    }
}
