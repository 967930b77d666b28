//! Invoice authorization request and result models.

use crate::error::FiscalError;
use chrono::NaiveDate;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Outcome code returned by the authority for an authorization request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Approved,
    Rejected,
    Partial,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Approved => "A",
            Outcome::Rejected => "R",
            Outcome::Partial => "P",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "A" => Some(Outcome::Approved),
            "R" => Some(Outcome::Rejected),
            "P" => Some(Outcome::Partial),
            _ => None,
        }
    }
}

/// Structured observation or error carried in an authority response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorityEvent {
    pub code: u32,
    pub message: String,
}

/// One VAT rate bucket of the breakdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VatLine {
    /// Authority rate identifier (reference table "VAT rates").
    pub rate_id: u16,
    pub base: Decimal,
    pub amount: Decimal,
}

/// Sale line as recorded in the ledger. Lines are not transmitted to the
/// authority; only their aggregated amounts travel on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineItem {
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub discount: Decimal,
    pub subtotal: Decimal,
}

/// Reference to a previously authorized document (credit/debit notes).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssociatedDocument {
    pub document_type: u16,
    pub sales_point: u32,
    pub number: u64,
}

/// Everything needed to request an authorization code for one sale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceRequest {
    pub sales_point: u32,
    pub document_type: u16,
    pub concept: u16,
    pub buyer_doc_type: u16,
    pub buyer_doc_number: u64,
    pub issue_date: NaiveDate,
    pub total_amount: Decimal,
    pub net_amount: Decimal,
    pub vat_amount: Decimal,
    /// Exempt component; tracked but zero in current scope.
    pub exempt_amount: Decimal,
    /// Non-taxable component; tracked but zero in current scope.
    pub untaxed_amount: Decimal,
    pub currency: String,
    pub currency_rate: Decimal,
    pub vat_breakdown: Vec<VatLine>,
    pub line_items: Vec<LineItem>,
    pub associated_documents: Vec<AssociatedDocument>,
}

impl InvoiceRequest {
    /// Copy with every monetary field rounded to 2 decimals, the precision
    /// the wire contract transmits.
    pub fn rounded(&self) -> InvoiceRequest {
        InvoiceRequest {
            total_amount: round_money(self.total_amount),
            net_amount: round_money(self.net_amount),
            vat_amount: round_money(self.vat_amount),
            exempt_amount: round_money(self.exempt_amount),
            untaxed_amount: round_money(self.untaxed_amount),
            currency_rate: self.currency_rate.round_dp(6),
            vat_breakdown: self
                .vat_breakdown
                .iter()
                .map(|line| VatLine {
                    rate_id: line.rate_id,
                    base: round_money(line.base),
                    amount: round_money(line.amount),
                })
                .collect(),
            ..self.clone()
        }
    }

    /// Checks the amount invariants on already-rounded values.
    pub fn validate(&self) -> Result<(), FiscalError> {
        let expected_total =
            self.net_amount + self.vat_amount + self.exempt_amount + self.untaxed_amount;
        if self.total_amount != expected_total {
            return Err(FiscalError::InvalidRequest(format!(
                "total {} does not equal net {} + vat {} + exempt {} + untaxed {}",
                self.total_amount,
                self.net_amount,
                self.vat_amount,
                self.exempt_amount,
                self.untaxed_amount
            )));
        }

        let breakdown_total: Decimal = self.vat_breakdown.iter().map(|line| line.amount).sum();
        if breakdown_total != self.vat_amount {
            return Err(FiscalError::InvalidRequest(format!(
                "VAT breakdown sums to {breakdown_total}, declared VAT is {}",
                self.vat_amount
            )));
        }

        Ok(())
    }

    /// True when any breakdown line carries VAT; a zero breakdown is omitted
    /// from the wire request.
    pub fn has_vat(&self) -> bool {
        self.vat_breakdown
            .iter()
            .any(|line| !line.amount.is_zero())
    }
}

/// Result of one authorization attempt. Immutable; the sales ledger persists
/// it outside this subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceResult {
    pub outcome: Outcome,
    /// Authorization code (CAE); present iff the outcome is approved.
    pub cae: Option<String>,
    pub cae_expiry: Option<NaiveDate>,
    pub assigned_number: Option<u64>,
    pub observations: Vec<AuthorityEvent>,
    pub errors: Vec<AuthorityEvent>,
}

/// Half-away-from-zero rounding to 2 decimals.
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn request() -> InvoiceRequest {
        InvoiceRequest {
            sales_point: 1,
            document_type: 6,
            concept: 1,
            buyer_doc_type: 96,
            buyer_doc_number: 12345678,
            issue_date: NaiveDate::from_ymd_opt(2026, 3, 14).unwrap(),
            total_amount: dec("121.00"),
            net_amount: dec("100.00"),
            vat_amount: dec("21.00"),
            exempt_amount: Decimal::ZERO,
            untaxed_amount: Decimal::ZERO,
            currency: "PES".to_string(),
            currency_rate: Decimal::ONE,
            vat_breakdown: vec![VatLine {
                rate_id: 5,
                base: dec("100.00"),
                amount: dec("21.00"),
            }],
            line_items: vec![],
            associated_documents: vec![],
        }
    }

    #[test]
    fn valid_request_passes() {
        assert!(request().validate().is_ok());
    }

    #[test]
    fn total_mismatch_is_rejected() {
        let mut req = request();
        req.total_amount = dec("120.99");
        assert!(matches!(
            req.validate(),
            Err(FiscalError::InvalidRequest(_))
        ));
    }

    #[test]
    fn breakdown_mismatch_is_rejected() {
        let mut req = request();
        req.vat_breakdown[0].amount = dec("20.99");
        assert!(matches!(
            req.validate(),
            Err(FiscalError::InvalidRequest(_))
        ));
    }

    #[test]
    fn rounding_keeps_breakdown_consistent_with_totals() {
        // Amounts with more than 2 decimals round to the same transmitted
        // values in the detail record and the breakdown.
        let mut req = request();
        req.net_amount = dec("100.004");
        req.vat_amount = dec("21.0009");
        req.total_amount = dec("121.0049");
        req.vat_breakdown[0].base = dec("100.004");
        req.vat_breakdown[0].amount = dec("21.0009");

        let rounded = req.rounded();
        assert_eq!(rounded.net_amount, dec("100.00"));
        assert_eq!(rounded.vat_amount, dec("21.00"));
        assert_eq!(rounded.total_amount, dec("121.00"));
        assert_eq!(rounded.vat_breakdown[0].amount, rounded.vat_amount);
        assert!(rounded.validate().is_ok());
    }

    #[test]
    fn half_rounds_away_from_zero() {
        assert_eq!(round_money(dec("1.005")), dec("1.01"));
        assert_eq!(round_money(dec("-1.005")), dec("-1.01"));
    }

    #[test]
    fn vat_presence_tracks_nonzero_lines() {
        let mut req = request();
        assert!(req.has_vat());
        req.vat_breakdown[0].amount = Decimal::ZERO;
        assert!(!req.has_vat());
        req.vat_breakdown.clear();
        assert!(!req.has_vat());
    }

    #[test]
    fn outcome_codes_round_trip() {
        assert_eq!(Outcome::from_code("A"), Some(Outcome::Approved));
        assert_eq!(Outcome::from_code("R"), Some(Outcome::Rejected));
        assert_eq!(Outcome::from_code("P"), Some(Outcome::Partial));
        assert_eq!(Outcome::from_code("X"), None);
        assert_eq!(Outcome::Approved.as_str(), "A");
    }
}
