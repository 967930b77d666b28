//! Metric counters for the e-invoicing subsystem.
//!
//! Recorded through the `metrics` facade; the host application installs the
//! recorder/exporter.

use metrics::counter;

pub(crate) fn record_auth_exchange() {
    counter!("einvoicing_auth_exchanges_total").increment(1);
}

pub(crate) fn record_invoice_issued() {
    counter!("einvoicing_invoices_issued_total").increment(1);
}

pub(crate) fn record_invoice_rejected() {
    counter!("einvoicing_invoices_rejected_total").increment(1);
}
