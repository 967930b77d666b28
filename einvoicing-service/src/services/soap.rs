//! SOAP transport for the authority's web services.
//!
//! Outbound calls go through the [`WsTransport`] seam so the clients can be
//! exercised against scripted transports. The production implementation
//! classifies failures for the retry layer: connection errors, timeouts and
//! 5xx responses without a fault document are transport failures; everything
//! else that deviates from the contract is a protocol failure.

use crate::error::FiscalError;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

/// Outbound call seam for both remote services.
#[async_trait]
pub trait WsTransport: Send + Sync {
    async fn call(&self, url: &str, action: &str, envelope: String)
        -> Result<String, FiscalError>;
}

/// HTTP SOAP client with a bounded per-request timeout.
#[derive(Clone)]
pub struct SoapClient {
    client: Client,
}

impl SoapClient {
    pub fn new(timeout: Duration) -> Result<Self, FiscalError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FiscalError::Configuration(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl WsTransport for SoapClient {
    async fn call(
        &self,
        url: &str,
        action: &str,
        envelope: String,
    ) -> Result<String, FiscalError> {
        let response = self
            .client
            .post(url)
            .header("Content-Type", "text/xml; charset=utf-8")
            .header("SOAPAction", action)
            .body(envelope)
            .send()
            .await
            .map_err(|e| FiscalError::Transport(format!("request to {url} failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| FiscalError::Transport(format!("failed to read response body: {e}")))?;

        debug!(%status, url, action, body_len = body.len(), "service response");

        if status.is_success() {
            return Ok(body);
        }

        // Well-formed SOAP faults ride on 500 responses; they are contract
        // rejections, not transient conditions.
        if let Some(fault) = xml::fault_string(&body) {
            return Err(FiscalError::Protocol(format!("service fault: {fault}")));
        }

        if status.is_server_error() {
            Err(FiscalError::Transport(format!("{url} returned {status}")))
        } else {
            Err(FiscalError::Protocol(format!("{url} returned {status}")))
        }
    }
}

/// Wraps operation-specific body fields in a SOAP 1.1 envelope.
pub fn envelope(ns: &str, body: &str) -> String {
    format!(
        concat!(
            r#"<soapenv:Envelope xmlns:soapenv="http://schemas.xmlsoap.org/soap/envelope/" xmlns:ar="{ns}">"#,
            "<soapenv:Header/>",
            "<soapenv:Body>{body}</soapenv:Body>",
            "</soapenv:Envelope>"
        ),
        ns = ns,
        body = body,
    )
}

/// Escapes a text node for inclusion in a request document.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

/// Strict, namespace-agnostic XML field extraction over response bodies.
pub mod xml {
    use crate::error::FiscalError;
    use quick_xml::events::Event;
    use quick_xml::Reader;

    /// Text content of every `tag` element, in document order. Empty
    /// elements contribute an empty string.
    pub fn all_texts(xml: &str, tag: &str) -> Result<Vec<String>, FiscalError> {
        let mut reader = Reader::from_str(xml);
        let mut out = Vec::new();
        let mut depth = 0usize;
        let mut current = String::new();

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) if e.local_name().as_ref() == tag.as_bytes() => {
                    depth += 1;
                    if depth == 1 {
                        current.clear();
                    }
                }
                Ok(Event::Empty(e)) if e.local_name().as_ref() == tag.as_bytes() => {
                    if depth == 0 {
                        out.push(String::new());
                    }
                }
                Ok(Event::End(e)) if e.local_name().as_ref() == tag.as_bytes() => {
                    if depth > 0 {
                        depth -= 1;
                        if depth == 0 {
                            out.push(std::mem::take(&mut current));
                        }
                    }
                }
                Ok(Event::Text(t)) if depth > 0 => {
                    let text = t
                        .unescape()
                        .map_err(|e| FiscalError::Protocol(format!("malformed XML text: {e}")))?;
                    current.push_str(text.trim());
                }
                Ok(Event::CData(t)) if depth > 0 => {
                    current.push_str(&String::from_utf8_lossy(&t));
                }
                Ok(Event::Eof) => break,
                Err(e) => {
                    return Err(FiscalError::Protocol(format!("malformed XML response: {e}")))
                }
                _ => {}
            }
        }

        Ok(out)
    }

    /// Text of the first `tag` element, if present.
    pub fn first_text(xml: &str, tag: &str) -> Result<Option<String>, FiscalError> {
        Ok(all_texts(xml, tag)?.into_iter().next())
    }

    /// Text of the first `tag` element, or a protocol error naming the
    /// missing field.
    pub fn required_text(xml: &str, tag: &str) -> Result<String, FiscalError> {
        first_text(xml, tag)?
            .ok_or_else(|| FiscalError::Protocol(format!("response missing <{tag}>")))
    }

    /// Raw inner markup of the first `tag` element. Used to scope nested
    /// extraction (e.g. `<Code>` inside `<Errors>` vs. `<Observaciones>`).
    pub fn section<'a>(xml: &'a str, tag: &str) -> Result<Option<&'a str>, FiscalError> {
        let mut reader = Reader::from_str(xml);
        let mut start: Option<usize> = None;
        let mut depth = 0usize;

        loop {
            let before = reader.buffer_position() as usize;
            match reader.read_event() {
                Ok(Event::Start(e)) if e.local_name().as_ref() == tag.as_bytes() => {
                    if depth == 0 {
                        start = Some(reader.buffer_position() as usize);
                    }
                    depth += 1;
                }
                Ok(Event::Empty(e)) if e.local_name().as_ref() == tag.as_bytes() => {
                    if depth == 0 {
                        return Ok(Some(""));
                    }
                }
                Ok(Event::End(e)) if e.local_name().as_ref() == tag.as_bytes() => {
                    if depth > 0 {
                        depth -= 1;
                        if depth == 0 {
                            let s = start.expect("section start recorded at depth 0");
                            return Ok(Some(&xml[s..before]));
                        }
                    }
                }
                Ok(Event::Eof) => return Ok(None),
                Err(e) => {
                    return Err(FiscalError::Protocol(format!("malformed XML response: {e}")))
                }
                _ => {}
            }
        }
    }

    /// `faultstring` of a SOAP fault document, if the body carries one.
    pub fn fault_string(xml: &str) -> Option<String> {
        let fault = section(xml, "Fault").ok().flatten()?;
        first_text(fault, "faultstring").ok().flatten()
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        const SAMPLE: &str = r#"<?xml version="1.0"?>
            <Response xmlns:ar="urn:x">
              <Errors><Err><Code>600</Code><Msg>not authorized</Msg></Err></Errors>
              <Detail><Code>10</Code><Msg>obs &amp; more</Msg><Empty/></Detail>
            </Response>"#;

        #[test]
        fn all_texts_collects_in_order() {
            assert_eq!(all_texts(SAMPLE, "Code").unwrap(), vec!["600", "10"]);
        }

        #[test]
        fn text_is_unescaped() {
            let detail = section(SAMPLE, "Detail").unwrap().unwrap();
            assert_eq!(first_text(detail, "Msg").unwrap().unwrap(), "obs & more");
        }

        #[test]
        fn section_scopes_extraction() {
            let errors = section(SAMPLE, "Errors").unwrap().unwrap();
            assert_eq!(all_texts(errors, "Code").unwrap(), vec!["600"]);
            assert!(section(SAMPLE, "Nope").unwrap().is_none());
        }

        #[test]
        fn required_text_names_the_missing_field() {
            let err = required_text(SAMPLE, "Token").unwrap_err();
            assert!(err.to_string().contains("<Token>"));
        }

        #[test]
        fn empty_elements_yield_empty_strings() {
            assert_eq!(all_texts(SAMPLE, "Empty").unwrap(), vec![""]);
        }

        #[test]
        fn malformed_xml_is_a_protocol_error() {
            let err = all_texts("<a><b></a>", "b").unwrap_err();
            assert!(matches!(err, FiscalError::Protocol(_)));
        }

        #[test]
        fn fault_string_is_detected() {
            let body = r#"<soap:Envelope xmlns:soap="urn:s"><soap:Body>
                <soap:Fault><faultcode>cms.bad</faultcode>
                <faultstring>certificate expired</faultstring></soap:Fault>
                </soap:Body></soap:Envelope>"#;
            assert_eq!(fault_string(body).unwrap(), "certificate expired");
            assert!(fault_string("<ok/>").is_none());
        }
    }
}
