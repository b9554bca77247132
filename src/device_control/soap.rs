use super::types::Credentials;
use super::xml;
use crate::error_handling::types::DeviceError;
use log::{debug, trace};
use rand::Rng;
use sha1::{Digest, Sha1};
use std::time::Duration;

pub const DEVICE_NS: &str = "http://www.onvif.org/ver10/device/wsdl";
pub const MEDIA_NS: &str = "http://www.onvif.org/ver10/media/wsdl";
pub const PTZ_NS: &str = "http://www.onvif.org/ver20/ptz/wsdl";
pub const SCHEMA_NS: &str = "http://www.onvif.org/ver10/schema";

/// Password digest of a WS-Security UsernameToken: `Base64(SHA1(nonce + created + password))`.
pub fn password_digest(nonce: &[u8], created: &str, password: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(nonce);
    hasher.update(created.as_bytes());
    hasher.update(password.as_bytes());
    let digest = hasher.finalize();
    base64::Engine::encode(&base64::engine::general_purpose::STANDARD, digest)
}

/// Builds the `wsse:Security` header for `credentials` with a fresh nonce and timestamp.
pub fn ws_security_header(credentials: &Credentials) -> String {
    let nonce: [u8; 16] = rand::thread_rng().gen();
    let created = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();
    security_header_with(credentials, &nonce, &created)
}

fn security_header_with(credentials: &Credentials, nonce: &[u8], created: &str) -> String {
    let nonce_b64 = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, nonce);
    let digest = password_digest(nonce, created, &credentials.password);
    format!(
        r#"<wsse:Security s:mustUnderstand="1" xmlns:wsse="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd" xmlns:wsu="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-utility-1.0.xsd"><wsse:UsernameToken><wsse:Username>{}</wsse:Username><wsse:Password Type="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-username-token-profile-1.0#PasswordDigest">{}</wsse:Password><wsse:Nonce EncodingType="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-soap-message-security-1.0#Base64Binary">{}</wsse:Nonce><wsu:Created>{}</wsu:Created></wsse:UsernameToken></wsse:Security>"#,
        xml::escape(&credentials.username),
        digest,
        nonce_b64,
        created
    )
}

/// Wraps `body` in a SOAP 1.2 envelope, authenticated when a username is set.
pub fn envelope(credentials: &Credentials, body: &str) -> String {
    let header = if credentials.username.is_empty() {
        String::new()
    } else {
        ws_security_header(credentials)
    };
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope" xmlns:tt="{}"><s:Header>{}</s:Header><s:Body>{}</s:Body></s:Envelope>"#,
        SCHEMA_NS, header, body
    )
}

/// Reason carried by a SOAP fault, if `response` is one.
pub fn fault_reason(response: &str) -> Option<String> {
    let fault = xml::find(response, "Fault")?;
    let reason = fault
        .find("Text")
        .or_else(|| fault.find("faultstring"))
        .map(|e| e.text())
        .filter(|t| !t.is_empty())
        .or_else(|| fault.find("Value").map(|e| e.text()))
        .unwrap_or_else(|| String::from("unspecified fault"));
    Some(reason)
}

/// HTTP transport for SOAP calls against one camera.
#[derive(Clone)]
pub struct SoapClient {
    http: reqwest::Client,
    credentials: Credentials,
}

impl SoapClient {
    pub fn new(credentials: Credentials, timeout: Duration) -> Result<Self, DeviceError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DeviceError::ConnectionFailed(e.to_string()))?;
        Ok(Self { http, credentials })
    }

    /// Posts `body` to `endpoint` and returns the raw response document.
    ///
    /// Faults are reported as [`DeviceError::Fault`] even when the device uses a 4xx/5xx
    /// status for them.
    pub async fn call(&self, endpoint: &str, body: &str) -> Result<String, DeviceError> {
        trace!("SOAP request to {}: {}", endpoint, body);
        let response = self
            .http
            .post(endpoint)
            .header("Content-Type", "application/soap+xml; charset=utf-8")
            .body(envelope(&self.credentials, body))
            .send()
            .await
            .map_err(|e| DeviceError::ConnectionFailed(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| DeviceError::ConnectionFailed(e.to_string()))?;

        if let Some(reason) = fault_reason(&text) {
            debug!("SOAP fault from {}: {}", endpoint, reason);
            return Err(DeviceError::Fault(reason));
        }
        if !status.is_success() {
            return Err(DeviceError::Http(status.as_u16()));
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_hashes_concatenation() {
        // SHA1("abc"), however the input is split
        assert_eq!(password_digest(b"", "", "abc"), "qZk+NkcGgWq6PiVxeFDCbJzQ2J0=");
        assert_eq!(password_digest(b"a", "b", "c"), "qZk+NkcGgWq6PiVxeFDCbJzQ2J0=");
    }

    #[test]
    fn header_carries_username_nonce_and_created() {
        let creds = Credentials::new("admin", "secret");
        let header = security_header_with(&creds, &[0u8; 16], "2024-01-01T00:00:00Z");
        assert!(header.contains("<wsse:Username>admin</wsse:Username>"));
        assert!(header.contains("AAAAAAAAAAAAAAAAAAAAAA=="));
        assert!(header.contains("<wsu:Created>2024-01-01T00:00:00Z</wsu:Created>"));
        assert!(!header.contains("secret"));
    }

    #[test]
    fn anonymous_envelope_has_no_security_header() {
        let body = "<GetCapabilities xmlns=\"x\"/>";
        let anonymous = envelope(&Credentials::new("", ""), body);
        assert!(!anonymous.contains("wsse:Security"));
        assert!(anonymous.contains(body));

        let authenticated = envelope(&Credentials::new("admin", "pw"), body);
        assert!(authenticated.contains("wsse:Security"));
    }

    #[test]
    fn fault_reason_is_extracted() {
        let response = r#"<env:Envelope><env:Body><env:Fault><env:Code><env:Value>env:Sender</env:Value></env:Code><env:Reason><env:Text xml:lang="en">Sender not Authorized</env:Text></env:Reason></env:Fault></env:Body></env:Envelope>"#;
        assert_eq!(fault_reason(response).as_deref(), Some("Sender not Authorized"));
        assert_eq!(fault_reason("<Envelope><Body/></Envelope>"), None);
    }
}
