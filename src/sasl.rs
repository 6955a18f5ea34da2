//! SASL DIGEST-MD5 client responses (RFC 2831).

use std::collections::HashMap;

use base64::{Engine as _, engine::general_purpose};
use md5::{Digest, Md5};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum SaslError {
    #[error("invalid DIGEST-MD5 challenge: {0}")]
    InvalidChallenge(String),
}

fn md5_hex(data: &[u8]) -> String {
    let digest = Md5::digest(data);
    let mut out = String::with_capacity(32);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Client side of one DIGEST-MD5 exchange: parses the server challenge,
/// computes the response with a fresh cnonce and verifies the final
/// `rspauth` confirmation.
pub struct DigestMd5 {
    params: HashMap<String, String>,
    digest_uri: String,
    nonce: String,
    realm: String,
    cnonce: String,
}

impl DigestMd5 {
    /// Parse a base64 challenge. Surrounding quotes and line breaks, as
    /// delivered on a MANAGESIEVE response line, are tolerated.
    pub fn new(challenge: &str, digest_uri: &str) -> Result<Self, SaslError> {
        let cleaned: String = challenge
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '='))
            .collect();
        let raw = general_purpose::STANDARD
            .decode(cleaned.as_bytes())
            .map_err(|e| SaslError::InvalidChallenge(e.to_string()))?;
        let text = String::from_utf8_lossy(&raw);

        let mut params = HashMap::new();
        for element in text.split(',') {
            if let Some((key, value)) = element.split_once('=') {
                params.insert(
                    key.trim().to_string(),
                    value.trim().trim_matches('"').to_string(),
                );
            }
        }
        let nonce = params
            .get("nonce")
            .cloned()
            .ok_or_else(|| SaslError::InvalidChallenge("missing nonce".to_string()))?;
        let realm = params.get("realm").cloned().unwrap_or_default();

        Ok(Self {
            params,
            digest_uri: digest_uri.to_string(),
            nonce,
            realm,
            cnonce: Self::fresh_cnonce(),
        })
    }

    /// 96 random bits, base64-encoded.
    fn fresh_cnonce() -> String {
        let bytes: [u8; 12] = rand::random();
        general_purpose::STANDARD.encode(bytes)
    }

    #[cfg(test)]
    fn set_cnonce(&mut self, cnonce: &str) {
        self.cnonce = cnonce.to_string();
    }

    pub fn realm(&self) -> &str {
        &self.realm
    }

    pub fn quality_of_protection(&self) -> Option<&str> {
        self.params.get("qop").map(String::as_str)
    }

    /// The `response`/`rspauth` digest value. A2 omits the AUTHENTICATE
    /// prefix when checking the server's confirmation.
    fn compute(&self, username: &str, password: &str, rspauth: bool) -> String {
        let urp = Md5::digest(format!("{username}:{}:{password}", self.realm).as_bytes());
        let mut a1: Vec<u8> = urp.to_vec();
        a1.push(b':');
        a1.extend_from_slice(self.nonce.as_bytes());
        a1.push(b':');
        a1.extend_from_slice(self.cnonce.as_bytes());
        let ha1 = md5_hex(&a1);

        let a2 = if rspauth {
            format!(":{}", self.digest_uri)
        } else {
            format!("AUTHENTICATE:{}", self.digest_uri)
        };
        let ha2 = md5_hex(a2.as_bytes());

        md5_hex(
            format!(
                "{ha1}:{}:00000001:{}:auth:{ha2}",
                self.nonce, self.cnonce
            )
            .as_bytes(),
        )
    }

    /// The base64 client response to send back to the server.
    pub fn response(&self, username: &str, password: &str, authz_id: &str) -> String {
        let value = self.compute(username, password, false);
        let mut fields = format!("username=\"{username}\",");
        if !self.realm.is_empty() {
            fields.push_str(&format!("realm=\"{}\",", self.realm));
        }
        fields.push_str(&format!(
            "nonce=\"{}\",cnonce=\"{}\",nc=00000001,qop=auth,digest-uri=\"{}\",response={value}",
            self.nonce, self.cnonce, self.digest_uri
        ));
        if !authz_id.is_empty() {
            fields.push_str(&format!(",authzid=\"{authz_id}\""));
        }
        general_purpose::STANDARD.encode(fields.as_bytes())
    }

    /// Verify the server's final challenge, a base64 `rspauth=<digest>`.
    pub fn check_last_challenge(&self, username: &str, password: &str, value: &str) -> bool {
        let cleaned = value.trim().trim_matches('"');
        let Ok(raw) = general_purpose::STANDARD.decode(cleaned.as_bytes()) else {
            return false;
        };
        let expected = format!("rspauth={}", self.compute(username, password, true));
        raw == expected.as_bytes()
    }
}
