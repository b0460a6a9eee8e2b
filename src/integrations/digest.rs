//! RFC 2617 digest authentication (MD5, qop=auth) for TR-064 endpoints.

use std::collections::HashMap;

use md5::{Digest, Md5};

use crate::server::error::Error;

/// Parsed `WWW-Authenticate: Digest ...` challenge.
#[derive(Debug, Clone)]
pub struct DigestChallenge {
    pub realm: String,
    pub nonce: String,
    pub qop: Option<String>,
    pub opaque: Option<String>,
}

impl DigestChallenge {
    /// Parse the challenge header value. Accepts unquoted and quoted params.
    pub fn parse(header: &str) -> Result<Self, Error> {
        let rest = header
            .trim()
            .strip_prefix("Digest")
            .ok_or_else(|| Error::Auth("challenge is not Digest".to_string()))?;

        let mut params = HashMap::new();
        for part in rest.split(',') {
            if let Some((key, value)) = part.split_once('=') {
                params.insert(
                    key.trim().to_lowercase(),
                    value.trim().trim_matches('"').to_string(),
                );
            }
        }

        Ok(Self {
            realm: params
                .get("realm")
                .cloned()
                .ok_or_else(|| Error::Auth("digest challenge without realm".to_string()))?,
            nonce: params
                .get("nonce")
                .cloned()
                .ok_or_else(|| Error::Auth("digest challenge without nonce".to_string()))?,
            qop: params.get("qop").cloned(),
            opaque: params.get("opaque").cloned(),
        })
    }
}

fn md5_hex(input: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Build the `Authorization` header value answering a digest challenge.
///
/// `response = MD5(HA1:nonce:nc:cnonce:qop:HA2)` with
/// `HA1 = MD5(user:realm:pass)` and `HA2 = MD5(method:uri)`.
pub fn authorization_header(
    challenge: &DigestChallenge,
    username: &str,
    password: &str,
    method: &str,
    uri: &str,
    cnonce: &str,
) -> String {
    let ha1 = md5_hex(&format!("{}:{}:{}", username, challenge.realm, password));
    let ha2 = md5_hex(&format!("{}:{}", method, uri));

    let nc = "00000001";
    let qop = challenge.qop.as_deref().unwrap_or("auth");
    let response = md5_hex(&format!(
        "{}:{}:{}:{}:{}:{}",
        ha1, challenge.nonce, nc, cnonce, qop, ha2
    ));

    let mut header = format!(
        "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\", qop={}, nc={}, cnonce=\"{}\", response=\"{}\"",
        username, challenge.realm, challenge.nonce, uri, qop, nc, cnonce, response
    );
    if let Some(opaque) = &challenge.opaque {
        header.push_str(&format!(", opaque=\"{}\"", opaque));
    }
    header
}
