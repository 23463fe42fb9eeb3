//! HTTP Digest authentication (RFC 7616, MD5, `qop=auth`).
//!
//! The Atlas admin API authenticates programmatic keys with digest auth.
//! The first request of a session is answered with a `401` carrying a
//! challenge; the challenge is cached and reused with an increasing nonce
//! count until the server marks it stale.

use md5::{Digest, Md5};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::credentials::Credentials;
use crate::error::{Error, Result};

/// Parsed `WWW-Authenticate: Digest ...` challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub realm: String,
    pub nonce: String,
    pub qop: Option<String>,
    pub opaque: Option<String>,
    pub algorithm: Option<String>,
}

impl Challenge {
    /// Parse a challenge header value.
    pub fn parse(header: &str) -> Result<Self> {
        let rest = header
            .trim()
            .strip_prefix("Digest")
            .ok_or_else(|| Error::InvalidResponse(format!("not a digest challenge: {header}")))?;

        let params = parse_params(rest);
        let realm = params
            .get("realm")
            .cloned()
            .ok_or_else(|| Error::InvalidResponse("digest challenge without realm".into()))?;
        let nonce = params
            .get("nonce")
            .cloned()
            .ok_or_else(|| Error::InvalidResponse("digest challenge without nonce".into()))?;

        if let Some(algorithm) = params.get("algorithm")
            && !algorithm.eq_ignore_ascii_case("MD5")
        {
            return Err(Error::InvalidResponse(format!(
                "unsupported digest algorithm {algorithm}"
            )));
        }

        Ok(Self {
            realm,
            nonce,
            qop: params.get("qop").cloned(),
            opaque: params.get("opaque").cloned(),
            algorithm: params.get("algorithm").cloned(),
        })
    }

    /// Whether the server offers `qop=auth`.
    fn supports_auth_qop(&self) -> bool {
        self.qop
            .as_deref()
            .is_some_and(|q| q.split(',').any(|v| v.trim() == "auth"))
    }
}

/// Split `key="value", key=value` pairs. Quoted values may contain commas.
fn parse_params(input: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    let mut chars = input.chars().peekable();

    loop {
        while chars.peek().is_some_and(|c| c.is_whitespace() || *c == ',') {
            chars.next();
        }

        let key: String = chars.by_ref().take_while(|c| *c != '=').collect();
        let key = key.trim().to_lowercase();
        if key.is_empty() {
            break;
        }

        let mut value = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            while let Some(c) = chars.next() {
                match c {
                    '\\' => {
                        if let Some(escaped) = chars.next() {
                            value.push(escaped);
                        }
                    }
                    '"' => break,
                    _ => value.push(c),
                }
            }
        } else {
            while let Some(c) = chars.peek() {
                if *c == ',' {
                    break;
                }
                value.push(*c);
                chars.next();
            }
            value = value.trim().to_string();
        }

        params.insert(key, value);
    }

    params
}

fn md5_hex(input: &str) -> String {
    let digest = Md5::digest(input.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

fn make_cnonce(seed: &str, count: u64) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let hash = blake3::hash(format!("{nanos}:{count}:{seed}").as_bytes());
    hash.to_hex().as_str()[..16].to_string()
}

/// Compute the `Authorization` header value for one request.
pub fn authorization(
    credentials: &Credentials,
    challenge: &Challenge,
    method: &str,
    uri: &str,
    nonce_count: u64,
    cnonce: &str,
) -> String {
    let ha1 = md5_hex(&format!(
        "{}:{}:{}",
        credentials.username,
        challenge.realm,
        credentials.api_key.expose()
    ));
    let ha2 = md5_hex(&format!("{method}:{uri}"));

    let mut header = format!(
        "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\"",
        credentials.username, challenge.realm, challenge.nonce, uri
    );

    if challenge.supports_auth_qop() {
        let nc = format!("{nonce_count:08x}");
        let response = md5_hex(&format!(
            "{ha1}:{}:{nc}:{cnonce}:auth:{ha2}",
            challenge.nonce
        ));
        header.push_str(&format!(
            ", qop=auth, nc={nc}, cnonce=\"{cnonce}\", response=\"{response}\""
        ));
    } else {
        let response = md5_hex(&format!("{ha1}:{}:{ha2}", challenge.nonce));
        header.push_str(&format!(", response=\"{response}\""));
    }

    header.push_str(", algorithm=MD5");
    if let Some(opaque) = &challenge.opaque {
        header.push_str(&format!(", opaque=\"{opaque}\""));
    }
    header
}

/// Digest session shared by all requests of one backend.
#[derive(Debug, Default)]
pub struct DigestSession {
    challenge: Mutex<Option<Challenge>>,
    nonce_count: AtomicU64,
}

impl DigestSession {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember a fresh challenge and restart the nonce count.
    pub fn store(&self, challenge: Challenge) {
        let mut slot = match self.challenge.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *slot = Some(challenge);
        self.nonce_count.store(0, Ordering::SeqCst);
    }

    /// Header for the next request, if a challenge is known.
    pub fn header(&self, credentials: &Credentials, method: &str, uri: &str) -> Option<String> {
        let slot = match self.challenge.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let challenge = slot.as_ref()?;
        let count = self.nonce_count.fetch_add(1, Ordering::SeqCst) + 1;
        let cnonce = make_cnonce(&challenge.nonce, count);
        Some(authorization(
            credentials,
            challenge,
            method,
            uri,
            count,
            &cnonce,
        ))
    }
}
