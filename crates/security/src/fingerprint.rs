//! Anonymous identity derivation.
//!
//! Same IP, user agent and header set always produce the same
//! `anon_<16hex>_<6hex>` identifier. Visitors behind one NAT with identical
//! browsers collide; that is accepted.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tracing::debug;

/// Headers folded into the browser fingerprint, in hashing order.
const FINGERPRINT_HEADERS: [&str; 10] = [
    "user-agent",
    "accept-language",
    "accept-encoding",
    "accept",
    "connection",
    "upgrade-insecure-requests",
    "sec-fetch-site",
    "sec-fetch-mode",
    "sec-fetch-user",
    "sec-fetch-dest",
];

const FINGERPRINT_DELIMITER: &str = "|";
const FINGERPRINT_LEN: usize = 32;

/// Connection metadata for one inbound request.
#[derive(Debug, Clone, Default)]
pub struct RequestMetadata {
    /// Proxy-aware client address (only set when the proxy is trusted)
    pub client_ip: Option<String>,
    /// Socket peer address
    pub remote_addr: Option<String>,
    /// Header values keyed by lowercase name
    pub headers: HashMap<String, String>,
}

impl RequestMetadata {
    /// Build metadata from a peer address and raw header pairs.
    ///
    /// With `trust_proxy`, the client IP is taken from `x-real-ip` or the
    /// first `x-forwarded-for` entry; otherwise it is the socket peer.
    pub fn new<I, K, V>(remote_addr: Option<String>, headers: I, trust_proxy: bool) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let headers: HashMap<String, String> = headers
            .into_iter()
            .map(|(k, v)| (k.as_ref().to_ascii_lowercase(), v.into()))
            .collect();

        let client_ip = if trust_proxy {
            headers
                .get("x-real-ip")
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .or_else(|| first_forwarded_for(&headers))
        } else {
            remote_addr.clone()
        };

        Self {
            client_ip,
            remote_addr,
            headers,
        }
    }

    pub fn header(&self, name: &str) -> &str {
        self.headers.get(name).map(String::as_str).unwrap_or("")
    }

    /// Client IP by precedence: proxy-aware IP, socket peer, first
    /// `x-forwarded-for` entry, then `"unknown"`.
    pub fn resolve_ip(&self) -> String {
        self.client_ip
            .as_deref()
            .filter(|ip| !ip.is_empty())
            .map(str::to_string)
            .or_else(|| self.remote_addr.clone().filter(|ip| !ip.is_empty()))
            .or_else(|| first_forwarded_for(&self.headers))
            .unwrap_or_else(|| "unknown".to_string())
    }
}

fn first_forwarded_for(headers: &HashMap<String, String>) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// A derived anonymous identity plus the provenance it was derived from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnonymousIdentity {
    pub anonymous_id: String,
    pub ip_address: String,
    pub user_agent: String,
    pub browser_fingerprint: String,
}

/// Hash the fixed header list into a 32-hex-char fingerprint.
/// Missing headers hash as empty strings.
pub fn browser_fingerprint(meta: &RequestMetadata) -> String {
    let joined = FINGERPRINT_HEADERS
        .iter()
        .map(|h| meta.header(h))
        .collect::<Vec<_>>()
        .join(FINGERPRINT_DELIMITER);
    let mut digest = hex::encode(Sha256::digest(joined.as_bytes()));
    digest.truncate(FINGERPRINT_LEN);
    digest
}

/// Compose `anon_<16hex>_<6hex>` from the SHA-256 of `ip-ua-fingerprint`.
pub fn anonymous_id(ip: &str, user_agent: &str, fingerprint: &str) -> String {
    let digest = hex::encode(Sha256::digest(
        format!("{ip}-{user_agent}-{fingerprint}").as_bytes(),
    ));
    format!("anon_{}_{}", &digest[..16], &digest[16..22])
}

/// Derive the anonymous identity for a request. Never fails.
pub fn derive_identity(meta: &RequestMetadata) -> AnonymousIdentity {
    let ip_address = meta.resolve_ip();
    let user_agent = meta.header("user-agent").to_string();
    let browser_fingerprint = browser_fingerprint(meta);
    let anonymous_id = anonymous_id(&ip_address, &user_agent, &browser_fingerprint);

    debug!(anonymous_id = %anonymous_id, ip = %ip_address, "Derived anonymous identity");

    AnonymousIdentity {
        anonymous_id,
        ip_address,
        user_agent,
        browser_fingerprint,
    }
}
