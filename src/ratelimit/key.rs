//! Rate limit key derivation.
//!
//! A key is `{prefix}:{segment}`, where the segment identifies the caller
//! either by network address (`ip:{address}`) or by authenticated wallet
//! (`wallet:{account}`). The two are never merged: a request carrying both
//! is checked twice, once per key.

/// Address headers in precedence order: the hosting platform's own
/// forwarded header, the generic proxy headers, then the CDN header.
pub const ADDRESS_HEADERS: [&str; 4] = [
    "x-vercel-forwarded-for",
    "x-forwarded-for",
    "x-real-ip",
    "cf-connecting-ip",
];

/// Address used when no header identifies the client.
pub const UNKNOWN_ADDRESS: &str = "unknown";

/// What the HTTP adapter knows about the caller of a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestIdentity {
    headers: Vec<(String, String)>,
    wallet: Option<String>,
}

impl RequestIdentity {
    /// Create an identity with no headers and no wallet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an identity from header name/value pairs.
    pub fn from_headers<I, K, V>(headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            headers: headers
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            wallet: None,
        }
    }

    /// Add a request header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Attach the authenticated wallet address.
    pub fn with_wallet(mut self, wallet: impl Into<String>) -> Self {
        self.wallet = Some(wallet.into());
        self
    }

    /// Case-insensitive header lookup; the first occurrence wins.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// The authenticated wallet address, as supplied.
    pub fn wallet(&self) -> Option<&str> {
        self.wallet.as_deref()
    }

    /// The client's network address.
    ///
    /// Takes the first comma-separated value of the first address header
    /// present, falling back to [`UNKNOWN_ADDRESS`].
    pub fn client_address(&self) -> &str {
        ADDRESS_HEADERS
            .iter()
            .filter_map(|name| self.header(name))
            .filter_map(|value| value.split(',').next().map(str::trim))
            .find(|address| !address.is_empty())
            .unwrap_or(UNKNOWN_ADDRESS)
    }
}

/// Build the network-address key: `{prefix}:ip:{address}`.
pub fn build_key(prefix: &str, identity: &RequestIdentity) -> String {
    format!("{}:ip:{}", prefix, identity.client_address())
}

/// Build the wallet key: `{prefix}:wallet:{account}`.
///
/// The account is trimmed and lowercased so checksummed and plain forms of
/// the same address share one limit. Returns `None` without a wallet.
pub fn build_wallet_key(prefix: &str, identity: &RequestIdentity) -> Option<String> {
    let wallet = normalize_wallet(identity.wallet()?)?;
    Some(format!("{}:wallet:{}", prefix, wallet))
}

fn normalize_wallet(wallet: &str) -> Option<String> {
    let wallet = wallet.trim();
    if wallet.is_empty() {
        None
    } else {
        Some(wallet.to_lowercase())
    }
}
