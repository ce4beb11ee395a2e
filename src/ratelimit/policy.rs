//! Named rate limit presets.
//!
//! Callers reference a preset by name instead of repeating numbers at every
//! call site. The built-in table covers the financial write endpoints and the
//! polling read endpoints; a YAML file can override or extend it. Every
//! preset is validated when the registry is built, and the registry is
//! immutable afterwards.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use super::limiter::{Algorithm, Limit};
use super::token_bucket::default_refill_rate;
use crate::error::{Result, TollgateError};

/// Window used by sliding window presets that do not name one.
pub const DEFAULT_WINDOW_MS: u64 = 60_000;

/// Version of the built-in preset table.
pub const BUILTIN_VERSION: u32 = 1;

/// A validated, named preset.
#[derive(Debug, Clone, PartialEq)]
pub struct Policy {
    name: String,
    prefix: String,
    limit: Limit,
    strict_wallet: bool,
}

impl Policy {
    /// Build a policy; the key prefix defaults to the name.
    pub fn new(name: impl Into<String>, limit: Limit) -> Self {
        let name = name.into();
        Self {
            prefix: name.clone(),
            name,
            limit,
            strict_wallet: false,
        }
    }

    /// Use a key prefix other than the policy name.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Halve the limit applied to the wallet-keyed check.
    pub fn strict(mut self) -> Self {
        self.strict_wallet = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Limit for the network-address key.
    pub fn limit(&self) -> &Limit {
        &self.limit
    }

    pub fn is_strict(&self) -> bool {
        self.strict_wallet
    }

    /// Limit for the wallet key: the same limit, or half of it when strict.
    pub fn wallet_limit(&self) -> Limit {
        if self.strict_wallet {
            self.limit.halved()
        } else {
            self.limit
        }
    }

    /// Serializable form of this policy.
    pub fn to_config(&self) -> PolicyConfig {
        PolicyConfig {
            name: self.name.clone(),
            algorithm: self.limit.algorithm(),
            limit: self.limit.capacity(),
            window_ms: self.limit.window().map(|w| w.as_millis() as u64),
            refill_rate: self.limit.refill_rate(),
            strict_wallet: self.strict_wallet,
            prefix: Some(self.prefix.clone()),
        }
    }
}

/// A preset as written in a policies file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Preset name
    pub name: String,
    /// Counting algorithm
    #[serde(default)]
    pub algorithm: Algorithm,
    /// Max requests per window, or bucket capacity
    #[serde(alias = "max_requests", alias = "max_tokens")]
    pub limit: u32,
    /// Window length in milliseconds (sliding window only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_ms: Option<u64>,
    /// Tokens per second (token bucket only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refill_rate: Option<f64>,
    /// Halve the limit for the wallet-keyed check
    #[serde(default)]
    pub strict_wallet: bool,
    /// Key prefix; defaults to the name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

impl PolicyConfig {
    /// Validate and convert into a [`Policy`].
    pub fn build(&self) -> Result<Policy> {
        if self.name.trim().is_empty() {
            return Err(TollgateError::Config("policy name must not be empty".to_string()));
        }

        let limit = match self.algorithm {
            Algorithm::SlidingWindow => {
                let window = Duration::from_millis(self.window_ms.unwrap_or(DEFAULT_WINDOW_MS));
                Limit::sliding_window(self.limit, window)
            }
            Algorithm::TokenBucket => {
                let refill_rate = self
                    .refill_rate
                    .unwrap_or_else(|| default_refill_rate(self.limit));
                Limit::token_bucket(self.limit, refill_rate)
            }
        }
        .map_err(|e| TollgateError::Config(format!("policy '{}': {}", self.name, e)))?;

        let mut policy = Policy::new(self.name.clone(), limit);
        if let Some(prefix) = &self.prefix {
            policy = policy.with_prefix(prefix.clone());
        }
        if self.strict_wallet {
            policy = policy.strict();
        }
        Ok(policy)
    }
}

/// Contents of a policies file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoliciesFile {
    /// Version of this preset table
    #[serde(default)]
    pub version: Option<u32>,
    #[serde(default)]
    pub policies: Vec<PolicyConfig>,
}

/// Immutable table of named presets.
#[derive(Debug, Clone)]
pub struct PolicyRegistry {
    version: u32,
    policies: BTreeMap<String, Policy>,
}

impl PolicyRegistry {
    /// The built-in presets.
    pub fn builtin() -> Self {
        let minute = Duration::from_millis(DEFAULT_WINDOW_MS);
        let presets = [
            // Order placement and other money-moving writes.
            Limit::sliding_window(5, minute).map(|l| Policy::new("financial_write", l).strict()),
            Limit::sliding_window(3, minute).map(|l| Policy::new("market_creation", l).strict()),
            Limit::sliding_window(20, minute).map(|l| Policy::new("standard_write", l)),
            Limit::sliding_window(10, minute).map(|l| Policy::new("authentication", l)),
            // Price polling.
            Limit::token_bucket(60, 4.0).map(|l| Policy::new("price_read", l)),
            Limit::token_bucket(30, 2.0).map(|l| Policy::new("burst_read", l)),
        ];

        let policies = presets
            .into_iter()
            .map(|preset| {
                let policy = preset.expect("built-in presets have positive limits");
                (policy.name.clone(), policy)
            })
            .collect();

        Self {
            version: BUILTIN_VERSION,
            policies,
        }
    }

    /// Build a registry containing only the presets in a YAML document.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Self {
            version: 0,
            policies: BTreeMap::new(),
        }
        .merge_yaml(yaml)
    }

    /// Overlay presets from a YAML policies file.
    pub fn merge_file<P: AsRef<Path>>(self, path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading policy presets");

        let contents = std::fs::read_to_string(path)?;
        self.merge_yaml(&contents)
    }

    /// Overlay presets from a YAML document. Presets with an existing name
    /// replace the earlier definition.
    pub fn merge_yaml(mut self, yaml: &str) -> Result<Self> {
        let file: PoliciesFile = serde_yaml::from_str(yaml)
            .map_err(|e| TollgateError::Config(format!("Failed to parse policies: {}", e)))?;

        for config in &file.policies {
            let policy = config.build()?;
            self.policies.insert(policy.name.clone(), policy);
        }
        if let Some(version) = file.version {
            self.version = version;
        }
        Ok(self)
    }

    /// Look up a preset by name.
    pub fn get(&self, name: &str) -> Option<&Policy> {
        self.policies.get(name)
    }

    /// Look up a preset by name, treating a missing one as a caller bug.
    pub fn require(&self, name: &str) -> Result<&Policy> {
        self.get(name)
            .ok_or_else(|| TollgateError::Config(format!("unknown policy preset '{}'", name)))
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Presets in name order.
    pub fn iter(&self) -> impl Iterator<Item = &Policy> {
        self.policies.values()
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    /// Serializable snapshot of the whole table.
    pub fn to_file(&self) -> PoliciesFile {
        PoliciesFile {
            version: Some(self.version),
            policies: self.iter().map(Policy::to_config).collect(),
        }
    }
}

impl Default for PolicyRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
