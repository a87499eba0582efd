//! Security tokens and caller credentials.
//!
//! A node, action or list may carry a token such as `"ops"` or
//! `"admin,ops"`. A caller satisfies it by holding any one listed
//! credential. Comparison is case-insensitive.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::types::{Error, Result};

/// Credentials presented by a caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    granted: BTreeSet<String>,
}

impl Credentials {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant a credential.
    pub fn grant(&mut self, credential: &str) {
        let credential = credential.trim();
        if !credential.is_empty() {
            self.granted.insert(credential.to_lowercase());
        }
    }

    /// Grant several credentials at once.
    pub fn grant_many(&mut self, credentials: &[String]) {
        for c in credentials {
            self.grant(c);
        }
    }

    pub fn with(mut self, credential: &str) -> Self {
        self.grant(credential);
        self
    }

    /// Revoke a credential.
    pub fn revoke(&mut self, credential: &str) {
        self.granted.remove(&credential.trim().to_lowercase());
    }

    pub fn has(&self, credential: &str) -> bool {
        self.granted.contains(&credential.trim().to_lowercase())
    }

    /// All held credentials, sorted.
    pub fn list(&self) -> Vec<String> {
        self.granted.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.granted.clear();
    }

    /// Whether these credentials satisfy `token`.
    pub fn satisfies(&self, token: &SecurityToken) -> bool {
        token.alternatives.is_empty() || token.alternatives.iter().any(|a| self.has(a))
    }
}

/// A parsed security requirement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityToken {
    alternatives: Vec<String>,
}

impl SecurityToken {
    /// Parse a token. A blank token is open; a non-blank token must name at
    /// least one credential (`","` is rejected).
    pub fn parse(raw: &str) -> Result<Self> {
        let alternatives: Vec<String> = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase)
            .collect();
        if alternatives.is_empty() && !raw.trim().is_empty() {
            return Err(Error::configuration(format!(
                "security token '{}' names no credential",
                raw
            )));
        }
        Ok(Self { alternatives })
    }

    pub fn is_open(&self) -> bool {
        self.alternatives.is_empty()
    }
}

/// Fail with `Unauthorized` unless `credentials` satisfy `token`.
///
/// A malformed token denies everyone.
pub fn demand(token: Option<&str>, credentials: &Credentials, what: &str) -> Result<()> {
    let Some(raw) = token else {
        return Ok(());
    };
    let satisfied = match SecurityToken::parse(raw) {
        Ok(parsed) => credentials.satisfies(&parsed),
        Err(e) => {
            tracing::warn!(target_item = what, error = %e, "security_token_malformed");
            false
        }
    };
    if satisfied {
        return Ok(());
    }
    tracing::debug!(target_item = what, required = raw, "security_demand_failed");
    Err(Error::unauthorized(format!("{} requires '{}'", what, raw)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grant_and_check() {
        let mut creds = Credentials::new();
        creds.grant("Ops");
        assert!(creds.has("ops"));
        assert!(creds.has("OPS"));
        assert!(!creds.has("admin"));
    }

    #[test]
    fn test_grant_many_and_list_sorted() {
        let mut creds = Credentials::new();
        creds.grant_many(&["ops".to_string(), "admin".to_string()]);
        assert_eq!(creds.list(), vec!["admin", "ops"]);
    }

    #[test]
    fn test_revoke_and_clear() {
        let mut creds = Credentials::new().with("ops").with("admin");
        creds.revoke("OPS");
        assert!(!creds.has("ops"));
        creds.clear();
        assert!(creds.list().is_empty());
    }

    #[test]
    fn test_alternatives() {
        let token = SecurityToken::parse("admin, ops").unwrap();
        assert!(Credentials::new().with("ops").satisfies(&token));
        assert!(!Credentials::new().with("guest").satisfies(&token));
        assert!(SecurityToken::parse("  ").unwrap().is_open());
    }

    #[test]
    fn test_token_without_credentials_rejected() {
        let err = SecurityToken::parse(" , ").unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));

        let everyone = Credentials::new().with("admin").with("ops");
        let err = demand(Some(","), &everyone, "/vault/").unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));
    }

    #[test]
    fn test_demand() {
        let creds = Credentials::new().with("admin");
        assert!(demand(None, &creds, "/").is_ok());
        assert!(demand(Some("admin"), &creds, "/").is_ok());
        let err = demand(Some("ops"), &creds, "/jobs/nightly/").unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));
        assert!(err.to_string().contains("/jobs/nightly/"));
    }
}
