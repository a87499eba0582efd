//! Strongly-typed identifiers and names.
//!
//! Node names and capability ids compare case-insensitively but keep the
//! spelling they were declared with for display.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Macro to define a strongly-typed ID newtype wrapper.
///
/// Generates: struct, `new()` (UUID v4), `from_string()`, `as_str()`, Display.
macro_rules! define_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            pub fn new() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            pub fn from_string(s: String) -> Result<Self, &'static str> {
                if s.is_empty() {
                    return Err(concat!(stringify!($name), " cannot be empty"));
                }
                Ok(Self(s))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

/// Macro to define a case-insensitive name newtype.
///
/// Equality, ordering and hashing use the lowercased key; `as_str()` and
/// Display return the original spelling.
macro_rules! define_name {
    ($name:ident) => {
        #[derive(Debug, Clone)]
        pub struct $name {
            display: String,
            key: String,
        }

        impl $name {
            pub fn new(s: impl Into<String>) -> Self {
                let display = s.into();
                let key = display.to_lowercase();
                Self { display, key }
            }

            pub fn as_str(&self) -> &str {
                &self.display
            }

            /// Lowercased comparison key.
            pub fn key(&self) -> &str {
                &self.key
            }

            pub fn matches(&self, other: &str) -> bool {
                self.display.eq_ignore_ascii_case(other) || self.key == other.to_lowercase()
            }
        }

        impl PartialEq for $name {
            fn eq(&self, other: &Self) -> bool {
                self.key == other.key
            }
        }

        impl Eq for $name {}

        impl Hash for $name {
            fn hash<H: Hasher>(&self, state: &mut H) {
                self.key.hash(state);
            }
        }

        impl PartialOrd for $name {
            fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
                Some(self.cmp(other))
            }
        }

        impl Ord for $name {
            fn cmp(&self, other: &Self) -> Ordering {
                self.key.cmp(&other.key)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.display)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self::new(s)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self::new(s)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.display)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                String::deserialize(deserializer).map(Self::new)
            }
        }
    };
}

define_id!(TransactionId);
define_name!(NodeName);
define_name!(CapabilityId);

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::{BTreeSet, HashSet};

    #[test]
    fn test_name_case_insensitive_eq() {
        let a = NodeName::new("Nightly");
        let b = NodeName::new("NIGHTLY");
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "Nightly");
        assert!(a.matches("nightly"));
    }

    #[test]
    fn test_name_ordering_by_key() {
        let mut set = BTreeSet::new();
        set.insert(NodeName::new("beta"));
        set.insert(NodeName::new("Alpha"));
        set.insert(NodeName::new("gamma"));
        let ordered: Vec<&str> = set.iter().map(|n| n.as_str()).collect();
        assert_eq!(ordered, vec!["Alpha", "beta", "gamma"]);
    }

    #[test]
    fn test_transaction_id_unique() {
        assert_ne!(TransactionId::new(), TransactionId::new());
        assert!(TransactionId::from_string(String::new()).is_err());
    }

    #[test]
    fn test_name_serde_keeps_spelling() {
        let id = CapabilityId::new("Start");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"Start\"");
        let back: CapabilityId = serde_json::from_str("\"START\"").unwrap();
        assert_eq!(back, id);
    }

    proptest! {
        #[test]
        fn prop_case_variants_collapse(name in "[a-zA-Z][a-zA-Z0-9_-]{0,12}") {
            let mut set = HashSet::new();
            set.insert(NodeName::new(name.to_lowercase()));
            set.insert(NodeName::new(name.to_uppercase()));
            set.insert(NodeName::new(name.clone()));
            prop_assert_eq!(set.len(), 1);
        }
    }
}
