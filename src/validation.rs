//! Name and id validation utilities.

use crate::types::{Error, Result};

/// Validate a node name: non-empty, no path separators, no surrounding whitespace.
pub fn validate_node_name(name: &str) -> Result<()> {
    validate_non_empty(name, "node name")?;
    if name.contains('/') {
        return Err(Error::validation(format!(
            "node name '{}' cannot contain '/'",
            name
        )));
    }
    if name.trim() != name {
        return Err(Error::validation(format!(
            "node name '{}' cannot have surrounding whitespace",
            name
        )));
    }
    Ok(())
}

/// Validate a capability id (action, list or property).
pub fn validate_capability_id(id: &str) -> Result<()> {
    validate_non_empty(id, "capability id")?;
    if id.chars().any(char::is_whitespace) {
        return Err(Error::validation(format!(
            "capability id '{}' cannot contain whitespace",
            id
        )));
    }
    Ok(())
}

/// Validate that a string is not empty.
pub fn validate_non_empty(s: &str, field: &str) -> Result<()> {
    if s.is_empty() {
        return Err(Error::validation(format!("{} cannot be empty", field)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_names() {
        assert!(validate_node_name("nightly").is_ok());
        assert!(validate_node_name("").is_err());
        assert!(validate_node_name("a/b").is_err());
        assert!(validate_node_name(" padded").is_err());
    }

    #[test]
    fn test_capability_ids() {
        assert!(validate_capability_id("start").is_ok());
        assert!(validate_capability_id("two words").is_err());
        assert!(validate_capability_id("").is_err());
    }
}
