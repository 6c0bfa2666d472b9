use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{LedgerError, Result};

/// Attribute channel of an already-authenticated caller.
pub trait IdentityContext {
    /// `Ok(None)` when the identity does not carry `name`, `Err` when the
    /// attribute could not be read.
    ///
    /// # Errors
    /// Returns a description of the lookup failure.
    fn attribute(&self, name: &str) -> std::result::Result<Option<String>, String>;
}

/// Map-backed identity, as produced by the host adapter.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct AttributeIdentity {
    attributes: BTreeMap<String, String>,
}

impl AttributeIdentity {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, name: &str, value: &str) -> Self {
        self.attributes.insert(name.to_string(), value.to_string());
        self
    }
}

impl FromIterator<(String, String)> for AttributeIdentity {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self { attributes: iter.into_iter().collect() }
    }
}

impl IdentityContext for AttributeIdentity {
    fn attribute(&self, name: &str) -> std::result::Result<Option<String>, String> {
        Ok(self.attributes.get(name).cloned())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum AccessDecision {
    Allowed,
    Denied,
    AttributeAbsent,
}

/// Gate protecting one routed function.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct GateSpec {
    pub function: String,
    pub attribute: String,
    pub required_value: String,
}

impl GateSpec {
    /// # Errors
    /// Returns [`LedgerError::Authorization`] unless the identity carries the
    /// required attribute value.
    pub fn enforce(&self, identity: &dyn IdentityContext) -> Result<()> {
        match check_attribute(identity, &self.attribute, &self.required_value) {
            AccessDecision::Allowed => Ok(()),
            AccessDecision::AttributeAbsent => Err(LedgerError::Authorization(format!(
                "client identity does not possess the attribute `{}`",
                self.attribute
            ))),
            AccessDecision::Denied => Err(LedgerError::Authorization(format!(
                "only identities with {} = {} may call {}",
                self.attribute, self.required_value, self.function
            ))),
        }
    }
}

/// Only an exact match grants access; lookup errors deny.
#[must_use]
pub fn check_attribute(
    identity: &dyn IdentityContext,
    attribute: &str,
    required_value: &str,
) -> AccessDecision {
    match identity.attribute(attribute) {
        Ok(Some(value)) if value == required_value => AccessDecision::Allowed,
        Ok(Some(value)) => {
            debug!(attribute, value = %value, "attribute value mismatch");
            AccessDecision::Denied
        }
        Ok(None) => AccessDecision::AttributeAbsent,
        Err(err) => {
            debug!(attribute, error = %err, "attribute lookup failed");
            AccessDecision::Denied
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BrokenIdentity;

    impl IdentityContext for BrokenIdentity {
        fn attribute(&self, _name: &str) -> std::result::Result<Option<String>, String> {
            Err("certificate has no attribute extension".to_string())
        }
    }

    #[test]
    fn only_exact_match_is_allowed() {
        let approver = AttributeIdentity::new().with("role", "approver");
        let viewer = AttributeIdentity::new().with("role", "viewer");
        assert_eq!(check_attribute(&approver, "role", "approver"), AccessDecision::Allowed);
        assert_eq!(check_attribute(&viewer, "role", "approver"), AccessDecision::Denied);
        assert_eq!(
            check_attribute(&AttributeIdentity::new(), "role", "approver"),
            AccessDecision::AttributeAbsent
        );
        assert_eq!(check_attribute(&BrokenIdentity, "role", "approver"), AccessDecision::Denied);
    }

    #[test]
    fn gate_maps_every_refusal_to_authorization() {
        let gate = GateSpec {
            function: "restrictedMethod".to_string(),
            attribute: "role".to_string(),
            required_value: "approver".to_string(),
        };
        assert!(gate.enforce(&AttributeIdentity::new().with("role", "approver")).is_ok());
        for identity in [
            &AttributeIdentity::new() as &dyn IdentityContext,
            &AttributeIdentity::new().with("role", "Approver"),
            &BrokenIdentity,
        ] {
            assert!(matches!(gate.enforce(identity), Err(LedgerError::Authorization(_))));
        }
    }
}
