//! Logical identifiers and the naming rules that produce them.
//!
//! Declarations are named in plural snake_case (`private_subnets`). The
//! template names every instance with a CamelCase logical identifier derived
//! from the singular form (`PrivateSubnet1`), prefixed by the owning compound
//! instance when nested (`PublicSubnetGroupSubnet1`).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical identifier of a resource instance in the emitted template
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogicalId(String);

impl LogicalId {
    /// Create from an already CamelCased string
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derive the identifier of instance `index` out of `count` siblings.
    ///
    /// A single instance carries no suffix; otherwise the suffix is the
    /// one-based position.
    #[must_use]
    pub fn for_instance(base: &str, index: usize, count: usize) -> Self {
        if count == 1 {
            Self(base.to_string())
        } else {
            Self(format!("{}{}", base, index + 1))
        }
    }

    /// Namespace this identifier below an owning compound instance
    #[must_use]
    pub fn nested_under(&self, owner: &LogicalId) -> Self {
        Self(format!("{}{}", owner.0, self.0))
    }

    /// Get as string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LogicalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LogicalId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Convert a snake_case name into CamelCase (`cidr_block` → `CidrBlock`)
#[must_use]
pub fn camelize(name: &str) -> String {
    name.split('_')
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            let mut chars = segment.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}

/// Strip the pluralizing suffix from a declaration name.
///
/// `policies` → `policy`, `vpcs` → `vpc`, `addresses` → `address`,
/// `statuses` → `status`, `boxes` → `box`, `branches` → `branch`; names
/// without a trailing `s` are returned unchanged. `-ches` and `-uses` lose
/// their `es` only after a consonant, so `caches` and `houses` become
/// `cache` and `house` (and `beaches` becomes `beache`).
#[must_use]
pub fn singularize(plural: &str) -> String {
    if let Some(stem) = plural.strip_suffix("ies") {
        if !stem.is_empty() {
            return format!("{}y", stem);
        }
    }
    if let Some(stem) = plural.strip_suffix("es") {
        if takes_es(stem) {
            return stem.to_string();
        }
    }
    match plural.strip_suffix('s') {
        Some(stem) if !stem.is_empty() && !stem.ends_with('s') => stem.to_string(),
        _ => plural.to_string(),
    }
}

/// Whether a stem ends in a sibilant that pluralizes with `es`
fn takes_es(stem: &str) -> bool {
    let after_consonant = |suffix: &str| {
        stem.strip_suffix(suffix)
            .and_then(|rest| rest.chars().last())
            .is_some_and(|c| c.is_ascii_alphabetic() && !"aeiou".contains(c))
    };
    stem.ends_with("ss")
        || stem.ends_with("sh")
        || stem.ends_with('x')
        || stem.ends_with('z')
        || after_consonant("ch")
        || after_consonant("us")
}

/// Check that a declaration name is lowercase snake_case
#[must_use]
pub fn is_declaration_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_lowercase())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_camelize() {
        assert_eq!(camelize("cidr_block"), "CidrBlock");
        assert_eq!(camelize("vpc"), "Vpc");
        assert_eq!(camelize("enable_dns_hostnames"), "EnableDnsHostnames");
        assert_eq!(camelize("vpc__id_"), "VpcId");
    }

    #[test]
    fn test_singularize() {
        assert_eq!(singularize("vpcs"), "vpc");
        assert_eq!(singularize("private_subnets"), "private_subnet");
        assert_eq!(singularize("vpc_flow_log_policys"), "vpc_flow_log_policy");
        assert_eq!(singularize("policies"), "policy");
        assert_eq!(singularize("stack"), "stack");
        assert_eq!(singularize("glass"), "glass");
        assert_eq!(singularize("alarm_email_addresses"), "alarm_email_address");
        assert_eq!(singularize("statuses"), "status");
        assert_eq!(singularize("boxes"), "box");
        assert_eq!(singularize("branches"), "branch");
        assert_eq!(singularize("caches"), "cache");
        assert_eq!(singularize("houses"), "house");
        assert_eq!(singularize("bases"), "base");
        assert_eq!(singularize("databases"), "database");
    }

    #[test]
    fn test_logical_id_suffix() {
        assert_eq!(LogicalId::for_instance("Vpc", 0, 1).as_str(), "Vpc");
        assert_eq!(LogicalId::for_instance("Subnet", 0, 3).as_str(), "Subnet1");
        assert_eq!(LogicalId::for_instance("Subnet", 2, 3).as_str(), "Subnet3");
    }

    #[test]
    fn test_nested_under() {
        let owner = LogicalId::new("PublicSubnetGroup");
        let nested = LogicalId::new("Subnet2").nested_under(&owner);
        assert_eq!(nested.to_string(), "PublicSubnetGroupSubnet2");
    }

    #[test]
    fn test_declaration_name() {
        assert!(is_declaration_name("public_subnets"));
        assert!(is_declaration_name("s3_buckets"));
        assert!(!is_declaration_name("PublicSubnets"));
        assert!(!is_declaration_name("_x"));
        assert!(!is_declaration_name(""));
    }

    proptest::proptest! {
        #[test]
        fn prop_camelize_strips_underscores(name in "[a-z][a-z0-9_]{0,24}") {
            let camel = camelize(&name);
            proptest::prop_assert!(!camel.contains('_'));
            proptest::prop_assert!(camel.chars().next().map_or(true, |c| !c.is_ascii_lowercase()));
        }

        #[test]
        fn prop_instance_ids_distinct(count in 2usize..64) {
            let ids: std::collections::HashSet<LogicalId> = (0..count)
                .map(|i| LogicalId::for_instance("Subnet", i, count))
                .collect();
            proptest::prop_assert_eq!(ids.len(), count);
        }
    }
}
