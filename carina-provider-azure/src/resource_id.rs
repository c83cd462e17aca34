//! Azure Resource Manager resource IDs
//!
//! `/subscriptions/{sub}/resourceGroups/{rg}/providers/{namespace}/{type}/{name}[/{type}/{name}]...`

use std::fmt;

use carina_core::provider::ProviderError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid Azure resource ID {id:?}: {reason}")]
pub struct ResourceIdError {
    pub id: String,
    pub reason: &'static str,
}

impl From<ResourceIdError> for ProviderError {
    fn from(err: ResourceIdError) -> Self {
        ProviderError::from_cause(err)
    }
}

/// Parsed ARM resource ID
///
/// Segment keys keep the casing they were parsed with; lookups ignore case
/// because ARM treats IDs case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AzureResourceId {
    pub subscription_id: String,
    pub resource_group: String,
    pub provider: String,
    segments: Vec<(String, String)>,
}

impl AzureResourceId {
    pub fn new(
        subscription_id: impl Into<String>,
        resource_group: impl Into<String>,
        provider: impl Into<String>,
        resource_type: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            resource_group: resource_group.into(),
            provider: provider.into(),
            segments: vec![(resource_type.into(), name.into())],
        }
    }

    pub fn parse(id: &str) -> Result<Self, ResourceIdError> {
        let err = |reason| ResourceIdError {
            id: id.to_string(),
            reason,
        };

        let trimmed = id.trim().trim_end_matches('/');
        let rest = trimmed
            .strip_prefix('/')
            .ok_or_else(|| err("must start with '/'"))?;
        let parts: Vec<&str> = rest.split('/').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(err("contains an empty segment"));
        }
        if parts.len() < 6 {
            return Err(err("expected subscription, resource group and provider"));
        }
        if !parts[0].eq_ignore_ascii_case("subscriptions") {
            return Err(err("missing 'subscriptions' segment"));
        }
        if !parts[2].eq_ignore_ascii_case("resourceGroups") {
            return Err(err("missing 'resourceGroups' segment"));
        }
        if !parts[4].eq_ignore_ascii_case("providers") {
            return Err(err("missing 'providers' segment"));
        }

        let pairs = &parts[6..];
        if pairs.is_empty() || pairs.len() % 2 != 0 {
            return Err(err("resource type and name segments must come in pairs"));
        }

        Ok(Self {
            subscription_id: parts[1].to_string(),
            resource_group: parts[3].to_string(),
            provider: parts[5].to_string(),
            segments: pairs
                .chunks(2)
                .map(|pair| (pair[0].to_string(), pair[1].to_string()))
                .collect(),
        })
    }

    /// Name stored under `key` (e.g. "containerGroups"), ignoring case
    pub fn segment(&self, key: &str) -> Option<&str> {
        self.segments
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Name of the innermost resource
    pub fn name(&self) -> &str {
        self.segments
            .last()
            .map(|(_, v)| v.as_str())
            .unwrap_or_default()
    }

    /// Full type, e.g. `Microsoft.ContainerRegistry/registries/replications`
    pub fn resource_type(&self) -> String {
        let mut out = self.provider.clone();
        for (key, _) in &self.segments {
            out.push('/');
            out.push_str(key);
        }
        out
    }

    /// ID of the enclosing resource, if this one is nested
    pub fn parent(&self) -> Option<Self> {
        if self.segments.len() < 2 {
            return None;
        }
        let mut parent = self.clone();
        parent.segments.pop();
        Some(parent)
    }

    /// ID of a nested resource below this one
    pub fn child(&self, resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        let mut child = self.clone();
        child.segments.push((resource_type.into(), name.into()));
        child
    }

    /// Whether both IDs point at the same resource, ignoring case
    pub fn same_resource(&self, other: &Self) -> bool {
        self.to_string().eq_ignore_ascii_case(&other.to_string())
    }
}

impl fmt::Display for AzureResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "/subscriptions/{}/resourceGroups/{}/providers/{}",
            self.subscription_id, self.resource_group, self.provider
        )?;
        for (key, value) in &self.segments {
            write!(f, "/{}/{}", key, value)?;
        }
        Ok(())
    }
}

impl std::str::FromStr for AzureResourceId {
    type Err = ResourceIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GROUP_ID: &str = "/subscriptions/0000/resourceGroups/rg-app/providers/Microsoft.ContainerInstance/containerGroups/web";

    #[test]
    fn parses_top_level_resource() {
        let id = AzureResourceId::parse(GROUP_ID).unwrap();
        assert_eq!(id.subscription_id, "0000");
        assert_eq!(id.resource_group, "rg-app");
        assert_eq!(id.provider, "Microsoft.ContainerInstance");
        assert_eq!(id.segment("containergroups"), Some("web"));
        assert_eq!(id.name(), "web");
        assert_eq!(id.resource_type(), "Microsoft.ContainerInstance/containerGroups");
        assert!(id.parent().is_none());
        assert_eq!(id.to_string(), GROUP_ID);
    }

    #[test]
    fn parses_nested_resource() {
        let id: AzureResourceId = "/subscriptions/0000/resourcegroups/rg/providers/Microsoft.Network/virtualNetworks/vnet/subnets/aci/"
            .parse()
            .unwrap();
        assert_eq!(id.name(), "aci");
        assert_eq!(id.segment("virtualNetworks"), Some("vnet"));

        let parent = id.parent().unwrap();
        assert_eq!(parent.name(), "vnet");
        assert_eq!(parent.child("subnets", "aci"), id);
    }

    #[test]
    fn rejects_malformed_ids() {
        for bad in [
            "",
            "subscriptions/0000/resourceGroups/rg/providers/Microsoft.Network/networkProfiles/np",
            "/subscriptions/0000/resourceGroups/rg",
            "/subscriptions/0000/resourceGroups/rg/providers/Microsoft.Network/networkProfiles",
            "/subscriptions/0000/groups/rg/providers/Microsoft.Network/networkProfiles/np",
            "/subscriptions/0000/resourceGroups//providers/Microsoft.Network/networkProfiles/np",
        ] {
            assert!(AzureResourceId::parse(bad).is_err(), "accepted {:?}", bad);
        }
    }

    #[test]
    fn same_resource_ignores_case() {
        let a = AzureResourceId::parse(GROUP_ID).unwrap();
        let b = AzureResourceId::parse(&GROUP_ID.to_uppercase()).unwrap();
        assert!(a.same_resource(&b));
        assert_ne!(a, b);
    }
}
