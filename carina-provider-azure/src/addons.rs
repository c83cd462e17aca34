//! Managed cluster addon profiles
//!
//! ARM has spelled some addon keys differently over time (`omsagent` vs
//! `omsAgent`). Keys are normalized into [`Addon`] once when parsed, so the
//! rest of the provider never compares raw strings.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use carina_core::provider::ProviderError;
use carina_core::resource::Value;
use log::debug;
use serde_json::{Map, Value as Json, json};
use thiserror::Error;

use crate::config::CloudEnvironment;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Addon {
    AciConnectorLinux,
    AzurePolicy,
    HttpApplicationRouting,
    IngressApplicationGateway,
    KeyVaultSecretsProvider,
    KubeDashboard,
    OmsAgent,
    OpenServiceMesh,
}

impl Addon {
    pub const ALL: [Addon; 8] = [
        Addon::AciConnectorLinux,
        Addon::AzurePolicy,
        Addon::HttpApplicationRouting,
        Addon::IngressApplicationGateway,
        Addon::KeyVaultSecretsProvider,
        Addon::KubeDashboard,
        Addon::OmsAgent,
        Addon::OpenServiceMesh,
    ];

    /// Key used in `properties.addonProfiles`
    pub fn arm_key(&self) -> &'static str {
        match self {
            Addon::AciConnectorLinux => "aciConnectorLinux",
            Addon::AzurePolicy => "azurepolicy",
            Addon::HttpApplicationRouting => "httpApplicationRouting",
            Addon::IngressApplicationGateway => "ingressApplicationGateway",
            Addon::KeyVaultSecretsProvider => "azureKeyvaultSecretsProvider",
            Addon::KubeDashboard => "kubeDashboard",
            Addon::OmsAgent => "omsagent",
            Addon::OpenServiceMesh => "openServiceMesh",
        }
    }

    /// Key used in the DSL `addons` map
    pub fn dsl_name(&self) -> &'static str {
        match self {
            Addon::AciConnectorLinux => "aci_connector_linux",
            Addon::AzurePolicy => "azure_policy",
            Addon::HttpApplicationRouting => "http_application_routing",
            Addon::IngressApplicationGateway => "ingress_application_gateway",
            Addon::KeyVaultSecretsProvider => "key_vault_secrets_provider",
            Addon::KubeDashboard => "kube_dashboard",
            Addon::OmsAgent => "oms_agent",
            Addon::OpenServiceMesh => "open_service_mesh",
        }
    }

    /// Resolve an ARM or DSL key, ignoring case and separators
    pub fn from_key(key: &str) -> Option<Addon> {
        let wanted = squash(key);
        Addon::ALL
            .into_iter()
            .find(|a| squash(a.arm_key()) == wanted || squash(a.dsl_name()) == wanted)
    }
}

fn squash(key: &str) -> String {
    key.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

impl fmt::Display for Addon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.dsl_name())
    }
}

#[derive(Debug, Error)]
pub enum AddonError {
    #[error("unknown addon '{0}'")]
    Unknown(String),

    #[error("addon '{addon}' is invalid: {reason}")]
    Invalid { addon: String, reason: String },

    #[error("the addon '{addon}' is not supported in the {environment} Azure environment")]
    Unsupported {
        addon: Addon,
        environment: CloudEnvironment,
    },
}

impl From<AddonError> for ProviderError {
    fn from(err: AddonError) -> Self {
        ProviderError::from_cause(err)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct AddonProfile {
    pub enabled: bool,
    pub config: BTreeMap<String, String>,
}

/// Addon profiles of a managed cluster, keyed by normalized addon
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AddonProfiles(BTreeMap<Addon, AddonProfile>);

impl AddonProfiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, addon: Addon, profile: AddonProfile) {
        self.0.insert(addon, profile);
    }

    pub fn get(&self, addon: Addon) -> Option<&AddonProfile> {
        self.0.get(&addon)
    }

    pub fn enabled(&self) -> impl Iterator<Item = Addon> + '_ {
        self.0.iter().filter(|(_, p)| p.enabled).map(|(a, _)| *a)
    }

    /// Parse `properties.addonProfiles`; addons this provider does not model are skipped
    pub fn from_json(json: &Json) -> Self {
        let mut profiles = Self::new();
        let Some(map) = json.as_object() else {
            return profiles;
        };
        for (key, body) in map {
            let Some(addon) = Addon::from_key(key) else {
                debug!("Ignoring unmodelled addon profile {}", key);
                continue;
            };
            let enabled = body.get("enabled").and_then(Json::as_bool).unwrap_or(false);
            let config = body
                .get("config")
                .and_then(Json::as_object)
                .map(|c| {
                    c.iter()
                        .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                        .collect()
                })
                .unwrap_or_default();
            profiles.insert(addon, AddonProfile { enabled, config });
        }
        profiles
    }

    pub fn to_json(&self) -> Json {
        let mut out = Map::new();
        for (addon, profile) in &self.0 {
            let mut body = Map::new();
            body.insert("enabled".to_string(), json!(profile.enabled));
            if !profile.config.is_empty() {
                body.insert("config".to_string(), json!(profile.config));
            }
            out.insert(addon.arm_key().to_string(), Json::Object(body));
        }
        Json::Object(out)
    }

    /// Parse the DSL form: `{ oms_agent = { enabled = true, log_analytics_workspace_id = "..." } }`
    pub fn from_value(value: &Value) -> Result<Self, AddonError> {
        let map = value.as_map().ok_or_else(|| AddonError::Invalid {
            addon: "addons".to_string(),
            reason: format!("expected a map, got {}", value.type_name()),
        })?;

        let mut profiles = Self::new();
        for (key, body) in map {
            let addon = Addon::from_key(key).ok_or_else(|| AddonError::Unknown(key.clone()))?;
            let invalid = |reason: String| AddonError::Invalid {
                addon: key.clone(),
                reason,
            };
            let fields = body
                .as_map()
                .ok_or_else(|| invalid(format!("expected a map, got {}", body.type_name())))?;

            let mut profile = AddonProfile::default();
            for (field, v) in fields {
                if field == "enabled" {
                    profile.enabled = v
                        .as_bool()
                        .ok_or_else(|| {
                            invalid(format!("'enabled' must be a bool, got {}", v.type_name()))
                        })?;
                    continue;
                }
                let text = match v {
                    Value::String(s) => s.clone(),
                    Value::Bool(b) => b.to_string(),
                    Value::Int(i) => i.to_string(),
                    other => {
                        return Err(invalid(format!(
                            "'{}' must be a scalar, got {}",
                            field,
                            other.type_name()
                        )));
                    }
                };
                profile.config.insert(field.clone(), text);
            }
            profiles.insert(addon, profile);
        }
        Ok(profiles)
    }

    pub fn to_value(&self) -> Value {
        let map = self
            .0
            .iter()
            .map(|(addon, profile)| {
                let mut fields: HashMap<String, Value> = profile
                    .config
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                    .collect();
                fields.insert("enabled".to_string(), Value::Bool(profile.enabled));
                (addon.dsl_name().to_string(), Value::Map(fields))
            })
            .collect();
        Value::Map(map)
    }
}

/// Addons that cannot be enabled in a given Azure environment
///
/// Built once and handed to the provider; never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct UnsupportedAddons(HashMap<CloudEnvironment, HashSet<Addon>>);

impl Default for UnsupportedAddons {
    fn default() -> Self {
        Self::from_entries([
            (
                CloudEnvironment::China,
                vec![
                    Addon::AciConnectorLinux,
                    Addon::HttpApplicationRouting,
                    Addon::KubeDashboard,
                ],
            ),
            (
                CloudEnvironment::UsGovernment,
                vec![Addon::HttpApplicationRouting, Addon::KubeDashboard],
            ),
        ])
    }
}

impl UnsupportedAddons {
    /// A table where every addon is allowed everywhere
    pub fn none() -> Self {
        Self(HashMap::new())
    }

    pub fn from_entries<I, A>(entries: I) -> Self
    where
        I: IntoIterator<Item = (CloudEnvironment, A)>,
        A: IntoIterator<Item = Addon>,
    {
        Self(
            entries
                .into_iter()
                .map(|(env, addons)| (env, addons.into_iter().collect()))
                .collect(),
        )
    }

    pub fn is_supported(&self, environment: CloudEnvironment, addon: Addon) -> bool {
        self.0
            .get(&environment)
            .is_none_or(|unsupported| !unsupported.contains(&addon))
    }

    /// Reject enabled addons that `environment` does not offer
    pub fn validate(
        &self,
        environment: CloudEnvironment,
        profiles: &AddonProfiles,
    ) -> Result<(), AddonError> {
        match profiles
            .enabled()
            .find(|addon| !self.is_supported(environment, *addon))
        {
            Some(addon) => Err(AddonError::Unsupported { addon, environment }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_key_normalizes_legacy_casing() {
        assert_eq!(Addon::from_key("omsagent"), Some(Addon::OmsAgent));
        assert_eq!(Addon::from_key("omsAgent"), Some(Addon::OmsAgent));
        assert_eq!(Addon::from_key("oms_agent"), Some(Addon::OmsAgent));
        assert_eq!(Addon::from_key("azurePolicy"), Some(Addon::AzurePolicy));
        assert_eq!(Addon::from_key("gitops"), None);
    }

    #[test]
    fn parses_arm_profiles() {
        let profiles = AddonProfiles::from_json(&json!({
            "omsAgent": {
                "enabled": true,
                "config": {"logAnalyticsWorkspaceResourceID": "/subscriptions/0000/workspaces/w"}
            },
            "kubeDashboard": {"enabled": false},
            "gitops": {"enabled": true}
        }));

        let oms = profiles.get(Addon::OmsAgent).unwrap();
        assert!(oms.enabled);
        assert_eq!(
            oms.config["logAnalyticsWorkspaceResourceID"],
            "/subscriptions/0000/workspaces/w"
        );
        assert_eq!(profiles.enabled().collect::<Vec<_>>(), vec![Addon::OmsAgent]);

        let body = profiles.to_json();
        assert_eq!(body["omsagent"]["enabled"], json!(true));
        assert_eq!(body["kubeDashboard"]["enabled"], json!(false));
        assert!(body.get("gitops").is_none());
    }

    #[test]
    fn parses_dsl_profiles() {
        let value = Value::Map(HashMap::from([(
            "http_application_routing".to_string(),
            Value::Map(HashMap::from([("enabled".to_string(), Value::Bool(true))])),
        )]));
        let profiles = AddonProfiles::from_value(&value).unwrap();
        assert!(profiles.get(Addon::HttpApplicationRouting).unwrap().enabled);
        assert_eq!(profiles.to_value(), value);

        let unknown = Value::Map(HashMap::from([(
            "gitops".to_string(),
            Value::Map(HashMap::new()),
        )]));
        assert!(matches!(
            AddonProfiles::from_value(&unknown),
            Err(AddonError::Unknown(_))
        ));
    }

    #[test]
    fn validate_rejects_unsupported_enabled_addons() {
        let table = UnsupportedAddons::default();
        let mut profiles = AddonProfiles::new();
        profiles.insert(
            Addon::HttpApplicationRouting,
            AddonProfile {
                enabled: true,
                config: BTreeMap::new(),
            },
        );

        assert!(table.validate(CloudEnvironment::Public, &profiles).is_ok());

        let err = table
            .validate(CloudEnvironment::China, &profiles)
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("http_application_routing"));
        assert!(msg.contains("china"));
    }

    #[test]
    fn validate_ignores_disabled_addons() {
        let mut profiles = AddonProfiles::new();
        profiles.insert(Addon::KubeDashboard, AddonProfile::default());
        assert!(
            UnsupportedAddons::default()
                .validate(CloudEnvironment::UsGovernment, &profiles)
                .is_ok()
        );
    }

    #[test]
    fn injected_table_replaces_defaults() {
        let table =
            UnsupportedAddons::from_entries([(CloudEnvironment::Public, [Addon::OmsAgent])]);
        assert!(!table.is_supported(CloudEnvironment::Public, Addon::OmsAgent));
        assert!(table.is_supported(CloudEnvironment::China, Addon::AciConnectorLinux));
        assert!(
            UnsupportedAddons::none().is_supported(CloudEnvironment::China, Addon::KubeDashboard)
        );
    }
}
