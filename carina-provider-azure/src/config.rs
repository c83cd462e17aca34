//! Provider configuration
//!
//! Values come from the provider block in the DSL, falling back to the
//! `ARM_*` environment variables used by other Azure tooling.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use carina_core::provider::ProviderError;
use carina_core::resource::Value;
use thiserror::Error;

use crate::resources::OperationTimeouts;
use crate::utils::enum_variant;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting '{key}' (set it in the provider block or via {env})")]
    Missing { key: &'static str, env: &'static str },

    #[error("setting '{key}' must be a string, got {found}")]
    NotAString { key: &'static str, found: &'static str },

    #[error("unknown Azure environment '{0}' (expected public, china or usgovernment)")]
    UnknownEnvironment(String),
}

impl From<ConfigError> for ProviderError {
    fn from(err: ConfigError) -> Self {
        ProviderError::from_cause(err)
    }
}

/// Azure cloud the provider talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CloudEnvironment {
    #[default]
    Public,
    China,
    UsGovernment,
}

impl CloudEnvironment {
    pub fn management_endpoint(&self) -> &'static str {
        match self {
            CloudEnvironment::Public => "https://management.azure.com",
            CloudEnvironment::China => "https://management.chinacloudapi.cn",
            CloudEnvironment::UsGovernment => "https://management.usgovcloudapi.net",
        }
    }
}

impl fmt::Display for CloudEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CloudEnvironment::Public => "public",
            CloudEnvironment::China => "china",
            CloudEnvironment::UsGovernment => "usgovernment",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for CloudEnvironment {
    type Err = ConfigError;

    /// Accepts `public`, `azure.Environment.china`, `us_government`, ...
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = enum_variant(s).replace(['_', '-'], "").to_ascii_lowercase();
        match normalized.as_str() {
            "public" | "azurepubliccloud" => Ok(CloudEnvironment::Public),
            "china" | "azurechinacloud" => Ok(CloudEnvironment::China),
            "usgovernment" | "usgov" | "azureusgovernmentcloud" => {
                Ok(CloudEnvironment::UsGovernment)
            }
            _ => Err(ConfigError::UnknownEnvironment(s.to_string())),
        }
    }
}

/// Settings needed to reach Azure Resource Manager
#[derive(Debug, Clone)]
pub struct AzureProviderConfig {
    pub subscription_id: String,
    pub environment: CloudEnvironment,
    /// Management endpoint, defaults to the environment's
    pub endpoint: String,
    pub access_token: String,
    /// Overrides the per-resource operation timeouts when set
    pub timeouts: Option<OperationTimeouts>,
}

impl AzureProviderConfig {
    /// Build from provider block attributes, falling back to the process environment
    pub fn from_attributes(attributes: &HashMap<String, Value>) -> Result<Self, ConfigError> {
        Self::from_attributes_with_env(attributes, |key| std::env::var(key).ok())
    }

    /// Like [`from_attributes`](Self::from_attributes) with an explicit variable lookup
    pub fn from_attributes_with_env(
        attributes: &HashMap<String, Value>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let lookup = |key: &'static str, var: &'static str| -> Result<Option<String>, ConfigError> {
            match attributes.get(key) {
                Some(Value::String(s)) => Ok(Some(s.clone())),
                Some(other) => Err(ConfigError::NotAString {
                    key,
                    found: other.type_name(),
                }),
                None => Ok(env(var).filter(|v| !v.is_empty())),
            }
        };
        let required = |key: &'static str, var: &'static str| -> Result<String, ConfigError> {
            lookup(key, var)?.ok_or(ConfigError::Missing { key, env: var })
        };

        let environment = match lookup("environment", "ARM_ENVIRONMENT")? {
            Some(s) => s.parse()?,
            None => CloudEnvironment::default(),
        };
        let endpoint = lookup("endpoint", "ARM_ENDPOINT")?
            .unwrap_or_else(|| environment.management_endpoint().to_string());

        Ok(Self {
            subscription_id: required("subscription_id", "ARM_SUBSCRIPTION_ID")?,
            environment,
            endpoint,
            access_token: required("access_token", "ARM_ACCESS_TOKEN")?,
            timeouts: None,
        })
    }

    pub fn with_timeouts(mut self, timeouts: OperationTimeouts) -> Self {
        self.timeouts = Some(timeouts);
        self
    }

    #[cfg(test)]
    pub(crate) fn for_tests(subscription_id: &str) -> Self {
        Self {
            subscription_id: subscription_id.to_string(),
            environment: CloudEnvironment::Public,
            endpoint: CloudEnvironment::Public.management_endpoint().to_string(),
            access_token: "token".to_string(),
            timeouts: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, &str)]) -> HashMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
            .collect()
    }

    #[test]
    fn parses_environment_names() {
        assert_eq!(
            "azure.Environment.china".parse::<CloudEnvironment>().unwrap(),
            CloudEnvironment::China
        );
        assert_eq!(
            "us_government".parse::<CloudEnvironment>().unwrap(),
            CloudEnvironment::UsGovernment
        );
        assert_eq!(
            "AzurePublicCloud".parse::<CloudEnvironment>().unwrap(),
            CloudEnvironment::Public
        );
        assert!("mars".parse::<CloudEnvironment>().is_err());
    }

    #[test]
    fn attributes_take_precedence_over_env() {
        let config = AzureProviderConfig::from_attributes_with_env(
            &attrs(&[
                ("subscription_id", "from-block"),
                ("environment", "azure.Environment.china"),
            ]),
            |key| match key {
                "ARM_SUBSCRIPTION_ID" => Some("from-env".to_string()),
                "ARM_ACCESS_TOKEN" => Some("token".to_string()),
                _ => None,
            },
        )
        .unwrap();

        assert_eq!(config.subscription_id, "from-block");
        assert_eq!(config.environment, CloudEnvironment::China);
        assert_eq!(config.endpoint, "https://management.chinacloudapi.cn");
        assert_eq!(config.access_token, "token");
    }

    #[test]
    fn explicit_endpoint_overrides_environment() {
        let config = AzureProviderConfig::from_attributes_with_env(
            &attrs(&[
                ("subscription_id", "0000"),
                ("access_token", "t"),
                ("endpoint", "http://localhost:8080"),
            ]),
            |_| None,
        )
        .unwrap();
        assert_eq!(config.environment, CloudEnvironment::Public);
        assert_eq!(config.endpoint, "http://localhost:8080");
    }

    #[test]
    fn reports_missing_settings() {
        let err = AzureProviderConfig::from_attributes_with_env(&HashMap::new(), |_| None)
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Missing {
                key: "subscription_id",
                env: "ARM_SUBSCRIPTION_ID"
            }
        ));
    }

    #[test]
    fn rejects_non_string_settings() {
        let mut attributes = attrs(&[("access_token", "t")]);
        attributes.insert("subscription_id".to_string(), Value::Int(1));
        let err = AzureProviderConfig::from_attributes_with_env(&attributes, |_| None).unwrap_err();
        assert!(err.to_string().contains("got int"));
    }
}
