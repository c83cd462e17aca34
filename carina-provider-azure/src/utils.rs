//! Utility functions for value normalization and conversion

use std::collections::HashMap;

use carina_core::resource::Value;
use heck::{ToLowerCamelCase, ToSnakeCase, ToUpperCamelCase};
use serde_json::{Map, Number, Value as Json};

/// DSL names whose ARM spelling keeps an upper-case acronym
const NAME_OVERRIDES: &[(&str, &str)] = &[
    ("vnet_subnet_id", "vnetSubnetID"),
    ("pod_subnet_id", "podSubnetID"),
    ("node_public_ip_prefix_id", "nodePublicIPPrefixID"),
    ("enable_node_public_ip", "enableNodePublicIP"),
    ("dns_name_label", "dnsNameLabel"),
    ("ip_address", "ipAddress"),
];

/// Convert a DSL attribute name to its ARM property name
/// e.g., "os_disk_size_gb" -> "osDiskSizeGb", "vnet_subnet_id" -> "vnetSubnetID"
pub fn to_arm_name(dsl_name: &str) -> String {
    NAME_OVERRIDES
        .iter()
        .find(|(dsl, _)| *dsl == dsl_name)
        .map(|(_, arm)| arm.to_string())
        .unwrap_or_else(|| dsl_name.to_lower_camel_case())
}

/// Convert an ARM property name to its DSL attribute name
pub fn to_dsl_name(arm_name: &str) -> String {
    NAME_OVERRIDES
        .iter()
        .find(|(_, arm)| *arm == arm_name)
        .map(|(dsl, _)| dsl.to_string())
        .unwrap_or_else(|| arm_name.to_snake_case())
}

/// Strip the DSL enum prefix from a value
/// e.g., "azure.Environment.china" -> "china", "Sku.Premium" -> "Premium"
pub fn enum_variant(value: &str) -> &str {
    let parts: Vec<&str> = value.split('.').collect();
    let starts_upper = |s: &str| s.chars().next().is_some_and(|c| c.is_uppercase());
    match parts.as_slice() {
        [type_name, variant] if starts_upper(type_name) => variant,
        [provider, type_name, variant]
            if provider.chars().all(|c| c.is_lowercase()) && starts_upper(type_name) =>
        {
            variant
        }
        _ => value,
    }
}

/// Strip the enum prefix only when it names the type of `attribute`
/// e.g., ("sku", "Sku.Premium") -> "Premium", ("search_domains", "Contoso.com") unchanged
pub fn attribute_variant<'a>(attribute: &str, value: &'a str) -> &'a str {
    let variant = enum_variant(value);
    if variant.len() == value.len() {
        return value;
    }
    let prefix = &value[..value.len() - variant.len() - 1];
    let type_name = prefix.rsplit('.').next().unwrap_or(prefix);
    if type_name == attribute.to_upper_camel_case() {
        variant
    } else {
        value
    }
}

/// Map-valued attributes whose keys are user data, kept verbatim in both directions
const USER_KEYED_ATTRIBUTES: &[&str] = &[
    "tags",
    "labels",
    "node_labels",
    "node_selector",
    "annotations",
    "environment_variables",
    "secure_environment_variables",
];

fn is_user_keyed(attribute: &str) -> bool {
    USER_KEYED_ATTRIBUTES.contains(&attribute)
}

fn scalar_to_json(value: &Value) -> Json {
    match value {
        Value::String(s) => Json::String(s.clone()),
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(i) => Json::Number((*i).into()),
        Value::Float(f) => Number::from_f64(*f).map(Json::Number).unwrap_or(Json::Null),
        Value::List(_) | Value::Map(_) => Json::Null,
    }
}

/// Convert a DSL Value to JSON without touching keys or strings
pub fn value_to_json(value: &Value) -> Json {
    match value {
        Value::List(items) => Json::Array(items.iter().map(value_to_json).collect()),
        Value::Map(map) => Json::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), value_to_json(v)))
                .collect(),
        ),
        scalar => scalar_to_json(scalar),
    }
}

/// Convert the value of DSL attribute `attribute` to its ARM JSON form
///
/// Nested keys are camelCased and enum-typed strings lose their DSL prefix,
/// except below user-keyed maps, which pass through verbatim.
pub fn attribute_to_json(attribute: &str, value: &Value) -> Json {
    match value {
        Value::String(s) => Json::String(attribute_variant(attribute, s).to_string()),
        Value::List(items) => Json::Array(
            items
                .iter()
                .map(|item| attribute_to_json(attribute, item))
                .collect(),
        ),
        Value::Map(_) if is_user_keyed(attribute) => value_to_json(value),
        Value::Map(map) => Json::Object(
            map.iter()
                .map(|(k, v)| (to_arm_name(k), attribute_to_json(k, v)))
                .collect(),
        ),
        scalar => scalar_to_json(scalar),
    }
}

/// Convert JSON to a DSL Value without touching keys; `null` has no DSL form
pub fn json_to_value(value: &Json) -> Option<Value> {
    match value {
        Json::Object(map) => Some(Value::Map(
            map.iter()
                .filter_map(|(k, v)| json_to_value(v).map(|v| (k.clone(), v)))
                .collect(),
        )),
        Json::Array(items) => Some(Value::List(items.iter().filter_map(json_to_value).collect())),
        scalar => json_to_scalar(scalar),
    }
}

fn json_to_scalar(value: &Json) -> Option<Value> {
    match value {
        Json::String(s) => Some(Value::String(s.clone())),
        Json::Bool(b) => Some(Value::Bool(*b)),
        Json::Number(n) => match n.as_i64() {
            Some(i) => Some(Value::Int(i)),
            None => n.as_f64().map(Value::Float),
        },
        Json::Null | Json::Array(_) | Json::Object(_) => None,
    }
}

/// Convert an ARM property value back to the DSL form of `attribute`
pub fn json_to_attribute(attribute: &str, value: &Json) -> Option<Value> {
    match value {
        Json::Array(items) => Some(Value::List(
            items
                .iter()
                .filter_map(|item| json_to_attribute(attribute, item))
                .collect(),
        )),
        Json::Object(_) if is_user_keyed(attribute) => json_to_value(value),
        Json::Object(map) => Some(Value::Map(
            map.iter()
                .filter_map(|(k, v)| {
                    let name = to_dsl_name(k);
                    json_to_attribute(&name, v).map(|v| (name, v))
                })
                .collect(),
        )),
        scalar => json_to_scalar(scalar),
    }
}

/// Build the ARM `tags` object from the DSL `tags` map
pub fn build_tags(user_tags: Option<&Value>) -> Map<String, Json> {
    let mut tags = Map::new();
    if let Some(Value::Map(user_tags)) = user_tags {
        for (key, value) in user_tags {
            if let Value::String(v) = value {
                tags.insert(key.clone(), Json::String(v.clone()));
            }
        }
    }
    tags
}

/// Parse the ARM `tags` object; keys are kept verbatim
pub fn parse_tags(tags: &Json) -> HashMap<String, Value> {
    tags.as_object()
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), Value::String(s.to_string()))))
                .collect()
        })
        .unwrap_or_default()
}

/// Normalize a location for comparison: "West Europe" and "westeurope" are the same
pub fn normalize_location(location: &str) -> String {
    enum_variant(location)
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '_' && *c != '-')
        .collect::<String>()
        .to_ascii_lowercase()
}
