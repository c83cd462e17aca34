//! Mapping between DSL attributes and ARM request/response bodies
//!
//! ARM bodies have a handful of top-level fields (`location`, `tags`, `sku`,
//! `zones`) and put everything else under `properties` in camelCase. A few
//! attributes need a nested shape and are handled explicitly.

use std::collections::HashMap;

use carina_core::resource::Value;
use serde_json::{Map, Value as Json, json};

use crate::addons::{AddonError, AddonProfiles};
use crate::resources::ResourceConfig;
use crate::utils::{
    attribute_to_json, attribute_variant, build_tags, json_to_attribute, normalize_location,
    parse_tags, to_arm_name, to_dsl_name,
};

/// Attributes that address the resource rather than describe it
const ADDRESSING_ATTRIBUTES: &[&str] = &["id", "name", "resource_group_name"];

fn is_body_attribute(config: &ResourceConfig, key: &str) -> bool {
    !key.starts_with('_')
        && !ADDRESSING_ATTRIBUTES.contains(&key)
        && config.parent_attribute() != Some(key)
}

/// Build a full ARM body from DSL attributes
pub fn expand_attributes(
    config: &ResourceConfig,
    attributes: &HashMap<String, Value>,
) -> Result<Json, AddonError> {
    expand_selected(config, attributes, |_| true)
}

/// Build an ARM body holding only `changed` attributes, for PATCH
pub fn expand_changes(
    config: &ResourceConfig,
    attributes: &HashMap<String, Value>,
    changed: &[String],
) -> Result<Json, AddonError> {
    expand_selected(config, attributes, |key| changed.iter().any(|c| c == key))
}

fn expand_selected(
    config: &ResourceConfig,
    attributes: &HashMap<String, Value>,
    include: impl Fn(&str) -> bool,
) -> Result<Json, AddonError> {
    let mut body = Map::new();
    let mut properties = Map::new();

    let mut keys: Vec<&String> = attributes.keys().collect();
    keys.sort();

    for key in keys {
        if !is_body_attribute(config, key) || !include(key) {
            continue;
        }
        let value = &attributes[key.as_str()];
        match key.as_str() {
            "location" if config.has_location => {
                body.insert("location".to_string(), location_to_json(value));
            }
            "tags" if config.has_tags => {
                body.insert("tags".to_string(), Json::Object(build_tags(Some(value))));
            }
            "zones" => {
                body.insert("zones".to_string(), attribute_to_json(key, value));
            }
            "sku" => {
                let sku = match value {
                    Value::String(s) => json!({ "name": attribute_variant(key, s) }),
                    other => attribute_to_json(key, other),
                };
                body.insert("sku".to_string(), sku);
            }
            "addons" => {
                let profiles = AddonProfiles::from_value(value)?;
                properties.insert("addonProfiles".to_string(), profiles.to_json());
            }
            "subnet_ids" => {
                let ids: Vec<Json> = value
                    .as_list()
                    .unwrap_or_default()
                    .iter()
                    .filter_map(Value::as_str)
                    .map(|id| json!({ "id": id }))
                    .collect();
                properties.insert("subnetIds".to_string(), Json::Array(ids));
            }
            "network_profile_id" => {
                properties.insert(
                    "networkProfile".to_string(),
                    json!({ "id": attribute_to_json(key, value) }),
                );
            }
            _ => {
                properties.insert(to_arm_name(key), attribute_to_json(key, value));
            }
        }
    }

    if !properties.is_empty() {
        body.insert("properties".to_string(), Json::Object(properties));
    }
    Ok(Json::Object(body))
}

/// A DSL location enum ("azure.Location.west_europe") becomes the ARM name "westeurope";
/// a plain string is sent as written
fn location_to_json(value: &Value) -> Json {
    match value {
        Value::String(s) if attribute_variant("location", s).len() != s.len() => {
            Json::String(normalize_location(s))
        }
        other => attribute_to_json("location", other),
    }
}

/// Deep-merge `patch` into `target`; objects merge key by key, anything else replaces
pub fn merge_body(target: &mut Json, patch: Json) {
    match (target, patch) {
        (Json::Object(target), Json::Object(patch)) => {
            for (key, value) in patch {
                merge_body(target.entry(key).or_insert(Json::Null), value);
            }
        }
        (target, patch) => *target = patch,
    }
}

/// Flatten an ARM response body into DSL attributes
pub fn flatten_body(config: &ResourceConfig, body: &Json) -> HashMap<String, Value> {
    let mut attributes = HashMap::new();

    if let Some(id) = body.get("id").and_then(Json::as_str) {
        attributes.insert("id".to_string(), Value::String(id.to_string()));
    }
    if config.has_location
        && let Some(location) = body.get("location").and_then(Json::as_str)
    {
        attributes.insert("location".to_string(), Value::String(location.to_string()));
    }
    if config.has_tags
        && let Some(tags) = body.get("tags")
    {
        let tags = parse_tags(tags);
        if !tags.is_empty() {
            attributes.insert("tags".to_string(), Value::Map(tags));
        }
    }
    if let Some(zones) = body.get("zones").and_then(|z| json_to_attribute("zones", z)) {
        attributes.insert("zones".to_string(), zones);
    }
    if let Some(sku) = body.get("sku").and_then(|s| s.get("name")).and_then(Json::as_str) {
        attributes.insert("sku".to_string(), Value::String(sku.to_string()));
    }

    let Some(properties) = body.get("properties").and_then(Json::as_object) else {
        return attributes;
    };
    for (key, value) in properties {
        match key.as_str() {
            "addonProfiles" => {
                attributes.insert(
                    "addons".to_string(),
                    AddonProfiles::from_json(value).to_value(),
                );
            }
            "subnetIds" => {
                let ids: Vec<Value> = value
                    .as_array()
                    .into_iter()
                    .flatten()
                    .filter_map(|s| s.get("id").and_then(Json::as_str))
                    .map(|id| Value::String(id.to_string()))
                    .collect();
                attributes.insert("subnet_ids".to_string(), Value::List(ids));
            }
            "networkProfile" => {
                if let Some(id) = value.get("id").and_then(Json::as_str) {
                    attributes.insert(
                        "network_profile_id".to_string(),
                        Value::String(id.to_string()),
                    );
                }
            }
            _ => {
                let name = to_dsl_name(key);
                if let Some(v) = json_to_attribute(&name, value) {
                    attributes.insert(name, v);
                }
            }
        }
    }
    attributes
}
