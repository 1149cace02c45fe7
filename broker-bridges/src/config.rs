/********************************************************************************
 * Copyright (c) 2024 Contributors to the Eclipse Foundation
 *
 * See the NOTICE file(s) distributed with this work for additional
 * information regarding copyright ownership.
 *
 * This program and the accompanying materials are made available under the
 * terms of the Apache License Version 2.0 which is available at
 * https://www.apache.org/licenses/LICENSE-2.0
 *
 * SPDX-License-Identifier: Apache-2.0
 ********************************************************************************/

//! Declarative binding configuration and typed access to property maps.
//!
//! Property maps stay string-keyed on the wire so that every source and target
//! kind can define its own options. Components never read them ad hoc: each one
//! parses its options once, through the accessors on [`Properties`], into a
//! typed options struct that enumerates defaults and valid ranges.

use crate::error::{BridgeError, Result};
use serde::de::{Deserializer, Error as DeError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Display;
use std::str::FromStr;

const REDACTED: &str = "********";
const SECRET_KEY_MARKERS: [&str; 3] = ["token", "password", "secret"];

/// String property map used for connection options and shared binding options.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Properties(BTreeMap<String, String>);

impl<'de> Deserialize<'de> for Properties {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = BTreeMap::<String, serde_json::Value>::deserialize(deserializer)?;
        let mut properties = BTreeMap::new();
        for (key, value) in raw {
            let value = match value {
                serde_json::Value::String(value) => value,
                serde_json::Value::Bool(value) => value.to_string(),
                serde_json::Value::Number(value) => value.to_string(),
                serde_json::Value::Null => String::new(),
                other => {
                    return Err(D::Error::custom(format!(
                        "property '{key}' must be a string, number or boolean, got {other}"
                    )))
                }
            };
            properties.insert(key, value);
        }
        Ok(Self(properties))
    }
}

impl<K, V> FromIterator<(K, V)> for Properties
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    /// Returns the trimmed value for `key`. Blank values read as absent.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }

    /// Returns the value for `key`, failing when it is absent or blank.
    pub fn require(&self, key: &str) -> Result<&str> {
        self.get(key)
            .ok_or_else(|| BridgeError::config(format!("missing required option '{key}'")))
    }

    /// Parses the value for `key`, returning `Ok(None)` when it is absent.
    pub fn get_parsed<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: Display,
    {
        self.get(key)
            .map(|raw| {
                raw.parse::<T>().map_err(|err| {
                    BridgeError::config(format!("invalid value '{raw}' for option '{key}': {err}"))
                })
            })
            .transpose()
    }

    /// Parses the value for `key` and checks it lies in `min..=max`.
    pub fn get_in_range<T>(&self, key: &str, default: T, min: T, max: T) -> Result<T>
    where
        T: FromStr + PartialOrd + Display + Copy,
        T::Err: Display,
    {
        let value = self.get_parsed(key)?.unwrap_or(default);
        if value < min || value > max {
            return Err(BridgeError::config(format!(
                "option '{key}' must be between {min} and {max}, got {value}"
            )));
        }
        Ok(value)
    }

    pub fn get_bool(&self, key: &str, default: bool) -> Result<bool> {
        match self.get(key).map(str::to_ascii_lowercase) {
            None => Ok(default),
            Some(value) if value == "true" => Ok(true),
            Some(value) if value == "false" => Ok(false),
            Some(other) => Err(BridgeError::config(format!(
                "option '{key}' must be 'true' or 'false', got '{other}'"
            ))),
        }
    }

    /// Returns the allowed value matching `key`, or `default` when absent.
    pub fn get_one_of(
        &self,
        key: &str,
        default: &'static str,
        allowed: &[&'static str],
    ) -> Result<&'static str> {
        let Some(value) = self.get(key) else {
            return Ok(default);
        };
        allowed
            .iter()
            .find(|candidate| candidate.eq_ignore_ascii_case(value))
            .copied()
            .ok_or_else(|| {
                BridgeError::config(format!(
                    "option '{key}' must be one of [{}], got '{value}'",
                    allowed.join(", ")
                ))
            })
    }

    /// Splits a comma separated value, dropping blank entries.
    pub fn get_list(&self, key: &str) -> Vec<String> {
        self.get(key)
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|entry| !entry.is_empty())
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Copy of the map with secret-looking values masked.
    pub fn redacted(&self) -> Properties {
        Self(
            self.0
                .iter()
                .map(|(key, value)| {
                    let lowered = key.to_ascii_lowercase();
                    if SECRET_KEY_MARKERS
                        .iter()
                        .any(|marker| lowered.contains(marker))
                    {
                        (key.clone(), REDACTED.to_string())
                    } else {
                        (key.clone(), value.clone())
                    }
                })
                .collect(),
        )
    }
}

/// A component kind plus its ordered connection property maps.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Spec {
    pub kind: String,
    #[serde(default)]
    pub connections: Vec<Properties>,
}

impl Spec {
    pub fn new(kind: &str, connections: Vec<Properties>) -> Self {
        Self {
            kind: kind.to_string(),
            connections,
        }
    }
}

/// Identity and declarative wiring for one binding.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BindingConfig {
    pub name: String,
    pub sources: Spec,
    pub targets: Spec,
    #[serde(default)]
    pub properties: Properties,
}

impl BindingConfig {
    pub fn new(name: &str, sources: Spec, targets: Spec) -> Self {
        Self {
            name: name.to_string(),
            sources,
            targets,
            properties: Properties::default(),
        }
    }

    pub fn with_properties(mut self, properties: Properties) -> Self {
        self.properties = properties;
        self
    }

    /// Checks the identity fields every binding must carry.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(BridgeError::config("binding name must not be empty"));
        }
        if self.sources.kind.trim().is_empty() {
            return Err(BridgeError::config(format!(
                "binding {}: sources kind must not be empty",
                self.name
            )));
        }
        if self.targets.kind.trim().is_empty() {
            return Err(BridgeError::config(format!(
                "binding {}: targets kind must not be empty",
                self.name
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{BindingConfig, Properties, Spec};
    use crate::error::BridgeError;

    fn binding(name: &str, source_kind: &str, target_kind: &str) -> BindingConfig {
        BindingConfig::new(
            name,
            Spec::new(source_kind, vec![Properties::new()]),
            Spec::new(target_kind, vec![Properties::new()]),
        )
    }

    #[test]
    fn validate_rejects_blank_identity_fields() {
        assert!(binding("b", "broker.events", "broker.queue").validate().is_ok());
        assert!(matches!(
            binding(" ", "broker.events", "broker.queue").validate(),
            Err(BridgeError::Config(_))
        ));
        assert!(binding("b", "", "broker.queue").validate().is_err());
        assert!(binding("b", "broker.events", "").validate().is_err());
    }

    #[test]
    fn require_treats_blank_values_as_missing() {
        let properties = Properties::new().with("channel", "  ");

        let err = properties.require("channel").unwrap_err();
        assert_eq!(
            err.to_string(),
            "configuration error: missing required option 'channel'"
        );
    }

    #[test]
    fn get_in_range_applies_default_and_bounds() {
        let properties = Properties::new().with("sources", "2048");

        assert_eq!(
            Properties::new()
                .get_in_range("sources", 1u32, 1, 1024)
                .unwrap(),
            1
        );
        assert!(properties.get_in_range("sources", 1u32, 1, 1024).is_err());
        assert!(Properties::new()
            .with("sources", "many")
            .get_in_range("sources", 1u32, 1, 1024)
            .is_err());
    }

    #[test]
    fn get_one_of_matches_case_insensitively() {
        let properties = Properties::new().with("retry_delay_type", "Back-Off");

        assert_eq!(
            properties
                .get_one_of("retry_delay_type", "fixed", &["fixed", "back-off", "random"])
                .unwrap(),
            "back-off"
        );
        assert!(Properties::new()
            .with("retry_delay_type", "linear")
            .get_one_of("retry_delay_type", "fixed", &["fixed", "back-off"])
            .is_err());
    }

    #[test]
    fn get_list_splits_and_trims() {
        let properties = Properties::new().with("channels", "a, b,,c ");

        assert_eq!(properties.get_list("channels"), vec!["a", "b", "c"]);
        assert!(Properties::new().get_list("channels").is_empty());
    }

    #[test]
    fn redacted_masks_secret_keys_only() {
        let properties = Properties::new()
            .with("address", "localhost:50000")
            .with("auth_token", "abc")
            .with("db_password", "pw");

        let redacted = properties.redacted();
        assert_eq!(redacted.get("address"), Some("localhost:50000"));
        assert_eq!(redacted.get("auth_token"), Some("********"));
        assert_eq!(redacted.get("db_password"), Some("********"));
    }

    #[test]
    fn properties_deserialize_scalars_as_strings() {
        let binding: BindingConfig = json5::from_str(
            r#"{
                name: "events-to-queue",
                sources: { kind: "broker.events", connections: [{ address: "memory", channel: "in", sources: 2 }] },
                targets: { kind: "broker.queue", connections: [{ address: "memory", default_channel: "out" }] },
                properties: { "load-balancing": true, rate_per_second: 10 },
            }"#,
        )
        .expect("binding config should parse");

        assert_eq!(binding.sources.connections[0].get("sources"), Some("2"));
        assert!(binding.properties.get_bool("load-balancing", false).unwrap());
        assert_eq!(
            binding
                .properties
                .get_in_range("rate_per_second", 0u32, 0, 1_000_000)
                .unwrap(),
            10
        );
    }
}
