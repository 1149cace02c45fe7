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

use broker_bridges::{BindingConfig, BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

const DEFAULT_API_PORT: u16 = 8080;

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub(crate) api: ApiConfig,
    pub(crate) bindings: Vec<BindingConfig>,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ApiConfig {
    #[serde(default = "default_port")]
    pub(crate) port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_API_PORT,
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_API_PORT
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|err| {
            BridgeError::config(format!(
                "unable to read config file {}: {err}",
                path.display()
            ))
        })?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = json5::from_str(contents)
            .map_err(|err| BridgeError::config(format!("unable to parse config file: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for binding in &self.bindings {
            binding.validate()?;
            if !names.insert(binding.name.as_str()) {
                return Err(BridgeError::config(format!(
                    "duplicate binding name: {}",
                    binding.name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{ApiConfig, Config};
    use broker_bridges::BridgeError;

    const BINDING: &str = r#"
        {
            name: "orders",
            sources: {
                kind: "broker.events",
                connections: [{ address: "memory", channel: "orders", sources: 2 }],
            },
            targets: {
                kind: "broker.queue",
                connections: [{ address: "memory", default_channel: "orders.q" }],
            },
            properties: { retry_attempts: 3, "load-balancing": true },
        }
    "#;

    #[test]
    fn parses_bindings_and_defaults_api_port() {
        let config = Config::parse(&format!("{{ bindings: [{BINDING}] }}")).unwrap();

        assert_eq!(config.api, ApiConfig::default());
        assert_eq!(config.api.port, 8080);
        assert_eq!(config.bindings.len(), 1);
        let binding = &config.bindings[0];
        assert_eq!(binding.sources.kind, "broker.events");
        assert_eq!(binding.sources.connections[0].get("sources"), Some("2"));
        assert_eq!(binding.properties.get("load-balancing"), Some("true"));
    }

    #[test]
    fn explicit_api_port_is_used() {
        let config = Config::parse("{ api: { port: 9100 }, bindings: [] }").unwrap();

        assert_eq!(config.api.port, 9100);
    }

    #[test]
    fn duplicate_binding_names_are_rejected() {
        let err = Config::parse(&format!("{{ bindings: [{BINDING}, {BINDING}] }}")).unwrap_err();

        assert_eq!(
            err,
            BridgeError::Config("duplicate binding name: orders".into())
        );
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(matches!(
            Config::parse("{ bindings: [], extra: 1 }"),
            Err(BridgeError::Config(_))
        ));
    }

    #[test]
    fn blank_binding_name_is_rejected() {
        let config = BINDING.replace("\"orders\"", "\"\"");

        assert!(Config::parse(&format!("{{ bindings: [{config}] }}")).is_err());
    }

    #[test]
    fn bundled_default_config_is_valid() {
        let config = Config::parse(include_str!("../DEFAULT_CONFIG.json5")).unwrap();

        let names: Vec<&str> = config
            .bindings
            .iter()
            .map(|binding| binding.name.as_str())
            .collect();
        assert_eq!(names, ["orders-to-queues", "control-commands", "jobs-replay"]);
        assert_eq!(config.api.port, 8080);
    }

    #[test]
    fn missing_file_is_a_config_error() {
        assert!(matches!(
            Config::load(std::path::Path::new("/definitely/not/here.json5")),
            Err(BridgeError::Config(_))
        ));
    }
}
