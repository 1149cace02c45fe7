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

//! Externally visible binding state.

use crate::config::{BindingConfig, Properties};
use serde::Serialize;

/// One binding as reported to operators. Secret connection values are masked.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Status {
    pub binding: String,
    pub ready: bool,
    pub source_kind: String,
    pub source_connections: Vec<Properties>,
    pub target_kind: String,
    pub target_connections: Vec<Properties>,
}

impl Status {
    /// Status for a binding that is registered but not running yet.
    pub fn pending(config: &BindingConfig) -> Self {
        Self {
            binding: config.name.clone(),
            ready: false,
            source_kind: config.sources.kind.clone(),
            source_connections: redact_all(&config.sources.connections),
            target_kind: config.targets.kind.clone(),
            target_connections: redact_all(&config.targets.connections),
        }
    }
}

fn redact_all(connections: &[Properties]) -> Vec<Properties> {
    connections.iter().map(Properties::redacted).collect()
}
