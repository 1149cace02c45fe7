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

//! Kind-string lookup of source and target factories.

use crate::broker::BrokerConnector;
use crate::error::{BridgeError, Result};
use crate::source::{
    self, CommandSource, EventsSource, EventsStoreSource, QuerySource, QueueSource,
    QueueStreamSource, Source, SourceFactory,
};
use crate::target::{self, BrokerTarget, Target, TargetFactory};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct Registry {
    sources: HashMap<String, Arc<dyn SourceFactory>>,
    targets: HashMap<String, Arc<dyn TargetFactory>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in broker source and target kind, all over `connector`.
    pub fn with_broker(connector: Arc<dyn BrokerConnector>) -> Self {
        let mut registry = Self::new();

        let c = connector.clone();
        registry.register_source(source::EVENTS, move || {
            Box::new(EventsSource::new(c.clone())) as Box<dyn Source>
        });
        let c = connector.clone();
        registry.register_source(source::EVENTS_STORE, move || {
            Box::new(EventsStoreSource::new(c.clone())) as Box<dyn Source>
        });
        let c = connector.clone();
        registry.register_source(source::COMMAND, move || {
            Box::new(CommandSource::new(c.clone())) as Box<dyn Source>
        });
        let c = connector.clone();
        registry.register_source(source::QUERY, move || {
            Box::new(QuerySource::new(c.clone())) as Box<dyn Source>
        });
        let c = connector.clone();
        registry.register_source(source::QUEUE, move || {
            Box::new(QueueSource::new(c.clone())) as Box<dyn Source>
        });
        let c = connector.clone();
        registry.register_source(source::QUEUE_STREAM, move || {
            Box::new(QueueStreamSource::new(c.clone())) as Box<dyn Source>
        });

        let targets: [(&str, fn(Arc<dyn BrokerConnector>) -> BrokerTarget); 5] = [
            (target::EVENTS, BrokerTarget::events),
            (target::EVENTS_STORE, BrokerTarget::events_store),
            (target::COMMAND, BrokerTarget::command),
            (target::QUERY, BrokerTarget::query),
            (target::QUEUE, BrokerTarget::queue),
        ];
        for (kind, build) in targets {
            let c = connector.clone();
            registry.register_target(kind, move || Box::new(build(c.clone())) as Box<dyn Target>);
        }

        registry
    }

    pub fn register_source(
        &mut self,
        kind: &str,
        factory: impl SourceFactory + 'static,
    ) -> &mut Self {
        self.sources.insert(kind.to_string(), Arc::new(factory));
        self
    }

    pub fn register_target(
        &mut self,
        kind: &str,
        factory: impl TargetFactory + 'static,
    ) -> &mut Self {
        self.targets.insert(kind.to_string(), Arc::new(factory));
        self
    }

    pub fn create_source(&self, kind: &str) -> Result<Box<dyn Source>> {
        self.sources
            .get(kind)
            .map(|factory| factory.create())
            .ok_or_else(|| BridgeError::config(format!("unknown source kind '{kind}'")))
    }

    pub fn create_target(&self, kind: &str) -> Result<Box<dyn Target>> {
        self.targets
            .get(kind)
            .map(|factory| factory.create())
            .ok_or_else(|| BridgeError::config(format!("unknown target kind '{kind}'")))
    }

    pub fn source_kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.sources.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    pub fn target_kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.targets.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }
}

#[cfg(test)]
mod tests {
    use super::Registry;
    use crate::error::BridgeError;

    #[test]
    fn unknown_kinds_are_configuration_errors() {
        let registry = Registry::new();

        assert!(matches!(
            registry.create_source("broker.events"),
            Err(BridgeError::Config(message)) if message.contains("broker.events")
        ));
        assert!(matches!(
            registry.create_target("http"),
            Err(BridgeError::Config(_))
        ));
    }
}
