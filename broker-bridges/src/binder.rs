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

//! Owns one binding: its sources, its middleware-wrapped targets and their lifecycle.

use crate::config::BindingConfig;
use crate::error::{BridgeError, Result};
use crate::metrics::MetricsExporter;
use crate::middleware::{ChainLabels, Middleware, MiddlewareChain, MiddlewareOptions};
use crate::observability::events;
use crate::registry::Registry;
use crate::source::{Source, SourceContext};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const COMPONENT: &str = "binder";

pub struct Binder {
    config: BindingConfig,
    registry: Arc<Registry>,
    sources: Vec<Box<dyn Source>>,
    targets: Vec<MiddlewareChain>,
    shutdown: CancellationToken,
    fault: CancellationToken,
}

impl Binder {
    pub fn new(config: BindingConfig, registry: Arc<Registry>) -> Self {
        Self {
            config,
            registry,
            sources: Vec::new(),
            targets: Vec::new(),
            shutdown: CancellationToken::new(),
            fault: CancellationToken::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &BindingConfig {
        &self.config
    }

    /// Builds every target chain, then every source. On failure, stops whatever
    /// was already built and returns the error.
    pub async fn init(&mut self, metrics: Option<&MetricsExporter>) -> Result<()> {
        self.config.validate()?;
        let outcome = match MiddlewareOptions::from_properties(&self.config.properties) {
            Ok(options) => self.init_components(&options, metrics).await,
            Err(err) => Err(err),
        };

        if let Err(err) = outcome {
            warn!(
                event = events::BINDING_INIT_ROLLBACK,
                component = COMPONENT,
                binding = self.name(),
                targets = self.targets.len(),
                sources = self.sources.len(),
                err = %err,
                "binding init failed; stopping initialised components"
            );
            self.stop_components().await;
            return Err(err);
        }
        Ok(())
    }

    async fn init_components(
        &mut self,
        options: &MiddlewareOptions,
        metrics: Option<&MetricsExporter>,
    ) -> Result<()> {
        let name = self.config.name.clone();
        let sources = self.config.sources.clone();
        let targets = self.config.targets.clone();

        for (index, connection) in targets.connections.iter().enumerate() {
            let mut target = self.registry.create_target(&targets.kind)?;
            target.init(connection, &name).await?;
            self.targets.push(MiddlewareChain::build(
                ChainLabels::new(&name, &sources.kind, &targets.kind, index),
                Arc::from(target),
                options,
                metrics,
            ));
        }

        for connection in &sources.connections {
            let mut source = self.registry.create_source(&sources.kind)?;
            if let Err(err) = source
                .init(connection, &self.config.properties, &name)
                .await
            {
                if let Err(stop_err) = source.stop().await {
                    warn!(
                        event = events::BINDING_COMPONENT_STOP_FAILED,
                        component = COMPONENT,
                        binding = name.as_str(),
                        source = sources.kind.as_str(),
                        err = %stop_err,
                        "failed to stop source after init failure"
                    );
                }
                return Err(err);
            }
            self.sources.push(source);
        }
        Ok(())
    }

    /// Launches every source under a child of `parent`.
    pub async fn start(&mut self, parent: &CancellationToken) -> Result<()> {
        if self.sources.is_empty() || self.targets.is_empty() {
            return Err(BridgeError::NothingToBind(self.config.name.clone()));
        }

        self.shutdown = parent.child_token();
        let chains: Vec<Arc<dyn Middleware>> = self
            .targets
            .iter()
            .map(|chain| Arc::new(chain.clone()) as Arc<dyn Middleware>)
            .collect();

        for source in &mut self.sources {
            let ctx = SourceContext {
                shutdown: self.shutdown.clone(),
                fault: self.fault.clone(),
            };
            source.start(ctx, chains.clone()).await?;
        }

        info!(
            event = events::BINDING_START_OK,
            component = COMPONENT,
            binding = self.config.name.as_str(),
            source = self.config.sources.kind.as_str(),
            sources = self.sources.len(),
            target = self.config.targets.kind.as_str(),
            targets = self.targets.len(),
            "binding started"
        );
        Ok(())
    }

    /// Cancels the binding, then stops sources before targets.
    pub async fn stop(&mut self) -> Result<()> {
        self.shutdown.cancel();
        self.stop_components().await;
        info!(
            event = events::BINDING_STOP_OK,
            component = COMPONENT,
            binding = self.config.name.as_str(),
            "binding stopped"
        );
        Ok(())
    }

    async fn stop_components(&mut self) {
        for mut source in self.sources.drain(..) {
            if let Err(err) = source.stop().await {
                warn!(
                    event = events::BINDING_COMPONENT_STOP_FAILED,
                    component = COMPONENT,
                    binding = self.config.name.as_str(),
                    source = self.config.sources.kind.as_str(),
                    err = %err,
                    "failed to stop source"
                );
            }
        }
        for chain in self.targets.drain(..) {
            if let Err(err) = chain.stop().await {
                warn!(
                    event = events::BINDING_COMPONENT_STOP_FAILED,
                    component = COMPONENT,
                    binding = self.config.name.as_str(),
                    target = chain.labels().target_label().as_str(),
                    err = %err,
                    "failed to stop target"
                );
            }
        }
    }

    /// Resolves when a source reports a lost subscription.
    pub fn fault_signal(&self) -> CancellationToken {
        self.fault.clone()
    }

    /// Resolves when the binding is stopped.
    pub fn shutdown_signal(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}
