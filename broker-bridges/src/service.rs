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

//! Process-wide registry of running bindings.
//!
//! `Service` is a cheap cloneable handle. Bindings live in a sharded map and are
//! reported in declaration order. Bindings launched through [`Service::start`]
//! are retried until they come up and restarted when a source loses its
//! subscription.

use crate::binder::Binder;
use crate::config::BindingConfig;
use crate::error::{BridgeError, Result};
use crate::metrics::{MetricReport, MetricsExporter};
use crate::observability::events;
use crate::registry::Registry;
use crate::status::Status;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

/// Pause between attempts to bring up a binding launched by [`Service::start`].
pub const BINDING_RETRY_INTERVAL: Duration = Duration::from_secs(1);

const COMPONENT: &str = "service";

struct ServiceInner {
    registry: Arc<Registry>,
    metrics: MetricsExporter,
    binders: DashMap<String, Binder>,
    statuses: DashMap<String, Status>,
    order: RwLock<Vec<String>>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

#[derive(Clone)]
pub struct Service {
    inner: Arc<ServiceInner>,
}

impl Service {
    pub fn new(registry: Registry) -> Self {
        Self::with_metrics(registry, MetricsExporter::new())
    }

    pub fn with_metrics(registry: Registry, metrics: MetricsExporter) -> Self {
        Self {
            inner: Arc::new(ServiceInner {
                registry: Arc::new(registry),
                metrics,
                binders: DashMap::new(),
                statuses: DashMap::new(),
                order: RwLock::new(Vec::new()),
                shutdown: CancellationToken::new(),
                tasks: TaskTracker::new(),
            }),
        }
    }

    /// Builds, initialises and starts one binding.
    ///
    /// The name is reserved before any I/O, so a concurrent `add` of the same
    /// name fails with `AlreadyExists` instead of racing.
    pub async fn add(&self, config: BindingConfig) -> Result<()> {
        config.validate()?;
        let name = config.name.clone();
        match self.inner.statuses.entry(name.clone()) {
            Entry::Occupied(_) => return Err(BridgeError::AlreadyExists(name)),
            Entry::Vacant(slot) => {
                slot.insert(Status::pending(&config));
            }
        }
        self.remember_order(&name);

        info!(
            event = events::BINDING_ADD_START,
            component = COMPONENT,
            binding = name.as_str(),
            source = config.sources.kind.as_str(),
            target = config.targets.kind.as_str(),
            "adding binding"
        );

        let mut binder = Binder::new(config, self.inner.registry.clone());
        let started = match binder.init(Some(&self.inner.metrics)).await {
            Ok(()) => binder.start(&self.inner.shutdown).await,
            Err(err) => Err(err),
        };
        let started = started.and_then(|()| {
            if self.inner.shutdown.is_cancelled() {
                Err(BridgeError::Cancelled)
            } else {
                Ok(())
            }
        });

        if let Err(err) = started {
            let _ = binder.stop().await;
            self.inner.statuses.remove(&name);
            error!(
                event = events::BINDING_ADD_FAILED,
                component = COMPONENT,
                binding = name.as_str(),
                err = %err,
                "failed to add binding"
            );
            return Err(err);
        }

        self.inner.binders.insert(name.clone(), binder);
        if let Some(mut status) = self.inner.statuses.get_mut(&name) {
            status.ready = true;
        }
        info!(
            event = events::BINDING_ADD_OK,
            component = COMPONENT,
            binding = name.as_str(),
            "binding added"
        );
        Ok(())
    }

    /// Stops and forgets one binding, including its metrics.
    pub async fn remove(&self, name: &str) -> Result<()> {
        self.remove_binder(name, true).await
    }

    async fn remove_binder(&self, name: &str, drop_metrics: bool) -> Result<()> {
        let Some((_, mut binder)) = self.inner.binders.remove(name) else {
            warn!(
                event = events::BINDING_REMOVE_FAILED,
                component = COMPONENT,
                binding = name,
                "binding not found"
            );
            return Err(BridgeError::NotFound(name.to_string()));
        };
        self.inner.statuses.remove(name);

        binder.stop().await?;
        if drop_metrics {
            self.inner.metrics.remove_binding(name);
        }
        info!(
            event = events::BINDING_REMOVE_OK,
            component = COMPONENT,
            binding = name,
            "binding removed"
        );
        Ok(())
    }

    /// Launches every binding in the background, each with its own retry and
    /// restart supervisor. Returns immediately.
    pub fn start(&self, configs: Vec<BindingConfig>) {
        for config in &configs {
            self.remember_order(&config.name);
        }
        for config in configs {
            let service = self.clone();
            self.inner.tasks.spawn(async move {
                service.supervise(config).await;
            });
        }
    }

    /// Cancels retry loops and supervisors, then removes every binding.
    pub async fn stop(&self) {
        info!(
            event = events::SERVICE_STOP,
            component = COMPONENT,
            bindings = self.inner.binders.len(),
            "stopping service"
        );
        self.inner.shutdown.cancel();
        self.inner.tasks.close();
        self.inner.tasks.wait().await;

        let names: Vec<String> = self
            .inner
            .binders
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        for name in names {
            let _ = self.remove_binder(&name, false).await;
        }
    }

    /// Every registered binding, in declaration order.
    pub fn get_status(&self) -> Vec<Status> {
        self.inner
            .order
            .read()
            .iter()
            .filter_map(|name| self.inner.statuses.get(name).map(|status| status.clone()))
            .collect()
    }

    pub fn is_ready(&self, name: &str) -> bool {
        self.inner
            .statuses
            .get(name)
            .is_some_and(|status| status.ready)
    }

    pub fn metrics(&self) -> Vec<MetricReport> {
        self.inner.metrics.report()
    }

    pub fn render_metrics(&self) -> String {
        self.inner.metrics.render_prometheus()
    }

    pub fn metrics_exporter(&self) -> &MetricsExporter {
        &self.inner.metrics
    }

    fn remember_order(&self, name: &str) {
        let mut order = self.inner.order.write();
        if !order.iter().any(|known| known == name) {
            order.push(name.to_string());
        }
    }

    async fn supervise(&self, config: BindingConfig) {
        loop {
            if !self.add_with_retry(&config).await {
                return;
            }
            let Some((fault, stopped)) = self.inner.binders.get(&config.name).map(|binder| {
                (binder.fault_signal(), binder.shutdown_signal())
            }) else {
                return;
            };

            tokio::select! {
                biased;
                _ = self.inner.shutdown.cancelled() => return,
                _ = stopped.cancelled() => return,
                _ = fault.cancelled() => {
                    warn!(
                        event = events::BINDING_FAULTED,
                        component = COMPONENT,
                        binding = config.name.as_str(),
                        "binding lost a subscription; restarting"
                    );
                    if let Err(BridgeError::NotFound(_)) =
                        self.remove_binder(&config.name, false).await
                    {
                        return;
                    }
                }
            }
        }
    }

    /// Returns `false` once retrying is pointless: service stopped or name taken.
    async fn add_with_retry(&self, config: &BindingConfig) -> bool {
        loop {
            if self.inner.shutdown.is_cancelled() {
                return false;
            }
            match self.add(config.clone()).await {
                Ok(()) => return true,
                Err(err @ BridgeError::AlreadyExists(_)) => {
                    error!(
                        event = events::BINDING_ADD_FAILED,
                        component = COMPONENT,
                        binding = config.name.as_str(),
                        err = %err,
                        "binding name already in use; not retrying"
                    );
                    return false;
                }
                Err(err) => {
                    warn!(
                        event = events::BINDING_ADD_RETRY_SCHEDULED,
                        component = COMPONENT,
                        binding = config.name.as_str(),
                        err = %err,
                        retry_in_ms = BINDING_RETRY_INTERVAL.as_millis() as u64,
                        "binding not started; retrying"
                    );
                    tokio::select! {
                        biased;
                        _ = self.inner.shutdown.cancelled() => return false,
                        _ = tokio::time::sleep(BINDING_RETRY_INTERVAL) => {}
                    }
                }
            }
        }
    }
}
