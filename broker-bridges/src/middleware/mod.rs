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

//! Decorator stack wrapped around every target of a binding.
//!
//! Configured layers are RateLimiter, Retry, Metrics and Logging. The rate
//! limiter paces every attempt, retries included, while Metrics and Logging
//! observe one outcome per request, the one left after retries. The composed
//! call path is therefore:
//!
//! ```text
//! Logging -> Metrics -> Retry -> RateLimiter -> target
//! ```

pub mod logging;
pub mod metrics;
pub mod rate_limiter;
pub mod retry;

use crate::config::Properties;
use crate::error::{BridgeError, Result};
use crate::message::{Reply, Request};
use crate::metrics::{MetricKey, MetricsExporter};
use crate::target::Target;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub use logging::{LogLevel, Logging};
pub use metrics::Metrics;
pub use rate_limiter::{Pacer, RateLimiter};
pub use retry::{DelayType, Retry, RetryOptions};

/// One link of a dispatch chain.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn call(&self, cancel: &CancellationToken, request: Request) -> Result<Option<Reply>>;
}

/// Middleware settings read from a binding's shared properties.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MiddlewareOptions {
    pub rate_per_second: u32,
    pub retry: RetryOptions,
    pub log_level: LogLevel,
}

impl Default for MiddlewareOptions {
    fn default() -> Self {
        Self {
            rate_per_second: 0,
            retry: RetryOptions::default(),
            log_level: LogLevel::Error,
        }
    }
}

impl MiddlewareOptions {
    pub fn from_properties(properties: &Properties) -> Result<Self> {
        Ok(Self {
            rate_per_second: properties.get_in_range("rate_per_second", 0, 0, 1_000_000)?,
            retry: RetryOptions::from_properties(properties)?,
            log_level: LogLevel::from_properties(properties)?,
        })
    }
}

/// Names the binding and component kinds a chain serves; used for logs and metrics.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainLabels {
    pub binding: String,
    pub source_kind: String,
    pub target_kind: String,
    pub index: usize,
}

impl ChainLabels {
    pub fn new(binding: &str, source_kind: &str, target_kind: &str, index: usize) -> Self {
        Self {
            binding: binding.to_string(),
            source_kind: source_kind.to_string(),
            target_kind: target_kind.to_string(),
            index,
        }
    }

    /// `kind#index`, unique within one binding.
    pub fn target_label(&self) -> String {
        format!("{}#{}", self.target_kind, self.index)
    }
}

struct Terminal {
    target: Arc<dyn Target>,
    target_kind: String,
}

#[async_trait]
impl Middleware for Terminal {
    async fn call(&self, cancel: &CancellationToken, request: Request) -> Result<Option<Reply>> {
        if !self.target.supports(&request) {
            return Err(BridgeError::UnsupportedRequest {
                kind: request.kind(),
                target: self.target_kind.clone(),
            });
        }
        self.target.call(cancel, request).await
    }
}

/// A target wrapped in its configured middleware layers.
#[derive(Clone)]
pub struct MiddlewareChain {
    head: Arc<dyn Middleware>,
    target: Arc<dyn Target>,
    labels: ChainLabels,
}

impl MiddlewareChain {
    /// Wraps `target` in the configured layers. Only Retry re-enters the target.
    pub fn build(
        labels: ChainLabels,
        target: Arc<dyn Target>,
        options: &MiddlewareOptions,
        metrics: Option<&MetricsExporter>,
    ) -> Self {
        let terminal: Arc<dyn Middleware> = Arc::new(Terminal {
            target: target.clone(),
            target_kind: labels.target_kind.clone(),
        });
        let paced: Arc<dyn Middleware> =
            Arc::new(RateLimiter::new(terminal, options.rate_per_second));
        let retried: Arc<dyn Middleware> = Arc::new(Retry::new(
            paced,
            options.retry.clone(),
            &labels.binding,
            labels.target_label(),
        ));
        let measured: Arc<dyn Middleware> = match metrics {
            Some(exporter) => Arc::new(Metrics::new(
                retried,
                exporter.recorder(MetricKey::new(
                    &labels.binding,
                    &labels.source_kind,
                    &labels.target_kind,
                )),
            )),
            None => retried,
        };
        let head: Arc<dyn Middleware> = Arc::new(Logging::new(
            measured,
            options.log_level,
            &labels.binding,
            labels.target_label(),
        ));

        Self {
            head,
            target,
            labels,
        }
    }

    pub fn labels(&self) -> &ChainLabels {
        &self.labels
    }

    /// Stops the wrapped target.
    pub async fn stop(&self) -> Result<()> {
        self.target.stop().await
    }
}

#[async_trait]
impl Middleware for MiddlewareChain {
    async fn call(&self, cancel: &CancellationToken, request: Request) -> Result<Option<Reply>> {
        self.head.call(cancel, request).await
    }
}
