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

//! Per-request outcome logging.

use super::Middleware;
use crate::config::Properties;
use crate::error::Result;
use crate::message::{Reply, Request};
use crate::observability::{events, fields};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, Level};

const COMPONENT: &str = "logging";

/// Threshold for logging successful calls. Failures are always logged at `error`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn from_properties(properties: &Properties) -> Result<Self> {
        Ok(
            match properties.get_one_of(
                "log_level",
                "error",
                &["debug", "info", "warn", "error"],
            )? {
                "debug" => LogLevel::Debug,
                "info" => LogLevel::Info,
                "warn" => LogLevel::Warn,
                _ => LogLevel::Error,
            },
        )
    }
}

pub struct Logging {
    next: Arc<dyn Middleware>,
    level: LogLevel,
    binding: String,
    target: String,
}

impl Logging {
    pub fn new(next: Arc<dyn Middleware>, level: LogLevel, binding: &str, target: String) -> Self {
        Self {
            next,
            level,
            binding: binding.to_string(),
            target,
        }
    }

    fn logs_successes(&self) -> bool {
        match self.level {
            LogLevel::Debug => tracing::enabled!(Level::DEBUG),
            LogLevel::Info => tracing::enabled!(Level::INFO),
            LogLevel::Warn | LogLevel::Error => false,
        }
    }
}

#[async_trait]
impl Middleware for Logging {
    async fn call(&self, cancel: &CancellationToken, request: Request) -> Result<Option<Reply>> {
        let wants_success_log = self.logs_successes();
        let described = fields::format_request(&request);
        let result = self.next.call(cancel, request).await;

        match &result {
            Ok(reply) if wants_success_log => {
                let executed = reply.as_ref().map_or(true, |reply| reply.executed);
                if self.level == LogLevel::Debug {
                    debug!(
                        event = events::MIDDLEWARE_CALL_OK,
                        component = COMPONENT,
                        binding = self.binding.as_str(),
                        target = self.target.as_str(),
                        request = described.as_str(),
                        executed,
                        "request delivered"
                    );
                } else {
                    info!(
                        event = events::MIDDLEWARE_CALL_OK,
                        component = COMPONENT,
                        binding = self.binding.as_str(),
                        target = self.target.as_str(),
                        request = described.as_str(),
                        executed,
                        "request delivered"
                    );
                }
            }
            Ok(_) => {}
            Err(err) => {
                error!(
                    event = events::MIDDLEWARE_CALL_FAILED,
                    component = COMPONENT,
                    binding = self.binding.as_str(),
                    target = self.target.as_str(),
                    request = described.as_str(),
                    err = %err,
                    "request failed"
                );
            }
        }
        result
    }
}
