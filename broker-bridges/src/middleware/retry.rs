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

//! Bounded re-invocation of the inner layers on failure.

use super::Middleware;
use crate::config::Properties;
use crate::error::{BridgeError, Result};
use crate::message::{Reply, Request};
use crate::observability::events;
use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const COMPONENT: &str = "retry";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DelayType {
    /// Same delay before every retry.
    Fixed,
    /// Delay doubles after every retry.
    BackOff,
    /// Delay plus uniform jitter in `[0, max_jitter]`.
    Random,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryOptions {
    /// Total invocations, including the first one.
    pub attempts: u32,
    pub delay: Duration,
    pub max_jitter: Duration,
    pub delay_type: DelayType,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            attempts: 1,
            delay: Duration::from_millis(100),
            max_jitter: Duration::from_millis(100),
            delay_type: DelayType::Fixed,
        }
    }
}

impl RetryOptions {
    pub fn from_properties(properties: &Properties) -> Result<Self> {
        let delay_type = match properties.get_one_of(
            "retry_delay_type",
            "fixed",
            &["fixed", "back-off", "random"],
        )? {
            "back-off" => DelayType::BackOff,
            "random" => DelayType::Random,
            _ => DelayType::Fixed,
        };

        Ok(Self {
            attempts: properties.get_in_range("retry_attempts", 1, 1, 1_000_000)?,
            delay: Duration::from_millis(properties.get_in_range(
                "retry_delay_milliseconds",
                100,
                0,
                3_600_000,
            )?),
            max_jitter: Duration::from_millis(properties.get_in_range(
                "retry_max_jitter_milliseconds",
                100,
                0,
                3_600_000,
            )?),
            delay_type,
        })
    }

    /// Delay before retry number `retry` (0 for the first retry).
    pub fn delay_for(&self, retry: u32) -> Duration {
        match self.delay_type {
            DelayType::Fixed => self.delay,
            DelayType::BackOff => self.delay.saturating_mul(2u32.saturating_pow(retry)),
            DelayType::Random => {
                let jitter_ms = u64::try_from(self.max_jitter.as_millis()).unwrap_or(u64::MAX);
                let jitter = if jitter_ms == 0 {
                    Duration::ZERO
                } else {
                    Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
                };
                self.delay.saturating_add(jitter)
            }
        }
    }
}

/// Re-invokes the inner layers until success or `attempts` invocations.
pub struct Retry {
    next: Arc<dyn Middleware>,
    options: RetryOptions,
    binding: String,
    target: String,
}

impl Retry {
    pub fn new(
        next: Arc<dyn Middleware>,
        options: RetryOptions,
        binding: &str,
        target: String,
    ) -> Self {
        Self {
            next,
            options,
            binding: binding.to_string(),
            target,
        }
    }
}

#[async_trait]
impl Middleware for Retry {
    async fn call(&self, cancel: &CancellationToken, request: Request) -> Result<Option<Reply>> {
        let attempts = self.options.attempts.max(1);
        let mut attempt = 1;
        loop {
            let err = match self.next.call(cancel, request.clone()).await {
                Ok(reply) => return Ok(reply),
                Err(err) => err,
            };
            if attempt >= attempts
                || cancel.is_cancelled()
                || matches!(err, BridgeError::UnsupportedRequest { .. })
            {
                return Err(err);
            }

            let delay = self.options.delay_for(attempt - 1);
            debug!(
                event = events::RETRY_ATTEMPT_FAILED,
                component = COMPONENT,
                binding = self.binding.as_str(),
                target = self.target.as_str(),
                msg_id = request.id(),
                attempt,
                attempts,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                err = %err,
                "attempt failed; retrying"
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(err),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}
