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

//! Request pacing for the head of a middleware chain.

use super::Middleware;
use crate::error::{BridgeError, Result};
use crate::message::{Reply, Request};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

/// Evenly spaced slot scheduler with a burst of one.
///
/// Each caller reserves the next free slot and then waits for it, so callers
/// are admitted in reservation order at most once per interval.
#[derive(Debug)]
pub struct Pacer {
    interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl Pacer {
    /// Returns `None` for a rate of 0, which means unlimited.
    pub fn new(rate_per_second: u32) -> Option<Self> {
        if rate_per_second == 0 {
            return None;
        }
        Some(Self {
            interval: Duration::from_secs(1) / rate_per_second,
            next_slot: Mutex::new(None),
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    fn reserve(&self) -> Instant {
        let now = Instant::now();
        let mut next_slot = self.next_slot.lock();
        let slot = match *next_slot {
            Some(reserved) if reserved > now => reserved,
            _ => now,
        };
        *next_slot = Some(slot + self.interval);
        slot
    }

    /// Waits for the caller's slot. Returns `Cancelled` if `cancel` fires first.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<()> {
        let slot = self.reserve();
        if slot <= Instant::now() {
            return Ok(());
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(BridgeError::Cancelled),
            _ = sleep_until(slot) => Ok(()),
        }
    }
}

/// Delays calls so that at most `rate_per_second` reach the inner layers.
pub struct RateLimiter {
    next: Arc<dyn Middleware>,
    pacer: Option<Pacer>,
}

impl RateLimiter {
    pub fn new(next: Arc<dyn Middleware>, rate_per_second: u32) -> Self {
        Self {
            next,
            pacer: Pacer::new(rate_per_second),
        }
    }
}

#[async_trait]
impl Middleware for RateLimiter {
    async fn call(&self, cancel: &CancellationToken, request: Request) -> Result<Option<Reply>> {
        if let Some(pacer) = &self.pacer {
            pacer.acquire(cancel).await?;
        }
        self.next.call(cancel, request).await
    }
}
