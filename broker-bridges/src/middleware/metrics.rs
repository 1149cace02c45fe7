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

//! Outcome and latency recording for one chain.

use super::Middleware;
use crate::error::Result;
use crate::message::{Reply, Request};
use crate::metrics::MetricsRecorder;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub struct Metrics {
    next: Arc<dyn Middleware>,
    recorder: MetricsRecorder,
}

impl Metrics {
    pub fn new(next: Arc<dyn Middleware>, recorder: MetricsRecorder) -> Self {
        Self { next, recorder }
    }
}

#[async_trait]
impl Middleware for Metrics {
    async fn call(&self, cancel: &CancellationToken, request: Request) -> Result<Option<Reply>> {
        let request_bytes = request.body().len();
        let started = Instant::now();
        let result = self.next.call(cancel, request).await;
        self.recorder
            .record(started.elapsed(), request_bytes, result.is_ok());
        result
    }
}
