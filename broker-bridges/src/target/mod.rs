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

//! Target capability: the terminal sink of every middleware chain.

pub mod broker;

use crate::config::Properties;
use crate::error::Result;
use crate::message::{Reply, Request};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

pub use broker::BrokerTarget;

pub const EVENTS: &str = "broker.events";
pub const EVENTS_STORE: &str = "broker.events-store";
pub const COMMAND: &str = "broker.command";
pub const QUERY: &str = "broker.query";
pub const QUEUE: &str = "broker.queue";

/// Delivers requests to one external sink.
#[async_trait]
pub trait Target: Send + Sync {
    /// Parses `connection` and opens whatever the sink needs.
    async fn init(&mut self, connection: &Properties, binding: &str) -> Result<()>;

    /// Whether `request` can be translated into this sink's outbound shape.
    /// The chain answers [`BridgeError::UnsupportedRequest`] for anything else
    /// without calling the target. Broker targets accept every variant.
    ///
    /// [`BridgeError::UnsupportedRequest`]: crate::BridgeError::UnsupportedRequest
    fn supports(&self, _request: &Request) -> bool {
        true
    }

    /// Delivers one request. `Ok(None)` means delivered with nothing to answer.
    async fn call(&self, cancel: &CancellationToken, request: Request) -> Result<Option<Reply>>;

    async fn stop(&self) -> Result<()>;
}

/// Builds fresh, uninitialised targets of one kind.
pub trait TargetFactory: Send + Sync {
    fn create(&self) -> Box<dyn Target>;
}

impl<F> TargetFactory for F
where
    F: Fn() -> Box<dyn Target> + Send + Sync,
{
    fn create(&self) -> Box<dyn Target> {
        self()
    }
}
