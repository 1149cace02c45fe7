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

//! Source adapters: broker consumers that feed a binding's middleware chains.
//!
//! Every built-in source opens `sources` parallel broker connections and runs
//! one receive loop per connection inside a binding-scoped task group:
//!
//! - pub/sub and RPC sources spawn one task per received message
//! - queue sources process their receives serially within each loop

pub mod command;
pub mod dispatch;
pub mod events;
pub mod events_store;
pub mod query;
pub mod queue;
pub mod queue_stream;
pub(crate) mod runtime;

use crate::broker::{BrokerConnection, SubscribeRequest};
use crate::config::Properties;
use crate::error::{BridgeError, Result};
use crate::middleware::Middleware;
use crate::observability::{events as log_events, fields};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub use command::CommandSource;
pub use dispatch::{DispatchReport, Dispatcher, FanOut, Selection};
pub use events::EventsSource;
pub use events_store::EventsStoreSource;
pub use query::QuerySource;
pub use queue::QueueSource;
pub use queue_stream::{AckPolicy, QueueStreamSource};

pub const EVENTS: &str = "broker.events";
pub const EVENTS_STORE: &str = "broker.events-store";
pub const COMMAND: &str = "broker.command";
pub const QUERY: &str = "broker.query";
pub const QUEUE: &str = "broker.queue";
pub const QUEUE_STREAM: &str = "broker.queue-stream";

const COMPONENT: &str = "source";

/// Signals shared between a binding and its sources.
#[derive(Clone, Debug, Default)]
pub struct SourceContext {
    /// Governing context of the binding. Cancelled when the binding stops.
    pub shutdown: CancellationToken,
    /// Tripped by a source whose subscription is lost.
    pub fault: CancellationToken,
}

/// Consumes one inbound connection and hands each message to the targets.
#[async_trait]
pub trait Source: Send + Sync {
    /// Parses options and opens broker connections.
    async fn init(&mut self, connection: &Properties, shared: &Properties, binding: &str)
        -> Result<()>;

    /// Subscribes and launches the receive loops. Returns once they are running.
    async fn start(&mut self, ctx: SourceContext, targets: Vec<Arc<dyn Middleware>>)
        -> Result<()>;

    /// Cancels the loops, waits for in-flight dispatches and closes connections.
    async fn stop(&mut self) -> Result<()>;
}

/// Builds fresh, uninitialised sources of one kind.
pub trait SourceFactory: Send + Sync {
    fn create(&self) -> Box<dyn Source>;
}

impl<F> SourceFactory for F
where
    F: Fn() -> Box<dyn Source> + Send + Sync,
{
    fn create(&self) -> Box<dyn Source> {
        self()
    }
}

/// Connection, channel and parallelism options shared by every built-in source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelOptions {
    pub connection: BrokerConnection,
    pub channel: String,
    pub group: Option<String>,
    /// Parallel broker connections, each with its own receive loop.
    pub sources: usize,
}

impl ChannelOptions {
    pub fn from_properties(properties: &Properties) -> Result<Self> {
        Ok(Self {
            connection: BrokerConnection::from_properties(properties)?,
            channel: properties.require("channel")?.to_string(),
            group: properties.get("group").map(ToString::to_string),
            sources: properties.get_in_range("sources", 1, 1, 1024)?,
        })
    }

    /// Ensures parallel subscribers share a group so the broker splits deliveries.
    pub fn with_auto_group(mut self, binding: &str, kind: &str) -> Self {
        if self.sources > 1 && self.group.is_none() {
            let group = format!("{binding}-{}", uuid::Uuid::new_v4());
            info!(
                event = log_events::SOURCE_GROUP_GENERATED,
                component = COMPONENT,
                binding,
                source = kind,
                channel = self.channel.as_str(),
                group = group.as_str(),
                sources = self.sources,
                "generated consumer group for parallel subscribers"
            );
            self.group = Some(group);
        }
        self
    }

    pub fn subscribe_request(&self) -> SubscribeRequest {
        SubscribeRequest {
            channel: self.channel.clone(),
            group: self.group.clone(),
        }
    }
}

/// RPC sources answer from a single target; the rest are ignored.
pub(crate) fn first_target(
    binding: &str,
    kind: &str,
    targets: Vec<Arc<dyn Middleware>>,
) -> Result<Arc<dyn Middleware>> {
    let count = targets.len();
    let Some(first) = targets.into_iter().next() else {
        return Err(BridgeError::NothingToBind(binding.to_string()));
    };
    if count > 1 {
        warn!(
            event = log_events::SOURCE_EXTRA_TARGETS_IGNORED,
            component = COMPONENT,
            binding,
            source = kind,
            targets = count,
            "rpc source answers from the first target only"
        );
    }
    Ok(first)
}

pub(crate) fn not_initialised(kind: &str) -> BridgeError {
    BridgeError::config(format!("{kind} source started before init"))
}

pub(crate) fn group_label(options: &ChannelOptions) -> String {
    fields::format_optional(options.group.as_deref())
}
