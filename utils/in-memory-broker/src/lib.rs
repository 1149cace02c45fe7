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

//! # in-memory-broker
//!
//! An in-process message broker implementing the `broker-bridges` broker
//! capability. It backs the test suites and the loopback deployment of
//! `configurable-bridges`.
//!
//! Supported paradigms:
//!
//! - events, with consumer groups splitting deliveries between members
//! - events store, a per-channel log replayable from any [`StartPosition`]
//! - commands and queries, answered through per-request reply slots
//! - queues, with destructive pulls and visibility-timeout leases
//!
//! Fault injection: [`InMemoryBroker::set_reachable`] refuses new connections
//! and [`InMemoryBroker::fail_subscriptions`] pushes an error to every live
//! subscriber of a channel.
//!
//! [`StartPosition`]: broker_bridges::broker::StartPosition

mod client;
mod queue;
mod topics;

pub use client::InMemoryClient;

use async_trait::async_trait;
use broker_bridges::broker::{BrokerClient, BrokerConnection, BrokerConnector};
use broker_bridges::error::{BridgeError, Result};
use broker_bridges::message::{
    CommandReceive, CommandResponse, Event, EventStoreMessage, QueryReceive, QueryResponse,
    QueueMessage,
};
use parking_lot::Mutex;
use queue::Queues;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Notify};
use tokio::time::Instant;
use topics::Topics;
use tracing::{debug, warn};

pub(crate) const COMPONENT: &str = "in_memory_broker";

/// Buffered items per subscription before the publisher waits.
pub(crate) const SUBSCRIPTION_BUFFER: usize = 1024;

pub(crate) struct State {
    pub(crate) reachable: bool,
    pub(crate) next_client: u64,
    pub(crate) open_clients: HashSet<u64>,
    pub(crate) events: Topics<Event>,
    pub(crate) events_store: Topics<EventStoreMessage>,
    pub(crate) store_log: HashMap<String, Vec<EventStoreMessage>>,
    pub(crate) commands: Topics<CommandReceive>,
    pub(crate) queries: Topics<QueryReceive>,
    pub(crate) pending_commands: HashMap<String, oneshot::Sender<CommandResponse>>,
    pub(crate) pending_queries: HashMap<String, oneshot::Sender<QueryResponse>>,
    pub(crate) queues: Queues,
}

impl Default for State {
    fn default() -> Self {
        Self {
            reachable: true,
            next_client: 0,
            open_clients: HashSet::new(),
            events: Topics::default(),
            events_store: Topics::default(),
            store_log: HashMap::new(),
            commands: Topics::default(),
            queries: Topics::default(),
            pending_commands: HashMap::new(),
            pending_queries: HashMap::new(),
            queues: Queues::default(),
        }
    }
}

#[derive(Default)]
pub(crate) struct Shared {
    pub(crate) state: Mutex<State>,
    queue_ready: Notify,
}

impl Shared {
    pub(crate) fn enqueue(&self, message: QueueMessage) {
        self.state.lock().queues.push_back(message);
        self.queue_ready.notify_waiters();
    }

    pub(crate) fn give_back(&self, message: QueueMessage) {
        self.state.lock().queues.give_back(message);
        self.queue_ready.notify_waiters();
    }

    /// Polls `take` until it yields or `wait` passes, waking on every enqueue.
    pub(crate) async fn wait_for<T>(
        &self,
        wait: Duration,
        mut take: impl FnMut(&mut Queues) -> Option<T> + Send,
    ) -> Option<T> {
        let deadline = Instant::now() + wait;
        loop {
            let notified = self.queue_ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let found = {
                let mut state = self.state.lock();
                take(&mut state.queues)
            };
            if found.is_some() {
                return found;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return None;
            }
        }
    }
}

/// Handle to one in-process broker. Clones share the same state.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    shared: Arc<Shared>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connector(&self) -> Arc<dyn BrokerConnector> {
        Arc::new(self.clone())
    }

    /// Opens a client directly, bypassing reachability.
    pub fn client(&self, client_id: &str) -> Arc<dyn BrokerClient> {
        Arc::new(self.open_client(client_id))
    }

    fn open_client(&self, client_id: &str) -> InMemoryClient {
        let id = {
            let mut state = self.shared.state.lock();
            state.next_client += 1;
            let id = state.next_client;
            state.open_clients.insert(id);
            id
        };
        debug!(
            component = COMPONENT,
            client_id, client = id, "client connected"
        );
        InMemoryClient::new(id, client_id, self.shared.clone())
    }

    /// While unreachable, [`BrokerConnector::connect`] fails with a connectivity error.
    pub fn set_reachable(&self, reachable: bool) {
        self.shared.state.lock().reachable = reachable;
    }

    /// Pushes a subscription error to, and detaches, every subscriber of `channel`.
    pub fn fail_subscriptions(&self, channel: &str, reason: &str) {
        let (events, events_store, commands, queries) = {
            let mut state = self.shared.state.lock();
            (
                state.events.detach(channel),
                state.events_store.detach(channel),
                state.commands.detach(channel),
                state.queries.detach(channel),
            )
        };
        let error = BridgeError::Subscription(reason.to_string());
        let failed = events.len() + events_store.len() + commands.len() + queries.len();
        for sink in events {
            let _ = sink.try_send(Err(error.clone()));
        }
        for sink in events_store {
            let _ = sink.try_send(Err(error.clone()));
        }
        for sink in commands {
            let _ = sink.try_send(Err(error.clone()));
        }
        for sink in queries {
            let _ = sink.try_send(Err(error.clone()));
        }
        warn!(
            component = COMPONENT,
            channel,
            subscribers = failed,
            reason,
            "injected subscription failure"
        );
    }

    pub fn open_connections(&self) -> usize {
        self.shared.state.lock().open_clients.len()
    }

    /// Live subscribers on `channel`, across every paradigm.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        let mut state = self.shared.state.lock();
        state.events.count(channel)
            + state.events_store.count(channel)
            + state.commands.count(channel)
            + state.queries.count(channel)
    }

    pub fn queue_len(&self, channel: &str) -> usize {
        self.shared.state.lock().queues.len(channel)
    }

    pub fn queue_messages(&self, channel: &str) -> Vec<QueueMessage> {
        self.shared.state.lock().queues.snapshot(channel)
    }

    /// Messages dead-lettered without a dead-letter queue to receive them.
    pub fn discarded_messages(&self) -> Vec<QueueMessage> {
        self.shared.state.lock().queues.discarded()
    }

    pub fn stored_events(&self, channel: &str) -> Vec<EventStoreMessage> {
        self.shared
            .state
            .lock()
            .store_log
            .get(channel)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl BrokerConnector for InMemoryBroker {
    async fn connect(&self, connection: &BrokerConnection) -> Result<Arc<dyn BrokerClient>> {
        if !self.shared.state.lock().reachable {
            return Err(BridgeError::Connectivity(format!(
                "broker at {} is unreachable",
                connection.address
            )));
        }
        Ok(Arc::new(self.open_client(&connection.client_id)))
    }
}
