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

use crate::queue::InMemoryLease;
use crate::topics::{Sink, Subscriber};
use crate::{Shared, COMPONENT, SUBSCRIPTION_BUFFER};
use async_trait::async_trait;
use broker_bridges::broker::{
    BrokerClient, QueueLease, QueueLeaseRequest, QueuePullRequest, StartPosition,
    SubscribeRequest, Subscription,
};
use broker_bridges::error::{BridgeError, Result};
use broker_bridges::message::{
    CommandReceive, CommandRequest, CommandResponse, Event, EventStoreMessage, QueryReceive,
    QueryRequest, QueryResponse, QueueMessage,
};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// One connection to an [`InMemoryBroker`](crate::InMemoryBroker).
pub struct InMemoryClient {
    id: u64,
    client_id: String,
    shared: Arc<Shared>,
    closed: AtomicBool,
}

impl InMemoryClient {
    pub(crate) fn new(id: u64, client_id: &str, shared: Arc<Shared>) -> Self {
        Self {
            id,
            client_id: client_id.to_string(),
            shared,
            closed: AtomicBool::new(false),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BridgeError::Connectivity(format!(
                "client {} is closed",
                self.client_id
            )));
        }
        Ok(())
    }

    fn subscriber<T>(&self, request: &SubscribeRequest, sink: Sink<T>) -> Subscriber<T> {
        Subscriber {
            client: self.id,
            group: request.group.clone(),
            sink,
        }
    }
}

async fn deliver<T: Clone>(sinks: Vec<Sink<T>>, message: T) {
    for sink in sinks {
        let _ = sink.send(Ok(message.clone())).await;
    }
}

fn inbox() -> String {
    format!("_INBOX.{}", uuid::Uuid::new_v4())
}

fn no_responder(paradigm: &str, channel: &str) -> BridgeError {
    BridgeError::dispatch(format!("no {paradigm} subscribers on channel {channel}"))
}

#[async_trait]
impl BrokerClient for InMemoryClient {
    async fn send_event(&self, event: Event) -> Result<()> {
        self.ensure_open()?;
        let sinks = self.shared.state.lock().events.fan_out(&event.channel);
        deliver(sinks, event).await;
        Ok(())
    }

    async fn send_event_store(&self, event: Event) -> Result<()> {
        self.ensure_open()?;
        let (sinks, stored) = {
            let mut state = self.shared.state.lock();
            let log = state.store_log.entry(event.channel.clone()).or_default();
            let stored = EventStoreMessage {
                id: event.id,
                channel: event.channel,
                metadata: event.metadata,
                body: event.body,
                tags: event.tags,
                sequence: log.len() as u64 + 1,
                timestamp: Utc::now(),
            };
            log.push(stored.clone());
            (state.events_store.fan_out(&stored.channel), stored)
        };
        deliver(sinks, stored).await;
        Ok(())
    }

    async fn send_command(&self, request: CommandRequest) -> Result<CommandResponse> {
        self.ensure_open()?;
        let response_to = inbox();
        let (reply, answer) = oneshot::channel();
        let sink = {
            let mut state = self.shared.state.lock();
            let Some(sink) = state.commands.pick_one(&request.channel) else {
                return Err(no_responder("command", &request.channel));
            };
            state.pending_commands.insert(response_to.clone(), reply);
            sink
        };

        let channel = request.channel.clone();
        let timeout = request.timeout;
        let delivered = sink
            .send(Ok(CommandReceive {
                id: request.id,
                channel: request.channel,
                metadata: request.metadata,
                body: request.body,
                tags: request.tags,
                response_to: response_to.clone(),
            }))
            .await;
        if delivered.is_err() {
            self.shared.state.lock().pending_commands.remove(&response_to);
            return Err(no_responder("command", &channel));
        }

        match tokio::time::timeout(timeout, answer).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(BridgeError::dispatch(format!(
                "command responder on channel {channel} went away"
            ))),
            Err(_) => {
                self.shared.state.lock().pending_commands.remove(&response_to);
                Err(BridgeError::Timeout(format!(
                    "command on channel {channel} not answered within {timeout:?}"
                )))
            }
        }
    }

    async fn send_query(&self, request: QueryRequest) -> Result<QueryResponse> {
        self.ensure_open()?;
        let response_to = inbox();
        let (reply, answer) = oneshot::channel();
        let sink = {
            let mut state = self.shared.state.lock();
            let Some(sink) = state.queries.pick_one(&request.channel) else {
                return Err(no_responder("query", &request.channel));
            };
            state.pending_queries.insert(response_to.clone(), reply);
            sink
        };

        let channel = request.channel.clone();
        let timeout = request.timeout;
        let delivered = sink
            .send(Ok(QueryReceive {
                id: request.id,
                channel: request.channel,
                metadata: request.metadata,
                body: request.body,
                tags: request.tags,
                response_to: response_to.clone(),
            }))
            .await;
        if delivered.is_err() {
            self.shared.state.lock().pending_queries.remove(&response_to);
            return Err(no_responder("query", &channel));
        }

        match tokio::time::timeout(timeout, answer).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(BridgeError::dispatch(format!(
                "query responder on channel {channel} went away"
            ))),
            Err(_) => {
                self.shared.state.lock().pending_queries.remove(&response_to);
                Err(BridgeError::Timeout(format!(
                    "query on channel {channel} not answered within {timeout:?}"
                )))
            }
        }
    }

    async fn send_queue_message(&self, message: QueueMessage) -> Result<()> {
        self.ensure_open()?;
        match message.policy.delay {
            Some(delay) => {
                let shared = self.shared.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    shared.enqueue(message);
                });
            }
            None => self.shared.enqueue(message),
        }
        Ok(())
    }

    async fn subscribe_events(&self, request: SubscribeRequest) -> Result<Subscription<Event>> {
        self.ensure_open()?;
        let (sink, subscription) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let subscriber = self.subscriber(&request, sink);
        self.shared
            .state
            .lock()
            .events
            .add(&request.channel, subscriber);
        Ok(subscription)
    }

    async fn subscribe_events_store(
        &self,
        request: SubscribeRequest,
        start: StartPosition,
    ) -> Result<Subscription<EventStoreMessage>> {
        self.ensure_open()?;
        let mut state = self.shared.state.lock();
        let log = state
            .store_log
            .get(&request.channel)
            .map(Vec::as_slice)
            .unwrap_or_default();
        let replay: Vec<EventStoreMessage> = match start {
            StartPosition::NewOnly => Vec::new(),
            StartPosition::First => log.to_vec(),
            StartPosition::Last => log.last().cloned().into_iter().collect(),
            StartPosition::Sequence(sequence) => log
                .iter()
                .filter(|stored| stored.sequence >= sequence)
                .cloned()
                .collect(),
            StartPosition::TimeDelta(delta) => {
                let since = chrono::Duration::from_std(delta)
                    .map(|delta| Utc::now() - delta)
                    .map_err(|err| BridgeError::config(format!("invalid time delta: {err}")))?;
                log.iter()
                    .filter(|stored| stored.timestamp >= since)
                    .cloned()
                    .collect()
            }
        };

        let (sink, subscription) = mpsc::channel(SUBSCRIPTION_BUFFER + replay.len());
        for stored in replay {
            let _ = sink.try_send(Ok(stored));
        }
        let subscriber = self.subscriber(&request, sink);
        state.events_store.add(&request.channel, subscriber);
        Ok(subscription)
    }

    async fn subscribe_commands(
        &self,
        request: SubscribeRequest,
    ) -> Result<Subscription<CommandReceive>> {
        self.ensure_open()?;
        let (sink, subscription) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let subscriber = self.subscriber(&request, sink);
        self.shared
            .state
            .lock()
            .commands
            .add(&request.channel, subscriber);
        Ok(subscription)
    }

    async fn subscribe_queries(
        &self,
        request: SubscribeRequest,
    ) -> Result<Subscription<QueryReceive>> {
        self.ensure_open()?;
        let (sink, subscription) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let subscriber = self.subscriber(&request, sink);
        self.shared
            .state
            .lock()
            .queries
            .add(&request.channel, subscriber);
        Ok(subscription)
    }

    async fn send_command_response(&self, response: CommandResponse) -> Result<()> {
        self.ensure_open()?;
        let pending = self
            .shared
            .state
            .lock()
            .pending_commands
            .remove(&response.response_to);
        match pending {
            Some(reply) => {
                let _ = reply.send(response);
                Ok(())
            }
            None => Err(BridgeError::dispatch(format!(
                "no pending command for reply address {}",
                response.response_to
            ))),
        }
    }

    async fn send_query_response(&self, response: QueryResponse) -> Result<()> {
        self.ensure_open()?;
        let pending = self
            .shared
            .state
            .lock()
            .pending_queries
            .remove(&response.response_to);
        match pending {
            Some(reply) => {
                let _ = reply.send(response);
                Ok(())
            }
            None => Err(BridgeError::dispatch(format!(
                "no pending query for reply address {}",
                response.response_to
            ))),
        }
    }

    async fn receive_queue_messages(&self, request: QueuePullRequest) -> Result<Vec<QueueMessage>> {
        self.ensure_open()?;
        let max = request.max_messages.max(1) as usize;
        let channel = request.channel.as_str();
        let batch = self
            .shared
            .wait_for(request.wait_timeout, |queues| {
                let batch = queues.take(channel, max);
                (!batch.is_empty()).then_some(batch)
            })
            .await;
        Ok(batch.unwrap_or_default())
    }

    async fn lease_queue_message(
        &self,
        request: QueueLeaseRequest,
    ) -> Result<Option<Box<dyn QueueLease>>> {
        self.ensure_open()?;
        let channel = request.channel.as_str();
        let message = self
            .shared
            .wait_for(request.wait_timeout, |queues| queues.take_one(channel))
            .await;
        Ok(message.map(|message| {
            Box::new(InMemoryLease::start(
                self.shared.clone(),
                message,
                request.visibility_timeout,
            )) as Box<dyn QueueLease>
        }))
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut state = self.shared.state.lock();
        state.open_clients.remove(&self.id);
        state.events.drop_client(self.id);
        state.events_store.drop_client(self.id);
        state.commands.drop_client(self.id);
        state.queries.drop_client(self.id);
        debug!(
            component = COMPONENT,
            client_id = self.client_id.as_str(),
            client = self.id,
            "client closed"
        );
        Ok(())
    }
}
