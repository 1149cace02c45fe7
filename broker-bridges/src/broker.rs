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

//! Broker capability consumed by the built-in sources and broker targets.
//!
//! Concrete transports implement [`BrokerConnector`] and [`BrokerClient`]; the
//! bridge never depends on a specific wire protocol.

use crate::config::Properties;
use crate::error::{BridgeError, Result};
use crate::message::{
    CommandReceive, CommandRequest, CommandResponse, Event, EventStoreMessage, QueryReceive,
    QueryRequest, QueryResponse, QueueMessage,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Live subscription. An `Err` item is an asynchronous error pushed by the broker.
pub type Subscription<T> = mpsc::Receiver<Result<T>>;

/// Address and identity of one broker connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BrokerConnection {
    pub address: String,
    pub client_id: String,
    pub auth_token: Option<String>,
}

impl BrokerConnection {
    /// Parses `address` (required), `client_id` and `auth_token`.
    pub fn from_properties(properties: &Properties) -> Result<Self> {
        let address = properties.require("address")?.to_string();
        let client_id = properties
            .get("client_id")
            .map(ToString::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let auth_token = properties.get("auth_token").map(ToString::to_string);

        Ok(Self {
            address,
            client_id,
            auth_token,
        })
    }

    /// Identity for the `index`-th parallel connection of one source.
    pub fn for_replica(&self, index: usize, replicas: usize) -> Self {
        if replicas <= 1 {
            return self.clone();
        }
        Self {
            client_id: format!("{}-{index}", self.client_id),
            ..self.clone()
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubscribeRequest {
    pub channel: String,
    /// Consumer group; the broker load-balances deliveries across its members.
    pub group: Option<String>,
}

/// Where a durable-event subscription starts reading.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StartPosition {
    NewOnly,
    First,
    Last,
    Sequence(u64),
    TimeDelta(Duration),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueuePullRequest {
    pub channel: String,
    pub max_messages: u32,
    pub wait_timeout: Duration,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueLeaseRequest {
    pub channel: String,
    pub visibility_timeout: Duration,
    pub wait_timeout: Duration,
}

/// One queue message held under a visibility timeout.
#[async_trait]
pub trait QueueLease: Send + Sync {
    fn message(&self) -> &QueueMessage;

    /// Removes the message from the queue.
    async fn ack(self: Box<Self>) -> Result<()>;

    /// Returns the message for redelivery.
    async fn reject(self: Box<Self>) -> Result<()>;
}

/// Opens broker connections.
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    async fn connect(&self, connection: &BrokerConnection) -> Result<Arc<dyn BrokerClient>>;
}

/// One broker connection, covering every message paradigm.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    async fn send_event(&self, event: Event) -> Result<()>;

    async fn send_event_store(&self, event: Event) -> Result<()>;

    async fn send_command(&self, request: CommandRequest) -> Result<CommandResponse>;

    async fn send_query(&self, request: QueryRequest) -> Result<QueryResponse>;

    async fn send_queue_message(&self, message: QueueMessage) -> Result<()>;

    async fn subscribe_events(&self, request: SubscribeRequest) -> Result<Subscription<Event>>;

    async fn subscribe_events_store(
        &self,
        request: SubscribeRequest,
        start: StartPosition,
    ) -> Result<Subscription<EventStoreMessage>>;

    async fn subscribe_commands(
        &self,
        request: SubscribeRequest,
    ) -> Result<Subscription<CommandReceive>>;

    async fn subscribe_queries(&self, request: SubscribeRequest)
        -> Result<Subscription<QueryReceive>>;

    async fn send_command_response(&self, response: CommandResponse) -> Result<()>;

    async fn send_query_response(&self, response: QueryResponse) -> Result<()>;

    /// Pulls up to `max_messages`, waiting at most `wait_timeout` for the first one.
    async fn receive_queue_messages(&self, request: QueuePullRequest) -> Result<Vec<QueueMessage>>;

    /// Leases one message, or returns `None` when `wait_timeout` passes with the queue empty.
    async fn lease_queue_message(
        &self,
        request: QueueLeaseRequest,
    ) -> Result<Option<Box<dyn QueueLease>>>;

    async fn close(&self) -> Result<()>;
}

/// Opens `replicas` connections, closing the ones already open if any attempt fails.
pub(crate) async fn connect_replicas(
    connector: &dyn BrokerConnector,
    connection: &BrokerConnection,
    replicas: usize,
) -> Result<Vec<Arc<dyn BrokerClient>>> {
    let mut clients: Vec<Arc<dyn BrokerClient>> = Vec::with_capacity(replicas);
    for index in 0..replicas {
        match connector
            .connect(&connection.for_replica(index, replicas))
            .await
        {
            Ok(client) => clients.push(client),
            Err(err) => {
                for client in clients {
                    let _ = client.close().await;
                }
                return Err(match err {
                    BridgeError::Connectivity(_) => err,
                    other => BridgeError::Connectivity(format!(
                        "unable to connect to {}: {other}",
                        connection.address
                    )),
                });
            }
        }
    }
    Ok(clients)
}
