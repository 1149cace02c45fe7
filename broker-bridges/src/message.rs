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

//! Message shapes flowing from sources, through middleware, into targets.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::time::Duration;

pub type Tags = BTreeMap<String, String>;

/// Fire-and-forget event.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Event {
    pub id: String,
    pub channel: String,
    pub metadata: String,
    pub body: Bytes,
    pub tags: Tags,
}

/// Durable event delivered from a replayable store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventStoreMessage {
    pub id: String,
    pub channel: String,
    pub metadata: String,
    pub body: Bytes,
    pub tags: Tags,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
}

/// Command received by a subscriber, awaiting a response on `response_to`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandReceive {
    pub id: String,
    pub channel: String,
    pub metadata: String,
    pub body: Bytes,
    pub tags: Tags,
    pub response_to: String,
}

/// Query received by a subscriber, awaiting a response on `response_to`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QueryReceive {
    pub id: String,
    pub channel: String,
    pub metadata: String,
    pub body: Bytes,
    pub tags: Tags,
    pub response_to: String,
}

/// Outbound command sent by a broker target.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandRequest {
    pub id: String,
    pub channel: String,
    pub metadata: String,
    pub body: Bytes,
    pub tags: Tags,
    pub timeout: Duration,
}

/// Outbound query sent by a broker target.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryRequest {
    pub id: String,
    pub channel: String,
    pub metadata: String,
    pub body: Bytes,
    pub tags: Tags,
    pub timeout: Duration,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandResponse {
    pub request_id: String,
    pub response_to: String,
    pub executed: bool,
    pub executed_at: DateTime<Utc>,
    pub error: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryResponse {
    pub request_id: String,
    pub response_to: String,
    pub executed: bool,
    pub executed_at: DateTime<Utc>,
    pub error: Option<String>,
    pub metadata: String,
    pub body: Bytes,
    pub tags: Tags,
}

/// Delivery policy attached to a queue message by its producer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QueuePolicy {
    /// Receives allowed before the broker dead-letters the message. 0 means unlimited.
    pub max_receive_count: u32,
    /// Dead-letter queue used once `max_receive_count` is exhausted.
    pub max_receive_queue: Option<String>,
    pub expiration: Option<Duration>,
    pub delay: Option<Duration>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QueueMessage {
    pub id: String,
    pub channel: String,
    pub metadata: String,
    pub body: Bytes,
    pub tags: Tags,
    pub policy: QueuePolicy,
    /// How many times the broker has handed this message out, including this delivery.
    pub receive_count: u32,
}

impl QueueMessage {
    /// True once this delivery is the last one the policy allows.
    pub fn receive_limit_reached(&self) -> bool {
        self.policy.max_receive_count > 0 && self.receive_count >= self.policy.max_receive_count
    }
}

/// Inbound message handed from a source to the middleware chains.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Request {
    Event(Event),
    EventStore(EventStoreMessage),
    Command(CommandReceive),
    Query(QueryReceive),
    Queue(QueueMessage),
}

impl Request {
    /// Short variant name used in logs and errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Request::Event(_) => "event",
            Request::EventStore(_) => "event-store",
            Request::Command(_) => "command",
            Request::Query(_) => "query",
            Request::Queue(_) => "queue",
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Request::Event(message) => &message.id,
            Request::EventStore(message) => &message.id,
            Request::Command(message) => &message.id,
            Request::Query(message) => &message.id,
            Request::Queue(message) => &message.id,
        }
    }

    pub fn channel(&self) -> &str {
        match self {
            Request::Event(message) => &message.channel,
            Request::EventStore(message) => &message.channel,
            Request::Command(message) => &message.channel,
            Request::Query(message) => &message.channel,
            Request::Queue(message) => &message.channel,
        }
    }

    pub fn metadata(&self) -> &str {
        match self {
            Request::Event(message) => &message.metadata,
            Request::EventStore(message) => &message.metadata,
            Request::Command(message) => &message.metadata,
            Request::Query(message) => &message.metadata,
            Request::Queue(message) => &message.metadata,
        }
    }

    pub fn body(&self) -> &Bytes {
        match self {
            Request::Event(message) => &message.body,
            Request::EventStore(message) => &message.body,
            Request::Command(message) => &message.body,
            Request::Query(message) => &message.body,
            Request::Queue(message) => &message.body,
        }
    }

    pub fn tags(&self) -> &Tags {
        match self {
            Request::Event(message) => &message.tags,
            Request::EventStore(message) => &message.tags,
            Request::Command(message) => &message.tags,
            Request::Query(message) => &message.tags,
            Request::Queue(message) => &message.tags,
        }
    }
}

/// Target answer. RPC sources turn it into a broker response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reply {
    pub executed: bool,
    pub executed_at: DateTime<Utc>,
    pub error: Option<String>,
    pub metadata: String,
    pub body: Bytes,
    pub tags: Tags,
}

impl Reply {
    /// Successful reply stamped with the current time.
    pub fn executed() -> Self {
        Self {
            executed: true,
            executed_at: Utc::now(),
            error: None,
            metadata: String::new(),
            body: Bytes::new(),
            tags: Tags::new(),
        }
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_metadata(mut self, metadata: impl Into<String>) -> Self {
        self.metadata = metadata.into();
        self
    }

    pub fn at(mut self, executed_at: DateTime<Utc>) -> Self {
        self.executed_at = executed_at;
        self
    }
}

impl From<CommandResponse> for Reply {
    fn from(response: CommandResponse) -> Self {
        Self {
            executed: response.executed,
            executed_at: response.executed_at,
            error: response.error,
            metadata: String::new(),
            body: Bytes::new(),
            tags: Tags::new(),
        }
    }
}

impl From<QueryResponse> for Reply {
    fn from(response: QueryResponse) -> Self {
        Self {
            executed: response.executed,
            executed_at: response.executed_at,
            error: response.error,
            metadata: response.metadata,
            body: response.body,
            tags: response.tags,
        }
    }
}
