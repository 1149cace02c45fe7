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

//! Queue storage with expiry, receive counting and dead-lettering.

use crate::{Shared, COMPONENT};
use async_trait::async_trait;
use broker_bridges::broker::QueueLease;
use broker_bridges::error::{BridgeError, Result};
use broker_bridges::message::{QueueMessage, QueuePolicy};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

struct Stored {
    message: QueueMessage,
    expires_at: Option<Instant>,
}

#[derive(Default)]
pub(crate) struct Queues {
    channels: HashMap<String, VecDeque<Stored>>,
    discarded: Vec<QueueMessage>,
}

impl Queues {
    pub(crate) fn push_back(&mut self, message: QueueMessage) {
        let expires_at = message
            .policy
            .expiration
            .map(|expiration| Instant::now() + expiration);
        self.channels
            .entry(message.channel.clone())
            .or_default()
            .push_back(Stored {
                message,
                expires_at,
            });
    }

    fn pop_live(&mut self, channel: &str) -> Option<QueueMessage> {
        let queue = self.channels.get_mut(channel)?;
        let now = Instant::now();
        while let Some(stored) = queue.pop_front() {
            if stored.expires_at.is_some_and(|at| at <= now) {
                debug!(
                    component = COMPONENT,
                    channel,
                    message_id = stored.message.id.as_str(),
                    "queue message expired"
                );
                continue;
            }
            return Some(stored.message);
        }
        None
    }

    /// Removes up to `max` messages for a destructive pull.
    pub(crate) fn take(&mut self, channel: &str, max: usize) -> Vec<QueueMessage> {
        let mut batch = Vec::new();
        while batch.len() < max {
            let Some(mut message) = self.pop_live(channel) else {
                break;
            };
            message.receive_count += 1;
            batch.push(message);
        }
        batch
    }

    /// Hands out the next message for a lease.
    pub(crate) fn take_one(&mut self, channel: &str) -> Option<QueueMessage> {
        let mut message = self.pop_live(channel)?;
        message.receive_count += 1;
        Some(message)
    }

    /// Returns a leased message to the head of its queue, or dead-letters it
    /// once its receive limit is reached.
    pub(crate) fn give_back(&mut self, message: QueueMessage) {
        if message.receive_limit_reached() {
            self.dead_letter(message);
            return;
        }
        self.channels
            .entry(message.channel.clone())
            .or_default()
            .push_front(Stored {
                message,
                expires_at: None,
            });
    }

    fn dead_letter(&mut self, message: QueueMessage) {
        match message.policy.max_receive_queue.clone() {
            Some(queue) => {
                debug!(
                    component = COMPONENT,
                    channel = message.channel.as_str(),
                    dead_letter_queue = queue.as_str(),
                    message_id = message.id.as_str(),
                    "queue message moved to dead-letter queue"
                );
                self.push_back(QueueMessage {
                    channel: queue,
                    policy: QueuePolicy::default(),
                    receive_count: 0,
                    ..message
                });
            }
            None => self.discarded.push(message),
        }
    }

    pub(crate) fn len(&self, channel: &str) -> usize {
        self.channels.get(channel).map_or(0, VecDeque::len)
    }

    pub(crate) fn snapshot(&self, channel: &str) -> Vec<QueueMessage> {
        self.channels
            .get(channel)
            .map(|queue| queue.iter().map(|stored| stored.message.clone()).collect())
            .unwrap_or_default()
    }

    pub(crate) fn discarded(&self) -> Vec<QueueMessage> {
        self.discarded.clone()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LeaseState {
    Held,
    Settled,
    Expired,
}

/// A message held invisible until it is settled or its visibility timer fires.
pub(crate) struct InMemoryLease {
    shared: Arc<Shared>,
    message: QueueMessage,
    state: Arc<Mutex<LeaseState>>,
    timer: JoinHandle<()>,
}

impl InMemoryLease {
    pub(crate) fn start(shared: Arc<Shared>, message: QueueMessage, visibility: Duration) -> Self {
        let state = Arc::new(Mutex::new(LeaseState::Held));
        let timer = {
            let shared = shared.clone();
            let state = state.clone();
            let message = message.clone();
            tokio::spawn(async move {
                tokio::time::sleep(visibility).await;
                let expired = {
                    let mut state = state.lock();
                    if *state == LeaseState::Held {
                        *state = LeaseState::Expired;
                        true
                    } else {
                        false
                    }
                };
                if expired {
                    debug!(
                        component = COMPONENT,
                        channel = message.channel.as_str(),
                        message_id = message.id.as_str(),
                        receive_count = message.receive_count,
                        "visibility timeout expired"
                    );
                    shared.give_back(message);
                }
            })
        };
        Self {
            shared,
            message,
            state,
            timer,
        }
    }

    fn settle(&self) -> Result<()> {
        let mut state = self.state.lock();
        match *state {
            LeaseState::Held => {
                *state = LeaseState::Settled;
                self.timer.abort();
                Ok(())
            }
            LeaseState::Settled => Err(BridgeError::dispatch(format!(
                "message {} already settled",
                self.message.id
            ))),
            LeaseState::Expired => Err(BridgeError::dispatch(format!(
                "visibility timeout expired for message {}",
                self.message.id
            ))),
        }
    }
}

#[async_trait]
impl QueueLease for InMemoryLease {
    fn message(&self) -> &QueueMessage {
        &self.message
    }

    async fn ack(self: Box<Self>) -> Result<()> {
        self.settle()
    }

    async fn reject(self: Box<Self>) -> Result<()> {
        self.settle()?;
        self.shared.give_back(self.message.clone());
        Ok(())
    }
}
