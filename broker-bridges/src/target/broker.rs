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

//! Targets that forward requests into a broker through [`BrokerClient`].

use super::{Target, COMMAND, EVENTS, EVENTS_STORE, QUERY, QUEUE};
use crate::broker::{BrokerClient, BrokerConnection, BrokerConnector};
use crate::config::Properties;
use crate::error::{BridgeError, Result};
use crate::message::{
    CommandRequest, Event, QueryRequest, QueueMessage, QueuePolicy, Reply, Request,
};
use crate::observability::{events, fields};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const COMPONENT: &str = "broker_target";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Paradigm {
    Events,
    EventsStore,
    Command,
    Query,
    Queue,
}

impl Paradigm {
    fn kind(self) -> &'static str {
        match self {
            Paradigm::Events => EVENTS,
            Paradigm::EventsStore => EVENTS_STORE,
            Paradigm::Command => COMMAND,
            Paradigm::Query => QUERY,
            Paradigm::Queue => QUEUE,
        }
    }
}

/// Parsed destination options.
#[derive(Clone, Debug, PartialEq, Eq)]
enum Route {
    Publish { channels: Vec<String> },
    Rpc { channel: String, timeout: Duration },
    Enqueue { channel: String, policy: QueuePolicy },
}

impl Route {
    fn from_properties(paradigm: Paradigm, properties: &Properties) -> Result<Self> {
        match paradigm {
            Paradigm::Events | Paradigm::EventsStore => {
                let channels = properties.get_list("channels");
                if channels.is_empty() {
                    return Err(BridgeError::config("missing required option 'channels'"));
                }
                Ok(Route::Publish { channels })
            }
            Paradigm::Command | Paradigm::Query => Ok(Route::Rpc {
                channel: properties.require("default_channel")?.to_string(),
                timeout: Duration::from_secs(properties.get_in_range(
                    "timeout_seconds",
                    60,
                    1,
                    86_400,
                )?),
            }),
            Paradigm::Queue => {
                let seconds = |key: &str| -> Result<Option<Duration>> {
                    let value: u64 = properties.get_in_range(key, 0, 0, 43_200)?;
                    Ok((value > 0).then(|| Duration::from_secs(value)))
                };
                Ok(Route::Enqueue {
                    channel: properties.require("default_channel")?.to_string(),
                    policy: QueuePolicy {
                        max_receive_count: properties.get_in_range(
                            "max_receive_count",
                            0,
                            0,
                            1024,
                        )?,
                        max_receive_queue: properties
                            .get("dead_letter_queue")
                            .map(ToString::to_string),
                        expiration: seconds("expiration_seconds")?,
                        delay: seconds("delay_seconds")?,
                    },
                })
            }
        }
    }
}

struct Connected {
    client: Arc<dyn BrokerClient>,
    route: Route,
}

/// Forwards every request variant to a broker channel of one paradigm.
pub struct BrokerTarget {
    connector: Arc<dyn BrokerConnector>,
    paradigm: Paradigm,
    binding: String,
    connected: Option<Connected>,
}

impl BrokerTarget {
    fn new(connector: Arc<dyn BrokerConnector>, paradigm: Paradigm) -> Self {
        Self {
            connector,
            paradigm,
            binding: String::new(),
            connected: None,
        }
    }

    pub fn events(connector: Arc<dyn BrokerConnector>) -> Self {
        Self::new(connector, Paradigm::Events)
    }

    pub fn events_store(connector: Arc<dyn BrokerConnector>) -> Self {
        Self::new(connector, Paradigm::EventsStore)
    }

    pub fn command(connector: Arc<dyn BrokerConnector>) -> Self {
        Self::new(connector, Paradigm::Command)
    }

    pub fn query(connector: Arc<dyn BrokerConnector>) -> Self {
        Self::new(connector, Paradigm::Query)
    }

    pub fn queue(connector: Arc<dyn BrokerConnector>) -> Self {
        Self::new(connector, Paradigm::Queue)
    }

    pub fn kind(&self) -> &'static str {
        self.paradigm.kind()
    }

    async fn publish(
        &self,
        client: &dyn BrokerClient,
        channels: &[String],
        request: &Request,
    ) -> Result<Option<Reply>> {
        for channel in channels {
            let event = Event {
                id: outbound_id(request),
                channel: channel.clone(),
                metadata: request.metadata().to_string(),
                body: request.body().clone(),
                tags: request.tags().clone(),
            };
            if self.paradigm == Paradigm::EventsStore {
                client.send_event_store(event).await?;
            } else {
                client.send_event(event).await?;
            }
        }
        Ok(None)
    }

    async fn rpc(
        &self,
        client: &dyn BrokerClient,
        channel: &str,
        timeout: Duration,
        request: &Request,
    ) -> Result<Option<Reply>> {
        let reply: Reply = if self.paradigm == Paradigm::Query {
            client
                .send_query(QueryRequest {
                    id: outbound_id(request),
                    channel: channel.to_string(),
                    metadata: request.metadata().to_string(),
                    body: request.body().clone(),
                    tags: request.tags().clone(),
                    timeout,
                })
                .await?
                .into()
        } else {
            client
                .send_command(CommandRequest {
                    id: outbound_id(request),
                    channel: channel.to_string(),
                    metadata: request.metadata().to_string(),
                    body: request.body().clone(),
                    tags: request.tags().clone(),
                    timeout,
                })
                .await?
                .into()
        };

        if !reply.executed {
            return Err(BridgeError::dispatch(reply.error.unwrap_or_else(|| {
                format!("{} on channel {channel} was not executed", self.kind())
            })));
        }
        Ok(Some(reply))
    }

    async fn forward(&self, connected: &Connected, request: &Request) -> Result<Option<Reply>> {
        let client = connected.client.as_ref();
        match &connected.route {
            Route::Publish { channels } => self.publish(client, channels, request).await,
            Route::Rpc { channel, timeout } => self.rpc(client, channel, *timeout, request).await,
            Route::Enqueue { channel, policy } => {
                client
                    .send_queue_message(QueueMessage {
                        id: outbound_id(request),
                        channel: channel.clone(),
                        metadata: request.metadata().to_string(),
                        body: request.body().clone(),
                        tags: request.tags().clone(),
                        policy: policy.clone(),
                        receive_count: 0,
                    })
                    .await?;
                Ok(None)
            }
        }
    }
}

fn outbound_id(request: &Request) -> String {
    if request.id().is_empty() {
        uuid::Uuid::new_v4().to_string()
    } else {
        request.id().to_string()
    }
}

#[async_trait]
impl Target for BrokerTarget {
    async fn init(&mut self, connection: &Properties, binding: &str) -> Result<()> {
        let route = Route::from_properties(self.paradigm, connection)?;
        let broker = BrokerConnection::from_properties(connection)?;
        let client = self.connector.connect(&broker).await?;

        info!(
            event = events::TARGET_INIT_OK,
            component = COMPONENT,
            binding,
            target = self.kind(),
            address = broker.address.as_str(),
            "broker target connected"
        );
        self.binding = binding.to_string();
        self.connected = Some(Connected { client, route });
        Ok(())
    }

    /// Returns `Cancelled` as soon as `cancel` fires, abandoning any pending send or reply wait.
    async fn call(&self, cancel: &CancellationToken, request: Request) -> Result<Option<Reply>> {
        let Some(connected) = &self.connected else {
            return Err(BridgeError::Connectivity(format!(
                "{} target is not initialised",
                self.kind()
            )));
        };

        debug!(
            event = events::TARGET_SEND,
            component = COMPONENT,
            binding = self.binding.as_str(),
            target = self.kind(),
            request = fields::format_request(&request).as_str(),
            "forwarding request"
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(BridgeError::Cancelled),
            forwarded = self.forward(connected, &request) => forwarded,
        }
    }

    async fn stop(&self) -> Result<()> {
        match &self.connected {
            Some(connected) => connected.client.close().await,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Paradigm, Route};
    use crate::config::Properties;
    use std::time::Duration;

    #[test]
    fn publish_route_requires_channels() {
        assert!(Route::from_properties(Paradigm::Events, &Properties::new()).is_err());
        assert_eq!(
            Route::from_properties(
                Paradigm::EventsStore,
                &Properties::new().with("channels", "a,b")
            )
            .unwrap(),
            Route::Publish {
                channels: vec!["a".to_string(), "b".to_string()]
            }
        );
    }

    #[test]
    fn rpc_route_defaults_timeout() {
        let route = Route::from_properties(
            Paradigm::Command,
            &Properties::new().with("default_channel", "commands"),
        )
        .unwrap();

        assert_eq!(
            route,
            Route::Rpc {
                channel: "commands".to_string(),
                timeout: Duration::from_secs(60)
            }
        );
        assert!(Route::from_properties(
            Paradigm::Query,
            &Properties::new()
                .with("default_channel", "q")
                .with("timeout_seconds", "0")
        )
        .is_err());
    }

    #[test]
    fn queue_route_builds_policy() {
        let route = Route::from_properties(
            Paradigm::Queue,
            &Properties::new()
                .with("default_channel", "orders")
                .with("max_receive_count", "3")
                .with("dead_letter_queue", "orders.dead")
                .with("delay_seconds", "5"),
        )
        .unwrap();

        let Route::Enqueue { channel, policy } = route else {
            panic!("queue paradigm should enqueue");
        };
        assert_eq!(channel, "orders");
        assert_eq!(policy.max_receive_count, 3);
        assert_eq!(policy.max_receive_queue.as_deref(), Some("orders.dead"));
        assert_eq!(policy.delay, Some(Duration::from_secs(5)));
        assert_eq!(policy.expiration, None);
    }
}
