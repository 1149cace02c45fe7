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

//! Leased queue consumer with explicit ack/reject.
//!
//! Each message is held under a visibility timeout while it is dispatched,
//! then settled:
//!
//! - delivered per the ack policy: acked
//! - not delivered, receive limit not reached: rejected for redelivery
//! - not delivered, receive limit reached: left unsettled so the broker
//!   dead-letters it when the lease expires

use super::dispatch::{DispatchReport, Dispatcher, FanOut};
use super::runtime::{LoopContext, SourceRuntime, RECEIVE_RETRY_INTERVAL};
use super::{not_initialised, ChannelOptions, Source, SourceContext, QUEUE_STREAM};
use crate::broker::{BrokerClient, BrokerConnector, QueueLease, QueueLeaseRequest};
use crate::config::Properties;
use crate::error::Result;
use crate::message::{QueueMessage, Request};
use crate::middleware::Middleware;
use crate::observability::{events, fields};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const COMPONENT: &str = "queue_stream_source";

/// Which broadcast outcomes count as delivered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AckPolicy {
    /// At least one target succeeded.
    #[default]
    Any,
    /// Every selected target succeeded.
    All,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamOptions {
    pub visibility_timeout: Duration,
    pub wait_timeout: Duration,
    pub ack_policy: AckPolicy,
}

impl StreamOptions {
    pub fn from_properties(properties: &Properties) -> Result<Self> {
        Ok(Self {
            visibility_timeout: Duration::from_secs(properties.get_in_range(
                "visibility_timeout_seconds",
                60,
                1,
                43_200,
            )?),
            wait_timeout: Duration::from_secs(properties.get_in_range(
                "wait_timeout",
                5,
                1,
                3600,
            )?),
            ack_policy: match properties.get_one_of("ack_policy", "any", &["any", "all"])? {
                "all" => AckPolicy::All,
                _ => AckPolicy::Any,
            },
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Settlement {
    Ack,
    Reject,
    LeaveForDeadLetter,
}

pub fn settlement(message: &QueueMessage, report: DispatchReport, policy: AckPolicy) -> Settlement {
    let delivered = match policy {
        AckPolicy::Any => report.any_succeeded(),
        AckPolicy::All => report.all_succeeded(),
    };
    if delivered {
        Settlement::Ack
    } else if message.receive_limit_reached() {
        Settlement::LeaveForDeadLetter
    } else {
        Settlement::Reject
    }
}

/// Applies `decision` to `lease`, logging the outcome.
pub async fn settle(lease: Box<dyn QueueLease>, decision: Settlement, loop_id: &str) {
    let message_id = lease.message().id.clone();
    let receive_count = lease.message().receive_count;
    let (outcome, event) = match decision {
        Settlement::Ack => (lease.ack().await, events::QUEUE_ACK),
        Settlement::Reject => (lease.reject().await, events::QUEUE_REJECT),
        Settlement::LeaveForDeadLetter => {
            warn!(
                event = events::QUEUE_LEFT_FOR_DEAD_LETTER,
                component = COMPONENT,
                loop_id,
                msg_id = message_id.as_str(),
                receive_count,
                reason = fields::REASON_RECEIVE_LIMIT,
                "delivery failed on the last allowed receive; leaving message for dead-letter"
            );
            return;
        }
    };

    match outcome {
        Ok(()) => debug!(
            event = event,
            component = COMPONENT,
            loop_id,
            msg_id = message_id.as_str(),
            receive_count,
            "queue message settled"
        ),
        Err(err) => warn!(
            event = events::QUEUE_SETTLE_FAILED,
            component = COMPONENT,
            loop_id,
            msg_id = message_id.as_str(),
            settlement = event,
            err = %err,
            "failed to settle queue message"
        ),
    }
}

pub struct QueueStreamSource {
    connector: Arc<dyn BrokerConnector>,
    binding: String,
    fan_out: FanOut,
    options: Option<(ChannelOptions, StreamOptions)>,
    runtime: Option<SourceRuntime>,
}

impl QueueStreamSource {
    pub fn new(connector: Arc<dyn BrokerConnector>) -> Self {
        Self {
            connector,
            binding: String::new(),
            fan_out: FanOut::default(),
            options: None,
            runtime: None,
        }
    }
}

#[async_trait]
impl Source for QueueStreamSource {
    async fn init(
        &mut self,
        connection: &Properties,
        shared: &Properties,
        binding: &str,
    ) -> Result<()> {
        let channel = ChannelOptions::from_properties(connection)?;
        let stream = StreamOptions::from_properties(connection)?;
        let fan_out = FanOut::from_properties(shared)?;
        let runtime =
            SourceRuntime::connect(self.connector.as_ref(), &channel, binding, QUEUE_STREAM)
                .await?;

        self.binding = binding.to_string();
        self.fan_out = fan_out;
        self.options = Some((channel, stream));
        self.runtime = Some(runtime);
        Ok(())
    }

    async fn start(&mut self, ctx: SourceContext, targets: Vec<Arc<dyn Middleware>>) -> Result<()> {
        let (Some((channel, stream)), Some(runtime)) = (&self.options, &mut self.runtime) else {
            return Err(not_initialised(QUEUE_STREAM));
        };
        let dispatcher = Arc::new(Dispatcher::new(&self.binding, targets, self.fan_out)?);
        runtime.attach(&ctx);

        let request = QueueLeaseRequest {
            channel: channel.channel.clone(),
            visibility_timeout: stream.visibility_timeout,
            wait_timeout: stream.wait_timeout,
        };
        for (index, client) in runtime.clients().iter().enumerate() {
            info!(
                event = events::SOURCE_SUBSCRIBE_OK,
                component = COMPONENT,
                binding = self.binding.as_str(),
                channel = request.channel.as_str(),
                ack_policy = ?stream.ack_policy,
                index,
                "streaming queue"
            );
            runtime.spawn(lease_loop(
                runtime.loop_context(index),
                client.clone(),
                request.clone(),
                dispatcher.clone(),
                stream.ack_policy,
            ));
        }
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(runtime) = self.runtime.as_mut() {
            runtime.shutdown().await;
        }
        Ok(())
    }
}

async fn lease_loop(
    ctx: LoopContext,
    client: Arc<dyn BrokerClient>,
    request: QueueLeaseRequest,
    dispatcher: Arc<Dispatcher>,
    ack_policy: AckPolicy,
) {
    loop {
        let leased = tokio::select! {
            biased;
            _ = ctx.shutdown.cancelled() => break,
            leased = client.lease_queue_message(request.clone()) => leased,
        };

        match leased {
            Ok(Some(lease)) => {
                let message = lease.message().clone();
                debug!(
                    event = events::SOURCE_RECEIVE,
                    component = COMPONENT,
                    loop_id = ctx.loop_id.as_str(),
                    msg_id = message.id.as_str(),
                    receive_count = message.receive_count,
                    "queue message leased"
                );
                let report = dispatcher
                    .dispatch(&ctx.shutdown, Request::Queue(message.clone()))
                    .await;
                settle(lease, settlement(&message, report, ack_policy), &ctx.loop_id).await;
            }
            Ok(None) => {}
            Err(err) => {
                warn!(
                    event = events::QUEUE_RECEIVE_FAILED,
                    component = COMPONENT,
                    binding = ctx.binding.as_str(),
                    loop_id = ctx.loop_id.as_str(),
                    err = %err,
                    retry_in_ms = RECEIVE_RETRY_INTERVAL.as_millis() as u64,
                    "queue lease failed"
                );
                tokio::select! {
                    biased;
                    _ = ctx.shutdown.cancelled() => break,
                    _ = tokio::time::sleep(RECEIVE_RETRY_INTERVAL) => {}
                }
            }
        }
    }

    debug!(
        event = events::SOURCE_LOOP_STOPPED,
        component = COMPONENT,
        loop_id = ctx.loop_id.as_str(),
        reason = fields::REASON_CANCELLED,
        "queue stream loop stopped"
    );
}
