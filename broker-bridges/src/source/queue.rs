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

//! Pull-mode queue consumer. Receive is destructive; each batch is dispatched serially.

use super::dispatch::{Dispatcher, FanOut};
use super::runtime::{LoopContext, SourceRuntime, RECEIVE_RETRY_INTERVAL};
use super::{not_initialised, ChannelOptions, Source, SourceContext, QUEUE};
use crate::broker::{BrokerClient, BrokerConnector, QueuePullRequest};
use crate::config::Properties;
use crate::error::Result;
use crate::message::{QueueMessage, Request};
use crate::middleware::Middleware;
use crate::observability::{events, fields};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const COMPONENT: &str = "queue_source";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PullOptions {
    pub batch_size: u32,
    pub wait_timeout: Duration,
}

impl PullOptions {
    pub fn from_properties(properties: &Properties) -> Result<Self> {
        Ok(Self {
            batch_size: properties.get_in_range("batch_size", 1, 1, 1024)?,
            wait_timeout: Duration::from_secs(properties.get_in_range(
                "wait_timeout",
                5,
                1,
                3600,
            )?),
        })
    }
}

pub struct QueueSource {
    connector: Arc<dyn BrokerConnector>,
    binding: String,
    fan_out: FanOut,
    options: Option<(ChannelOptions, PullOptions)>,
    runtime: Option<SourceRuntime>,
}

impl QueueSource {
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
impl Source for QueueSource {
    async fn init(
        &mut self,
        connection: &Properties,
        shared: &Properties,
        binding: &str,
    ) -> Result<()> {
        let channel = ChannelOptions::from_properties(connection)?;
        let pull = PullOptions::from_properties(connection)?;
        let fan_out = FanOut::from_properties(shared)?;
        let runtime =
            SourceRuntime::connect(self.connector.as_ref(), &channel, binding, QUEUE).await?;

        self.binding = binding.to_string();
        self.fan_out = fan_out;
        self.options = Some((channel, pull));
        self.runtime = Some(runtime);
        Ok(())
    }

    async fn start(&mut self, ctx: SourceContext, targets: Vec<Arc<dyn Middleware>>) -> Result<()> {
        let (Some((channel, pull)), Some(runtime)) = (&self.options, &mut self.runtime) else {
            return Err(not_initialised(QUEUE));
        };
        let dispatcher = Arc::new(Dispatcher::new(&self.binding, targets, self.fan_out)?);
        runtime.attach(&ctx);

        let request = QueuePullRequest {
            channel: channel.channel.clone(),
            max_messages: pull.batch_size,
            wait_timeout: pull.wait_timeout,
        };
        for (index, client) in runtime.clients().iter().enumerate() {
            info!(
                event = events::SOURCE_SUBSCRIBE_OK,
                component = COMPONENT,
                binding = self.binding.as_str(),
                channel = request.channel.as_str(),
                batch_size = request.max_messages,
                index,
                "polling queue"
            );
            runtime.spawn(pull_loop(
                runtime.loop_context(index),
                client.clone(),
                request.clone(),
                dispatcher.clone(),
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

async fn pull_loop(
    ctx: LoopContext,
    client: Arc<dyn BrokerClient>,
    request: QueuePullRequest,
    dispatcher: Arc<Dispatcher>,
) {
    'receive: loop {
        let received = tokio::select! {
            biased;
            _ = ctx.shutdown.cancelled() => break 'receive,
            received = client.receive_queue_messages(request.clone()) => received,
        };

        match received {
            Ok(messages) => {
                let abandoned = dispatch_batch(&ctx, &dispatcher, messages).await;
                if !abandoned.is_empty() {
                    warn!(
                        event = events::QUEUE_BATCH_ABANDONED,
                        component = COMPONENT,
                        binding = ctx.binding.as_str(),
                        loop_id = ctx.loop_id.as_str(),
                        abandoned = abandoned.len(),
                        msg_ids = ?abandoned,
                        "stopping with undelivered messages from the last batch"
                    );
                }
                if ctx.shutdown.is_cancelled() {
                    break 'receive;
                }
            }
            Err(err) => {
                warn!(
                    event = events::QUEUE_RECEIVE_FAILED,
                    component = COMPONENT,
                    binding = ctx.binding.as_str(),
                    loop_id = ctx.loop_id.as_str(),
                    err = %err,
                    retry_in_ms = RECEIVE_RETRY_INTERVAL.as_millis() as u64,
                    "queue receive failed"
                );
                tokio::select! {
                    biased;
                    _ = ctx.shutdown.cancelled() => break 'receive,
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
        "queue loop stopped"
    );
}

/// Dispatches a received batch in order. Once shutdown is observed the rest
/// of the batch is not dispatched; their ids are returned.
async fn dispatch_batch(
    ctx: &LoopContext,
    dispatcher: &Dispatcher,
    messages: Vec<QueueMessage>,
) -> Vec<String> {
    let mut messages = messages.into_iter();
    while let Some(message) = messages.next() {
        if ctx.shutdown.is_cancelled() {
            return std::iter::once(message)
                .chain(messages)
                .map(|message| message.id)
                .collect();
        }
        debug!(
            event = events::SOURCE_RECEIVE,
            component = COMPONENT,
            loop_id = ctx.loop_id.as_str(),
            msg_id = message.id.as_str(),
            receive_count = message.receive_count,
            "queue message received"
        );
        dispatcher
            .dispatch(&ctx.shutdown, Request::Queue(message))
            .await;
    }
    Vec::new()
}
