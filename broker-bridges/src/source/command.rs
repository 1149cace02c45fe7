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

//! Command RPC subscriber: every received command is answered with an execution result.

use super::runtime::{run_subscription_loop, SourceRuntime};
use super::{
    first_target, group_label, not_initialised, ChannelOptions, Source, SourceContext, COMMAND,
};
use crate::broker::BrokerConnector;
use crate::config::Properties;
use crate::error::Result;
use crate::message::{CommandReceive, CommandResponse, Reply, Request};
use crate::middleware::Middleware;
use crate::observability::events;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info};

const COMPONENT: &str = "command_source";

/// Translates a dispatch outcome into the broker response for `command`.
pub fn command_response(
    request_id: String,
    response_to: String,
    outcome: Result<Option<Reply>>,
) -> CommandResponse {
    match outcome {
        Ok(Some(reply)) => CommandResponse {
            request_id,
            response_to,
            executed: reply.executed,
            executed_at: reply.executed_at,
            error: reply.error,
        },
        Ok(None) => CommandResponse {
            request_id,
            response_to,
            executed: true,
            executed_at: Utc::now(),
            error: None,
        },
        Err(err) => CommandResponse {
            request_id,
            response_to,
            executed: false,
            executed_at: Utc::now(),
            error: Some(err.to_string()),
        },
    }
}

pub struct CommandSource {
    connector: Arc<dyn BrokerConnector>,
    binding: String,
    options: Option<ChannelOptions>,
    runtime: Option<SourceRuntime>,
}

impl CommandSource {
    pub fn new(connector: Arc<dyn BrokerConnector>) -> Self {
        Self {
            connector,
            binding: String::new(),
            options: None,
            runtime: None,
        }
    }
}

#[async_trait]
impl Source for CommandSource {
    async fn init(
        &mut self,
        connection: &Properties,
        _shared: &Properties,
        binding: &str,
    ) -> Result<()> {
        let options =
            ChannelOptions::from_properties(connection)?.with_auto_group(binding, COMMAND);
        let runtime =
            SourceRuntime::connect(self.connector.as_ref(), &options, binding, COMMAND).await?;

        self.binding = binding.to_string();
        self.options = Some(options);
        self.runtime = Some(runtime);
        Ok(())
    }

    async fn start(&mut self, ctx: SourceContext, targets: Vec<Arc<dyn Middleware>>) -> Result<()> {
        let (Some(options), Some(runtime)) = (&self.options, &mut self.runtime) else {
            return Err(not_initialised(COMMAND));
        };
        let target = first_target(&self.binding, COMMAND, targets)?;
        runtime.attach(&ctx);

        for (index, client) in runtime.clients().iter().enumerate() {
            let subscription = client.subscribe_commands(options.subscribe_request()).await?;
            info!(
                event = events::SOURCE_SUBSCRIBE_OK,
                component = COMPONENT,
                binding = self.binding.as_str(),
                channel = options.channel.as_str(),
                group = group_label(options).as_str(),
                index,
                "subscribed to commands"
            );

            let loop_ctx = runtime.loop_context(index);
            let cancel = loop_ctx.shutdown.clone();
            let binding = self.binding.clone();
            let target = target.clone();
            let client = client.clone();
            runtime.spawn(run_subscription_loop(
                loop_ctx,
                subscription,
                move |command: CommandReceive| {
                    let cancel = cancel.clone();
                    let binding = binding.clone();
                    let target = target.clone();
                    let client = client.clone();
                    async move {
                        let request_id = command.id.clone();
                        let response_to = command.response_to.clone();
                        let outcome = target.call(&cancel, Request::Command(command)).await;
                        let response = command_response(request_id, response_to, outcome);
                        if let Err(err) = client.send_command_response(response).await {
                            error!(
                                event = events::RPC_RESPONSE_SEND_FAILED,
                                component = COMPONENT,
                                binding = binding.as_str(),
                                err = %err,
                                "failed to send command response"
                            );
                        }
                    }
                },
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
