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

//! Fire-and-forget event subscriber.

use super::dispatch::{run_fan_out_loop, Dispatcher, FanOut};
use super::runtime::SourceRuntime;
use super::{group_label, not_initialised, ChannelOptions, Source, SourceContext, EVENTS};
use crate::broker::BrokerConnector;
use crate::config::Properties;
use crate::error::Result;
use crate::message::Request;
use crate::middleware::Middleware;
use crate::observability::events;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

const COMPONENT: &str = "events_source";

pub struct EventsSource {
    connector: Arc<dyn BrokerConnector>,
    binding: String,
    fan_out: FanOut,
    options: Option<ChannelOptions>,
    runtime: Option<SourceRuntime>,
}

impl EventsSource {
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
impl Source for EventsSource {
    async fn init(
        &mut self,
        connection: &Properties,
        shared: &Properties,
        binding: &str,
    ) -> Result<()> {
        let options = ChannelOptions::from_properties(connection)?.with_auto_group(binding, EVENTS);
        let fan_out = FanOut::from_properties(shared)?;
        let runtime =
            SourceRuntime::connect(self.connector.as_ref(), &options, binding, EVENTS).await?;

        self.binding = binding.to_string();
        self.fan_out = fan_out;
        self.options = Some(options);
        self.runtime = Some(runtime);
        Ok(())
    }

    async fn start(&mut self, ctx: SourceContext, targets: Vec<Arc<dyn Middleware>>) -> Result<()> {
        let (Some(options), Some(runtime)) = (&self.options, &mut self.runtime) else {
            return Err(not_initialised(EVENTS));
        };
        let dispatcher = Arc::new(Dispatcher::new(&self.binding, targets, self.fan_out)?);
        runtime.attach(&ctx);

        for (index, client) in runtime.clients().iter().enumerate() {
            let subscription = client.subscribe_events(options.subscribe_request()).await?;
            info!(
                event = events::SOURCE_SUBSCRIBE_OK,
                component = COMPONENT,
                binding = self.binding.as_str(),
                channel = options.channel.as_str(),
                group = group_label(options).as_str(),
                index,
                "subscribed to events"
            );
            runtime.spawn(run_fan_out_loop(
                runtime.loop_context(index),
                subscription,
                dispatcher.clone(),
                Request::Event,
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
