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

//! Durable event subscriber with a configurable start position.

use super::dispatch::{run_fan_out_loop, Dispatcher, FanOut};
use super::runtime::SourceRuntime;
use super::{group_label, not_initialised, ChannelOptions, Source, SourceContext, EVENTS_STORE};
use crate::broker::{BrokerConnector, StartPosition};
use crate::config::Properties;
use crate::error::{BridgeError, Result};
use crate::message::Request;
use crate::middleware::Middleware;
use crate::observability::events;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const COMPONENT: &str = "events_store_source";

/// Parses `start_at` plus the option its mode requires.
pub fn start_position(properties: &Properties) -> Result<StartPosition> {
    let mode = properties.get_one_of(
        "start_at",
        "new-only",
        &["new-only", "first", "last", "sequence", "time-delta"],
    )?;
    Ok(match mode {
        "first" => StartPosition::First,
        "last" => StartPosition::Last,
        "sequence" => StartPosition::Sequence(
            properties
                .get_parsed::<u64>("start_sequence")?
                .filter(|sequence| *sequence > 0)
                .ok_or_else(|| {
                    BridgeError::config("start_at 'sequence' requires a positive 'start_sequence'")
                })?,
        ),
        "time-delta" => StartPosition::TimeDelta(Duration::from_secs(
            properties
                .get_parsed::<u64>("start_time_delta_seconds")?
                .filter(|seconds| *seconds > 0)
                .ok_or_else(|| {
                    BridgeError::config(
                        "start_at 'time-delta' requires a positive 'start_time_delta_seconds'",
                    )
                })?,
        )),
        _ => StartPosition::NewOnly,
    })
}

pub struct EventsStoreSource {
    connector: Arc<dyn BrokerConnector>,
    binding: String,
    fan_out: FanOut,
    start: StartPosition,
    options: Option<ChannelOptions>,
    runtime: Option<SourceRuntime>,
}

impl EventsStoreSource {
    pub fn new(connector: Arc<dyn BrokerConnector>) -> Self {
        Self {
            connector,
            binding: String::new(),
            fan_out: FanOut::default(),
            start: StartPosition::NewOnly,
            options: None,
            runtime: None,
        }
    }
}

#[async_trait]
impl Source for EventsStoreSource {
    async fn init(
        &mut self,
        connection: &Properties,
        shared: &Properties,
        binding: &str,
    ) -> Result<()> {
        let options =
            ChannelOptions::from_properties(connection)?.with_auto_group(binding, EVENTS_STORE);
        let start = start_position(connection)?;
        let fan_out = FanOut::from_properties(shared)?;
        let runtime =
            SourceRuntime::connect(self.connector.as_ref(), &options, binding, EVENTS_STORE)
                .await?;

        self.binding = binding.to_string();
        self.fan_out = fan_out;
        self.start = start;
        self.options = Some(options);
        self.runtime = Some(runtime);
        Ok(())
    }

    async fn start(&mut self, ctx: SourceContext, targets: Vec<Arc<dyn Middleware>>) -> Result<()> {
        let (Some(options), Some(runtime)) = (&self.options, &mut self.runtime) else {
            return Err(not_initialised(EVENTS_STORE));
        };
        let dispatcher = Arc::new(Dispatcher::new(&self.binding, targets, self.fan_out)?);
        runtime.attach(&ctx);

        for (index, client) in runtime.clients().iter().enumerate() {
            let subscription = client
                .subscribe_events_store(options.subscribe_request(), self.start)
                .await?;
            info!(
                event = events::SOURCE_SUBSCRIBE_OK,
                component = COMPONENT,
                binding = self.binding.as_str(),
                channel = options.channel.as_str(),
                group = group_label(options).as_str(),
                start = ?self.start,
                index,
                "subscribed to events store"
            );
            runtime.spawn(run_fan_out_loop(
                runtime.loop_context(index),
                subscription,
                dispatcher.clone(),
                Request::EventStore,
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

#[cfg(test)]
mod tests {
    use super::start_position;
    use crate::broker::StartPosition;
    use crate::config::Properties;
    use std::time::Duration;

    #[test]
    fn start_position_defaults_to_new_only() {
        assert_eq!(
            start_position(&Properties::new()).unwrap(),
            StartPosition::NewOnly
        );
        assert_eq!(
            start_position(&Properties::new().with("start_at", "first")).unwrap(),
            StartPosition::First
        );
    }

    #[test]
    fn start_position_modes_require_their_value() {
        assert!(start_position(&Properties::new().with("start_at", "sequence")).is_err());
        assert_eq!(
            start_position(
                &Properties::new()
                    .with("start_at", "sequence")
                    .with("start_sequence", "42")
            )
            .unwrap(),
            StartPosition::Sequence(42)
        );
        assert_eq!(
            start_position(
                &Properties::new()
                    .with("start_at", "time-delta")
                    .with("start_time_delta_seconds", "30")
            )
            .unwrap(),
            StartPosition::TimeDelta(Duration::from_secs(30))
        );
        assert!(start_position(&Properties::new().with("start_at", "yesterday")).is_err());
    }
}
