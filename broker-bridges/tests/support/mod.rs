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

#![allow(dead_code)]

use broker_bridges::broker::SubscribeRequest;
use broker_bridges::{BindingConfig, Properties, Registry, Service, Spec};
use in_memory_broker::InMemoryBroker;
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;

pub(crate) const WAIT: Duration = Duration::from_secs(5);

pub(crate) fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub(crate) fn make_service(broker: &InMemoryBroker) -> Service {
    Service::new(Registry::with_broker(broker.connector()))
}

/// Source connection reading `channel`.
pub(crate) fn source_on(channel: &str) -> Properties {
    Properties::new()
        .with("address", "memory")
        .with("channel", channel)
}

/// Publishing target connection writing to `channels`.
pub(crate) fn publish_to(channels: &str) -> Properties {
    Properties::new()
        .with("address", "memory")
        .with("channels", channels)
}

/// RPC or queue target connection writing to `channel`.
pub(crate) fn send_to(channel: &str) -> Properties {
    Properties::new()
        .with("address", "memory")
        .with("default_channel", channel)
}

pub(crate) fn binding(
    name: &str,
    source_kind: &str,
    sources: Vec<Properties>,
    target_kind: &str,
    targets: Vec<Properties>,
) -> BindingConfig {
    BindingConfig::new(
        name,
        Spec::new(source_kind, sources),
        Spec::new(target_kind, targets),
    )
}

pub(crate) fn subscribe(channel: &str) -> SubscribeRequest {
    SubscribeRequest {
        channel: channel.to_string(),
        group: None,
    }
}

pub(crate) async fn assert_add_ok(service: &Service, config: BindingConfig) {
    let name = config.name.clone();
    service
        .add(config)
        .await
        .unwrap_or_else(|err| panic!("binding {name} should start: {err}"));
    assert!(service.is_ready(&name));
}

/// Polls `check` every few milliseconds until it holds or `WAIT` passes.
pub(crate) async fn wait_until(mut check: impl FnMut() -> bool) -> bool {
    tokio::time::timeout(WAIT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .is_ok()
}

/// Polls an async `check` until it holds or `WAIT` passes.
pub(crate) async fn wait_until_async<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    tokio::time::timeout(WAIT, async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .is_ok()
}

/// Receives exactly `count` items, failing the test on error or timeout.
pub(crate) async fn receive<T>(
    subscription: &mut mpsc::Receiver<broker_bridges::Result<T>>,
    count: usize,
) -> Vec<T> {
    let mut received = Vec::with_capacity(count);
    while received.len() < count {
        match tokio::time::timeout(WAIT, subscription.recv()).await {
            Ok(Some(Ok(item))) => received.push(item),
            Ok(Some(Err(err))) => panic!("subscription failed: {err}"),
            Ok(None) => panic!("subscription closed after {} items", received.len()),
            Err(_) => panic!("timed out after {} of {count} items", received.len()),
        }
    }
    received
}

/// Lets in-flight deliveries settle before asserting that nothing more arrives.
pub(crate) async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}
