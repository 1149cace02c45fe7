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

mod support;

use broker_bridges::message::{
    CommandRequest, CommandResponse, Event, QueryRequest, QueryResponse, Request,
};
use broker_bridges::target::BrokerTarget;
use broker_bridges::{source, target, BridgeError, BrokerClient, Target};
use bytes::Bytes;
use chrono::{TimeZone, Utc};
use in_memory_broker::InMemoryBroker;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use support::{
    assert_add_ok, binding, init_logging, make_service, send_to, source_on, subscribe, wait_until,
};
use tokio_util::sync::CancellationToken;

fn command(channel: &str) -> CommandRequest {
    CommandRequest {
        id: "cmd-1".to_string(),
        channel: channel.to_string(),
        metadata: String::new(),
        body: Bytes::from_static(b"reboot"),
        tags: Default::default(),
        timeout: Duration::from_secs(5),
    }
}

fn query(channel: &str) -> QueryRequest {
    QueryRequest {
        id: "q-1".to_string(),
        channel: channel.to_string(),
        metadata: "lookup".to_string(),
        body: Bytes::from_static(b"sku-42"),
        tags: Default::default(),
        timeout: Duration::from_secs(5),
    }
}

/// Answers every command on `channel` with `executed` and a fixed timestamp.
async fn command_responder(
    broker: &InMemoryBroker,
    channel: &str,
    executed: bool,
) -> tokio::task::JoinHandle<()> {
    let responder: Arc<dyn BrokerClient> = broker.client("responder");
    let mut commands = responder.subscribe_commands(subscribe(channel)).await.unwrap();
    tokio::spawn(async move {
        while let Some(Ok(received)) = commands.recv().await {
            let _ = responder
                .send_command_response(CommandResponse {
                    request_id: received.id,
                    response_to: received.response_to,
                    executed,
                    executed_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
                    error: (!executed).then(|| "disk full".to_string()),
                })
                .await;
        }
    })
}

#[tokio::test(flavor = "multi_thread")]
async fn command_is_answered_with_downstream_response() {
    init_logging();
    let broker = InMemoryBroker::new();
    let service = make_service(&broker);
    let responder = command_responder(&broker, "cmd.downstream", true).await;

    assert_add_ok(
        &service,
        binding(
            "commands",
            source::COMMAND,
            vec![source_on("cmd.upstream")],
            target::COMMAND,
            vec![send_to("cmd.downstream")],
        ),
    )
    .await;

    let response = broker
        .client("caller")
        .send_command(command("cmd.upstream"))
        .await
        .unwrap();

    assert!(response.executed);
    assert_eq!(response.request_id, "cmd-1");
    assert_eq!(response.error, None);
    assert_eq!(
        response.executed_at,
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    );
    service.stop().await;
    responder.abort();
}

#[tokio::test(flavor = "multi_thread")]
async fn downstream_refusal_reaches_the_caller() {
    init_logging();
    let broker = InMemoryBroker::new();
    let service = make_service(&broker);
    let responder = command_responder(&broker, "cmd.downstream", false).await;

    assert_add_ok(
        &service,
        binding(
            "commands",
            source::COMMAND,
            vec![source_on("cmd.upstream")],
            target::COMMAND,
            vec![send_to("cmd.downstream")],
        ),
    )
    .await;

    let response = broker
        .client("caller")
        .send_command(command("cmd.upstream"))
        .await
        .unwrap();

    assert!(!response.executed);
    assert_eq!(response.error.as_deref(), Some("disk full"));
    service.stop().await;
    responder.abort();
}

#[tokio::test(flavor = "multi_thread")]
async fn command_without_downstream_responder_reports_failure() {
    init_logging();
    let broker = InMemoryBroker::new();
    let service = make_service(&broker);

    assert_add_ok(
        &service,
        binding(
            "commands",
            source::COMMAND,
            vec![source_on("cmd.upstream")],
            target::COMMAND,
            vec![send_to("cmd.nobody")],
        ),
    )
    .await;

    let response = broker
        .client("caller")
        .send_command(command("cmd.upstream"))
        .await
        .unwrap();

    assert!(!response.executed);
    assert!(response
        .error
        .as_deref()
        .is_some_and(|error| error.contains("cmd.nobody")));
    service.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn query_returns_downstream_body_and_metadata() {
    init_logging();
    let broker = InMemoryBroker::new();
    let service = make_service(&broker);
    let responder: Arc<dyn BrokerClient> = broker.client("responder");
    let mut queries = responder
        .subscribe_queries(subscribe("query.downstream"))
        .await
        .unwrap();
    let answering = tokio::spawn(async move {
        while let Some(Ok(received)) = queries.recv().await {
            let mut body = b"price-of-".to_vec();
            body.extend_from_slice(&received.body);
            let _ = responder
                .send_query_response(QueryResponse {
                    request_id: received.id,
                    response_to: received.response_to,
                    executed: true,
                    executed_at: Utc::now(),
                    error: None,
                    metadata: format!("{}-answer", received.metadata),
                    body: body.into(),
                    tags: received.tags,
                })
                .await;
        }
    });

    assert_add_ok(
        &service,
        binding(
            "queries",
            source::QUERY,
            vec![source_on("query.upstream")],
            target::QUERY,
            vec![send_to("query.downstream").with("timeout_seconds", "2")],
        ),
    )
    .await;

    let response = broker
        .client("caller")
        .send_query(query("query.upstream"))
        .await
        .unwrap();

    assert!(response.executed);
    assert_eq!(response.request_id, "q-1");
    assert_eq!(response.metadata, "lookup-answer");
    assert_eq!(response.body, "price-of-sku-42");
    service.stop().await;
    answering.abort();
}

/// Takes every command on `channel` and never answers. Returns how many arrived.
async fn silent_responder(
    broker: &InMemoryBroker,
    channel: &str,
) -> (Arc<AtomicUsize>, tokio::task::JoinHandle<()>) {
    let responder = broker.client("silent");
    let mut commands = responder.subscribe_commands(subscribe(channel)).await.unwrap();
    let received = Arc::new(AtomicUsize::new(0));
    let counter = received.clone();
    let task = tokio::spawn(async move {
        let _responder = responder;
        while let Some(Ok(_)) = commands.recv().await {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });
    (received, task)
}

#[tokio::test(flavor = "multi_thread")]
async fn pending_command_returns_when_cancelled() {
    init_logging();
    let broker = InMemoryBroker::new();
    let (received, responder) = silent_responder(&broker, "cmd.silent").await;
    let mut command_target = BrokerTarget::command(broker.connector());
    command_target
        .init(&send_to("cmd.silent"), "cancellable")
        .await
        .unwrap();
    let command_target = Arc::new(command_target);
    let cancel = CancellationToken::new();

    let call = {
        let command_target = command_target.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            command_target
                .call(
                    &cancel,
                    Request::Event(Event {
                        id: "e-1".to_string(),
                        channel: "in".to_string(),
                        ..Default::default()
                    }),
                )
                .await
        })
    };
    assert!(wait_until(|| received.load(Ordering::SeqCst) == 1).await);
    cancel.cancel();

    let outcome = tokio::time::timeout(Duration::from_secs(1), call)
        .await
        .expect("cancelled command should return promptly")
        .unwrap();
    assert_eq!(outcome, Err(BridgeError::Cancelled));
    command_target.stop().await.unwrap();
    responder.abort();
}

#[tokio::test(flavor = "multi_thread")]
async fn removing_binding_does_not_wait_for_unanswered_commands() {
    init_logging();
    let broker = InMemoryBroker::new();
    let service = make_service(&broker);
    let (received, responder) = silent_responder(&broker, "cmd.silent").await;

    assert_add_ok(
        &service,
        binding(
            "events-to-commands",
            source::EVENTS,
            vec![source_on("in")],
            target::COMMAND,
            vec![send_to("cmd.silent").with("timeout_seconds", "30")],
        ),
    )
    .await;
    broker
        .client("producer")
        .send_event(Event {
            channel: "in".to_string(),
            body: "ping".into(),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(wait_until(|| received.load(Ordering::SeqCst) == 1).await);

    let started = Instant::now();
    service.remove("events-to-commands").await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(broker.subscriber_count("in"), 0);
    service.stop().await;
    responder.abort();
}
