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

use broker_bridges::message::{CommandResponse, QueueMessage, QueuePolicy};
use broker_bridges::{source, target, BrokerClient, Service};
use chrono::Utc;
use in_memory_broker::InMemoryBroker;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use support::{
    assert_add_ok, binding, init_logging, make_service, publish_to, receive, send_to, settle,
    source_on, subscribe, wait_until,
};

fn job(id: &str, policy: QueuePolicy) -> QueueMessage {
    QueueMessage {
        id: id.to_string(),
        channel: "jobs".to_string(),
        body: format!("payload-{id}").into(),
        policy,
        ..Default::default()
    }
}

async fn enqueue(
    producer: &Arc<dyn BrokerClient>,
    messages: impl IntoIterator<Item = QueueMessage>,
) {
    for message in messages {
        producer.send_queue_message(message).await.unwrap();
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn pulled_queue_messages_are_forwarded_in_order() {
    init_logging();
    let broker = InMemoryBroker::new();
    let service = make_service(&broker);
    let mut forwarded = broker
        .client("observer")
        .subscribe_events(subscribe("jobs.seen"))
        .await
        .unwrap();

    assert_add_ok(
        &service,
        binding(
            "queue-to-events",
            source::QUEUE,
            vec![source_on("jobs")
                .with("batch_size", "4")
                .with("wait_timeout", "1")],
            target::EVENTS,
            vec![publish_to("jobs.seen")],
        ),
    )
    .await;
    enqueue(
        &broker.client("producer"),
        (0..10).map(|index| job(&format!("j-{index}"), QueuePolicy::default())),
    )
    .await;

    let ids: Vec<String> = receive(&mut forwarded, 10)
        .await
        .into_iter()
        .map(|event| event.id)
        .collect();
    let expected: Vec<String> = (0..10).map(|index| format!("j-{index}")).collect();
    assert_eq!(ids, expected);
    assert_eq!(broker.queue_len("jobs"), 0);
    service.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn streamed_message_is_acked_after_delivery() {
    init_logging();
    let broker = InMemoryBroker::new();
    let service = make_service(&broker);

    assert_add_ok(
        &service,
        binding(
            "stream-to-queue",
            source::QUEUE_STREAM,
            vec![source_on("jobs").with("wait_timeout", "1")],
            target::QUEUE,
            vec![send_to("jobs.done")],
        ),
    )
    .await;
    enqueue(&broker.client("producer"), [job("j-1", QueuePolicy::default())]).await;

    assert!(wait_until(|| broker.queue_len("jobs.done") == 1).await);
    settle().await;
    assert_eq!(broker.queue_len("jobs"), 0);
    assert_eq!(broker.queue_messages("jobs.done")[0].id, "j-1");
    service.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn undeliverable_message_ends_in_dead_letter_queue() {
    init_logging();
    let broker = InMemoryBroker::new();
    let service = make_service(&broker);

    // No responder on "nobody": every delivery attempt fails.
    assert_add_ok(
        &service,
        binding(
            "stream-to-nowhere",
            source::QUEUE_STREAM,
            vec![source_on("jobs")
                .with("visibility_timeout_seconds", "1")
                .with("wait_timeout", "1")],
            target::COMMAND,
            vec![send_to("nobody")],
        ),
    )
    .await;
    enqueue(
        &broker.client("producer"),
        [job(
            "j-1",
            QueuePolicy {
                max_receive_count: 3,
                max_receive_queue: Some("jobs.dead".to_string()),
                ..Default::default()
            },
        )],
    )
    .await;

    assert!(wait_until(|| broker.queue_len("jobs.dead") == 1).await);
    assert_eq!(broker.queue_len("jobs"), 0);
    assert_eq!(broker.queue_messages("jobs.dead")[0].id, "j-1");
    let report = service
        .metrics()
        .into_iter()
        .find(|report| report.binding == "stream-to-nowhere")
        .unwrap();
    assert_eq!(report.requests, 3);
    assert_eq!(report.errors, 3);
    service.stop().await;
}

/// Queue-stream binding broadcasting to one answered and one unanswered command channel.
async fn partial_broadcast(ack_policy: &str) -> (Service, InMemoryBroker, Arc<AtomicUsize>) {
    let broker = InMemoryBroker::new();
    let service = make_service(&broker);
    let responder = broker.client("responder");
    let mut commands = responder.subscribe_commands(subscribe("answered")).await.unwrap();
    let answered = Arc::new(AtomicUsize::new(0));
    let counter = answered.clone();
    tokio::spawn(async move {
        while let Some(Ok(received)) = commands.recv().await {
            counter.fetch_add(1, Ordering::SeqCst);
            let _ = responder
                .send_command_response(CommandResponse {
                    request_id: received.id,
                    response_to: received.response_to,
                    executed: true,
                    executed_at: Utc::now(),
                    error: None,
                })
                .await;
        }
    });

    assert_add_ok(
        &service,
        binding(
            "partial",
            source::QUEUE_STREAM,
            vec![source_on("jobs")
                .with("visibility_timeout_seconds", "1")
                .with("wait_timeout", "1")
                .with("ack_policy", ack_policy)],
            target::COMMAND,
            vec![send_to("answered"), send_to("nobody")],
        ),
    )
    .await;
    enqueue(
        &broker.client("producer"),
        [job(
            "j-1",
            QueuePolicy {
                max_receive_count: 2,
                max_receive_queue: Some("jobs.dead".to_string()),
                ..Default::default()
            },
        )],
    )
    .await;
    (service, broker, answered)
}

#[tokio::test(flavor = "multi_thread")]
async fn any_policy_acks_partial_broadcast() {
    init_logging();
    let (service, broker, answered) = partial_broadcast("any").await;

    assert!(wait_until(|| answered.load(Ordering::SeqCst) == 1).await);
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(answered.load(Ordering::SeqCst), 1);
    assert_eq!(broker.queue_len("jobs"), 0);
    assert_eq!(broker.queue_len("jobs.dead"), 0);
    service.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn all_policy_redelivers_partial_broadcast_until_dead_lettered() {
    init_logging();
    let (service, broker, answered) = partial_broadcast("all").await;

    assert!(wait_until(|| broker.queue_len("jobs.dead") == 1).await);
    assert_eq!(answered.load(Ordering::SeqCst), 2);
    assert_eq!(broker.queue_len("jobs"), 0);
    service.stop().await;
}
