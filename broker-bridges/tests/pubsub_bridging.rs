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

use broker_bridges::broker::StartPosition;
use broker_bridges::message::{Event, Tags};
use broker_bridges::{source, target, Properties};
use in_memory_broker::InMemoryBroker;
use support::{
    assert_add_ok, binding, init_logging, make_service, publish_to, receive, send_to, settle,
    source_on, subscribe, wait_until,
};

fn event(channel: &str, id: &str) -> Event {
    Event {
        id: id.to_string(),
        channel: channel.to_string(),
        metadata: "meta".to_string(),
        body: format!("body-{id}").into(),
        tags: Tags::from([("origin".to_string(), "test".to_string())]),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn events_are_forwarded_with_payload_intact() {
    init_logging();
    let broker = InMemoryBroker::new();
    let service = make_service(&broker);
    let observer = broker.client("observer");
    let mut first = observer.subscribe_events(subscribe("out.a")).await.unwrap();
    let mut second = observer.subscribe_events(subscribe("out.b")).await.unwrap();

    assert_add_ok(
        &service,
        binding(
            "events-to-events",
            source::EVENTS,
            vec![source_on("in")],
            target::EVENTS,
            vec![publish_to("out.a, out.b")],
        ),
    )
    .await;

    broker
        .client("producer")
        .send_event(event("in", "e-1"))
        .await
        .unwrap();

    for subscription in [&mut first, &mut second] {
        let received = receive(subscription, 1).await.remove(0);
        assert_eq!(received.id, "e-1");
        assert_eq!(received.metadata, "meta");
        assert_eq!(received.body, "body-e-1");
        assert_eq!(received.tags.get("origin").map(String::as_str), Some("test"));
    }
    service.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn broadcast_reaches_every_target() {
    init_logging();
    let broker = InMemoryBroker::new();
    let service = make_service(&broker);
    let observer = broker.client("observer");
    let mut outputs = Vec::new();
    for index in 0..3 {
        outputs.push(
            observer
                .subscribe_events(subscribe(&format!("out.{index}")))
                .await
                .unwrap(),
        );
    }

    assert_add_ok(
        &service,
        binding(
            "broadcast",
            source::EVENTS,
            vec![source_on("in")],
            target::EVENTS,
            (0..3).map(|index| publish_to(&format!("out.{index}"))).collect(),
        ),
    )
    .await;

    let producer = broker.client("producer");
    for index in 0..10 {
        producer
            .send_event(event("in", &format!("e-{index}")))
            .await
            .unwrap();
    }

    for output in &mut outputs {
        assert_eq!(receive(output, 10).await.len(), 10);
    }
    service.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn load_balancing_splits_messages_evenly() {
    init_logging();
    let broker = InMemoryBroker::new();
    let service = make_service(&broker);

    assert_add_ok(
        &service,
        binding(
            "balanced",
            source::EVENTS,
            vec![source_on("in")],
            target::QUEUE,
            (0..3).map(|index| send_to(&format!("q.{index}"))).collect(),
        )
        .with_properties(Properties::new().with("load-balancing", "true")),
    )
    .await;

    let producer = broker.client("producer");
    for index in 0..300 {
        producer
            .send_event(event("in", &format!("e-{index}")))
            .await
            .unwrap();
    }

    assert!(
        wait_until(|| (0..3).map(|index| broker.queue_len(&format!("q.{index}"))).sum::<usize>() == 300)
            .await
    );
    for index in 0..3 {
        assert_eq!(broker.queue_len(&format!("q.{index}")), 100);
    }
    service.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn parallel_sources_share_a_generated_group() {
    init_logging();
    let broker = InMemoryBroker::new();
    let service = make_service(&broker);

    assert_add_ok(
        &service,
        binding(
            "parallel",
            source::EVENTS,
            vec![source_on("in").with("sources", "3")],
            target::QUEUE,
            vec![send_to("q")],
        ),
    )
    .await;
    assert_eq!(broker.subscriber_count("in"), 3);
    assert_eq!(broker.open_connections(), 4);

    let producer = broker.client("producer");
    for index in 0..30 {
        producer
            .send_event(event("in", &format!("e-{index}")))
            .await
            .unwrap();
    }

    assert!(wait_until(|| broker.queue_len("q") == 30).await);
    settle().await;
    assert_eq!(broker.queue_len("q"), 30);
    service.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn failing_target_does_not_stop_the_binding() {
    init_logging();
    let broker = InMemoryBroker::new();
    let service = make_service(&broker);

    // Nothing answers on "nobody", so every command dispatch fails.
    assert_add_ok(
        &service,
        binding(
            "events-to-nowhere",
            source::EVENTS,
            vec![source_on("in")],
            target::COMMAND,
            vec![send_to("nobody")],
        ),
    )
    .await;

    let producer = broker.client("producer");
    for index in 0..3 {
        producer
            .send_event(event("in", &format!("e-{index}")))
            .await
            .unwrap();
    }

    assert!(
        wait_until(|| service
            .metrics()
            .iter()
            .any(|report| report.binding == "events-to-nowhere" && report.errors == 3))
        .await
    );
    let report = service
        .metrics()
        .into_iter()
        .find(|report| report.binding == "events-to-nowhere")
        .unwrap();
    assert_eq!(report.requests, 3);
    assert_eq!(report.successes, 0);
    assert!(service.is_ready("events-to-nowhere"));
    assert_eq!(broker.subscriber_count("in"), 1);
    service.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn events_store_source_replays_history_into_events_store_target() {
    init_logging();
    let broker = InMemoryBroker::new();
    let service = make_service(&broker);
    let producer = broker.client("producer");
    for index in 0..3 {
        producer
            .send_event_store(event("history", &format!("h-{index}")))
            .await
            .unwrap();
    }
    let mut copied = broker
        .client("observer")
        .subscribe_events_store(subscribe("history.copy"), StartPosition::NewOnly)
        .await
        .unwrap();

    assert_add_ok(
        &service,
        binding(
            "replay",
            source::EVENTS_STORE,
            vec![source_on("history")
                .with("start_at", "sequence")
                .with("start_sequence", "2")],
            target::EVENTS_STORE,
            vec![publish_to("history.copy")],
        ),
    )
    .await;
    producer
        .send_event_store(event("history", "h-3"))
        .await
        .unwrap();

    let mut ids: Vec<String> = receive(&mut copied, 3)
        .await
        .into_iter()
        .map(|message| message.id)
        .collect();
    ids.sort();
    assert_eq!(ids, ["h-1", "h-2", "h-3"]);
    assert_eq!(broker.stored_events("history.copy").len(), 3);
    service.stop().await;
}
