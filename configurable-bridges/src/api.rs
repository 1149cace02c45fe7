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

//! Operational HTTP surface: liveness, binding status and metrics exposition.

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use broker_bridges::Service;

const METRICS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

pub fn router(service: Service) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/metrics", get(metrics))
        .with_state(service)
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn status(State(service): State<Service>) -> impl IntoResponse {
    Json(service.get_status())
}

async fn metrics(State(service): State<Service>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, METRICS_CONTENT_TYPE)],
        service.render_metrics(),
    )
}

#[cfg(test)]
mod tests {
    use super::{health, metrics, status};
    use axum::body::to_bytes;
    use axum::extract::State;
    use axum::http::{header, StatusCode};
    use axum::response::IntoResponse;
    use broker_bridges::{source, target, BindingConfig, Properties, Registry, Service, Spec};
    use in_memory_broker::InMemoryBroker;

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn service_with_binding() -> Service {
        let broker = InMemoryBroker::new();
        let service = Service::new(Registry::with_broker(broker.connector()));
        let binding = BindingConfig::new(
            "orders",
            Spec::new(
                source::EVENTS,
                vec![Properties::new()
                    .with("address", "memory")
                    .with("channel", "orders")
                    .with("auth_token", "s3cr3t")],
            ),
            Spec::new(
                target::QUEUE,
                vec![Properties::new()
                    .with("address", "memory")
                    .with("default_channel", "orders.q")],
            ),
        );
        service.add(binding).await.unwrap();
        service
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn health_answers_ok() {
        let response = health().await.into_response();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "ok");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn status_lists_bindings_as_json() {
        let service = service_with_binding().await;

        let response = status(State(service.clone())).await.into_response();

        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body[0]["binding"], "orders");
        assert_eq!(body[0]["ready"], true);
        assert_eq!(body[0]["source_kind"], source::EVENTS);
        assert_ne!(body[0]["source_connections"][0]["auth_token"], "s3cr3t");
        service.stop().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn metrics_are_exposed_as_text() {
        let service = service_with_binding().await;

        let response = metrics(State(service.clone())).await.into_response();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            super::METRICS_CONTENT_TYPE
        );
        assert_eq!(body_text(response).await, service.render_metrics());
        service.stop().await;
    }
}
