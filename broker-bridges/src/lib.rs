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

//! # broker-bridges
//!
//! `broker-bridges` moves messages between message-broker channels through
//! declaratively configured *bindings*. A binding wires one or more sources to
//! one or more targets, with every target wrapped in a middleware chain.
//!
//! Typical usage is API-first and centers on [`Service`], [`Registry`] and
//! [`BindingConfig`].
//!
//! ## Data flow
//!
//! ```text
//! broker channel -> Source -> [Logging -> Metrics -> Retry -> RateLimiter -> Target] -> broker channel
//! ```
//!
//! Pub/sub and queue sources fan each message out to every target, or to one
//! target in round-robin order when the binding sets `load-balancing`. RPC
//! sources answer the caller from the first target's reply.
//!
//! ## Lifecycle
//!
//! [`Service::start`] brings every configured binding up in the background,
//! retrying each until it succeeds and restarting any binding whose
//! subscription is lost. [`Service::add`] and [`Service::remove`] manage single
//! bindings at runtime.
//!
//! ## Quick start
//!
//! ```
//! use broker_bridges::message::Event;
//! use broker_bridges::{source, target, BindingConfig, Properties, Registry, Service, Spec};
//! use in_memory_broker::InMemoryBroker;
//! use std::time::Duration;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let broker = InMemoryBroker::new();
//! let service = Service::new(Registry::with_broker(broker.connector()));
//!
//! let binding = BindingConfig::new(
//!     "orders-to-queue",
//!     Spec::new(
//!         source::EVENTS,
//!         vec![Properties::new()
//!             .with("address", "memory")
//!             .with("channel", "orders")],
//!     ),
//!     Spec::new(
//!         target::QUEUE,
//!         vec![Properties::new()
//!             .with("address", "memory")
//!             .with("default_channel", "orders.pending")],
//!     ),
//! );
//! service.add(binding).await.unwrap();
//! assert!(service.is_ready("orders-to-queue"));
//!
//! broker
//!     .client("producer")
//!     .send_event(Event {
//!         channel: "orders".to_string(),
//!         body: "order-1".into(),
//!         ..Default::default()
//!     })
//!     .await
//!     .unwrap();
//!
//! while broker.queue_len("orders.pending") == 0 {
//!     tokio::time::sleep(Duration::from_millis(5)).await;
//! }
//! service.stop().await;
//! # });
//! ```

pub mod binder;
pub mod broker;
pub mod config;
pub mod error;
pub mod message;
pub mod metrics;
pub mod middleware;
#[doc(hidden)]
pub mod observability;
pub mod registry;
pub mod round_robin;
pub mod service;
pub mod source;
pub mod status;
pub mod target;

pub use binder::Binder;
pub use broker::{BrokerClient, BrokerConnector};
pub use config::{BindingConfig, Properties, Spec};
pub use error::{BridgeError, Result};
pub use message::{Reply, Request};
pub use metrics::MetricsExporter;
pub use middleware::Middleware;
pub use registry::Registry;
pub use round_robin::RoundRobin;
pub use service::Service;
pub use source::{Source, SourceContext};
pub use status::Status;
pub use target::Target;
