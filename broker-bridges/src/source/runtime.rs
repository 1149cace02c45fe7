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

//! Connection set, task group and receive-loop driver shared by broker sources.

use super::{ChannelOptions, SourceContext};
use crate::broker::{connect_replicas, BrokerClient, BrokerConnector, Subscription};
use crate::error::Result;
use crate::observability::{events, fields};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

pub(crate) const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Fixed pause after a failed queue receive call.
pub(crate) const RECEIVE_RETRY_INTERVAL: Duration = Duration::from_secs(1);

const COMPONENT: &str = "source_runtime";

/// Per-loop handles: identity, cancellation, fault reporting and the task group.
#[derive(Clone, Debug)]
pub(crate) struct LoopContext {
    pub(crate) loop_id: String,
    pub(crate) binding: String,
    pub(crate) shutdown: CancellationToken,
    pub(crate) fault: CancellationToken,
    pub(crate) tracker: TaskTracker,
}

impl LoopContext {
    pub(crate) fn report_fault(&self) {
        self.fault.cancel();
    }
}

/// Broker connections and the binding-scoped task group owned by one source.
pub(crate) struct SourceRuntime {
    kind: &'static str,
    binding: String,
    clients: Vec<Arc<dyn BrokerClient>>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
    fault: CancellationToken,
}

impl SourceRuntime {
    pub(crate) async fn connect(
        connector: &dyn BrokerConnector,
        options: &ChannelOptions,
        binding: &str,
        kind: &'static str,
    ) -> Result<Self> {
        let clients = connect_replicas(connector, &options.connection, options.sources).await?;
        info!(
            event = events::SOURCE_CONNECT_OK,
            component = COMPONENT,
            binding,
            source = kind,
            address = options.connection.address.as_str(),
            channel = options.channel.as_str(),
            connections = clients.len(),
            "source connected"
        );

        Ok(Self {
            kind,
            binding: binding.to_string(),
            clients,
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
            fault: CancellationToken::new(),
        })
    }

    pub(crate) fn clients(&self) -> &[Arc<dyn BrokerClient>] {
        &self.clients
    }

    /// Scopes this runtime to the binding's governing context.
    pub(crate) fn attach(&mut self, ctx: &SourceContext) {
        self.shutdown = ctx.shutdown.child_token();
        self.fault = ctx.fault.clone();
    }

    pub(crate) fn loop_context(&self, index: usize) -> LoopContext {
        LoopContext {
            loop_id: fields::loop_id(&self.binding, self.kind, index),
            binding: self.binding.clone(),
            shutdown: self.shutdown.clone(),
            fault: self.fault.clone(),
            tracker: self.tracker.clone(),
        }
    }

    pub(crate) fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tracker.spawn(task);
    }

    /// Cancels loops, waits up to [`SHUTDOWN_TIMEOUT`] for in-flight tasks, then closes clients.
    pub(crate) async fn shutdown(&mut self) {
        self.shutdown.cancel();
        self.tracker.close();
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, self.tracker.wait())
            .await
            .is_err()
        {
            warn!(
                event = events::SOURCE_STOP_TIMEOUT,
                component = COMPONENT,
                binding = self.binding.as_str(),
                source = self.kind,
                in_flight = self.tracker.len(),
                timeout_ms = SHUTDOWN_TIMEOUT.as_millis() as u64,
                "in-flight dispatches did not finish before the shutdown timeout"
            );
        }

        for client in self.clients.drain(..) {
            if let Err(err) = client.close().await {
                warn!(
                    event = events::SOURCE_CLIENT_CLOSE_FAILED,
                    component = COMPONENT,
                    binding = self.binding.as_str(),
                    source = self.kind,
                    err = %err,
                    "failed to close broker connection"
                );
            }
        }
    }
}

/// Drives one push subscription until cancelled or lost.
///
/// `handle` runs on the receive path, in delivery order, and returns the task
/// that completes the message; that task joins the loop's task group. A lost
/// subscription trips the fault token so the binding can be restarted.
pub(crate) async fn run_subscription_loop<T, H, Fut>(
    ctx: LoopContext,
    mut subscription: Subscription<T>,
    mut handle: H,
) where
    T: Send + 'static,
    H: FnMut(T) -> Fut + Send,
    Fut: Future<Output = ()> + Send + 'static,
{
    loop {
        tokio::select! {
            biased;
            _ = ctx.shutdown.cancelled() => {
                debug!(
                    event = events::SOURCE_LOOP_STOPPED,
                    component = COMPONENT,
                    loop_id = ctx.loop_id.as_str(),
                    reason = fields::REASON_CANCELLED,
                    "receive loop stopped"
                );
                return;
            }
            item = subscription.recv() => match item {
                Some(Ok(message)) => {
                    ctx.tracker.spawn(handle(message));
                }
                Some(Err(err)) => {
                    error!(
                        event = events::SOURCE_SUBSCRIPTION_ERROR,
                        component = COMPONENT,
                        binding = ctx.binding.as_str(),
                        loop_id = ctx.loop_id.as_str(),
                        err = %err,
                        "subscription failed; receive loop terminated"
                    );
                    ctx.report_fault();
                    return;
                }
                None => {
                    error!(
                        event = events::SOURCE_SUBSCRIPTION_CLOSED,
                        component = COMPONENT,
                        binding = ctx.binding.as_str(),
                        loop_id = ctx.loop_id.as_str(),
                        reason = fields::REASON_SUBSCRIPTION_ENDED,
                        "subscription closed by broker; receive loop terminated"
                    );
                    ctx.report_fault();
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{run_subscription_loop, LoopContext};
    use crate::error::BridgeError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;
    use tokio_util::task::TaskTracker;

    fn context() -> LoopContext {
        LoopContext {
            loop_id: "b1/broker.events#0".to_string(),
            binding: "b1".to_string(),
            shutdown: CancellationToken::new(),
            fault: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    #[tokio::test]
    async fn subscription_error_terminates_loop_and_reports_fault() {
        let ctx = context();
        let handled = Arc::new(AtomicUsize::new(0));
        let (sender, subscription) = mpsc::channel(4);
        sender.send(Ok(1u32)).await.unwrap();
        sender
            .send(Err(BridgeError::Subscription("stream reset".into())))
            .await
            .unwrap();

        let counter = handled.clone();
        run_subscription_loop(ctx.clone(), subscription, move |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        })
        .await;
        ctx.tracker.close();
        ctx.tracker.wait().await;

        assert!(ctx.fault.is_cancelled());
        assert_eq!(handled.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancellation_stops_loop_without_fault() {
        let ctx = context();
        let (_sender, subscription) = mpsc::channel::<crate::error::Result<u32>>(1);
        ctx.shutdown.cancel();

        run_subscription_loop(ctx.clone(), subscription, |_| async {}).await;

        assert!(!ctx.fault.is_cancelled());
    }
}
