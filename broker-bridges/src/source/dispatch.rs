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

//! Fan-out of one received message across a binding's middleware chains.

use super::runtime::{run_subscription_loop, LoopContext};
use crate::broker::Subscription;
use crate::config::Properties;
use crate::error::{BridgeError, Result};
use crate::message::Request;
use crate::middleware::Middleware;
use crate::observability::{events, fields};
use crate::round_robin::RoundRobin;
use futures::future::join_all;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn, Level};

const COMPONENT: &str = "dispatch";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FanOut {
    /// Every message goes to every target.
    #[default]
    Broadcast,
    /// Each message goes to one target, in round-robin order.
    LoadBalance,
}

impl FanOut {
    /// Reads the shared `load-balancing` flag.
    pub fn from_properties(shared: &Properties) -> Result<Self> {
        Ok(if shared.get_bool("load-balancing", false)? {
            FanOut::LoadBalance
        } else {
            FanOut::Broadcast
        })
    }
}

/// Targets chosen for one message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Selection {
    All,
    One(usize),
}

/// Per-message delivery tally.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub attempted: usize,
    pub succeeded: usize,
}

impl DispatchReport {
    pub fn any_succeeded(&self) -> bool {
        self.succeeded > 0
    }

    pub fn all_succeeded(&self) -> bool {
        self.attempted > 0 && self.succeeded == self.attempted
    }
}

pub struct Dispatcher {
    binding: String,
    targets: Vec<Arc<dyn Middleware>>,
    fan_out: FanOut,
    cursor: RoundRobin,
}

impl Dispatcher {
    pub fn new(binding: &str, targets: Vec<Arc<dyn Middleware>>, fan_out: FanOut) -> Result<Self> {
        if targets.is_empty() {
            return Err(BridgeError::NothingToBind(binding.to_string()));
        }
        let cursor = RoundRobin::new(targets.len());
        Ok(Self {
            binding: binding.to_string(),
            targets,
            fan_out,
            cursor,
        })
    }

    pub fn fan_out(&self) -> FanOut {
        self.fan_out
    }

    /// Picks the targets for the next message. Call in receive order.
    pub fn select(&self) -> Selection {
        match self.fan_out {
            FanOut::Broadcast => Selection::All,
            FanOut::LoadBalance => Selection::One(self.cursor.next()),
        }
    }

    /// Invokes the selected chains concurrently and logs each failure.
    pub async fn deliver(
        &self,
        cancel: &CancellationToken,
        selection: Selection,
        request: Request,
    ) -> DispatchReport {
        let described = fields::format_request(&request);
        let outcomes = match selection {
            Selection::All => {
                join_all(self.targets.iter().enumerate().map(|(index, target)| {
                    let request = request.clone();
                    async move { (index, target.call(cancel, request).await) }
                }))
                .await
            }
            Selection::One(index) => match self.targets.get(index) {
                Some(target) => vec![(index, target.call(cancel, request).await)],
                None => Vec::new(),
            },
        };

        let mut report = DispatchReport {
            attempted: outcomes.len(),
            succeeded: 0,
        };
        for (index, outcome) in outcomes {
            match outcome {
                Ok(_) => {
                    report.succeeded += 1;
                    if tracing::enabled!(Level::DEBUG) {
                        debug!(
                            event = events::DISPATCH_OK,
                            component = COMPONENT,
                            binding = self.binding.as_str(),
                            target = index,
                            request = described.as_str(),
                            "request dispatched"
                        );
                    }
                }
                Err(err) => {
                    warn!(
                        event = events::DISPATCH_FAILED,
                        component = COMPONENT,
                        binding = self.binding.as_str(),
                        target = index,
                        request = described.as_str(),
                        err = %err,
                        "dispatch to target failed"
                    );
                }
            }
        }
        report
    }

    pub async fn dispatch(&self, cancel: &CancellationToken, request: Request) -> DispatchReport {
        let selection = self.select();
        self.deliver(cancel, selection, request).await
    }
}

/// Receive loop for pub/sub sources: selection happens on the receive path so
/// load-balanced order follows delivery order, delivery runs in its own task.
pub(crate) async fn run_fan_out_loop<T>(
    ctx: LoopContext,
    subscription: Subscription<T>,
    dispatcher: Arc<Dispatcher>,
    into_request: fn(T) -> Request,
) where
    T: Send + 'static,
{
    let cancel = ctx.shutdown.clone();
    run_subscription_loop(ctx, subscription, move |message| {
        let selection = dispatcher.select();
        let dispatcher = dispatcher.clone();
        let cancel = cancel.clone();
        let request = into_request(message);
        async move {
            dispatcher.deliver(&cancel, selection, request).await;
        }
    })
    .await;
}
