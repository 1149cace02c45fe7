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

//! Error taxonomy shared by every bridge component.

use thiserror::Error;

/// Failures raised while building, running or dispatching through a binding.
///
/// The enum is `Clone` so that one dispatch failure can be handed to several
/// observers (logging, metrics, RPC responses) without losing its message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// Missing or invalid option; fatal to component construction.
    #[error("configuration error: {0}")]
    Config(String),

    /// Broker or target endpoint unreachable.
    #[error("connection error: {0}")]
    Connectivity(String),

    /// The broker pushed an asynchronous error on a live subscription.
    #[error("subscription error: {0}")]
    Subscription(String),

    /// A target invocation failed. The message is surfaced verbatim.
    #[error("{0}")]
    Dispatch(String),

    /// The target does not accept this request variant; never retried.
    #[error("unsupported request type {kind} for target {target}")]
    UnsupportedRequest {
        kind: &'static str,
        target: String,
    },

    #[error("timeout: {0}")]
    Timeout(String),

    /// A binding was started with no sources or no targets.
    #[error("binding {0} has nothing to bind: no initialized sources or targets")]
    NothingToBind(String),

    #[error("binding {0} already exists")]
    AlreadyExists(String),

    #[error("binding {0} not found")]
    NotFound(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl BridgeError {
    pub fn config(message: impl Into<String>) -> Self {
        BridgeError::Config(message.into())
    }

    pub fn dispatch(message: impl Into<String>) -> Self {
        BridgeError::Dispatch(message.into())
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, BridgeError>;
