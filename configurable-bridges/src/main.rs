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

mod api;
mod config;

use crate::config::Config;
use broker_bridges::{Registry, Service};
use clap::Parser;
use in_memory_broker::InMemoryBroker;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const COMPONENT: &str = "configurable_bridges";

#[derive(Parser)]
#[command(version, about = "Bridges broker channels through configured bindings")]
struct BridgesArgs {
    #[arg(short, long, value_name = "FILE")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init();

    let args = BridgesArgs::parse();
    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(err) => {
            error!(
                component = COMPONENT,
                path = %args.config.display(),
                err = %err,
                "unable to load configuration"
            );
            return ExitCode::FAILURE;
        }
    };

    let listener = match TcpListener::bind(("0.0.0.0", config.api.port)).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(
                component = COMPONENT,
                port = config.api.port,
                err = %err,
                "unable to bind operational api"
            );
            return ExitCode::FAILURE;
        }
    };

    let broker = InMemoryBroker::new();
    let service = Service::new(Registry::with_broker(broker.connector()));
    info!(
        component = COMPONENT,
        bindings = config.bindings.len(),
        port = config.api.port,
        "starting broker bridges"
    );
    service.start(config.bindings);

    let shutdown = CancellationToken::new();
    let server_shutdown = shutdown.clone();
    let router = api::router(service.clone());
    let server = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
            .await
    });

    wait_for_signal().await;
    info!(component = COMPONENT, "shutting down broker bridges");
    service.stop().await;
    shutdown.cancel();

    match server.await {
        Ok(Err(err)) => error!(component = COMPONENT, err = %err, "operational api failed"),
        Err(err) => error!(component = COMPONENT, err = %err, "operational api task panicked"),
        Ok(Ok(())) => {}
    }
    ExitCode::SUCCESS
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(terminate) => terminate,
        Err(err) => {
            error!(component = COMPONENT, err = %err, "unable to listen for SIGTERM");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
