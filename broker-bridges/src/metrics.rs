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

//! Per-binding dispatch metrics and their pull-scrape text rendering.

use dashmap::DashMap;
use serde::Serialize;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Series identity: one binding, one source kind, one target kind.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct MetricKey {
    pub binding: String,
    pub source_kind: String,
    pub target_kind: String,
}

impl MetricKey {
    pub fn new(binding: &str, source_kind: &str, target_kind: &str) -> Self {
        Self {
            binding: binding.to_string(),
            source_kind: source_kind.to_string(),
            target_kind: target_kind.to_string(),
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    requests: AtomicU64,
    errors: AtomicU64,
    request_bytes: AtomicU64,
    latency_nanos_total: AtomicU64,
    latency_nanos_max: AtomicU64,
}

/// Point-in-time view of one series.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MetricReport {
    pub binding: String,
    pub source_kind: String,
    pub target_kind: String,
    pub requests: u64,
    pub errors: u64,
    pub successes: u64,
    pub request_bytes: u64,
    pub latency_seconds_sum: f64,
    pub latency_seconds_max: f64,
}

/// Write handle for one series; cheap to clone into every middleware chain.
#[derive(Clone, Debug)]
pub struct MetricsRecorder {
    counters: Arc<Counters>,
}

impl MetricsRecorder {
    /// Records one user-visible outcome.
    #[allow(clippy::cast_possible_truncation)]
    pub fn record(&self, latency: Duration, request_bytes: usize, success: bool) {
        let nanos = latency.as_nanos().min(u128::from(u64::MAX)) as u64;
        self.counters.requests.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.counters.errors.fetch_add(1, Ordering::Relaxed);
        }
        self.counters
            .request_bytes
            .fetch_add(request_bytes as u64, Ordering::Relaxed);
        self.counters
            .latency_nanos_total
            .fetch_add(nanos, Ordering::Relaxed);
        self.counters
            .latency_nanos_max
            .fetch_max(nanos, Ordering::Relaxed);
    }
}

/// Process-wide metrics store shared by every binding.
#[derive(Clone, Debug, Default)]
pub struct MetricsExporter {
    series: Arc<DashMap<MetricKey, Arc<Counters>>>,
}

impl MetricsExporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the recorder for `key`, creating the series on first use.
    pub fn recorder(&self, key: MetricKey) -> MetricsRecorder {
        let counters = self.series.entry(key).or_default().clone();
        MetricsRecorder { counters }
    }

    /// Drops every series that belongs to `binding`.
    pub fn remove_binding(&self, binding: &str) {
        self.series.retain(|key, _| key.binding != binding);
    }

    /// Snapshot of all series ordered by key.
    pub fn report(&self) -> Vec<MetricReport> {
        let mut reports: Vec<MetricReport> = self
            .series
            .iter()
            .map(|entry| {
                let key = entry.key();
                let counters = entry.value();
                let requests = counters.requests.load(Ordering::Relaxed);
                let errors = counters.errors.load(Ordering::Relaxed);
                MetricReport {
                    binding: key.binding.clone(),
                    source_kind: key.source_kind.clone(),
                    target_kind: key.target_kind.clone(),
                    requests,
                    errors,
                    successes: requests.saturating_sub(errors),
                    request_bytes: counters.request_bytes.load(Ordering::Relaxed),
                    latency_seconds_sum: nanos_to_seconds(
                        counters.latency_nanos_total.load(Ordering::Relaxed),
                    ),
                    latency_seconds_max: nanos_to_seconds(
                        counters.latency_nanos_max.load(Ordering::Relaxed),
                    ),
                }
            })
            .collect();
        reports.sort_by(|a, b| {
            (&a.binding, &a.source_kind, &a.target_kind).cmp(&(
                &b.binding,
                &b.source_kind,
                &b.target_kind,
            ))
        });
        reports
    }

    /// Renders every series in the text exposition format scraped by pull collectors.
    pub fn render_prometheus(&self) -> String {
        let reports = self.report();
        let mut output = String::new();

        render_family(
            &mut output,
            "bridges_requests_total",
            "Dispatches observed after retries.",
            "counter",
            &reports,
            |report| report.requests as f64,
        );
        render_family(
            &mut output,
            "bridges_errors_total",
            "Dispatches that ended in an error.",
            "counter",
            &reports,
            |report| report.errors as f64,
        );
        render_family(
            &mut output,
            "bridges_request_bytes_total",
            "Request body bytes handed to targets.",
            "counter",
            &reports,
            |report| report.request_bytes as f64,
        );
        render_family(
            &mut output,
            "bridges_latency_seconds_sum",
            "Total dispatch latency.",
            "counter",
            &reports,
            |report| report.latency_seconds_sum,
        );
        render_family(
            &mut output,
            "bridges_latency_seconds_max",
            "Slowest dispatch observed.",
            "gauge",
            &reports,
            |report| report.latency_seconds_max,
        );

        output
    }
}

fn nanos_to_seconds(nanos: u64) -> f64 {
    Duration::from_nanos(nanos).as_secs_f64()
}

fn render_family(
    output: &mut String,
    name: &str,
    help: &str,
    metric_type: &str,
    reports: &[MetricReport],
    value: impl Fn(&MetricReport) -> f64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {metric_type}");
    for report in reports {
        let _ = writeln!(
            output,
            "{name}{{binding=\"{}\",source=\"{}\",target=\"{}\"}} {}",
            escape_label(&report.binding),
            escape_label(&report.source_kind),
            escape_label(&report.target_kind),
            value(report)
        );
    }
}

fn escape_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}
