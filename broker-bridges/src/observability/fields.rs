/********************************************************************************
 * Copyright (c) 2026 Contributors to the Eclipse Foundation
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

//! Shared structured field values and value-format helpers.

use crate::message::Request;

pub const NONE: &str = "none";
pub const REASON_CANCELLED: &str = "cancelled";
pub const REASON_SUBSCRIPTION_ENDED: &str = "subscription_ended";
pub const REASON_RECEIVE_LIMIT: &str = "receive_limit_reached";

/// Identifies one broker connection loop of a source, e.g. `orders/broker.queue#2`.
pub fn loop_id(binding: &str, kind: &str, index: usize) -> String {
    format!("{binding}/{kind}#{index}")
}

pub fn format_optional(value: Option<&str>) -> String {
    value
        .filter(|value| !value.is_empty())
        .unwrap_or(NONE)
        .to_string()
}

/// Short `kind:id@channel` label for a request.
pub fn format_request(request: &Request) -> String {
    format!(
        "{}:{}@{}",
        request.kind(),
        format_optional(Some(request.id())),
        request.channel()
    )
}

#[cfg(test)]
mod tests {
    use super::{format_optional, format_request, loop_id, NONE};
    use crate::message::{Event, Request};

    #[test]
    fn loop_id_joins_binding_kind_and_index() {
        assert_eq!(loop_id("orders", "broker.queue", 2), "orders/broker.queue#2");
    }

    #[test]
    fn format_optional_falls_back_for_missing_or_empty() {
        assert_eq!(format_optional(None), NONE);
        assert_eq!(format_optional(Some("")), NONE);
        assert_eq!(format_optional(Some("g1")), "g1");
    }

    #[test]
    fn format_request_is_compact() {
        let request = Request::Event(Event {
            id: "e-1".to_string(),
            channel: "events".to_string(),
            ..Default::default()
        });

        assert_eq!(format_request(&request), "event:e-1@events");
    }
}
