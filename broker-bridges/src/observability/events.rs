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

//! Canonical structured event names used across `broker-bridges`.

// Service and binder lifecycle events.
pub const BINDING_ADD_START: &str = "binding_add_start";
pub const BINDING_ADD_OK: &str = "binding_add_ok";
pub const BINDING_ADD_FAILED: &str = "binding_add_failed";
pub const BINDING_ADD_RETRY_SCHEDULED: &str = "binding_add_retry_scheduled";
pub const BINDING_REMOVE_OK: &str = "binding_remove_ok";
pub const BINDING_REMOVE_FAILED: &str = "binding_remove_failed";
pub const BINDING_FAULTED: &str = "binding_faulted";
pub const BINDING_INIT_ROLLBACK: &str = "binding_init_rollback";
pub const BINDING_START_OK: &str = "binding_start_ok";
pub const BINDING_STOP_OK: &str = "binding_stop_ok";
pub const BINDING_COMPONENT_STOP_FAILED: &str = "binding_component_stop_failed";
pub const SERVICE_STOP: &str = "service_stop";

// Source adapter events.
pub const SOURCE_CONNECT_OK: &str = "source_connect_ok";
pub const SOURCE_SUBSCRIBE_OK: &str = "source_subscribe_ok";
pub const SOURCE_RECEIVE: &str = "source_receive";
pub const SOURCE_SUBSCRIPTION_ERROR: &str = "source_subscription_error";
pub const SOURCE_SUBSCRIPTION_CLOSED: &str = "source_subscription_closed";
pub const SOURCE_LOOP_STOPPED: &str = "source_loop_stopped";
pub const SOURCE_STOP_TIMEOUT: &str = "source_stop_timeout";
pub const SOURCE_CLIENT_CLOSE_FAILED: &str = "source_client_close_failed";
pub const SOURCE_GROUP_GENERATED: &str = "source_group_generated";
pub const SOURCE_EXTRA_TARGETS_IGNORED: &str = "source_extra_targets_ignored";

// Dispatch events.
pub const DISPATCH_FAILED: &str = "dispatch_failed";
pub const DISPATCH_OK: &str = "dispatch_ok";
pub const RPC_RESPONSE_SEND_FAILED: &str = "rpc_response_send_failed";
pub const QUEUE_RECEIVE_FAILED: &str = "queue_receive_failed";
pub const QUEUE_ACK: &str = "queue_ack";
pub const QUEUE_REJECT: &str = "queue_reject";
pub const QUEUE_SETTLE_FAILED: &str = "queue_settle_failed";
pub const QUEUE_LEFT_FOR_DEAD_LETTER: &str = "queue_left_for_dead_letter";
pub const QUEUE_BATCH_ABANDONED: &str = "queue_batch_abandoned";

// Middleware events.
pub const MIDDLEWARE_CALL_OK: &str = "middleware_call_ok";
pub const MIDDLEWARE_CALL_FAILED: &str = "middleware_call_failed";
pub const RETRY_ATTEMPT_FAILED: &str = "retry_attempt_failed";

// Target events.
pub const TARGET_INIT_OK: &str = "target_init_ok";
pub const TARGET_SEND: &str = "target_send";
