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

//! Query RPC subscriber: every received query is answered with the target's data.

use super::runtime::{run_subscription_loop, SourceRuntime};
use super::{
    first_target, group_label, not_initialised, ChannelOptions, Source, SourceContext, QUERY,
};
use crate::broker::BrokerConnector;
use crate::config::Properties;
use crate::error::Result;
use crate::message::{QueryReceive, QueryResponse, Reply, Request, Tags};
use crate::middleware::Middleware;
use crate::observability::events;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info};

const COMPONENT: &str = "query_source";

pub fn query_response(
    request_id: String,
    response_to: String,
    outcome: Result<Option<Reply>>,
) -> QueryResponse {
    match outcome {
        Ok(Some(reply)) => QueryResponse {
            request_id,
            response_to,
            executed: reply.executed,
            executed_at: reply.executed_at,
            error: reply.error,
            metadata: reply.metadata,
            body: reply.body,
            tags: reply.tags,
        },
        Ok(None) => QueryResponse {
            request_id,
            response_to,
            executed: true,
            executed_at: Utc::now(),
            error: None,
            metadata: String::new(),
            body: Bytes::new(),
            tags: Tags::new(),
        },
        Err(err) => QueryResponse {
            request_id,
            response_to,
            executed: false,
            executed_at: Utc::now(),
            error: Some(err.to_string()),
            metadata: String::new(),
            body: Bytes::new(),
            tags: Tags::new(),
        },
    }
}

pub struct QuerySource {
    connector: Arc<dyn BrokerConnector>,
    binding: String,
    options: Option<ChannelOptions>,
    runtime: Option<SourceRuntime>,
}

impl QuerySource {
    pub fn new(connector: Arc<dyn BrokerConnector>) -> Self {
        Self {
            connector,
            binding: String::new(),
            options: None,
            runtime: None,
        }
    }
}

#[async_trait]
impl Source for QuerySource {
    async fn init(
        &mut self,
        connection: &Properties,
        _shared: &Properties,
        binding: &str,
    ) -> Result<()> {
        let options = ChannelOptions::from_properties(connection)?.with_auto_group(binding, QUERY);
        let runtime =
            SourceRuntime::connect(self.connector.as_ref(), &options, binding, QUERY).await?;

        self.binding = binding.to_string();
        self.options = Some(options);
        self.runtime = Some(runtime);
        Ok(())
    }

    async fn start(&mut self, ctx: SourceContext, targets: Vec<Arc<dyn Middleware>>) -> Result<()> {
        let (Some(options), Some(runtime)) = (&self.options, &mut self.runtime) else {
            return Err(not_initialised(QUERY));
        };
        let target = first_target(&self.binding, QUERY, targets)?;
        runtime.attach(&ctx);

        for (index, client) in runtime.clients().iter().enumerate() {
            let subscription = client.subscribe_queries(options.subscribe_request()).await?;
            info!(
                event = events::SOURCE_SUBSCRIBE_OK,
                component = COMPONENT,
                binding = self.binding.as_str(),
                channel = options.channel.as_str(),
                group = group_label(options).as_str(),
                index,
                "subscribed to queries"
            );

            let loop_ctx = runtime.loop_context(index);
            let cancel = loop_ctx.shutdown.clone();
            let binding = self.binding.clone();
            let target = target.clone();
            let client = client.clone();
            runtime.spawn(run_subscription_loop(
                loop_ctx,
                subscription,
                move |query: QueryReceive| {
                    let cancel = cancel.clone();
                    let binding = binding.clone();
                    let target = target.clone();
                    let client = client.clone();
                    async move {
                        let request_id = query.id.clone();
                        let response_to = query.response_to.clone();
                        let outcome = target.call(&cancel, Request::Query(query)).await;
                        let response = query_response(request_id, response_to, outcome);
                        if let Err(err) = client.send_query_response(response).await {
                            error!(
                                event = events::RPC_RESPONSE_SEND_FAILED,
                                component = COMPONENT,
                                binding = binding.as_str(),
                                err = %err,
                                "failed to send query response"
                            );
                        }
                    }
                },
            ));
        }
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(runtime) = self.runtime.as_mut() {
            runtime.shutdown().await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::query_response;
    use crate::error::BridgeError;
    use crate::message::Reply;

    #[test]
    fn reply_body_and_metadata_are_returned() {
        let response = query_response(
            "q-1".into(),
            "reply-inbox".into(),
            Ok(Some(
                Reply::executed()
                    .with_body("{\"rows\":2}")
                    .with_metadata("json"),
            )),
        );

        assert!(response.executed);
        assert_eq!(response.body.as_ref(), b"{\"rows\":2}");
        assert_eq!(response.metadata, "json");
    }

    #[test]
    fn failure_returns_empty_body_and_error_text() {
        let response = query_response(
            "q-1".into(),
            "reply-inbox".into(),
            Err(BridgeError::Timeout("query exceeded 60s".into())),
        );

        assert!(!response.executed);
        assert!(response.body.is_empty());
        assert_eq!(response.error.as_deref(), Some("timeout: query exceeded 60s"));
    }
}
