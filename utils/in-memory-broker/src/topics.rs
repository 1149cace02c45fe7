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

use broker_bridges::error::Result;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::mpsc;

pub(crate) type Sink<T> = mpsc::Sender<Result<T>>;

pub(crate) struct Subscriber<T> {
    pub(crate) client: u64,
    pub(crate) group: Option<String>,
    pub(crate) sink: Sink<T>,
}

/// Live subscribers of one message paradigm, keyed by channel.
pub(crate) struct Topics<T> {
    channels: HashMap<String, Vec<Subscriber<T>>>,
    cursors: HashMap<(String, String), usize>,
}

impl<T> Default for Topics<T> {
    fn default() -> Self {
        Self {
            channels: HashMap::new(),
            cursors: HashMap::new(),
        }
    }
}

impl<T> Topics<T> {
    pub(crate) fn add(&mut self, channel: &str, subscriber: Subscriber<T>) {
        self.channels
            .entry(channel.to_string())
            .or_default()
            .push(subscriber);
    }

    fn live(&mut self, channel: &str) -> Option<&mut Vec<Subscriber<T>>> {
        let subscribers = self.channels.get_mut(channel)?;
        subscribers.retain(|subscriber| !subscriber.sink.is_closed());
        Some(subscribers)
    }

    /// Every ungrouped subscriber, plus one member of each group in turn.
    pub(crate) fn fan_out(&mut self, channel: &str) -> Vec<Sink<T>> {
        let Some(subscribers) = self.channels.get_mut(channel) else {
            return Vec::new();
        };
        subscribers.retain(|subscriber| !subscriber.sink.is_closed());

        let mut sinks = Vec::new();
        let mut groups: BTreeMap<&str, Vec<&Sink<T>>> = BTreeMap::new();
        for subscriber in subscribers.iter() {
            match subscriber.group.as_deref() {
                Some(group) => groups.entry(group).or_default().push(&subscriber.sink),
                None => sinks.push(subscriber.sink.clone()),
            }
        }
        for (group, members) in groups {
            let cursor = self
                .cursors
                .entry((channel.to_string(), group.to_string()))
                .or_default();
            sinks.push(members[*cursor % members.len()].clone());
            *cursor = cursor.wrapping_add(1);
        }
        sinks
    }

    /// A single responder for request/reply traffic, rotating across subscribers.
    pub(crate) fn pick_one(&mut self, channel: &str) -> Option<Sink<T>> {
        let len = self.live(channel).map_or(0, |subscribers| subscribers.len());
        if len == 0 {
            return None;
        }
        let cursor = self
            .cursors
            .entry((channel.to_string(), String::new()))
            .or_default();
        let index = *cursor % len;
        *cursor = cursor.wrapping_add(1);
        self.channels
            .get(channel)
            .map(|subscribers| subscribers[index].sink.clone())
    }

    /// Drops every subscription owned by `client`, ending its streams.
    pub(crate) fn drop_client(&mut self, client: u64) {
        for subscribers in self.channels.values_mut() {
            subscribers.retain(|subscriber| subscriber.client != client);
        }
    }

    /// Detaches every subscriber of `channel` and hands back their sinks.
    pub(crate) fn detach(&mut self, channel: &str) -> Vec<Sink<T>> {
        self.channels
            .remove(channel)
            .map(|subscribers| subscribers.into_iter().map(|s| s.sink).collect())
            .unwrap_or_default()
    }

    pub(crate) fn count(&mut self, channel: &str) -> usize {
        self.live(channel).map_or(0, |subscribers| subscribers.len())
    }
}
