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

//! Lock-free cursor over a fixed number of targets.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Round-robin index selector shared by concurrent dispatch tasks.
#[derive(Debug)]
pub struct RoundRobin {
    index: AtomicUsize,
    length: usize,
}

impl RoundRobin {
    /// Creates a cursor over `length` slots.
    ///
    /// # Panics
    ///
    /// Panics when `length` is zero; callers build one only over a non-empty target list.
    pub fn new(length: usize) -> Self {
        assert!(length > 0, "round robin requires at least one slot");
        Self {
            index: AtomicUsize::new(0),
            length,
        }
    }

    /// Returns the current index and advances the cursor with wraparound.
    pub fn next(&self) -> usize {
        let length = self.length;
        match self
            .index
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |index| {
                Some((index + 1) % length)
            }) {
            Ok(previous) | Err(previous) => previous,
        }
    }
}
