// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Identifier generation.

use std::collections::VecDeque;
use std::sync::Mutex;

/// Source of identifiers for newly created entities.
pub trait IdGenerator: Send + Sync {
    /// Produce a fresh identifier.
    fn new_id(&self) -> String;
}

/// Random v4 UUIDs.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn new_id(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

/// Hands out a fixed list of identifiers in order.
///
/// Once the list is exhausted it falls back to `"generated-<n>"` so callers
/// never observe a duplicate.
#[derive(Debug)]
pub struct SequenceIdGenerator {
    ids: Mutex<VecDeque<String>>,
    fallback: Mutex<u64>,
}

impl SequenceIdGenerator {
    /// Generator returning `ids` in order.
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ids: Mutex::new(ids.into_iter().map(Into::into).collect()),
            fallback: Mutex::new(0),
        }
    }
}

impl IdGenerator for SequenceIdGenerator {
    fn new_id(&self) -> String {
        let next = self
            .ids
            .lock()
            .ok()
            .and_then(|mut ids| ids.pop_front());
        if let Some(id) = next {
            return id;
        }

        let mut counter = self.fallback.lock().unwrap_or_else(|e| e.into_inner());
        *counter += 1;
        format!("generated-{}", counter)
    }
}
