// SPDX-FileCopyrightText: 2026 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! The captured exchange record and its process-scoped id sequence.

use hyper::HeaderMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// One half of an observed exchange: a body plus its headers.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ExchangeData {
    pub body: String,
    #[serde(
        serialize_with = "crate::serde_helpers::serialize_headers",
        deserialize_with = "crate::serde_helpers::deserialize_headers",
        default
    )]
    pub headers: HeaderMap,
}

/// One observed request/response exchange, broadcast to inspection clients.
///
/// An event is created once per intercepted request and written exactly twice:
/// the request half at capture time, the response half (and `code`) when the
/// upstream call completes. It is only handed to the hub after both halves are
/// filled in, so subscribers never see `code == 0`. Post-broadcast the event
/// is shared read-only behind an `Arc` and never mutated again.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct IOEvent {
    pub id: u64,
    pub url: String,
    pub code: u16,
    pub request: ExchangeData,
    pub response: ExchangeData,
}

impl IOEvent {
    /// Start an event in its capture phase: request half filled, response
    /// half empty, `code` zero until [`complete`](Self::complete) runs.
    pub fn captured(id: u64, url: String, body: String, headers: HeaderMap) -> Self {
        Self {
            id,
            url,
            code: 0,
            request: ExchangeData { body, headers },
            response: ExchangeData::default(),
        }
    }

    /// Fill in the response half. Must run before the event is broadcast.
    pub fn complete(&mut self, code: u16, body: String, headers: HeaderMap) {
        self.code = code;
        self.response = ExchangeData { body, headers };
    }
}

/// Monotonic event id source, shared across all proxied requests.
///
/// Process-scoped state: starts at zero on process start, is never persisted,
/// and ids are never reused. The first id handed out is 1.
#[derive(Debug, Default)]
pub struct EventSequence {
    count: AtomicU64,
}

impl EventSequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve and return the next id. Strictly increasing across threads.
    pub fn next_id(&self) -> u64 {
        self.count.fetch_add(1, Ordering::Relaxed) + 1
    }
}
