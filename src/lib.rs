// SPDX-FileCopyrightText: 2026 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! HTTP intercepting reverse proxy with live event streaming.
//!
//! This library provides the core functionality for inspect-http: the proxy
//! listener that forwards traffic to an upstream origin, the event hub that
//! fans captured exchanges out to inspection clients, and the management
//! listener that streams them as newline-delimited JSON.

pub mod config;
pub mod connection;
pub mod event;
pub mod hub;
pub mod manage;
pub mod proxy;
pub mod serde_helpers;


// Keep library small; main.rs remains the binary entrypoint.
