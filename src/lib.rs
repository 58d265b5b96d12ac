//! chat-delivery — the local message lifecycle engine of a streaming chat
//! frontend.
//!
//! Takes a user-composed draft, drives it through content-dependent
//! preconditions (asset upload completion), sends it over a request/stream
//! channel, and reconciles optimistic local state with asynchronous server
//! events. Every send resolves exactly once: success, failure, or timeout,
//! whichever signal arrives first.
//!
//! See `DESIGN.md` for architecture notes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod bus;
pub mod channel;
pub mod config;
pub mod error;
pub mod logging;
pub mod presend;
pub mod service;
pub mod trace;
pub mod types;
