//! Backchannel, an anonymous confession bot for chat platforms.
//!
//! The heart of the crate is the outbound delivery queue: priority-aware,
//! bounded-concurrency message dispatch with header/reply chaining and
//! retry on platform rate limits. The chat transport and the persistence
//! layer live behind ports (traits) so the queue can be driven against
//! mocks in tests.
//!
//! See `DESIGN.md` for the full architecture notes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod compose;
pub mod config;
pub mod logging;
pub mod queue;
pub mod store;
pub mod transport;
