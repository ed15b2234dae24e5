//! Foundational low-level utilities shared across Flowpilot crates.
//!
//! Provides crash-safe file helpers used by the conversation history store and
//! the wall-clock helper used to stamp chat messages.

pub mod atomic_io;
pub mod time_utils;

pub use atomic_io::{append_line, write_text_atomic};
pub use time_utils::current_unix_timestamp_ms;
