//! Test harness utilities for session testing.
//!
//! Provides an in-process tick server with scriptable upgrade behavior and
//! a recording observer for asserting on session lifecycle events.

#![allow(dead_code)]

mod observer;
mod server;

pub use observer::RecordingObserver;
pub use server::{ServerMode, TickServer};
