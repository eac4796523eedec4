//! SSE HTTP handler for the web layer.
//!
//! This module contains only the Axum handler for SSE endpoints.
//! Sessions, framing and the connection registry live in the `sse` crate.

pub mod handler;
