//! HTTP API Module
//!
//! Provides the HTTP endpoints and the writer WebSocket channel.

mod http;
mod ws;

pub use http::{AppState, HttpServer};
