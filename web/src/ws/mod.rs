//! WebSocket HTTP handler for the web layer.

pub mod handler;
