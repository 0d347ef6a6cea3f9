//! HTTP/WebSocket entry points: session endpoint, connection registry,
//! and the gateway tunnel.

pub mod connections;
pub mod gateway;
pub mod websocket;
