//! WebSocket JSON-RPC transport adapter.
//!
//! Implements the [`RpcTransport`](qapi_core::ports::RpcTransport) port
//! over a single WebSocket connection: requests are multiplexed by
//! monotonically increasing integer ids, notifications are routed to
//! their subscription's channel, and an unexpected close triggers
//! reconnection with exponential backoff (pending requests fail fast
//! with `TransportClosed`; the caller re-subscribes).

mod client;

pub use client::{WsTransport, WsTransportConfig};
