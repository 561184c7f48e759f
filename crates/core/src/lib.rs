//! Core domain layer for the qapi chain follower.
//!
//! This crate contains the byte-level SCALE reader, the tolerant runtime
//! metadata decoder, the extrinsic identifier, the transport port trait,
//! and the [`Qapi`](services::Qapi) facade that composes them. It follows
//! hexagonal architecture principles - this is the innermost layer; the
//! WebSocket transport lives in an adapter crate.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      qapi (binary)                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │                    qapi-transport                           │
//! │              (JSON-RPC over WebSocket)                      │
//! ├─────────────────────────────────────────────────────────────┤
//! │                     qapi-core  ← YOU ARE HERE               │
//! │   (reader, metadata, identity, models, ports, services)     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`reader`] - Byte cursor with SCALE primitives
//! - [`metadata`] - Tolerant metadata decoder (versions 14, 15, 16)
//! - [`identity`] - Extrinsic and event identification
//! - [`models`] - Pallet table, runtime info, head/block shapes
//! - [`ports`] - The [`RpcTransport`](ports::RpcTransport) interface
//! - [`services`] - The [`Qapi`](services::Qapi) facade and runtime probe
//! - [`error`] - Domain error types
//! - [`metrics`] - Metric definitions
//!
//! # Key Concepts
//!
//! ## Tolerant decoding
//!
//! Chains disagree on wrapper shapes and drift in record layouts across
//! metadata versions. The decoder recovers at three granularities -
//! per-type, per-pallet, per-wrapper-candidate - and degrades to
//! placeholders rather than failing, reporting everything it tolerated
//! as diagnostics. Setting the `QAPI_DEBUG` environment variable makes
//! the follower binary surface those diagnostics in its log output.
//!
//! ## Identification never fails
//!
//! [`decode_extrinsic_name`](services::Qapi::decode_extrinsic_name)
//! always produces non-empty `pallet` and `method` strings, tagging
//! degraded results with a [`reason`](identity::IdentityReason) instead
//! of erroring.

pub mod error;
pub mod identity;
pub mod metadata;
pub mod metrics;
pub mod models;
pub mod ports;
pub mod reader;
pub mod services;
