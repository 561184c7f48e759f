//! Core services: the user-facing facade and the runtime probe.

mod client;
mod probe;

pub use client::{
    BlockRef, HeadSubscription, MetadataOverrides, MetadataParser, Overrides, Qapi, QapiConfig,
    SignatureOverride,
};
pub use probe::fetch_runtime_info;
