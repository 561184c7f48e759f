//! Interface traits for adapters to implement.

mod transport;

pub use transport::{NotificationStream, RpcSubscription, RpcTransport, UnsubscribeFuture};
