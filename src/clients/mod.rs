//! HTTP clients for the external services the queue depends on.
//!
//! The catalog resolver hands out stream URLs; the remote queue service runs
//! downloads in delegated mode. Both sit behind traits so they can be faked.

mod models;
mod remote_queue;
mod resolver;

pub use models::*;
pub use remote_queue::{RemoteQueueApi, RemoteQueueClient};
pub use resolver::{CatalogResolverClient, StreamResolver};
