//! Inventory service RPC layer
//!
//! The agent only talks to the server through the `InventoryRpc` trait so
//! the reconciler, dispatcher and update pipeline can run against a fake.

mod http;
mod traits;

#[cfg(test)]
pub mod fake;

pub use http::HttpRpcClient;
pub use traits::{ByteStream, InventoryRpc};
