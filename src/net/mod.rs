//! Network boundary: request/response snapshots and the fetch transport.

mod client;
mod types;

pub use client::{HttpTransport, Transport};
pub use types::{Headers, Request, RequestMode, Response};
