//! Remote procedure layer over the device session.
//!
//! The [`RpcEndpoint`] serves a [`crate::device::DeviceSession`] as JSON over
//! HTTP; the [`RpcClient`] is its typed counterpart.

mod client;
mod endpoint;
pub mod images;
pub mod types;

pub use client::{DEFAULT_REQUEST_TIMEOUT, Reply, RpcClient};
pub use endpoint::{RpcEndpoint, router, serve};
pub use types::{Envelope, ImagePayload, RpcRequest, RpcResponse};
