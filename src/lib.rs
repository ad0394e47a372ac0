//! depthcam-rpc: remote access to a depth camera.
//!
//! The camera is served by an RPC endpoint process ([`rpc::RpcEndpoint`])
//! that owns one [`device::DeviceSession`]. The endpoint normally runs inside
//! a container managed by [`container::ContainerLifecycleController`];
//! [`combined::CombinedSession`] ties the container and an [`rpc::RpcClient`]
//! together so the container is always torn down.
//!
//! ```text
//!  host                                   container
//! ┌────────────────────────────┐         ┌─────────────────────────────┐
//! │ CombinedSession            │  HTTP   │ RpcEndpoint                 │
//! │  ├─ RpcClient  ────────────┼────────▶│  └─ DeviceSession           │
//! │  └─ ContainerLifecycle ────┼─docker─▶│      ├─ Driver (hw | sim)   │
//! │     Controller             │         │      ├─ FrameCache          │
//! └────────────────────────────┘         │      └─ auto-capture task   │
//!                                        └─────────────────────────────┘
//! ```

pub mod cli;
pub mod combined;
pub mod config;
pub mod container;
pub mod device;
pub mod error;
pub mod rpc;
pub mod testing;
