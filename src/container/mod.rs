//! Container orchestration for the RPC endpoint.
//!
//! The endpoint runs inside a container image that carries the camera SDK.
//! This module decides how that container runs and manages its lifetime:
//!
//! ```text
//! ┌──────────────┐   detect   ┌────────────┐  inspect/build ┌──────────┐
//! │ detect       │ ─────────▶ │ Strategy   │ ─────────────▶ │ image    │
//! │ (runtime,GPU)│            │ accel/soft │                │ ready    │
//! └──────────────┘            └────────────┘                └────┬─────┘
//!                                                                │ create+start
//!                       ┌───────────┐   TCP poll   ┌─────────────▼──┐
//!                       │ Running   │ ◀─────────── │ Launching      │
//!                       └─────┬─────┘              └────────────────┘
//!                             │ stop (kill on timeout)
//!                             ▼
//!                          Stopped
//! ```
//!
//! Image, container and daemon calls go through a [`ContainerRuntime`]
//! ([`DockerRuntime`] on the Engine API). Build scripts and host checks run
//! through a [`CommandRunner`].

mod controller;
pub mod detect;
mod error;
mod port;
mod process;
mod runtime;
mod spec;

pub use controller::{
    ContainerHandle, ContainerLifecycleController, ControllerConfig, ControllerState, ServerInfo,
    Teardown, find_build_script,
};
pub use error::{ContainerError, Result};
pub use port::{PORT_SCAN_SPAN, find_available_port};
pub use process::{CommandRunner, CommandSpec, ProcessError, ProcessOutput, TokioCommandRunner};
pub use runtime::{ContainerRuntime, DockerRuntime, RuntimeError};
pub use spec::{
    ContainerLaunchSpec, GPU_RUNTIME, ImageProfile, Mount, Strategy, StrategyMode,
    resolve_strategy,
};
