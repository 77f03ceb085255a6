//! MeshMind detector boundary
//!
//! A stable C ABI for mesh feature detection and refinement export. The
//! detection work itself happens in an engine behind the [`engine`] traits;
//! this crate owns the handle lifecycle, parameter policy, result marshaling
//! and error reporting around it.
//!
//! # Layers
//!
//! - [`ffi`]: `extern "C"` functions and the `#[repr(C)]` detection record.
//! - [`session`]: the safe per-handle core. Rust callers can use it directly.
//! - [`context`]: the process-wide engine runtime shared by all handles.
//! - [`engine`]: engine traits, the registry, and the `process` and `stub` engines.
//! - [`error`], [`config`], [`logging`]: ambient plumbing.
//!
//! # Workflow
//!
//! create → load target → add templates → detect → export (dictionary, case,
//! sizing field) → destroy.

pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod ffi;
pub mod logging;
pub mod session;

pub use config::{EngineConfig, ProcessSettings};
pub use engine::{EngineDetection, EngineRegistry, EngineRuntime, EngineSession};
pub use error::{Failure, FailureKind, SchemaMismatch};
pub use ffi::MeshMindDetection;
pub use session::{Session, SessionState};

/// Library version reported by `meshmind_version` and to engines at handshake.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
