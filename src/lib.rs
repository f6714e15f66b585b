//! Packages serverless function sources into deployable artifacts.
//!
//! Given a function's main file and its dependency closure, the crate
//! produces either an expanded directory or a single deterministic archive
//! (zip or tar.zst) whose root holds a generated entry file the runtime can
//! load.
//!
//! - **Layout** - path normalization, conflict detection and the user
//!   namespace decision
//! - **Entry synthesis** - entry and telemetry loader content behind a trait
//! - **Artifact builders** - directory and archive output with bounded I/O
//! - **Preflight checks** - request validation before any side effects
//!
//! # Architecture
//!
//! ```text
//! PackagingRequest
//!     │
//!     ├── layout::conflict   decide namespace + whether an entry is needed
//!     ├── entry              synthesize entry / telemetry files
//!     ├── bootstrap          inject bootstrap module (runtime API v2)
//!     ├── layout             normalize, alias, dedupe, reject collisions
//!     │
//!     └── artifact
//!           ├── directory    copy pass, then symlink pass
//!           └── archive      concurrent stat, ordered append, atomic rename
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use function_packager::artifact::{package_all, PackContext};
//! use function_packager::pipeline::load_build_config;
//!
//! let config = load_build_config("build.toml".as_ref())?;
//! let results = package_all(config.requests, config.mode, &PackContext::new()).await;
//! ```

pub mod artifact;
pub mod bootstrap;
pub mod entry;
pub mod error;
pub mod layout;
pub mod pipeline;
pub mod preflight;
pub mod request;
pub mod stat_cache;

pub use artifact::{package, package_all, PackContext, PackagedFunction};
pub use error::{PackError, PackResult};
pub use request::{
    ArchiveFormat, FeatureFlags, ModuleFormat, PackagingMode, PackagingRequest, RuntimeApiVersion,
};
