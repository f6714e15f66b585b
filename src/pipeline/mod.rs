//! Build-file loading: TOML config to packaging requests.

pub mod config;
pub(crate) mod sources;

pub use config::{load_build_config, BuildConfig};
