//! Configuration management for depthcap.
//!
//! Loads the TOML configuration stored in the user's config
//! directory and resolves the paths derived from it.

pub mod file;

pub use file::{
    data_dir, expand_home, get_config_path, CaptureConfig, DepthcapConfig, ExportConfig,
    SourceKind, SourceSection,
};
