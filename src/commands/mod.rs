//! Application command handlers for depthcap.
//!
//! # Commands
//! - `record`: Interactive capture with live preview (default)
//! - `capture`: Headless capture for a fixed time
//! - `history`: Export history viewer
//! - `open`: Open a previous export with the system viewer
//! - `sessions`: List session folders with their point counts
//! - `config`: Edit, validate or print the configuration file
//! - `logs`: Display recent log entries

pub mod capture;
pub mod config;
pub mod history;
pub mod logs;
pub mod open;
pub mod record;
pub mod sessions;

pub use capture::handle_capture;
pub use config::{handle_config, ConfigAction};
pub use history::handle_history;
pub use logs::handle_logs;
pub use open::handle_open;
pub use record::handle_record;
pub use sessions::handle_sessions;
