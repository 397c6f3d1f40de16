//! Shared terminal UI pieces.

pub mod error;

pub use error::{render_alert, ErrorScreen};
