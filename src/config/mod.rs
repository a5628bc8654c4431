//! Configuration and constants
//!
//! - [`defaults`] - Hard-coded tuning constants
//! - [`settings`] - Environment-driven runtime settings

pub mod defaults;
pub mod settings;

pub use settings::Settings;
