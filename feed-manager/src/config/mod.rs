//! Service configuration
//!
//! Settings are layered from config files and environment variables; every
//! field has a serde default so the service runs with no files present.

mod settings;

pub use settings::*;
