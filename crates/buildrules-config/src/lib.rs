//! Parse and validate buildrules configuration, credential and installed-state documents.

pub mod auth;
pub mod conda;
pub mod document;
pub mod image;
pub mod settings;
pub mod state;

pub use document::ConfigError;
pub use settings::{BuilderPaths, GlobalOptions, Settings};
pub use state::{StateError, StateMap, StateRecord, StateStore};
