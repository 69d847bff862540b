//! # ingen_core
//!
//! The trait contracts every block implementation (internal or
//! plugin-hosted) satisfies, the engine-wide `Status` error codes
//! (spec.md §7), and the built-in internal plugins (spec.md §3 "Plugin").
//!
//! `ingen_graph` is the only crate that drives these traits on the audio
//! thread; this crate just defines them plus a handful of implementations
//! that don't need an external plugin host.

pub mod log;
mod plugin;
mod status;

pub mod internal_plugins;

pub use plugin::*;
pub use status::*;
