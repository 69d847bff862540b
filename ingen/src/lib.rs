#![allow(clippy::new_without_default)]
//! # ingen
//!
//! The top-level umbrella crate: wires a [`ingen_graph::Store`], the root
//! graph, the three-thread event [`ingen_graph::Pipeline`], a
//! [`ingen_graph::Broadcaster`], [`ingen_graph::ControlBindings`] and an
//! [`ingen_graph::audio_backend::AudioBackend`] together into one
//! [`Engine`] handle, the way `knaster`'s top-level crate wires a
//! `knaster_graph::Graph` to a `knaster_graph::audio_backend::AudioBackend`
//! behind `knaster::Runner`.

mod engine;
mod options;

pub use engine::{Engine, EngineError};
pub use options::EngineOptions;
