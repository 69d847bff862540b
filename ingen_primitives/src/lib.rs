//! # ingen_primitives
//!
//! Foundational, dependency-light types shared by every other crate in the
//! workspace: frame-accurate time, the path/URI identifier scheme, the
//! process-wide URID interner, and the `Atom` tagged value used for port
//! values and object properties.
//!
//! ## Codebase conventions
//!
//! - Nothing in this crate touches threads, locks, or the Store; it only
//!   defines values.
//! - Unlike the teacher crate this is derived from, this workspace targets a
//!   hosted audio server rather than an embedded target, so the no_std/alloc
//!   duality was dropped in favor of plain `std`.

mod atom;
mod buffer_view;
mod time;
mod uri;
mod urid;

pub use atom::*;
pub use buffer_view::*;
pub use time::*;
pub use uri::*;
pub use urid::*;
