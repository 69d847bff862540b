//! The tagged value type used for port values and object properties
//! (spec.md §3 "Atom").
//!
//! The incremental builder shape (`AtomBuilder`: push typed fields, then
//! `finish()` into an immutable `Atom::Object`) is grounded on
//! `original_source/src/Forge.cpp`, which builds LV2 atoms the same way:
//! primitives are forged directly, objects are forged as a header followed
//! by a sequence of properties.

use std::collections::BTreeMap;

use crate::{Path, Urid};

/// The graph-context scope of an object property, distinguishing state that
/// is intrinsic to a block from state that is only a view-layer annotation
/// (spec.md §3 "Atom").
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum AtomScope {
    /// Intrinsic state, part of the object's identity.
    #[default]
    Default,
    /// Internal to the engine, not meant to be serialized to clients.
    Internal,
    /// A view/GUI-only annotation (e.g. canvas position).
    External,
}

/// A tagged value: the unit of port values, property values, and
/// atom-sequence event bodies.
#[derive(Clone, Debug, PartialEq)]
pub enum Atom {
    Int(i32),
    Float(f32),
    Bool(bool),
    String(String),
    Uri(crate::Uri),
    Urid(Urid),
    Path(Path),
    /// A property bag mapping URI keys to `(scope, value)` pairs.
    Object(BTreeMap<crate::Uri, (AtomScope, Atom)>),
}
impl Atom {
    pub fn as_float(&self) -> Option<f32> {
        match self {
            Atom::Float(f) => Some(*f),
            Atom::Int(i) => Some(*i as f32),
            Atom::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }
    pub fn as_int(&self) -> Option<i32> {
        match self {
            Atom::Int(i) => Some(*i),
            Atom::Float(f) => Some(*f as i32),
            Atom::Bool(b) => Some(*b as i32),
            _ => None,
        }
    }
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Atom::Bool(b) => Some(*b),
            Atom::Int(i) => Some(*i != 0),
            _ => None,
        }
    }
    pub fn as_object(&self) -> Option<&BTreeMap<crate::Uri, (AtomScope, Atom)>> {
        match self {
            Atom::Object(map) => Some(map),
            _ => None,
        }
    }
    /// True if `self` and `other` are the same Atom variant (ignoring
    /// payload), used by port type-compatibility checks when a control port
    /// is fed a `SetPortValue` of the wrong kind.
    pub fn same_kind(&self, other: &Atom) -> bool {
        core::mem::discriminant(self) == core::mem::discriminant(other)
    }
}

/// Incrementally builds an `Atom::Object`, mirroring the forge-header /
/// forge-property shape of `Forge.cpp`.
#[derive(Default)]
pub struct AtomBuilder {
    props: BTreeMap<crate::Uri, (AtomScope, Atom)>,
}
impl AtomBuilder {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn put(mut self, key: crate::Uri, value: Atom) -> Self {
        self.props.insert(key, (AtomScope::Default, value));
        self
    }
    pub fn put_scoped(mut self, key: crate::Uri, value: Atom, scope: AtomScope) -> Self {
        self.props.insert(key, (scope, value));
        self
    }
    pub fn finish(self) -> Atom {
        Atom::Object(self.props)
    }
}
