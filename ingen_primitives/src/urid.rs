//! The process-wide URI↔integer interner (spec.md §3 "URID", §6 "URID map").
//!
//! Grounded on the same "intern once, pass a cheap integer everywhere after"
//! shape as `knaster_primitives`' `Size`/typenum plumbing: a small sync type
//! that every thread can read from without taking a write lock in the common
//! case.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::Uri;

/// An interned URI. Two `Urid`s are equal iff they were interned from equal
/// URI strings.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Urid(u32);
impl Urid {
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

/// An injective URI ↔ u32 map, shared process-wide. Plugin `features` (see
/// spec.md §6 "PluginHost") hand out a reference to this map so plugins can
/// intern their own vocabulary URIs.
#[derive(Default)]
pub struct UridMap {
    inner: RwLock<UridMapInner>,
}
#[derive(Default)]
struct UridMapInner {
    forward: HashMap<Uri, Urid>,
    backward: Vec<Uri>,
}
impl UridMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns `uri`, returning its (possibly newly assigned) `Urid`. Never
    /// fails and is idempotent.
    pub fn map(&self, uri: &Uri) -> Urid {
        if let Some(urid) = self.inner.read().unwrap().forward.get(uri) {
            return *urid;
        }
        let mut inner = self.inner.write().unwrap();
        // Re-check under the write lock: another thread may have raced us.
        if let Some(urid) = inner.forward.get(uri) {
            return *urid;
        }
        let urid = Urid(inner.backward.len() as u32);
        inner.backward.push(uri.clone());
        inner.forward.insert(uri.clone(), urid);
        urid
    }

    /// Looks up the URI behind an already-interned `Urid`, if any.
    pub fn unmap(&self, urid: Urid) -> Option<Uri> {
        self.inner
            .read()
            .unwrap()
            .backward
            .get(urid.0 as usize)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_is_injective_and_idempotent() {
        let map = UridMap::new();
        let a = map.map(&Uri::new("http://example.org/a"));
        let b = map.map(&Uri::new("http://example.org/b"));
        let a2 = map.map(&Uri::new("http://example.org/a"));
        assert_eq!(a, a2);
        assert_ne!(a, b);
        assert_eq!(map.unmap(a), Some(Uri::new("http://example.org/a")));
    }
}
