//! Paths, symbols and URIs — spec.md §3 "URI and Path".
//!
//! `EcoString` (already a dependency via the teacher workspace) gives cheap
//! clones for identifiers that get copied into every event and every
//! Broadcaster message.

use ecow::EcoString;

/// A path segment matching `[A-Za-z_][A-Za-z0-9_]*`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Symbol(EcoString);
impl Symbol {
    /// Validates and wraps a path segment. Returns `None` if `s` is not a
    /// legal symbol (empty, starts with a digit, or contains anything but
    /// ASCII alphanumerics/underscore).
    pub fn new(s: impl AsRef<str>) -> Option<Self> {
        let s = s.as_ref();
        let mut chars = s.chars();
        let first = chars.next()?;
        if !(first.is_ascii_alphabetic() || first == '_') {
            return None;
        }
        if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return None;
        }
        Some(Self(EcoString::from(s)))
    }
    pub fn as_str(&self) -> &str {
        &self.0
    }
}
impl core::fmt::Display for Symbol {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An absolute path of the form `/seg1/seg2/...`. The root path is `/`.
///
/// Paths map bijectively to a subset of URIs: a `Path` is its own URI string
/// once prefixed with the engine's base URI, but within the engine paths are
/// the primary identifier and URIs are only used for Atom keys / plugin
/// identifiers.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Path(EcoString);
impl Path {
    pub const ROOT: &'static str = "/";

    pub fn root() -> Self {
        Self(EcoString::from("/"))
    }
    pub fn is_root(&self) -> bool {
        self.0.as_str() == "/"
    }
    /// Builds `parent / symbol`, the only legal way to construct a non-root
    /// path (spec.md §3 invariant 1: "paths match `parent.path / symbol`").
    pub fn child(&self, symbol: &Symbol) -> Self {
        if self.is_root() {
            Self(EcoString::from(format!("/{symbol}")))
        } else {
            Self(EcoString::from(format!("{}/{symbol}", self.0)))
        }
    }
    /// The symbol of this path (its final segment), or `None` for the root.
    pub fn symbol(&self) -> Option<Symbol> {
        if self.is_root() {
            return None;
        }
        let last = self.0.rsplit('/').next().unwrap_or_default();
        Symbol::new(last)
    }
    /// The parent path, or `None` if this is the root.
    pub fn parent(&self) -> Option<Path> {
        if self.is_root() {
            return None;
        }
        let trimmed = &self.0[..self.0.rfind('/').unwrap_or(0)];
        Some(if trimmed.is_empty() {
            Path::root()
        } else {
            Path(EcoString::from(trimmed))
        })
    }
    /// True if `self` names an object directly or transitively owned by `other`.
    pub fn is_descendant_of(&self, other: &Path) -> bool {
        if other.is_root() {
            return !self.is_root();
        }
        self.0.starts_with(other.0.as_str())
            && self.0.as_bytes().get(other.0.len()) == Some(&b'/')
    }
    pub fn as_str(&self) -> &str {
        &self.0
    }
    /// Parses a `/`-separated path, validating every segment is a legal
    /// [`Symbol`]. Returns `None` on malformed input.
    pub fn parse(s: impl AsRef<str>) -> Option<Self> {
        let s = s.as_ref();
        if s == "/" {
            return Some(Self::root());
        }
        if !s.starts_with('/') {
            return None;
        }
        for seg in s[1..].split('/') {
            Symbol::new(seg)?;
        }
        Some(Self(EcoString::from(s)))
    }
}
impl core::fmt::Display for Path {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An absolute URI identifier. Plugin identifiers and Atom property keys are
/// URIs; most live objects are addressed by [`Path`] instead, which is
/// cheaper to match against a Store prefix.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Uri(EcoString);
impl Uri {
    pub fn new(s: impl AsRef<str>) -> Self {
        Self(EcoString::from(s.as_ref()))
    }
    pub fn as_str(&self) -> &str {
        &self.0
    }
}
impl core::fmt::Display for Uri {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl From<&str> for Uri {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_validation() {
        assert!(Symbol::new("gain_1").is_some());
        assert!(Symbol::new("_hidden").is_some());
        assert!(Symbol::new("1gain").is_none());
        assert!(Symbol::new("has space").is_none());
        assert!(Symbol::new("").is_none());
    }

    #[test]
    fn path_child_and_parent() {
        let root = Path::root();
        let g = root.child(&Symbol::new("g").unwrap());
        assert_eq!(g.as_str(), "/g");
        let a = g.child(&Symbol::new("a").unwrap());
        assert_eq!(a.as_str(), "/g/a");
        assert_eq!(a.parent(), Some(g.clone()));
        assert_eq!(a.symbol().unwrap().as_str(), "a");
        assert_eq!(g.parent(), Some(root));
    }

    #[test]
    fn path_descendant() {
        let g = Path::parse("/g").unwrap();
        let a = Path::parse("/g/a").unwrap();
        let other = Path::parse("/h").unwrap();
        assert!(a.is_descendant_of(&g));
        assert!(!g.is_descendant_of(&a));
        assert!(!other.is_descendant_of(&g));
    }

    #[test]
    fn path_parse_rejects_malformed() {
        assert!(Path::parse("no/leading/slash").is_none());
        assert!(Path::parse("/bad seg").is_none());
        assert!(Path::parse("/").is_some());
    }
}
