//! Event completion status codes, spec.md §7.

use ingen_primitives::Path;
use thiserror::Error;

/// Identifies the object the failure is about, when one is known. Carried
/// alongside every non-`Success` [`Status`] so `post_process` can report
/// "what" failed to the originating client, not just the error class.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Blame {
    Path(Path),
    Uri(ingen_primitives::Uri),
    None,
}
impl From<Path> for Blame {
    fn from(value: Path) -> Self {
        Blame::Path(value)
    }
}
impl From<ingen_primitives::Uri> for Blame {
    fn from(value: ingen_primitives::Uri) -> Self {
        Blame::Uri(value)
    }
}

/// Every mutation event completes with one of these codes (spec.md §7).
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Status {
    #[error("success")]
    Success,
    #[error("object not found")]
    NotFound,
    #[error("object already exists")]
    Exists,
    #[error("parent graph not found")]
    ParentNotFound,
    #[error("tail and head do not share an enclosing graph")]
    ParentDiffers,
    #[error("port not found")]
    PortNotFound,
    #[error("plugin or prototype not found")]
    PrototypeNotFound,
    #[error("invalid polyphony value or conflicting polyphony request")]
    InvalidPoly,
    #[error("invalid port index")]
    InvalidPortIndex,
    #[error("unsupported or malformed type")]
    BadType,
    #[error("port types are not connectable")]
    TypeMismatch,
    #[error("connection would create a cycle")]
    Cycle,
    #[error("block instantiation failed")]
    CreationFailed,
    #[error("malformed request")]
    BadRequest,
    #[error("internal engine error")]
    InternalError,
}
impl Status {
    pub fn is_success(&self) -> bool {
        matches!(self, Status::Success)
    }
}
