//! Redef Engine
//!
//! Scoped runtime method redefinition for building test doubles. The crate
//! provides:
//! - A dispatch-table object model: types opted into redefinition route
//!   every method call through an explicit, mutable name-to-implementation
//!   table instead of native virtual dispatch
//! - A type registry mapping path strings to type handles
//! - A redefinition engine that installs replacement behaviors for the
//!   duration of a block, records every invocation, and restores the
//!   original bindings on every exit path
//! - A temporary visibility override for exercising non-public methods

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod engine;
pub mod locator;
pub mod object;
pub mod recorder;
pub mod registry;
pub mod value;
pub mod visibility;

pub use engine::{Redef, ReplacementBehavior, Session};
pub use locator::{Descriptor, MethodLocator, Target};
pub use object::{
    Arity, Instance, MethodDef, MethodFn, MethodScope, ObjectRef, Receiver, TypeDef, TypeHandle,
    Visibility,
};
pub use recorder::{CallRecorder, RecorderView};
pub use registry::TypeRegistry;
pub use value::{BlockFn, Value};

/// Redefinition errors
#[derive(Debug, thiserror::Error)]
pub enum RedefError {
    /// A descriptor did not resolve to an existing method. Raised during
    /// batch validation, before any dispatch table is touched.
    #[error("no method found for {0}")]
    NameResolution(String),

    /// A short-name or omitted-descriptor lookup matched zero or more than
    /// one active descriptor.
    #[error("ambiguous name: {0}")]
    AmbiguousName(String),

    /// The same descriptor appeared twice in one redefinition batch.
    #[error("duplicate redefinition target: {0}")]
    DuplicateTarget(String),

    /// Dispatch found no entry for the requested name.
    #[error("no such method: {0}")]
    NoSuchMethod(String),

    /// Dispatch reached an entry that is not publicly visible.
    #[error("method {0} is not public")]
    MethodNotVisible(String),
}

/// Redefinition result
pub type RedefResult<T> = Result<T, RedefError>;
