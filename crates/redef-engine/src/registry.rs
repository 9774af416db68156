//! Type registry
//!
//! Maps path strings to type handles. Redefinition targets written as
//! strings (`"Store::Gizmo#poke"`) resolve their path component against a
//! registry populated at startup; there is no reflective namespace walking.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::object::{TypeDef, TypeHandle};
use crate::{RedefError, RedefResult};

/// Namespace separator in registration paths
pub const PATH_SEPARATOR: &str = "::";

/// Registry of redefinable types, keyed by full path
#[derive(Default)]
pub struct TypeRegistry {
    types: RefCell<FxHashMap<String, TypeHandle>>,
    next_type_id: Cell<usize>,
}

impl TypeRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a type under `path`, or return the existing handle if the
    /// path is already registered. Paths are `::`-separated chains of
    /// non-empty segments.
    pub fn register(&self, path: &str) -> TypeHandle {
        debug_assert!(
            !path.is_empty() && path.split(PATH_SEPARATOR).all(|seg| !seg.is_empty()),
            "invalid type path: {path:?}"
        );
        if let Some(existing) = self.types.borrow().get(path) {
            return existing.clone();
        }
        let id = self.next_type_id.get();
        self.next_type_id.set(id + 1);
        let handle: TypeHandle = Rc::new(TypeDef::new(id, path.to_string()));
        self.types
            .borrow_mut()
            .insert(path.to_string(), handle.clone());
        handle
    }

    /// Look up a registered type by path
    pub fn lookup(&self, path: &str) -> Option<TypeHandle> {
        self.types.borrow().get(path).cloned()
    }

    /// Look up a registered type by path, failing with a name-resolution
    /// error for unknown paths
    pub fn resolve_path(&self, path: &str) -> RedefResult<TypeHandle> {
        self.lookup(path)
            .ok_or_else(|| RedefError::NameResolution(format!("unknown type path {path}")))
    }

    /// Number of registered types
    pub fn len(&self) -> usize {
        self.types.borrow().len()
    }

    /// Check whether no types are registered
    pub fn is_empty(&self) -> bool {
        self.types.borrow().is_empty()
    }
}
