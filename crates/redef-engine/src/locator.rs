//! Descriptor resolution
//!
//! Turns caller-supplied target designations into concrete
//! (owner, scope, name) descriptors and validates that they name existing
//! methods before the engine mutates anything.
//!
//! String targets follow the grammar `<Path>('#'|'.')<method>`: `#` binds
//! the instance scope, `.` the singleton scope, and `Path` resolves against
//! the type registry. Explicit pairs bind a type handle to its singleton
//! scope, or a live instance to its runtime type's instance scope.

use std::fmt;
use std::hash::{Hash, Hasher};

use crate::object::{MethodScope, ObjectRef, TypeHandle};
use crate::registry::TypeRegistry;
use crate::{RedefError, RedefResult};

/// Caller-facing designation of a redefinition target
#[derive(Clone)]
pub enum Target {
    /// `"Path#method"` or `"Path.method"`, resolved against the registry
    Path(String),
    /// A type handle plus method name; binds the singleton scope
    Type(TypeHandle, String),
    /// A live instance plus method name; binds its runtime type's instance
    /// scope
    Object(ObjectRef, String),
}

impl Target {
    /// Convenience constructor for string targets
    pub fn path(s: impl Into<String>) -> Self {
        Target::Path(s.into())
    }
}

impl From<&str> for Target {
    fn from(s: &str) -> Self {
        Target::Path(s.to_string())
    }
}

/// A resolved redefinition target: one method on one owner scope
#[derive(Clone)]
pub struct Descriptor {
    owner: TypeHandle,
    scope: MethodScope,
    name: String,
}

impl Descriptor {
    pub(crate) fn new(owner: TypeHandle, scope: MethodScope, name: String) -> Self {
        Self { owner, scope, name }
    }

    /// The owning type
    pub fn owner(&self) -> &TypeHandle {
        &self.owner
    }

    /// Which of the owner's dispatch tables the descriptor targets
    pub fn scope(&self) -> MethodScope {
        self.scope
    }

    /// The method-name component
    pub fn method_name(&self) -> &str {
        &self.name
    }

    /// Canonical display form: `Path#name` or `Path.name`
    pub fn canonical(&self) -> String {
        self.owner.display_method(self.scope, &self.name)
    }
}

impl PartialEq for Descriptor {
    fn eq(&self, other: &Descriptor) -> bool {
        self.owner.id() == other.owner.id() && self.scope == other.scope && self.name == other.name
    }
}

impl Eq for Descriptor {}

impl Hash for Descriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.owner.id().hash(state);
        self.scope.hash(state);
        self.name.hash(state);
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical())
    }
}

impl fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Descriptor({})", self.canonical())
    }
}

/// Resolves targets against a type registry
pub struct MethodLocator<'a> {
    registry: &'a TypeRegistry,
}

impl<'a> MethodLocator<'a> {
    /// Create a locator over `registry`
    pub fn new(registry: &'a TypeRegistry) -> Self {
        Self { registry }
    }

    /// Resolve a target to a descriptor
    pub fn resolve(&self, target: &Target) -> RedefResult<Descriptor> {
        match target {
            Target::Path(spec) => {
                let (path, scope, name) = parse_path_target(spec)?;
                let owner = self.registry.resolve_path(path)?;
                Ok(Descriptor::new(owner, scope, name.to_string()))
            }
            Target::Type(ty, name) => Ok(Descriptor::new(
                ty.clone(),
                MethodScope::Singleton,
                name.clone(),
            )),
            Target::Object(obj, name) => Ok(Descriptor::new(
                obj.ty().clone(),
                MethodScope::Instance,
                name.clone(),
            )),
        }
    }

    /// Validate that the descriptor names an existing method in its owner
    /// scope's full method set, at any visibility. Must pass for every
    /// descriptor in a batch before any installation proceeds.
    pub fn validate(&self, descriptor: &Descriptor) -> RedefResult<()> {
        if descriptor
            .owner()
            .has_method(descriptor.scope(), descriptor.method_name())
        {
            Ok(())
        } else {
            Err(RedefError::NameResolution(descriptor.canonical()))
        }
    }

    /// Match a bare method name against the active descriptors. Succeeds
    /// only when exactly one descriptor's method-name component matches.
    pub fn resolve_short_name<'d>(
        active: &'d [Descriptor],
        short: &str,
    ) -> RedefResult<&'d Descriptor> {
        let mut matches = active.iter().filter(|d| d.method_name() == short);
        match (matches.next(), matches.next()) {
            (Some(descriptor), None) => Ok(descriptor),
            (Some(_), Some(_)) => Err(RedefError::AmbiguousName(format!(
                "{short} matches more than one active descriptor"
            ))),
            (None, _) => Err(RedefError::AmbiguousName(format!(
                "{short} matches no active descriptor"
            ))),
        }
    }

    /// Resolve a query name against the active descriptors. Names carrying
    /// a scope separator must match a canonical form exactly; bare names go
    /// through short-name resolution.
    pub fn resolve_name<'d>(active: &'d [Descriptor], query: &str) -> RedefResult<&'d Descriptor> {
        if query.contains(['#', '.']) {
            active
                .iter()
                .find(|d| d.canonical() == query)
                .ok_or_else(|| RedefError::NameResolution(query.to_string()))
        } else {
            Self::resolve_short_name(active, query)
        }
    }
}

fn parse_path_target(spec: &str) -> RedefResult<(&str, MethodScope, &str)> {
    let split = spec
        .find(['#', '.'])
        .map(|idx| (&spec[..idx], &spec[idx..idx + 1], &spec[idx + 1..]));
    match split {
        Some((path, sep, name)) if !path.is_empty() && !name.is_empty() => {
            let scope = if sep == "#" {
                MethodScope::Instance
            } else {
                MethodScope::Singleton
            };
            Ok((path, scope, name))
        }
        _ => Err(RedefError::NameResolution(format!(
            "malformed descriptor {spec:?}"
        ))),
    }
}
