//! Redefinable object model and dispatch tables
//!
//! Types opted into redefinition carry an explicit, mutable mapping from
//! method name to first-class implementation, and every call is dispatched
//! through that mapping instead of native virtual dispatch. Each type owns
//! two independent tables: one for instance-scope methods and one for
//! singleton (class-level) methods. The redefinition engine swaps entries
//! in these tables and puts them back.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use rustc_hash::FxHashMap;

use crate::value::{BlockFn, Value};
use crate::{RedefError, RedefResult};

/// Global counter for generating unique object IDs
static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

fn generate_object_id() -> u64 {
    NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Method visibility level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    /// Callable through the public dispatch entry point
    Public,
    /// Hidden from public dispatch
    Protected,
    /// Hidden from public dispatch
    Private,
}

/// Declared parameter count of a method implementation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// Exactly this many positional parameters
    Fixed(usize),
    /// Accepts any number of positional arguments
    Variable,
}

/// Which dispatch table of a type a name binds in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodScope {
    /// Instance-scope methods, displayed as `Path#name`
    Instance,
    /// Singleton (class-level) methods, displayed as `Path.name`
    Singleton,
}

impl MethodScope {
    /// Separator used in the canonical descriptor form
    pub fn separator(self) -> char {
        match self {
            MethodScope::Instance => '#',
            MethodScope::Singleton => '.',
        }
    }
}

/// The receiver a method call is bound to
#[derive(Clone)]
pub enum Receiver {
    /// An instance, for instance-scope calls
    Object(ObjectRef),
    /// The type itself, for singleton-scope calls
    Type(TypeHandle),
}

impl PartialEq for Receiver {
    fn eq(&self, other: &Receiver) -> bool {
        match (self, other) {
            (Receiver::Object(a), Receiver::Object(b)) => a.object_id() == b.object_id(),
            (Receiver::Type(a), Receiver::Type(b)) => a.id() == b.id(),
            _ => false,
        }
    }
}

impl fmt::Debug for Receiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Receiver::Object(obj) => write!(f, "<{}:{}>", obj.ty().path(), obj.object_id()),
            Receiver::Type(ty) => write!(f, "<type {}>", ty.path()),
        }
    }
}

/// A first-class method implementation
pub type MethodFn = Rc<dyn Fn(&Receiver, &[Value], Option<&BlockFn>) -> Value>;

/// One entry in a method table
#[derive(Clone)]
pub struct MethodDef {
    /// The implementation
    pub func: MethodFn,
    /// Declared arity, used for argument truncation when wrapping
    pub arity: Arity,
    /// Visibility enforced by the public dispatch entry point
    pub visibility: Visibility,
}

impl MethodDef {
    /// Create an entry from a closure
    pub fn new(
        arity: Arity,
        visibility: Visibility,
        func: impl Fn(&Receiver, &[Value], Option<&BlockFn>) -> Value + 'static,
    ) -> Self {
        Self {
            func: Rc::new(func),
            arity,
            visibility,
        }
    }

    /// Create a public entry from a closure
    pub fn public(
        arity: Arity,
        func: impl Fn(&Receiver, &[Value], Option<&BlockFn>) -> Value + 'static,
    ) -> Self {
        Self::new(arity, Visibility::Public, func)
    }
}

/// Mutable name-to-implementation mapping for one dispatch scope
#[derive(Default)]
pub struct MethodTable {
    methods: FxHashMap<String, MethodDef>,
}

impl MethodTable {
    /// Bind `name` to `def`, replacing any previous binding
    pub fn define(&mut self, name: impl Into<String>, def: MethodDef) {
        self.methods.insert(name.into(), def);
    }

    /// Remove the binding for `name`, returning it
    pub fn remove(&mut self, name: &str) -> Option<MethodDef> {
        self.methods.remove(name)
    }

    /// Look up the binding for `name`
    pub fn get(&self, name: &str) -> Option<&MethodDef> {
        self.methods.get(name)
    }

    /// Check whether `name` is bound, at any visibility
    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    /// Visibility of the binding for `name`, if bound
    pub fn visibility(&self, name: &str) -> Option<Visibility> {
        self.methods.get(name).map(|def| def.visibility)
    }

    /// Change the visibility of an existing binding, returning the prior
    /// level
    pub fn set_visibility(&mut self, name: &str, visibility: Visibility) -> Option<Visibility> {
        self.methods.get_mut(name).map(|def| {
            let prior = def.visibility;
            def.visibility = visibility;
            prior
        })
    }
}

/// A registered redefinable type
pub struct TypeDef {
    id: usize,
    path: String,
    instance_methods: RefCell<MethodTable>,
    singleton_methods: RefCell<MethodTable>,
}

/// Shared handle to a registered type
pub type TypeHandle = Rc<TypeDef>;

impl TypeDef {
    pub(crate) fn new(id: usize, path: String) -> Self {
        Self {
            id,
            path,
            instance_methods: RefCell::new(MethodTable::default()),
            singleton_methods: RefCell::new(MethodTable::default()),
        }
    }

    /// Registry-assigned type ID
    pub fn id(&self) -> usize {
        self.id
    }

    /// Registration path, e.g. `"Store::Gizmo"`
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The dispatch table for the given scope
    pub fn table(&self, scope: MethodScope) -> &RefCell<MethodTable> {
        match scope {
            MethodScope::Instance => &self.instance_methods,
            MethodScope::Singleton => &self.singleton_methods,
        }
    }

    /// Define an instance-scope method
    pub fn define_instance_method(&self, name: impl Into<String>, def: MethodDef) {
        self.instance_methods.borrow_mut().define(name, def);
    }

    /// Define a singleton-scope method
    pub fn define_singleton_method(&self, name: impl Into<String>, def: MethodDef) {
        self.singleton_methods.borrow_mut().define(name, def);
    }

    /// Check whether `name` is bound in the given scope, at any visibility
    pub fn has_method(&self, scope: MethodScope, name: &str) -> bool {
        self.table(scope).borrow().contains(name)
    }

    /// Canonical display form for a method in the given scope
    pub fn display_method(&self, scope: MethodScope, name: &str) -> String {
        format!("{}{}{}", self.path, scope.separator(), name)
    }

    /// Create an instance of this type with no fields set
    pub fn instantiate(self: &Rc<Self>) -> ObjectRef {
        Rc::new(Instance {
            object_id: generate_object_id(),
            ty: self.clone(),
            fields: RefCell::new(FxHashMap::default()),
        })
    }

    /// Call a singleton-scope method on the type, enforcing visibility
    pub fn call(self: &Rc<Self>, name: &str, args: &[Value]) -> RedefResult<Value> {
        self.call_with_block(name, args, None)
    }

    /// Call a singleton-scope method with a trailing block argument
    pub fn call_with_block(
        self: &Rc<Self>,
        name: &str,
        args: &[Value],
        block: Option<&BlockFn>,
    ) -> RedefResult<Value> {
        self.invoke(
            MethodScope::Singleton,
            Receiver::Type(self.clone()),
            name,
            args,
            block,
        )
    }

    /// Dispatch through the table, rejecting non-public entries.
    ///
    /// The entry is cloned out of the table before the implementation runs,
    /// so a method body may itself swap table entries (nested sessions on
    /// disjoint descriptors).
    pub fn invoke(
        self: &Rc<Self>,
        scope: MethodScope,
        receiver: Receiver,
        name: &str,
        args: &[Value],
        block: Option<&BlockFn>,
    ) -> RedefResult<Value> {
        let def = self.entry(scope, name)?;
        if def.visibility != Visibility::Public {
            return Err(RedefError::MethodNotVisible(
                self.display_method(scope, name),
            ));
        }
        Ok((def.func)(&receiver, args, block))
    }

    /// Dispatch through the table regardless of visibility. Used for
    /// forwarding to generated shadow and hidden-alias bindings.
    pub fn invoke_any(
        self: &Rc<Self>,
        scope: MethodScope,
        receiver: Receiver,
        name: &str,
        args: &[Value],
        block: Option<&BlockFn>,
    ) -> RedefResult<Value> {
        let def = self.entry(scope, name)?;
        Ok((def.func)(&receiver, args, block))
    }

    fn entry(&self, scope: MethodScope, name: &str) -> RedefResult<MethodDef> {
        self.table(scope)
            .borrow()
            .get(name)
            .cloned()
            .ok_or_else(|| RedefError::NoSuchMethod(self.display_method(scope, name)))
    }
}

impl fmt::Debug for TypeDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeDef({})", self.path)
    }
}

/// Object instance of a registered type
pub struct Instance {
    object_id: u64,
    ty: TypeHandle,
    fields: RefCell<FxHashMap<String, Value>>,
}

/// Shared handle to an instance
pub type ObjectRef = Rc<Instance>;

impl Instance {
    /// Unique object ID, assigned on creation
    pub fn object_id(&self) -> u64 {
        self.object_id
    }

    /// The instance's runtime type
    pub fn ty(&self) -> &TypeHandle {
        &self.ty
    }

    /// Read a field
    pub fn get(&self, field: &str) -> Option<Value> {
        self.fields.borrow().get(field).cloned()
    }

    /// Write a field
    pub fn set(&self, field: impl Into<String>, value: Value) {
        self.fields.borrow_mut().insert(field.into(), value);
    }

    /// Call an instance-scope method, enforcing visibility
    pub fn call(self: &Rc<Self>, name: &str, args: &[Value]) -> RedefResult<Value> {
        self.call_with_block(name, args, None)
    }

    /// Call an instance-scope method with a trailing block argument
    pub fn call_with_block(
        self: &Rc<Self>,
        name: &str,
        args: &[Value],
        block: Option<&BlockFn>,
    ) -> RedefResult<Value> {
        let ty = self.ty.clone();
        ty.invoke(
            MethodScope::Instance,
            Receiver::Object(self.clone()),
            name,
            args,
            block,
        )
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}:{}>", self.ty.path(), self.object_id)
    }
}
