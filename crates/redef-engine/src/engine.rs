//! Redefinition engine
//!
//! Installs replacement behaviors for a batch of targets, wires call
//! recording, runs a caller-supplied block against a session handle, and
//! restores the original bindings on every exit path.
//!
//! Per target the engine generates two collision-free internal names: a
//! *hidden alias* holding the original implementation and a *shadow name*
//! holding the replacement. The target's own name is rebound to a
//! recording wrapper that logs the call and forwards to the shadow,
//! preserving the receiver binding and any trailing block argument.

use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::locator::{Descriptor, MethodLocator, Target};
use crate::object::{Arity, MethodDef, MethodFn, Receiver, Visibility};
use crate::recorder::{CallRecorder, RecorderView};
use crate::registry::TypeRegistry;
use crate::value::{BlockFn, Value};
use crate::visibility;
use crate::{RedefError, RedefResult};

/// What to install in place of a target's original implementation
pub enum ReplacementBehavior {
    /// An explicit callable with a declared arity
    Callable {
        /// The replacement implementation
        func: MethodFn,
        /// Declared arity; excess positional arguments are truncated to a
        /// fixed count before forwarding
        arity: Arity,
    },
    /// Ignores all arguments and returns `Value::Null`
    Empty,
    /// Forwards to the preserved original, recording calls without
    /// altering behavior
    Wiretap,
}

impl ReplacementBehavior {
    /// Build a `Callable` from a closure
    pub fn callable(
        arity: Arity,
        func: impl Fn(&Receiver, &[Value], Option<&BlockFn>) -> Value + 'static,
    ) -> Self {
        ReplacementBehavior::Callable {
            func: Rc::new(func),
            arity,
        }
    }
}

/// Session lifecycle states. A session fully installs, runs, then fully
/// restores; there is no re-entrant installation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Created,
    Installed,
    Running,
    Restoring,
    Closed,
}

/// Handle passed to the redefinition block, exposing the session's
/// recorder
pub struct Session {
    recorder: Rc<CallRecorder>,
}

impl Session {
    /// Invocation count. `None` is legal only with exactly one active
    /// descriptor.
    pub fn called(&self, name: Option<&str>) -> RedefResult<usize> {
        self.recorder.count(name)
    }

    /// Whether the target was invoked at least once
    pub fn called_at_least_once(&self, name: Option<&str>) -> RedefResult<bool> {
        self.recorder.called_at_least_once(name)
    }

    /// Argument snapshots, in invocation order
    pub fn arguments(&self, name: Option<&str>) -> RedefResult<Vec<Vec<Value>>> {
        self.recorder.arguments(name)
    }

    /// Receivers, in invocation order
    pub fn receivers(&self, name: Option<&str>) -> RedefResult<Vec<Receiver>> {
        self.recorder.receivers(name)
    }

    /// The interleaved cross-target invocation sequence
    pub fn call_order(&self) -> Vec<Descriptor> {
        self.recorder.call_order()
    }

    /// Clear one descriptor's record, or everything including the global
    /// order log when `None`
    pub fn reset(&self, name: Option<&str>) -> RedefResult<()> {
        self.recorder.reset(name)
    }

    /// Obtain a view bound to one descriptor, by canonical form or bare
    /// method name
    pub fn view(&self, name: &str) -> RedefResult<RecorderView> {
        let descriptor = self.recorder.resolve(Some(name))?;
        Ok(RecorderView::new(self.recorder.clone(), descriptor))
    }

    /// The session's recorder
    pub fn recorder(&self) -> &Rc<CallRecorder> {
        &self.recorder
    }
}

struct InstalledTarget {
    descriptor: Descriptor,
    hider: String,
    shadow: String,
}

/// Restores original bindings when dropped, so restoration runs on normal
/// return, early error return, and unwinding alike.
struct RestoreGuard {
    installed: Vec<InstalledTarget>,
    state: SessionState,
}

impl Drop for RestoreGuard {
    fn drop(&mut self) {
        debug_assert!(
            !matches!(self.state, SessionState::Restoring | SessionState::Closed),
            "re-entrant restoration"
        );
        self.state = SessionState::Restoring;
        for target in self.installed.drain(..).rev() {
            let owner = target.descriptor.owner().clone();
            let mut table = owner.table(target.descriptor.scope()).borrow_mut();
            // A missing binding here means the dispatch table was mutated
            // out from under the session: a broken invariant, not a
            // recoverable error.
            let original = table
                .remove(&target.hider)
                .expect("hidden alias missing during restoration");
            table.define(target.descriptor.method_name().to_string(), original);
            table.remove(&target.shadow);
        }
        self.state = SessionState::Closed;
    }
}

/// The redefinition engine
pub struct Redef {
    registry: Rc<TypeRegistry>,
    next_shadow_id: AtomicU64,
}

impl Redef {
    /// Create an engine over the given registry
    pub fn new(registry: Rc<TypeRegistry>) -> Self {
        Self {
            registry,
            next_shadow_id: AtomicU64::new(0),
        }
    }

    /// The engine's type registry
    pub fn registry(&self) -> &Rc<TypeRegistry> {
        &self.registry
    }

    /// Redefine every target for the duration of `block`.
    ///
    /// All targets are resolved and validated before any dispatch table is
    /// touched; a failure leaves no partially-mutated state. The block
    /// receives a [`Session`] handle and its return value is passed
    /// through unchanged. Originals are restored on every exit path,
    /// including unwinding out of the block.
    pub fn redefine<R>(
        &self,
        behaviors: Vec<(Target, ReplacementBehavior)>,
        block: impl FnOnce(&Session) -> R,
    ) -> RedefResult<R> {
        let locator = MethodLocator::new(&self.registry);

        let mut resolved: Vec<(Descriptor, ReplacementBehavior)> =
            Vec::with_capacity(behaviors.len());
        for (target, behavior) in behaviors {
            let descriptor = locator.resolve(&target)?;
            locator.validate(&descriptor)?;
            if resolved.iter().any(|(seen, _)| *seen == descriptor) {
                return Err(RedefError::DuplicateTarget(descriptor.canonical()));
            }
            resolved.push((descriptor, behavior));
        }

        let recorder = Rc::new(CallRecorder::new(
            resolved.iter().map(|(d, _)| d.clone()).collect(),
        ));

        let mut guard = RestoreGuard {
            installed: Vec::with_capacity(resolved.len()),
            state: SessionState::Created,
        };
        for (descriptor, behavior) in resolved {
            self.install(descriptor, behavior, &recorder, &mut guard);
        }
        guard.state = SessionState::Installed;

        let session = Session { recorder };
        guard.state = SessionState::Running;
        let result = block(&session);
        drop(guard);
        Ok(result)
    }

    /// Temporarily elevate non-public targets to public for the duration
    /// of `block`. See [`visibility::publicize`].
    pub fn publicize<R>(&self, targets: &[Target], block: impl FnOnce() -> R) -> RedefResult<R> {
        visibility::publicize(&self.registry, targets, block)
    }

    fn install(
        &self,
        descriptor: Descriptor,
        behavior: ReplacementBehavior,
        recorder: &Rc<CallRecorder>,
        guard: &mut RestoreGuard,
    ) {
        let owner = descriptor.owner().clone();
        let scope = descriptor.scope();
        let name = descriptor.method_name().to_string();

        let mut table = owner.table(scope).borrow_mut();

        // Validated during the batch precondition; nothing ran in between.
        let original = table
            .get(&name)
            .cloned()
            .expect("validated method vanished before installation");

        // Hidden alias: probe the owner's names with a deterministic
        // suffix until free.
        let mut hider = format!("{name}_redef");
        while table.contains(&hider) {
            hider.push_str("_redef");
        }

        // Shadow name: engine-scoped monotonic counter, re-probed against
        // the table so names from earlier sessions never collide.
        let shadow = loop {
            let id = self.next_shadow_id.fetch_add(1, Ordering::Relaxed);
            let candidate = format!("__redef_shadow_{id}");
            if !table.contains(&candidate) {
                break candidate;
            }
        };

        let shadow_def = match behavior {
            ReplacementBehavior::Callable { func, arity } => MethodDef {
                func,
                arity,
                visibility: Visibility::Private,
            },
            ReplacementBehavior::Empty => {
                MethodDef::new(Arity::Fixed(0), Visibility::Private, |_, _, _| Value::Null)
            }
            ReplacementBehavior::Wiretap => {
                let wiretap_owner = owner.clone();
                let wiretap_hider = hider.clone();
                MethodDef::new(
                    Arity::Variable,
                    Visibility::Private,
                    move |receiver, args, block| {
                        wiretap_owner
                            .invoke_any(scope, receiver.clone(), &wiretap_hider, args, block)
                            .expect("hidden alias missing during active session")
                    },
                )
            }
        };
        let behavior_arity = shadow_def.arity;

        table.define(hider.clone(), original.clone());
        table.define(shadow.clone(), shadow_def);

        // Recording wrapper under the original name. Records the full
        // argument list, then truncates to the behavior's declared fixed
        // arity before forwarding; variable arity is never truncated.
        let wrapper_recorder = recorder.clone();
        let wrapper_descriptor = descriptor.clone();
        let wrapper_owner = owner.clone();
        let wrapper_shadow = shadow.clone();
        let wrapper = MethodDef {
            func: Rc::new(move |receiver: &Receiver, args: &[Value], block: Option<&BlockFn>| {
                wrapper_recorder.record(&wrapper_descriptor, receiver.clone(), args);
                let forwarded = match behavior_arity {
                    Arity::Fixed(n) if args.len() > n => &args[..n],
                    _ => args,
                };
                wrapper_owner
                    .invoke_any(scope, receiver.clone(), &wrapper_shadow, forwarded, block)
                    .expect("shadow binding missing during active session")
            }),
            arity: Arity::Variable,
            visibility: original.visibility,
        };
        table.define(name, wrapper);
        drop(table);

        guard.installed.push(InstalledTarget {
            descriptor,
            hider,
            shadow,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::MethodScope;

    fn engine_with_gizmo() -> Redef {
        let registry = Rc::new(TypeRegistry::new());
        let gizmo = registry.register("Gizmo");
        gizmo.define_instance_method(
            "poke",
            MethodDef::public(Arity::Fixed(0), |_, _, _| Value::str("original")),
        );
        Redef::new(registry)
    }

    #[test]
    fn test_generated_names_removed_after_session() {
        let engine = engine_with_gizmo();
        let gizmo = engine.registry().lookup("Gizmo").unwrap();

        engine
            .redefine(
                vec![("Gizmo#poke".into(), ReplacementBehavior::Empty)],
                |_session| {
                    assert!(gizmo.has_method(MethodScope::Instance, "poke_redef"));
                    assert!(gizmo.has_method(MethodScope::Instance, "__redef_shadow_0"));
                },
            )
            .unwrap();

        assert!(gizmo.has_method(MethodScope::Instance, "poke"));
        assert!(!gizmo.has_method(MethodScope::Instance, "poke_redef"));
        assert!(!gizmo.has_method(MethodScope::Instance, "__redef_shadow_0"));
    }

    #[test]
    fn test_hidden_alias_probes_past_existing_names() {
        let engine = engine_with_gizmo();
        let gizmo = engine.registry().lookup("Gizmo").unwrap();
        gizmo.define_instance_method(
            "poke_redef",
            MethodDef::public(Arity::Fixed(0), |_, _, _| Value::str("bystander")),
        );

        engine
            .redefine(
                vec![("Gizmo#poke".into(), ReplacementBehavior::Empty)],
                |_session| {
                    assert!(gizmo.has_method(MethodScope::Instance, "poke_redef_redef"));
                },
            )
            .unwrap();

        // The bystander survives; the probed alias is gone.
        let obj = gizmo.instantiate();
        assert_eq!(obj.call("poke_redef", &[]).unwrap(), Value::str("bystander"));
        assert!(!gizmo.has_method(MethodScope::Instance, "poke_redef_redef"));
    }

    #[test]
    fn test_shadow_counter_is_engine_scoped() {
        let engine = engine_with_gizmo();
        let gizmo = engine.registry().lookup("Gizmo").unwrap();

        for _ in 0..2 {
            engine
                .redefine(
                    vec![("Gizmo#poke".into(), ReplacementBehavior::Empty)],
                    |_session| {},
                )
                .unwrap();
        }
        // Two sessions consumed two distinct shadow ids.
        assert_eq!(engine.next_shadow_id.load(Ordering::Relaxed), 2);
        let obj = gizmo.instantiate();
        assert_eq!(obj.call("poke", &[]).unwrap(), Value::str("original"));
    }

    #[test]
    fn test_duplicate_target_rejected() {
        let engine = engine_with_gizmo();
        let result = engine.redefine(
            vec![
                ("Gizmo#poke".into(), ReplacementBehavior::Empty),
                ("Gizmo#poke".into(), ReplacementBehavior::Wiretap),
            ],
            |_session| {},
        );
        assert!(matches!(result, Err(RedefError::DuplicateTarget(_))));
        // Nothing was installed.
        let gizmo = engine.registry().lookup("Gizmo").unwrap();
        let obj = gizmo.instantiate();
        assert_eq!(obj.call("poke", &[]).unwrap(), Value::str("original"));
    }
}
