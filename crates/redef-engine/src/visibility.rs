//! Temporary visibility override
//!
//! Elevates non-public methods to public for the duration of a block, then
//! restores each changed method to its prior level. Targets that were
//! already public are skipped and stay public. Restoration runs on every
//! exit path, including unwinding and resolution failures partway through
//! a batch.

use crate::locator::{Descriptor, MethodLocator, Target};
use crate::object::Visibility;
use crate::registry::TypeRegistry;
use crate::{RedefError, RedefResult};

/// Restores prior visibility levels when dropped
struct VisibilityGuard {
    changed: Vec<(Descriptor, Visibility)>,
}

impl Drop for VisibilityGuard {
    fn drop(&mut self) {
        for (descriptor, prior) in self.changed.drain(..).rev() {
            let owner = descriptor.owner().clone();
            owner
                .table(descriptor.scope())
                .borrow_mut()
                .set_visibility(descriptor.method_name(), prior);
        }
    }
}

/// Run `block` with every target elevated to public visibility.
///
/// Only targets that were not already public are changed, and only those
/// are restored afterward.
pub fn publicize<R>(
    registry: &TypeRegistry,
    targets: &[Target],
    block: impl FnOnce() -> R,
) -> RedefResult<R> {
    let locator = MethodLocator::new(registry);
    let mut guard = VisibilityGuard {
        changed: Vec::new(),
    };

    for target in targets {
        let descriptor = locator.resolve(target)?;
        let owner = descriptor.owner().clone();
        let mut table = owner.table(descriptor.scope()).borrow_mut();
        match table.visibility(descriptor.method_name()) {
            None => return Err(RedefError::NameResolution(descriptor.canonical())),
            Some(Visibility::Public) => {}
            Some(prior) => {
                table.set_visibility(descriptor.method_name(), Visibility::Public);
                drop(table);
                guard.changed.push((descriptor, prior));
            }
        }
    }

    Ok(block())
}
