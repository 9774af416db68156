//! Call recording
//!
//! Stores per-descriptor invocation logs plus a session-wide call-order
//! log interleaved across all targets. Recording never fails: argument
//! snapshots fall back to reference sharing when a deep copy is not
//! possible.

use std::cell::RefCell;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::locator::{Descriptor, MethodLocator};
use crate::object::Receiver;
use crate::value::{self, Value};
use crate::{RedefError, RedefResult};

/// Recorded invocations of one descriptor
#[derive(Default)]
pub struct CallRecord {
    calls: Vec<(Receiver, Vec<Value>)>,
}

/// Invocation recorder scoped to one session's active descriptors
pub struct CallRecorder {
    active: Vec<Descriptor>,
    records: RefCell<FxHashMap<Descriptor, CallRecord>>,
    call_order: RefCell<Vec<Descriptor>>,
}

impl CallRecorder {
    /// Create a recorder scoped to the given descriptors
    pub fn new(active: Vec<Descriptor>) -> Self {
        Self {
            active,
            records: RefCell::new(FxHashMap::default()),
            call_order: RefCell::new(Vec::new()),
        }
    }

    /// The session's active descriptors, in installation order
    pub fn active(&self) -> &[Descriptor] {
        &self.active
    }

    /// Record one invocation: appends a (receiver, argument-snapshot) pair
    /// to the descriptor's log and the descriptor to the global order log.
    pub fn record(&self, descriptor: &Descriptor, receiver: Receiver, args: &[Value]) {
        let snapshot = value::snapshot(args);
        self.records
            .borrow_mut()
            .entry(descriptor.clone())
            .or_default()
            .calls
            .push((receiver, snapshot));
        self.call_order.borrow_mut().push(descriptor.clone());
    }

    /// Invocation count for the named descriptor
    pub fn count(&self, name: Option<&str>) -> RedefResult<usize> {
        let descriptor = self.resolve(name)?;
        Ok(self.count_of(&descriptor))
    }

    /// Whether the named descriptor was invoked at least once
    pub fn called_at_least_once(&self, name: Option<&str>) -> RedefResult<bool> {
        Ok(self.count(name)? > 0)
    }

    /// Argument snapshots for the named descriptor, in invocation order
    pub fn arguments(&self, name: Option<&str>) -> RedefResult<Vec<Vec<Value>>> {
        let descriptor = self.resolve(name)?;
        Ok(self.arguments_of(&descriptor))
    }

    /// Receivers for the named descriptor, in invocation order
    pub fn receivers(&self, name: Option<&str>) -> RedefResult<Vec<Receiver>> {
        let descriptor = self.resolve(name)?;
        Ok(self.receivers_of(&descriptor))
    }

    /// The interleaved cross-target invocation sequence. Unaffected by
    /// per-descriptor resets.
    pub fn call_order(&self) -> Vec<Descriptor> {
        self.call_order.borrow().clone()
    }

    /// Clear one descriptor's count and log, or, with `None`, every record
    /// plus the global order log. The whole-recorder form is exempt from
    /// the sole-descriptor rule.
    pub fn reset(&self, name: Option<&str>) -> RedefResult<()> {
        match name {
            Some(_) => {
                let descriptor = self.resolve(name)?;
                self.records.borrow_mut().remove(&descriptor);
            }
            None => {
                self.records.borrow_mut().clear();
                self.call_order.borrow_mut().clear();
            }
        }
        Ok(())
    }

    /// Resolve an optional query name against the active descriptors. An
    /// omitted name is legal only when exactly one descriptor is active,
    /// regardless of call counts.
    pub fn resolve(&self, name: Option<&str>) -> RedefResult<Descriptor> {
        match name {
            Some(query) => Ok(MethodLocator::resolve_name(&self.active, query)?.clone()),
            None if self.active.len() == 1 => Ok(self.active[0].clone()),
            None => Err(RedefError::AmbiguousName(
                "omitted descriptor with more than one active target".to_string(),
            )),
        }
    }

    fn count_of(&self, descriptor: &Descriptor) -> usize {
        self.records
            .borrow()
            .get(descriptor)
            .map_or(0, |r| r.calls.len())
    }

    fn arguments_of(&self, descriptor: &Descriptor) -> Vec<Vec<Value>> {
        self.records
            .borrow()
            .get(descriptor)
            .map_or_else(Vec::new, |r| {
                r.calls.iter().map(|(_, args)| args.clone()).collect()
            })
    }

    fn receivers_of(&self, descriptor: &Descriptor) -> Vec<Receiver> {
        self.records
            .borrow()
            .get(descriptor)
            .map_or_else(Vec::new, |r| {
                r.calls.iter().map(|(recv, _)| recv.clone()).collect()
            })
    }
}

/// A recorder handle permanently bound to one descriptor, with the same
/// query and reset operations pre-applied to it
pub struct RecorderView {
    recorder: Rc<CallRecorder>,
    descriptor: Descriptor,
}

impl RecorderView {
    pub(crate) fn new(recorder: Rc<CallRecorder>, descriptor: Descriptor) -> Self {
        Self {
            recorder,
            descriptor,
        }
    }

    /// The bound descriptor
    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    /// Invocation count
    pub fn called(&self) -> usize {
        self.recorder.count_of(&self.descriptor)
    }

    /// Whether the target was invoked at least once
    pub fn called_at_least_once(&self) -> bool {
        self.called() > 0
    }

    /// Argument snapshots, in invocation order
    pub fn arguments(&self) -> Vec<Vec<Value>> {
        self.recorder.arguments_of(&self.descriptor)
    }

    /// Receivers, in invocation order
    pub fn receivers(&self) -> Vec<Receiver> {
        self.recorder.receivers_of(&self.descriptor)
    }

    /// Clear the bound descriptor's count and log. The global order log is
    /// untouched.
    pub fn reset(&self) {
        self.recorder.records.borrow_mut().remove(&self.descriptor);
    }
}
