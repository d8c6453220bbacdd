//! Semaphores and their pending operations.
//!
//! A semaphore's record holds its *completed* state: for a binary semaphore whether it is
//! signaled and by which queue, for a timeline semaphore its counter value. On top of that, it
//! holds the operations that were submitted but have not been retired, in submission order.
//! The state as seen by the next submission is the completed state with every pending operation
//! applied.

use crate::{
    macros::vulkan_enum, NonExhaustive, TimelinePredicate, ValidationError, ValueSource,
    Violation,
};
use smallvec::SmallVec;
use std::collections::VecDeque;

vulkan_enum! {
    /// The type that a semaphore is created with.
    SemaphoreType = SemaphoreType(i32);

    /// A semaphore that is either signaled or unsignaled. Each signal is consumed by exactly one
    /// wait.
    Binary = BINARY,

    /// A semaphore with a 64-bit counter that only ever increases. Operations signal or wait
    /// for a specific value.
    Timeline = TIMELINE,
}

/// Where the payload of a synchronization primitive currently comes from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SemaphoreScope {
    /// The payload was created by this device, and is fully tracked.
    #[default]
    Internal,

    /// A payload was imported temporarily. The next wait restores the internal payload.
    ExternalTemporary,

    /// A payload was imported permanently. Its state can change outside of the validator's view.
    ExternalPermanent,
}

/// Parameters to create a semaphore.
#[derive(Clone, Debug)]
pub struct SemaphoreCreateInfo {
    /// The type of the semaphore.
    ///
    /// The default value is [`SemaphoreType::Binary`].
    pub semaphore_type: SemaphoreType,

    /// The initial counter value of a timeline semaphore. Must be 0 for a binary semaphore.
    ///
    /// The default value is 0.
    pub initial_value: u64,

    pub _ne: NonExhaustive,
}

impl Default for SemaphoreCreateInfo {
    #[inline]
    fn default() -> Self {
        Self {
            semaphore_type: SemaphoreType::Binary,
            initial_value: 0,
            _ne: NonExhaustive(()),
        }
    }
}

impl SemaphoreCreateInfo {
    /// Returns a `SemaphoreCreateInfo` for a timeline semaphore with the given initial value.
    #[inline]
    pub fn timeline(initial_value: u64) -> Self {
        Self {
            semaphore_type: SemaphoreType::Timeline,
            initial_value,
            ..Default::default()
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SemaphoreOperationKind {
    Wait,
    Signal,
}

/// An operation on a semaphore that was submitted to a queue and has not been retired.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SemaphoreOperation {
    pub kind: SemaphoreOperationKind,
    pub queue: ash::vk::Queue,

    /// The sequence number of the submission on `queue`.
    pub seq: u64,

    /// The value waited on or signaled. Always 0 for a binary semaphore.
    pub value: u64,
}

/// The tracked state of a semaphore.
#[derive(Debug)]
pub struct SemaphoreState {
    handle: ash::vk::Semaphore,
    semaphore_type: SemaphoreType,
    scope: SemaphoreScope,

    // Binary semaphores.
    signaled: bool,
    signaler: Option<ash::vk::Queue>,

    // Timeline semaphores.
    payload: u64,

    pending: VecDeque<SemaphoreOperation>,

    // Binary waits of other queues that were consumed, but whose submissions have not been
    // retired yet.
    consumed_waits: SmallVec<[(ash::vk::Queue, u64); 2]>,
}

impl SemaphoreState {
    pub(crate) fn new(handle: ash::vk::Semaphore, create_info: &SemaphoreCreateInfo) -> Self {
        SemaphoreState {
            handle,
            semaphore_type: create_info.semaphore_type,
            scope: SemaphoreScope::Internal,
            signaled: false,
            signaler: None,
            payload: match create_info.semaphore_type {
                SemaphoreType::Binary => 0,
                SemaphoreType::Timeline => create_info.initial_value,
            },
            pending: VecDeque::new(),
            consumed_waits: SmallVec::new(),
        }
    }

    #[inline]
    pub fn handle(&self) -> ash::vk::Semaphore {
        self.handle
    }

    #[inline]
    pub fn semaphore_type(&self) -> SemaphoreType {
        self.semaphore_type
    }

    #[inline]
    pub fn scope(&self) -> SemaphoreScope {
        self.scope
    }

    /// For a binary semaphore, returns whether it is signaled as of the last retired operation.
    #[inline]
    pub fn is_signaled(&self) -> bool {
        self.signaled
    }

    /// For a binary semaphore, returns the queue that signaled it, if it is signaled by a queue.
    #[inline]
    pub fn signaler(&self) -> Option<ash::vk::Queue> {
        self.signaler
    }

    /// For a timeline semaphore, returns the counter value as of the last retired operation.
    #[inline]
    pub fn payload(&self) -> u64 {
        self.payload
    }

    /// Returns the operations that have not been retired, oldest first.
    #[inline]
    pub fn pending_operations(&self) -> impl ExactSizeIterator<Item = &SemaphoreOperation> {
        self.pending.iter()
    }

    #[inline]
    pub fn last_operation(&self) -> Option<&SemaphoreOperation> {
        self.pending.back()
    }

    /// Returns whether the state of the semaphore is hidden from the validator.
    pub fn is_external(&self) -> bool {
        self.scope != SemaphoreScope::Internal
    }

    pub(crate) fn push_operation(&mut self, operation: SemaphoreOperation) {
        match (self.scope, operation.kind) {
            (SemaphoreScope::ExternalPermanent, _) => return,
            (SemaphoreScope::ExternalTemporary, SemaphoreOperationKind::Wait) => {
                // The wait consumes the imported payload.
                self.scope = SemaphoreScope::Internal;
            }
            _ => (),
        }

        self.pending.push_back(operation);
    }

    pub(crate) fn import(&mut self, temporary: bool) {
        self.scope = if temporary {
            SemaphoreScope::ExternalTemporary
        } else {
            SemaphoreScope::ExternalPermanent
        };
    }

    /// Retires the operations that `queue` submitted up to and including sequence number `seq`.
    ///
    /// Returns the operations of other queues that must have completed for these to complete.
    /// Their submissions should be retired too.
    pub(crate) fn retire(
        &mut self,
        queue: ash::vk::Queue,
        seq: u64,
    ) -> SmallVec<[(ash::vk::Queue, u64); 2]> {
        let mut implied = SmallVec::new();

        match self.semaphore_type {
            SemaphoreType::Binary => {
                self.consumed_waits
                    .retain(|&mut (wait_queue, wait_seq)| wait_queue != queue || wait_seq > seq);

                // Each operation on a binary semaphore happens after the ones before it, so they
                // all took effect. A wait of another queue taking effect says nothing about the
                // rest of its submission though, so only signals are retired with it.
                let Some(last) = self
                    .pending
                    .iter()
                    .rposition(|op| op.queue == queue && op.seq <= seq)
                else {
                    return implied;
                };

                for op in self.pending.drain(..=last) {
                    match op.kind {
                        SemaphoreOperationKind::Signal => {
                            self.signaled = true;
                            self.signaler = Some(op.queue);
                        }
                        SemaphoreOperationKind::Wait => {
                            self.signaled = false;
                            self.signaler = None;
                        }
                    }

                    if op.queue != queue {
                        match op.kind {
                            SemaphoreOperationKind::Signal => implied.push((op.queue, op.seq)),
                            SemaphoreOperationKind::Wait => {
                                self.consumed_waits.push((op.queue, op.seq));
                            }
                        }
                    }
                }
            }
            SemaphoreType::Timeline => {
                let mut reached = self.payload;

                self.pending.retain(|op| {
                    if op.queue == queue && op.seq <= seq {
                        reached = reached.max(op.value);
                        false
                    } else {
                        true
                    }
                });

                implied.extend(self.observe_value(reached));
            }
        }

        implied
    }

    /// Raises the counter of a timeline semaphore to at least `value`, which the application
    /// observed on the host.
    ///
    /// Returns the pending signal operations that must have completed, so that their
    /// submissions can be retired.
    pub(crate) fn observe_value(&mut self, value: u64) -> SmallVec<[(ash::vk::Queue, u64); 2]> {
        self.payload = self.payload.max(value);

        self.pending
            .iter()
            .filter(|op| op.kind == SemaphoreOperationKind::Signal && op.value <= value)
            .map(|op| (op.queue, op.seq))
            .collect()
    }

    /// Checks whether the host can signal a timeline semaphore with `value`.
    pub fn validate_host_signal(
        &self,
        value: u64,
        max_difference: u64,
    ) -> Result<(), Box<ValidationError>> {
        if self.semaphore_type != SemaphoreType::Timeline {
            return Err(ValidationError::new(Violation::NotTimeline)
                .set_vuids(&["VUID-VkSemaphoreSignalInfo-semaphore-03257"]));
        }

        if value <= self.payload {
            return Err(ValidationError::new(Violation::TimelineValue {
                predicate: TimelinePredicate::Monotonicity,
                value,
                conflicting_value: self.payload,
                source: ValueSource::Current,
            })
            .set_vuids(&["VUID-VkSemaphoreSignalInfo-value-03258"]));
        }

        if let Some(op) = self
            .pending
            .iter()
            .filter(|op| op.kind == SemaphoreOperationKind::Signal)
            .find(|op| op.value <= value)
        {
            return Err(ValidationError::new(Violation::TimelineValue {
                predicate: TimelinePredicate::BelowPending,
                value,
                conflicting_value: op.value,
                source: ValueSource::Pending,
            })
            .add_object(op.queue)
            .set_vuids(&["VUID-VkSemaphoreSignalInfo-value-03259"]));
        }

        self.validate_drift(value, max_difference, std::iter::empty())
            .map_err(|err| err.set_vuids(&["VUID-VkSemaphoreSignalInfo-value-03260"]))
    }

    pub(crate) fn signal_from_host(&mut self, value: u64) {
        self.payload = value;
        tracing::trace!(semaphore = ?self.handle, value, "host signal");
    }

    /// Checks that `value` is within `max_difference` of the counter value and of every pending
    /// value, including the `extra` values.
    pub(crate) fn validate_drift(
        &self,
        value: u64,
        max_difference: u64,
        extra: impl IntoIterator<Item = u64>,
    ) -> Result<(), Box<ValidationError>> {
        if value.abs_diff(self.payload) > max_difference {
            return Err(ValidationError::new(Violation::TimelineValue {
                predicate: TimelinePredicate::BoundedDrift,
                value,
                conflicting_value: self.payload,
                source: ValueSource::Current,
            }));
        }

        let pending = self.pending.iter().map(|op| op.value).chain(extra);

        for pending_value in pending {
            if value.abs_diff(pending_value) > max_difference {
                return Err(ValidationError::new(Violation::TimelineValue {
                    predicate: TimelinePredicate::BoundedDrift,
                    value,
                    conflicting_value: pending_value,
                    source: ValueSource::Pending,
                }));
            }
        }

        Ok(())
    }

    pub fn validate_destroy(&self) -> Result<(), Box<ValidationError>> {
        let in_use_count = self.pending.len() + self.consumed_waits.len();

        if in_use_count > 0 {
            return Err(ValidationError::new(Violation::InUse {
                in_use_count: in_use_count as u32,
            })
            .set_vuids(&["VUID-vkDestroySemaphore-semaphore-05149"]));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Handle;

    fn queue(raw: u64) -> ash::vk::Queue {
        ash::vk::Queue::from_raw(raw)
    }

    fn op(
        kind: SemaphoreOperationKind,
        queue_raw: u64,
        seq: u64,
        value: u64,
    ) -> SemaphoreOperation {
        SemaphoreOperation {
            kind,
            queue: queue(queue_raw),
            seq,
            value,
        }
    }

    #[test]
    fn binary_retire_in_order() {
        let mut semaphore = SemaphoreState::new(
            ash::vk::Semaphore::from_raw(1),
            &SemaphoreCreateInfo::default(),
        );
        semaphore.push_operation(op(SemaphoreOperationKind::Signal, 1, 1, 0));
        semaphore.push_operation(op(SemaphoreOperationKind::Wait, 2, 1, 0));

        // The wait completing means that the signal completed first.
        let implied = semaphore.retire(queue(2), 1);
        assert_eq!(implied.as_slice(), [(queue(1), 1)]);
        assert!(!semaphore.is_signaled());
        assert_eq!(semaphore.pending_operations().len(), 0);
    }

    #[test]
    fn binary_signal_does_not_retire_other_waits() {
        let mut semaphore = SemaphoreState::new(
            ash::vk::Semaphore::from_raw(1),
            &SemaphoreCreateInfo::default(),
        );
        semaphore.push_operation(op(SemaphoreOperationKind::Signal, 1, 1, 0));
        semaphore.push_operation(op(SemaphoreOperationKind::Wait, 2, 1, 0));
        semaphore.push_operation(op(SemaphoreOperationKind::Signal, 1, 2, 0));

        assert!(semaphore.retire(queue(1), 2).is_empty());
        assert!(semaphore.is_signaled());
        assert_eq!(semaphore.pending_operations().len(), 0);

        // The waiting submission is still executing.
        assert!(matches!(
            semaphore.validate_destroy().unwrap_err().violation,
            Violation::InUse { in_use_count: 1 },
        ));

        assert!(semaphore.retire(queue(2), 1).is_empty());
        assert!(semaphore.is_signaled());
        assert!(semaphore.validate_destroy().is_ok());
    }

    #[test]
    fn binary_signal_retired() {
        let mut semaphore = SemaphoreState::new(
            ash::vk::Semaphore::from_raw(1),
            &SemaphoreCreateInfo::default(),
        );
        semaphore.push_operation(op(SemaphoreOperationKind::Signal, 1, 4, 0));

        assert!(semaphore.retire(queue(1), 3).is_empty());
        assert!(!semaphore.is_signaled());

        assert!(semaphore.retire(queue(1), 4).is_empty());
        assert!(semaphore.is_signaled());
        assert_eq!(semaphore.signaler(), Some(queue(1)));
    }

    #[test]
    fn timeline_wait_implies_signal() {
        let mut semaphore = SemaphoreState::new(
            ash::vk::Semaphore::from_raw(1),
            &SemaphoreCreateInfo::timeline(0),
        );
        semaphore.push_operation(op(SemaphoreOperationKind::Signal, 1, 1, 5));
        semaphore.push_operation(op(SemaphoreOperationKind::Signal, 1, 2, 9));
        semaphore.push_operation(op(SemaphoreOperationKind::Wait, 2, 1, 5));

        let implied = semaphore.retire(queue(2), 1);
        assert_eq!(implied.as_slice(), [(queue(1), 1)]);
        assert_eq!(semaphore.payload(), 5);
    }

    #[test]
    fn host_signal() {
        let mut semaphore = SemaphoreState::new(
            ash::vk::Semaphore::from_raw(1),
            &SemaphoreCreateInfo::timeline(3),
        );
        semaphore.push_operation(op(SemaphoreOperationKind::Signal, 1, 1, 10));

        assert!(matches!(
            semaphore.validate_host_signal(3, 100).unwrap_err().violation,
            Violation::TimelineValue {
                predicate: TimelinePredicate::Monotonicity,
                source: ValueSource::Current,
                ..
            },
        ));
        assert!(matches!(
            semaphore.validate_host_signal(10, 100).unwrap_err().violation,
            Violation::TimelineValue {
                predicate: TimelinePredicate::BelowPending,
                conflicting_value: 10,
                ..
            },
        ));
        assert!(semaphore.validate_host_signal(9, 100).is_ok());

        semaphore.signal_from_host(9);
        assert_eq!(semaphore.payload(), 9);
    }

    #[test]
    fn host_signal_binary() {
        let semaphore = SemaphoreState::new(
            ash::vk::Semaphore::from_raw(1),
            &SemaphoreCreateInfo::default(),
        );
        assert_eq!(
            semaphore.validate_host_signal(1, 100).unwrap_err().violation,
            Violation::NotTimeline,
        );
    }

    #[test]
    fn destroy_with_pending() {
        let mut semaphore = SemaphoreState::new(
            ash::vk::Semaphore::from_raw(1),
            &SemaphoreCreateInfo::default(),
        );
        semaphore.push_operation(op(SemaphoreOperationKind::Signal, 1, 1, 0));
        assert!(semaphore.validate_destroy().is_err());

        semaphore.retire(queue(1), 1);
        assert!(semaphore.validate_destroy().is_ok());
    }

    #[test]
    fn temporary_import_consumed_by_wait() {
        let mut semaphore = SemaphoreState::new(
            ash::vk::Semaphore::from_raw(1),
            &SemaphoreCreateInfo::default(),
        );
        semaphore.import(true);
        assert!(semaphore.is_external());

        semaphore.push_operation(op(SemaphoreOperationKind::Wait, 1, 1, 0));
        assert_eq!(semaphore.scope(), SemaphoreScope::Internal);

        semaphore.import(false);
        semaphore.push_operation(op(SemaphoreOperationKind::Signal, 1, 2, 0));
        assert_eq!(semaphore.pending_operations().len(), 1);
    }
}
