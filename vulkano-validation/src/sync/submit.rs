//! The model of the semaphore operations of one submission call.

use super::{
    fence::FenceState,
    semaphore::{SemaphoreOperationKind, SemaphoreScope, SemaphoreState, SemaphoreType},
    PipelineStages,
};
use crate::{queue::QueueFlags, TimelinePredicate, ValidationError, ValueSource, Violation};
use smallvec::SmallVec;

/// Simulates the semaphore operations of one submission call.
///
/// The model is built fresh for each call. Operations must be validated in the order they
/// appear in the call: within one batch the waits before the signals, and batches in array
/// order. Each operation that passes is added to the model, so that later operations of the same
/// call see it. The model never writes to the semaphore records; it is dropped at the end of the
/// call whether or not the call was valid.
#[derive(Debug)]
pub struct SubmissionModel {
    queue: ash::vk::Queue,
    queue_flags: QueueFlags,
    max_timeline_semaphore_value_difference: u64,
    timeline_semantics: bool,

    // Binary semaphores whose state was changed by an earlier operation of this call.
    signaled: foldhash::HashSet<ash::vk::Semaphore>,
    unsignaled: foldhash::HashSet<ash::vk::Semaphore>,
    // Temporarily imported binary semaphores that were waited on earlier in this call.
    internal: foldhash::HashSet<ash::vk::Semaphore>,

    timeline_waits: foldhash::HashMap<ash::vk::Semaphore, SmallVec<[u64; 2]>>,
    timeline_signals: foldhash::HashMap<ash::vk::Semaphore, SmallVec<[u64; 2]>>,
}

impl SubmissionModel {
    /// Creates a model for a call submitting to `queue`.
    ///
    /// `timeline_semantics` is whether the `timeline_semaphore` feature is enabled, which is
    /// reported along with unsatisfiable binary waits.
    pub fn new(
        queue: ash::vk::Queue,
        queue_flags: QueueFlags,
        max_timeline_semaphore_value_difference: u64,
        timeline_semantics: bool,
    ) -> Self {
        SubmissionModel {
            queue,
            queue_flags,
            max_timeline_semaphore_value_difference,
            timeline_semantics,
            signaled: Default::default(),
            unsignaled: Default::default(),
            internal: Default::default(),
            timeline_waits: Default::default(),
            timeline_signals: Default::default(),
        }
    }

    #[inline]
    pub fn queue(&self) -> ash::vk::Queue {
        self.queue
    }

    /// Checks that the queue supports every stage in `stages`.
    pub fn validate_stages(&self, stages: PipelineStages) -> Result<(), Box<ValidationError>> {
        let unsupported = stages - PipelineStages::supported_by(self.queue_flags);

        if !unsupported.is_empty() {
            return Err(ValidationError::new(Violation::UnsupportedStages {
                stages: unsupported,
                queue_flags: self.queue_flags,
            })
            .add_context("stage_mask")
            .set_vuids(&["VUID-vkQueueSubmit2-stageMask-03870"]));
        }

        Ok(())
    }

    /// Validates a wait operation on `semaphore`, and adds it to the model.
    ///
    /// `value` is ignored for binary semaphores.
    pub fn validate_wait(
        &mut self,
        semaphore: &SemaphoreState,
        value: u64,
    ) -> Result<(), Box<ValidationError>> {
        match semaphore.semaphore_type() {
            SemaphoreType::Binary => self.validate_binary_wait(semaphore),
            SemaphoreType::Timeline => self.validate_timeline_wait(semaphore, value),
        }
    }

    /// Validates a signal operation on `semaphore`, and adds it to the model.
    ///
    /// `value` is ignored for binary semaphores.
    pub fn validate_signal(
        &mut self,
        semaphore: &SemaphoreState,
        value: u64,
    ) -> Result<(), Box<ValidationError>> {
        match semaphore.semaphore_type() {
            SemaphoreType::Binary => self.validate_binary_signal(semaphore),
            SemaphoreType::Timeline => self.validate_timeline_signal(semaphore, value),
        }
    }

    /// Validates the fence of the call. There is at most one, so it needs no state in the model.
    pub fn validate_fence_for_submit(
        &self,
        fence: &FenceState,
    ) -> Result<(), Box<ValidationError>> {
        fence.validate_for_submit()
    }

    fn is_tracked(&self, semaphore: &SemaphoreState) -> bool {
        match semaphore.scope() {
            SemaphoreScope::Internal => true,
            SemaphoreScope::ExternalTemporary => self.internal.contains(&semaphore.handle()),
            SemaphoreScope::ExternalPermanent => false,
        }
    }

    fn validate_binary_wait(
        &mut self,
        semaphore: &SemaphoreState,
    ) -> Result<(), Box<ValidationError>> {
        let handle = semaphore.handle();

        if !self.is_tracked(semaphore) {
            if semaphore.scope() == SemaphoreScope::ExternalTemporary {
                // The wait restores the internal payload, which is then unsignaled.
                self.internal.insert(handle);
                self.signaled.remove(&handle);
                self.unsignaled.insert(handle);
            }

            return Ok(());
        }

        if self.signaled.contains(&handle) {
            // Signaled earlier in this call.
        } else if self.unsignaled.contains(&handle) {
            return Err(self.cannot_be_signalled(semaphore));
        } else {
            match semaphore.last_operation() {
                Some(op) if op.kind == SemaphoreOperationKind::Wait => {
                    if op.queue != self.queue {
                        return Err(ValidationError::new(Violation::AlreadyWaitedByOtherQueue {
                            other_queue: op.queue,
                        })
                        .add_object(handle)
                        .add_object(op.queue)
                        .set_vuids(&["VUID-vkQueueSubmit2-semaphore-03871"]));
                    }

                    return Err(self.cannot_be_signalled(semaphore));
                }
                Some(_) => (),
                None => {
                    if !semaphore.is_signaled() {
                        return Err(self.cannot_be_signalled(semaphore));
                    }
                }
            }
        }

        self.signaled.remove(&handle);
        self.unsignaled.insert(handle);

        Ok(())
    }

    fn cannot_be_signalled(&self, semaphore: &SemaphoreState) -> Box<ValidationError> {
        ValidationError::new(Violation::CannotBeSignalled {
            timeline_semantics: self.timeline_semantics,
        })
        .add_object(semaphore.handle())
        .set_vuids(if self.timeline_semantics {
            &["VUID-vkQueueSubmit2-semaphore-03873"]
        } else {
            &["VUID-vkQueueSubmit2-semaphore-03872"]
        })
    }

    fn validate_binary_signal(
        &mut self,
        semaphore: &SemaphoreState,
    ) -> Result<(), Box<ValidationError>> {
        let handle = semaphore.handle();

        if !self.is_tracked(semaphore) {
            return Ok(());
        }

        let previous_signaler = if self.signaled.contains(&handle) {
            Some(Some(self.queue))
        } else if self.unsignaled.contains(&handle) {
            None
        } else {
            match semaphore.last_operation() {
                Some(op) if op.kind == SemaphoreOperationKind::Signal => Some(Some(op.queue)),
                Some(_) => None,
                None => semaphore.is_signaled().then_some(semaphore.signaler()),
            }
        };

        if let Some(previous_signaler) = previous_signaler {
            let mut err = ValidationError::new(Violation::ForwardProgressViolation {
                previous_signaler,
            })
            .add_object(handle);

            if let Some(queue) = previous_signaler {
                err = err.add_object(queue);
            }

            return Err(err.set_vuids(&["VUID-vkQueueSubmit2-semaphore-03868"]));
        }

        self.unsignaled.remove(&handle);
        self.signaled.insert(handle);

        Ok(())
    }

    fn in_batch_values(&self, semaphore: ash::vk::Semaphore) -> impl Iterator<Item = u64> + '_ {
        let waits = self.timeline_waits.get(&semaphore).into_iter().flatten();
        let signals = self.timeline_signals.get(&semaphore).into_iter().flatten();

        waits.chain(signals).copied()
    }

    fn validate_timeline_wait(
        &mut self,
        semaphore: &SemaphoreState,
        value: u64,
    ) -> Result<(), Box<ValidationError>> {
        let handle = semaphore.handle();

        semaphore
            .validate_drift(
                value,
                self.max_timeline_semaphore_value_difference,
                self.in_batch_values(handle),
            )
            .map_err(|err| {
                err.add_object(handle)
                    .set_vuids(&["VUID-vkQueueSubmit2-semaphore-03884"])
            })?;

        self.timeline_waits.entry(handle).or_default().push(value);

        Ok(())
    }

    fn validate_timeline_signal(
        &mut self,
        semaphore: &SemaphoreState,
        value: u64,
    ) -> Result<(), Box<ValidationError>> {
        let handle = semaphore.handle();

        if value <= semaphore.payload() {
            return Err(ValidationError::new(Violation::TimelineValue {
                predicate: TimelinePredicate::Monotonicity,
                value,
                conflicting_value: semaphore.payload(),
                source: ValueSource::Current,
            })
            .add_object(handle)
            .set_vuids(&["VUID-vkQueueSubmit2-semaphore-03882"]));
        }

        let pending_signals = semaphore
            .pending_operations()
            .filter(|op| op.kind == SemaphoreOperationKind::Signal)
            .map(|op| op.value)
            .chain(
                self.timeline_signals
                    .get(&handle)
                    .into_iter()
                    .flatten()
                    .copied(),
            );

        // Report a duplicate value in preference to a smaller one.
        let mut conflicting_value = None;

        for pending_value in pending_signals {
            if pending_value == value {
                conflicting_value = Some(pending_value);
                break;
            }

            if pending_value > value {
                conflicting_value.get_or_insert(pending_value);
            }
        }

        if let Some(conflicting_value) = conflicting_value {
            return Err(ValidationError::new(Violation::TimelineValue {
                predicate: TimelinePredicate::Monotonicity,
                value,
                conflicting_value,
                source: ValueSource::Pending,
            })
            .add_object(handle)
            .set_vuids(&["VUID-vkQueueSubmit2-semaphore-03882"]));
        }

        semaphore
            .validate_drift(
                value,
                self.max_timeline_semaphore_value_difference,
                self.in_batch_values(handle),
            )
            .map_err(|err| {
                err.add_object(handle)
                    .set_vuids(&["VUID-vkQueueSubmit2-semaphore-03883"])
            })?;

        self.timeline_signals.entry(handle).or_default().push(value);

        Ok(())
    }
}
