//! Queues and the submissions that are executing on them.
//!
//! The validator cannot observe the device, so a submission is considered to be executing from
//! the moment it is recorded until the application demonstrates that it completed: by waiting
//! on its fence, waiting for the queue or device to become idle, or observing a timeline
//! semaphore value that the submission signals. Completion is then applied to everything the
//! submission touched, in submission order.

use crate::{
    command_buffer::CommandBufferState,
    macros::vulkan_bitflags,
    registry::Registry,
    sync::{fence::FenceState, semaphore::SemaphoreState},
};
use smallvec::SmallVec;
use std::collections::VecDeque;

vulkan_bitflags! {
    /// Attributes of a queue family.
    QueueFlags = QueueFlags(u32);

    /// Queues of this family can execute graphics operations.
    GRAPHICS = GRAPHICS,

    /// Queues of this family can execute compute operations.
    COMPUTE = COMPUTE,

    /// Queues of this family can execute transfer operations.
    TRANSFER = TRANSFER,

    /// Queues of this family can execute sparse memory management operations.
    SPARSE_BINDING = SPARSE_BINDING,

    /// Queues of this family can execute protected operations.
    PROTECTED = PROTECTED,
}

/// One recorded submission on a queue, which has not been retired yet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueSubmission {
    /// The sequence number of the submission on its queue.
    pub seq: u64,

    /// The command buffers of the submission, including the secondary command buffers that they
    /// execute.
    pub command_buffers: SmallVec<[ash::vk::CommandBuffer; 4]>,

    /// The semaphores that the submission waits on or signals.
    pub semaphores: SmallVec<[ash::vk::Semaphore; 4]>,

    pub fence: Option<ash::vk::Fence>,
}

/// The tracked state of a queue.
#[derive(Debug)]
pub struct QueueState {
    handle: ash::vk::Queue,
    queue_family_index: u32,
    flags: QueueFlags,
    next_seq: u64,
    submissions: VecDeque<QueueSubmission>,
}

impl QueueState {
    pub(crate) fn new(handle: ash::vk::Queue, queue_family_index: u32, flags: QueueFlags) -> Self {
        QueueState {
            handle,
            queue_family_index,
            flags,
            next_seq: 1,
            submissions: VecDeque::new(),
        }
    }

    #[inline]
    pub fn handle(&self) -> ash::vk::Queue {
        self.handle
    }

    #[inline]
    pub fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }

    /// Returns the capabilities of the queue's family.
    #[inline]
    pub fn flags(&self) -> QueueFlags {
        self.flags
    }

    /// Returns the submissions that have not been retired, oldest first.
    #[inline]
    pub fn submissions(&self) -> impl ExactSizeIterator<Item = &QueueSubmission> {
        self.submissions.iter()
    }

    /// Returns the sequence number of the next submission.
    #[inline]
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    pub(crate) fn push_submission(
        &mut self,
        command_buffers: SmallVec<[ash::vk::CommandBuffer; 4]>,
        semaphores: SmallVec<[ash::vk::Semaphore; 4]>,
        fence: Option<ash::vk::Fence>,
    ) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.submissions.push_back(QueueSubmission {
            seq,
            command_buffers,
            semaphores,
            fence,
        });

        seq
    }

    /// Removes the submissions with a sequence number up to and including `up_to`, or all of
    /// them if `None`.
    fn drain_submissions(&mut self, up_to: Option<u64>) -> SmallVec<[QueueSubmission; 4]> {
        let count = match up_to {
            Some(up_to) => self
                .submissions
                .iter()
                .take_while(|submission| submission.seq <= up_to)
                .count(),
            None => self.submissions.len(),
        };

        self.submissions.drain(..count).collect()
    }
}

/// Retires the submissions of `queue` up to and including sequence number `up_to`, or all of its
/// submissions if `None`.
///
/// Retiring a submission can show that submissions on other queues completed as well, for
/// example the one that signaled a semaphore that the retired submission waited on. Those are
/// retired too.
pub(crate) fn retire_queue(registry: &Registry, queue: ash::vk::Queue, up_to: Option<u64>) {
    let mut worklist: SmallVec<[(ash::vk::Queue, Option<u64>); 4]> = SmallVec::new();
    worklist.push((queue, up_to));

    while let Some((queue, up_to)) = worklist.pop() {
        let Some(queue_state) = registry.get::<QueueState>(queue) else {
            continue;
        };
        let submissions = queue_state.lock().drain_submissions(up_to);

        for submission in submissions {
            tracing::trace!(?queue, seq = submission.seq, "retiring submission");

            // The secondary command buffers were recorded along with their primaries, so each is
            // completed on its own.
            for &command_buffer in &submission.command_buffers {
                if let Some(state) = registry.get::<CommandBufferState>(command_buffer) {
                    state.lock().mark_completed();
                }
            }

            for &semaphore in &submission.semaphores {
                if let Some(state) = registry.get::<SemaphoreState>(semaphore) {
                    worklist.extend(
                        state
                            .lock()
                            .retire(queue, submission.seq)
                            .into_iter()
                            .map(|(queue, seq)| (queue, Some(seq))),
                    );
                }
            }

            if let Some(fence) = submission.fence {
                if let Some(state) = registry.get::<FenceState>(fence) {
                    state.lock().retire();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Handle;

    #[test]
    fn drain_up_to() {
        let mut queue = QueueState::new(ash::vk::Queue::from_raw(1), 0, QueueFlags::COMPUTE);

        for _ in 0..3 {
            queue.push_submission(SmallVec::new(), SmallVec::new(), None);
        }

        let drained = queue.drain_submissions(Some(2));
        assert_eq!(
            drained.iter().map(|s| s.seq).collect::<Vec<_>>(),
            [1, 2],
        );
        assert_eq!(queue.submissions().len(), 1);

        // Already retired.
        assert!(queue.drain_submissions(Some(1)).is_empty());

        assert_eq!(queue.drain_submissions(None).len(), 1);
        assert_eq!(queue.next_seq(), 4);
    }
}
