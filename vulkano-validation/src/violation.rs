use crate::{
    command_buffer::CommandBufferLifecycle, queue::QueueFlags, sync::PipelineStages, ObjectRef,
};
use std::fmt::{Display, Error as FmtError, Formatter};

/// A broken valid-usage rule.
///
/// Every check performed by the validator produces exactly one of these variants. The variants
/// carry the expected and actual values where there are any, so that a violation can be
/// reported without looking at the model again.
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Violation {
    /// A command buffer was begun while it was already recording.
    AlreadyRecording,

    /// A command buffer that is not in the initial state was begun, but its pool was not created
    /// with the `RESET_COMMAND_BUFFER` flag.
    ImplicitResetNotAllowed { state: CommandBufferLifecycle },

    /// A command buffer was explicitly reset, but its pool was not created with the
    /// `RESET_COMMAND_BUFFER` flag.
    ResetNotPermitted,

    /// The usage flags contain both `ONE_TIME_SUBMIT` and `SIMULTANEOUS_USE`.
    ConflictingUsageFlags,

    /// A command was recorded, or a command buffer was ended, outside of the recording state.
    NotRecording { state: CommandBufferLifecycle },

    /// A command buffer was ended while a query was still active.
    UnterminatedQuery { query_pool: u64, query: u32 },

    /// A command buffer was ended while a conditional rendering region was still open.
    UnterminatedConditionalRender,

    /// A command buffer was ended while a dynamic rendering instance was still open.
    UnterminatedRendering,

    /// A scope was begun while the same scope was already active.
    ScopeAlreadyActive { scope: RecordingScope },

    /// A scope was ended while it was not active.
    ScopeNotActive { scope: RecordingScope },

    /// A command buffer in the initial state was submitted or executed.
    NeverRecorded,

    /// A command buffer that is still recording was submitted or executed.
    StillRecording,

    /// A command buffer that was invalidated was used.
    Invalid { binding: BrokenBinding },

    /// A command buffer begun with `ONE_TIME_SUBMIT` would be submitted more than once.
    ExceedsOneTimeSubmit { submit_count: u32, pending_in_call: u32 },

    /// A command buffer not begun with `SIMULTANEOUS_USE` is already in use, or appears more
    /// than once in the same call.
    InUseWithoutSimultaneousUse { in_use_count: u32, pending_in_call: u32 },

    /// An object was reset or destroyed while the device may still be using it.
    InUse { in_use_count: u32 },

    /// A primary command buffer was passed where a secondary one is required.
    NotSecondary,

    /// A secondary command buffer was submitted directly to a queue.
    SecondarySubmitted,

    /// A command buffer resumes a render pass instance, but no previous command buffer in the
    /// batch suspended one.
    ResumeWithoutSuspend,

    /// A suspended render pass instance is not resumed by the next command buffer in the batch.
    UnresumedSuspension,

    /// A queue waits on a binary semaphore that another queue is already waiting on.
    AlreadyWaitedByOtherQueue { other_queue: ash::vk::Queue },

    /// A queue waits on a binary semaphore that has no pending or completed signal left.
    CannotBeSignalled { timeline_semantics: bool },

    /// A binary semaphore is signaled while a previous signal has not been waited on yet.
    ForwardProgressViolation { previous_signaler: Option<ash::vk::Queue> },

    /// A timeline semaphore value breaks one of the ordering rules.
    TimelineValue {
        predicate: TimelinePredicate,
        value: u64,
        conflicting_value: u64,
        source: ValueSource,
    },

    /// A host-side timeline operation was used on a binary semaphore.
    NotTimeline,

    /// A fence is submitted or reset while a previous submission using it is still in flight.
    AlreadyInFlight,

    /// A fence is submitted while it is already signaled.
    SubmittedSignaled,

    /// A command buffer is submitted to a queue of another queue family than its pool's.
    QueueFamilyMismatch { expected: u32, queue_family_index: u32 },

    /// A resource used by a command buffer is not accessible from the submitting queue family.
    ResourceQueueFamilyMismatch { object: ObjectRef, queue_family_index: u32 },

    /// Pipeline stages were requested that the queue does not support.
    UnsupportedStages {
        stages: PipelineStages,
        queue_flags: QueueFlags,
    },

    /// A device feature that the operation needs was not enabled.
    FeatureNotEnabled { feature: &'static str },
}

impl Violation {
    /// Returns the broad category of the rule.
    pub fn kind(&self) -> ViolationKind {
        match self {
            Self::AlreadyRecording
            | Self::ImplicitResetNotAllowed { .. }
            | Self::ResetNotPermitted
            | Self::ConflictingUsageFlags
            | Self::NotRecording { .. }
            | Self::UnterminatedQuery { .. }
            | Self::UnterminatedConditionalRender
            | Self::UnterminatedRendering
            | Self::ScopeAlreadyActive { .. }
            | Self::ScopeNotActive { .. }
            | Self::NeverRecorded
            | Self::StillRecording
            | Self::ExceedsOneTimeSubmit { .. }
            | Self::InUseWithoutSimultaneousUse { .. }
            | Self::NotSecondary
            | Self::SecondarySubmitted
            | Self::ResumeWithoutSuspend
            | Self::UnresumedSuspension => ViolationKind::Sequencing,
            Self::Invalid { .. } | Self::InUse { .. } => ViolationKind::ResourceLifetime,
            Self::AlreadyWaitedByOtherQueue { .. }
            | Self::CannotBeSignalled { .. }
            | Self::ForwardProgressViolation { .. }
            | Self::TimelineValue { .. }
            | Self::NotTimeline
            | Self::AlreadyInFlight
            | Self::SubmittedSignaled => ViolationKind::Synchronization,
            Self::QueueFamilyMismatch { .. }
            | Self::ResourceQueueFamilyMismatch { .. }
            | Self::UnsupportedStages { .. }
            | Self::FeatureNotEnabled { .. } => ViolationKind::Capability,
        }
    }
}

impl Display for Violation {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        match self {
            Self::AlreadyRecording => write!(f, "the command buffer is already recording"),
            Self::ImplicitResetNotAllowed { state } => write!(
                f,
                "the command buffer is in the {:?} state, but its pool was not created with \
                `CommandPoolCreateFlags::RESET_COMMAND_BUFFER`, so it cannot be reset implicitly",
                state,
            ),
            Self::ResetNotPermitted => write!(
                f,
                "the pool of the command buffer was not created with \
                `CommandPoolCreateFlags::RESET_COMMAND_BUFFER`",
            ),
            Self::ConflictingUsageFlags => write!(
                f,
                "the usage contains both `ONE_TIME_SUBMIT` and `SIMULTANEOUS_USE`",
            ),
            Self::NotRecording { state } => write!(
                f,
                "the command buffer is in the {:?} state, not the recording state",
                state,
            ),
            Self::UnterminatedQuery { query_pool, query } => write!(
                f,
                "query {} of query pool {:#x} is still active",
                query, query_pool,
            ),
            Self::UnterminatedConditionalRender => {
                write!(f, "a conditional rendering region is still open")
            }
            Self::UnterminatedRendering => write!(f, "a render pass instance is still open"),
            Self::ScopeAlreadyActive { scope } => write!(f, "{} is already active", scope),
            Self::ScopeNotActive { scope } => write!(f, "{} is not active", scope),
            Self::NeverRecorded => write!(f, "the command buffer has never been recorded"),
            Self::StillRecording => write!(f, "the command buffer is still recording"),
            Self::Invalid { binding } => write!(
                f,
                "the command buffer is invalid, because {} was {}",
                binding.object, binding.cause,
            ),
            Self::ExceedsOneTimeSubmit {
                submit_count,
                pending_in_call,
            } => write!(
                f,
                "the command buffer was begun with `ONE_TIME_SUBMIT`, but has been submitted {} \
                times already and appears {} times in this call",
                submit_count, pending_in_call,
            ),
            Self::InUseWithoutSimultaneousUse {
                in_use_count,
                pending_in_call,
            } => write!(
                f,
                "the command buffer was not begun with `SIMULTANEOUS_USE`, but is in use by {} \
                submissions and appears {} times in this call",
                in_use_count, pending_in_call,
            ),
            Self::InUse { in_use_count } => write!(
                f,
                "the object is still in use by {} pending operations",
                in_use_count,
            ),
            Self::NotSecondary => write!(f, "the command buffer is not a secondary command buffer"),
            Self::SecondarySubmitted => {
                write!(f, "a secondary command buffer cannot be submitted to a queue")
            }
            Self::ResumeWithoutSuspend => write!(
                f,
                "the command buffer resumes a render pass instance, but no previous command \
                buffer in the batch suspended one",
            ),
            Self::UnresumedSuspension => write!(
                f,
                "a render pass instance was suspended, but is not resumed by the next command \
                buffer in the batch",
            ),
            Self::AlreadyWaitedByOtherQueue { other_queue } => write!(
                f,
                "queue {:?} is already waiting on the semaphore",
                other_queue,
            ),
            Self::CannotBeSignalled { .. } => write!(
                f,
                "the queue is waiting on a semaphore that has no way to be signaled",
            ),
            Self::ForwardProgressViolation { previous_signaler } => match previous_signaler {
                Some(queue) => write!(
                    f,
                    "the semaphore was previously signaled by queue {:?}, but has not since been \
                    waited on",
                    queue,
                ),
                None => write!(
                    f,
                    "the semaphore is already signaled, but has not since been waited on",
                ),
            },
            Self::TimelineValue {
                predicate,
                value,
                conflicting_value,
                source,
            } => match predicate {
                TimelinePredicate::Monotonicity if value == conflicting_value => write!(
                    f,
                    "the signal value {} duplicates a {} value",
                    value, source,
                ),
                TimelinePredicate::Monotonicity => write!(
                    f,
                    "the signal value {} is not greater than the {} value {}",
                    value, source, conflicting_value,
                ),
                TimelinePredicate::BoundedDrift => write!(
                    f,
                    "the value {} differs from the {} value {} by more than \
                    `max_timeline_semaphore_value_difference`",
                    value, source, conflicting_value,
                ),
                TimelinePredicate::BelowPending => write!(
                    f,
                    "the value {} is not less than the {} signal value {}",
                    value, source, conflicting_value,
                ),
            },
            Self::NotTimeline => write!(f, "the semaphore is not a timeline semaphore"),
            Self::AlreadyInFlight => write!(
                f,
                "the fence is still in use by a submission that has not completed",
            ),
            Self::SubmittedSignaled => write!(
                f,
                "the fence is already signaled and must be reset before it is submitted again",
            ),
            Self::QueueFamilyMismatch {
                expected,
                queue_family_index,
            } => write!(
                f,
                "the command buffer was allocated for queue family {}, but is submitted to \
                queue family {}",
                expected, queue_family_index,
            ),
            Self::ResourceQueueFamilyMismatch {
                object,
                queue_family_index,
            } => write!(
                f,
                "{} is not accessible from queue family {}",
                object, queue_family_index,
            ),
            Self::UnsupportedStages {
                stages,
                queue_flags,
            } => write!(
                f,
                "contains stages ({:?}) that are not supported by a queue with flags {:?}",
                stages, queue_flags,
            ),
            Self::FeatureNotEnabled { feature } => {
                write!(f, "the `{}` feature must be enabled on the device", feature)
            }
        }
    }
}

/// The broad category of a [`Violation`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ViolationKind {
    /// An operation was called while an object was in the wrong lifecycle state.
    Sequencing,

    /// An object was used after it was destroyed or invalidated, or destroyed while in use.
    ResourceLifetime,

    /// A semaphore or fence was used in a way that breaks its signal-wait contract.
    Synchronization,

    /// The operation is not supported by the queue family or the enabled device features.
    Capability,
}

/// An object that a command buffer depends on, which is no longer valid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BrokenBinding {
    pub object: ObjectRef,
    pub cause: InvalidationCause,
}

/// Why a [`BrokenBinding`] is broken.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InvalidationCause {
    Destroyed,
    Updated,
    Rerecorded,
}

impl Display for InvalidationCause {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        let value = match self {
            InvalidationCause::Destroyed => "destroyed",
            InvalidationCause::Updated => "updated",
            InvalidationCause::Rerecorded => "rerecorded",
        };

        write!(f, "{}", value)
    }
}

/// Which of the timeline semaphore rules a value broke.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TimelinePredicate {
    /// A signal value must be strictly greater than every completed and pending value.
    Monotonicity,

    /// A value must not be further than `max_timeline_semaphore_value_difference` away from any
    /// completed or pending value.
    BoundedDrift,

    /// A host signal value must be less than every pending signal value.
    BelowPending,
}

/// Where the value that a timeline value conflicted with comes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValueSource {
    /// The payload of the semaphore, as of the last completed operation.
    Current,

    /// An operation that was submitted but has not completed, or that appears earlier in the
    /// same call.
    Pending,
}

impl Display for ValueSource {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        match self {
            ValueSource::Current => write!(f, "current"),
            ValueSource::Pending => write!(f, "pending"),
        }
    }
}

/// A region of commands that must be closed before a command buffer is ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RecordingScope {
    Query { query_pool: u64, query: u32 },
    ConditionalRendering,
    Rendering,
}

impl Display for RecordingScope {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        match self {
            RecordingScope::Query { query_pool, query } => {
                write!(f, "query {} of query pool {:#x}", query, query_pool)
            }
            RecordingScope::ConditionalRendering => write!(f, "conditional rendering"),
            RecordingScope::Rendering => write!(f, "a render pass instance"),
        }
    }
}
