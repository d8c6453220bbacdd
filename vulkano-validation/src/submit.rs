//! Validation and recording of queue submissions.
//!
//! A submission call is validated as a whole by [`validate_submit`], which collects every
//! violation in the call instead of stopping at the first one. Only if the call is valid (or the
//! caller decides to forward it regardless) are its effects applied to the model with
//! [`record_submit`].

use crate::{
    command_buffer::{self, CommandBufferLevel, CommandBufferState},
    queue::{QueueFlags, QueueState},
    registry::{Registry, ResourceState},
    sync::{
        fence::FenceState,
        semaphore::{SemaphoreOperation, SemaphoreOperationKind, SemaphoreState, SemaphoreType},
        submit::SubmissionModel,
        PipelineStages,
    },
    NonExhaustive, ValidationError, ValidatorCreateInfo, Violation,
};
use smallvec::SmallVec;

/// Parameters of one batch of a queue submission.
#[derive(Clone, Debug)]
pub struct SubmitInfo {
    /// The semaphores to wait for before beginning the execution of this batch.
    ///
    /// The default value is empty.
    pub wait_semaphores: Vec<SemaphoreSubmitInfo>,

    /// The command buffers to execute.
    ///
    /// The default value is empty.
    pub command_buffers: Vec<CommandBufferSubmitInfo>,

    /// The semaphores to signal after the execution of this batch has completed.
    ///
    /// The default value is empty.
    pub signal_semaphores: Vec<SemaphoreSubmitInfo>,

    pub _ne: NonExhaustive,
}

impl Default for SubmitInfo {
    #[inline]
    fn default() -> Self {
        Self {
            wait_semaphores: Vec::new(),
            command_buffers: Vec::new(),
            signal_semaphores: Vec::new(),
            _ne: NonExhaustive(()),
        }
    }
}

/// Parameters for a command buffer in a queue submission.
#[derive(Clone, Debug)]
pub struct CommandBufferSubmitInfo {
    /// The command buffer to execute.
    pub command_buffer: ash::vk::CommandBuffer,

    pub _ne: NonExhaustive,
}

impl CommandBufferSubmitInfo {
    /// Returns a `CommandBufferSubmitInfo` with the specified `command_buffer`.
    #[inline]
    pub fn new(command_buffer: ash::vk::CommandBuffer) -> Self {
        Self {
            command_buffer,
            _ne: NonExhaustive(()),
        }
    }
}

/// Parameters for a semaphore signal or wait operation in a queue submission.
#[derive(Clone, Debug)]
pub struct SemaphoreSubmitInfo {
    /// The semaphore to signal or wait for.
    pub semaphore: ash::vk::Semaphore,

    /// For a timeline semaphore, the value to signal or wait for. Ignored for a binary
    /// semaphore.
    ///
    /// The default value is 0.
    pub value: u64,

    /// For a wait operation, the stages of later queue operations that wait for the semaphore.
    /// For a signal operation, the stages of earlier queue operations that must complete before
    /// the semaphore is signaled.
    ///
    /// The default value is [`PipelineStages::ALL_COMMANDS`].
    pub stages: PipelineStages,

    pub _ne: NonExhaustive,
}

impl SemaphoreSubmitInfo {
    /// Returns a `SemaphoreSubmitInfo` with the specified `semaphore`.
    #[inline]
    pub fn new(semaphore: ash::vk::Semaphore) -> Self {
        Self {
            semaphore,
            value: 0,
            stages: PipelineStages::ALL_COMMANDS,
            _ne: NonExhaustive(()),
        }
    }

    /// Returns a `SemaphoreSubmitInfo` for a timeline semaphore operation on `value`.
    #[inline]
    pub fn timeline(semaphore: ash::vk::Semaphore, value: u64) -> Self {
        Self {
            value,
            ..Self::new(semaphore)
        }
    }
}

/// Validates a submission of `submit_infos` to `queue`, signaling `fence` when done.
///
/// Returns every violation found. Objects that are not in the registry are skipped, along with
/// the checks that depend on them.
///
/// The caller must hold [`Registry::serialize_sync`] for as long as the result is relied upon.
pub fn validate_submit(
    registry: &Registry,
    create_info: &ValidatorCreateInfo,
    queue: ash::vk::Queue,
    submit_infos: &[SubmitInfo],
    fence: Option<ash::vk::Fence>,
) -> Vec<Box<ValidationError>> {
    let mut errors = Vec::new();

    let queue_info = match registry.get::<QueueState>(queue) {
        Some(state) => {
            let state = state.lock();
            Some((state.queue_family_index(), state.flags()))
        }
        None => {
            tracing::debug!(?queue, "submitting to an unknown queue");
            None
        }
    };
    let queue_flags = queue_info.map_or(QueueFlags::all(), |(_, flags)| flags);

    let mut model = SubmissionModel::new(
        queue,
        queue_flags,
        create_info.max_timeline_semaphore_value_difference,
        create_info.timeline_semaphore,
    );

    if let Some(fence) = fence {
        if let Some(state) = registry.get::<FenceState>(fence) {
            if let Err(err) = model.validate_fence_for_submit(&state.lock()) {
                errors.push(err.add_context("fence"));
            }
        }
    }

    let mut submit_counts: foldhash::HashMap<ash::vk::CommandBuffer, u32> = Default::default();

    for (submit_info_index, submit_info) in submit_infos.iter().enumerate() {
        let &SubmitInfo {
            ref wait_semaphores,
            ref command_buffers,
            ref signal_semaphores,
            _ne: _,
        } = submit_info;

        let mut suspended = false;

        for (command_buffer_index, command_buffer_submit_info) in
            command_buffers.iter().enumerate()
        {
            let context = || {
                format!(
                    "submit_infos[{}].command_buffers[{}]",
                    submit_info_index, command_buffer_index,
                )
            };
            let command_buffer = command_buffer_submit_info.command_buffer;

            let Some(state) = registry.get::<CommandBufferState>(command_buffer) else {
                tracing::debug!(?command_buffer, "skipping unknown command buffer");
                continue;
            };
            let (level, queue_family_index, has_rendering, resumes, suspends) = {
                let state = state.lock();
                (
                    state.level(),
                    state.queue_family_index(),
                    state.has_rendering(),
                    state.resumes_rendering(),
                    state.suspends_rendering(),
                )
            };

            if level == CommandBufferLevel::Secondary {
                errors.push(
                    ValidationError::new(Violation::SecondarySubmitted)
                        .add_context(context())
                        .add_object(command_buffer)
                        .set_vuids(&["VUID-VkCommandBufferSubmitInfo-commandBuffer-03890"]),
                );
                continue;
            }

            let submit_count = submit_counts.entry(command_buffer).or_insert(0);
            *submit_count += 1;

            let mut command_buffer_errors = Vec::new();
            command_buffer::can_submit(
                registry,
                command_buffer,
                *submit_count,
                &mut command_buffer_errors,
            );
            errors.extend(
                command_buffer_errors
                    .into_iter()
                    .map(|err| err.add_context(context())),
            );

            if let Some((queue_family_index_of_queue, _)) = queue_info {
                if queue_family_index != queue_family_index_of_queue {
                    errors.push(
                        ValidationError::new(Violation::QueueFamilyMismatch {
                            expected: queue_family_index,
                            queue_family_index: queue_family_index_of_queue,
                        })
                        .add_context(context())
                        .add_object(command_buffer)
                        .add_object(queue)
                        .set_vuids(&["VUID-vkQueueSubmit2-commandBuffer-03878"]),
                    );
                }

                for object in command_buffer::bound_objects(registry, command_buffer) {
                    let Some(resource) = registry.get::<ResourceState>(object) else {
                        continue;
                    };

                    if !resource
                        .lock()
                        .sharing()
                        .is_accessible_from(queue_family_index_of_queue)
                    {
                        errors.push(
                            ValidationError::new(Violation::ResourceQueueFamilyMismatch {
                                object,
                                queue_family_index: queue_family_index_of_queue,
                            })
                            .add_context(context())
                            .add_object(command_buffer)
                            .add_object(object)
                            .set_vuids(&["VUID-vkQueueSubmit2-commandBuffer-03879"]),
                        );
                    }
                }
            }

            if has_rendering {
                if suspended && !resumes {
                    errors.push(
                        ValidationError::new(Violation::UnresumedSuspension)
                            .add_context(context())
                            .add_object(command_buffer)
                            .set_vuids(&["VUID-VkSubmitInfo2-commandBuffer-06010"]),
                    );
                } else if resumes && !suspended {
                    errors.push(
                        ValidationError::new(Violation::ResumeWithoutSuspend)
                            .add_context(context())
                            .add_object(command_buffer)
                            .set_vuids(&["VUID-VkSubmitInfo2-commandBuffer-06192"]),
                    );
                }

                suspended = suspends;
            }
        }

        if suspended {
            errors.push(
                ValidationError::new(Violation::UnresumedSuspension)
                    .add_context(format!("submit_infos[{}]", submit_info_index))
                    .set_vuids(&["VUID-VkSubmitInfo2-commandBuffer-06010"]),
            );
        }

        for (semaphore_index, semaphore_submit_info) in wait_semaphores.iter().enumerate() {
            let context = || {
                format!(
                    "submit_infos[{}].wait_semaphores[{}]",
                    submit_info_index, semaphore_index,
                )
            };

            if let Err(err) = model.validate_stages(semaphore_submit_info.stages) {
                errors.push(err.add_context(context()));
            }

            let semaphore = semaphore_submit_info.semaphore;
            let Some(state) = registry.get::<SemaphoreState>(semaphore) else {
                tracing::debug!(?semaphore, "skipping unknown semaphore");
                continue;
            };

            let state = state.lock();

            if let Err(err) = model.validate_wait(&state, semaphore_submit_info.value) {
                errors.push(err.add_context(context()));
            }
        }

        for (semaphore_index, semaphore_submit_info) in signal_semaphores.iter().enumerate() {
            let context = || {
                format!(
                    "submit_infos[{}].signal_semaphores[{}]",
                    submit_info_index, semaphore_index,
                )
            };

            if let Err(err) = model.validate_stages(semaphore_submit_info.stages) {
                errors.push(err.add_context(context()));
            }

            let semaphore = semaphore_submit_info.semaphore;
            let Some(state) = registry.get::<SemaphoreState>(semaphore) else {
                tracing::debug!(?semaphore, "skipping unknown semaphore");
                continue;
            };

            let state = state.lock();

            if let Err(err) = model.validate_signal(&state, semaphore_submit_info.value) {
                errors.push(err.add_context(context()));
            }
        }
    }

    errors
}

/// Applies the effects of a submission to the model.
///
/// Each batch becomes a submission on the queue. The command buffers are marked as submitted,
/// the semaphore operations are added to the semaphores, and `fence` is attached to the last
/// batch (or to an empty submission if there are no batches).
///
/// The caller must hold [`Registry::serialize_sync`].
pub fn record_submit(
    registry: &Registry,
    queue: ash::vk::Queue,
    submit_infos: &[SubmitInfo],
    fence: Option<ash::vk::Fence>,
) {
    let Some(queue_state) = registry.get::<QueueState>(queue) else {
        tracing::debug!(?queue, "not recording a submission to an unknown queue");
        return;
    };
    let queue_family_index = queue_state.lock().queue_family_index();

    let empty = SubmitInfo::default();
    let batches = if submit_infos.is_empty() {
        std::slice::from_ref(&empty)
    } else {
        submit_infos
    };

    for (batch_index, submit_info) in batches.iter().enumerate() {
        let fence = fence.filter(|_| batch_index == batches.len() - 1);

        let mut command_buffers: SmallVec<[ash::vk::CommandBuffer; 4]> = SmallVec::new();

        for command_buffer_submit_info in &submit_info.command_buffers {
            let command_buffer = command_buffer_submit_info.command_buffer;
            command_buffers.extend(command_buffer::mark_submitted(registry, command_buffer, 1));

            for object in command_buffer::bound_objects(registry, command_buffer) {
                if let Some(resource) = registry.get::<ResourceState>(object) {
                    resource.lock().set_owner_if_unowned(queue_family_index);
                }
            }
        }

        let mut semaphores: SmallVec<[ash::vk::Semaphore; 4]> = SmallVec::new();

        for semaphore_submit_info in submit_info
            .wait_semaphores
            .iter()
            .chain(&submit_info.signal_semaphores)
        {
            if !semaphores.contains(&semaphore_submit_info.semaphore) {
                semaphores.push(semaphore_submit_info.semaphore);
            }
        }

        let seq = queue_state
            .lock()
            .push_submission(command_buffers, semaphores, fence);

        let operations = submit_info
            .wait_semaphores
            .iter()
            .map(|info| (SemaphoreOperationKind::Wait, info))
            .chain(
                submit_info
                    .signal_semaphores
                    .iter()
                    .map(|info| (SemaphoreOperationKind::Signal, info)),
            );

        for (kind, semaphore_submit_info) in operations {
            let Some(state) = registry.get::<SemaphoreState>(semaphore_submit_info.semaphore)
            else {
                continue;
            };
            let mut state = state.lock();
            let value = match state.semaphore_type() {
                SemaphoreType::Binary => 0,
                SemaphoreType::Timeline => semaphore_submit_info.value,
            };
            state.push_operation(SemaphoreOperation {
                kind,
                queue,
                seq,
                value,
            });
        }

        if let Some(fence) = fence {
            if let Some(state) = registry.get::<FenceState>(fence) {
                state.lock().submit(queue, seq);
            }
        }

        tracing::trace!(?queue, seq, "recorded submission");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        command_buffer::{CommandBufferLifecycle, CommandBufferUsage, RenderingFlags},
        registry::Sharing,
        sync::semaphore::SemaphoreCreateInfo,
        ObjectRef, TimelinePredicate, ValueSource,
    };

    fn submit_info(command_buffers: &[ash::vk::CommandBuffer]) -> SubmitInfo {
        SubmitInfo {
            command_buffers: command_buffers
                .iter()
                .copied()
                .map(CommandBufferSubmitInfo::new)
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn one_time_submit_twice_in_one_call() {
        let validator = validator!();
        let (queue, command_pool) = queue_and_pool!(validator, 0);
        let command_buffer = executable_command_buffer!(
            validator,
            command_pool,
            1,
            CommandBufferUsage::ONE_TIME_SUBMIT
        );

        let errors = validator.queue_submit(
            queue,
            &[submit_info(&[command_buffer, command_buffer])],
            None,
        );

        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].context, "submit_infos[0].command_buffers[1]");
        assert_eq!(
            errors[0].violation,
            Violation::ExceedsOneTimeSubmit {
                submit_count: 0,
                pending_in_call: 2,
            },
        );

        // Nothing was recorded.
        assert_eq!(
            validator.command_buffer_lifecycle(command_buffer),
            Some(CommandBufferLifecycle::Executable),
        );

        assert!(validator
            .queue_submit(queue, &[submit_info(&[command_buffer])], None)
            .is_empty());
        assert!(matches!(
            validator.queue_submit(queue, &[submit_info(&[command_buffer])], None)[0].violation,
            Violation::ExceedsOneTimeSubmit {
                submit_count: 1,
                pending_in_call: 1,
            },
        ));
    }

    #[test]
    fn pending_without_simultaneous_use() {
        let validator = validator!();
        let (queue, command_pool) = queue_and_pool!(validator, 0);
        let command_buffer =
            executable_command_buffer!(validator, command_pool, 1, CommandBufferUsage::empty());
        let fence = handle!(Fence, 1);
        validator.create_fence(fence, false);

        assert!(validator
            .queue_submit(queue, &[submit_info(&[command_buffer])], Some(fence))
            .is_empty());
        assert_eq!(
            validator.command_buffer_lifecycle(command_buffer),
            Some(CommandBufferLifecycle::Pending),
        );

        let errors = validator.queue_submit(queue, &[submit_info(&[command_buffer])], None);
        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors[0].violation,
            Violation::InUseWithoutSimultaneousUse {
                in_use_count: 1,
                pending_in_call: 1,
            },
        );

        validator.fence_signaled(fence);
        assert_eq!(
            validator.command_buffer_lifecycle(command_buffer),
            Some(CommandBufferLifecycle::Executable),
        );
        assert!(validator
            .queue_submit(queue, &[submit_info(&[command_buffer])], None)
            .is_empty());
    }

    #[test]
    fn simultaneous_use() {
        let validator = validator!();
        let (queue, command_pool) = queue_and_pool!(validator, 0);
        let command_buffer = executable_command_buffer!(
            validator,
            command_pool,
            1,
            CommandBufferUsage::SIMULTANEOUS_USE
        );

        for _ in 0..2 {
            assert!(validator
                .queue_submit(queue, &[submit_info(&[command_buffer, command_buffer])], None)
                .is_empty());
        }

        validator.queue_wait_idle(queue);
        assert_eq!(validator.command_buffer_in_use(command_buffer), Some(false));
    }

    #[test]
    fn secondary_submitted() {
        let validator = validator!();
        let (queue, command_pool) = queue_and_pool!(validator, 0);
        let secondary = handle!(CommandBuffer, 1);
        validator.allocate_command_buffers(
            command_pool,
            CommandBufferLevel::Secondary,
            &[secondary],
        );

        let errors = validator.queue_submit(queue, &[submit_info(&[secondary])], None);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].violation, Violation::SecondarySubmitted);
    }

    #[test]
    fn queue_family_mismatch() {
        let validator = validator!();
        let (_, command_pool) = queue_and_pool!(validator, 0);
        let (other_queue, _) = queue_and_pool!(validator, 1);
        let command_buffer =
            executable_command_buffer!(validator, command_pool, 1, CommandBufferUsage::empty());

        let errors = validator.queue_submit(other_queue, &[submit_info(&[command_buffer])], None);
        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors[0].violation,
            Violation::QueueFamilyMismatch {
                expected: 0,
                queue_family_index: 1,
            },
        );
    }

    #[test]
    fn resource_sharing() {
        let validator = validator!();
        let (queue, command_pool) = queue_and_pool!(validator, 0);
        let (other_queue, other_command_pool) = queue_and_pool!(validator, 1);

        let concurrent = handle!(Buffer, 1);
        let exclusive = handle!(Image, 2);
        validator.register_object(concurrent, Sharing::Concurrent([1, 2].into_iter().collect()));
        validator.register_object(
            exclusive,
            Sharing::Exclusive {
                queue_family_index: None,
            },
        );

        let uses_concurrent = executable_command_buffer!(
            validator,
            command_pool,
            1,
            CommandBufferUsage::empty(),
            |command_buffer| validator.cmd_bind(command_buffer, concurrent).unwrap()
        );
        let errors = validator.queue_submit(queue, &[submit_info(&[uses_concurrent])], None);
        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors[0].violation,
            Violation::ResourceQueueFamilyMismatch {
                object: ObjectRef::new(concurrent),
                queue_family_index: 0,
            },
        );

        // The first queue family to use an exclusive resource acquires it.
        let uses_exclusive = executable_command_buffer!(
            validator,
            command_pool,
            2,
            CommandBufferUsage::SIMULTANEOUS_USE,
            |command_buffer| validator.cmd_bind(command_buffer, exclusive).unwrap()
        );
        assert!(validator
            .queue_submit(queue, &[submit_info(&[uses_exclusive])], None)
            .is_empty());

        let other_uses_exclusive = executable_command_buffer!(
            validator,
            other_command_pool,
            3,
            CommandBufferUsage::empty(),
            |command_buffer| validator.cmd_bind(command_buffer, exclusive).unwrap()
        );
        let errors =
            validator.queue_submit(other_queue, &[submit_info(&[other_uses_exclusive])], None);
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            errors[0].violation,
            Violation::ResourceQueueFamilyMismatch {
                queue_family_index: 1,
                ..
            },
        ));

        validator.transfer_ownership(exclusive, 1);
        assert!(validator
            .queue_submit(other_queue, &[submit_info(&[other_uses_exclusive])], None)
            .is_empty());
    }

    #[test]
    fn rendering_suspension() {
        let validator = validator!();
        let (queue, command_pool) = queue_and_pool!(validator, 0);
        let validator_ref = &validator;
        let render = |flags: RenderingFlags| {
            move |command_buffer: ash::vk::CommandBuffer| {
                validator_ref
                    .cmd_begin_rendering(command_buffer, flags)
                    .unwrap();
                validator_ref.cmd_end_rendering(command_buffer).unwrap();
            }
        };

        let suspends = executable_command_buffer!(
            validator,
            command_pool,
            1,
            CommandBufferUsage::SIMULTANEOUS_USE,
            render(RenderingFlags::SUSPENDING)
        );
        let resumes = executable_command_buffer!(
            validator,
            command_pool,
            2,
            CommandBufferUsage::SIMULTANEOUS_USE,
            render(RenderingFlags::RESUMING)
        );
        let unrelated = executable_command_buffer!(
            validator,
            command_pool,
            3,
            CommandBufferUsage::SIMULTANEOUS_USE
        );

        let errors = validator.validate_queue_submit(queue, &[submit_info(&[resumes])], None);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].violation, Violation::ResumeWithoutSuspend);
        assert_eq!(errors[0].context, "submit_infos[0].command_buffers[0]");

        let errors = validator.validate_queue_submit(queue, &[submit_info(&[suspends])], None);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].violation, Violation::UnresumedSuspension);
        assert_eq!(errors[0].context, "submit_infos[0]");

        // Command buffers without rendering do not end the suspension.
        assert!(validator
            .validate_queue_submit(queue, &[submit_info(&[suspends, unrelated, resumes])], None)
            .is_empty());

        // A suspension does not carry over to the next batch.
        let errors = validator.validate_queue_submit(
            queue,
            &[submit_info(&[suspends]), submit_info(&[resumes])],
            None,
        );
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].context, "submit_infos[0]");
        assert_eq!(errors[1].context, "submit_infos[1].command_buffers[0]");
    }

    #[test]
    fn fence_in_flight() {
        let validator = validator!();
        let (queue, _) = queue_and_pool!(validator, 0);
        let fence = handle!(Fence, 1);
        validator.create_fence(fence, false);

        assert!(validator.queue_submit(queue, &[], Some(fence)).is_empty());

        let errors = validator.queue_submit(queue, &[], Some(fence));
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].context, "fence");
        assert_eq!(errors[0].violation, Violation::AlreadyInFlight);

        assert_eq!(
            validator.reset_fences(&[fence]).unwrap_err().violation,
            Violation::AlreadyInFlight,
        );

        validator.fence_signaled(fence);
        assert_eq!(
            validator.queue_submit(queue, &[], Some(fence))[0].violation,
            Violation::SubmittedSignaled,
        );

        validator.reset_fences(&[fence]).unwrap();
        assert!(validator.queue_submit(queue, &[], Some(fence)).is_empty());
    }

    #[test]
    fn duplicate_pending_timeline_value() {
        let validator = validator!();
        let (queue, _) = queue_and_pool!(validator, 0);
        let semaphore = handle!(Semaphore, 1);
        validator
            .create_semaphore(semaphore, &SemaphoreCreateInfo::timeline(0))
            .unwrap();

        let signal = |value| SubmitInfo {
            signal_semaphores: vec![SemaphoreSubmitInfo::timeline(semaphore, value)],
            ..Default::default()
        };

        assert!(validator.queue_submit(queue, &[signal(5)], None).is_empty());

        let errors = validator.queue_submit(queue, &[signal(5)], None);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].context, "submit_infos[0].signal_semaphores[0]");
        assert_eq!(
            errors[0].violation,
            Violation::TimelineValue {
                predicate: TimelinePredicate::Monotonicity,
                value: 5,
                conflicting_value: 5,
                source: ValueSource::Pending,
            },
        );
        assert!(errors[0].to_string().contains("duplicates"));

        // Once the signal completed, the counter is what the value conflicts with.
        validator.semaphore_reached(semaphore, 5).unwrap();
        assert_eq!(validator.semaphore_counter_value(semaphore), Some(5));
        assert!(matches!(
            validator.queue_submit(queue, &[signal(5)], None)[0].violation,
            Violation::TimelineValue {
                source: ValueSource::Current,
                ..
            },
        ));
        assert!(validator.queue_submit(queue, &[signal(6)], None).is_empty());
    }

    #[test]
    fn timeline_signal_retires_submission() {
        let validator = validator!();
        let (queue, command_pool) = queue_and_pool!(validator, 0);
        let command_buffer =
            executable_command_buffer!(validator, command_pool, 1, CommandBufferUsage::empty());
        let semaphore = handle!(Semaphore, 1);
        validator
            .create_semaphore(semaphore, &SemaphoreCreateInfo::timeline(0))
            .unwrap();

        let errors = validator.queue_submit(
            queue,
            &[SubmitInfo {
                signal_semaphores: vec![SemaphoreSubmitInfo::timeline(semaphore, 3)],
                ..submit_info(&[command_buffer])
            }],
            None,
        );
        assert!(errors.is_empty());
        assert_eq!(validator.command_buffer_in_use(command_buffer), Some(true));

        // Not far enough.
        validator.semaphore_reached(semaphore, 2).unwrap();
        assert_eq!(validator.command_buffer_in_use(command_buffer), Some(true));

        validator.semaphore_reached(semaphore, 3).unwrap();
        assert_eq!(validator.command_buffer_in_use(command_buffer), Some(false));
        assert_eq!(
            validator
                .destroy_semaphore(semaphore)
                .map_err(|err| err.violation),
            Ok(()),
        );
    }

    #[test]
    fn binary_semaphore_across_queues() {
        let validator = validator!();
        let (queue_a, _) = queue_and_pool!(validator, 0);
        let (queue_b, _) = queue_and_pool!(validator, 1);
        let (queue_c, _) = queue_and_pool!(validator, 2);
        let semaphore = handle!(Semaphore, 1);
        validator
            .create_semaphore(semaphore, &SemaphoreCreateInfo::default())
            .unwrap();

        let wait = SubmitInfo {
            wait_semaphores: vec![SemaphoreSubmitInfo::new(semaphore)],
            ..Default::default()
        };
        let signal = SubmitInfo {
            signal_semaphores: vec![SemaphoreSubmitInfo::new(semaphore)],
            ..Default::default()
        };

        // Nothing will ever signal it.
        assert!(matches!(
            validator.validate_queue_submit(queue_a, &[wait.clone()], None)[0].violation,
            Violation::CannotBeSignalled { .. },
        ));

        assert!(validator
            .queue_submit(queue_b, &[signal.clone()], None)
            .is_empty());
        assert!(matches!(
            validator.validate_queue_submit(queue_b, &[signal.clone()], None)[0].violation,
            Violation::ForwardProgressViolation {
                previous_signaler: Some(_),
            },
        ));

        assert!(validator
            .queue_submit(queue_a, &[wait.clone()], None)
            .is_empty());

        let errors = validator.queue_submit(queue_c, &[wait.clone()], None);
        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors[0].violation,
            Violation::AlreadyWaitedByOtherQueue {
                other_queue: queue_a,
            },
        );

        // The wait on A completing means that the signal on B completed too.
        validator.queue_wait_idle(queue_a);
        let state = validator.registry().get::<QueueState>(queue_b).unwrap();
        assert_eq!(state.lock().submissions().len(), 0);

        assert!(validator.destroy_semaphore(semaphore).is_ok());
    }

    #[test]
    fn later_signal_does_not_retire_waiting_queue() {
        let validator = validator!();
        let (queue_a, command_pool) = queue_and_pool!(validator, 0);
        let (queue_b, _) = queue_and_pool!(validator, 1);
        let command_buffer =
            executable_command_buffer!(validator, command_pool, 1, CommandBufferUsage::empty());
        let semaphore = handle!(Semaphore, 1);
        validator
            .create_semaphore(semaphore, &SemaphoreCreateInfo::default())
            .unwrap();
        let fence = handle!(Fence, 1);
        validator.create_fence(fence, false);

        let signal = SubmitInfo {
            signal_semaphores: vec![SemaphoreSubmitInfo::new(semaphore)],
            ..Default::default()
        };

        assert!(validator
            .queue_submit(queue_b, &[signal.clone()], None)
            .is_empty());
        assert!(validator
            .queue_submit(
                queue_a,
                &[SubmitInfo {
                    wait_semaphores: vec![SemaphoreSubmitInfo::new(semaphore)],
                    ..submit_info(&[command_buffer])
                }],
                None,
            )
            .is_empty());
        assert!(validator
            .queue_submit(queue_b, &[signal], Some(fence))
            .is_empty());

        // The second signal shows that the wait happened, not that the command buffer after it
        // finished executing.
        validator.fence_signaled(fence);
        assert_eq!(validator.command_buffer_in_use(command_buffer), Some(true));
        assert_eq!(
            validator
                .reset_command_buffer(command_buffer)
                .unwrap_err()
                .violation,
            Violation::InUse { in_use_count: 1 },
        );
        assert_eq!(
            validator.destroy_semaphore(semaphore).unwrap_err().violation,
            Violation::InUse { in_use_count: 1 },
        );

        validator.queue_wait_idle(queue_a);
        assert_eq!(validator.command_buffer_in_use(command_buffer), Some(false));
        validator.reset_command_buffer(command_buffer).unwrap();
        validator.destroy_semaphore(semaphore).unwrap();
    }

    #[test]
    fn unsupported_wait_stages() {
        let validator = validator!();
        let queue = handle!(Queue, 1);
        validator.create_queue(queue, 0, QueueFlags::TRANSFER);
        let semaphore = handle!(Semaphore, 1);
        validator
            .create_semaphore(semaphore, &SemaphoreCreateInfo::timeline(0))
            .unwrap();

        let errors = validator.queue_submit(
            queue,
            &[SubmitInfo {
                wait_semaphores: vec![SemaphoreSubmitInfo {
                    stages: PipelineStages::FRAGMENT_SHADER | PipelineStages::COPY,
                    ..SemaphoreSubmitInfo::timeline(semaphore, 0)
                }],
                ..Default::default()
            }],
            None,
        );
        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors[0].context,
            "submit_infos[0].wait_semaphores[0].stage_mask",
        );
        assert_eq!(
            errors[0].violation,
            Violation::UnsupportedStages {
                stages: PipelineStages::FRAGMENT_SHADER,
                queue_flags: QueueFlags::TRANSFER,
            },
        );
    }

    #[test]
    fn unknown_objects_are_skipped() {
        let validator = validator!();
        let errors = validator.queue_submit(
            handle!(Queue, 1),
            &[SubmitInfo {
                wait_semaphores: vec![SemaphoreSubmitInfo::new(handle!(Semaphore, 2))],
                ..submit_info(&[handle!(CommandBuffer, 3)])
            }],
            Some(handle!(Fence, 4)),
        );
        assert!(errors.is_empty());
    }
}
