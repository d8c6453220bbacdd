use crate::{
    command_buffer::{
        self, CommandBufferLevel, CommandBufferLifecycle, CommandBufferState, CommandBufferUsage,
        CommandPoolCreateInfo, CommandPoolState, ImageLayoutMap, ImageSubresource,
        RecordedCommand, RenderingFlags,
    },
    queue::{self, QueueFlags, QueueState},
    registry::{LockingMode, Registry, ResourceState, Sharing},
    submit::{self, SubmitInfo},
    sync::{
        fence::FenceState,
        semaphore::{SemaphoreCreateInfo, SemaphoreState, SemaphoreType},
    },
    BrokenBinding, InvalidationCause, NonExhaustive, ObjectRef, ValidationError, Violation,
};
use smallvec::SmallVec;
use std::borrow::Cow;

/// Parameters to create a [`Validator`].
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ValidatorCreateInfo {
    /// How concurrent calls are synchronized.
    ///
    /// The default value is [`LockingMode::Coarse`].
    pub locking: LockingMode,

    /// The `max_timeline_semaphore_value_difference` limit of the device.
    ///
    /// The default value is `2^31 - 1`, the smallest value that devices must support.
    pub max_timeline_semaphore_value_difference: u64,

    /// Whether the `timeline_semaphore` feature is enabled on the device.
    ///
    /// The default value is `true`.
    pub timeline_semaphore: bool,

    #[cfg_attr(feature = "serde", serde(skip))]
    pub _ne: NonExhaustive,
}

impl Default for ValidatorCreateInfo {
    #[inline]
    fn default() -> Self {
        Self {
            locking: LockingMode::Coarse,
            max_timeline_semaphore_value_difference: (1 << 31) - 1,
            timeline_semaphore: true,
            _ne: NonExhaustive(()),
        }
    }
}

/// Validates the calls made to one Vulkan device.
///
/// There is one method for each call that the validator needs to see. Methods that can find
/// violations return them, and also emit them as `tracing` events at the `WARN` level. The model
/// is only updated when a call is found to be valid, except for [`record_queue_submit`], which
/// applies a submission unconditionally.
///
/// Unknown handles are never an error: whatever made them unknown was reported when it happened,
/// so checks that need them are skipped.
///
/// [`record_queue_submit`]: Self::record_queue_submit
pub struct Validator {
    registry: Registry,
    create_info: ValidatorCreateInfo,
}

impl Validator {
    pub fn new(create_info: ValidatorCreateInfo) -> Self {
        tracing::debug!(?create_info, "creating validator");

        Validator {
            registry: Registry::new(create_info.locking),
            create_info,
        }
    }

    #[inline]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    #[inline]
    pub fn create_info(&self) -> &ValidatorCreateInfo {
        &self.create_info
    }

    /// Registers a queue that was retrieved from the device.
    pub fn create_queue(&self, queue: ash::vk::Queue, queue_family_index: u32, flags: QueueFlags) {
        let _guard = self.registry.lock_exclusive();
        self.registry
            .insert(queue, QueueState::new(queue, queue_family_index, flags));
    }

    /// Records that the device finished all work submitted to `queue`.
    pub fn queue_wait_idle(&self, queue: ash::vk::Queue) {
        let _guard = self.registry.lock_exclusive();
        let _sync = self.registry.serialize_sync();
        queue::retire_queue(&self.registry, queue, None);
    }

    /// Records that the device finished all submitted work.
    pub fn device_wait_idle(&self) {
        let _guard = self.registry.lock_exclusive();
        let _sync = self.registry.serialize_sync();

        for (queue, _) in self.registry.all::<QueueState>() {
            queue::retire_queue(&self.registry, queue, None);
        }
    }

    pub fn create_command_pool(
        &self,
        command_pool: ash::vk::CommandPool,
        create_info: &CommandPoolCreateInfo,
    ) {
        let _guard = self.registry.lock_exclusive();
        self.registry
            .insert(command_pool, CommandPoolState::new(command_pool, create_info));
    }

    /// Resets all command buffers allocated from `command_pool`.
    pub fn reset_command_pool(
        &self,
        command_pool: ash::vk::CommandPool,
    ) -> Result<(), Box<ValidationError>> {
        let _guard = self.registry.lock_exclusive();
        let Some(command_buffers) = self.pool_command_buffers(command_pool) else {
            return Ok(());
        };

        traced(self.validate_not_in_use(&command_buffers).map_err(|err| {
            err.set_vuids(&["VUID-vkResetCommandPool-commandPool-00040"])
        }))?;

        for command_buffer in command_buffers {
            self.reset_command_buffer_unchecked(command_buffer, InvalidationCause::Rerecorded);
        }

        Ok(())
    }

    /// Destroys `command_pool` and frees all command buffers allocated from it.
    pub fn destroy_command_pool(
        &self,
        command_pool: ash::vk::CommandPool,
    ) -> Result<(), Box<ValidationError>> {
        let _guard = self.registry.lock_exclusive();
        let Some(command_buffers) = self.pool_command_buffers(command_pool) else {
            return Ok(());
        };

        traced(self.validate_not_in_use(&command_buffers).map_err(|err| {
            err.set_vuids(&["VUID-vkDestroyCommandPool-commandPool-00041"])
        }))?;

        for command_buffer in command_buffers {
            self.free_command_buffer_unchecked(command_buffer);
        }

        self.registry.remove::<CommandPoolState>(command_pool);

        Ok(())
    }

    fn pool_command_buffers(
        &self,
        command_pool: ash::vk::CommandPool,
    ) -> Option<SmallVec<[ash::vk::CommandBuffer; 4]>> {
        let state = self.registry.get::<CommandPoolState>(command_pool)?;
        let command_buffers = state.lock().command_buffers().collect();

        Some(command_buffers)
    }

    fn validate_not_in_use(
        &self,
        command_buffers: &[ash::vk::CommandBuffer],
    ) -> Result<(), Box<ValidationError>> {
        for (index, &command_buffer) in command_buffers.iter().enumerate() {
            if let Some(state) = self.registry.get::<CommandBufferState>(command_buffer) {
                state.lock().validate_destroy().map_err(|err| {
                    err.add_context(format!("command_buffers[{}]", index))
                        .add_object(command_buffer)
                })?;
            }
        }

        Ok(())
    }

    /// Registers command buffers that were allocated from `command_pool`.
    pub fn allocate_command_buffers(
        &self,
        command_pool: ash::vk::CommandPool,
        level: CommandBufferLevel,
        command_buffers: &[ash::vk::CommandBuffer],
    ) {
        let _guard = self.registry.lock_exclusive();
        let Some(pool) = self.registry.get::<CommandPoolState>(command_pool) else {
            tracing::debug!(?command_pool, "allocating from an unknown command pool");
            return;
        };
        let mut pool = pool.lock();

        for &command_buffer in command_buffers {
            pool.add_command_buffer(command_buffer);
            self.registry.insert(
                command_buffer,
                CommandBufferState::new(command_buffer, &pool, level),
            );
        }
    }

    pub fn free_command_buffers(
        &self,
        command_pool: ash::vk::CommandPool,
        command_buffers: &[ash::vk::CommandBuffer],
    ) -> Result<(), Box<ValidationError>> {
        let _guard = self.registry.lock_exclusive();

        traced(self.validate_not_in_use(command_buffers).map_err(|err| {
            err.set_vuids(&["VUID-vkFreeCommandBuffers-pCommandBuffers-00047"])
        }))?;

        if let Some(pool) = self.registry.get::<CommandPoolState>(command_pool) {
            let mut pool = pool.lock();

            for &command_buffer in command_buffers {
                pool.remove_command_buffer(command_buffer);
            }
        }

        for &command_buffer in command_buffers {
            self.free_command_buffer_unchecked(command_buffer);
        }

        Ok(())
    }

    fn free_command_buffer_unchecked(&self, command_buffer: ash::vk::CommandBuffer) {
        let Some(state) = self.registry.remove::<CommandBufferState>(command_buffer) else {
            return;
        };
        let (level, linked) = {
            let mut state = state.lock();
            (state.level(), state.reset_unchecked())
        };

        command_buffer::unlink(
            &self.registry,
            command_buffer,
            level,
            linked,
            InvalidationCause::Destroyed,
        );
    }

    pub fn begin_command_buffer(
        &self,
        command_buffer: ash::vk::CommandBuffer,
        usage: CommandBufferUsage,
    ) -> Result<(), Box<ValidationError>> {
        let _guard = self.registry.lock_exclusive();
        let Some(state) = self.registry.get::<CommandBufferState>(command_buffer) else {
            return Ok(());
        };

        let (level, linked) = {
            let mut state = state.lock();
            traced(state.validate_begin(usage).map_err(|err| err.add_object(command_buffer)))?;

            (state.level(), state.begin_unchecked(usage))
        };

        command_buffer::unlink(
            &self.registry,
            command_buffer,
            level,
            linked,
            InvalidationCause::Rerecorded,
        );

        Ok(())
    }

    pub fn end_command_buffer(
        &self,
        command_buffer: ash::vk::CommandBuffer,
    ) -> Result<(), Box<ValidationError>> {
        self.with_command_buffer(command_buffer, |state| {
            state.validate_end()?;
            state.end_unchecked();

            Ok(())
        })
    }

    /// Explicitly resets a command buffer.
    pub fn reset_command_buffer(
        &self,
        command_buffer: ash::vk::CommandBuffer,
    ) -> Result<(), Box<ValidationError>> {
        let _guard = self.registry.lock_exclusive();
        let Some(state) = self.registry.get::<CommandBufferState>(command_buffer) else {
            return Ok(());
        };

        traced(
            state
                .lock()
                .validate_reset()
                .map_err(|err| err.add_object(command_buffer)),
        )?;

        self.reset_command_buffer_unchecked(command_buffer, InvalidationCause::Rerecorded);

        Ok(())
    }

    fn reset_command_buffer_unchecked(
        &self,
        command_buffer: ash::vk::CommandBuffer,
        cause: InvalidationCause,
    ) {
        let Some(state) = self.registry.get::<CommandBufferState>(command_buffer) else {
            return;
        };
        let (level, linked) = {
            let mut state = state.lock();
            (state.level(), state.reset_unchecked())
        };

        command_buffer::unlink(&self.registry, command_buffer, level, linked, cause);
    }

    // Runs `f` on the record of `command_buffer` with the model locked for mutation.
    fn with_command_buffer(
        &self,
        command_buffer: ash::vk::CommandBuffer,
        f: impl FnOnce(&mut CommandBufferState) -> Result<(), Box<ValidationError>>,
    ) -> Result<(), Box<ValidationError>> {
        let _guard = self.registry.lock_exclusive();
        let Some(state) = self.registry.get::<CommandBufferState>(command_buffer) else {
            return Ok(());
        };
        let result = f(&mut state.lock());

        traced(result.map_err(|err| err.add_object(command_buffer)))
    }

    pub fn cmd_begin_query(
        &self,
        command_buffer: ash::vk::CommandBuffer,
        query_pool: u64,
        query: u32,
    ) -> Result<(), Box<ValidationError>> {
        self.with_command_buffer(command_buffer, |state| {
            state.begin_query(query_pool, query)
        })
    }

    pub fn cmd_end_query(
        &self,
        command_buffer: ash::vk::CommandBuffer,
        query_pool: u64,
        query: u32,
    ) -> Result<(), Box<ValidationError>> {
        self.with_command_buffer(command_buffer, |state| state.end_query(query_pool, query))
    }

    pub fn cmd_begin_conditional_rendering(
        &self,
        command_buffer: ash::vk::CommandBuffer,
    ) -> Result<(), Box<ValidationError>> {
        self.with_command_buffer(command_buffer, CommandBufferState::begin_conditional_rendering)
    }

    pub fn cmd_end_conditional_rendering(
        &self,
        command_buffer: ash::vk::CommandBuffer,
    ) -> Result<(), Box<ValidationError>> {
        self.with_command_buffer(command_buffer, CommandBufferState::end_conditional_rendering)
    }

    pub fn cmd_begin_rendering(
        &self,
        command_buffer: ash::vk::CommandBuffer,
        flags: RenderingFlags,
    ) -> Result<(), Box<ValidationError>> {
        self.with_command_buffer(command_buffer, |state| state.begin_rendering(flags))
    }

    pub fn cmd_end_rendering(
        &self,
        command_buffer: ash::vk::CommandBuffer,
    ) -> Result<(), Box<ValidationError>> {
        self.with_command_buffer(command_buffer, CommandBufferState::end_rendering)
    }

    /// Records that a command in `command_buffer` uses `object`.
    pub fn cmd_bind(
        &self,
        command_buffer: ash::vk::CommandBuffer,
        object: impl Into<ObjectRef>,
    ) -> Result<(), Box<ValidationError>> {
        let object = object.into();
        self.with_command_buffer(command_buffer, |state| state.bind(object))
    }

    /// Records any other command, which the lifecycle does not depend on.
    pub fn cmd_record(
        &self,
        command_buffer: ash::vk::CommandBuffer,
        name: impl Into<Cow<'static, str>>,
    ) -> Result<(), Box<ValidationError>> {
        let name = name.into();
        self.with_command_buffer(command_buffer, |state| state.record(name))
    }

    /// Merges image layouts from the image layout tracking into the map of `command_buffer`.
    pub fn cmd_update_image_layouts(
        &self,
        command_buffer: ash::vk::CommandBuffer,
        image_layouts: impl IntoIterator<Item = (ImageSubresource, ash::vk::ImageLayout)>,
    ) -> Result<(), Box<ValidationError>> {
        self.with_command_buffer(command_buffer, |state| {
            state.merge_image_layouts(image_layouts)
        })
    }

    pub fn cmd_execute_commands(
        &self,
        command_buffer: ash::vk::CommandBuffer,
        secondaries: &[ash::vk::CommandBuffer],
    ) -> Result<(), Box<ValidationError>> {
        let _guard = self.registry.lock_exclusive();
        let Some(state) = self.registry.get::<CommandBufferState>(command_buffer) else {
            return Ok(());
        };

        traced(
            state
                .lock()
                .validate_execute_commands()
                .map_err(|err| err.add_object(command_buffer)),
        )?;

        let mut executed = Vec::with_capacity(secondaries.len());

        for (index, &secondary) in secondaries.iter().enumerate() {
            let Some(secondary_state) = self.registry.get::<CommandBufferState>(secondary) else {
                continue;
            };
            let secondary_state = secondary_state.lock();

            traced(secondary_state.validate_execute().map_err(|err| {
                err.add_context(format!("command_buffers[{}]", index))
                    .add_object(secondary)
            }))?;

            executed.push((secondary, secondary_state.image_layouts().clone()));
        }

        state.lock().execute_commands_unchecked(&executed);

        for &(secondary, _) in &executed {
            if let Some(secondary_state) = self.registry.get::<CommandBufferState>(secondary) {
                secondary_state.lock().link(command_buffer);
            }
        }

        Ok(())
    }

    /// Checks whether `command_buffer` and the secondary command buffers it executes can be
    /// submitted once.
    pub fn can_submit(&self, command_buffer: ash::vk::CommandBuffer) -> Vec<Box<ValidationError>> {
        let _guard = self.registry.lock_shared();
        let mut errors = Vec::new();
        command_buffer::can_submit(&self.registry, command_buffer, 1, &mut errors);
        trace_all(&errors);

        errors
    }

    /// Marks `command_buffer` and the secondary command buffers it executes as submitted
    /// `count` more times, outside of any queue submission.
    pub fn mark_submitted(&self, command_buffer: ash::vk::CommandBuffer, count: u32) {
        let _guard = self.registry.lock_exclusive();
        command_buffer::mark_submitted(&self.registry, command_buffer, count);
    }

    /// Marks one submission of `command_buffer` and the secondary command buffers it executes
    /// as completed.
    pub fn mark_completed(&self, command_buffer: ash::vk::CommandBuffer) {
        let _guard = self.registry.lock_exclusive();
        command_buffer::mark_completed(&self.registry, command_buffer);
    }

    pub fn command_buffer_lifecycle(
        &self,
        command_buffer: ash::vk::CommandBuffer,
    ) -> Option<CommandBufferLifecycle> {
        let _guard = self.registry.lock_shared();
        let state = self.registry.get::<CommandBufferState>(command_buffer)?;
        let lifecycle = state.lock().lifecycle();

        Some(lifecycle)
    }

    pub fn command_buffer_in_use(&self, command_buffer: ash::vk::CommandBuffer) -> Option<bool> {
        let _guard = self.registry.lock_shared();
        let state = self.registry.get::<CommandBufferState>(command_buffer)?;
        let in_use = state.lock().in_use();

        Some(in_use)
    }

    /// Returns the commands recorded into `command_buffer` since it was last begun.
    pub fn command_buffer_commands(
        &self,
        command_buffer: ash::vk::CommandBuffer,
    ) -> Option<Vec<RecordedCommand>> {
        let _guard = self.registry.lock_shared();
        let state = self.registry.get::<CommandBufferState>(command_buffer)?;
        let commands = state.lock().commands().to_vec();

        Some(commands)
    }

    pub fn command_buffer_image_layouts(
        &self,
        command_buffer: ash::vk::CommandBuffer,
    ) -> Option<ImageLayoutMap> {
        let _guard = self.registry.lock_shared();
        let state = self.registry.get::<CommandBufferState>(command_buffer)?;
        let image_layouts = state.lock().image_layouts().clone();

        Some(image_layouts)
    }

    /// Registers a resource that command buffers can use.
    pub fn register_object(&self, object: impl Into<ObjectRef>, sharing: Sharing) {
        let object = object.into();
        let _guard = self.registry.lock_exclusive();
        self.registry
            .insert(object, ResourceState::new(object, sharing));
    }

    /// Records a queue family ownership transfer of an exclusive resource.
    pub fn transfer_ownership(&self, object: impl Into<ObjectRef>, queue_family_index: u32) {
        let object = object.into();
        let _guard = self.registry.lock_exclusive();

        if let Some(resource) = self.registry.get::<ResourceState>(object) {
            resource.lock().set_owner(queue_family_index);
        }
    }

    /// Records that `object` was destroyed. Command buffers that use it become invalid.
    pub fn destroy_object(&self, object: impl Into<ObjectRef>) {
        let object = object.into();
        let _guard = self.registry.lock_exclusive();
        self.registry.remove::<ResourceState>(object);
        self.invalidate_users(object, InvalidationCause::Destroyed);
    }

    /// Records that `object` was updated in a way that invalidates command buffers using it, for
    /// example a descriptor set that was written to.
    pub fn update_object(&self, object: impl Into<ObjectRef>) {
        let object = object.into();
        let _guard = self.registry.lock_exclusive();
        self.invalidate_users(object, InvalidationCause::Updated);
    }

    fn invalidate_users(&self, object: ObjectRef, cause: InvalidationCause) {
        let users: SmallVec<[ash::vk::CommandBuffer; 4]> = self
            .registry
            .all::<CommandBufferState>()
            .into_iter()
            .filter(|(_, state)| state.lock().uses_object(object))
            .map(|(command_buffer, _)| command_buffer)
            .collect();

        command_buffer::invalidate(&self.registry, users, BrokenBinding { object, cause });
    }

    pub fn create_semaphore(
        &self,
        semaphore: ash::vk::Semaphore,
        create_info: &SemaphoreCreateInfo,
    ) -> Result<(), Box<ValidationError>> {
        if create_info.semaphore_type == SemaphoreType::Timeline
            && !self.create_info.timeline_semaphore
        {
            return traced(Err(ValidationError::new(Violation::FeatureNotEnabled {
                feature: "timeline_semaphore",
            })
            .add_context("create_info.semaphore_type")
            .set_vuids(&["VUID-VkSemaphoreTypeCreateInfo-timelineSemaphore-03252"])));
        }

        let _guard = self.registry.lock_exclusive();
        self.registry
            .insert(semaphore, SemaphoreState::new(semaphore, create_info));

        Ok(())
    }

    /// Records that an external payload was imported into `semaphore`.
    pub fn import_semaphore(&self, semaphore: ash::vk::Semaphore, temporary: bool) {
        let _guard = self.registry.lock_exclusive();
        let _sync = self.registry.serialize_sync();

        if let Some(state) = self.registry.get::<SemaphoreState>(semaphore) {
            state.lock().import(temporary);
        }
    }

    pub fn destroy_semaphore(
        &self,
        semaphore: ash::vk::Semaphore,
    ) -> Result<(), Box<ValidationError>> {
        let _guard = self.registry.lock_exclusive();
        let _sync = self.registry.serialize_sync();
        let Some(state) = self.registry.get::<SemaphoreState>(semaphore) else {
            return Ok(());
        };

        traced(
            state
                .lock()
                .validate_destroy()
                .map_err(|err| err.add_object(semaphore)),
        )?;
        self.registry.remove::<SemaphoreState>(semaphore);

        Ok(())
    }

    /// Signals a timeline semaphore from the host.
    pub fn signal_semaphore(
        &self,
        semaphore: ash::vk::Semaphore,
        value: u64,
    ) -> Result<(), Box<ValidationError>> {
        let _guard = self.registry.lock_exclusive();
        let _sync = self.registry.serialize_sync();
        let Some(state) = self.registry.get::<SemaphoreState>(semaphore) else {
            return Ok(());
        };
        let mut state = state.lock();
        let max_difference = self.create_info.max_timeline_semaphore_value_difference;

        traced(
            state
                .validate_host_signal(value, max_difference)
                .map_err(|err| err.add_context("signal_info.value").add_object(semaphore)),
        )?;
        state.signal_from_host(value);

        Ok(())
    }

    /// Records that the application observed that a timeline semaphore reached `value`, by
    /// waiting for it or by querying its counter. The submissions that signal it up to that value
    /// are retired.
    pub fn semaphore_reached(
        &self,
        semaphore: ash::vk::Semaphore,
        value: u64,
    ) -> Result<(), Box<ValidationError>> {
        let _guard = self.registry.lock_exclusive();
        let _sync = self.registry.serialize_sync();
        let Some(state) = self.registry.get::<SemaphoreState>(semaphore) else {
            return Ok(());
        };

        let completed = {
            let mut state = state.lock();

            if state.semaphore_type() != SemaphoreType::Timeline {
                return traced(Err(ValidationError::new(Violation::NotTimeline)
                    .add_object(semaphore)
                    .set_vuids(&["VUID-VkSemaphoreWaitInfo-pSemaphores-03256"])));
            }

            state.observe_value(value)
        };

        for (queue, seq) in completed {
            queue::retire_queue(&self.registry, queue, Some(seq));
        }

        Ok(())
    }

    /// Returns the counter value of a timeline semaphore, as far as the validator knows.
    pub fn semaphore_counter_value(&self, semaphore: ash::vk::Semaphore) -> Option<u64> {
        let _guard = self.registry.lock_shared();
        let state = self.registry.get::<SemaphoreState>(semaphore)?;
        let state = state.lock();

        (state.semaphore_type() == SemaphoreType::Timeline).then(|| state.payload())
    }

    pub fn create_fence(&self, fence: ash::vk::Fence, signaled: bool) {
        let _guard = self.registry.lock_exclusive();
        self.registry.insert(fence, FenceState::new(fence, signaled));
    }

    /// Records that an external payload was imported into `fence`.
    pub fn import_fence(&self, fence: ash::vk::Fence, temporary: bool) {
        let _guard = self.registry.lock_exclusive();

        if let Some(state) = self.registry.get::<FenceState>(fence) {
            state.lock().import(temporary);
        }
    }

    pub fn reset_fences(&self, fences: &[ash::vk::Fence]) -> Result<(), Box<ValidationError>> {
        let _guard = self.registry.lock_exclusive();
        let states: SmallVec<[_; 4]> = fences
            .iter()
            .filter_map(|&fence| self.registry.get::<FenceState>(fence))
            .collect();

        for (index, state) in states.iter().enumerate() {
            traced(
                state
                    .lock()
                    .validate_reset()
                    .map_err(|err| err.add_context(format!("fences[{}]", index))),
            )?;
        }

        for state in states {
            state.lock().reset();
        }

        Ok(())
    }

    pub fn destroy_fence(&self, fence: ash::vk::Fence) -> Result<(), Box<ValidationError>> {
        let _guard = self.registry.lock_exclusive();
        let Some(state) = self.registry.get::<FenceState>(fence) else {
            return Ok(());
        };

        traced(state.lock().validate_destroy())?;
        self.registry.remove::<FenceState>(fence);

        Ok(())
    }

    /// Records that the application observed that `fence` is signaled, by waiting for it or by
    /// querying its status. The submission that signals it and every earlier submission on the
    /// same queue are retired.
    pub fn fence_signaled(&self, fence: ash::vk::Fence) {
        let _guard = self.registry.lock_exclusive();
        let _sync = self.registry.serialize_sync();
        let Some(state) = self.registry.get::<FenceState>(fence) else {
            return;
        };

        let submission = state.lock().submission();

        if let Some((queue, seq)) = submission {
            queue::retire_queue(&self.registry, queue, Some(seq));
        }

        state.lock().retire();
    }

    /// Validates a submission to `queue`, and records it if it is valid.
    ///
    /// Returns the violations found. If there are any, the model is left unchanged.
    pub fn queue_submit(
        &self,
        queue: ash::vk::Queue,
        submit_infos: &[SubmitInfo],
        fence: Option<ash::vk::Fence>,
    ) -> Vec<Box<ValidationError>> {
        let _guard = self.registry.lock_exclusive();
        let _sync = self.registry.serialize_sync();

        let errors = submit::validate_submit(
            &self.registry,
            &self.create_info,
            queue,
            submit_infos,
            fence,
        );
        trace_all(&errors);

        if errors.is_empty() {
            submit::record_submit(&self.registry, queue, submit_infos, fence);
        }

        errors
    }

    /// Validates a submission to `queue` without recording it.
    pub fn validate_queue_submit(
        &self,
        queue: ash::vk::Queue,
        submit_infos: &[SubmitInfo],
        fence: Option<ash::vk::Fence>,
    ) -> Vec<Box<ValidationError>> {
        let _guard = self.registry.lock_shared();
        let _sync = self.registry.serialize_sync();

        let errors = submit::validate_submit(
            &self.registry,
            &self.create_info,
            queue,
            submit_infos,
            fence,
        );
        trace_all(&errors);

        errors
    }

    /// Records a submission to `queue` without validating it, for a submission that is forwarded
    /// to the device regardless of its violations.
    pub fn record_queue_submit(
        &self,
        queue: ash::vk::Queue,
        submit_infos: &[SubmitInfo],
        fence: Option<ash::vk::Fence>,
    ) {
        let _guard = self.registry.lock_exclusive();
        let _sync = self.registry.serialize_sync();
        submit::record_submit(&self.registry, queue, submit_infos, fence);
    }
}

impl Default for Validator {
    #[inline]
    fn default() -> Self {
        Validator::new(ValidatorCreateInfo::default())
    }
}

fn traced<T>(result: Result<T, Box<ValidationError>>) -> Result<T, Box<ValidationError>> {
    if let Err(err) = &result {
        err.trace();
    }

    result
}

fn trace_all(errors: &[Box<ValidationError>]) {
    for err in errors {
        err.trace();
    }
}
