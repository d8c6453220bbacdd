use super::{
    CommandBufferLevel, CommandBufferUsage, CommandPoolCreateFlags, CommandPoolState,
    ImageLayoutMap, RecordedCommand, RenderingFlags,
};
use crate::{BrokenBinding, ObjectRef, RecordingScope, ValidationError, Violation};
use smallvec::SmallVec;
use std::borrow::Cow;

/// The state of a command buffer in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CommandBufferLifecycle {
    /// Freshly allocated or reset. Nothing is recorded.
    Initial,

    /// Between begin and end.
    Recording,

    /// Ended and ready to be submitted or executed.
    Executable,

    /// Submitted, and at least one submission has not completed yet.
    Pending,

    /// An object used by the command buffer became invalid while it was recording.
    InvalidIncomplete,

    /// An object used by the command buffer became invalid after it was ended.
    InvalidComplete,
}

impl CommandBufferLifecycle {
    /// Returns whether this is one of the two invalid states.
    #[inline]
    pub fn is_invalid(self) -> bool {
        matches!(self, Self::InvalidIncomplete | Self::InvalidComplete)
    }
}

/// The tracked state of one command buffer.
#[derive(Debug)]
pub struct CommandBufferState {
    handle: ash::vk::CommandBuffer,
    pool: ash::vk::CommandPool,
    pool_flags: CommandPoolCreateFlags,
    queue_family_index: u32,
    level: CommandBufferLevel,

    lifecycle: CommandBufferLifecycle,
    usage: CommandBufferUsage,
    in_use_count: u32,
    submit_count: u32,

    // For a primary command buffer, the secondary command buffers it executes. For a secondary
    // command buffer, the primary command buffers that execute it.
    linked_command_buffers: foldhash::HashSet<ash::vk::CommandBuffer>,
    broken_bindings: SmallVec<[BrokenBinding; 1]>,
    ledger: Ledger,
}

#[derive(Debug, Default)]
struct Ledger {
    commands: Vec<RecordedCommand>,
    active_queries: SmallVec<[(u64, u32); 2]>,
    conditional_rendering: bool,
    rendering: Option<RenderingFlags>,
    has_rendering: bool,
    resumes_rendering: bool,
    suspends_rendering: bool,
    bound_objects: foldhash::HashSet<ObjectRef>,
    image_layouts: ImageLayoutMap,
}

impl CommandBufferState {
    pub(crate) fn new(
        handle: ash::vk::CommandBuffer,
        pool: &CommandPoolState,
        level: CommandBufferLevel,
    ) -> Self {
        CommandBufferState {
            handle,
            pool: pool.handle(),
            pool_flags: pool.flags(),
            queue_family_index: pool.queue_family_index(),
            level,
            lifecycle: CommandBufferLifecycle::Initial,
            usage: CommandBufferUsage::empty(),
            in_use_count: 0,
            submit_count: 0,
            linked_command_buffers: Default::default(),
            broken_bindings: SmallVec::new(),
            ledger: Ledger::default(),
        }
    }

    #[inline]
    pub fn handle(&self) -> ash::vk::CommandBuffer {
        self.handle
    }

    /// Returns the pool that the command buffer was allocated from.
    #[inline]
    pub fn pool(&self) -> ash::vk::CommandPool {
        self.pool
    }

    /// Returns the queue family of the pool that the command buffer was allocated from.
    #[inline]
    pub fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }

    #[inline]
    pub fn level(&self) -> CommandBufferLevel {
        self.level
    }

    #[inline]
    pub fn lifecycle(&self) -> CommandBufferLifecycle {
        self.lifecycle
    }

    /// Returns the usage that the command buffer was last begun with.
    #[inline]
    pub fn usage(&self) -> CommandBufferUsage {
        self.usage
    }

    /// Returns the number of submissions that are currently executing the command buffer.
    #[inline]
    pub fn in_use_count(&self) -> u32 {
        self.in_use_count
    }

    /// Returns whether the device may currently be executing the command buffer.
    #[inline]
    pub fn in_use(&self) -> bool {
        self.in_use_count != 0
    }

    /// Returns the number of times the command buffer was submitted since it was last begun.
    #[inline]
    pub fn submit_count(&self) -> u32 {
        self.submit_count
    }

    #[inline]
    pub fn linked_command_buffers(&self) -> impl Iterator<Item = ash::vk::CommandBuffer> + '_ {
        self.linked_command_buffers.iter().copied()
    }

    #[inline]
    pub fn broken_bindings(&self) -> &[BrokenBinding] {
        &self.broken_bindings
    }

    #[inline]
    pub fn commands(&self) -> &[RecordedCommand] {
        &self.ledger.commands
    }

    #[inline]
    pub fn bound_objects(&self) -> impl Iterator<Item = ObjectRef> + '_ {
        self.ledger.bound_objects.iter().copied()
    }

    /// Returns whether a command recorded since the last begin uses `object`.
    #[inline]
    pub fn uses_object(&self, object: ObjectRef) -> bool {
        self.ledger.bound_objects.contains(&object)
    }

    /// Returns whether the first render pass instance of the command buffer resumes a
    /// suspended one.
    #[inline]
    pub fn resumes_rendering(&self) -> bool {
        self.ledger.resumes_rendering
    }

    /// Returns whether the last render pass instance of the command buffer is suspended.
    #[inline]
    pub fn suspends_rendering(&self) -> bool {
        self.ledger.suspends_rendering
    }

    #[inline]
    pub fn has_rendering(&self) -> bool {
        self.ledger.has_rendering
    }

    #[inline]
    pub fn image_layouts(&self) -> &ImageLayoutMap {
        &self.ledger.image_layouts
    }

    fn invalid_error(&self) -> Box<ValidationError> {
        let binding = self.broken_bindings.first().copied().unwrap_or(BrokenBinding {
            object: ObjectRef::new(self.handle),
            cause: crate::InvalidationCause::Destroyed,
        });

        ValidationError::new(Violation::Invalid { binding }).add_object(binding.object)
    }

    pub fn validate_begin(&self, usage: CommandBufferUsage) -> Result<(), Box<ValidationError>> {
        match self.lifecycle {
            CommandBufferLifecycle::Recording => {
                return Err(ValidationError::new(Violation::AlreadyRecording)
                    .set_vuids(&["VUID-vkBeginCommandBuffer-commandBuffer-00049"]));
            }
            CommandBufferLifecycle::Initial => (),
            state => {
                if !self
                    .pool_flags
                    .intersects(CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
                {
                    return Err(
                        ValidationError::new(Violation::ImplicitResetNotAllowed { state })
                            .add_object(self.pool)
                            .set_vuids(&["VUID-vkBeginCommandBuffer-commandBuffer-00050"]),
                    );
                }
            }
        }

        if usage.contains(
            CommandBufferUsage::ONE_TIME_SUBMIT | CommandBufferUsage::SIMULTANEOUS_USE,
        ) {
            return Err(ValidationError::new(Violation::ConflictingUsageFlags)
                .add_context("usage"));
        }

        Ok(())
    }

    /// Begins recording, implicitly resetting the command buffer.
    ///
    /// Returns the command buffers that were linked to this one; the caller must unlink them.
    pub(crate) fn begin_unchecked(
        &mut self,
        usage: CommandBufferUsage,
    ) -> SmallVec<[ash::vk::CommandBuffer; 4]> {
        let linked = self.reset_unchecked();
        self.lifecycle = CommandBufferLifecycle::Recording;
        self.usage = usage;
        tracing::trace!(command_buffer = ?self.handle, ?usage, "begin");

        linked
    }

    pub fn validate_end(&self) -> Result<(), Box<ValidationError>> {
        match self.lifecycle {
            CommandBufferLifecycle::Recording => (),
            CommandBufferLifecycle::InvalidIncomplete => return Err(self.invalid_error()),
            state => {
                return Err(ValidationError::new(Violation::NotRecording { state })
                    .set_vuids(&["VUID-vkEndCommandBuffer-commandBuffer-00059"]));
            }
        }

        if let Some(&(query_pool, query)) = self.ledger.active_queries.first() {
            return Err(
                ValidationError::new(Violation::UnterminatedQuery { query_pool, query })
                    .set_vuids(&["VUID-vkEndCommandBuffer-commandBuffer-00061"]),
            );
        }

        if self.ledger.conditional_rendering {
            return Err(ValidationError::new(Violation::UnterminatedConditionalRender)
                .set_vuids(&["VUID-vkEndCommandBuffer-None-01978"]));
        }

        if self.level == CommandBufferLevel::Primary && self.ledger.rendering.is_some() {
            return Err(ValidationError::new(Violation::UnterminatedRendering)
                .set_vuids(&["VUID-vkEndCommandBuffer-commandBuffer-00060"]));
        }

        Ok(())
    }

    pub(crate) fn end_unchecked(&mut self) {
        self.lifecycle = CommandBufferLifecycle::Executable;
        tracing::trace!(command_buffer = ?self.handle, "end");
    }

    pub fn validate_reset(&self) -> Result<(), Box<ValidationError>> {
        if !self
            .pool_flags
            .intersects(CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
        {
            return Err(ValidationError::new(Violation::ResetNotPermitted)
                .add_object(self.pool)
                .set_vuids(&["VUID-vkResetCommandBuffer-commandBuffer-00046"]));
        }

        self.validate_not_in_use()
            .map_err(|err| err.set_vuids(&["VUID-vkResetCommandBuffer-commandBuffer-00045"]))
    }

    /// Checks whether the command buffer can be freed, or reset together with its pool.
    pub fn validate_destroy(&self) -> Result<(), Box<ValidationError>> {
        self.validate_not_in_use()
            .map_err(|err| err.set_vuids(&["VUID-vkFreeCommandBuffers-pCommandBuffers-00047"]))
    }

    fn validate_not_in_use(&self) -> Result<(), Box<ValidationError>> {
        if self.in_use_count > 0 {
            return Err(ValidationError::new(Violation::InUse {
                in_use_count: self.in_use_count,
            }));
        }

        Ok(())
    }

    /// Moves the command buffer back to the initial state.
    ///
    /// Returns the command buffers that were linked to this one; the caller must unlink them.
    pub(crate) fn reset_unchecked(&mut self) -> SmallVec<[ash::vk::CommandBuffer; 4]> {
        self.lifecycle = CommandBufferLifecycle::Initial;
        self.usage = CommandBufferUsage::empty();
        self.submit_count = 0;
        self.broken_bindings.clear();
        self.ledger = Ledger::default();

        self.linked_command_buffers.drain().collect()
    }

    /// Checks whether the command buffer itself can be submitted, given that it appears
    /// `pending_in_call` times in the current call.
    ///
    /// This does not look at the secondary command buffers that it executes.
    pub fn can_submit(&self, pending_in_call: u32) -> Result<(), Box<ValidationError>> {
        match self.lifecycle {
            CommandBufferLifecycle::Initial => {
                return Err(ValidationError::new(Violation::NeverRecorded)
                    .set_vuids(&["VUID-vkQueueSubmit2-commandBuffer-03876"]));
            }
            CommandBufferLifecycle::Recording => {
                return Err(ValidationError::new(Violation::StillRecording)
                    .set_vuids(&["VUID-vkQueueSubmit2-commandBuffer-03876"]));
            }
            CommandBufferLifecycle::InvalidIncomplete | CommandBufferLifecycle::InvalidComplete => {
                return Err(self
                    .invalid_error()
                    .set_vuids(&["VUID-vkQueueSubmit2-commandBuffer-03876"]));
            }
            CommandBufferLifecycle::Executable | CommandBufferLifecycle::Pending => (),
        }

        if self.usage.intersects(CommandBufferUsage::ONE_TIME_SUBMIT)
            && self.submit_count + pending_in_call > 1
        {
            return Err(ValidationError::new(Violation::ExceedsOneTimeSubmit {
                submit_count: self.submit_count,
                pending_in_call,
            })
            .set_vuids(&["VUID-vkQueueSubmit2-commandBuffer-03874"]));
        }

        if !self.usage.intersects(CommandBufferUsage::SIMULTANEOUS_USE)
            && (self.in_use_count > 0 || pending_in_call > 1)
        {
            return Err(ValidationError::new(Violation::InUseWithoutSimultaneousUse {
                in_use_count: self.in_use_count,
                pending_in_call,
            })
            .set_vuids(&["VUID-vkQueueSubmit2-commandBuffer-03875"]));
        }

        Ok(())
    }

    pub(crate) fn mark_submitted(&mut self, count: u32) {
        self.in_use_count += count;
        self.submit_count += count;

        if self.lifecycle == CommandBufferLifecycle::Executable {
            self.lifecycle = CommandBufferLifecycle::Pending;
        }

        tracing::trace!(
            command_buffer = ?self.handle,
            in_use_count = self.in_use_count,
            "submitted",
        );
    }

    pub(crate) fn mark_completed(&mut self) {
        self.in_use_count = self.in_use_count.saturating_sub(1);

        if self.in_use_count == 0 && self.lifecycle == CommandBufferLifecycle::Pending {
            self.lifecycle = CommandBufferLifecycle::Executable;
        }

        tracing::trace!(
            command_buffer = ?self.handle,
            in_use_count = self.in_use_count,
            "completed",
        );
    }

    /// Records that `binding` became invalid.
    ///
    /// Returns whether the command buffer moved to an invalid state because of it.
    pub(crate) fn invalidate(&mut self, binding: BrokenBinding) -> bool {
        let lifecycle = match self.lifecycle {
            CommandBufferLifecycle::Initial => return false,
            CommandBufferLifecycle::Recording => CommandBufferLifecycle::InvalidIncomplete,
            CommandBufferLifecycle::Executable | CommandBufferLifecycle::Pending => {
                CommandBufferLifecycle::InvalidComplete
            }
            CommandBufferLifecycle::InvalidIncomplete | CommandBufferLifecycle::InvalidComplete => {
                if !self.broken_bindings.contains(&binding) {
                    self.broken_bindings.push(binding);
                }

                return false;
            }
        };

        tracing::trace!(
            command_buffer = ?self.handle,
            object = %binding.object,
            cause = %binding.cause,
            "invalidated",
        );
        self.lifecycle = lifecycle;
        self.broken_bindings.push(binding);

        true
    }

    pub(crate) fn unlink(&mut self, command_buffer: ash::vk::CommandBuffer) {
        self.linked_command_buffers.remove(&command_buffer);
    }

    pub(crate) fn link(&mut self, command_buffer: ash::vk::CommandBuffer) {
        self.linked_command_buffers.insert(command_buffer);
    }

    fn validate_recording(&self) -> Result<(), Box<ValidationError>> {
        match self.lifecycle {
            CommandBufferLifecycle::Recording => Ok(()),
            CommandBufferLifecycle::InvalidIncomplete => Err(self.invalid_error()),
            state => Err(ValidationError::new(Violation::NotRecording { state })),
        }
    }

    pub fn begin_query(&mut self, query_pool: u64, query: u32) -> Result<(), Box<ValidationError>> {
        self.validate_recording()?;

        if self.ledger.active_queries.contains(&(query_pool, query)) {
            return Err(ValidationError::new(Violation::ScopeAlreadyActive {
                scope: RecordingScope::Query { query_pool, query },
            })
            .set_vuids(&["VUID-vkCmdBeginQuery-queryPool-01922"]));
        }

        self.ledger.active_queries.push((query_pool, query));
        self.ledger
            .commands
            .push(RecordedCommand::BeginQuery { query_pool, query });

        Ok(())
    }

    pub fn end_query(&mut self, query_pool: u64, query: u32) -> Result<(), Box<ValidationError>> {
        self.validate_recording()?;

        let Some(index) = self
            .ledger
            .active_queries
            .iter()
            .position(|&active| active == (query_pool, query))
        else {
            return Err(ValidationError::new(Violation::ScopeNotActive {
                scope: RecordingScope::Query { query_pool, query },
            })
            .set_vuids(&["VUID-vkCmdEndQuery-None-01923"]));
        };

        self.ledger.active_queries.remove(index);
        self.ledger
            .commands
            .push(RecordedCommand::EndQuery { query_pool, query });

        Ok(())
    }

    pub fn begin_conditional_rendering(&mut self) -> Result<(), Box<ValidationError>> {
        self.validate_recording()?;

        if self.ledger.conditional_rendering {
            return Err(ValidationError::new(Violation::ScopeAlreadyActive {
                scope: RecordingScope::ConditionalRendering,
            })
            .set_vuids(&["VUID-vkCmdBeginConditionalRenderingEXT-None-01980"]));
        }

        self.ledger.conditional_rendering = true;
        self.ledger
            .commands
            .push(RecordedCommand::BeginConditionalRendering);

        Ok(())
    }

    pub fn end_conditional_rendering(&mut self) -> Result<(), Box<ValidationError>> {
        self.validate_recording()?;

        if !self.ledger.conditional_rendering {
            return Err(ValidationError::new(Violation::ScopeNotActive {
                scope: RecordingScope::ConditionalRendering,
            })
            .set_vuids(&["VUID-vkCmdEndConditionalRenderingEXT-None-01985"]));
        }

        self.ledger.conditional_rendering = false;
        self.ledger
            .commands
            .push(RecordedCommand::EndConditionalRendering);

        Ok(())
    }

    pub fn begin_rendering(&mut self, flags: RenderingFlags) -> Result<(), Box<ValidationError>> {
        self.validate_recording()?;

        if self.ledger.rendering.is_some() {
            return Err(ValidationError::new(Violation::ScopeAlreadyActive {
                scope: RecordingScope::Rendering,
            })
            .set_vuids(&["VUID-vkCmdBeginRendering-renderpass"]));
        }

        if !self.ledger.has_rendering {
            self.ledger.has_rendering = true;
            self.ledger.resumes_rendering = flags.intersects(RenderingFlags::RESUMING);
        }

        self.ledger.rendering = Some(flags);
        self.ledger
            .commands
            .push(RecordedCommand::BeginRendering { flags });

        Ok(())
    }

    pub fn end_rendering(&mut self) -> Result<(), Box<ValidationError>> {
        self.validate_recording()?;

        let Some(flags) = self.ledger.rendering.take() else {
            return Err(ValidationError::new(Violation::ScopeNotActive {
                scope: RecordingScope::Rendering,
            })
            .set_vuids(&["VUID-vkCmdEndRendering-None-06161"]));
        };

        self.ledger.suspends_rendering = flags.intersects(RenderingFlags::SUSPENDING);
        self.ledger.commands.push(RecordedCommand::EndRendering);

        Ok(())
    }

    /// Records that the command buffer uses `object`. If the object is later destroyed or
    /// updated, the command buffer becomes invalid.
    pub fn bind(&mut self, object: ObjectRef) -> Result<(), Box<ValidationError>> {
        self.validate_recording()?;

        self.ledger.bound_objects.insert(object);
        self.ledger.commands.push(RecordedCommand::Bind { object });

        Ok(())
    }

    /// Records a command that has no effect on the lifecycle.
    pub fn record(
        &mut self,
        name: impl Into<Cow<'static, str>>,
    ) -> Result<(), Box<ValidationError>> {
        self.validate_recording()?;

        self.ledger
            .commands
            .push(RecordedCommand::Other { name: name.into() });

        Ok(())
    }

    /// Checks whether this command buffer can record the execution of secondary command buffers.
    pub fn validate_execute_commands(&self) -> Result<(), Box<ValidationError>> {
        self.validate_recording()
    }

    /// Checks whether this command buffer can be executed by a primary command buffer.
    pub fn validate_execute(&self) -> Result<(), Box<ValidationError>> {
        if self.level != CommandBufferLevel::Secondary {
            return Err(ValidationError::new(Violation::NotSecondary)
                .set_vuids(&["VUID-vkCmdExecuteCommands-pCommandBuffers-00088"]));
        }

        match self.lifecycle {
            CommandBufferLifecycle::Initial => {
                Err(ValidationError::new(Violation::NeverRecorded)
                    .set_vuids(&["VUID-vkCmdExecuteCommands-pCommandBuffers-00089"]))
            }
            CommandBufferLifecycle::Recording => {
                Err(ValidationError::new(Violation::StillRecording)
                    .set_vuids(&["VUID-vkCmdExecuteCommands-pCommandBuffers-00089"]))
            }
            CommandBufferLifecycle::InvalidIncomplete | CommandBufferLifecycle::InvalidComplete => {
                Err(self
                    .invalid_error()
                    .set_vuids(&["VUID-vkCmdExecuteCommands-pCommandBuffers-00089"]))
            }
            CommandBufferLifecycle::Pending
                if !self.usage.intersects(CommandBufferUsage::SIMULTANEOUS_USE) =>
            {
                Err(ValidationError::new(Violation::InUseWithoutSimultaneousUse {
                    in_use_count: self.in_use_count,
                    pending_in_call: 1,
                })
                .set_vuids(&["VUID-vkCmdExecuteCommands-pCommandBuffers-00090"]))
            }
            CommandBufferLifecycle::Executable | CommandBufferLifecycle::Pending => Ok(()),
        }
    }

    /// Records the execution of secondary command buffers, which were already validated with
    /// [`validate_execute`](Self::validate_execute).
    pub(crate) fn execute_commands_unchecked(
        &mut self,
        secondaries: &[(ash::vk::CommandBuffer, ImageLayoutMap)],
    ) {
        for (secondary, image_layouts) in secondaries {
            self.linked_command_buffers.insert(*secondary);
            self.ledger
                .image_layouts
                .extend(image_layouts.iter().map(|(&k, &v)| (k, v)));
        }

        self.ledger.commands.push(RecordedCommand::ExecuteCommands {
            command_buffers: secondaries.iter().map(|&(handle, _)| handle).collect(),
        });
    }

    /// Merges layouts supplied by the image layout tracking into the command buffer's map.
    pub fn merge_image_layouts(
        &mut self,
        image_layouts: impl IntoIterator<Item = (super::ImageSubresource, ash::vk::ImageLayout)>,
    ) -> Result<(), Box<ValidationError>> {
        self.validate_recording()?;
        self.ledger.image_layouts.extend(image_layouts);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command_buffer::CommandPoolCreateInfo;
    use ash::vk::Handle;

    fn pool(flags: CommandPoolCreateFlags) -> CommandPoolState {
        CommandPoolState::new(
            ash::vk::CommandPool::from_raw(1),
            &CommandPoolCreateInfo {
                flags,
                queue_family_index: 0,
                ..Default::default()
            },
        )
    }

    fn primary(flags: CommandPoolCreateFlags) -> CommandBufferState {
        CommandBufferState::new(
            ash::vk::CommandBuffer::from_raw(10),
            &pool(flags),
            CommandBufferLevel::Primary,
        )
    }

    fn executable(usage: CommandBufferUsage) -> CommandBufferState {
        let mut cb = primary(CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        cb.validate_begin(usage).unwrap();
        cb.begin_unchecked(usage);
        cb.validate_end().unwrap();
        cb.end_unchecked();
        cb
    }

    #[test]
    fn begin_twice() {
        let mut cb = primary(CommandPoolCreateFlags::empty());
        cb.begin_unchecked(CommandBufferUsage::empty());

        let err = cb.validate_begin(CommandBufferUsage::empty()).unwrap_err();
        assert_eq!(err.violation, Violation::AlreadyRecording);

        // Still fails once more commands are recorded.
        cb.record("vkCmdDraw").unwrap();
        assert!(cb.validate_begin(CommandBufferUsage::empty()).is_err());
    }

    #[test]
    fn implicit_reset_requires_pool_flag() {
        let mut cb = primary(CommandPoolCreateFlags::empty());
        cb.begin_unchecked(CommandBufferUsage::empty());
        cb.end_unchecked();

        let err = cb.validate_begin(CommandBufferUsage::empty()).unwrap_err();
        assert_eq!(
            err.violation,
            Violation::ImplicitResetNotAllowed {
                state: CommandBufferLifecycle::Executable,
            },
        );

        let cb = executable(CommandBufferUsage::empty());
        assert!(cb.validate_begin(CommandBufferUsage::empty()).is_ok());
    }

    #[test]
    fn conflicting_usage() {
        let cb = primary(CommandPoolCreateFlags::empty());
        let err = cb
            .validate_begin(
                CommandBufferUsage::ONE_TIME_SUBMIT | CommandBufferUsage::SIMULTANEOUS_USE,
            )
            .unwrap_err();
        assert_eq!(err.violation, Violation::ConflictingUsageFlags);
    }

    #[test]
    fn end_requires_closed_scopes() {
        let mut cb = primary(CommandPoolCreateFlags::empty());
        assert!(matches!(
            cb.validate_end().unwrap_err().violation,
            Violation::NotRecording {
                state: CommandBufferLifecycle::Initial,
            },
        ));

        cb.begin_unchecked(CommandBufferUsage::empty());
        cb.begin_query(7, 0).unwrap();
        assert_eq!(
            cb.validate_end().unwrap_err().violation,
            Violation::UnterminatedQuery {
                query_pool: 7,
                query: 0,
            },
        );
        cb.end_query(7, 0).unwrap();

        cb.begin_conditional_rendering().unwrap();
        assert_eq!(
            cb.validate_end().unwrap_err().violation,
            Violation::UnterminatedConditionalRender,
        );
        cb.end_conditional_rendering().unwrap();

        cb.begin_rendering(RenderingFlags::empty()).unwrap();
        assert_eq!(
            cb.validate_end().unwrap_err().violation,
            Violation::UnterminatedRendering,
        );
        cb.end_rendering().unwrap();

        assert!(cb.validate_end().is_ok());
    }

    #[test]
    fn scopes_must_match() {
        let mut cb = primary(CommandPoolCreateFlags::empty());
        cb.begin_unchecked(CommandBufferUsage::empty());

        assert!(matches!(
            cb.end_query(1, 2).unwrap_err().violation,
            Violation::ScopeNotActive { .. },
        ));
        cb.begin_query(1, 2).unwrap();
        assert!(matches!(
            cb.begin_query(1, 2).unwrap_err().violation,
            Violation::ScopeAlreadyActive { .. },
        ));
        assert!(matches!(
            cb.end_rendering().unwrap_err().violation,
            Violation::ScopeNotActive {
                scope: RecordingScope::Rendering,
            },
        ));
    }

    #[test]
    fn can_submit_per_state() {
        let mut cb = primary(CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        assert_eq!(cb.can_submit(1).unwrap_err().violation, Violation::NeverRecorded);

        cb.begin_unchecked(CommandBufferUsage::empty());
        assert_eq!(cb.can_submit(1).unwrap_err().violation, Violation::StillRecording);

        cb.end_unchecked();
        assert!(cb.can_submit(1).is_ok());

        cb.mark_submitted(1);
        assert_eq!(cb.lifecycle(), CommandBufferLifecycle::Pending);
        assert!(matches!(
            cb.can_submit(1).unwrap_err().violation,
            Violation::InUseWithoutSimultaneousUse { .. },
        ));

        let object = ObjectRef::new(ash::vk::Buffer::from_raw(99));
        assert!(cb.invalidate(BrokenBinding {
            object,
            cause: crate::InvalidationCause::Destroyed,
        }));
        assert_eq!(cb.lifecycle(), CommandBufferLifecycle::InvalidComplete);

        let err = cb.can_submit(1).unwrap_err();
        assert_eq!(
            err.violation,
            Violation::Invalid {
                binding: BrokenBinding {
                    object,
                    cause: crate::InvalidationCause::Destroyed,
                },
            },
        );
        assert_eq!(err.objects[0], object);
    }

    #[test]
    fn pending_with_simultaneous_use() {
        let mut cb = executable(CommandBufferUsage::SIMULTANEOUS_USE);
        cb.mark_submitted(1);

        assert!(cb.can_submit(1).is_ok());
        assert!(cb.can_submit(3).is_ok());
    }

    #[test]
    fn one_time_submit() {
        let cb = executable(CommandBufferUsage::ONE_TIME_SUBMIT);
        assert_eq!(
            cb.can_submit(2).unwrap_err().violation,
            Violation::ExceedsOneTimeSubmit {
                submit_count: 0,
                pending_in_call: 2,
            },
        );

        let mut cb = executable(CommandBufferUsage::ONE_TIME_SUBMIT);
        cb.mark_submitted(1);
        cb.mark_completed();
        assert!(matches!(
            cb.can_submit(1).unwrap_err().violation,
            Violation::ExceedsOneTimeSubmit { .. },
        ));
    }

    #[test]
    fn in_use_accounting() {
        let mut cb = executable(CommandBufferUsage::SIMULTANEOUS_USE);

        for _ in 0..4 {
            cb.mark_submitted(1);
            assert!(cb.validate_reset().is_err());
            assert!(cb.validate_destroy().is_err());
        }

        assert_eq!(cb.in_use_count(), 4);

        for _ in 0..4 {
            assert!(matches!(
                cb.validate_destroy().unwrap_err().violation,
                Violation::InUse { .. },
            ));
            cb.mark_completed();
        }

        assert_eq!(cb.in_use_count(), 0);
        assert_eq!(cb.lifecycle(), CommandBufferLifecycle::Executable);
        assert!(cb.validate_reset().is_ok());
        assert!(cb.validate_destroy().is_ok());
    }

    #[test]
    fn reset_requires_pool_flag() {
        let cb = primary(CommandPoolCreateFlags::TRANSIENT);
        assert_eq!(
            cb.validate_reset().unwrap_err().violation,
            Violation::ResetNotPermitted,
        );
    }

    #[test]
    fn invalidated_while_recording() {
        let mut cb = primary(CommandPoolCreateFlags::empty());
        cb.begin_unchecked(CommandBufferUsage::empty());

        let object = ObjectRef::new(ash::vk::Image::from_raw(5));
        cb.bind(object).unwrap();
        cb.invalidate(BrokenBinding {
            object,
            cause: crate::InvalidationCause::Updated,
        });

        assert_eq!(cb.lifecycle(), CommandBufferLifecycle::InvalidIncomplete);
        assert!(matches!(
            cb.validate_end().unwrap_err().violation,
            Violation::Invalid { .. },
        ));
        assert!(matches!(
            cb.record("vkCmdDispatch").unwrap_err().violation,
            Violation::Invalid { .. },
        ));
    }

    #[test]
    fn rendering_resume_and_suspend() {
        let mut cb = primary(CommandPoolCreateFlags::empty());
        cb.begin_unchecked(CommandBufferUsage::empty());
        cb.begin_rendering(RenderingFlags::RESUMING).unwrap();
        cb.end_rendering().unwrap();
        cb.begin_rendering(RenderingFlags::SUSPENDING).unwrap();
        cb.end_rendering().unwrap();

        assert!(cb.has_rendering());
        assert!(cb.resumes_rendering());
        assert!(cb.suspends_rendering());
    }
}
