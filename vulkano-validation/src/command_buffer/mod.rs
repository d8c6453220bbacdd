//! Command buffer lifecycle tracking.
//!
//! Every command buffer known to the validator has a [`CommandBufferState`] in the
//! [`Registry`]. The state tracks where the command buffer is in its lifecycle, how many queue
//! submissions are currently executing it, which secondary command buffers it executes, and a
//! ledger of the commands that were recorded into it.
//!
//! The lifecycle follows the Vulkan specification:
//!
//! ```text
//!             begin              end               submit
//!   Initial ────────> Recording ─────> Executable ─────────> Pending
//!      ^                 │                 ^                   │
//!      │                 │                 └───── completion ──┘
//!      │      bound object destroyed / secondary rerecorded
//!      │                 v                 v
//!      └──── reset ── Invalid (Incomplete / Complete)
//! ```
//!
//! The functions in this module operate on a command buffer *and the secondary command buffers
//! linked to it*, looking each of them up in the registry. The methods of [`CommandBufferState`]
//! only ever touch a single command buffer.
//!
//! [`Registry`]: crate::Registry

pub use self::state::{CommandBufferLifecycle, CommandBufferState};
use crate::{
    macros::{vulkan_bitflags, vulkan_enum},
    registry::Registry,
    BrokenBinding, NonExhaustive, ObjectRef, ValidationError,
};
use smallvec::SmallVec;
use std::borrow::Cow;

mod state;

vulkan_enum! {
    /// The level of a command buffer.
    CommandBufferLevel = CommandBufferLevel(i32);

    /// A primary command buffer can be submitted to a queue, and can execute secondary command
    /// buffers.
    Primary = PRIMARY,

    /// A secondary command buffer cannot be submitted directly, it can only be executed by a
    /// primary command buffer.
    Secondary = SECONDARY,
}

vulkan_bitflags! {
    /// How a command buffer is going to be used, given when it is begun.
    CommandBufferUsage = CommandBufferUsageFlags(u32);

    /// The command buffer will be submitted only once, then reset or freed.
    ONE_TIME_SUBMIT = ONE_TIME_SUBMIT,

    /// A secondary command buffer is entirely inside a render pass.
    RENDER_PASS_CONTINUE = RENDER_PASS_CONTINUE,

    /// The command buffer can be pending in several submissions at once.
    SIMULTANEOUS_USE = SIMULTANEOUS_USE,
}

vulkan_bitflags! {
    /// Additional properties of a command pool.
    CommandPoolCreateFlags = CommandPoolCreateFlags(u32);

    /// A hint that the command buffers allocated from the pool will be short-lived.
    TRANSIENT = TRANSIENT,

    /// Command buffers allocated from the pool can be reset individually, either explicitly or
    /// implicitly by beginning them again.
    RESET_COMMAND_BUFFER = RESET_COMMAND_BUFFER,

    /// Command buffers allocated from the pool are protected command buffers.
    PROTECTED = PROTECTED,
}

vulkan_bitflags! {
    /// Flags given when beginning a dynamic rendering instance.
    RenderingFlags = RenderingFlags(u32);

    /// The render pass instance is recorded in secondary command buffers.
    CONTENTS_SECONDARY_COMMAND_BUFFERS = CONTENTS_SECONDARY_COMMAND_BUFFERS,

    /// The render pass instance will be suspended at its end.
    SUSPENDING = SUSPENDING,

    /// The render pass instance resumes a previously suspended one.
    RESUMING = RESUMING,
}

/// Parameters to create a command pool.
#[derive(Clone, Debug)]
pub struct CommandPoolCreateInfo {
    /// Additional properties of the command pool.
    ///
    /// The default value is empty.
    pub flags: CommandPoolCreateFlags,

    /// The index of the queue family that this pool is created for. All command buffers
    /// allocated from this pool must be submitted on a queue belonging to that family.
    ///
    /// The default value is `u32::MAX`, which must be overridden.
    pub queue_family_index: u32,

    pub _ne: NonExhaustive,
}

impl Default for CommandPoolCreateInfo {
    #[inline]
    fn default() -> Self {
        Self {
            flags: CommandPoolCreateFlags::empty(),
            queue_family_index: u32::MAX,
            _ne: NonExhaustive(()),
        }
    }
}

/// The tracked state of a command pool.
#[derive(Debug)]
pub struct CommandPoolState {
    handle: ash::vk::CommandPool,
    flags: CommandPoolCreateFlags,
    queue_family_index: u32,
    command_buffers: foldhash::HashSet<ash::vk::CommandBuffer>,
}

impl CommandPoolState {
    pub(crate) fn new(handle: ash::vk::CommandPool, create_info: &CommandPoolCreateInfo) -> Self {
        CommandPoolState {
            handle,
            flags: create_info.flags,
            queue_family_index: create_info.queue_family_index,
            command_buffers: Default::default(),
        }
    }

    #[inline]
    pub fn handle(&self) -> ash::vk::CommandPool {
        self.handle
    }

    #[inline]
    pub fn flags(&self) -> CommandPoolCreateFlags {
        self.flags
    }

    #[inline]
    pub fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }

    /// Returns the command buffers that are currently allocated from the pool.
    #[inline]
    pub fn command_buffers(&self) -> impl ExactSizeIterator<Item = ash::vk::CommandBuffer> + '_ {
        self.command_buffers.iter().copied()
    }

    pub(crate) fn add_command_buffer(&mut self, command_buffer: ash::vk::CommandBuffer) {
        self.command_buffers.insert(command_buffer);
    }

    pub(crate) fn remove_command_buffer(&mut self, command_buffer: ash::vk::CommandBuffer) {
        self.command_buffers.remove(&command_buffer);
    }
}

/// One entry in the ledger of recorded commands.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecordedCommand {
    BeginQuery { query_pool: u64, query: u32 },
    EndQuery { query_pool: u64, query: u32 },
    BeginConditionalRendering,
    EndConditionalRendering,
    BeginRendering { flags: RenderingFlags },
    EndRendering,
    Bind { object: ObjectRef },
    ExecuteCommands {
        command_buffers: SmallVec<[ash::vk::CommandBuffer; 4]>,
    },
    Other { name: Cow<'static, str> },
}

/// Identifies one subresource of an image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ImageSubresource {
    pub image: ash::vk::Image,
    pub aspect_mask: ash::vk::ImageAspectFlags,
    pub mip_level: u32,
    pub array_layer: u32,
}

/// The image layouts that a command buffer leaves its images in.
///
/// The map is owned by the image layout tracking, the validator only carries it along. When a
/// primary command buffer executes a secondary one, the secondary's entries are merged into the
/// primary's map.
pub type ImageLayoutMap = foldhash::HashMap<ImageSubresource, ash::vk::ImageLayout>;

/// Checks whether `command_buffer` and every secondary command buffer it executes can be
/// submitted, given that `command_buffer` appears `pending_in_call` times in the current call.
///
/// Unknown command buffers are skipped. Errors are pushed onto `errors`, each naming the command
/// buffer that is at fault.
pub fn can_submit(
    registry: &Registry,
    command_buffer: ash::vk::CommandBuffer,
    pending_in_call: u32,
    errors: &mut Vec<Box<ValidationError>>,
) {
    let mut visited: SmallVec<[ash::vk::CommandBuffer; 4]> = SmallVec::new();
    let mut stack: SmallVec<[ash::vk::CommandBuffer; 4]> = SmallVec::new();
    stack.push(command_buffer);

    while let Some(handle) = stack.pop() {
        if visited.contains(&handle) {
            continue;
        }

        visited.push(handle);

        let Some(state) = registry.get::<CommandBufferState>(handle) else {
            tracing::debug!(command_buffer = ?handle, "skipping unknown command buffer");
            continue;
        };
        let state = state.lock();

        if let Err(err) = state.can_submit(pending_in_call) {
            errors.push(err.add_object(handle));
        }

        if state.level() == CommandBufferLevel::Primary {
            stack.extend(state.linked_command_buffers());
        }
    }
}

/// Marks `command_buffer` and every secondary command buffer it executes as submitted `count`
/// more times.
///
/// Returns the command buffers that were marked.
pub fn mark_submitted(
    registry: &Registry,
    command_buffer: ash::vk::CommandBuffer,
    count: u32,
) -> SmallVec<[ash::vk::CommandBuffer; 4]> {
    for_each_executed(registry, command_buffer, |state| state.mark_submitted(count))
}

/// Marks one submission of `command_buffer` and of every secondary command buffer it executes
/// as completed.
pub fn mark_completed(registry: &Registry, command_buffer: ash::vk::CommandBuffer) {
    for_each_executed(registry, command_buffer, CommandBufferState::mark_completed);
}

/// Returns the objects used by `command_buffer` and by every secondary command buffer it
/// executes.
pub fn bound_objects(
    registry: &Registry,
    command_buffer: ash::vk::CommandBuffer,
) -> foldhash::HashSet<ObjectRef> {
    let mut objects = foldhash::HashSet::default();
    for_each_executed(registry, command_buffer, |state| {
        objects.extend(state.bound_objects());
    });

    objects
}

// Calls `f` on `command_buffer` and the secondary command buffers it executes, once each, and
// returns the ones that were found.
fn for_each_executed(
    registry: &Registry,
    command_buffer: ash::vk::CommandBuffer,
    mut f: impl FnMut(&mut CommandBufferState),
) -> SmallVec<[ash::vk::CommandBuffer; 4]> {
    let mut visited: SmallVec<[ash::vk::CommandBuffer; 4]> = SmallVec::new();
    let mut found: SmallVec<[ash::vk::CommandBuffer; 4]> = SmallVec::new();
    let mut stack: SmallVec<[ash::vk::CommandBuffer; 4]> = SmallVec::new();
    stack.push(command_buffer);

    while let Some(handle) = stack.pop() {
        if visited.contains(&handle) {
            continue;
        }

        visited.push(handle);

        let Some(state) = registry.get::<CommandBufferState>(handle) else {
            continue;
        };
        let mut state = state.lock();
        f(&mut state);
        found.push(handle);

        if state.level() == CommandBufferLevel::Primary {
            stack.extend(state.linked_command_buffers());
        }
    }

    found
}

/// Invalidates every command buffer that depends on `binding.object`, and every primary command
/// buffer that executes an invalidated secondary one.
///
/// `candidates` are the command buffers that reference the object directly.
pub(crate) fn invalidate(
    registry: &Registry,
    candidates: impl IntoIterator<Item = ash::vk::CommandBuffer>,
    binding: BrokenBinding,
) {
    let mut stack: SmallVec<[(ash::vk::CommandBuffer, BrokenBinding); 4]> = candidates
        .into_iter()
        .map(|command_buffer| (command_buffer, binding))
        .collect();

    while let Some((handle, binding)) = stack.pop() {
        let Some(state) = registry.get::<CommandBufferState>(handle) else {
            continue;
        };
        let mut state = state.lock();

        if state.invalidate(binding) && state.level() == CommandBufferLevel::Secondary {
            let binding = BrokenBinding {
                object: ObjectRef::new(handle),
                cause: binding.cause,
            };
            stack.extend(
                state
                    .linked_command_buffers()
                    .map(|primary| (primary, binding)),
            );
        }
    }
}

/// Undoes the links of a command buffer that is being reset, begun again or freed.
///
/// Primary command buffers executing `command_buffer` are invalidated with `cause`; secondary
/// command buffers executed by it forget about it.
pub(crate) fn unlink(
    registry: &Registry,
    command_buffer: ash::vk::CommandBuffer,
    level: CommandBufferLevel,
    linked: impl IntoIterator<Item = ash::vk::CommandBuffer>,
    cause: crate::InvalidationCause,
) {
    let linked: SmallVec<[_; 4]> = linked.into_iter().collect();

    for &other in &linked {
        if let Some(state) = registry.get::<CommandBufferState>(other) {
            state.lock().unlink(command_buffer);
        }
    }

    if level == CommandBufferLevel::Secondary {
        invalidate(
            registry,
            linked,
            BrokenBinding {
                object: ObjectRef::new(command_buffer),
                cause,
            },
        );
    }
}
