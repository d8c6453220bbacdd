// Copyright (c) 2016 The vulkano developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Runtime validation of Vulkan command buffer lifecycles and queue synchronization.
//!
//! This crate is meant to sit between an application and a Vulkan driver, for example inside an
//! interception layer. Every intercepted call is forwarded to a [`Validator`], which keeps a
//! shadow model of the relevant driver objects and reports usage violations *before* the call
//! reaches the driver. The validator is passive: it never blocks, never schedules GPU work, and
//! never refuses a call. It only tells you what is wrong.
//!
//! # What is tracked
//!
//! - [Command buffers](command_buffer) and the pools they are allocated from. Each command buffer
//!   moves through the states described by [`CommandBufferLifecycle`]: *initial*, *recording*,
//!   *executable*, *pending* and the two *invalid* states. Beginning, ending, resetting,
//!   submitting and freeing a command buffer are checked against its current state.
//! - [Queues](queue). Every successful submission is remembered until the application reports
//!   that the work has completed (by waiting on a fence, waiting for the queue to be idle, or
//!   observing a timeline semaphore value).
//! - [Semaphores and fences](sync). Binary semaphores must be signaled exactly once before each
//!   wait, and must not be waited on by two queues at once. Timeline semaphore values must only
//!   ever increase, and must stay within the device's maximum value difference. A fence must not
//!   be submitted while it is still in flight or already signaled.
//!
//! # Submissions
//!
//! [`Validator::queue_submit`] validates a whole `vkQueueSubmit2` call at once. All violations
//! are collected and returned together, each with the location in the submission where it was
//! found (for example `submit_infos[1].signal_semaphores[0]`). The effects of the submission are
//! only recorded into the model when no violation was found; use
//! [`Validator::record_queue_submit`] if the call is forwarded to the driver regardless.
//!
//! [`CommandBufferLifecycle`]: command_buffer::CommandBufferLifecycle

pub use self::{
    registry::{LockingMode, Registry, Sharing},
    validator::{Validator, ValidatorCreateInfo},
    violation::{
        BrokenBinding, InvalidationCause, RecordingScope, TimelinePredicate, ValueSource,
        Violation, ViolationKind,
    },
};
pub use ash::vk::Handle;
use smallvec::SmallVec;
use std::{
    borrow::Cow,
    error::Error,
    fmt::{Display, Error as FmtError, Formatter},
};

mod macros;
pub mod command_buffer;
pub mod queue;
pub mod registry;
pub mod submit;
pub mod sync;
mod validator;
mod violation;

/// A non-owning reference to any Vulkan object, made of its type and raw handle value.
///
/// This is how command buffers refer to the objects they use, and how violations name the
/// objects involved. Holding an `ObjectRef` never keeps the object alive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    pub object_type: ash::vk::ObjectType,
    pub handle: u64,
}

impl ObjectRef {
    /// Returns an `ObjectRef` for `handle`.
    #[inline]
    pub fn new<H: Handle>(handle: H) -> Self {
        ObjectRef {
            object_type: H::TYPE,
            handle: handle.as_raw(),
        }
    }

    /// Returns whether this refers to the null handle.
    #[inline]
    pub fn is_null(self) -> bool {
        self.handle == 0
    }
}

impl Display for ObjectRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        write!(f, "{:?} {:#018x}", self.object_type, self.handle)
    }
}

/// A violation of a valid-usage rule, together with where it was found.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationError {
    /// The location of the problem, such as the parameter or the element of a submission that
    /// was found to be invalid. Can be empty.
    pub context: Cow<'static, str>,

    /// The rule that was broken.
    pub violation: Violation,

    /// The objects involved, the primary one first.
    pub objects: SmallVec<[ObjectRef; 2]>,

    /// The Vulkan valid-usage IDs that describe the broken rule, if any.
    pub vuids: &'static [&'static str],
}

impl ValidationError {
    #[inline]
    pub(crate) fn new(violation: Violation) -> Box<Self> {
        Box::new(ValidationError {
            context: Cow::Borrowed(""),
            violation,
            objects: SmallVec::new(),
            vuids: &[],
        })
    }

    pub(crate) fn add_context(
        mut self: Box<Self>,
        context: impl Into<Cow<'static, str>>,
    ) -> Box<Self> {
        if self.context.is_empty() {
            self.context = context.into();
        } else {
            self.context = format!("{}.{}", context.into(), self.context).into();
        }

        self
    }

    pub(crate) fn set_vuids(mut self: Box<Self>, vuids: &'static [&'static str]) -> Box<Self> {
        self.vuids = vuids;
        self
    }

    pub(crate) fn add_object(mut self: Box<Self>, object: impl Into<ObjectRef>) -> Box<Self> {
        let object = object.into();

        if !object.is_null() && !self.objects.contains(&object) {
            self.objects.push(object);
        }

        self
    }

    /// Returns the broad category of the broken rule.
    #[inline]
    pub fn kind(&self) -> ViolationKind {
        self.violation.kind()
    }

    /// Emits this error as a `tracing` event.
    pub(crate) fn trace(&self) {
        tracing::warn!(
            context = %self.context,
            kind = ?self.kind(),
            objects = ?self.objects,
            vuids = ?self.vuids,
            "{}",
            self.violation,
        );
    }
}

impl Error for ValidationError {}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        if self.context.is_empty() {
            write!(f, "{}", self.violation)?;
        } else {
            write!(f, "{}: {}", self.context, self.violation)?;
        }

        for (index, object) in self.objects.iter().enumerate() {
            if index == 0 {
                write!(f, " (objects: {}", object)?;
            } else {
                write!(f, ", {}", object)?;
            }

            if index == self.objects.len() - 1 {
                write!(f, ")")?;
            }
        }

        if !self.vuids.is_empty() {
            write!(f, "\n\nVulkan VUIDs:")?;

            for vuid in self.vuids {
                write!(f, "\n    {}", vuid)?;
            }
        }

        Ok(())
    }
}

macro_rules! impl_object_ref_from {
    ($($handle:ident),+ $(,)?) => {
        $(
            impl From<ash::vk::$handle> for ObjectRef {
                #[inline]
                fn from(handle: ash::vk::$handle) -> Self {
                    ObjectRef::new(handle)
                }
            }
        )+
    };
}

impl_object_ref_from!(
    AccelerationStructureKHR,
    Buffer,
    BufferView,
    CommandBuffer,
    CommandPool,
    DescriptorSet,
    Event,
    Fence,
    Framebuffer,
    Image,
    ImageView,
    Pipeline,
    PipelineLayout,
    QueryPool,
    Queue,
    RenderPass,
    Sampler,
    Semaphore,
);

/// A helper type for non-exhaustive structs.
///
/// This type cannot be constructed outside this crate. Structs containing this type as a field
/// cannot be constructed with a struct literal outside this crate either, which is equivalent
/// to the standard Rust `#[non_exhaustive]` attribute, except that it does not prevent update
/// syntax from being used.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NonExhaustive(pub(crate) ());
