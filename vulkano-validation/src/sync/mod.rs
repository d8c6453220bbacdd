//! Semaphores, fences and the model of a submission's signal and wait operations.
//!
//! The completed state of each semaphore and fence, and the operations that were submitted but
//! have not completed yet, live in their records in the registry. A [`SubmissionModel`] is built
//! for each submission call and checks the operations of the call against those records and
//! against each other, without modifying any record.
//!
//! [`SubmissionModel`]: submit::SubmissionModel

use crate::{macros::vulkan_bitflags, queue::QueueFlags};

pub mod fence;
pub mod semaphore;
pub mod submit;

vulkan_bitflags! {
    /// A set of stages in a pipeline, used in the stage mask of a semaphore operation.
    PipelineStages = PipelineStageFlags2(u64);

    TOP_OF_PIPE = TOP_OF_PIPE,
    DRAW_INDIRECT = DRAW_INDIRECT,
    VERTEX_INPUT = VERTEX_INPUT,
    VERTEX_SHADER = VERTEX_SHADER,
    TESSELLATION_CONTROL_SHADER = TESSELLATION_CONTROL_SHADER,
    TESSELLATION_EVALUATION_SHADER = TESSELLATION_EVALUATION_SHADER,
    GEOMETRY_SHADER = GEOMETRY_SHADER,
    FRAGMENT_SHADER = FRAGMENT_SHADER,
    EARLY_FRAGMENT_TESTS = EARLY_FRAGMENT_TESTS,
    LATE_FRAGMENT_TESTS = LATE_FRAGMENT_TESTS,
    COLOR_ATTACHMENT_OUTPUT = COLOR_ATTACHMENT_OUTPUT,
    COMPUTE_SHADER = COMPUTE_SHADER,
    ALL_TRANSFER = ALL_TRANSFER,
    BOTTOM_OF_PIPE = BOTTOM_OF_PIPE,
    HOST = HOST,
    ALL_GRAPHICS = ALL_GRAPHICS,
    ALL_COMMANDS = ALL_COMMANDS,
    COPY = COPY,
    RESOLVE = RESOLVE,
    BLIT = BLIT,
    CLEAR = CLEAR,
    INDEX_INPUT = INDEX_INPUT,
    VERTEX_ATTRIBUTE_INPUT = VERTEX_ATTRIBUTE_INPUT,
    PRE_RASTERIZATION_SHADERS = PRE_RASTERIZATION_SHADERS,
}

impl PipelineStages {
    /// Returns the stages that a queue with `queue_flags` supports.
    pub fn supported_by(queue_flags: QueueFlags) -> Self {
        let mut result = PipelineStages::TOP_OF_PIPE
            | PipelineStages::BOTTOM_OF_PIPE
            | PipelineStages::HOST
            | PipelineStages::ALL_COMMANDS;

        if queue_flags.intersects(QueueFlags::GRAPHICS) {
            result |= PipelineStages::DRAW_INDIRECT
                | PipelineStages::VERTEX_INPUT
                | PipelineStages::VERTEX_SHADER
                | PipelineStages::TESSELLATION_CONTROL_SHADER
                | PipelineStages::TESSELLATION_EVALUATION_SHADER
                | PipelineStages::GEOMETRY_SHADER
                | PipelineStages::FRAGMENT_SHADER
                | PipelineStages::EARLY_FRAGMENT_TESTS
                | PipelineStages::LATE_FRAGMENT_TESTS
                | PipelineStages::COLOR_ATTACHMENT_OUTPUT
                | PipelineStages::ALL_GRAPHICS
                | PipelineStages::INDEX_INPUT
                | PipelineStages::VERTEX_ATTRIBUTE_INPUT
                | PipelineStages::PRE_RASTERIZATION_SHADERS
                | PipelineStages::ALL_TRANSFER
                | PipelineStages::COPY
                | PipelineStages::RESOLVE
                | PipelineStages::BLIT
                | PipelineStages::CLEAR;
        }

        if queue_flags.intersects(QueueFlags::COMPUTE) {
            result |= PipelineStages::DRAW_INDIRECT
                | PipelineStages::COMPUTE_SHADER
                | PipelineStages::ALL_TRANSFER
                | PipelineStages::COPY
                | PipelineStages::CLEAR;
        }

        if queue_flags.intersects(QueueFlags::TRANSFER) {
            result |= PipelineStages::ALL_TRANSFER | PipelineStages::COPY;
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supported_stages() {
        let transfer = PipelineStages::supported_by(QueueFlags::TRANSFER);
        assert!(transfer.contains(PipelineStages::COPY | PipelineStages::ALL_COMMANDS));
        assert!(!transfer.intersects(PipelineStages::FRAGMENT_SHADER | PipelineStages::BLIT));

        let compute = PipelineStages::supported_by(QueueFlags::COMPUTE);
        assert!(compute.contains(PipelineStages::COMPUTE_SHADER | PipelineStages::CLEAR));
        assert!(!compute.intersects(PipelineStages::VERTEX_SHADER));

        assert_eq!(
            PipelineStages::supported_by(QueueFlags::GRAPHICS | QueueFlags::COMPUTE),
            PipelineStages::all(),
        );
    }
}
