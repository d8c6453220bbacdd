//! Fences.

use crate::{ValidationError, Violation};

/// Where the payload of a fence currently comes from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum FenceScope {
    #[default]
    Internal,

    /// A payload was imported temporarily. The next reset restores the internal payload.
    ExternalTemporary,

    /// A payload was imported permanently.
    ExternalPermanent,
}

/// The status of a fence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FenceStatus {
    /// The fence is not signaled and no submission will signal it.
    Unsignaled,

    /// A submission that signals the fence has not been retired.
    InFlight,

    /// The fence is signaled.
    Retired,
}

/// The tracked state of a fence.
#[derive(Debug)]
pub struct FenceState {
    handle: ash::vk::Fence,
    scope: FenceScope,
    status: FenceStatus,
    submission: Option<(ash::vk::Queue, u64)>,
}

impl FenceState {
    pub(crate) fn new(handle: ash::vk::Fence, signaled: bool) -> Self {
        FenceState {
            handle,
            scope: FenceScope::Internal,
            status: if signaled {
                FenceStatus::Retired
            } else {
                FenceStatus::Unsignaled
            },
            submission: None,
        }
    }

    #[inline]
    pub fn handle(&self) -> ash::vk::Fence {
        self.handle
    }

    #[inline]
    pub fn scope(&self) -> FenceScope {
        self.scope
    }

    #[inline]
    pub fn status(&self) -> FenceStatus {
        self.status
    }

    /// Returns the queue and the sequence number of the submission that will signal the fence.
    #[inline]
    pub fn submission(&self) -> Option<(ash::vk::Queue, u64)> {
        self.submission
    }

    pub fn validate_for_submit(&self) -> Result<(), Box<ValidationError>> {
        if self.scope != FenceScope::Internal {
            return Ok(());
        }

        match self.status {
            FenceStatus::Unsignaled => Ok(()),
            FenceStatus::InFlight => Err(ValidationError::new(Violation::AlreadyInFlight)
                .add_object(self.handle)
                .set_vuids(&["VUID-vkQueueSubmit2-fence-04895"])),
            FenceStatus::Retired => Err(ValidationError::new(Violation::SubmittedSignaled)
                .add_object(self.handle)
                .set_vuids(&["VUID-vkQueueSubmit2-fence-04894"])),
        }
    }

    pub(crate) fn submit(&mut self, queue: ash::vk::Queue, seq: u64) {
        self.status = FenceStatus::InFlight;
        self.submission = Some((queue, seq));
    }

    pub(crate) fn retire(&mut self) {
        self.status = FenceStatus::Retired;
        self.submission = None;
    }

    pub fn validate_reset(&self) -> Result<(), Box<ValidationError>> {
        if self.scope == FenceScope::Internal && self.status == FenceStatus::InFlight {
            return Err(ValidationError::new(Violation::AlreadyInFlight)
                .add_object(self.handle)
                .set_vuids(&["VUID-vkResetFences-pFences-01123"]));
        }

        Ok(())
    }

    pub(crate) fn reset(&mut self) {
        if self.scope == FenceScope::ExternalTemporary {
            self.scope = FenceScope::Internal;
        }

        self.status = FenceStatus::Unsignaled;
        self.submission = None;
    }

    pub fn validate_destroy(&self) -> Result<(), Box<ValidationError>> {
        if self.scope == FenceScope::Internal && self.status == FenceStatus::InFlight {
            return Err(ValidationError::new(Violation::AlreadyInFlight)
                .add_object(self.handle)
                .set_vuids(&["VUID-vkDestroyFence-fence-01120"]));
        }

        Ok(())
    }

    pub(crate) fn import(&mut self, temporary: bool) {
        self.scope = if temporary {
            FenceScope::ExternalTemporary
        } else {
            FenceScope::ExternalPermanent
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Handle;

    fn fence(signaled: bool) -> FenceState {
        FenceState::new(ash::vk::Fence::from_raw(1), signaled)
    }

    #[test]
    fn submit_cycle() {
        let mut fence = fence(false);
        assert!(fence.validate_for_submit().is_ok());

        fence.submit(ash::vk::Queue::from_raw(2), 7);
        assert_eq!(fence.status(), FenceStatus::InFlight);
        assert_eq!(
            fence.validate_for_submit().unwrap_err().violation,
            Violation::AlreadyInFlight,
        );
        assert!(fence.validate_reset().is_err());
        assert!(fence.validate_destroy().is_err());

        fence.retire();
        assert_eq!(
            fence.validate_for_submit().unwrap_err().violation,
            Violation::SubmittedSignaled,
        );

        fence.reset();
        assert!(fence.validate_for_submit().is_ok());
    }

    #[test]
    fn created_signaled() {
        assert_eq!(fence(true).status(), FenceStatus::Retired);
        assert_eq!(
            fence(true).validate_for_submit().unwrap_err().violation,
            Violation::SubmittedSignaled,
        );
    }

    #[test]
    fn imported() {
        let mut fence = fence(false);
        fence.submit(ash::vk::Queue::from_raw(2), 1);
        fence.import(true);
        assert!(fence.validate_for_submit().is_ok());

        fence.reset();
        assert_eq!(fence.scope(), FenceScope::Internal);

        fence.import(false);
        fence.reset();
        assert_eq!(fence.scope(), FenceScope::ExternalPermanent);
    }
}
