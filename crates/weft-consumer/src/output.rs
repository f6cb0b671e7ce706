//! Exclusive presentation outputs.
//!
//! An output (a display, an audio device) serves one running consumer at a
//! time. Consumers given the same [`SharedResource`] slot hand it over:
//! `start` claims it and `stop` gives it back.

use std::time::Instant;
use tracing::debug;
use weft_core::{ResourceHandle, Result, SharedResource, WeftError};

#[derive(Debug)]
pub struct OutputDevice {
    opened_by: String,
    opened_at: Instant,
}

impl OutputDevice {
    fn open(owner: &str) -> Self {
        Self {
            opened_by: owner.to_owned(),
            opened_at: Instant::now(),
        }
    }

    /// Owner that first opened the device.
    pub fn opened_by(&self) -> &str {
        &self.opened_by
    }

    pub fn opened_at(&self) -> Instant {
        self.opened_at
    }
}

/// A new output slot. Clone it into every consumer that may present to it.
pub fn output_slot(name: &str) -> SharedResource<OutputDevice> {
    SharedResource::new(name)
}

/// Held while a consumer runs; dropping it releases the output.
pub(crate) struct OutputClaim {
    resource: SharedResource<OutputDevice>,
    owner: String,
    _device: ResourceHandle<OutputDevice>,
}

impl OutputClaim {
    pub(crate) fn take(resource: &SharedResource<OutputDevice>, owner: &str) -> Result<Self> {
        if !resource.claim(owner) {
            return Err(WeftError::Resource(format!(
                "Output is in use by {}",
                resource.owner().unwrap_or_default()
            )));
        }
        let device = match resource.acquire(|| Ok(OutputDevice::open(owner))) {
            Ok(device) => device,
            Err(e) => {
                resource.release(owner);
                return Err(e);
            }
        };
        debug!(owner, "Output claimed");
        Ok(Self {
            resource: resource.clone(),
            owner: owner.to_owned(),
            _device: device,
        })
    }
}

impl Drop for OutputClaim {
    fn drop(&mut self) {
        self.resource.release(&self.owner);
        debug!(owner = %self.owner, "Output released");
    }
}
