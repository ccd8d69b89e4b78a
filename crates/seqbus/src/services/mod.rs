//! Device services next to the sequencer: sound cards and their controls.
//!
//! A [`ControlService`] is a set of named scalar elements whose changes are
//! picked up by [`ControlService::process_events`]. The notify module turns
//! those changes into callback invocations.

#[cfg(feature = "alsa-backend")]
pub mod card;
#[cfg(feature = "alsa-backend")]
pub mod mixer;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{DriverError, Result, SeqError};
use crate::poll::PollDescriptor;

#[cfg(feature = "alsa-backend")]
pub use card::{cards, CardInfo};
#[cfg(feature = "alsa-backend")]
pub use mixer::MixerService;

/// One element's new value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementChange {
    pub element: String,
    pub value: i64,
}

pub trait ControlService {
    fn name(&self) -> &str;

    /// Element names, in the service's own order.
    fn elements(&self) -> Result<Vec<String>>;

    fn get_value(&self, element: &str) -> Result<i64>;

    fn set_value(&mut self, element: &str, value: i64) -> Result<()>;

    /// Descriptors that become readable when the service has events.
    fn poll_descriptors(&self) -> Result<Vec<PollDescriptor>>;

    /// Handle pending events and report which elements changed.
    fn process_events(&mut self) -> Result<Vec<ElementChange>>;
}

pub(crate) fn service_err(service: &str, code: i32) -> SeqError {
    SeqError::Service {
        service: service.to_string(),
        source: DriverError::from_errno(code),
    }
}

/// Controls held in memory. Every write, local or external, is reported
/// once by the next `process_events`.
#[derive(Debug, Clone, Default)]
pub struct MemoryControls {
    name: String,
    values: BTreeMap<String, i64>,
    pending: Vec<ElementChange>,
}

impl MemoryControls {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_element(mut self, element: impl Into<String>, value: i64) -> Self {
        self.values.insert(element.into(), value);
        self
    }

    /// A change made by someone else, as hardware or another process would.
    pub fn external_change(&mut self, element: &str, value: i64) -> Result<()> {
        self.set_value(element, value)
    }
}

impl ControlService for MemoryControls {
    fn name(&self) -> &str {
        &self.name
    }

    fn elements(&self) -> Result<Vec<String>> {
        Ok(self.values.keys().cloned().collect())
    }

    fn get_value(&self, element: &str) -> Result<i64> {
        self.values
            .get(element)
            .copied()
            .ok_or_else(|| service_err(&self.name, -libc::ENOENT))
    }

    fn set_value(&mut self, element: &str, value: i64) -> Result<()> {
        let slot = self
            .values
            .get_mut(element)
            .ok_or_else(|| service_err(&self.name, -libc::ENOENT))?;
        if *slot != value {
            *slot = value;
            self.pending.push(ElementChange {
                element: element.to_string(),
                value,
            });
        }
        Ok(())
    }

    fn poll_descriptors(&self) -> Result<Vec<PollDescriptor>> {
        Ok(Vec::new())
    }

    fn process_events(&mut self) -> Result<Vec<ElementChange>> {
        Ok(std::mem::take(&mut self.pending))
    }
}
