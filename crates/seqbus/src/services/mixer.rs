//! Simple mixer elements of one card as scalar controls.
//!
//! An element's value is its front-left playback volume, or its playback
//! switch for elements without a volume. Writes apply to all channels.

use std::collections::BTreeMap;

use alsa::mixer::{Mixer, Selem, SelemChannelId, SelemId};
use alsa::PollDescriptors;
use tracing::debug;

use super::card::alsa_err;
use super::{service_err, ControlService, ElementChange};
use crate::error::Result;
use crate::poll::PollDescriptor;

pub struct MixerService {
    card: String,
    mixer: Mixer,
    snapshot: BTreeMap<String, i64>,
}

fn read_selem(selem: &Selem) -> Option<i64> {
    if selem.has_playback_volume() {
        selem.get_playback_volume(SelemChannelId::FrontLeft).ok()
    } else if selem.has_playback_switch() {
        selem
            .get_playback_switch(SelemChannelId::FrontLeft)
            .ok()
            .map(i64::from)
    } else {
        None
    }
}

impl MixerService {
    /// Open the mixer of `card` (e.g. `"default"`, `"hw:0"`).
    pub fn open(card: &str) -> Result<Self> {
        let mixer = Mixer::new(card, true).map_err(|e| alsa_err(card, e))?;
        let mut service = Self {
            card: card.to_string(),
            mixer,
            snapshot: BTreeMap::new(),
        };
        service.snapshot = service.read_all()?;
        debug!(card, elements = service.snapshot.len(), "mixer opened");
        Ok(service)
    }

    fn read_all(&self) -> Result<BTreeMap<String, i64>> {
        let mut values = BTreeMap::new();
        for elem in self.mixer.iter() {
            let Some(selem) = Selem::new(elem) else {
                continue;
            };
            let name = selem
                .get_id()
                .get_name()
                .map(str::to_string)
                .map_err(|e| alsa_err(&self.card, e))?;
            if let Some(value) = read_selem(&selem) {
                values.insert(name, value);
            }
        }
        Ok(values)
    }

    fn find(&self, element: &str) -> Result<Selem<'_>> {
        self.mixer
            .find_selem(&SelemId::new(element, 0))
            .ok_or_else(|| service_err(&self.card, -libc::ENOENT))
    }
}

impl ControlService for MixerService {
    fn name(&self) -> &str {
        &self.card
    }

    fn elements(&self) -> Result<Vec<String>> {
        Ok(self.read_all()?.into_keys().collect())
    }

    fn get_value(&self, element: &str) -> Result<i64> {
        let selem = self.find(element)?;
        read_selem(&selem).ok_or_else(|| service_err(&self.card, -libc::ENOTSUP))
    }

    fn set_value(&mut self, element: &str, value: i64) -> Result<()> {
        let selem = self.find(element)?;
        if selem.has_playback_volume() {
            selem
                .set_playback_volume_all(value)
                .map_err(|e| alsa_err(&self.card, e))
        } else if selem.has_playback_switch() {
            selem
                .set_playback_switch_all(value as i32)
                .map_err(|e| alsa_err(&self.card, e))
        } else {
            Err(service_err(&self.card, -libc::ENOTSUP))
        }
    }

    fn poll_descriptors(&self) -> Result<Vec<PollDescriptor>> {
        let fds = PollDescriptors::get(&self.mixer).map_err(|e| alsa_err(&self.card, e))?;
        Ok(fds
            .into_iter()
            .map(|p| PollDescriptor::new(p.fd, p.events))
            .collect())
    }

    fn process_events(&mut self) -> Result<Vec<ElementChange>> {
        self.mixer
            .handle_events()
            .map_err(|e| alsa_err(&self.card, e))?;
        let current = self.read_all()?;
        let changes = current
            .iter()
            .filter(|(name, value)| self.snapshot.get(*name) != Some(*value))
            .map(|(name, value)| ElementChange {
                element: name.clone(),
                value: *value,
            })
            .collect();
        self.snapshot = current;
        Ok(changes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_mixer_elements() {
        let Ok(mut mixer) = MixerService::open("default") else {
            println!("Skipping test - no default mixer");
            return;
        };
        let elements = mixer.elements().unwrap();
        for name in &elements {
            println!("{} = {:?}", name, mixer.get_value(name));
        }
        mixer.process_events().unwrap();
    }
}
