use alsa::card::Iter;
use alsa::ctl::Ctl;
use serde::{Deserialize, Serialize};

use crate::error::{DriverError, Result, SeqError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardInfo {
    pub index: i32,
    pub id: String,
    pub name: String,
    pub long_name: String,
}

pub(crate) fn alsa_err(service: &str, e: alsa::Error) -> SeqError {
    SeqError::Service {
        service: service.to_string(),
        source: DriverError::new(-e.errno().abs(), e.to_string()),
    }
}

/// Every sound card the system knows, by index.
pub fn cards() -> Result<Vec<CardInfo>> {
    let mut found = Vec::new();
    for card in Iter::new() {
        let card = card.map_err(|e| alsa_err("cards", e))?;
        let index = card.get_index();
        let hw = format!("hw:{}", index);
        let id = Ctl::new(&hw, false)
            .and_then(|ctl| ctl.card_info().and_then(|info| info.get_id().map(str::to_string)))
            .map_err(|e| alsa_err(&hw, e))?;
        found.push(CardInfo {
            index,
            id,
            name: card.get_name().map_err(|e| alsa_err(&hw, e))?,
            long_name: card.get_longname().map_err(|e| alsa_err(&hw, e))?,
        });
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cards_listing() {
        // Machines without sound hardware simply list nothing
        match cards() {
            Ok(cards) => {
                for card in &cards {
                    println!("{}: {} ({})", card.index, card.name, card.id);
                    assert!(card.index >= 0);
                }
            }
            Err(e) => println!("Skipping test - cards unavailable: {}", e),
        }
    }
}
