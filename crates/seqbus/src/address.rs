//! Bus addresses and the `client:port` text form.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::codes::{addr_client, addr_port};
use crate::constants::{Category, Constant};
use crate::error::{Result, SeqError};

/// A `(client, port)` pair on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Address {
    pub client: u8,
    pub port: u8,
}

impl Address {
    /// The kernel's own timer port.
    pub const SYSTEM_TIMER: Address = Address::new(addr_client::SYSTEM, addr_port::SYSTEM_TIMER);
    /// Where graph-change announcements originate.
    pub const SYSTEM_ANNOUNCE: Address =
        Address::new(addr_client::SYSTEM, addr_port::SYSTEM_ANNOUNCE);
    /// Fan out to every port subscribed to the source.
    pub const SUBSCRIBERS: Address = Address::new(addr_client::SUBSCRIBERS, addr_port::UNKNOWN);
    /// Deliver to every client.
    pub const BROADCAST: Address = Address::new(addr_client::BROADCAST, addr_client::BROADCAST);

    pub const fn new(client: u8, port: u8) -> Self {
        Self { client, port }
    }

    pub fn client_constant(&self) -> Constant {
        Constant::resolve(Category::AddrClient, self.client as i64)
    }

    pub fn port_constant(&self) -> Constant {
        Constant::resolve(Category::AddrPort, self.port as i64)
    }

    pub fn is_subscribers(&self) -> bool {
        self.client == addr_client::SUBSCRIBERS
    }

    pub fn is_broadcast(&self) -> bool {
        self.client == addr_client::BROADCAST
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.client, self.port)
    }
}

impl From<(u8, u8)> for Address {
    fn from((client, port): (u8, u8)) -> Self {
        Address::new(client, port)
    }
}

fn parse_error(text: &str, reason: impl Into<String>) -> SeqError {
    SeqError::AddressParse {
        text: text.to_string(),
        reason: reason.into(),
    }
}

fn parse_id(text: &str, part: &str, what: &str) -> Result<u8> {
    let value: i64 = part
        .parse()
        .map_err(|_| parse_error(text, format!("{} '{}' is not a number", what, part)))?;
    u8::try_from(value).map_err(|_| parse_error(text, format!("{} {} out of range 0-255", what, value)))
}

/// Parse `client:port` (or `client.port`).
///
/// The client may be a number, `subscribers`, or a client name: an exact name
/// wins, otherwise a prefix matching exactly one client. `clients` yields
/// `(id, name)` pairs and is only consulted for symbolic clients. A missing
/// port means port 0.
pub fn parse<I>(text: &str, clients: I) -> Result<Address>
where
    I: IntoIterator<Item = (u8, String)>,
{
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(parse_error(text, "empty address"));
    }

    // Split at the first separator, as snd_seq_parse_address does
    let (client_part, port_part) = match trimmed.find(|c: char| c == ':' || c == '.') {
        Some(pos) => (&trimmed[..pos], Some(&trimmed[pos + 1..])),
        None => (trimmed, None),
    };

    let port = match port_part {
        Some("") => return Err(parse_error(text, "missing port after separator")),
        Some(p) => parse_id(text, p, "port")?,
        None => 0,
    };

    if client_part.is_empty() {
        return Err(parse_error(text, "missing client"));
    }

    let looks_numeric = client_part
        .strip_prefix('-')
        .unwrap_or(client_part)
        .chars()
        .all(|c| c.is_ascii_digit());
    if looks_numeric {
        let client = parse_id(text, client_part, "client")?;
        return Ok(Address::new(client, port));
    }

    if client_part.eq_ignore_ascii_case("subscribers") {
        return Ok(Address::new(addr_client::SUBSCRIBERS, port));
    }

    let clients: Vec<(u8, String)> = clients.into_iter().collect();
    if let Some((id, _)) = clients.iter().find(|(_, name)| name == client_part) {
        return Ok(Address::new(*id, port));
    }

    let mut prefixed = clients.iter().filter(|(_, name)| name.starts_with(client_part));
    match (prefixed.next(), prefixed.next()) {
        (Some((id, _)), None) => Ok(Address::new(*id, port)),
        (Some(_), Some(_)) => Err(parse_error(
            text,
            format!("client name '{}' is ambiguous", client_part),
        )),
        (None, _) => Err(parse_error(
            text,
            format!("no client named '{}'", client_part),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clients() -> Vec<(u8, String)> {
        vec![
            (0, "System".to_string()),
            (14, "Midi Through".to_string()),
            (128, "FLUID Synth (1234)".to_string()),
            (129, "FLUID Synth (5678)".to_string()),
            (130, "Keystation".to_string()),
        ]
    }

    #[test]
    fn test_parse_numeric() {
        assert_eq!(parse("128:0", clients()).unwrap(), Address::new(128, 0));
        assert_eq!(parse("20.1", clients()).unwrap(), Address::new(20, 1));
        assert_eq!(parse("  14:0 ", clients()).unwrap(), Address::new(14, 0));
        assert_eq!(parse("130", clients()).unwrap(), Address::new(130, 0));
    }

    #[test]
    fn test_parse_names() {
        assert_eq!(parse("Keystation:2", clients()).unwrap(), Address::new(130, 2));
        assert_eq!(parse("Midi:0", clients()).unwrap(), Address::new(14, 0));
        assert_eq!(
            parse("subscribers:0", clients()).unwrap(),
            Address::new(addr_client::SUBSCRIBERS, 0)
        );
    }

    #[test]
    fn test_parse_rejects_out_of_range() {
        for bad in ["256:0", "0:256", "-1:0", "12:-3", "999999999999999999999:0"] {
            let err = parse(bad, clients()).unwrap_err();
            match err {
                SeqError::AddressParse { text, .. } => assert_eq!(text, bad),
                other => panic!("unexpected error {:?}", other),
            }
        }
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in ["", ":", "14:", ":3", "14:x", "Nobody:0"] {
            assert!(
                matches!(parse(bad, clients()), Err(SeqError::AddressParse { .. })),
                "accepted {:?}",
                bad
            );
        }
    }

    #[test]
    fn test_parse_splits_at_first_separator() {
        let mut named = clients();
        named.push((131, "Synth.A".to_string()));

        // Everything after the first separator is the port.
        for bad in ["Synth.A:1", "20.1:3", "14:0.0"] {
            assert!(
                matches!(parse(bad, named.clone()), Err(SeqError::AddressParse { .. })),
                "accepted {:?}",
                bad
            );
        }
        assert_eq!(parse("Synth.1", named).unwrap(), Address::new(131, 1));
    }

    #[test]
    fn test_parse_ambiguous_prefix() {
        let err = parse("FLUID:0", clients()).unwrap_err();
        assert!(err.to_string().contains("ambiguous"));
    }

    #[test]
    fn test_display_and_constants() {
        assert_eq!(Address::new(128, 3).to_string(), "128:3");
        assert_eq!(
            Address::SUBSCRIBERS.client_constant().name(),
            Some("SEQ_ADDRESS_SUBSCRIBERS")
        );
        assert_eq!(
            Address::SYSTEM_ANNOUNCE.port_constant().name(),
            Some("SEQ_PORT_SYSTEM_ANNOUNCE")
        );
        assert!(Address::BROADCAST.is_broadcast());
    }
}
