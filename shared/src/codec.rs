//! Wake-on-LAN magic packet codec
//!
//! A magic packet is framed as:
//! ```text
//! [ 6 bytes: 0xFF ][ 16 x 6 bytes: target MAC ]
//! ```
//! for 102 bytes total, sent as a single UDP broadcast datagram.

use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Length of the synchronization stream
pub const SYNC_LEN: usize = 6;

/// Number of MAC repetitions after the synchronization stream
pub const MAC_REPETITIONS: usize = 16;

/// Total magic packet size
pub const MAGIC_PACKET_LEN: usize = SYNC_LEN + MAC_REPETITIONS * 6;

/// Conventional discard port for magic packets
pub const WOL_PORT: u16 = 9;

/// Errors that can occur during MAC parsing or packet decoding
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CodecError {
    #[error("Invalid MAC address length: {0} hex digits (expected 12)")]
    InvalidMacLength(usize),

    #[error("Invalid character in MAC address: {0:?}")]
    InvalidMacChar(char),

    #[error("Invalid magic packet length: {0} bytes (expected {MAGIC_PACKET_LEN})")]
    InvalidPacketLength(usize),

    #[error("Magic packet does not start with the synchronization stream")]
    MissingSyncStream,

    #[error("Magic packet repetitions do not match")]
    InconsistentRepetitions,
}

/// A 6-octet hardware address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    /// Normalize separators (`:`, `-`, `.`, whitespace) and parse 12 hex digits
    pub fn parse(raw: &str) -> Result<Self, CodecError> {
        let mut digits = Vec::with_capacity(12);
        for c in raw.chars() {
            match c {
                ':' | '-' | '.' => continue,
                c if c.is_whitespace() => continue,
                c if c.is_ascii_hexdigit() => digits.push(c),
                other => return Err(CodecError::InvalidMacChar(other)),
            }
        }

        if digits.len() != 12 {
            return Err(CodecError::InvalidMacLength(digits.len()));
        }

        let mut octets = [0u8; 6];
        for (i, pair) in digits.chunks(2).enumerate() {
            let hi = pair[0].to_digit(16).unwrap_or(0) as u8;
            let lo = pair[1].to_digit(16).unwrap_or(0) as u8;
            octets[i] = (hi << 4) | lo;
        }
        Ok(Self(octets))
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl FromStr for MacAddress {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let o = self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            o[0], o[1], o[2], o[3], o[4], o[5]
        )
    }
}

/// Build the magic packet for a target MAC
pub fn encode_magic_packet(mac: &MacAddress) -> Bytes {
    let mut buf = BytesMut::with_capacity(MAGIC_PACKET_LEN);
    buf.put_bytes(0xFF, SYNC_LEN);
    for _ in 0..MAC_REPETITIONS {
        buf.put_slice(&mac.0);
    }
    buf.freeze()
}

/// Validate a received magic packet and extract the target MAC
pub fn decode_magic_packet(packet: &[u8]) -> Result<MacAddress, CodecError> {
    if packet.len() != MAGIC_PACKET_LEN {
        return Err(CodecError::InvalidPacketLength(packet.len()));
    }
    if packet[..SYNC_LEN].iter().any(|b| *b != 0xFF) {
        return Err(CodecError::MissingSyncStream);
    }

    let mut mac = [0u8; 6];
    mac.copy_from_slice(&packet[SYNC_LEN..SYNC_LEN + 6]);
    let consistent = packet[SYNC_LEN..]
        .chunks(6)
        .all(|chunk| chunk == mac.as_slice());
    if !consistent {
        return Err(CodecError::InconsistentRepetitions);
    }
    Ok(MacAddress(mac))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_magic_packet_layout() {
        let mac = MacAddress::parse("AA:BB:CC:DD:EE:FF").expect("valid mac");
        let packet = encode_magic_packet(&mac);

        assert_eq!(packet.len(), 102);
        assert!(packet[..6].iter().all(|b| *b == 0xFF));
        for rep in 0..16 {
            let start = 6 + rep * 6;
            assert_eq!(&packet[start..start + 6], &[0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
        }
    }

    #[test]
    fn test_mac_separators_normalized() {
        let colon = MacAddress::parse("aa:bb:cc:dd:ee:ff").unwrap();
        let dash = MacAddress::parse("AA-BB-CC-DD-EE-FF").unwrap();
        let bare = MacAddress::parse("aabbccddeeff").unwrap();
        assert_eq!(colon, dash);
        assert_eq!(dash, bare);
        assert_eq!(bare.to_string(), "AA:BB:CC:DD:EE:FF");
    }

    #[test]
    fn test_short_mac_rejected() {
        // 11 hex digits
        let result = MacAddress::parse("AA:BB:CC:DD:EE:F");
        assert_eq!(result, Err(CodecError::InvalidMacLength(11)));
    }

    #[test]
    fn test_non_hex_rejected() {
        let result = MacAddress::parse("GG:BB:CC:DD:EE:FF");
        assert_eq!(result, Err(CodecError::InvalidMacChar('G')));
    }

    #[test]
    fn test_decode_rejects_tampered_packet() {
        let mac = MacAddress::parse("01:23:45:67:89:AB").unwrap();
        let mut packet = encode_magic_packet(&mac).to_vec();
        assert_eq!(decode_magic_packet(&packet), Ok(mac));

        packet[50] ^= 0x01;
        assert_eq!(
            decode_magic_packet(&packet),
            Err(CodecError::InconsistentRepetitions)
        );
        assert_eq!(
            decode_magic_packet(&packet[..101]),
            Err(CodecError::InvalidPacketLength(101))
        );
    }
}
