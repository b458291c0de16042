//! Dukto wire formats.
//!
//! Two formats live here: the discovery datagram exchanged over UDP and the
//! primitives of the TCP transfer stream.
//!
//! ## Discovery Datagram
//!
//! ```text
//! ┌──────────┬──────────────────────┬──────────────────────────────┐
//! │   Tag    │  Port (0x04/0x05)    │  Signature (non-Goodbye)     │
//! │  1 byte  │  2 bytes, LE         │  UTF-8, rest of datagram     │
//! └──────────┴──────────────────────┴──────────────────────────────┘
//! ```
//!
//! The signature has no terminator; the datagram boundary ends it.
//!
//! ## Transfer Stream
//!
//! ```text
//! i64 element_count
//! i64 total_bytes
//! repeat element_count times:
//!     name bytes, 0x00
//!     i64 size            (-1 for a directory)
//!     size bytes of data  (omitted for a directory)
//! ```
//!
//! All integers are little-endian. There is no end-of-session marker: both
//! ends count elements.

/// Element name announcing a text blob instead of a file.
pub const TEXT_ELEMENT_NAME: &str = "___DUKTO___TEXT___";

/// Size announced for a directory element.
pub const DIRECTORY_SIZE: i64 = -1;

/// Byte terminating an element name on the wire.
pub const NAME_TERMINATOR: u8 = 0x00;

/// Upper bound for a single element name; longer names are treated as corrupt.
pub const MAX_ELEMENT_NAME_LEN: usize = 32 * 1024;

/// Width of every integer field in the transfer stream.
pub const INT_FIELD_SIZE: usize = 8;

/// Discovery message tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// Presence announcement sent to the broadcast address
    HelloBroadcast = 0x01,
    /// Presence reply sent to a single peer
    HelloUnicast = 0x02,
    /// Departure notice
    Goodbye = 0x03,
    /// Broadcast announcement from a node on a non-default port
    HelloPortBroadcast = 0x04,
    /// Unicast reply from a node on a non-default port
    HelloPortUnicast = 0x05,
}

impl MessageType {
    /// Parse a message type from a byte.
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::HelloBroadcast),
            0x02 => Some(Self::HelloUnicast),
            0x03 => Some(Self::Goodbye),
            0x04 => Some(Self::HelloPortBroadcast),
            0x05 => Some(Self::HelloPortUnicast),
            _ => None,
        }
    }

    /// Whether this tag carries a port field.
    pub const fn has_port(self) -> bool {
        matches!(self, Self::HelloPortBroadcast | Self::HelloPortUnicast)
    }
}

/// A decoded discovery datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryMessage {
    /// Broadcast hello from a node listening on the default port
    HelloBroadcast {
        /// Sender signature
        signature: String,
    },
    /// Unicast hello from a node listening on the default port
    HelloUnicast {
        /// Sender signature
        signature: String,
    },
    /// The sender is leaving
    Goodbye,
    /// Broadcast hello from a node listening on `port`
    HelloPortBroadcast {
        /// Sender's listening port
        port: u16,
        /// Sender signature
        signature: String,
    },
    /// Unicast hello from a node listening on `port`
    HelloPortUnicast {
        /// Sender's listening port
        port: u16,
        /// Sender signature
        signature: String,
    },
    /// Anything that failed to decode
    Invalid,
}

impl DiscoveryMessage {
    /// Build a hello. A `port` selects the Port variants.
    #[must_use]
    pub fn hello(broadcast: bool, port: Option<u16>, signature: impl Into<String>) -> Self {
        let signature = signature.into();
        match (broadcast, port) {
            (true, None) => Self::HelloBroadcast { signature },
            (false, None) => Self::HelloUnicast { signature },
            (true, Some(port)) => Self::HelloPortBroadcast { port, signature },
            (false, Some(port)) => Self::HelloPortUnicast { port, signature },
        }
    }

    /// Decode a datagram. Never fails: malformed input yields [`Self::Invalid`].
    #[must_use]
    pub fn parse(data: &[u8]) -> Self {
        let Some((&tag, rest)) = data.split_first() else {
            return Self::Invalid;
        };
        let Some(kind) = MessageType::from_byte(tag) else {
            return Self::Invalid;
        };

        if kind == MessageType::Goodbye {
            return Self::Goodbye;
        }

        let (port, rest) = if kind.has_port() {
            if rest.len() < 2 {
                return Self::Invalid;
            }
            let port = u16::from_le_bytes([rest[0], rest[1]]);
            if port == 0 {
                return Self::Invalid;
            }
            (Some(port), &rest[2..])
        } else {
            (None, rest)
        };

        if rest.is_empty() {
            return Self::Invalid;
        }
        let signature = String::from_utf8_lossy(rest).into_owned();

        match (kind, port) {
            (MessageType::HelloBroadcast, _) => Self::HelloBroadcast { signature },
            (MessageType::HelloUnicast, _) => Self::HelloUnicast { signature },
            (MessageType::HelloPortBroadcast, Some(port)) => {
                Self::HelloPortBroadcast { port, signature }
            }
            (MessageType::HelloPortUnicast, Some(port)) => Self::HelloPortUnicast { port, signature },
            _ => Self::Invalid,
        }
    }

    /// Encode this message. [`Self::Invalid`] encodes to an empty buffer,
    /// which parses back as `Invalid`.
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let Some(kind) = self.message_type() else {
            return Vec::new();
        };

        let signature = self.signature().unwrap_or_default();
        let mut buf = Vec::with_capacity(3 + signature.len());
        buf.push(kind as u8);
        if let Some(port) = self.port() {
            buf.extend_from_slice(&port.to_le_bytes());
        }
        buf.extend_from_slice(signature.as_bytes());
        buf
    }

    /// The tag of this message, `None` for `Invalid`.
    #[must_use]
    pub const fn message_type(&self) -> Option<MessageType> {
        match self {
            Self::HelloBroadcast { .. } => Some(MessageType::HelloBroadcast),
            Self::HelloUnicast { .. } => Some(MessageType::HelloUnicast),
            Self::Goodbye => Some(MessageType::Goodbye),
            Self::HelloPortBroadcast { .. } => Some(MessageType::HelloPortBroadcast),
            Self::HelloPortUnicast { .. } => Some(MessageType::HelloPortUnicast),
            Self::Invalid => None,
        }
    }

    /// Sender signature, if the message carries one.
    #[must_use]
    pub fn signature(&self) -> Option<&str> {
        match self {
            Self::HelloBroadcast { signature }
            | Self::HelloUnicast { signature }
            | Self::HelloPortBroadcast { signature, .. }
            | Self::HelloPortUnicast { signature, .. } => Some(signature),
            Self::Goodbye | Self::Invalid => None,
        }
    }

    /// Announced port for the Port variants.
    #[must_use]
    pub const fn port(&self) -> Option<u16> {
        match self {
            Self::HelloPortBroadcast { port, .. } | Self::HelloPortUnicast { port, .. } => {
                Some(*port)
            }
            _ => None,
        }
    }

    /// Whether the message was broadcast (and so deserves a unicast reply).
    #[must_use]
    pub const fn is_broadcast(&self) -> bool {
        matches!(
            self,
            Self::HelloBroadcast { .. } | Self::HelloPortBroadcast { .. }
        )
    }

    /// Whether the message decoded successfully.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        !matches!(self, Self::Invalid)
    }
}

/// Encode the session header: element count followed by total payload bytes.
#[must_use]
pub fn encode_session_header(element_count: i64, total_bytes: i64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(2 * INT_FIELD_SIZE);
    buf.extend_from_slice(&element_count.to_le_bytes());
    buf.extend_from_slice(&total_bytes.to_le_bytes());
    buf
}

/// Encode an element record header: name, terminator, size.
#[must_use]
pub fn encode_element_header(name: &str, size: i64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(name.len() + 1 + INT_FIELD_SIZE);
    buf.extend_from_slice(name.as_bytes());
    buf.push(NAME_TERMINATOR);
    buf.extend_from_slice(&size.to_le_bytes());
    buf
}

/// Decode one integer field from the front of `buf`, if enough bytes are present.
#[must_use]
pub fn decode_int(buf: &[u8]) -> Option<i64> {
    let bytes: [u8; INT_FIELD_SIZE] = buf.get(..INT_FIELD_SIZE)?.try_into().ok()?;
    Some(i64::from_le_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_messages() -> Vec<DiscoveryMessage> {
        vec![
            DiscoveryMessage::hello(true, None, "Alice at laptop (Linux)"),
            DiscoveryMessage::hello(false, None, "Bob at desk (Windows)"),
            DiscoveryMessage::Goodbye,
            DiscoveryMessage::hello(true, Some(4700), "Carol at mac (Macintosh)"),
            DiscoveryMessage::hello(false, Some(65535), "Dan at phone (Android)"),
            DiscoveryMessage::hello(true, None, "Zoë at café (Linux)"),
        ]
    }

    #[test]
    fn test_discovery_roundtrip() {
        for message in valid_messages() {
            let bytes = message.serialize();
            assert_eq!(DiscoveryMessage::parse(&bytes), message, "{message:?}");
        }
    }

    #[test]
    fn test_discovery_layout() {
        let bytes = DiscoveryMessage::hello(true, Some(0x1234), "x").serialize();
        assert_eq!(bytes, vec![0x04, 0x34, 0x12, b'x']);

        let bytes = DiscoveryMessage::hello(false, None, "ab").serialize();
        assert_eq!(bytes, vec![0x02, b'a', b'b']);

        assert_eq!(DiscoveryMessage::Goodbye.serialize(), vec![0x03]);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert_eq!(DiscoveryMessage::parse(&[]), DiscoveryMessage::Invalid);
        assert_eq!(DiscoveryMessage::parse(&[0x00, b'a']), DiscoveryMessage::Invalid);
        assert_eq!(DiscoveryMessage::parse(&[0x06, b'a']), DiscoveryMessage::Invalid);
        assert_eq!(DiscoveryMessage::parse(&[0xFF]), DiscoveryMessage::Invalid);
        // Port variant with port 0
        assert_eq!(
            DiscoveryMessage::parse(&[0x04, 0x00, 0x00, b'a']),
            DiscoveryMessage::Invalid
        );
        // Port variant truncated
        assert_eq!(DiscoveryMessage::parse(&[0x05, 0x10]), DiscoveryMessage::Invalid);
        // Hellos without signature
        assert_eq!(DiscoveryMessage::parse(&[0x01]), DiscoveryMessage::Invalid);
        assert_eq!(DiscoveryMessage::parse(&[0x02]), DiscoveryMessage::Invalid);
        assert_eq!(
            DiscoveryMessage::parse(&[0x04, 0x10, 0x12]),
            DiscoveryMessage::Invalid
        );
    }

    #[test]
    fn test_goodbye_ignores_trailing_bytes() {
        assert_eq!(
            DiscoveryMessage::parse(&[0x03, b'x', b'y']),
            DiscoveryMessage::Goodbye
        );
    }

    #[test]
    fn test_invalid_serializes_empty() {
        assert!(DiscoveryMessage::Invalid.serialize().is_empty());
        assert!(!DiscoveryMessage::Invalid.is_valid());
    }

    #[test]
    fn test_message_accessors() {
        let msg = DiscoveryMessage::hello(true, Some(5000), "sig");
        assert!(msg.is_broadcast());
        assert_eq!(msg.port(), Some(5000));
        assert_eq!(msg.signature(), Some("sig"));

        let msg = DiscoveryMessage::hello(false, None, "sig");
        assert!(!msg.is_broadcast());
        assert_eq!(msg.port(), None);
        assert_eq!(DiscoveryMessage::Goodbye.signature(), None);
    }

    #[test]
    fn test_element_header_encoding() {
        let bytes = encode_element_header("a.txt", 3);
        assert_eq!(&bytes[..5], b"a.txt");
        assert_eq!(bytes[5], NAME_TERMINATOR);
        assert_eq!(decode_int(&bytes[6..]), Some(3));

        let dir = encode_element_header("docs", DIRECTORY_SIZE);
        assert_eq!(decode_int(&dir[5..]), Some(-1));
    }

    #[test]
    fn test_session_header_encoding() {
        let bytes = encode_session_header(1, 5);
        assert_eq!(bytes.len(), 16);
        assert_eq!(bytes[..8], [1, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(decode_int(&bytes[8..]), Some(5));
    }

    #[test]
    fn test_decode_int_needs_full_field() {
        assert_eq!(decode_int(&[1, 2, 3]), None);
        assert_eq!(decode_int(&(-1i64).to_le_bytes()), Some(-1));
    }
}
