// Packet types — the unit handlers exchange through the relay

use serde::{Deserialize, Serialize};

/// A typed, opaque unit of data produced by one handler and consumed by the
/// handler of the same name on every other client.
///
/// The relay never looks inside a packet; only clients decode it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packet {
    /// Name of the handler that produced (and will consume) this packet.
    ///
    /// Empty until the multiplexer stamps it on the way out; an inbound
    /// packet with an empty kind is discarded.
    #[serde(rename = "type")]
    pub kind: String,
    /// Handler-defined description of `data` (e.g. a format tag)
    pub metadata: Vec<u8>,
    /// Payload bytes
    pub data: Vec<u8>,
}

impl Packet {
    /// Create an unstamped packet, as a handler's producer emits it.
    pub fn new(metadata: impl Into<Vec<u8>>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            kind: String::new(),
            metadata: metadata.into(),
            data: data.into(),
        }
    }

    /// Set the handler name this packet is routed by.
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    /// Metadata rendered for log lines.
    pub fn metadata_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.metadata)
    }
}

/// Render a byte count in binary units for log lines: `512B`, `1.5KiB`.
pub fn human_size(bytes: usize) -> String {
    const UNITS: [&str; 5] = ["KiB", "MiB", "GiB", "TiB", "PiB"];

    if bytes < 1024 {
        return format!("{}B", bytes);
    }

    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1}{}", value, UNITS[unit])
}
