//! Pre-parsed mesh telemetry, as handed to the ingest pipeline.
//!
//! Wire decoding happens upstream. What arrives here is the packet header
//! (addresses, endpoints, timing) plus the decoded application payload as a
//! flat field map (`apdu`). The `kind` tag decides which child tables the
//! message is written to.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Decoded application payload: field name → value.
pub type Apdu = serde_json::Map<String, serde_json::Value>;

/// Which diagnostic record a message carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Application data with no diagnostic content; parent row only.
    Data,
    Boot,
    Traffic,
    Neighbor,
    Node,
    Advertiser,
    /// Any other diagnostic, stored as a JSON document.
    Diagnostics,
    /// Test-network measurement rows.
    TestData,
}

/// One received packet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub kind: MessageKind,
    /// Sink reception time, milliseconds since the Unix epoch.
    pub rx_time_ms_epoch: i64,
    /// Time the packet spent in the mesh.
    pub travel_time_ms: i64,
    pub network_id: u64,
    pub source_address: u32,
    pub destination_address: u32,
    pub source_endpoint: u8,
    pub destination_endpoint: u8,
    pub qos: u8,
    #[serde(default)]
    pub hop_count: Option<u32>,
    #[serde(default)]
    pub data_payload: Vec<u8>,
    #[serde(default)]
    pub apdu: Apdu,
}

impl Message {
    /// Reception time at the sink.
    pub fn rx_time(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.rx_time_ms_epoch)
            .single()
            .unwrap_or_default()
    }

    /// Time the node sent the packet. `None` when the subtraction overflows.
    pub fn launch_time_ms_epoch(&self) -> Option<i64> {
        self.rx_time_ms_epoch.checked_sub(self.travel_time_ms)
    }
}
