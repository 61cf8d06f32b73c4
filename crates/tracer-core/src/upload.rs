//! Upload batches and exported record shapes

use crate::encounter::{LifecycleEvent, ProximityRecord};
use serde::{Deserialize, Serialize};

/// Everything submitted in one upload attempt. Built at upload time, never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadBatch {
    /// Single-use token obtained from the exchange code
    pub upload_token: String,
    /// Proximity records, ascending by timestamp
    pub records: Vec<ProximityRecord>,
    /// Lifecycle records, ascending by timestamp
    pub events: Vec<LifecycleEvent>,
    /// Protocol version stamped on every exported record
    pub protocol_version: u32,
    /// Organization tag used when a record carries none
    pub organization_id: String,
}

impl UploadBatch {
    /// Proximity records in wire shape
    pub fn exported_records(&self) -> Vec<ExportedEncounter> {
        self.records
            .iter()
            .map(|r| ExportedEncounter::from_proximity(r, self.protocol_version, &self.organization_id))
            .collect()
    }

    /// Lifecycle records in wire shape
    pub fn exported_events(&self) -> Vec<ExportedEncounter> {
        self.events
            .iter()
            .map(|e| ExportedEncounter::from_event(e, self.protocol_version))
            .collect()
    }

    /// Counts for the success receipt
    pub fn receipt(&self) -> UploadReceipt {
        UploadReceipt {
            records: self.records.len(),
            events: self.events.len(),
        }
    }
}

/// Wire shape of one record in an upload.
///
/// Model, signal and organization fields are only emitted when both the
/// central and peripheral models are known; a thin record carries just its
/// timestamp, message and version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedEncounter {
    /// Whole seconds since the Unix epoch
    pub timestamp: u64,
    /// Peer identifier token, or the lifecycle label
    pub msg: Option<String>,
    /// Central device model
    #[serde(rename = "modelC", skip_serializing_if = "Option::is_none", default)]
    pub model_c: Option<String>,
    /// Peripheral device model
    #[serde(rename = "modelP", skip_serializing_if = "Option::is_none", default)]
    pub model_p: Option<String>,
    /// Received signal strength
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub rssi: Option<f64>,
    /// Transmit power
    #[serde(rename = "txPower", skip_serializing_if = "Option::is_none", default)]
    pub tx_power: Option<f64>,
    /// Organization tag
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub org: Option<String>,
    /// Protocol version
    pub v: u32,
}

impl ExportedEncounter {
    /// Export a proximity record
    pub fn from_proximity(record: &ProximityRecord, version: u32, default_org: &str) -> Self {
        let mut exported = Self {
            timestamp: record.timestamp().as_secs(),
            msg: record.peer_token().map(str::to_owned),
            model_c: None,
            model_p: None,
            rssi: None,
            tx_power: None,
            org: None,
            v: version,
        };

        if let Some((central, peripheral)) = record.central_peripheral_models() {
            exported.model_c = Some(central.to_owned());
            exported.model_p = Some(peripheral.to_owned());
            exported.rssi = Some(record.signal_strength());
            exported.tx_power = Some(record.transmit_power().unwrap_or(0.0));
            exported.org = Some(
                record
                    .organization_id()
                    .unwrap_or(default_org)
                    .to_owned(),
            );
        }

        exported
    }

    /// Export a lifecycle record
    pub fn from_event(event: &LifecycleEvent, version: u32) -> Self {
        Self {
            timestamp: event.timestamp.as_secs(),
            msg: Some(event.kind.label().to_owned()),
            model_c: None,
            model_p: None,
            rssi: None,
            tx_power: None,
            org: None,
            v: version,
        }
    }
}

/// Counts confirmed by the transport
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadReceipt {
    /// Proximity records submitted
    pub records: usize,
    /// Lifecycle records submitted
    pub events: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encounter::{LifecycleEventKind, PeerFields};
    use crate::time::Timestamp;

    #[test]
    fn thin_record_omits_model_fields() {
        let record =
            ProximityRecord::observed(Timestamp::from_millis(61_500), "Pixel 7", -55.0, None);
        let value = serde_json::to_value(ExportedEncounter::from_proximity(&record, 2, "hyperjump"))
            .unwrap();

        assert_eq!(value["timestamp"], 61);
        assert!(value["msg"].is_null());
        assert_eq!(value["v"], 2);
        assert!(value.get("modelC").is_none());
        assert!(value.get("rssi").is_none());
        assert!(value.get("org").is_none());
    }

    #[test]
    fn complete_record_carries_models_and_default_org() {
        let mut record =
            ProximityRecord::observed(Timestamp::from_secs(10), "Pixel 7", -55.0, None);
        record.complete(&PeerFields {
            remote_device_model: Some("iPhone 14".into()),
            peer_token: Some("tok".into()),
            organization_id: None,
            protocol_version: Some(2),
        });

        let exported = ExportedEncounter::from_proximity(&record, 3, "hyperjump");
        assert_eq!(exported.msg.as_deref(), Some("tok"));
        assert_eq!(exported.model_c.as_deref(), Some("Pixel 7"));
        assert_eq!(exported.model_p.as_deref(), Some("iPhone 14"));
        assert_eq!(exported.tx_power, Some(0.0));
        assert_eq!(exported.org.as_deref(), Some("hyperjump"));
        assert_eq!(exported.v, 3);
    }

    #[test]
    fn events_export_their_label() {
        let event = LifecycleEvent {
            timestamp: Timestamp::from_secs(7),
            kind: LifecycleEventKind::ScanningStopped,
        };
        let exported = ExportedEncounter::from_event(&event, 2);
        assert_eq!(exported.msg.as_deref(), Some("Scanning stopped"));
        assert_eq!(exported.timestamp, 7);
    }
}
