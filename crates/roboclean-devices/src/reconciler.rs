//! Reconciliation of cloud snapshots and push events into one device map.
//!
//! Every device is keyed by serial number; that is the only identity that
//! survives both channels. Records are created on first sighting from
//! either side and never deleted; a device the cloud stops listing is
//! only marked offline, and only when the push channel has been quiet
//! too.
//!
//! Merge discipline per wire key: push always wins over cloud for the
//! same key inside the freshness window, because a push update is the
//! device talking while a cloud value may be minutes stale. Raw data
//! points only grow or get overwritten, never disappear on a partial
//! update, and symbolic attributes are recomputed from the raw map after
//! every merge, never persisted independently.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::dps::{self, SymbolicKey};
use crate::error::{DeviceError, DeviceResult};
use crate::submessage::{SubMessageCodec, SCHEMA_MODE_CTRL, SCHEMA_WORK_STATUS};
use crate::variant::{self, ProtocolVariant};
use roboclean_cloud::CloudDevice;
use roboclean_core::{EventBus, RobocleanEvent, ServiceConfig};

/// Which channel has reported a device (or data point).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceChannel {
    Cloud,
    Push,
    Both,
}

impl SourceChannel {
    fn merged_with(self, other: SourceChannel) -> SourceChannel {
        if self == other {
            self
        } else {
            SourceChannel::Both
        }
    }
}

/// One raw data point with its provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPointEntry {
    pub value: Value,
    pub channel: SourceChannel,
    pub received_at: DateTime<Utc>,
}

/// Reconciled view of one device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub serial: String,
    pub name: String,
    pub model: String,
    pub variant: ProtocolVariant,
    pub online: bool,
    /// Raw wire-key/value map; grows or overwrites, never shrinks
    pub raw_data_points: HashMap<String, DataPointEntry>,
    /// Symbolic attributes, always derived from `raw_data_points`
    pub attributes: HashMap<SymbolicKey, Value>,
    pub source: SourceChannel,
    pub last_updated: DateTime<Utc>,
    /// Last time the push channel spoke for this device
    pub last_push_at: Option<DateTime<Utc>>,
}

impl DeviceRecord {
    fn provisional(serial: String, source: SourceChannel, now: DateTime<Utc>) -> Self {
        Self {
            name: serial.clone(),
            serial,
            model: String::new(),
            variant: ProtocolVariant::Unknown,
            online: source == SourceChannel::Push,
            raw_data_points: HashMap::new(),
            attributes: HashMap::new(),
            source,
            last_updated: now,
            last_push_at: None,
        }
    }
}

/// Outbound half the reconciler publishes commands through.
///
/// [`SecureTransport`](crate::SecureTransport) is the production
/// implementation; tests substitute a recorder.
#[async_trait]
pub trait CommandSink: Send + Sync {
    async fn publish(
        &self,
        serial: &str,
        model: &str,
        data: HashMap<String, Value>,
    ) -> DeviceResult<()>;
}

#[async_trait]
impl CommandSink for crate::transport::SecureTransport {
    async fn publish(
        &self,
        serial: &str,
        model: &str,
        data: HashMap<String, Value>,
    ) -> DeviceResult<()> {
        // Fire-and-forget here; correlated sends go through the
        // transport directly.
        self.publish_command(serial, model, data).await.map(|_| ())
    }
}

/// Merges both channels into one consistent device map.
///
/// Mutation is confined to the service's reconcile loop (single-writer);
/// `snapshot` takes a read lock and clones, so readers never observe a
/// half-applied merge.
pub struct StateReconciler {
    devices: Arc<RwLock<HashMap<String, DeviceRecord>>>,
    codec: SubMessageCodec,
    freshness_window: ChronoDuration,
    event_bus: Option<EventBus>,
}

impl StateReconciler {
    pub fn new(config: &ServiceConfig) -> Self {
        Self {
            devices: Arc::new(RwLock::new(HashMap::new())),
            codec: SubMessageCodec::with_builtin_schemas(),
            freshness_window: ChronoDuration::seconds(config.freshness_window as i64),
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Apply a full cloud listing.
    ///
    /// Devices absent from the listing are marked offline unless the
    /// push channel has been active for them inside the freshness
    /// window; their records and data points are kept either way.
    pub async fn apply_cloud_snapshot(&self, records: &[CloudDevice]) {
        let now = Utc::now();
        let mut devices = self.devices.write().await;
        let mut shape_changed = false;

        for incoming in records {
            let record = devices.entry(incoming.serial.clone()).or_insert_with(|| {
                info!("first sighting of {} via cloud", incoming.serial);
                shape_changed = true;
                DeviceRecord::provisional(incoming.serial.clone(), SourceChannel::Cloud, now)
            });

            let mut changed = false;

            if !incoming.name.is_empty() && incoming.name != record.name {
                record.name = incoming.name.clone();
                changed = true;
            }
            if !incoming.model.is_empty() && incoming.model != record.model {
                record.model = incoming.model.clone();
                changed = true;
            }
            if record.online != incoming.online {
                record.online = incoming.online;
                shape_changed = true;
                changed = true;
            }

            for (wire, value) in &incoming.data_points {
                if self.merge_cloud_point(record, wire, value, now) {
                    changed = true;
                }
            }

            let next_source = record.source.merged_with(SourceChannel::Cloud);
            if next_source != record.source {
                record.source = next_source;
                changed = true;
            }

            if self.refresh_derived(record) {
                changed = true;
            }
            if changed {
                record.last_updated = now;
                self.notify_device(&record.serial);
            }
        }

        // Offline derivation for devices the listing omitted.
        let listed: std::collections::HashSet<&str> =
            records.iter().map(|record| record.serial.as_str()).collect();
        for record in devices.values_mut() {
            if listed.contains(record.serial.as_str()) || !record.online {
                continue;
            }
            let push_recent = record
                .last_push_at
                .map(|at| now - at < self.freshness_window)
                .unwrap_or(false);
            if !push_recent {
                debug!("{} omitted from cloud listing, marking offline", record.serial);
                record.online = false;
                record.last_updated = now;
                shape_changed = true;
                self.notify_device(&record.serial);
            }
        }

        if shape_changed {
            self.notify_shape();
        }
    }

    /// Apply one push message's data block.
    ///
    /// Push may race ahead of the first cloud poll, so an unseen serial
    /// creates a provisional record the next cloud snapshot merges into.
    pub async fn apply_push_message(&self, serial: &str, data: &HashMap<String, Value>) {
        let now = Utc::now();
        let mut devices = self.devices.write().await;

        let known = devices.contains_key(serial);
        let record = devices.entry(serial.to_string()).or_insert_with(|| {
            info!("first sighting of {serial} via push");
            DeviceRecord::provisional(serial.to_string(), SourceChannel::Push, now)
        });

        for (wire, value) in data {
            let entry = DataPointEntry {
                value: value.clone(),
                channel: SourceChannel::Push,
                received_at: now,
            };
            record.raw_data_points.insert(wire.clone(), entry);
        }

        record.last_push_at = Some(now);
        record.online = true;
        record.source = record.source.merged_with(SourceChannel::Push);
        self.refresh_derived(record);
        record.last_updated = now;

        self.notify_device(serial);
        if !known {
            self.notify_shape();
        }
    }

    /// Read-only, consistent copy of every record, ordered by serial.
    pub async fn snapshot(&self) -> Vec<DeviceRecord> {
        let devices = self.devices.read().await;
        let mut records: Vec<DeviceRecord> = devices.values().cloned().collect();
        records.sort_by(|a, b| a.serial.cmp(&b.serial));
        records
    }

    /// Look up one record.
    pub async fn device(&self, serial: &str) -> Option<DeviceRecord> {
        self.devices.read().await.get(serial).cloned()
    }

    /// Translate a symbolic command into its wire form for a device.
    ///
    /// Structured values are sub-message-encoded when the device's
    /// variant calls for it; scalars pass through as wire values.
    pub async fn encode_command(
        &self,
        serial: &str,
        key: SymbolicKey,
        value: Value,
    ) -> DeviceResult<(String, HashMap<String, Value>)> {
        let (model, variant) = {
            let devices = self.devices.read().await;
            let record = devices
                .get(serial)
                .ok_or_else(|| DeviceError::UnknownDevice(serial.to_string()))?;
            (record.model.clone(), record.variant)
        };

        let wire = dps::wire_key(variant, key)
            .ok_or(DeviceError::UnmappedKey { key, variant })?;

        let wire_value = if variant == ProtocolVariant::Novel && value.is_object() {
            match command_schema(key) {
                Some(schema) => Value::String(self.codec.encode_blob(schema, &value)?),
                None => value,
            }
        } else {
            value
        };

        Ok((model, HashMap::from([(wire.to_string(), wire_value)])))
    }

    /// Encode and dispatch a command for a device.
    pub async fn send_command(
        &self,
        sink: &dyn CommandSink,
        serial: &str,
        key: SymbolicKey,
        value: Value,
    ) -> DeviceResult<()> {
        let (model, data) = self.encode_command(serial, key, value).await?;
        sink.publish(serial, &model, data).await
    }

    /// Recompute symbolic attributes from the raw map. Returns whether
    /// anything changed.
    fn refresh_derived(&self, record: &mut DeviceRecord) -> bool {
        let observed: Vec<&str> = record.raw_data_points.keys().map(String::as_str).collect();
        let next_variant = variant::resolve(record.variant, &record.model, observed);
        let variant_changed = next_variant != record.variant;
        record.variant = next_variant;

        let mut attributes = HashMap::new();
        for (wire, entry) in &record.raw_data_points {
            for symbolic in dps::symbolic_keys(record.variant, wire) {
                let value = match (report_schema(record.variant, *symbolic), &entry.value) {
                    (Some(schema), Value::String(blob)) => {
                        self.codec.decode_or_raw(schema, blob)
                    }
                    _ => entry.value.clone(),
                };
                attributes.insert(*symbolic, value);
            }
        }

        let attributes_changed = attributes != record.attributes;
        record.attributes = attributes;
        variant_changed || attributes_changed
    }

    /// Merge one cloud-sourced data point. Push entries younger than the
    /// freshness window are not overwritten. Returns whether the entry
    /// changed.
    fn merge_cloud_point(
        &self,
        record: &mut DeviceRecord,
        wire: &str,
        value: &Value,
        now: DateTime<Utc>,
    ) -> bool {
        match record.raw_data_points.get_mut(wire) {
            None => {
                record.raw_data_points.insert(
                    wire.to_string(),
                    DataPointEntry {
                        value: value.clone(),
                        channel: SourceChannel::Cloud,
                        received_at: now,
                    },
                );
                true
            }
            Some(entry) => {
                if entry.channel == SourceChannel::Push
                    && now - entry.received_at < self.freshness_window
                {
                    // The device spoke more recently than the directory
                    // refreshed; keep the push value.
                    if entry.value != *value {
                        debug!(
                            "cloud value for {}/{wire} superseded by fresher push update",
                            record.serial
                        );
                    }
                    return false;
                }
                if entry.value == *value && entry.channel == SourceChannel::Cloud {
                    return false;
                }
                entry.value = value.clone();
                entry.channel = SourceChannel::Cloud;
                entry.received_at = now;
                true
            }
        }
    }

    fn notify_device(&self, serial: &str) {
        if let Some(bus) = &self.event_bus {
            bus.publish(
                RobocleanEvent::DeviceUpdated {
                    serial: serial.to_string(),
                },
                "reconciler",
            );
        }
    }

    fn notify_shape(&self) {
        if let Some(bus) = &self.event_bus {
            bus.publish(RobocleanEvent::SnapshotChanged, "reconciler");
        }
    }
}

/// Schema used to encode a structured command value for a symbolic key.
fn command_schema(key: SymbolicKey) -> Option<&'static str> {
    match key {
        SymbolicKey::PlayPause | SymbolicKey::GoHome | SymbolicKey::WorkMode => {
            Some(SCHEMA_MODE_CTRL)
        }
        _ => None,
    }
}

/// Schema used to decode a blob-valued data point into an attribute.
fn report_schema(variant: ProtocolVariant, key: SymbolicKey) -> Option<&'static str> {
    if variant != ProtocolVariant::Novel {
        return None;
    }
    match key {
        SymbolicKey::WorkStatus | SymbolicKey::WorkMode => Some(SCHEMA_WORK_STATUS),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn reconciler() -> StateReconciler {
        StateReconciler::new(&ServiceConfig::default())
    }

    fn cloud_device(serial: &str, model: &str, dps: &[(&str, Value)]) -> CloudDevice {
        CloudDevice {
            serial: serial.into(),
            name: format!("{serial} name"),
            model: model.into(),
            online: true,
            data_points: dps
                .iter()
                .map(|(key, value)| (key.to_string(), value.clone()))
                .collect(),
            push_capable: false,
        }
    }

    #[tokio::test]
    async fn test_cloud_snapshot_is_idempotent() {
        let reconciler = reconciler();
        let records = vec![cloud_device("SN1", "T1000", &[("15", json!("Charging"))])];

        reconciler.apply_cloud_snapshot(&records).await;
        let first = reconciler.snapshot().await;

        reconciler.apply_cloud_snapshot(&records).await;
        let second = reconciler.snapshot().await;

        assert_eq!(first.len(), 1);
        assert_eq!(first[0].last_updated, second[0].last_updated);
        assert_eq!(first[0].raw_data_points, second[0].raw_data_points);
        assert_eq!(first[0].attributes, second[0].attributes);
    }

    #[tokio::test]
    async fn test_push_creates_provisional_record_and_cloud_merges_into_it() {
        let reconciler = reconciler();

        let data = HashMap::from([("15".to_string(), json!("Running"))]);
        reconciler.apply_push_message("SN1", &data).await;

        let snapshot = reconciler.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].source, SourceChannel::Push);
        assert!(snapshot[0].online);

        // The later cloud listing merges into the same record.
        let records = vec![cloud_device("SN1", "T1000", &[("104", json!(77))])];
        reconciler.apply_cloud_snapshot(&records).await;

        let snapshot = reconciler.snapshot().await;
        assert_eq!(snapshot.len(), 1, "no duplicate record for one serial");
        assert_eq!(snapshot[0].model, "T1000");
        assert_eq!(snapshot[0].source, SourceChannel::Both);
        assert_eq!(snapshot[0].raw_data_points["15"].value, json!("Running"));
        assert_eq!(snapshot[0].raw_data_points["104"].value, json!(77));
    }

    #[tokio::test]
    async fn test_push_wins_over_cloud_inside_freshness_window() {
        let reconciler = reconciler();

        let data = HashMap::from([("104".to_string(), json!(55))]);
        reconciler.apply_push_message("SN1", &data).await;

        // A cloud poll carrying an older battery reading for the same key.
        let records = vec![cloud_device("SN1", "T1000", &[("104", json!(90))])];
        reconciler.apply_cloud_snapshot(&records).await;

        let record = reconciler.device("SN1").await.unwrap();
        assert_eq!(record.raw_data_points["104"].value, json!(55));
        assert_eq!(record.raw_data_points["104"].channel, SourceChannel::Push);
    }

    #[tokio::test]
    async fn test_partial_updates_never_lose_keys() {
        let reconciler = reconciler();

        let full = HashMap::from([
            ("15".to_string(), json!("Running")),
            ("104".to_string(), json!(60)),
        ]);
        reconciler.apply_push_message("SN1", &full).await;

        let partial = HashMap::from([("104".to_string(), json!(59))]);
        reconciler.apply_push_message("SN1", &partial).await;

        let record = reconciler.device("SN1").await.unwrap();
        assert_eq!(record.raw_data_points.len(), 2);
        assert_eq!(record.raw_data_points["15"].value, json!("Running"));
        assert_eq!(record.raw_data_points["104"].value, json!(59));
    }

    #[tokio::test]
    async fn test_legacy_work_status_maps_to_symbolic_attribute() {
        let reconciler = reconciler();

        // Unknown variant, no model match, legacy work-status key.
        let data = HashMap::from([("15".to_string(), json!("Charging"))]);
        reconciler.apply_push_message("SN1", &data).await;

        let record = reconciler.device("SN1").await.unwrap();
        assert_eq!(record.variant, ProtocolVariant::Legacy);
        assert_eq!(record.attributes[&SymbolicKey::WorkStatus], json!("Charging"));
    }

    #[tokio::test]
    async fn test_novel_model_short_circuit_with_empty_dps() {
        let reconciler = reconciler();
        let records = vec![cloud_device("SN1", "X8", &[])];
        reconciler.apply_cloud_snapshot(&records).await;

        let record = reconciler.device("SN1").await.unwrap();
        assert_eq!(record.variant, ProtocolVariant::Novel);
    }

    #[tokio::test]
    async fn test_variant_never_downgrades_across_updates() {
        let reconciler = reconciler();

        let novel = HashMap::from([("163".to_string(), json!(80))]);
        reconciler.apply_push_message("SN1", &novel).await;
        assert_eq!(
            reconciler.device("SN1").await.unwrap().variant,
            ProtocolVariant::Novel
        );

        // Later updates carrying only legacy-looking keys must not flip
        // the record back.
        let legacy_looking = HashMap::from([("2".to_string(), json!(true))]);
        reconciler.apply_push_message("SN1", &legacy_looking).await;
        assert_eq!(
            reconciler.device("SN1").await.unwrap().variant,
            ProtocolVariant::Novel
        );

        let records = vec![cloud_device("SN1", "", &[("15", json!("Running"))])];
        reconciler.apply_cloud_snapshot(&records).await;
        assert_eq!(
            reconciler.device("SN1").await.unwrap().variant,
            ProtocolVariant::Novel
        );
    }

    #[tokio::test]
    async fn test_omitted_device_goes_offline_but_keeps_its_record() {
        let reconciler = reconciler();

        let records = vec![
            cloud_device("SN1", "T1000", &[("104", json!(50))]),
            cloud_device("SN2", "T1000", &[]),
        ];
        reconciler.apply_cloud_snapshot(&records).await;

        // Next poll lists only SN2.
        let records = vec![cloud_device("SN2", "T1000", &[])];
        reconciler.apply_cloud_snapshot(&records).await;

        let snapshot = reconciler.snapshot().await;
        assert_eq!(snapshot.len(), 2, "records are never deleted");
        let sn1 = snapshot.iter().find(|r| r.serial == "SN1").unwrap();
        assert!(!sn1.online);
        assert_eq!(sn1.raw_data_points["104"].value, json!(50));
    }

    #[tokio::test]
    async fn test_recent_push_activity_keeps_device_online() {
        let reconciler = reconciler();

        let data = HashMap::from([("15".to_string(), json!("Running"))]);
        reconciler.apply_push_message("SN1", &data).await;

        // Cloud poll that omits SN1 entirely; push spoke moments ago.
        reconciler.apply_cloud_snapshot(&[]).await;

        assert!(reconciler.device("SN1").await.unwrap().online);
    }

    struct RecordingSink {
        published: tokio::sync::Mutex<Vec<(String, String, HashMap<String, Value>)>>,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self {
                published: tokio::sync::Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CommandSink for RecordingSink {
        async fn publish(
            &self,
            serial: &str,
            model: &str,
            data: HashMap<String, Value>,
        ) -> DeviceResult<()> {
            self.published
                .lock()
                .await
                .push((serial.to_string(), model.to_string(), data));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_send_command_encodes_novel_sub_message() {
        let reconciler = reconciler();
        let records = vec![cloud_device("SN1", "X8", &[])];
        reconciler.apply_cloud_snapshot(&records).await;

        let sink = RecordingSink::new();
        reconciler
            .send_command(
                &sink,
                "SN1",
                SymbolicKey::PlayPause,
                json!({ "method": "RESUME_TASK" }),
            )
            .await
            .unwrap();

        let published = sink.published.lock().await;
        let (serial, model, data) = &published[0];
        assert_eq!(serial, "SN1");
        assert_eq!(model, "X8");

        // Novel wire key for PLAY_PAUSE, carrying the encoded blob.
        let blob = data["152"].as_str().expect("sub-message encoded as blob");
        let codec = SubMessageCodec::with_builtin_schemas();
        let decoded = codec.decode_blob(SCHEMA_MODE_CTRL, blob).unwrap();
        assert_eq!(decoded, json!({ "method": "RESUME_TASK" }));
    }

    #[tokio::test]
    async fn test_send_command_passes_scalars_through_for_legacy() {
        let reconciler = reconciler();
        let records = vec![cloud_device("SN1", "T1000", &[("15", json!("standby"))])];
        reconciler.apply_cloud_snapshot(&records).await;

        let sink = RecordingSink::new();
        reconciler
            .send_command(&sink, "SN1", SymbolicKey::PlayPause, json!(true))
            .await
            .unwrap();

        let published = sink.published.lock().await;
        assert_eq!(published[0].2["2"], json!(true));
    }

    #[tokio::test]
    async fn test_send_command_to_unknown_serial_fails() {
        let reconciler = reconciler();
        let sink = RecordingSink::new();

        let result = reconciler
            .send_command(&sink, "NOPE", SymbolicKey::PlayPause, json!(true))
            .await;
        assert!(matches!(result, Err(DeviceError::UnknownDevice(_))));
    }

    #[tokio::test]
    async fn test_corrupt_blob_keeps_raw_value_in_attributes() {
        let reconciler = reconciler();

        let records = vec![cloud_device("SN1", "X8", &[("153", json!("!!not-a-blob!!"))])];
        reconciler.apply_cloud_snapshot(&records).await;

        let record = reconciler.device("SN1").await.unwrap();
        // Decode failed, attribute falls back to the raw blob text.
        assert_eq!(
            record.attributes[&SymbolicKey::WorkStatus],
            json!("!!not-a-blob!!")
        );
    }
}
