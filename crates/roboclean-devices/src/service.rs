//! Caller-facing service: lifecycle, snapshots and commands.
//!
//! `RobovacService` owns every moving part of the layer: the REST session,
//! the cloud directory, the push transport and the reconciler. Startup
//! order follows the backend's dependency chain: login resolves the
//! account context, the directory lists devices and serves broker
//! credentials, the transport connects and subscribes per discovered
//! device, and from then on both channels feed one reconcile loop.
//!
//! All map mutation happens on that single loop; cloud poll results and
//! push messages arrive on channels, so neither producer ever touches
//! shared state directly. A generation counter fences the poll loop:
//! results from a superseded generation are discarded, which is what
//! makes shutdown safe while a poll is in flight.

use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::dps::SymbolicKey;
use crate::error::{DeviceError, DeviceResult};
use crate::reconciler::{DeviceRecord, StateReconciler};
use crate::states::{CleanSpeed, ControlVerb, WorkMode};
use crate::transport::{PushMessage, SecureTransport};
use crate::variant::ProtocolVariant;
use roboclean_cloud::{CloudDevice, CloudDirectory, CloudError, Session, SessionManager};
use roboclean_core::{AccountConfig, ConnectionState, EventBus, EventBusReceiver, ServiceConfig};

/// Capacity of the inbound push queue.
const PUSH_QUEUE_CAPACITY: usize = 256;

/// A cloud listing tagged with the generation that requested it.
type TaggedSnapshot = (u64, Vec<CloudDevice>);

/// Top-level handle for the device-communication layer.
pub struct RobovacService {
    config: ServiceConfig,
    session_manager: Arc<SessionManager>,
    directory: Arc<CloudDirectory>,
    reconciler: Arc<StateReconciler>,
    transport: Arc<SecureTransport>,
    event_bus: EventBus,
    session: Arc<RwLock<Option<Session>>>,
    generation: Arc<AtomicU64>,
    running: AtomicBool,
    /// Receivers handed to the reconcile loop on first init
    loop_inputs: Mutex<Option<(mpsc::Receiver<PushMessage>, mpsc::Receiver<TaggedSnapshot>)>>,
    cloud_tx: mpsc::Sender<TaggedSnapshot>,
    subscribed: Arc<RwLock<HashSet<String>>>,
    poll_task: Mutex<Option<JoinHandle<()>>>,
}

impl RobovacService {
    /// Assemble the layer for an account. No network activity happens
    /// until [`init`](Self::init).
    pub fn new(account: AccountConfig, config: ServiceConfig) -> Self {
        let event_bus = EventBus::new();
        let (push_tx, push_rx) = mpsc::channel(PUSH_QUEUE_CAPACITY);
        let (cloud_tx, cloud_rx) = mpsc::channel(4);

        let session_manager = Arc::new(SessionManager::new(account));
        let directory = Arc::new(CloudDirectory::new(session_manager.clone()));
        let reconciler =
            Arc::new(StateReconciler::new(&config).with_event_bus(event_bus.clone()));
        let transport = Arc::new(
            SecureTransport::new(config.namespace.clone(), push_tx)
                .with_event_bus(event_bus.clone()),
        );

        Self {
            config,
            session_manager,
            directory,
            reconciler,
            transport,
            event_bus,
            session: Arc::new(RwLock::new(None)),
            generation: Arc::new(AtomicU64::new(0)),
            running: AtomicBool::new(false),
            loop_inputs: Mutex::new(Some((push_rx, cloud_rx))),
            cloud_tx,
            subscribed: Arc::new(RwLock::new(HashSet::new())),
            poll_task: Mutex::new(None),
        }
    }

    /// Subscribe to snapshot-change and transport events.
    pub fn subscribe_events(&self) -> EventBusReceiver {
        self.event_bus.subscribe()
    }

    /// Authenticate, discover devices, connect the push transport and
    /// start the background loops.
    pub async fn init(&self) -> DeviceResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            debug!("init called while already running");
            return Ok(());
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        self.spawn_reconcile_loop().await;

        let result = self.startup(generation).await;
        if let Err(err) = &result {
            error!("startup failed: {err}");
            self.running.store(false, Ordering::SeqCst);
            self.transport.disconnect().await;
        }
        result
    }

    async fn startup(&self, generation: u64) -> DeviceResult<()> {
        let session = self.session_manager.login().await?;
        *self.session.write().await = Some(session.clone());

        // First directory pass seeds the map and drives subscriptions.
        let mut devices = self.directory.list_devices(&session).await?;
        let push_devices = self
            .directory
            .list_push_devices(&session, &devices)
            .await
            .unwrap_or_else(|err| {
                warn!("push-capable listing unavailable: {err}");
                Vec::new()
            });
        devices.extend(push_devices);

        let _ = self.cloud_tx.send((generation, devices.clone())).await;

        let credentials = self.directory.fetch_broker_credentials(&session).await?;
        self.transport.connect(&credentials).await?;

        for device in &devices {
            self.subscribe_device(device).await;
        }

        self.spawn_poll_loop(generation).await;
        info!("service initialized with {} devices", devices.len());
        Ok(())
    }

    /// Tear the layer down. Idempotent; in-flight polls are fenced off
    /// by the generation bump and their results discarded.
    pub async fn close(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.generation.fetch_add(1, Ordering::SeqCst);

        if let Some(task) = self.poll_task.lock().await.take() {
            task.abort();
        }
        self.transport.disconnect().await;
        *self.session.write().await = None;
        self.subscribed.write().await.clear();
        info!("service closed; device records retained");
    }

    /// Read-only copy of the reconciled device map.
    pub async fn snapshot(&self) -> Vec<DeviceRecord> {
        self.reconciler.snapshot().await
    }

    /// Look up one device record.
    pub async fn device(&self, serial: &str) -> Option<DeviceRecord> {
        self.reconciler.device(serial).await
    }

    /// Send a symbolic command to a device.
    pub async fn send_command(
        &self,
        serial: &str,
        key: SymbolicKey,
        value: Value,
    ) -> DeviceResult<()> {
        if self.transport.state().await != ConnectionState::Connected {
            return Err(DeviceError::NoTransport);
        }
        self.reconciler
            .send_command(self.transport.as_ref(), serial, key, value)
            .await
    }

    /// Send a command and wait for the correlated response from the
    /// device's response topic. Best-effort: a quiet device times out.
    pub async fn send_command_acked(
        &self,
        serial: &str,
        key: SymbolicKey,
        value: Value,
    ) -> DeviceResult<Value> {
        if self.transport.state().await != ConnectionState::Connected {
            return Err(DeviceError::NoTransport);
        }
        let (model, data) = self.reconciler.encode_command(serial, key, value).await?;
        let (msg_seq, rx) = self.transport.publish_command(serial, &model, data).await?;
        self.transport
            .await_response(msg_seq, rx, self.config.command_timeout())
            .await
    }

    // ── High-level vacuum commands ──────────────────────────────────

    /// Resume or start cleaning.
    pub async fn play(&self, serial: &str) -> DeviceResult<()> {
        match self.variant_of(serial).await? {
            ProtocolVariant::Novel => {
                self.mode_ctrl(serial, SymbolicKey::PlayPause, ControlVerb::ResumeTask)
                    .await
            }
            _ => self.send_command(serial, SymbolicKey::PlayPause, json!(true)).await,
        }
    }

    /// Pause the current task.
    pub async fn pause(&self, serial: &str) -> DeviceResult<()> {
        match self.variant_of(serial).await? {
            ProtocolVariant::Novel => {
                self.mode_ctrl(serial, SymbolicKey::PlayPause, ControlVerb::PauseTask)
                    .await
            }
            _ => self.send_command(serial, SymbolicKey::PlayPause, json!(false)).await,
        }
    }

    /// Stop the current task entirely.
    pub async fn stop(&self, serial: &str) -> DeviceResult<()> {
        match self.variant_of(serial).await? {
            ProtocolVariant::Novel => {
                self.mode_ctrl(serial, SymbolicKey::PlayPause, ControlVerb::StopTask)
                    .await
            }
            _ => self.send_command(serial, SymbolicKey::PlayPause, json!(false)).await,
        }
    }

    /// Send the robot back to its dock.
    pub async fn go_home(&self, serial: &str) -> DeviceResult<()> {
        match self.variant_of(serial).await? {
            ProtocolVariant::Novel => {
                self.mode_ctrl(serial, SymbolicKey::GoHome, ControlVerb::StartGohome)
                    .await
            }
            _ => self.send_command(serial, SymbolicKey::GoHome, json!(true)).await,
        }
    }

    /// Start a whole-home auto clean.
    pub async fn auto_clean(&self, serial: &str) -> DeviceResult<()> {
        match self.variant_of(serial).await? {
            ProtocolVariant::Novel => {
                self.mode_ctrl(serial, SymbolicKey::PlayPause, ControlVerb::StartAutoClean)
                    .await
            }
            _ => {
                self.send_command(
                    serial,
                    SymbolicKey::WorkMode,
                    json!(WorkMode::Auto.legacy_value()),
                )
                .await?;
                self.play(serial).await
            }
        }
    }

    /// Start a spot clean around the robot's position.
    pub async fn spot_clean(&self, serial: &str) -> DeviceResult<()> {
        match self.variant_of(serial).await? {
            ProtocolVariant::Novel => {
                self.mode_ctrl(serial, SymbolicKey::PlayPause, ControlVerb::StartSpotClean)
                    .await
            }
            _ => {
                self.send_command(
                    serial,
                    SymbolicKey::WorkMode,
                    json!(WorkMode::Spot.legacy_value()),
                )
                .await?;
                self.play(serial).await
            }
        }
    }

    /// Start a room-scoped clean.
    pub async fn room_clean(&self, serial: &str) -> DeviceResult<()> {
        match self.variant_of(serial).await? {
            ProtocolVariant::Novel => {
                self.mode_ctrl(
                    serial,
                    SymbolicKey::PlayPause,
                    ControlVerb::StartSelectRoomsClean,
                )
                .await
            }
            _ => {
                self.send_command(
                    serial,
                    SymbolicKey::WorkMode,
                    json!(WorkMode::Room.legacy_value()),
                )
                .await?;
                self.play(serial).await
            }
        }
    }

    /// Change the suction level.
    pub async fn set_clean_speed(&self, serial: &str, speed: CleanSpeed) -> DeviceResult<()> {
        match self.variant_of(serial).await? {
            ProtocolVariant::Novel => {
                let index = speed.novel_index().ok_or_else(|| DeviceError::Encode {
                    schema: "clean_speed".into(),
                    reason: format!("{speed:?} is not supported by the novel protocol"),
                })?;
                self.send_command(serial, SymbolicKey::CleanSpeed, json!(index))
                    .await
            }
            _ => {
                self.send_command(
                    serial,
                    SymbolicKey::CleanSpeed,
                    json!(speed.legacy_value()),
                )
                .await
            }
        }
    }

    /// Make the robot chirp so it can be located.
    pub async fn find_robot(&self, serial: &str, on: bool) -> DeviceResult<()> {
        self.send_command(serial, SymbolicKey::FindRobot, json!(on)).await
    }

    async fn mode_ctrl(
        &self,
        serial: &str,
        key: SymbolicKey,
        verb: ControlVerb,
    ) -> DeviceResult<()> {
        self.send_command(serial, key, json!({ "method": verb })).await
    }

    async fn variant_of(&self, serial: &str) -> DeviceResult<ProtocolVariant> {
        self.reconciler
            .device(serial)
            .await
            .map(|record| record.variant)
            .ok_or_else(|| DeviceError::UnknownDevice(serial.to_string()))
    }

    async fn subscribe_device(&self, device: &CloudDevice) {
        if device.model.is_empty() {
            debug!("{} has no model yet, deferring subscription", device.serial);
            return;
        }
        if !self.subscribed.write().await.insert(device.serial.clone()) {
            return;
        }
        if let Err(err) = self.transport.subscribe(&device.model, &device.serial).await {
            warn!("subscription for {} failed: {err}", device.serial);
            self.subscribed.write().await.remove(&device.serial);
        }
    }

    /// Start the single consumer of both channels. Runs for the service
    /// lifetime; exits when every producer is gone.
    async fn spawn_reconcile_loop(&self) {
        let Some((mut push_rx, mut cloud_rx)) = self.loop_inputs.lock().await.take() else {
            return;
        };
        let reconciler = self.reconciler.clone();
        let generation = self.generation.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    message = push_rx.recv() => {
                        match message {
                            Some(message) => {
                                reconciler
                                    .apply_push_message(&message.serial, &message.data)
                                    .await;
                            }
                            None => break,
                        }
                    }
                    snapshot = cloud_rx.recv() => {
                        match snapshot {
                            Some((tagged, records)) => {
                                if tagged != generation.load(Ordering::SeqCst) {
                                    debug!("discarding stale cloud snapshot (generation {tagged})");
                                    continue;
                                }
                                reconciler.apply_cloud_snapshot(&records).await;
                            }
                            None => break,
                        }
                    }
                }
            }
            debug!("reconcile loop finished");
        });
    }

    /// Start the fixed-interval cloud poll for this generation.
    async fn spawn_poll_loop(&self, generation: u64) {
        let session_manager = self.session_manager.clone();
        let directory = self.directory.clone();
        let session_slot = self.session.clone();
        let cloud_tx = self.cloud_tx.clone();
        let current_generation = self.generation.clone();
        let interval = self.config.poll_interval();

        let task = tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                if current_generation.load(Ordering::SeqCst) != generation {
                    break;
                }

                let Some(session) = session_slot.read().await.clone() else {
                    break;
                };

                match directory.list_devices(&session).await {
                    Ok(mut devices) => {
                        if let Ok(push_devices) =
                            directory.list_push_devices(&session, &devices).await
                        {
                            devices.extend(push_devices);
                        }
                        // The reconcile loop re-checks the generation, so
                        // a shutdown between here and the apply still
                        // discards this result.
                        let _ = cloud_tx.send((generation, devices)).await;
                    }
                    Err(CloudError::NotAuthenticated) => {
                        info!("session expired, re-authenticating");
                        match session_manager.soft_login(&session).await {
                            Ok(fresh) => {
                                *session_slot.write().await = Some(fresh);
                            }
                            Err(err) => {
                                error!("re-authentication failed: {err}");
                            }
                        }
                    }
                    Err(err) => {
                        // Stale-but-available: the previous snapshot
                        // stands until a poll succeeds.
                        warn!("cloud poll failed, keeping previous snapshot: {err}");
                    }
                }
            }
            debug!("poll loop finished (generation {generation})");
        });

        *self.poll_task.lock().await = Some(task);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> RobovacService {
        RobovacService::new(
            AccountConfig::new("user@example.com", "secret"),
            ServiceConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_close_before_init_is_a_no_op() {
        let service = service();
        service.close().await;
        service.close().await;
        assert!(service.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_commands_without_transport_fail_cleanly() {
        let service = service();
        let result = service
            .send_command("SN1", SymbolicKey::PlayPause, json!(true))
            .await;
        assert!(matches!(result, Err(DeviceError::NoTransport)));
    }

    #[tokio::test]
    async fn test_high_level_commands_require_a_known_device() {
        let service = service();
        // variant_of runs before the transport check for the high-level
        // helpers, so the unknown serial is the error that surfaces.
        let result = service.play("NOPE").await;
        assert!(matches!(result, Err(DeviceError::UnknownDevice(_))));
    }

    #[tokio::test]
    async fn test_event_subscription_is_available_before_init() {
        let service = service();
        let mut receiver = service.subscribe_events();
        assert!(receiver.try_recv().is_none());
    }
}
