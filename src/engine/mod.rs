//! The session manager: single command surface over the transport and
//! audio pipelines.
//!
//! At most one session is ever live; the check-and-launch sequence in
//! [`AudioEngine::start`] is serialized by an async mutex so concurrent
//! starts cannot race each other or a `stop`. All failures surface through
//! the observable state/error pair; the command surface itself never
//! returns an error.

pub mod roles;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::audio::{DeviceProvider, StreamSpec};
use crate::dsp::{ProcessingConfig, ProcessingSettings};
use crate::platform::{AllowAllFirewall, FirewallPolicy, LoopbackProvisioner, NoProvisioner};
use crate::protocol::{AudioFormat, ControlMessage};
use crate::transport::OutboundQueue;

/// Connection/session lifecycle, observed by the control surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Connecting,
    Streaming,
    Error,
}

/// Transport binding target. Immutable for the lifetime of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionMode {
    /// TCP to a remote address
    WifiTcp,
    /// Bluetooth RFCOMM (not available on this platform)
    Bluetooth,
    /// TCP to 127.0.0.1 through a forwarded USB port
    UsbLoopback,
}

/// Whether this instance captures-and-sends or listens-and-renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Capture,
    Render,
}

/// Everything `start` needs to bring up a session.
#[derive(Debug, Clone)]
pub struct StartParams {
    pub endpoint: String,
    pub port: u16,
    pub mode: ConnectionMode,
    pub role: Role,
    pub sample_rate: u32,
    pub channels: u16,
    pub format: AudioFormat,
}

impl StartParams {
    pub fn spec(&self) -> StreamSpec {
        StreamSpec {
            sample_rate: self.sample_rate,
            channels: self.channels,
            format: self.format,
        }
    }
}

/// State shared between the command surface, the session task, and the
/// blocking audio loops.
pub(crate) struct EngineShared {
    state_tx: watch::Sender<StreamState>,
    level_tx: watch::Sender<f32>,
    error_tx: watch::Sender<Option<String>>,
    mute_tx: watch::Sender<bool>,
    monitoring: AtomicBool,
    pub(crate) processing: ProcessingConfig,
    live_queue: Mutex<Option<Arc<OutboundQueue>>>,
    pub(crate) devices: Arc<dyn DeviceProvider>,
    pub(crate) firewall: Arc<dyn FirewallPolicy>,
    pub(crate) provisioner: Arc<dyn LoopbackProvisioner>,
}

impl EngineShared {
    pub(crate) fn set_state(&self, state: StreamState) {
        self.state_tx.send_replace(state);
    }

    pub(crate) fn set_error(&self, message: Option<String>) {
        self.error_tx.send_replace(message);
    }

    pub(crate) fn publish_level(&self, level: f32) {
        self.level_tx.send_replace(level);
    }

    pub(crate) fn is_muted(&self) -> bool {
        *self.mute_tx.borrow()
    }

    pub(crate) fn set_muted(&self, muted: bool) {
        self.mute_tx.send_replace(muted);
    }

    pub(crate) fn mute_sender(&self) -> watch::Sender<bool> {
        self.mute_tx.clone()
    }

    pub(crate) fn is_monitoring(&self) -> bool {
        self.monitoring.load(Ordering::Relaxed)
    }

    pub(crate) fn set_live_queue(&self, queue: Option<Arc<OutboundQueue>>) {
        *self.live_queue.lock() = queue;
    }

    fn live_queue(&self) -> Option<Arc<OutboundQueue>> {
        self.live_queue.lock().clone()
    }
}

struct SessionHandle {
    task: JoinHandle<()>,
}

/// The engine's public command surface.
///
/// Commands never fail; outcomes are reported through the observables
/// returned by [`state`](Self::state), [`level`](Self::level),
/// [`last_error`](Self::last_error), and [`muted`](Self::muted).
pub struct AudioEngine {
    shared: Arc<EngineShared>,
    session: tokio::sync::Mutex<Option<SessionHandle>>,
}

impl AudioEngine {
    /// Engine with system audio devices and permissive platform policies.
    pub fn new(devices: Arc<dyn DeviceProvider>) -> Self {
        Self::with_collaborators(devices, Arc::new(AllowAllFirewall), Arc::new(NoProvisioner))
    }

    /// Engine with explicit platform collaborators. The component that
    /// needs to reach a live engine (tray menu, notification action) holds
    /// a handle to this instance; there is no process-wide static.
    pub fn with_collaborators(
        devices: Arc<dyn DeviceProvider>,
        firewall: Arc<dyn FirewallPolicy>,
        provisioner: Arc<dyn LoopbackProvisioner>,
    ) -> Self {
        let (state_tx, _) = watch::channel(StreamState::Idle);
        let (level_tx, _) = watch::channel(0.0f32);
        let (error_tx, _) = watch::channel(None);
        let (mute_tx, _) = watch::channel(false);

        Self {
            shared: Arc::new(EngineShared {
                state_tx,
                level_tx,
                error_tx,
                mute_tx,
                monitoring: AtomicBool::new(false),
                processing: ProcessingConfig::default(),
                live_queue: Mutex::new(None),
                devices,
                firewall,
                provisioner,
            }),
            session: tokio::sync::Mutex::new(None),
        }
    }

    /// Launch a session. A no-op when one is already live; the caller
    /// observes the existing session's state instead.
    pub async fn start(&self, params: StartParams) {
        let mut guard = self.session.lock().await;
        if let Some(handle) = guard.as_ref() {
            if !handle.task.is_finished() {
                tracing::debug!("start ignored, session already active");
                return;
            }
        }

        self.shared.set_error(None);
        self.shared.set_state(StreamState::Connecting);

        let shared = self.shared.clone();
        let task = tokio::spawn(async move {
            let result = match params.role {
                Role::Capture => roles::run_capture(shared.clone(), params).await,
                Role::Render => roles::run_render(shared.clone(), params).await,
            };
            shared.set_live_queue(None);
            shared.publish_level(0.0);
            match result {
                Ok(()) => shared.set_state(StreamState::Idle),
                Err(e) if e.is_normal_disconnect() => {
                    tracing::info!("session closed by peer");
                    shared.set_state(StreamState::Idle);
                }
                Err(e) => {
                    tracing::error!("session failed: {e}");
                    shared.set_error(Some(e.to_string()));
                    shared.set_state(StreamState::Error);
                }
            }
        });
        *guard = Some(SessionHandle { task });
    }

    /// Tear down the active session, releasing sockets and device handles,
    /// and return to `Idle` whatever state the machine was in.
    pub async fn stop(&self) {
        let mut guard = self.session.lock().await;
        if let Some(handle) = guard.take() {
            handle.task.abort();
            let _ = handle.task.await;
        }
        self.shared.set_live_queue(None);
        self.shared.publish_level(0.0);
        self.shared.set_error(None);
        self.shared.set_state(StreamState::Idle);
    }

    /// Update local mute state and announce it to the peer if a session
    /// is live. Enqueue failures are logged, never surfaced.
    pub fn set_mute(&self, muted: bool) {
        self.shared.set_muted(muted);
        match self.shared.live_queue() {
            Some(queue) => queue.push_control(ControlMessage { muted }),
            None => tracing::debug!("mute changed with no active session"),
        }
    }

    /// Replace the DSP parameters. Takes effect on the next processed
    /// buffer; no transport side effect, no restart required.
    pub fn update_config(&self, settings: ProcessingSettings) {
        self.shared.processing.store(settings);
    }

    /// Toggle local playback of received audio (render role only).
    pub fn set_monitoring(&self, enabled: bool) {
        self.shared.monitoring.store(enabled, Ordering::Relaxed);
    }

    pub fn state(&self) -> watch::Receiver<StreamState> {
        self.shared.state_tx.subscribe()
    }

    /// Instantaneous level in [0, 1], updated at buffer rate.
    pub fn level(&self) -> watch::Receiver<f32> {
        self.shared.level_tx.subscribe()
    }

    pub fn last_error(&self) -> watch::Receiver<Option<String>> {
        self.shared.error_tx.subscribe()
    }

    pub fn muted(&self) -> watch::Receiver<bool> {
        self.shared.mute_tx.subscribe()
    }
}
