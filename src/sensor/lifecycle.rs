//! Per-sensor lifecycle management.
//!
//! Each [`SensorLifecycle`] exclusively owns at most one live capture stream
//! for its sensor kind. Activation and deactivation requests are guarded by an
//! explicit state variant rather than ad-hoc "busy" flags:
//!
//! ```text
//!            activate()                 acquire ok
//!   Idle ───────────────▶ Activating ─────────────▶ Active
//!    ▲                      │   │                     │
//!    │   acquire failed or  │   │ deactivate()        │ deactivate()
//!    │   cancelled on resume│   ▼                     ▼
//!    └──────────────────────┴─ (cancel requested)   Deactivating ──▶ Idle
//! ```
//!
//! A request arriving while an operation is already in flight is dropped
//! and logged, except that `deactivate()` during `Activating` is remembered
//! and honoured once the pending acquisition resumes.

use crate::sensor::device::{CaptureDevice, CaptureStream};
use crate::sensor::types::{SensorError, SensorKind, SensorReading, SensorStatus};
use parking_lot::Mutex;
use uuid::Uuid;

/// The live resource token for one activation cycle.
///
/// Never cloned; destroyed exactly once by [`SensorLifecycle::deactivate`].
#[derive(Debug)]
pub struct SensorHandle<S> {
    id: Uuid,
    stream: S,
}

/// Lifecycle state for one sensor.
#[derive(Debug)]
pub enum LifecycleState<S> {
    Idle,
    Activating { cancel_requested: bool },
    Active(SensorHandle<S>),
    Deactivating,
}

impl<S> LifecycleState<S> {
    fn name(&self) -> &'static str {
        match self {
            LifecycleState::Idle => "idle",
            LifecycleState::Activating { .. } => "activating",
            LifecycleState::Active(_) => "active",
            LifecycleState::Deactivating => "deactivating",
        }
    }
}

/// Result of an `activate()` call that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    /// A new handle was published.
    Activated(Uuid),
    /// A handle was already live; nothing acquired.
    AlreadyActive(Uuid),
    /// Another start or stop was in flight; request dropped.
    Dropped,
    /// `deactivate()` arrived while acquisition was suspended; the acquired
    /// stream was released and no handle was published.
    Cancelled,
}

/// Result of a `deactivate()` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deactivation {
    /// The live handle was torn down.
    Released(Uuid),
    /// Activation is suspended; it will release on resume.
    CancelRequested,
    /// Nothing was live.
    NotActive,
    /// A stop was already in flight; request dropped.
    Dropped,
}

struct Inner<S> {
    state: LifecycleState<S>,
    last_error: Option<SensorError>,
    reading: SensorReading,
}

/// Owns the capture stream for one sensor kind.
pub struct SensorLifecycle<D: CaptureDevice> {
    device: D,
    kind: SensorKind,
    inner: Mutex<Inner<D::Stream>>,
}

impl<D: CaptureDevice> SensorLifecycle<D> {
    pub fn new(device: D) -> Self {
        let kind = device.kind();
        Self {
            device,
            kind,
            inner: Mutex::new(Inner {
                state: LifecycleState::Idle,
                last_error: None,
                reading: SensorReading::neutral(kind),
            }),
        }
    }

    pub fn kind(&self) -> SensorKind {
        self.kind
    }

    /// Acquire the capture primitive and publish a handle.
    pub async fn activate(&self) -> Result<Activation, SensorError> {
        {
            let mut inner = self.inner.lock();
            match &inner.state {
                LifecycleState::Idle => {
                    inner.state = LifecycleState::Activating {
                        cancel_requested: false,
                    };
                    inner.last_error = None;
                }
                LifecycleState::Active(handle) => {
                    tracing::debug!(sensor = %self.kind, handle = %handle.id, "activate ignored: already active");
                    return Ok(Activation::AlreadyActive(handle.id));
                }
                other => {
                    tracing::debug!(sensor = %self.kind, state = other.name(), "activate dropped: operation in flight");
                    return Ok(Activation::Dropped);
                }
            }
        }

        tracing::debug!(sensor = %self.kind, "requesting capture primitive");
        let acquired = self.device.acquire().await;

        let mut inner = self.inner.lock();
        let cancel_requested = matches!(
            inner.state,
            LifecycleState::Activating {
                cancel_requested: true
            }
        );

        let mut stream = match acquired {
            Ok(stream) => stream,
            Err(error) => {
                inner.state = LifecycleState::Idle;
                if cancel_requested {
                    tracing::debug!(sensor = %self.kind, %error, "acquisition failed after cancellation");
                    return Ok(Activation::Cancelled);
                }
                tracing::warn!(sensor = %self.kind, %error, "sensor activation failed");
                inner.last_error = Some(error.clone());
                return Err(error);
            }
        };

        if cancel_requested {
            stream.stop();
            inner.state = LifecycleState::Idle;
            tracing::info!(sensor = %self.kind, "activation cancelled while suspended; stream released");
            return Ok(Activation::Cancelled);
        }

        if let Err(error) = stream.connect() {
            stream.stop();
            inner.state = LifecycleState::Idle;
            inner.last_error = Some(error.clone());
            tracing::warn!(sensor = %self.kind, %error, "processing graph setup failed");
            return Err(error);
        }

        let handle = SensorHandle {
            id: Uuid::new_v4(),
            stream,
        };
        let id = handle.id;
        inner.state = LifecycleState::Active(handle);
        tracing::info!(sensor = %self.kind, handle = %id, "sensor active");
        Ok(Activation::Activated(id))
    }

    /// Tear down the processing graph, stop the stream and drop the handle.
    ///
    /// Safe to call in any state.
    pub fn deactivate(&self) -> Deactivation {
        let mut handle = {
            let mut inner = self.inner.lock();
            match std::mem::replace(&mut inner.state, LifecycleState::Deactivating) {
                LifecycleState::Active(handle) => handle,
                LifecycleState::Activating { .. } => {
                    inner.state = LifecycleState::Activating {
                        cancel_requested: true,
                    };
                    tracing::debug!(sensor = %self.kind, "deactivate recorded: activation suspended");
                    return Deactivation::CancelRequested;
                }
                LifecycleState::Idle => {
                    inner.state = LifecycleState::Idle;
                    return Deactivation::NotActive;
                }
                LifecycleState::Deactivating => {
                    tracing::debug!(sensor = %self.kind, "deactivate dropped: already deactivating");
                    return Deactivation::Dropped;
                }
            }
        };

        handle.stream.disconnect();
        handle.stream.stop();
        let id = handle.id;
        drop(handle);

        let mut inner = self.inner.lock();
        inner.state = LifecycleState::Idle;
        inner.reading = SensorReading::neutral(self.kind);
        tracing::info!(sensor = %self.kind, handle = %id, "sensor released");
        Deactivation::Released(id)
    }

    /// Tear down `handle` after the stream failed at runtime.
    ///
    /// The error is kept so [`status`](Self::status) reports `Failed`. A
    /// handle that is no longer live is left alone.
    pub fn fail(&self, handle: Uuid, error: SensorError) -> Deactivation {
        if self.handle_id() != Some(handle) {
            return Deactivation::NotActive;
        }
        let outcome = self.deactivate();
        if let Deactivation::Released(released) = outcome {
            if released == handle {
                tracing::warn!(sensor = %self.kind, %handle, %error, "sensor failed at runtime");
                self.inner.lock().last_error = Some(error);
            }
        }
        outcome
    }

    /// Whether a handle is live right now.
    pub fn is_active(&self) -> bool {
        matches!(self.inner.lock().state, LifecycleState::Active(_))
    }

    /// Id of the live handle, if any.
    pub fn handle_id(&self) -> Option<Uuid> {
        match &self.inner.lock().state {
            LifecycleState::Active(handle) => Some(handle.id),
            _ => None,
        }
    }

    pub fn status(&self) -> SensorStatus {
        let inner = self.inner.lock();
        match &inner.state {
            LifecycleState::Active(_) => SensorStatus::Active,
            LifecycleState::Activating { .. } => SensorStatus::Activating,
            LifecycleState::Idle | LifecycleState::Deactivating => match &inner.last_error {
                Some(error) => SensorStatus::Failed {
                    error: error.clone(),
                },
                None => SensorStatus::Inactive,
            },
        }
    }

    /// Run `f` against the live stream. Returns `None` when nothing is live.
    ///
    /// `f` runs under the lifecycle lock and must not block.
    pub fn with_stream<R>(&self, f: impl FnOnce(&mut D::Stream) -> R) -> Option<R> {
        let mut inner = self.inner.lock();
        match &mut inner.state {
            LifecycleState::Active(handle) => Some(f(&mut handle.stream)),
            _ => None,
        }
    }

    /// Most recent reading derived from this sensor's samples. Neutral while
    /// nothing is live, so a torn-down sensor never reports a stale verdict.
    pub fn last_reading(&self) -> SensorReading {
        self.inner.lock().reading
    }

    /// Record a derived reading. Ignored unless the sensor is live.
    pub fn record_reading(&self, reading: SensorReading) {
        let mut inner = self.inner.lock();
        if matches!(inner.state, LifecycleState::Active(_)) {
            inner.reading = reading;
        }
    }
}

impl<D: CaptureDevice> Drop for SensorLifecycle<D> {
    fn drop(&mut self) {
        self.deactivate();
    }
}
