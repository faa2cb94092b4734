use crate::agent::PositionSample;
use crate::geo::Coordinate;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tracing::debug;

/// Why a location source could not produce a sample
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LocationError {
    #[error("location permission denied")]
    PermissionDenied,
    #[error("location sample timed out")]
    Timeout,
    #[error("location unavailable: {0}")]
    Unavailable(String),
}

/// Produces the agent's current position on demand
#[async_trait]
pub trait LocationSource: Send + Sync {
    async fn current_position(&self) -> Result<PositionSample, LocationError>;
}

/// Always reports the same position (configured fallback provider)
pub struct FixedLocationSource {
    position: Coordinate,
    accuracy: f64,
}

impl FixedLocationSource {
    pub fn new(position: Coordinate, accuracy: f64) -> Self {
        Self { position, accuracy }
    }
}

#[async_trait]
impl LocationSource for FixedLocationSource {
    async fn current_position(&self) -> Result<PositionSample, LocationError> {
        Ok(PositionSample::new(
            self.position.latitude,
            self.position.longitude,
            self.accuracy,
        ))
    }
}

/// Tries `primary`, then `secondary` on any primary error
pub struct FallbackLocationSource {
    primary: Arc<dyn LocationSource>,
    secondary: Arc<dyn LocationSource>,
    /// Bound on the primary attempt so the secondary still gets a turn
    primary_timeout: Option<Duration>,
}

impl FallbackLocationSource {
    pub fn new(primary: Arc<dyn LocationSource>, secondary: Arc<dyn LocationSource>) -> Self {
        Self {
            primary,
            secondary,
            primary_timeout: None,
        }
    }

    pub fn with_primary_timeout(mut self, timeout: Duration) -> Self {
        self.primary_timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl LocationSource for FallbackLocationSource {
    async fn current_position(&self) -> Result<PositionSample, LocationError> {
        let primary = match self.primary_timeout {
            Some(limit) => tokio::time::timeout(limit, self.primary.current_position())
                .await
                .unwrap_or(Err(LocationError::Timeout)),
            None => self.primary.current_position().await,
        };

        match primary {
            Ok(sample) => Ok(sample),
            Err(e) => {
                debug!(error = %e, "Primary location source failed, using fallback");
                self.secondary.current_position().await
            }
        }
    }
}

/// Push side of a device's position watch.
///
/// The device (or the HTTP position endpoint) pushes readings; paired
/// [`FeedLocationSource`]s hand them to the tracking loop. Dropping the feed
/// clears the watch: its sources report `Unavailable` from then on.
pub struct DeviceFeed {
    tx: watch::Sender<Option<PositionSample>>,
}

impl DeviceFeed {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    /// Publish a new reading, replacing any unread one
    pub fn push(&self, sample: PositionSample) {
        self.tx.send_replace(Some(sample));
    }

    pub fn latest(&self) -> Option<PositionSample> {
        *self.tx.borrow()
    }

    pub fn source(&self) -> FeedLocationSource {
        FeedLocationSource {
            rx: Mutex::new(self.tx.subscribe()),
        }
    }
}

impl Default for DeviceFeed {
    fn default() -> Self {
        Self::new()
    }
}

/// Pull side of a [`DeviceFeed`]: waits for a reading it has not returned yet
pub struct FeedLocationSource {
    rx: Mutex<watch::Receiver<Option<PositionSample>>>,
}

#[async_trait]
impl LocationSource for FeedLocationSource {
    async fn current_position(&self) -> Result<PositionSample, LocationError> {
        let mut rx = self.rx.lock().await;

        loop {
            if rx.has_changed().unwrap_or(false) {
                if let Some(sample) = *rx.borrow_and_update() {
                    return Ok(sample);
                }
                continue;
            }
            if rx.changed().await.is_err() {
                return Err(LocationError::Unavailable("device feed closed".to_string()));
            }
        }
    }
}
