//! Location provider: fixed demo coordinates or a live position feed.
//!
//! The provider publishes the latest state on a `watch` channel, so readers
//! always see the most recent update and never a backlog. A live feed runs
//! in a background task that is aborted on `stop()` or drop.

use std::time::Duration;

use futures_util::stream::{self, BoxStream, StreamExt};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::LOCATION_TIMEOUT_SECS;
use crate::types::Coordinates;

/// Current knowledge of the user's position
#[derive(Debug, Clone, PartialEq)]
pub enum LocationState {
    Acquiring,
    Available(Coordinates),
    Unavailable(String),
}

impl LocationState {
    pub fn coordinates(&self) -> Option<Coordinates> {
        match self {
            LocationState::Available(c) => Some(*c),
            _ => None,
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, LocationState::Acquiring)
    }
}

/// Failure reported by a position source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PositionError {
    #[error("Location permission denied. Enable demo mode to continue.")]
    PermissionDenied,
    #[error("Location unavailable")]
    PositionUnavailable,
    #[error("Timed out waiting for location")]
    Timeout,
    #[error("Geolocation is not supported on this device")]
    Unsupported,
}

pub type PositionResult = Result<Coordinates, PositionError>;

/// Continuous stream of position fixes
pub trait PositionSource: Send + 'static {
    fn into_stream(self: Box<Self>) -> BoxStream<'static, PositionResult>;
}

/// Source yielding one fixed position
pub struct FixedPosition(pub Coordinates);

impl PositionSource for FixedPosition {
    fn into_stream(self: Box<Self>) -> BoxStream<'static, PositionResult> {
        stream::once(async move { Ok::<_, PositionError>(self.0) }).boxed()
    }
}

/// Source for hosts without any position sensor
pub struct NoSensor;

impl PositionSource for NoSensor {
    fn into_stream(self: Box<Self>) -> BoxStream<'static, PositionResult> {
        stream::once(async { Err::<Coordinates, _>(PositionError::Unsupported) }).boxed()
    }
}

/// Parse one feed line: `lat,lng`, or an error keyword
/// (`denied`, `unavailable`, `timeout`).
pub fn parse_position_line(line: &str) -> PositionResult {
    match line.trim().to_lowercase().as_str() {
        "denied" => return Err(PositionError::PermissionDenied),
        "timeout" => return Err(PositionError::Timeout),
        "unavailable" => return Err(PositionError::PositionUnavailable),
        _ => {}
    }

    let (lat, lng) = line
        .split_once(',')
        .ok_or(PositionError::PositionUnavailable)?;
    let lat: f64 = lat.trim().parse().map_err(|_| PositionError::PositionUnavailable)?;
    let lng: f64 = lng.trim().parse().map_err(|_| PositionError::PositionUnavailable)?;

    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
        return Err(PositionError::PositionUnavailable);
    }
    Ok(Coordinates::new(lat, lng))
}

/// Source reading `lat,lng` lines from any async reader (stdin, a pipe, a file)
pub struct LineFeed<R> {
    reader: R,
}

impl<R> LineFeed<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

impl<R> PositionSource for LineFeed<R>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    fn into_stream(self: Box<Self>) -> BoxStream<'static, PositionResult> {
        stream::unfold(self.reader.lines(), |mut lines| async move {
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) if line.trim().is_empty() => continue,
                    Ok(Some(line)) => return Some((parse_position_line(&line), lines)),
                    Ok(None) => return None,
                    Err(e) => {
                        warn!("[GEO] Position feed read error: {}", e);
                        return None;
                    }
                }
            }
        })
        .boxed()
    }
}

/// Publishes the latest location state
pub struct LocationProvider {
    rx: watch::Receiver<LocationState>,
    task: Option<JoinHandle<()>>,
}

impl LocationProvider {
    /// Immediately available at `location`
    pub fn demo(location: Coordinates) -> Self {
        info!("[GEO] Demo mode at {}", location);
        let (_tx, rx) = watch::channel(LocationState::Available(location));
        Self { rx, task: None }
    }

    /// Follow a live source. Must be called inside a tokio runtime.
    pub fn live(source: Box<dyn PositionSource>) -> Self {
        Self::live_with_timeout(source, Duration::from_secs(LOCATION_TIMEOUT_SECS))
    }

    pub fn live_with_timeout(source: Box<dyn PositionSource>, update_timeout: Duration) -> Self {
        let (tx, rx) = watch::channel(LocationState::Acquiring);

        let task = tokio::spawn(async move {
            let mut positions = source.into_stream();
            loop {
                let state = match tokio::time::timeout(update_timeout, positions.next()).await {
                    Ok(Some(Ok(coords))) => {
                        debug!("[GEO] Position update {}", coords);
                        LocationState::Available(coords)
                    }
                    Ok(Some(Err(e))) => {
                        warn!("[GEO] Position error: {}", e);
                        LocationState::Unavailable(e.to_string())
                    }
                    Ok(None) => {
                        debug!("[GEO] Position feed ended");
                        break;
                    }
                    // The watch continues; a later fix replaces this state
                    Err(_) => LocationState::Unavailable(PositionError::Timeout.to_string()),
                };
                if tx.send(state).is_err() {
                    break;
                }
            }
        });

        Self { rx, task: Some(task) }
    }

    pub fn current(&self) -> LocationState {
        self.rx.borrow().clone()
    }

    /// Receiver for callers that want to follow updates
    pub fn subscribe(&self) -> watch::Receiver<LocationState> {
        self.rx.clone()
    }

    /// Wait until the state leaves `Acquiring`
    pub async fn wait_ready(&self) -> LocationState {
        let mut rx = self.rx.clone();
        loop {
            let state = rx.borrow_and_update().clone();
            if !state.is_loading() {
                return state;
            }
            if rx.changed().await.is_err() {
                return rx.borrow().clone();
            }
        }
    }

    /// Stop following the live source; the last state is kept
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!("[GEO] Position watch stopped");
        }
    }

    pub fn is_watching(&self) -> bool {
        self.task.as_ref().map_or(false, |t| !t.is_finished())
    }
}

impl Drop for LocationProvider {
    fn drop(&mut self) {
        self.stop();
    }
}
