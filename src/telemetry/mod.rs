//! Realtime telemetry pipeline for one selected device.
//!
//! A [`TelemetryFeed`] owns at most one realtime subscription. Selecting a
//! device closes the previous subscription, seeds the latest sample and the
//! chart window from history, then subscribes to new rows for that device.
//! Incoming rows are applied on the caller's thread by [`TelemetryFeed::pump`]
//! or [`TelemetryFeed::wait_next`].
//!
//! Failures never panic and never clear good data: a failed fetch keeps the
//! previous state and raises a notification; a failed subscription moves the
//! feed to [`FeedStatus::Stalled`].

mod window;

use std::time::Duration;

pub use window::TelemetryWindow;

use crate::backend::{self, Backend, ChangeEvent, Direction, Filter, Query, Subscription};
use crate::models::{self, TelemetrySample};
use crate::notify::{Notice, Notifier};

const SAMPLE_COLUMNS: [&str; 5] = ["device_id", "hr", "spo2", "temp", "ts"];

/// Liveness of the feed's subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedStatus {
    /// No device selected.
    Idle,
    Live,
    /// The subscription failed; data shown may be out of date.
    Stalled(String),
}

pub struct TelemetryFeed<'a> {
    backend: &'a dyn Backend,
    notifier: &'a dyn Notifier,
    device_id: Option<String>,
    latest: Option<TelemetrySample>,
    window: TelemetryWindow,
    subscription: Option<Subscription>,
    status: FeedStatus,
}

impl<'a> TelemetryFeed<'a> {
    pub fn new(backend: &'a dyn Backend, notifier: &'a dyn Notifier, window_size: usize) -> Self {
        Self {
            backend,
            notifier,
            device_id: None,
            latest: None,
            window: TelemetryWindow::new(window_size),
            subscription: None,
            status: FeedStatus::Idle,
        }
    }

    pub fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }

    pub fn latest(&self) -> Option<&TelemetrySample> {
        self.latest.as_ref()
    }

    pub fn window(&self) -> &TelemetryWindow {
        &self.window
    }

    pub fn status(&self) -> &FeedStatus {
        &self.status
    }

    /// True when the selected device has no data to show.
    pub fn is_empty(&self) -> bool {
        self.latest.is_none() && self.window.is_empty()
    }

    /// Switch the feed to `device_id`.
    ///
    /// The previous subscription is closed before anything else happens, and
    /// state from the previous device is discarded.
    pub fn select_device(&mut self, device_id: &str) {
        self.close_subscription();
        self.device_id = Some(device_id.to_string());
        self.latest = None;
        self.window.clear();

        self.seed(device_id);
        self.open_subscription(device_id);
    }

    /// Seed latest sample and history for `device_id` without subscribing.
    pub fn load(&mut self, device_id: &str) {
        self.close();
        self.device_id = Some(device_id.to_string());
        self.latest = None;
        self.window.clear();
        self.seed(device_id);
    }

    /// Re-fetch latest sample and history for the current device. Prior
    /// state is kept for any fetch that fails.
    pub fn refresh(&mut self) {
        if let Some(device_id) = self.device_id.clone() {
            self.seed(&device_id);
        }
    }

    /// Apply every event already received. Returns the number of samples
    /// applied.
    pub fn pump(&mut self) -> usize {
        let mut applied = 0;
        while let Some(event) = self.subscription.as_ref().and_then(Subscription::try_next) {
            if self.apply(event).is_some() {
                applied += 1;
            }
        }
        applied
    }

    /// Wait up to `timeout` for the next event and apply it.
    pub fn wait_next(&mut self, timeout: Duration) -> Option<TelemetrySample> {
        let event = self.subscription.as_ref()?.next_timeout(timeout)?;
        self.apply(event)
    }

    /// Close the subscription and return to idle. Data already shown is
    /// kept.
    pub fn close(&mut self) {
        self.close_subscription();
        self.status = FeedStatus::Idle;
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn seed(&mut self, device_id: &str) {
        let latest_query = Query::new()
            .columns(&SAMPLE_COLUMNS)
            .eq("device_id", device_id)
            .order("ts", Direction::Descending)
            .limit(1);
        match backend::select_first::<TelemetrySample>(self.backend, models::TELEMETRY, &latest_query) {
            Ok(Some(sample)) => self.latest = Some(sample),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(device_id, error = %e, "failed to fetch latest sample");
                self.notifier
                    .notify(Notice::error("Failed to load telemetry", e.to_string()));
            }
        }

        let history_query = Query::new()
            .columns(&SAMPLE_COLUMNS)
            .eq("device_id", device_id)
            .order("ts", Direction::Descending)
            .limit(self.window.capacity());
        match backend::select_as::<TelemetrySample>(self.backend, models::TELEMETRY, &history_query) {
            Ok(history) => self.window.replace(history),
            Err(e) => {
                tracing::warn!(device_id, error = %e, "failed to fetch telemetry history");
                self.notifier
                    .notify(Notice::error("Failed to load telemetry history", e.to_string()));
            }
        }
    }

    fn open_subscription(&mut self, device_id: &str) {
        match self
            .backend
            .subscribe(models::TELEMETRY, Filter::eq("device_id", device_id))
        {
            Ok(sub) => {
                self.subscription = Some(sub);
                self.status = FeedStatus::Live;
            }
            Err(e) => self.stall(e.to_string()),
        }
    }

    fn close_subscription(&mut self) {
        if let Some(sub) = self.subscription.take() {
            sub.close();
        }
    }

    fn apply(&mut self, event: ChangeEvent) -> Option<TelemetrySample> {
        match event {
            ChangeEvent::Insert(row) => match serde_json::from_value::<TelemetrySample>(row) {
                Ok(sample) => {
                    self.window.push(sample.clone());
                    self.latest = Some(sample.clone());
                    Some(sample)
                }
                Err(e) => {
                    tracing::warn!(error = %e, "skipping malformed telemetry row");
                    None
                }
            },
            ChangeEvent::Error(reason) => {
                self.close_subscription();
                self.stall(reason);
                None
            }
        }
    }

    fn stall(&mut self, reason: String) {
        tracing::warn!(device_id = ?self.device_id, reason = %reason, "telemetry feed stalled");
        self.notifier.notify(Notice::error(
            "Live updates stopped",
            format!("{reason}. Showing the last known data; refresh or reselect the device to retry."),
        ));
        self.status = FeedStatus::Stalled(reason);
    }
}

impl std::fmt::Debug for TelemetryFeed<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryFeed")
            .field("device_id", &self.device_id)
            .field("status", &self.status)
            .field("window", &self.window.len())
            .finish()
    }
}
