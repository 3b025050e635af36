use serde::Serialize;

use crate::types::SensorSnapshot;

pub const INGEST_INTERVAL_MS: u64 = 5_000;
pub const BROKER_INTERVAL_MS: u64 = 5_000;
/// The backend counts as reachable while Channel A delivered within this
/// window.
pub const BACKEND_REACHABLE_WINDOW_MS: u64 = 60_000;

/// One independent telemetry destination with its own cadence and failure
/// domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// Document-store ingestion API (request/response).
    Ingest,
    /// Pub/sub telemetry broker.
    Broker,
}

pub fn interval_ms(channel: Channel) -> u64 {
    match channel {
        Channel::Ingest => INGEST_INTERVAL_MS,
        Channel::Broker => BROKER_INTERVAL_MS,
    }
}

/// Per-channel last-success stamps. Invariant: a channel's timer advances
/// only on a confirmed successful send, so a failure retries one full
/// interval later instead of busy-looping.
#[derive(Debug, Default)]
pub struct DispatchTimers {
    last_ingest_ms: Option<u64>,
    last_broker_ms: Option<u64>,
}

impl DispatchTimers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn due(&self, channel: Channel, now_ms: u64) -> bool {
        match self.last_success_ms(channel) {
            Some(last) => now_ms.saturating_sub(last) >= interval_ms(channel),
            None => true,
        }
    }

    pub fn record_success(&mut self, channel: Channel, now_ms: u64) {
        match channel {
            Channel::Ingest => self.last_ingest_ms = Some(now_ms),
            Channel::Broker => self.last_broker_ms = Some(now_ms),
        }
    }

    pub fn last_success_ms(&self, channel: Channel) -> Option<u64> {
        match channel {
            Channel::Ingest => self.last_ingest_ms,
            Channel::Broker => self.last_broker_ms,
        }
    }

    pub fn backend_reachable(&self, now_ms: u64) -> bool {
        self.last_ingest_ms
            .map(|last| now_ms.saturating_sub(last) < BACKEND_REACHABLE_WINDOW_MS)
            .unwrap_or(false)
    }
}

/// Channel A body: the current snapshot plus the fixed device identifier.
#[derive(Debug, Clone, Serialize)]
pub struct IngestRecord {
    pub temp: f32,
    pub hum: f32,
    pub light: f32,
    pub motion: bool,
    pub sound: f32,
    pub timestamp: String,
    pub device: String,
}

pub fn ingest_record(snapshot: &SensorSnapshot, device: &str) -> IngestRecord {
    IngestRecord {
        temp: snapshot.temp_c,
        hum: snapshot.humidity,
        light: snapshot.light_pct,
        motion: snapshot.motion,
        sound: snapshot.sound_pct,
        timestamp: snapshot.timestamp.clone(),
        device: device.to_string(),
    }
}

/// Channel B body: compact single-line JSON with one decimal place for the
/// numeric fields.
pub fn broker_payload(snapshot: &SensorSnapshot) -> String {
    format!(
        "{{\"temp\":{:.1},\"hum\":{:.1},\"light\":{:.1},\"sound\":{:.1},\"motion\":{}}}",
        snapshot.temp_c, snapshot.humidity, snapshot.light_pct, snapshot.sound_pct, snapshot.motion
    )
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn snapshot() -> SensorSnapshot {
        SensorSnapshot {
            temp_c: 25.0,
            humidity: 50.0,
            light_pct: 60.0,
            sound_pct: 30.0,
            motion: false,
            timestamp: "2026-03-02 10:00:00 WIB".to_string(),
        }
    }

    #[test]
    fn channels_are_due_before_any_success() {
        let timers = DispatchTimers::new();
        assert!(timers.due(Channel::Ingest, 0));
        assert!(timers.due(Channel::Broker, 0));
    }

    #[test]
    fn timer_advances_only_on_success() {
        let mut timers = DispatchTimers::new();
        timers.record_success(Channel::Ingest, 10_000);

        // A failed send leaves the stamp alone, so the next eligible
        // attempt is one full interval after the last success.
        assert!(!timers.due(Channel::Ingest, 12_000));
        assert!(!timers.due(Channel::Ingest, 14_999));
        assert!(timers.due(Channel::Ingest, 15_000));
    }

    #[test]
    fn channel_failures_are_isolated() {
        let mut timers = DispatchTimers::new();
        timers.record_success(Channel::Ingest, 10_000);
        timers.record_success(Channel::Broker, 10_000);

        // Channel A fails at 15s (no record); Channel B succeeds.
        timers.record_success(Channel::Broker, 15_000);

        assert_eq!(timers.last_success_ms(Channel::Ingest), Some(10_000));
        assert_eq!(timers.last_success_ms(Channel::Broker), Some(15_000));
        assert!(timers.due(Channel::Ingest, 15_500));
        assert!(!timers.due(Channel::Broker, 15_500));
    }

    #[test]
    fn both_channels_dispatch_once_when_expired() {
        let mut timers = DispatchTimers::new();
        let now_ms = 60_000;

        let mut ingest_posts = 0;
        let mut broker_publishes = 0;

        if timers.due(Channel::Ingest, now_ms) {
            ingest_posts += 1;
            timers.record_success(Channel::Ingest, now_ms);
        }
        if timers.due(Channel::Broker, now_ms) {
            broker_publishes += 1;
            timers.record_success(Channel::Broker, now_ms);
        }

        assert_eq!((ingest_posts, broker_publishes), (1, 1));
        assert_eq!(timers.last_success_ms(Channel::Ingest), Some(now_ms));
        assert_eq!(timers.last_success_ms(Channel::Broker), Some(now_ms));
        // Immediately afterwards neither channel is eligible again.
        assert!(!timers.due(Channel::Ingest, now_ms));
        assert!(!timers.due(Channel::Broker, now_ms));
    }

    #[test]
    fn backend_reachability_tracks_ingest_window() {
        let mut timers = DispatchTimers::new();
        assert!(!timers.backend_reachable(0));

        timers.record_success(Channel::Ingest, 10_000);
        assert!(timers.backend_reachable(69_999));
        assert!(!timers.backend_reachable(70_000));

        // Broker successes do not count towards backend reachability.
        timers.record_success(Channel::Broker, 80_000);
        assert!(!timers.backend_reachable(80_000));
    }

    #[test]
    fn broker_payload_is_compact_one_decimal_json() {
        assert_eq!(
            broker_payload(&snapshot()),
            "{\"temp\":25.0,\"hum\":50.0,\"light\":60.0,\"sound\":30.0,\"motion\":false}"
        );

        let mut moving = snapshot();
        moving.motion = true;
        moving.temp_c = 25.67;
        assert_eq!(
            broker_payload(&moving),
            "{\"temp\":25.7,\"hum\":50.0,\"light\":60.0,\"sound\":30.0,\"motion\":true}"
        );
    }

    #[test]
    fn ingest_record_carries_snapshot_and_device() {
        let record = ingest_record(&snapshot(), "ESP32-Sensor");
        let json: serde_json::Value = serde_json::to_value(&record).unwrap();

        assert_eq!(json["temp"], 25.0);
        assert_eq!(json["hum"], 50.0);
        assert_eq!(json["light"], 60.0);
        assert_eq!(json["sound"], 30.0);
        assert_eq!(json["motion"], false);
        assert_eq!(json["timestamp"], "2026-03-02 10:00:00 WIB");
        assert_eq!(json["device"], "ESP32-Sensor");
    }
}
