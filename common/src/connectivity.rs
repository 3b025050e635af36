use crate::config::WifiCredentials;
use crate::types::ConnectivityState;

/// Cadence of the background link watchdog.
pub const LINK_POLL_INTERVAL_MS: u64 = 1_000;
/// Forced clock resync interval while the link stays up.
pub const CLOCK_RESYNC_INTERVAL_MS: u64 = 3_600_000;

/// What to do at startup / reconnect given the persisted credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectAttempt {
    /// No usable credentials: skip association entirely and provision.
    StartProvisioning,
    TryStation { ssid: String, password: String },
}

pub fn connect_decision(credentials: &WifiCredentials) -> ConnectAttempt {
    if credentials.is_provisioned() {
        ConnectAttempt::TryStation {
            ssid: credentials.ssid.clone(),
            password: credentials.password.clone(),
        }
    } else {
        ConnectAttempt::StartProvisioning
    }
}

/// Side effects the device layer must apply after a watchdog evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// Link indicator on.
    LinkUp,
    /// Link indicator off. Credentials stay untouched.
    LinkDown,
    /// (Re)trigger a network time sync.
    ResyncClock,
    /// Telemetry sessions must be rebuilt before the next send.
    ReinitChannels,
}

/// Connectivity state machine fed by the 1 Hz background watchdog. Single
/// writer for `ConnectivityState`; other components read the current state
/// at the top of each use instead of caching it across a cycle.
#[derive(Debug, Default)]
pub struct LinkWatchdog {
    state: ConnectivityState,
    ssid: String,
    last_clock_sync_ms: Option<u64>,
}

impl LinkWatchdog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &ConnectivityState {
        &self.state
    }

    /// Association is about to be attempted against `ssid`.
    pub fn begin_connecting(&mut self, ssid: &str) {
        self.ssid = ssid.to_string();
        self.state = ConnectivityState::Connecting;
    }

    /// Association and interface bring-up succeeded.
    pub fn connection_established(&mut self, now_ms: u64) -> Vec<LinkEvent> {
        self.state = ConnectivityState::Connected {
            ssid: self.ssid.clone(),
        };
        self.last_clock_sync_ms = Some(now_ms);
        vec![
            LinkEvent::LinkUp,
            LinkEvent::ReinitChannels,
            LinkEvent::ResyncClock,
        ]
    }

    /// Association failed or credentials were absent; the provisioning
    /// server owns the network stack until the next restart.
    pub fn enter_provisioning(&mut self) {
        self.state = ConnectivityState::ProvisioningActive;
    }

    /// One watchdog evaluation. `link_up` is the instantaneous association
    /// status reported by the interface.
    pub fn observe_link(&mut self, link_up: bool, now_ms: u64) -> Vec<LinkEvent> {
        match &self.state {
            ConnectivityState::Connected { .. } if !link_up => {
                self.state = ConnectivityState::Disconnected;
                vec![LinkEvent::LinkDown]
            }
            ConnectivityState::Connected { .. } => {
                let resync_due = self
                    .last_clock_sync_ms
                    .map(|last| now_ms.saturating_sub(last) >= CLOCK_RESYNC_INTERVAL_MS)
                    .unwrap_or(true);
                if resync_due {
                    self.last_clock_sync_ms = Some(now_ms);
                    vec![LinkEvent::ResyncClock]
                } else {
                    Vec::new()
                }
            }
            ConnectivityState::Disconnected if link_up => self.connection_established(now_ms),
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_credentials_go_straight_to_provisioning() {
        let credentials = WifiCredentials::default();
        assert_eq!(
            connect_decision(&credentials),
            ConnectAttempt::StartProvisioning
        );
    }

    #[test]
    fn provisioned_credentials_attempt_station_mode() {
        let credentials = WifiCredentials {
            ssid: "Lab1".to_string(),
            password: "secret123".to_string(),
        };
        assert_eq!(
            connect_decision(&credentials),
            ConnectAttempt::TryStation {
                ssid: "Lab1".to_string(),
                password: "secret123".to_string(),
            }
        );
    }

    #[test]
    fn successful_connect_reinitializes_channels_and_clock() {
        let mut watchdog = LinkWatchdog::new();
        watchdog.begin_connecting("Lab1");
        assert_eq!(*watchdog.state(), ConnectivityState::Connecting);

        let events = watchdog.connection_established(1_000);

        assert!(watchdog.state().is_connected());
        assert!(events.contains(&LinkEvent::LinkUp));
        assert!(events.contains(&LinkEvent::ReinitChannels));
        assert!(events.contains(&LinkEvent::ResyncClock));
    }

    #[test]
    fn lost_link_disables_indicator_without_reprovisioning() {
        let mut watchdog = LinkWatchdog::new();
        watchdog.begin_connecting("Lab1");
        watchdog.connection_established(1_000);

        let events = watchdog.observe_link(false, 5_000);

        assert_eq!(*watchdog.state(), ConnectivityState::Disconnected);
        assert_eq!(events, vec![LinkEvent::LinkDown]);
    }

    #[test]
    fn regained_link_restores_services() {
        let mut watchdog = LinkWatchdog::new();
        watchdog.begin_connecting("Lab1");
        watchdog.connection_established(1_000);
        watchdog.observe_link(false, 5_000);

        let events = watchdog.observe_link(true, 9_000);

        assert!(watchdog.state().is_connected());
        assert!(events.contains(&LinkEvent::LinkUp));
        assert!(events.contains(&LinkEvent::ReinitChannels));
        assert!(events.contains(&LinkEvent::ResyncClock));
    }

    #[test]
    fn hourly_resync_fires_while_connected() {
        let mut watchdog = LinkWatchdog::new();
        watchdog.begin_connecting("Lab1");
        watchdog.connection_established(0);

        assert!(watchdog.observe_link(true, CLOCK_RESYNC_INTERVAL_MS - 1).is_empty());
        assert_eq!(
            watchdog.observe_link(true, CLOCK_RESYNC_INTERVAL_MS),
            vec![LinkEvent::ResyncClock]
        );
        // The stamp advanced; the next resync is another full hour out.
        assert!(watchdog
            .observe_link(true, CLOCK_RESYNC_INTERVAL_MS + 1_000)
            .is_empty());
    }

    #[test]
    fn provisioning_state_suspends_link_tracking() {
        let mut watchdog = LinkWatchdog::new();
        watchdog.enter_provisioning();

        assert_eq!(*watchdog.state(), ConnectivityState::ProvisioningActive);
        assert!(watchdog.observe_link(true, 1_000).is_empty());
        assert!(watchdog.observe_link(false, 2_000).is_empty());
    }
}
