/// One committed acquisition cycle. The most recent instance doubles as the
/// "last known good" fallback for display and dispatch when a fresh read
/// fails.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorSnapshot {
    pub temp_c: f32,
    pub humidity: f32,
    pub light_pct: f32,
    pub sound_pct: f32,
    pub motion: bool,
    pub timestamp: String,
}

impl Default for SensorSnapshot {
    fn default() -> Self {
        Self {
            temp_c: 0.0,
            humidity: 0.0,
            light_pct: 0.0,
            sound_pct: 0.0,
            motion: false,
            timestamp: "1970-01-01 00:00:00 WIB".to_string(),
        }
    }
}

/// WiFi association lifecycle. Exactly one state holds at any time; the
/// link watchdog is the only writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectivityState {
    Disconnected,
    Connecting,
    Connected { ssid: String },
    ProvisioningActive,
}

impl Default for ConnectivityState {
    fn default() -> Self {
        Self::Disconnected
    }
}

impl ConnectivityState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "DISCONNECTED",
            Self::Connecting => "CONNECTING",
            Self::Connected { .. } => "CONNECTED",
            Self::ProvisioningActive => "PROVISIONING",
        }
    }
}
