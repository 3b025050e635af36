use crate::types::SensorSnapshot;

/// Render model for the 128x64 status screen: a status line split into two
/// fields, five data rows and a timestamp row. Kept free of pixel concerns
/// so the layout is testable off-device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusScreen {
    pub wifi: String,
    pub db: String,
    pub rows: [String; 5],
    pub timestamp: String,
}

impl StatusScreen {
    pub fn build(snapshot: &SensorSnapshot, wifi_on: bool, db_ok: bool) -> Self {
        Self {
            wifi: format!("WiFi: {}", if wifi_on { "ON" } else { "OFF" }),
            db: format!("DB: {}", if db_ok { "OK" } else { "ERR" }),
            rows: [
                format!("Temp  : {:.1}C", snapshot.temp_c),
                format!("Humi  : {:.1}%", snapshot.humidity),
                format!("Light : {:.0}%", snapshot.light_pct),
                format!("Sound : {:.0}%", snapshot.sound_pct),
                format!("Motion: {}", if snapshot.motion { "YES" } else { "NO" }),
            ],
            timestamp: snapshot.timestamp.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn renders_all_rows() {
        let snapshot = SensorSnapshot {
            temp_c: 25.04,
            humidity: 50.0,
            light_pct: 60.4,
            sound_pct: 30.0,
            motion: true,
            timestamp: "2026-03-02 10:00:00 WIB".to_string(),
        };

        let screen = StatusScreen::build(&snapshot, true, true);

        assert_eq!(screen.wifi, "WiFi: ON");
        assert_eq!(screen.db, "DB: OK");
        assert_eq!(
            screen.rows,
            [
                "Temp  : 25.0C".to_string(),
                "Humi  : 50.0%".to_string(),
                "Light : 60%".to_string(),
                "Sound : 30%".to_string(),
                "Motion: YES".to_string(),
            ]
        );
        assert_eq!(screen.timestamp, "2026-03-02 10:00:00 WIB");
    }

    #[test]
    fn offline_status_reads_off_and_err() {
        let screen = StatusScreen::build(&SensorSnapshot::default(), false, false);

        assert_eq!(screen.wifi, "WiFi: OFF");
        assert_eq!(screen.db, "DB: ERR");
        assert_eq!(screen.rows[4], "Motion: NO");
    }
}
