use chrono::{DateTime, Utc};
use chrono_tz::Tz;

/// The node always renders WIB (UTC+7) regardless of where the clock was
/// synced from.
pub const DISPLAY_TZ: Tz = chrono_tz::Asia::Jakarta;

/// Format a UTC instant as the display/ingestion timestamp, e.g.
/// `2026-03-02 10:00:00 WIB`.
pub fn format_local(utc: DateTime<Utc>) -> String {
    utc.with_timezone(&DISPLAY_TZ)
        .format("%Y-%m-%d %H:%M:%S %Z")
        .to_string()
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn formats_in_display_timezone() {
        let utc = Utc.with_ymd_and_hms(2026, 3, 2, 3, 0, 0).unwrap();
        assert_eq!(format_local(utc), "2026-03-02 10:00:00 WIB");
    }

    #[test]
    fn epoch_formats_with_offset_applied() {
        let epoch = Utc.timestamp_opt(0, 0).unwrap();
        assert_eq!(format_local(epoch), "1970-01-01 07:00:00 WIB");
    }

    #[test]
    fn day_rolls_over_across_midnight() {
        let utc = Utc.with_ymd_and_hms(2026, 3, 2, 17, 30, 0).unwrap();
        assert_eq!(format_local(utc), "2026-03-03 00:30:00 WIB");
    }
}
