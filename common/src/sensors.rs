use crate::types::SensorSnapshot;

pub const LIGHT_RAW_MIN: u16 = 0;
pub const LIGHT_RAW_MAX: u16 = 4095;
pub const SOUND_RAW_MIN: u16 = 200;
pub const SOUND_RAW_MAX: u16 = 3500;

/// Combined temperature/humidity reading from the climate sensor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClimateReading {
    pub temp_c: f32,
    pub humidity: f32,
}

/// Raw values gathered in one acquisition pass. A `None` channel means the
/// read failed this cycle and the last good value must be carried over.
/// Motion is a plain digital level; absence of signal is itself valid data.
#[derive(Debug, Clone, Copy)]
pub struct RawSample {
    pub climate: Option<ClimateReading>,
    pub light_raw: Option<u16>,
    pub sound_raw: Option<u16>,
    pub motion: bool,
}

/// Clamp `raw` into `[min, max]`, map linearly to 0-100 and round to one
/// decimal.
pub fn scale_to_percent(raw: u16, min: u16, max: u16) -> f32 {
    let clamped = raw.clamp(min, max);
    let pct = f32::from(clamped - min) / f32::from(max - min) * 100.0;
    (pct * 10.0).round() / 10.0
}

/// Build the next snapshot from one acquisition pass. A failed climate read
/// carries temperature and humidity over from `last_good` unchanged rather
/// than reporting zeros, so display and dispatch never see spurious drops;
/// the analog channels degrade the same way.
pub fn build_snapshot(
    sample: &RawSample,
    last_good: &SensorSnapshot,
    timestamp: String,
) -> SensorSnapshot {
    let (temp_c, humidity) = match sample.climate {
        Some(climate) => (climate.temp_c, climate.humidity),
        None => (last_good.temp_c, last_good.humidity),
    };

    SensorSnapshot {
        temp_c,
        humidity,
        light_pct: sample
            .light_raw
            .map(|raw| scale_to_percent(raw, LIGHT_RAW_MIN, LIGHT_RAW_MAX))
            .unwrap_or(last_good.light_pct),
        sound_pct: sample
            .sound_raw
            .map(|raw| scale_to_percent(raw, SOUND_RAW_MIN, SOUND_RAW_MAX))
            .unwrap_or(last_good.sound_pct),
        motion: sample.motion,
        timestamp,
    }
}
