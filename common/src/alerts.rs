pub const MOTION_DEBOUNCE_MS: u64 = 3_000;
pub const LOW_LIGHT_THRESHOLD_PCT: f32 = 15.0;
pub const BUZZER_PULSE_MS: u64 = 500;

/// Physical outputs requested by one alert evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertAction {
    MotionLed(bool),
    LightLed(bool),
    BuzzerPulse,
}

/// Debounced motion alert plus an undebounced low-light alert.
///
/// Motion is edge-triggered and time-gated: rapid repeated motion inside
/// the debounce window produces exactly one pulse. Low light is a level
/// check re-evaluated every cycle with no debounce; the asymmetry is
/// intentional.
#[derive(Debug, Default)]
pub struct AlertEngine {
    last_motion_trigger_ms: Option<u64>,
}

impl AlertEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tick(&mut self, motion: bool, light_pct: f32, now_ms: u64) -> Vec<AlertAction> {
        let mut actions = Vec::new();

        let rearmed = self
            .last_motion_trigger_ms
            .map(|last| now_ms.saturating_sub(last) > MOTION_DEBOUNCE_MS)
            .unwrap_or(true);

        if motion && rearmed {
            self.last_motion_trigger_ms = Some(now_ms);
            actions.push(AlertAction::MotionLed(true));
            actions.push(AlertAction::BuzzerPulse);
        } else {
            actions.push(AlertAction::MotionLed(false));
        }

        if light_pct < LOW_LIGHT_THRESHOLD_PCT {
            actions.push(AlertAction::LightLed(true));
            actions.push(AlertAction::BuzzerPulse);
        } else {
            actions.push(AlertAction::LightLed(false));
        }

        actions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pulses(actions: &[AlertAction]) -> usize {
        actions
            .iter()
            .filter(|action| **action == AlertAction::BuzzerPulse)
            .count()
    }

    #[test]
    fn first_motion_always_pulses() {
        let mut engine = AlertEngine::new();
        let actions = engine.tick(true, 80.0, 100);

        assert!(actions.contains(&AlertAction::MotionLed(true)));
        assert_eq!(pulses(&actions), 1);
    }

    #[test]
    fn motion_inside_debounce_window_pulses_once() {
        let mut engine = AlertEngine::new();
        let first = engine.tick(true, 80.0, 1_000);
        let second = engine.tick(true, 80.0, 2_500);

        assert_eq!(pulses(&first), 1);
        assert_eq!(pulses(&second), 0);
        assert!(second.contains(&AlertAction::MotionLed(false)));
    }

    #[test]
    fn motion_after_debounce_window_pulses_again() {
        let mut engine = AlertEngine::new();
        engine.tick(true, 80.0, 1_000);

        // Exactly at the window boundary is still suppressed.
        assert_eq!(pulses(&engine.tick(true, 80.0, 4_000)), 0);
        assert_eq!(pulses(&engine.tick(true, 80.0, 4_001)), 1);
    }

    #[test]
    fn suppressed_motion_does_not_reset_the_window() {
        let mut engine = AlertEngine::new();
        engine.tick(true, 80.0, 1_000);
        engine.tick(true, 80.0, 3_000);

        // Window counts from the first trigger, not the suppressed one.
        assert_eq!(pulses(&engine.tick(true, 80.0, 4_100)), 1);
    }

    #[test]
    fn low_light_threshold_is_strict() {
        let mut engine = AlertEngine::new();

        let at_threshold = engine.tick(false, 15.0, 100);
        assert!(at_threshold.contains(&AlertAction::LightLed(false)));
        assert_eq!(pulses(&at_threshold), 0);

        let below = engine.tick(false, 14.9, 200);
        assert!(below.contains(&AlertAction::LightLed(true)));
        assert_eq!(pulses(&below), 1);
    }

    #[test]
    fn low_light_has_no_debounce() {
        let mut engine = AlertEngine::new();

        assert_eq!(pulses(&engine.tick(false, 10.0, 100)), 1);
        assert_eq!(pulses(&engine.tick(false, 10.0, 200)), 1);
        assert_eq!(pulses(&engine.tick(false, 20.0, 300)), 0);
    }

    #[test]
    fn motion_and_darkness_each_pulse() {
        let mut engine = AlertEngine::new();
        let actions = engine.tick(true, 5.0, 100);

        assert!(actions.contains(&AlertAction::MotionLed(true)));
        assert!(actions.contains(&AlertAction::LightLed(true)));
        assert_eq!(pulses(&actions), 2);
    }
}
