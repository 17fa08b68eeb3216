use std::time::{SystemTime, UNIX_EPOCH};

pub const SECONDS_PER_DAY: f64 = 86_400.0;
pub const J2000_JULIAN_DAY: f64 = 2_451_545.0;
const UNIX_EPOCH_JULIAN_DAY: f64 = 2_440_587.5;

/// Continuous Julian day number. Leap seconds are not modelled.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct JulianDate(pub f64);

impl JulianDate {
    pub const J2000: JulianDate = JulianDate(J2000_JULIAN_DAY);

    pub fn from_unix_seconds(seconds: f64) -> Self {
        Self(UNIX_EPOCH_JULIAN_DAY + seconds / SECONDS_PER_DAY)
    }

    pub fn now() -> Self {
        let seconds = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs_f64())
            .unwrap_or(0.0);
        Self::from_unix_seconds(seconds)
    }

    pub fn day_number(self) -> f64 {
        self.0
    }

    pub fn days_since_j2000(self) -> f64 {
        self.0 - J2000_JULIAN_DAY
    }

    pub fn julian_centuries_since_j2000(self) -> f64 {
        self.days_since_j2000() / 36_525.0
    }

    pub fn add_seconds(self, seconds: f64) -> Self {
        Self(self.0 + seconds / SECONDS_PER_DAY)
    }
}
