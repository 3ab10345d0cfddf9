use crate::prelude::*;

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use std::f64::consts::PI;

/// Zenith angle of the sun's upper limb at sunset, including refraction.
const SUNSET_ZENITH_DEG: f64 = 90.833;

/// Sunset times for a fixed location (NOAA approximation, good to about a
/// minute at moderate latitudes).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SunPosition {
    latitude: f64,
    longitude: f64,
}

impl SunPosition {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// `None` during polar day or night.
    pub fn sunset_utc(&self, date: NaiveDate) -> Option<DateTime<Utc>> {
        let gamma = 2.0 * PI / 365.0 * (date.ordinal() as f64 - 1.0 + 0.5);

        let eqtime = 229.18
            * (0.000075 + 0.001868 * gamma.cos()
                - 0.032077 * gamma.sin()
                - 0.014615 * (2.0 * gamma).cos()
                - 0.040849 * (2.0 * gamma).sin());

        let decl = 0.006918 - 0.399912 * gamma.cos() + 0.070257 * gamma.sin()
            - 0.006758 * (2.0 * gamma).cos()
            + 0.000907 * (2.0 * gamma).sin()
            - 0.002697 * (3.0 * gamma).cos()
            + 0.00148 * (3.0 * gamma).sin();

        let lat = self.latitude.to_radians();
        let cos_ha = SUNSET_ZENITH_DEG.to_radians().cos() / (lat.cos() * decl.cos())
            - lat.tan() * decl.tan();
        if !(-1.0..=1.0).contains(&cos_ha) {
            return None;
        }
        let ha = cos_ha.acos().to_degrees();

        let minutes = 720.0 - 4.0 * (self.longitude - ha) - eqtime;
        let midnight = Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?);
        Some(midnight + chrono::Duration::seconds((minutes * 60.0).round() as i64))
    }

    /// Calendar date at this longitude in local mean solar time.
    pub fn solar_date(&self, now: DateTime<Utc>) -> NaiveDate {
        let offset = chrono::Duration::seconds((self.longitude * 240.0).round() as i64);
        (now + offset).date_naive()
    }

    /// Minutes from `now` until today's sunset, 0 once the sun has set.
    /// "Today" is the local solar day, not the UTC one.
    pub fn minutes_to_sunset(&self, now: DateTime<Utc>) -> Option<i32> {
        let sunset = self.sunset_utc(self.solar_date(now))?;
        let minutes = (sunset - now).num_minutes().max(0);
        debug!("sunset at {}, {} minutes from now", sunset, minutes);
        Some(minutes as i32)
    }
}
