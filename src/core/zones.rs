//! Heart rate zones and heart-rate based energy estimates.

use serde::{Deserialize, Serialize};

/// Number of training zones.
pub const ZONE_COUNT: usize = 5;

/// Age substituted into the calorie formulas when none is configured.
const DEFAULT_AGE_YEARS: f64 = 30.0;

/// Zone boundaries supplied by the caller.
///
/// `upper_bounds[i]` is the highest heart rate (inclusive) that still belongs
/// to zone `i + 1`. Anything above the last bound is zone 5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneConfig {
    pub upper_bounds: [u16; ZONE_COUNT - 1],
}

impl Default for ZoneConfig {
    fn default() -> Self {
        Self {
            upper_bounds: [90, 120, 150, 170],
        }
    }
}

impl ZoneConfig {
    pub fn new(upper_bounds: [u16; ZONE_COUNT - 1]) -> Self {
        Self { upper_bounds }
    }

    /// Zones at 60, 70, 80 and 90 percent of a maximum heart rate.
    ///
    /// A reading belongs to a lower zone only while it is strictly below the
    /// percentage boundary.
    pub fn from_max_heart_rate(max_heart_rate: u16) -> Self {
        let max = u32::from(max_heart_rate);
        let bound = |pct: u32| -> u16 {
            // smallest integer >= max * pct / 100, minus one
            let first_in_next = (max * pct + 99) / 100;
            first_in_next.saturating_sub(1) as u16
        };
        Self {
            upper_bounds: [bound(60), bound(70), bound(80), bound(90)],
        }
    }

    /// Zone (1-5) that a heart rate falls into.
    pub fn zone_for(&self, heart_rate_bpm: u16) -> u8 {
        self.upper_bounds
            .iter()
            .position(|&upper| heart_rate_bpm <= upper)
            .map(|i| i as u8 + 1)
            .unwrap_or(ZONE_COUNT as u8)
    }

    /// Inclusive BPM range covered by a zone, `None` for zones outside 1-5.
    pub fn range_of(&self, zone: u8) -> Option<(u16, u16)> {
        let index = usize::from(zone).checked_sub(1)?;
        if index >= ZONE_COUNT {
            return None;
        }
        let low = if index == 0 {
            0
        } else {
            self.upper_bounds[index - 1].saturating_add(1)
        };
        let high = self
            .upper_bounds
            .get(index)
            .copied()
            .unwrap_or(u16::MAX);
        Some((low, high))
    }
}

/// Age-predicted maximum heart rate.
pub fn max_heart_rate_for_age(age_years: u8) -> u16 {
    220u16.saturating_sub(u16::from(age_years))
}

/// Biological sex used to pick a calorie formula.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sex {
    Male,
    Female,
}

/// Physical profile for calorie estimates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BodyProfile {
    pub weight_kg: f32,
    #[serde(default)]
    pub sex: Option<Sex>,
    #[serde(default)]
    pub age_years: Option<u8>,
}

impl Default for BodyProfile {
    fn default() -> Self {
        Self {
            weight_kg: 70.0,
            sex: None,
            age_years: None,
        }
    }
}

/// Estimate kilocalories burned from an average heart rate and duration.
///
/// Sex-specific regressions are used when the sex is known, a generic one
/// otherwise. The per-minute rate never drops below 1 kcal. Callers pass
/// whole minutes, so anything under half a minute of activity yields 0.
pub fn estimate_calories(average_hr: f64, profile: &BodyProfile, duration_minutes: u32) -> u32 {
    let hr = average_hr;
    let weight = f64::from(profile.weight_kg);
    let age = profile
        .age_years
        .map(f64::from)
        .unwrap_or(DEFAULT_AGE_YEARS);

    let mut per_minute = match profile.sex {
        Some(Sex::Male) => (0.6309 * hr + 0.1988 * weight + 0.2017 * age - 55.0969) / 4.184,
        Some(Sex::Female) => (0.4472 * hr + 0.1263 * weight + 0.074 * age - 20.4022) / 4.184,
        None => (0.55 * hr + 0.16 * weight - 30.0) / 4.184,
    };
    if per_minute <= 0.0 {
        per_minute = 1.0;
    }

    (per_minute * f64::from(duration_minutes)).round() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_zone_lookup() {
        let zones = ZoneConfig::default();
        assert_eq!(zones.zone_for(0), 1);
        assert_eq!(zones.zone_for(90), 1);
        assert_eq!(zones.zone_for(91), 2);
        assert_eq!(zones.zone_for(150), 3);
        assert_eq!(zones.zone_for(170), 4);
        assert_eq!(zones.zone_for(171), 5);
        assert_eq!(zones.zone_for(250), 5);
    }

    #[test]
    fn test_zones_from_max_heart_rate() {
        let zones = ZoneConfig::from_max_heart_rate(190);
        // 60% of 190 = 114, 70% = 133, 80% = 152, 90% = 171
        assert_eq!(zones.upper_bounds, [113, 132, 151, 170]);
        assert_eq!(zones.zone_for(113), 1);
        assert_eq!(zones.zone_for(114), 2);
        assert_eq!(zones.zone_for(171), 5);

        // 60% of 185 = 111
        let zones = ZoneConfig::from_max_heart_rate(185);
        assert_eq!(zones.upper_bounds[0], 110);
    }

    #[test]
    fn test_zone_ranges() {
        let zones = ZoneConfig::default();
        assert_eq!(zones.range_of(1), Some((0, 90)));
        assert_eq!(zones.range_of(2), Some((91, 120)));
        assert_eq!(zones.range_of(5), Some((171, u16::MAX)));
        assert_eq!(zones.range_of(0), None);
        assert_eq!(zones.range_of(6), None);
    }

    #[test]
    fn test_max_heart_rate_for_age() {
        assert_eq!(max_heart_rate_for_age(30), 190);
        assert_eq!(max_heart_rate_for_age(250), 0);
    }

    #[test]
    fn test_calorie_formulas() {
        let generic = BodyProfile::default();
        // (0.55*140 + 0.16*70 - 30) / 4.184 = 13.910 per minute
        assert_eq!(estimate_calories(140.0, &generic, 30), 417);

        let male = BodyProfile {
            weight_kg: 80.0,
            sex: Some(Sex::Male),
            age_years: None,
        };
        // (0.6309*150 + 0.1988*80 + 0.2017*30 - 55.0969) / 4.184 = 14.697
        assert_eq!(estimate_calories(150.0, &male, 10), 147);
    }

    #[test]
    fn test_calories_floor_at_one_per_minute() {
        let profile = BodyProfile::default();
        assert_eq!(estimate_calories(20.0, &profile, 12), 12);
        assert_eq!(estimate_calories(140.0, &profile, 0), 0);
    }
}
