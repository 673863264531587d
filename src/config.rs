// Copyright 2024 by the timetabler authors
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use this file except in compliance with
// the License. You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied. See the License for the
// specific language governing permissions and limitations under the License.

//! Run configuration, loaded from a single JSON object.
//!
//! Besides deserialization this module owns the derived slot geometry: day spans, the number of
//! fixed-width slots per day (the last scheduling day may end earlier) and the conversion of
//! hour-based limits and per-hour penalty weights into slot units.

use serde::Deserialize;

use crate::error::SchedulerError;

/// Lock mode applied to the Pass-1 structural outcome when building the Pass-2 model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LockMode {
    /// Pin every structural slack variable to its Pass-1 value
    #[default]
    Exact,
    /// Only bound the structural sum by the Pass-1 objective value
    Limit,
}

/// Penalty weights for the Pass-2 objective. Per-hour weights are converted to per-slot weights
/// via [Config::per_slot_weight] before entering the objective.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", deny_unknown_fields)]
pub struct ConstraintPenalties {
    pub faculty_overload_per_minute: i64,
    pub room_overcapacity_per_student: i64,
    pub section_overfill_per_student: i64,
    pub section_underfill_per_student: i64,
    /// Weight of the older gen-ed report section; parsed for config compatibility
    #[serde(default)]
    pub gened_under_minimum_per_student: i64,
    /// Weight of the retired excess-continuous report section; parsed for config compatibility
    #[serde(default)]
    pub excess_continuous_class_per_hour: i64,
    pub under_minimum_block_per_hour: i64,
    pub excess_gap_per_hour: i64,
    /// Weight of the retired forward-offset gap report section; parsed for config compatibility
    #[serde(default)]
    pub underfill_gap_per_hour: i64,
    pub non_preferred_subject_per_section: i64,
    pub day_gap_penalty: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct Config {
    /// Ordered list of day labels, e.g. ["MON", ..., "FRI"]
    pub scheduling_days: Vec<String>,
    /// Minutes from midnight at which every scheduling day starts
    pub day_start_minutes: u32,
    /// Minutes from midnight at which all days but the last end
    pub day_end_minutes: u32,
    /// End of the last-indexed scheduling day
    pub friday_end_minutes: u32,
    /// Slot width G in minutes; 10 or 30
    pub time_granularity_minutes: u32,
    pub lecture_unit_to_hours: f64,
    pub lab_unit_to_hours: f64,
    pub max_continuous_class_hours: f64,
    pub min_continuous_class_hours: f64,
    pub max_gap_hours: f64,
    pub min_gap_hours: f64,
    /// Student thresholds consumed by the report formatter only
    #[serde(default = "default_max_students")]
    pub max_students_gened: u32,
    #[serde(default = "default_min_students")]
    pub min_students_gened: u32,
    #[serde(default = "default_max_students")]
    pub max_students_ccism: u32,
    #[serde(rename = "ConstraintPenalties")]
    pub penalties: ConstraintPenalties,
    #[serde(default, rename = "PASS2_LOCK_MODE")]
    pub pass2_lock_mode: LockMode,
    #[serde(default)]
    pub filter_infeasible_subjects: bool,
    /// Optional symmetry break: pack used sections of a subject to the front
    #[serde(default)]
    pub symmetry_breaking: bool,
}

fn default_max_students() -> u32 {
    40
}

fn default_min_students() -> u32 {
    20
}

impl Config {
    /// Load and validate the configuration from a JSON reader
    pub fn from_reader<R: std::io::Read>(reader: R) -> Result<Config, SchedulerError> {
        let config: Config = serde_json::from_reader(reader)
            .map_err(|e| SchedulerError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &std::path::Path) -> Result<Config, SchedulerError> {
        let file = std::fs::File::open(path).map_err(|e| {
            SchedulerError::Config(format!("could not open {}: {}", path.display(), e))
        })?;
        Config::from_reader(file)
    }

    fn validate(&self) -> Result<(), SchedulerError> {
        if self.scheduling_days.is_empty() {
            return Err(SchedulerError::Config(
                "SCHEDULING_DAYS must not be empty".into(),
            ));
        }
        if self.time_granularity_minutes != 10 && self.time_granularity_minutes != 30 {
            return Err(SchedulerError::Config(format!(
                "TIME_GRANULARITY_MINUTES must be 10 or 30, got {}",
                self.time_granularity_minutes
            )));
        }
        if self.day_start_minutes >= self.day_end_minutes
            || self.day_start_minutes >= self.friday_end_minutes
        {
            return Err(SchedulerError::Config(
                "day start must lie before both day ends".into(),
            ));
        }
        Ok(())
    }

    pub fn num_days(&self) -> usize {
        self.scheduling_days.len()
    }

    /// End of the given day in minutes from midnight; the last-indexed day uses the earlier
    /// Friday end
    pub fn day_end(&self, day_idx: usize) -> u32 {
        if day_idx + 1 == self.num_days() {
            self.friday_end_minutes
        } else {
            self.day_end_minutes
        }
    }

    pub fn day_span_minutes(&self, day_idx: usize) -> u32 {
        self.day_end(day_idx) - self.day_start_minutes
    }

    /// Number of fixed-width slots on the given day
    pub fn slots_for_day(&self, day_idx: usize) -> usize {
        (self.day_span_minutes(day_idx) / self.time_granularity_minutes) as usize
    }

    pub fn slots_per_hour(&self) -> i64 {
        60 / self.time_granularity_minutes as i64
    }

    /// Convert an hour-based limit into a slot count
    pub fn hours_to_slots(&self, hours: f64) -> i64 {
        ((hours * 60.0) / self.time_granularity_minutes as f64) as i64
    }

    pub fn max_class_slots(&self) -> i64 {
        self.hours_to_slots(self.max_continuous_class_hours)
    }

    pub fn min_class_slots(&self) -> i64 {
        self.hours_to_slots(self.min_continuous_class_hours)
    }

    pub fn max_gap_slots(&self) -> i64 {
        self.hours_to_slots(self.max_gap_hours)
    }

    pub fn min_gap_slots(&self) -> i64 {
        self.hours_to_slots(self.min_gap_hours)
    }

    /// Convert a per-hour penalty weight into the per-slot weight used in the objective
    pub fn per_slot_weight(&self, per_hour: i64) -> i64 {
        per_hour * self.time_granularity_minutes as i64 / 60
    }

    /// Weekly contact minutes for a subject's unit counts
    pub fn weekly_minutes(&self, lecture_units: f64, lab_units: f64) -> u32 {
        ((lecture_units * self.lecture_unit_to_hours + lab_units * self.lab_unit_to_hours) * 60.0)
            as u32
    }
}

/// A complete configuration used by unit tests across the crate
#[cfg(test)]
pub(crate) const SAMPLE_CONFIG: &str = r#"{
        "SCHEDULING_DAYS": ["MON", "TUE", "WED", "THU", "FRI"],
        "DAY_START_MINUTES": 480,
        "DAY_END_MINUTES": 1020,
        "FRIDAY_END_MINUTES": 900,
        "TIME_GRANULARITY_MINUTES": 10,
        "LECTURE_UNIT_TO_HOURS": 1.0,
        "LAB_UNIT_TO_HOURS": 3.0,
        "MAX_CONTINUOUS_CLASS_HOURS": 3.0,
        "MIN_CONTINUOUS_CLASS_HOURS": 1.0,
        "MAX_GAP_HOURS": 2.0,
        "MIN_GAP_HOURS": 0.5,
        "ConstraintPenalties": {
            "FACULTY_OVERLOAD_PER_MINUTE": 10,
            "ROOM_OVERCAPACITY_PER_STUDENT": 50,
            "SECTION_OVERFILL_PER_STUDENT": 25,
            "SECTION_UNDERFILL_PER_STUDENT": 15,
            "UNDER_MINIMUM_BLOCK_PER_HOUR": 60,
            "EXCESS_GAP_PER_HOUR": 60,
            "NON_PREFERRED_SUBJECT_PER_SECTION": 100,
            "DAY_GAP_PENALTY": 200
        },
        "PASS2_LOCK_MODE": "exact",
        "FILTER_INFEASIBLE_SUBJECTS": true
    }"#;

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = super::SAMPLE_CONFIG;

    #[test]
    fn parses_sample_config() {
        let config = Config::from_reader(SAMPLE.as_bytes()).unwrap();
        assert_eq!(config.num_days(), 5);
        assert_eq!(config.day_end(0), 1020);
        assert_eq!(config.day_end(4), 900);
        assert_eq!(config.slots_for_day(0), 54);
        assert_eq!(config.slots_for_day(4), 42);
        assert_eq!(config.max_class_slots(), 18);
        assert_eq!(config.min_gap_slots(), 3);
        assert_eq!(config.pass2_lock_mode, LockMode::Exact);
        assert!(config.filter_infeasible_subjects);
    }

    #[test]
    fn rejects_unsupported_granularity() {
        let raw = SAMPLE.replace(
            "\"TIME_GRANULARITY_MINUTES\": 10",
            "\"TIME_GRANULARITY_MINUTES\": 15",
        );
        assert!(Config::from_reader(raw.as_bytes()).is_err());
    }

    #[test]
    fn per_slot_weight_divides_per_hour() {
        let config = Config::from_reader(SAMPLE.as_bytes()).unwrap();
        // 60 per hour at 10-minute slots = 10 per slot
        assert_eq!(config.per_slot_weight(60), 10);
    }

    #[test]
    fn weekly_minutes_from_units() {
        let config = Config::from_reader(SAMPLE.as_bytes()).unwrap();
        assert_eq!(config.weekly_minutes(2.0, 0.0), 120);
        assert_eq!(config.weekly_minutes(2.0, 1.0), 300);
    }
}
