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

//! Weekly university timetable construction.
//!
//! The crate assigns every course section a qualified faculty member, a compatible room, a set of
//! student batches and per-day meetings covering the subject's weekly contact minutes. The
//! assignment is computed by a CP-SAT model solved in two lexicographic passes: Pass 1 proves the
//! minimal number of unavoidable structural violations (unassigned resources, unmet durations,
//! day gaps), Pass 2 minimizes preference penalties without regressing that minimum.

pub mod config;
pub mod error;
pub mod io;
pub mod prefilter;
pub mod solver;

use std::collections::BTreeSet;

/// Lookup entry for a kind of room (from `room_types.csv`)
#[derive(Debug, Clone, PartialEq)]
pub struct RoomType {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
}

/// Lookup entry for a kind of subject (from `subject_types.csv`). A name containing "lab"
/// (case-insensitive) marks the type as a laboratory type.
#[derive(Debug, Clone, PartialEq)]
pub struct SubjectType {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
}

impl SubjectType {
    pub fn is_lab(&self) -> bool {
        self.name.to_lowercase().contains("lab")
    }
}

/// A physical room with a capacity and a room type
#[derive(Debug, Clone, PartialEq)]
pub struct Room {
    /// Room code used in reports and exports
    pub room_id: String,
    pub capacity: u32,
    pub room_type_id: i64,
    /// Database row id, if the input carried one
    pub row_id: Option<i64>,
}

/// A faculty member with load bounds and subject qualifications.
///
/// Load bounds are stored in hours (the ingest layer already multiplied the raw load units by 3);
/// the solver works in minutes, see [Faculty::max_minutes] and [Faculty::min_minutes].
#[derive(Debug, Clone, PartialEq)]
pub struct Faculty {
    pub id: String,
    /// Display name. Mainly used for reports and log output
    pub name: String,
    pub max_hours: u32,
    pub min_hours: u32,
    pub qualified_subject_ids: BTreeSet<i64>,
    /// Preferred subjects, a subset of the qualified ones
    pub preferred_subject_ids: BTreeSet<i64>,
    /// Maximum number of distinct subjects this faculty may teach (linked lecture/lab pairs count
    /// once)
    pub max_subjects: Option<u32>,
    pub row_id: Option<i64>,
}

impl Faculty {
    pub fn max_minutes(&self) -> u32 {
        self.max_hours * 60
    }

    pub fn min_minutes(&self) -> u32 {
        self.min_hours * 60
    }

    /// All subjects this faculty may be assigned to (qualified ∪ preferred)
    pub fn teachable_subject_ids(&self) -> BTreeSet<i64> {
        self.qualified_subject_ids
            .union(&self.preferred_subject_ids)
            .copied()
            .collect()
    }
}

/// A subject to be scheduled, split into `ideal_num_sections` sections by the solver
#[derive(Debug, Clone, PartialEq)]
pub struct Subject {
    pub subject_id: i64,
    /// Display code, e.g. "CS 101"
    pub subject_code: String,
    pub required_weekly_minutes: u32,
    pub ideal_num_sections: u32,
    /// Batch ids that enroll this subject, filled while reading the batch table
    pub enrolling_batch_ids: Vec<String>,
    pub subject_type_id: Option<i64>,
    /// Name of the subject type, resolved from the lookup table during ingest. Lab detection is a
    /// pure function of this field and `linked_subject_id`.
    pub subject_type_name: Option<String>,
    /// A lecture/lab partner subject; the pair shares faculty, room and students and the lab
    /// directly follows the lecture
    pub linked_subject_id: Option<i64>,
    /// Required room type; `None` means any room works
    pub room_type_id: Option<i64>,
    pub max_enrollment: Option<u32>,
    pub min_enrollment: Option<u32>,
    pub min_meetings: Option<u32>,
    pub max_meetings: Option<u32>,
    pub row_id: Option<i64>,
}

impl Subject {
    /// Whether this subject is the lab side of a linked lecture/lab pair
    pub fn is_lab(&self) -> bool {
        self.linked_subject_id.is_some()
            && self
                .subject_type_name
                .as_ref()
                .map(|n| n.to_lowercase().contains("lab"))
                .unwrap_or(false)
    }

    /// Maximum section size used for splitting enrollment into sections and for the overfill
    /// tracker. Falls back to 40 students when the input does not set one.
    pub fn effective_max_enrollment(&self) -> u32 {
        match self.max_enrollment {
            Some(m) if m > 0 => m,
            _ => 40,
        }
    }

    /// Root id of the linked pair this subject belongs to. Used to count a lecture and its lab as
    /// a single subject towards a faculty's `max_subjects`.
    pub fn canonical_subject_id(&self) -> i64 {
        match self.linked_subject_id {
            Some(linked) => self.subject_id.min(linked),
            None => self.subject_id,
        }
    }
}

/// A time window during which a batch must not have class, stored as a slot range on a day
#[derive(Debug, Clone, PartialEq)]
pub struct BannedWindow {
    pub day_index: usize,
    /// First banned slot (inclusive)
    pub start_slot: usize,
    /// End of the banned range (exclusive)
    pub end_slot: usize,
}

/// A fixed meeting outside the solver's control (assemblies, org meetings, ...). No class may
/// overlap it and its minutes count as occupied time for the batch.
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalMeeting {
    pub day_index: usize,
    pub start_minutes: u32,
    pub end_minutes: u32,
    pub event_name: String,
    pub description: String,
}

impl ExternalMeeting {
    pub fn duration_minutes(&self) -> u32 {
        self.end_minutes.saturating_sub(self.start_minutes)
    }
}

/// A cohort of students that moves through the timetable together. A batch is never split across
/// sections of the same subject.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub batch_id: String,
    pub program_id: String,
    pub population: u32,
    /// Ids of the subjects this batch enrolls
    pub subject_ids: Vec<i64>,
    pub banned_windows: Vec<BannedWindow>,
    pub external_meetings: Vec<ExternalMeeting>,
    pub row_id: Option<i64>,
}

impl Batch {
    pub fn enrolls(&self, subject_id: i64) -> bool {
        self.subject_ids.contains(&subject_id)
    }
}

/// The full normalized problem input handed to the pre-filter and the solver
#[derive(Debug, Clone)]
pub struct Dataset {
    pub subjects: Vec<Subject>,
    pub rooms: Vec<Room>,
    pub faculty: Vec<Faculty>,
    pub batches: Vec<Batch>,
    pub room_types: Vec<RoomType>,
    pub subject_types: Vec<SubjectType>,
}

impl Dataset {
    pub fn subject(&self, subject_id: i64) -> Option<&Subject> {
        self.subjects.iter().find(|s| s.subject_id == subject_id)
    }
}

/// Assert that a dataset is consistent in terms of cross-referencing ids (used in debug builds
/// after ingest)
pub fn assert_data_consistency(dataset: &Dataset) {
    for sub in dataset.subjects.iter() {
        if let Some(linked) = sub.linked_subject_id {
            assert!(
                dataset.subjects.iter().any(|s| s.subject_id == linked),
                "Linked subject {} of subject {} does not exist",
                linked,
                sub.subject_id
            );
        }
        if let Some((min, max)) = sub.min_meetings.zip(sub.max_meetings) {
            assert!(
                min <= max,
                "Subject {} has min_meetings {} > max_meetings {}",
                sub.subject_id,
                min,
                max
            );
        }
    }
    for batch in dataset.batches.iter() {
        assert!(batch.population >= 1, "Batch {} has no students", batch.batch_id);
        for sid in batch.subject_ids.iter() {
            assert!(
                dataset.subjects.iter().any(|s| s.subject_id == *sid),
                "Batch {} enrolls unknown subject {}",
                batch.batch_id,
                sid
            );
        }
    }
}
