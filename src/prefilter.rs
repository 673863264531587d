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

//! Infeasibility pre-filter.
//!
//! Removes subjects that cannot be scheduled at all before any model is built and strips the
//! dangling references from batches and faculty. This is a single pass: removing a subject never
//! makes another subject unschedulable in the data this tool targets, so there is no cascade.

use std::collections::BTreeSet;
use std::fmt;

use log::{info, warn};

use crate::Dataset;

/// Why a subject was removed by the pre-filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    /// Both max_meetings and required_weekly_minutes are zero
    NoMeetings,
    /// No faculty lists the subject as qualified or preferred
    NoQualifiedFaculty,
    /// No batch enrolls the subject
    NoEnrolledBatches,
    /// The required room type is not offered by any room
    NoRoomType,
}

impl fmt::Display for RemovalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            RemovalReason::NoMeetings => "No Meetings",
            RemovalReason::NoQualifiedFaculty => "No Qualified Faculty",
            RemovalReason::NoEnrolledBatches => "No Enrolled Batches",
            RemovalReason::NoRoomType => "No Room Type",
        };
        f.write_str(text)
    }
}

/// One removed subject with every reason that applied
#[derive(Debug, Clone)]
pub struct RemovedSubject {
    pub subject_id: i64,
    pub subject_code: String,
    pub reasons: Vec<RemovalReason>,
}

impl fmt::Display for RemovedSubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reasons: Vec<String> = self.reasons.iter().map(|r| r.to_string()).collect();
        write!(
            f,
            "{} ({}): {}",
            self.subject_id,
            self.subject_code,
            reasons.join(", ")
        )
    }
}

/// Remove unschedulable subjects from the dataset in place and return the removal report.
///
/// A subject is removed if ANY of the four [RemovalReason] conditions holds. All references to
/// removed subjects are stripped from `batches` and from the faculty qualification sets.
pub fn filter_infeasible_subjects(dataset: &mut Dataset) -> Vec<RemovedSubject> {
    let available_room_types: BTreeSet<i64> =
        dataset.rooms.iter().map(|r| r.room_type_id).collect();

    let mut removed = Vec::new();
    let mut removed_ids = BTreeSet::new();

    for sub in dataset.subjects.iter() {
        let mut reasons = Vec::new();

        let has_meetings =
            sub.max_meetings.map(|m| m > 0).unwrap_or(false) || sub.required_weekly_minutes > 0;
        if !has_meetings {
            reasons.push(RemovalReason::NoMeetings);
        }

        let has_qualified_faculty = dataset.faculty.iter().any(|fac| {
            fac.qualified_subject_ids.contains(&sub.subject_id)
                || fac.preferred_subject_ids.contains(&sub.subject_id)
        });
        if !has_qualified_faculty {
            reasons.push(RemovalReason::NoQualifiedFaculty);
        }

        let has_enrolled_batch = dataset.batches.iter().any(|b| b.enrolls(sub.subject_id));
        if !has_enrolled_batch {
            reasons.push(RemovalReason::NoEnrolledBatches);
        }

        let has_compatible_room = match sub.room_type_id {
            Some(rt) => available_room_types.contains(&rt),
            None => true,
        };
        if !has_compatible_room {
            reasons.push(RemovalReason::NoRoomType);
        }

        if !reasons.is_empty() {
            warn!(
                "Removing subject {} ({}) from the problem: {}",
                sub.subject_id,
                sub.subject_code,
                reasons
                    .iter()
                    .map(|r| r.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            removed_ids.insert(sub.subject_id);
            removed.push(RemovedSubject {
                subject_id: sub.subject_id,
                subject_code: sub.subject_code.clone(),
                reasons,
            });
        }
    }

    if removed_ids.is_empty() {
        info!("Pre-filter kept all {} subjects.", dataset.subjects.len());
        return removed;
    }

    dataset
        .subjects
        .retain(|s| !removed_ids.contains(&s.subject_id));

    for batch in dataset.batches.iter_mut() {
        batch.subject_ids.retain(|sid| !removed_ids.contains(sid));
    }
    for fac in dataset.faculty.iter_mut() {
        fac.qualified_subject_ids
            .retain(|sid| !removed_ids.contains(sid));
        fac.preferred_subject_ids
            .retain(|sid| !removed_ids.contains(sid));
    }
    // Enrollment back-references on the kept subjects stay valid: only subjects were removed, not
    // batches.

    info!(
        "Pre-filter removed {} of {} subjects; {} remain.",
        removed.len(),
        removed.len() + dataset.subjects.len(),
        dataset.subjects.len()
    );
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Batch, Faculty, Room, Subject};
    use std::collections::BTreeSet;

    fn subject(id: i64, room_type: Option<i64>) -> Subject {
        Subject {
            subject_id: id,
            subject_code: format!("SUB{}", id),
            required_weekly_minutes: 180,
            ideal_num_sections: 1,
            enrolling_batch_ids: vec!["B1".into()],
            subject_type_id: None,
            subject_type_name: None,
            linked_subject_id: None,
            room_type_id: room_type,
            max_enrollment: None,
            min_enrollment: None,
            min_meetings: Some(2),
            max_meetings: Some(3),
            row_id: None,
        }
    }

    fn dataset(subjects: Vec<Subject>) -> Dataset {
        let subject_ids: Vec<i64> = subjects.iter().map(|s| s.subject_id).collect();
        Dataset {
            subjects,
            rooms: vec![Room {
                room_id: "R101".into(),
                capacity: 40,
                room_type_id: 1,
                row_id: None,
            }],
            faculty: vec![Faculty {
                id: "F1".into(),
                name: "Prof. One".into(),
                max_hours: 20,
                min_hours: 0,
                qualified_subject_ids: subject_ids.iter().copied().collect(),
                preferred_subject_ids: BTreeSet::new(),
                max_subjects: None,
                row_id: None,
            }],
            batches: vec![Batch {
                batch_id: "B1".into(),
                program_id: "P1".into(),
                population: 30,
                subject_ids,
                banned_windows: vec![],
                external_meetings: vec![],
                row_id: None,
            }],
            room_types: vec![],
            subject_types: vec![],
        }
    }

    #[test]
    fn keeps_schedulable_subjects() {
        let mut data = dataset(vec![subject(1, Some(1)), subject(2, None)]);
        let removed = filter_infeasible_subjects(&mut data);
        assert!(removed.is_empty());
        assert_eq!(data.subjects.len(), 2);
    }

    #[test]
    fn removes_subject_without_matching_room_type() {
        // Subject 2 wants room type 99 which no room offers
        let mut data = dataset(vec![subject(1, Some(1)), subject(2, Some(99))]);
        let removed = filter_infeasible_subjects(&mut data);
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].subject_id, 2);
        assert_eq!(removed[0].reasons, vec![RemovalReason::NoRoomType]);
        // References are cleaned up everywhere
        assert!(data.subjects.iter().all(|s| s.subject_id != 2));
        assert!(!data.batches[0].subject_ids.contains(&2));
        assert!(!data.faculty[0].qualified_subject_ids.contains(&2));
    }

    #[test]
    fn removes_subject_nobody_teaches_or_takes() {
        let mut data = dataset(vec![subject(1, None), subject(2, None)]);
        data.faculty[0].qualified_subject_ids.remove(&2);
        data.batches[0].subject_ids.retain(|s| *s != 2);
        let removed = filter_infeasible_subjects(&mut data);
        assert_eq!(removed.len(), 1);
        assert!(removed[0].reasons.contains(&RemovalReason::NoQualifiedFaculty));
        assert!(removed[0].reasons.contains(&RemovalReason::NoEnrolledBatches));
    }

    #[test]
    fn removes_subject_without_any_meetings() {
        let mut data = dataset(vec![subject(1, None)]);
        data.subjects[0].required_weekly_minutes = 0;
        data.subjects[0].max_meetings = Some(0);
        let removed = filter_infeasible_subjects(&mut data);
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].reasons, vec![RemovalReason::NoMeetings]);
    }
}
