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

//! Value extraction.
//!
//! After a pass the solver response is consulted once, in sorted key order, and everything the
//! exporters need is materialized into plain values. The response itself is dropped together with
//! the pass model, so nothing downstream holds solver resources.

use std::collections::BTreeMap;

use cp_sat::proto::CpSolverResponse;

use super::grid::MINUTES_IN_A_DAY;
use super::{
    MeetingResult, PassModel, ScheduleSolution, SectionResult, SolveStatus, StructuralSnapshot,
    ViolationValues,
};
use crate::config::Config;
use crate::Dataset;

pub(crate) fn extract_solution(
    dataset: &Dataset,
    config: &Config,
    pass: &PassModel,
    response: &CpSolverResponse,
    status: SolveStatus,
    preference_objective: Option<i64>,
) -> ScheduleSolution {
    let vars = &pass.vars;
    let num_days = config.num_days();

    let mut sections = BTreeMap::new();
    for (key, section) in vars.sections.iter() {
        let (subject_id, s) = *key;
        let has_batch = section.has_batch.solution_value(response);
        let faculty_idx = section.assigned_faculty.solution_value(response) as usize;
        let room_idx = section.assigned_room.solution_value(response) as usize;

        let mut batch_populations = BTreeMap::new();
        for (b_idx, batch) in dataset.batches.iter().enumerate() {
            if batch.enrolls(subject_id) {
                let pop = vars.section_pop[&(b_idx, subject_id, s)].solution_value(response);
                if pop > 0 {
                    batch_populations.insert(b_idx, pop as u32);
                }
            }
        }

        let meetings = (0..num_days)
            .map(|d| {
                let meeting = &vars.meetings[&(subject_id, s, d)];
                let start_abs = meeting.start.solution_value(response);
                MeetingResult {
                    day: d,
                    start: (start_abs - d as i64 * MINUTES_IN_A_DAY) as u32,
                    duration: meeting.duration.solution_value(response) as u32,
                    active: meeting.active.solution_value(response),
                }
            })
            .collect();

        sections.insert(
            *key,
            SectionResult {
                subject_id,
                section: s,
                has_batch,
                faculty: (faculty_idx != vars.dummy_faculty_index).then_some(faculty_idx),
                room: (room_idx != vars.dummy_room_index).then_some(room_idx),
                batch_populations,
                total_students: section.total_students.solution_value(response) as u32,
                meetings,
            },
        );
    }

    let mut violations = ViolationValues::default();
    for (key, section) in vars.sections.iter() {
        violations.dummy_faculty.insert(
            *key,
            section.dummy_faculty_violation.solution_value(response),
        );
        violations
            .dummy_room
            .insert(*key, section.dummy_room_violation.solution_value(response));
        violations
            .duration
            .insert(*key, section.duration_violation.solution_value(response));
    }
    for (key, gap) in pass.structural.faculty_day_gaps.iter() {
        violations
            .faculty_day_gaps
            .insert(*key, gap.solution_value(response));
    }
    for (key, gap) in pass.structural.batch_day_gaps.iter() {
        violations
            .batch_day_gaps
            .insert(*key, gap.solution_value(response));
    }

    if let Some(prefs) = pass.prefs.as_ref() {
        for (f_idx, v) in prefs.faculty_overload.iter() {
            violations
                .faculty_overload
                .insert(*f_idx, v.solution_value(response));
        }
        for (f_idx, v) in prefs.faculty_underfill.iter() {
            violations
                .faculty_underfill
                .insert(*f_idx, v.solution_value(response));
        }
        for (key, v) in prefs.section_overfill.iter() {
            violations
                .section_overfill
                .insert(*key, v.solution_value(response));
        }
        for (key, v) in prefs.section_underfill.iter() {
            violations
                .section_underfill
                .insert(*key, v.solution_value(response));
        }
        for (key, v) in prefs.room_overcapacity.iter() {
            violations
                .room_overcapacity
                .insert(*key, v.solution_value(response));
        }
        for (key, b) in prefs.non_preferred.iter() {
            violations
                .non_preferred
                .insert(*key, b.solution_value(response));
        }
        for (key, slot_vars) in prefs.slots.faculty_under_minimum_block.iter() {
            violations.faculty_under_minimum_block.insert(
                *key,
                slot_vars.iter().map(|v| v.solution_value(response)).collect(),
            );
        }
        for (key, slot_vars) in prefs.slots.batch_under_minimum_block.iter() {
            violations.batch_under_minimum_block.insert(
                *key,
                slot_vars.iter().map(|v| v.solution_value(response)).collect(),
            );
        }
        for (key, slot_vars) in prefs.slots.faculty_excess_gaps.iter() {
            violations.faculty_excess_gaps.insert(
                *key,
                slot_vars.iter().map(|v| v.solution_value(response)).collect(),
            );
        }
        for (key, slot_vars) in prefs.slots.batch_excess_gaps.iter() {
            violations.batch_excess_gaps.insert(
                *key,
                slot_vars.iter().map(|v| v.solution_value(response)).collect(),
            );
        }
    }

    let structural_objective = violations.structural_sum();
    ScheduleSolution {
        status,
        structural_objective,
        preference_objective,
        dummy_faculty_index: vars.dummy_faculty_index,
        dummy_room_index: vars.dummy_room_index,
        sections,
        violations,
    }
}

/// Freeze the Pass-1 values of every structural slack variable for the Pass-2 lock
pub(crate) fn structural_snapshot(
    pass: &PassModel,
    response: &CpSolverResponse,
) -> StructuralSnapshot {
    let mut snapshot = StructuralSnapshot {
        dummy_faculty: BTreeMap::new(),
        dummy_room: BTreeMap::new(),
        duration: BTreeMap::new(),
        faculty_day_gaps: BTreeMap::new(),
        batch_day_gaps: BTreeMap::new(),
        total: 0,
    };

    for (key, section) in pass.vars.sections.iter() {
        let dummy_faculty = section.dummy_faculty_violation.solution_value(response);
        let dummy_room = section.dummy_room_violation.solution_value(response);
        let duration = section.duration_violation.solution_value(response);
        snapshot.total += dummy_faculty as i64 + dummy_room as i64 + duration as i64;
        snapshot.dummy_faculty.insert(*key, dummy_faculty);
        snapshot.dummy_room.insert(*key, dummy_room);
        snapshot.duration.insert(*key, duration);
    }
    for (key, gap) in pass.structural.faculty_day_gaps.iter() {
        let value = gap.solution_value(response);
        snapshot.total += value as i64;
        snapshot.faculty_day_gaps.insert(*key, value);
    }
    for (key, gap) in pass.structural.batch_day_gaps.iter() {
        let value = gap.solution_value(response);
        snapshot.total += value as i64;
        snapshot.batch_day_gaps.insert(*key, value);
    }

    snapshot
}
