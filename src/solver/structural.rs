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

//! Structural constraint families and the Pass-1 objective.
//!
//! Structural violations are the relaxation booleans over rules that must stay satisfiable:
//! dummy faculty/room on a used section, unmet weekly duration, and day gaps (a free day wedged
//! between two teaching days of the same entity). Alongside them this module adds the hard rules
//! that are never relaxed: faculty load caps, the per-faculty subject count, and the
//! lecture/lab pairing.

use std::collections::{BTreeMap, BTreeSet};

use cp_sat::builder::{BoolVar, CpModelBuilder, IntVar, LinearExpr};

use super::grid::{EntityKind, TimeslotGrid};
use super::model::{bool_sum, int_sum, lin, reify_or, ModelVars};
use super::StructuralSnapshot;
use crate::config::{Config, LockMode};
use crate::Dataset;

pub(crate) struct StructuralVars {
    /// (faculty, day) -> day gap booleans for interior days
    pub faculty_day_gaps: BTreeMap<(usize, usize), BoolVar>,
    pub batch_day_gaps: BTreeMap<(usize, usize), BoolVar>,
    /// Total assigned minutes per faculty, reused by the preference trackers
    pub faculty_total_minutes: BTreeMap<usize, IntVar>,
}

pub(crate) fn build(
    model: &mut CpModelBuilder,
    dataset: &Dataset,
    config: &Config,
    vars: &ModelVars,
    grid: &TimeslotGrid,
) -> StructuralVars {
    let mut structural = StructuralVars {
        faculty_day_gaps: BTreeMap::new(),
        batch_day_gaps: BTreeMap::new(),
        faculty_total_minutes: BTreeMap::new(),
    };

    add_day_gaps(model, config, grid, &mut structural);
    add_faculty_loads(model, dataset, vars, &mut structural);
    add_max_subjects(model, dataset, vars);
    add_linked_pairs(model, dataset, config, vars);

    structural
}

/// Day gaps: per entity, an interior day without class between two days with class. Counted as a
/// structural violation, weighted again in Pass 2 with the day-gap penalty.
fn add_day_gaps(
    model: &mut CpModelBuilder,
    config: &Config,
    grid: &TimeslotGrid,
    structural: &mut StructuralVars,
) {
    let num_days = config.num_days();
    if num_days < 3 {
        return;
    }

    // has_class[entity][day] from the slot rows
    let mut has_class: BTreeMap<(EntityKind, usize, usize), BoolVar> = BTreeMap::new();
    for (kind, entity, day, row) in grid.rows() {
        let occupied = bool_sum(row.slots.iter().copied());
        let b = model.new_bool_var();
        model.add_ge(occupied.clone(), 1i64).only_enforce_if(&[b]);
        model.add_eq(occupied, 0i64).only_enforce_if(&[!b]);
        has_class.insert((kind, entity, day), b);
    }

    let entity_counts = [
        (EntityKind::Faculty, grid.faculty.len()),
        (EntityKind::Batch, grid.batches.len()),
    ];
    for (kind, count) in entity_counts {
        for entity in 0..count {
            for day in 1..num_days - 1 {
                let before: Vec<BoolVar> = (0..day)
                    .map(|d| has_class[&(kind, entity, d)])
                    .collect();
                let after: Vec<BoolVar> = (day + 1..num_days)
                    .map(|d| has_class[&(kind, entity, d)])
                    .collect();
                let class_before = reify_or(model, &before);
                let class_after = reify_or(model, &after);
                let today = has_class[&(kind, entity, day)];

                // class_before ∧ class_after ∧ ¬today ⇒ gap
                let gap = model.new_bool_var();
                model.add_ge(
                    lin(gap),
                    lin(class_before) + lin(class_after) - lin(today) - 1,
                );

                match kind {
                    EntityKind::Faculty => structural.faculty_day_gaps.insert((entity, day), gap),
                    EntityKind::Batch => structural.batch_day_gaps.insert((entity, day), gap),
                };
            }
        }
    }
}

/// Total assigned minutes per faculty and the hard load cap
fn add_faculty_loads(
    model: &mut CpModelBuilder,
    dataset: &Dataset,
    vars: &ModelVars,
    structural: &mut StructuralVars,
) {
    let horizon: i64 = dataset
        .subjects
        .iter()
        .map(|s| s.required_weekly_minutes as i64 * s.ideal_num_sections as i64)
        .sum();

    for (f_idx, fac) in dataset.faculty.iter().enumerate() {
        let minutes: Vec<IntVar> = vars
            .faculty_minutes
            .range((f_idx, i64::MIN, 0, 0)..=(f_idx, i64::MAX, u32::MAX, usize::MAX))
            .map(|(_, v)| *v)
            .collect();
        let total = model.new_int_var([(0, horizon.max(0))]);
        model.add_eq(total, int_sum(minutes));
        if fac.max_hours > 0 {
            model.add_le(total, fac.max_minutes() as i64);
        }
        structural.faculty_total_minutes.insert(f_idx, total);
    }
}

/// Per-faculty limit on distinct subjects, with linked lecture/lab pairs canonicalized so the
/// pair counts once
fn add_max_subjects(model: &mut CpModelBuilder, dataset: &Dataset, vars: &ModelVars) {
    for (f_idx, fac) in dataset.faculty.iter().enumerate() {
        let Some(max_subjects) = fac.max_subjects else {
            continue;
        };

        let roots: BTreeSet<i64> = dataset
            .subjects
            .iter()
            .filter(|s| fac.teachable_subject_ids().contains(&s.subject_id))
            .map(|s| s.canonical_subject_id())
            .collect();

        let mut teaches_root = Vec::new();
        for root in roots {
            let assignments: Vec<BoolVar> = vars
                .is_assigned_faculty
                .range((f_idx, i64::MIN, 0)..=(f_idx, i64::MAX, u32::MAX))
                .filter(|((_, sub_id, _), _)| {
                    dataset
                        .subject(*sub_id)
                        .map(|s| s.canonical_subject_id() == root)
                        .unwrap_or(false)
                })
                .map(|(_, b)| *b)
                .collect();
            if assignments.is_empty() {
                continue;
            }
            teaches_root.push(reify_or(model, &assignments));
        }
        if !teaches_root.is_empty() {
            model.add_le(bool_sum(teaches_root), max_subjects as i64);
        }
    }
}

/// Lecture/lab pairing: identical resources and population split, jointly active per day, and
/// the lab starting exactly where the lecture ends
fn add_linked_pairs(
    model: &mut CpModelBuilder,
    dataset: &Dataset,
    config: &Config,
    vars: &ModelVars,
) {
    for lab in dataset.subjects.iter().filter(|s| s.is_lab()) {
        let Some(lecture) = lab.linked_subject_id.and_then(|id| dataset.subject(id)) else {
            continue;
        };

        let paired_sections = lab.ideal_num_sections.min(lecture.ideal_num_sections);
        for s in 0..paired_sections {
            let lab_section = &vars.sections[&(lab.subject_id, s)];
            let lec_section = &vars.sections[&(lecture.subject_id, s)];
            model.add_eq(lab_section.assigned_faculty, lec_section.assigned_faculty);
            model.add_eq(lab_section.assigned_room, lec_section.assigned_room);

            for (b_idx, batch) in dataset.batches.iter().enumerate() {
                if batch.enrolls(lab.subject_id) && batch.enrolls(lecture.subject_id) {
                    let lab_pop = vars.section_pop[&(b_idx, lab.subject_id, s)];
                    let lec_pop = vars.section_pop[&(b_idx, lecture.subject_id, s)];
                    model.add_eq(lab_pop, lec_pop);
                }
            }

            for d in 0..config.num_days() {
                let lab_meeting = &vars.meetings[&(lab.subject_id, s, d)];
                let lec_meeting = &vars.meetings[&(lecture.subject_id, s, d)];
                // A lab meeting never stands alone: it requires the lecture on the same day and
                // starts exactly where the lecture ends. The lecture may meet on further days.
                model.add_le(lin(lab_meeting.active), lin(lec_meeting.active));
                model
                    .add_eq(lab_meeting.start, lec_meeting.end)
                    .only_enforce_if(&[lab_meeting.active]);
            }
        }
    }
}

/// Pass-1 objective: the plain sum of every structural violation boolean
pub(crate) fn objective(vars: &ModelVars, structural: &StructuralVars) -> LinearExpr {
    let section_violations = vars.sections.values().flat_map(|s| {
        [
            s.dummy_faculty_violation,
            s.dummy_room_violation,
            s.duration_violation,
        ]
    });
    let day_gaps = structural
        .faculty_day_gaps
        .values()
        .chain(structural.batch_day_gaps.values())
        .copied();
    bool_sum(section_violations.chain(day_gaps))
}

/// Lock the structural outcome of Pass 1 into the Pass-2 model
pub(crate) fn apply_lock(
    model: &mut CpModelBuilder,
    vars: &ModelVars,
    structural: &StructuralVars,
    snapshot: &StructuralSnapshot,
    lock: LockMode,
) {
    match lock {
        LockMode::Exact => {
            for (key, section) in vars.sections.iter() {
                model.add_eq(
                    lin(section.dummy_faculty_violation),
                    snapshot.dummy_faculty[key] as i64,
                );
                model.add_eq(
                    lin(section.dummy_room_violation),
                    snapshot.dummy_room[key] as i64,
                );
                model.add_eq(
                    lin(section.duration_violation),
                    snapshot.duration[key] as i64,
                );
            }
            for (key, gap) in structural.faculty_day_gaps.iter() {
                model.add_eq(lin(*gap), snapshot.faculty_day_gaps[key] as i64);
            }
            for (key, gap) in structural.batch_day_gaps.iter() {
                model.add_eq(lin(*gap), snapshot.batch_day_gaps[key] as i64);
            }
        }
        LockMode::Limit => {
            model.add_le(objective(vars, structural), snapshot.total);
        }
    }
}
