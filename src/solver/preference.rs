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

//! Preference trackers and the Pass-2 objective.
//!
//! Every tracker is a nonnegative integer bounded below by its defining expression; minimization
//! settles each one at max(0, expression). Per-hour penalty weights are scaled to the slot width
//! before entering the objective.

use std::collections::BTreeMap;

use cp_sat::builder::{BoolVar, CpModelBuilder, IntVar, LinearExpr};

use super::model::ModelVars;
use super::slot_rules::{flatten, SlotPenalties};
use super::structural::StructuralVars;
use super::SectionKey;
use crate::config::Config;
use crate::Dataset;

/// Fixed lower student count below which a used section counts as underfilled
const SECTION_UNDERFILL_THRESHOLD: i64 = 20;

pub(crate) struct PreferenceVars {
    pub faculty_overload: BTreeMap<usize, IntVar>,
    /// Only present for faculty with a positive minimum load
    pub faculty_underfill: BTreeMap<usize, IntVar>,
    pub section_overfill: BTreeMap<SectionKey, IntVar>,
    pub section_underfill: BTreeMap<SectionKey, IntVar>,
    /// Reporting-only tracker; the hard capacity rule keeps it at zero
    pub room_overcapacity: BTreeMap<SectionKey, IntVar>,
    /// (faculty, subject, section) -> assignment boolean of a qualified-but-not-preferred pairing
    pub non_preferred: BTreeMap<(usize, i64, u32), BoolVar>,
    pub slots: SlotPenalties,
}

pub(crate) fn build(
    model: &mut CpModelBuilder,
    dataset: &Dataset,
    vars: &ModelVars,
    structural: &StructuralVars,
    slots: SlotPenalties,
) -> PreferenceVars {
    let mut prefs = PreferenceVars {
        faculty_overload: BTreeMap::new(),
        faculty_underfill: BTreeMap::new(),
        section_overfill: BTreeMap::new(),
        section_underfill: BTreeMap::new(),
        room_overcapacity: BTreeMap::new(),
        non_preferred: BTreeMap::new(),
        slots,
    };

    let horizon: i64 = dataset
        .subjects
        .iter()
        .map(|s| s.required_weekly_minutes as i64 * s.ideal_num_sections as i64)
        .sum();

    // Faculty load trackers over the totals the structural layer materialized
    for (f_idx, fac) in dataset.faculty.iter().enumerate() {
        let total = structural.faculty_total_minutes[&f_idx];
        let overload = model.new_int_var([(0, horizon.max(0))]);
        model.add_ge(overload, LinearExpr::from(total) - fac.max_minutes() as i64);
        prefs.faculty_overload.insert(f_idx, overload);

        if fac.min_hours > 0 {
            let underfill = model.new_int_var([(0, fac.min_minutes() as i64)]);
            model.add_ge(
                underfill,
                LinearExpr::from(fac.min_minutes() as i64) - LinearExpr::from(total),
            );
            prefs.faculty_underfill.insert(f_idx, underfill);
        }
    }

    // Section fill trackers. Underfill only counts for used sections: an unused section holds
    // zero students by construction and is not a fill problem.
    for (key, section) in vars.sections.iter() {
        let sub = dataset.subject(key.0).expect("section of unknown subject");
        let max_students: i64 = dataset
            .batches
            .iter()
            .filter(|b| b.enrolls(key.0))
            .map(|b| b.population as i64)
            .sum();

        let overfill = model.new_int_var([(0, max_students.max(0))]);
        model.add_ge(
            overfill,
            LinearExpr::from(section.total_students) - sub.effective_max_enrollment() as i64,
        );
        prefs.section_overfill.insert(*key, overfill);

        let underfill = model.new_int_var([(0, SECTION_UNDERFILL_THRESHOLD)]);
        model.add_ge(
            underfill,
            [(SECTION_UNDERFILL_THRESHOLD, section.has_batch)]
                .into_iter()
                .collect::<LinearExpr>()
                - LinearExpr::from(section.total_students),
        );
        prefs.section_underfill.insert(*key, underfill);

        let overcapacity = model.new_int_var([(0, max_students.max(0))]);
        for r_idx in section.candidate_rooms.iter() {
            let assigned = vars.is_assigned_room[&(*r_idx, key.0, key.1)];
            model
                .add_ge(
                    overcapacity,
                    LinearExpr::from(section.total_students)
                        - dataset.rooms[*r_idx].capacity as i64,
                )
                .only_enforce_if(&[assigned]);
        }
        prefs.room_overcapacity.insert(*key, overcapacity);

        // Qualified-but-not-preferred assignments; the reified assignment boolean itself is the
        // tracker
        for f_idx in section.candidate_faculty.iter() {
            let fac = &dataset.faculty[*f_idx];
            if !fac.preferred_subject_ids.contains(&key.0) {
                let assigned = vars.is_assigned_faculty[&(*f_idx, key.0, key.1)];
                prefs.non_preferred.insert((*f_idx, key.0, key.1), assigned);
            }
        }
    }

    prefs
}

fn weighted_ints<I: IntoIterator<Item = IntVar>>(weight: i64, vars: I) -> LinearExpr {
    vars.into_iter().map(|v| (weight, v)).collect()
}

fn weighted_bools<I: IntoIterator<Item = BoolVar>>(weight: i64, bools: I) -> LinearExpr {
    bools.into_iter().map(|b| (weight, b)).collect()
}

/// Assemble the weighted Pass-2 objective
pub(crate) fn objective(
    config: &Config,
    structural: &StructuralVars,
    prefs: &PreferenceVars,
) -> LinearExpr {
    let p = &config.penalties;

    let mut objective = LinearExpr::from(0);
    objective = objective
        + weighted_ints(
            p.faculty_overload_per_minute,
            prefs.faculty_overload.values().copied(),
        )
        + weighted_ints(
            p.faculty_overload_per_minute,
            prefs.faculty_underfill.values().copied(),
        )
        + weighted_ints(
            p.section_overfill_per_student,
            prefs.section_overfill.values().copied(),
        )
        + weighted_ints(
            p.section_underfill_per_student,
            prefs.section_underfill.values().copied(),
        )
        + weighted_ints(
            p.room_overcapacity_per_student,
            prefs.room_overcapacity.values().copied(),
        )
        + weighted_bools(
            p.non_preferred_subject_per_section,
            prefs.non_preferred.values().copied(),
        );

    objective = objective
        + weighted_ints(
            config.per_slot_weight(p.under_minimum_block_per_hour),
            flatten(&prefs.slots.faculty_under_minimum_block)
                .chain(flatten(&prefs.slots.batch_under_minimum_block)),
        )
        + weighted_ints(
            config.per_slot_weight(p.excess_gap_per_hour),
            flatten(&prefs.slots.faculty_excess_gaps)
                .chain(flatten(&prefs.slots.batch_excess_gaps)),
        );

    objective
        + weighted_bools(
            p.day_gap_penalty,
            structural
                .faculty_day_gaps
                .values()
                .chain(structural.batch_day_gaps.values())
                .copied(),
        )
}
