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

//! Slot-oracle controller.
//!
//! Each slot asks every meeting that could touch this entity-day: "do you cover me?". Coverage is
//! the conjunction of the meeting being active for the entity and the interval overlap
//! `start < slot_end ∧ end > slot_start`; the slot's `time_slot` boolean is the OR over all
//! coverage booleans. Batch slots under a fixed external meeting are pinned occupied, banned
//! window slots are pinned vacant. No ghosts and no conservation law; double-coverage is already
//! impossible through the per-entity NoOverlap.

use cp_sat::builder::{BoolVar, CpModelBuilder, IntVar};
use log::debug;

use super::grid::{day_start_abs, DayRow, TimeslotGrid};
use super::model::{bool_sum, lin, reify_and, ModelVars};
use crate::config::Config;
use crate::Dataset;

pub(crate) fn build(
    model: &mut CpModelBuilder,
    dataset: &Dataset,
    config: &Config,
    vars: &mut ModelVars,
) -> TimeslotGrid {
    let num_days = config.num_days();
    let mut coverage_vars = 0usize;

    let mut faculty_rows = Vec::with_capacity(dataset.faculty.len());
    for f_idx in 0..dataset.faculty.len() {
        let mut days = Vec::with_capacity(num_days);
        for d in 0..num_days {
            let meetings = entity_meetings(vars, EntitySide::Faculty, f_idx, d);
            let row = build_day_row(model, config, d, &meetings, &[], &[], &mut coverage_vars);
            days.push(row);
        }
        faculty_rows.push(days);
    }

    let mut batch_rows = Vec::with_capacity(dataset.batches.len());
    for (b_idx, batch) in dataset.batches.iter().enumerate() {
        let mut days = Vec::with_capacity(num_days);
        for d in 0..num_days {
            let meetings = entity_meetings(vars, EntitySide::Batch, b_idx, d);
            let external: Vec<(i64, i64)> = batch
                .external_meetings
                .iter()
                .filter(|m| m.day_index == d)
                .map(|m| {
                    let offset = d as i64 * super::grid::MINUTES_IN_A_DAY;
                    (offset + m.start_minutes as i64, offset + m.end_minutes as i64)
                })
                .collect();
            let banned: Vec<(usize, usize)> = batch
                .banned_windows
                .iter()
                .filter(|w| w.day_index == d)
                .map(|w| (w.start_slot, w.end_slot))
                .collect();
            let row = build_day_row(
                model,
                config,
                d,
                &meetings,
                &external,
                &banned,
                &mut coverage_vars,
            );
            days.push(row);
        }
        batch_rows.push(days);
    }

    debug!(
        "Slot-oracle controller: {} entity-day rows, ~{} coverage booleans",
        (dataset.faculty.len() + dataset.batches.len()) * num_days,
        coverage_vars
    );

    TimeslotGrid {
        faculty: faculty_rows,
        batches: batch_rows,
    }
}

enum EntitySide {
    Faculty,
    Batch,
}

/// Meetings that may occupy this entity on this day: (activation boolean, start, end)
fn entity_meetings(
    vars: &ModelVars,
    side: EntitySide,
    entity: usize,
    day: usize,
) -> Vec<(BoolVar, IntVar, IntVar)> {
    let map = match side {
        EntitySide::Faculty => &vars.active_for_faculty,
        EntitySide::Batch => &vars.active_for_batch,
    };
    map.range((entity, i64::MIN, 0, 0)..=(entity, i64::MAX, u32::MAX, usize::MAX))
        .filter(|((_, _, _, d), _)| *d == day)
        .map(|((_, sub_id, s, d), active_for)| {
            let meeting = &vars.meetings[&(*sub_id, *s, *d)];
            (*active_for, meeting.start, meeting.end)
        })
        .collect()
}

fn build_day_row(
    model: &mut CpModelBuilder,
    config: &Config,
    day_idx: usize,
    meetings: &[(BoolVar, IntVar, IntVar)],
    external: &[(i64, i64)],
    banned: &[(usize, usize)],
    coverage_vars: &mut usize,
) -> DayRow {
    let granularity = config.time_granularity_minutes as i64;
    let num_slots = config.slots_for_day(day_idx);
    let origin = day_start_abs(config, day_idx);

    let mut slots = Vec::with_capacity(num_slots);
    for i in 0..num_slots {
        let start_abs = origin + i as i64 * granularity;
        let end_abs = start_abs + granularity;
        let time_slot = model.new_bool_var();

        let is_external = external
            .iter()
            .any(|(lo, hi)| *lo < end_abs && *hi > start_abs);
        if is_external {
            // Occupied no matter what the solver does; the NoOverlap on the batch's intervals
            // already keeps classes out of the external span.
            model.add_eq(lin(time_slot), 1i64);
            slots.push(time_slot);
            continue;
        }

        // covers(m, i) = active(m) ∧ start(m) < slot_end ∧ end(m) > slot_start
        let mut covers = Vec::with_capacity(meetings.len());
        for (active_for, start, end) in meetings.iter() {
            let starts_before_slot_ends = model.new_bool_var();
            model
                .add_lt(*start, end_abs)
                .only_enforce_if(&[starts_before_slot_ends]);
            model
                .add_ge(*start, end_abs)
                .only_enforce_if(&[!starts_before_slot_ends]);

            let ends_after_slot_starts = model.new_bool_var();
            model
                .add_gt(*end, start_abs)
                .only_enforce_if(&[ends_after_slot_starts]);
            model
                .add_le(*end, start_abs)
                .only_enforce_if(&[!ends_after_slot_starts]);

            let c = reify_and(
                model,
                &[*active_for, starts_before_slot_ends, ends_after_slot_starts],
            );
            covers.push(c);
            *coverage_vars += 3;
        }

        // time_slot = OR(covers); no candidate meetings means the slot stays vacant
        if covers.is_empty() {
            model.add_eq(lin(time_slot), 0i64);
        } else {
            for c in covers.iter() {
                model.add_ge(lin(time_slot), lin(*c));
            }
            model.add_le(lin(time_slot), bool_sum(covers));
        }

        if banned.iter().any(|(lo, hi)| i >= *lo && i < *hi) {
            model.add_eq(lin(time_slot), 0i64);
        }

        slots.push(time_slot);
    }

    DayRow { slots }
}
