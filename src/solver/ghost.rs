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

//! Ghost-interval controller.
//!
//! Every slot of every entity-day gets a fixed-position optional interval of the slot width: the
//! "ghost", representing vacancy. Ghosts join the same per-entity NoOverlap as class intervals,
//! so a class physically pushes the ghosts out of its span. The inverter
//! `time_slot = ¬ghost_active` turns ghost presence into the occupancy boolean, and a
//! conservation law per entity-day (ghost minutes + class minutes + external minutes = day span)
//! keeps the solver from killing ghosts without a covering class.

use cp_sat::builder::{BoolVar, CpModelBuilder, IntVar};
use log::debug;

use super::grid::{day_start_abs, DayRow, TimeslotGrid};
use super::model::{bool_sum, bool_times_int, int_sum, lin, ModelVars};
use crate::config::Config;
use crate::Dataset;

pub(crate) fn build(
    model: &mut CpModelBuilder,
    dataset: &Dataset,
    config: &Config,
    vars: &mut ModelVars,
) -> TimeslotGrid {
    let granularity = config.time_granularity_minutes as i64;
    let num_days = config.num_days();

    let mut faculty_rows = Vec::with_capacity(dataset.faculty.len());
    for f_idx in 0..dataset.faculty.len() {
        let mut days = Vec::with_capacity(num_days);
        for d in 0..num_days {
            let (row, ghosts) = build_day_row(model, config, d, &[]);
            for g in ghosts.iter() {
                vars.faculty_intervals[f_idx].push(g.interval);
            }

            // Conservation: ghost minutes + class minutes on this faculty-day = day span
            let class_minutes: Vec<IntVar> = vars
                .faculty_minutes
                .range((f_idx, i64::MIN, 0, 0)..=(f_idx, i64::MAX, u32::MAX, usize::MAX))
                .filter(|((_, _, _, day), _)| *day == d)
                .map(|(_, v)| *v)
                .collect();
            let ghost_minutes =
                ghosts.iter().map(|g| (granularity, g.active)).collect::<cp_sat::builder::LinearExpr>();
            let span = ghosts.len() as i64 * granularity;
            model.add_eq(ghost_minutes + int_sum(class_minutes), span);

            days.push(row);
        }
        faculty_rows.push(days);
    }

    let mut batch_rows = Vec::with_capacity(dataset.batches.len());
    for (b_idx, batch) in dataset.batches.iter().enumerate() {
        let mut days = Vec::with_capacity(num_days);
        for d in 0..num_days {
            let banned: Vec<(usize, usize)> = batch
                .banned_windows
                .iter()
                .filter(|w| w.day_index == d)
                .map(|w| (w.start_slot, w.end_slot))
                .collect();
            let (row, ghosts) = build_day_row(model, config, d, &banned);
            for g in ghosts.iter() {
                vars.batch_intervals[b_idx].push(g.interval);
            }

            // Class minutes of this batch-day (duration · active_for_batch per meeting)
            let mut class_minutes = Vec::new();
            let keys: Vec<(usize, i64, u32, usize)> = vars
                .active_for_batch
                .range((b_idx, i64::MIN, 0, 0)..=(b_idx, i64::MAX, u32::MAX, usize::MAX))
                .filter(|((_, _, _, day), _)| *day == d)
                .map(|(k, _)| *k)
                .collect();
            for key in keys {
                let (_, sub_id, s, day) = key;
                let active_for = vars.active_for_batch[&key];
                let meeting = &vars.meetings[&(sub_id, s, day)];
                let max_duration = vars.sections[&(sub_id, s)].max_duration;
                let (duration, max) = (meeting.duration, max_duration);
                class_minutes.push(bool_times_int(model, active_for, duration, max));
            }

            let ghost_minutes =
                ghosts.iter().map(|g| (granularity, g.active)).collect::<cp_sat::builder::LinearExpr>();
            let external = vars.external_minutes.get(&(b_idx, d)).copied().unwrap_or(0);
            let span = ghosts.len() as i64 * granularity;
            model.add_eq(ghost_minutes + int_sum(class_minutes), span - external);

            days.push(row);
        }
        batch_rows.push(days);
    }

    debug!(
        "Ghost controller: {} entity-day rows, {} slots per full day",
        (dataset.faculty.len() + dataset.batches.len()) * num_days,
        config.slots_for_day(0)
    );

    TimeslotGrid {
        faculty: faculty_rows,
        batches: batch_rows,
    }
}

struct GhostSlot {
    active: BoolVar,
    interval: cp_sat::builder::IntervalVar,
}

/// Create the ghosts and time-slot booleans of one entity-day. Slots covered by a banned window
/// get their ghost pinned present (slot stays vacant, and the ghost blocks any class there).
fn build_day_row(
    model: &mut CpModelBuilder,
    config: &Config,
    day_idx: usize,
    banned: &[(usize, usize)],
) -> (DayRow, Vec<GhostSlot>) {
    let granularity = config.time_granularity_minutes as i64;
    let num_slots = config.slots_for_day(day_idx);
    let origin = day_start_abs(config, day_idx);

    let mut slots = Vec::with_capacity(num_slots);
    let mut ghosts = Vec::with_capacity(num_slots);
    for i in 0..num_slots {
        let start_abs = origin + i as i64 * granularity;
        let end_abs = start_abs + granularity;

        let ghost_active = model.new_bool_var();
        let ghost_interval =
            model.new_optional_interval_var(start_abs, granularity, end_abs, ghost_active);

        // Inverter: occupied exactly when the ghost died
        let time_slot = model.new_bool_var();
        model.add_eq(bool_sum([time_slot, ghost_active]), 1i64);

        if banned.iter().any(|(lo, hi)| i >= *lo && i < *hi) {
            model.add_eq(lin(ghost_active), 1i64);
        }

        slots.push(time_slot);
        ghosts.push(GhostSlot {
            active: ghost_active,
            interval: ghost_interval,
        });
    }

    (DayRow { slots }, ghosts)
}
