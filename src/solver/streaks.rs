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

//! Streak tracking over the time-slot grid.
//!
//! For every entity-day row two integer chains are maintained:
//! `active_streak[i]` counts consecutive occupied slots ending at i, `vacant_streak[i]` counts
//! consecutive vacant slots ending at i. The recurrences are conditioned on the slot's occupancy
//! boolean, which lets the slot rules state streak limits locally per slot.

use cp_sat::builder::{CpModelBuilder, IntVar, LinearExpr};

use super::grid::{DayRow, TimeslotGrid};

/// Streak chains of one entity-day
pub(crate) struct DayStreaks {
    pub active: Vec<IntVar>,
    pub vacant: Vec<IntVar>,
}

pub(crate) struct Streaks {
    pub faculty: Vec<Vec<DayStreaks>>,
    pub batches: Vec<Vec<DayStreaks>>,
}

pub(crate) fn add_streak_tracking(model: &mut CpModelBuilder, grid: &TimeslotGrid) -> Streaks {
    Streaks {
        faculty: grid
            .faculty
            .iter()
            .map(|days| days.iter().map(|row| track_row(model, row)).collect())
            .collect(),
        batches: grid
            .batches
            .iter()
            .map(|days| days.iter().map(|row| track_row(model, row)).collect())
            .collect(),
    }
}

fn track_row(model: &mut CpModelBuilder, row: &DayRow) -> DayStreaks {
    let n = row.slots.len() as i64;
    let mut active = Vec::with_capacity(row.slots.len());
    let mut vacant = Vec::with_capacity(row.slots.len());

    for slot in row.slots.iter() {
        let ts = *slot;

        // active_streak[i]: 0 on a vacant slot, previous + 1 on an occupied one
        let active_streak = model.new_int_var([(0, n)]);
        match active.last() {
            None => {
                model.add_eq(active_streak, 1i64).only_enforce_if(&[ts]);
            }
            Some(prev) => {
                let prev: IntVar = *prev;
                model
                    .add_eq(active_streak, LinearExpr::from(prev) + 1)
                    .only_enforce_if(&[ts]);
            }
        }
        model.add_eq(active_streak, 0i64).only_enforce_if(&[!ts]);
        active.push(active_streak);

        // vacant_streak[i]: the mirrored chain
        let vacant_streak = model.new_int_var([(0, n)]);
        match vacant.last() {
            None => {
                model.add_eq(vacant_streak, 1i64).only_enforce_if(&[!ts]);
            }
            Some(prev) => {
                let prev: IntVar = *prev;
                model
                    .add_eq(vacant_streak, LinearExpr::from(prev) + 1)
                    .only_enforce_if(&[!ts]);
            }
        }
        model.add_eq(vacant_streak, 0i64).only_enforce_if(&[ts]);
        vacant.push(vacant_streak);
    }

    DayStreaks { active, vacant }
}
