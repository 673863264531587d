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

//! Streak-based slot rules.
//!
//! Hard rules bound every active streak by the maximum continuous class time and demand the
//! minimum gap length wherever a gap ends in front of a class (with at least one class earlier
//! that day; a vacant morning is not a gap). The soft trackers, only built for Pass 2, measure
//! blocks shorter than the minimum continuous class time and gaps longer than the maximum.

use std::collections::BTreeMap;

use cp_sat::builder::{BoolVar, CpModelBuilder, IntVar, LinearExpr};

use super::grid::{DayRow, EntityKind, TimeslotGrid};
use super::model::{lin, reify_and};
use super::streaks::{DayStreaks, Streaks};
use crate::config::Config;

pub(crate) struct SlotPenalties {
    /// (faculty, day) -> per-slot shortfall below the minimum block length
    pub faculty_under_minimum_block: BTreeMap<(usize, usize), Vec<IntVar>>,
    pub batch_under_minimum_block: BTreeMap<(usize, usize), Vec<IntVar>>,
    /// (faculty, day) -> per-slot excess above the maximum gap length
    pub faculty_excess_gaps: BTreeMap<(usize, usize), Vec<IntVar>>,
    pub batch_excess_gaps: BTreeMap<(usize, usize), Vec<IntVar>>,
}

fn streaks_of<'a>(
    streaks: &'a Streaks,
    kind: EntityKind,
    entity: usize,
    day: usize,
) -> &'a DayStreaks {
    match kind {
        EntityKind::Faculty => &streaks.faculty[entity][day],
        EntityKind::Batch => &streaks.batches[entity][day],
    }
}

/// `gap_ends_here[i]`: slot i is vacant, slot i+1 is occupied and there was class earlier today
/// (`vacant_streak[i] < i`: a streak covering the whole prefix means the day has not started).
fn gap_ends_here(
    model: &mut CpModelBuilder,
    row: &DayRow,
    streaks: &DayStreaks,
    i: usize,
) -> BoolVar {
    let ts = row.slots[i];
    let next_ts = row.slots[i + 1];

    let encountered_class_before = model.new_bool_var();
    model
        .add_lt(streaks.vacant[i], i as i64)
        .only_enforce_if(&[encountered_class_before]);
    model
        .add_ge(streaks.vacant[i], i as i64)
        .only_enforce_if(&[!encountered_class_before]);

    reify_and(model, &[!ts, next_ts, encountered_class_before])
}

/// Hard rules on every entity-day row: bounded active streaks, minimum gap length
pub(crate) fn add_hard_rules(
    model: &mut CpModelBuilder,
    config: &Config,
    grid: &TimeslotGrid,
    streaks: &Streaks,
) {
    let max_class_slots = config.max_class_slots();
    let min_gap_slots = config.min_gap_slots();

    for (kind, entity, day, row) in grid.rows() {
        let day_streaks = streaks_of(streaks, kind, entity, day);
        let n = row.slots.len();
        for i in 0..n {
            model.add_le(day_streaks.active[i], max_class_slots);
            if i + 1 < n {
                let gap_ends = gap_ends_here(model, row, day_streaks, i);
                model
                    .add_ge(day_streaks.vacant[i], min_gap_slots)
                    .only_enforce_if(&[gap_ends]);
            }
        }
    }
}

/// Soft trackers (Pass 2 only): per-slot block shortfalls and gap excesses
pub(crate) fn add_soft_trackers(
    model: &mut CpModelBuilder,
    config: &Config,
    grid: &TimeslotGrid,
    streaks: &Streaks,
) -> SlotPenalties {
    let min_class_slots = config.min_class_slots();
    let max_gap_slots = config.max_gap_slots();

    let mut penalties = SlotPenalties {
        faculty_under_minimum_block: BTreeMap::new(),
        batch_under_minimum_block: BTreeMap::new(),
        faculty_excess_gaps: BTreeMap::new(),
        batch_excess_gaps: BTreeMap::new(),
    };

    for (kind, entity, day, row) in grid.rows() {
        let day_streaks = streaks_of(streaks, kind, entity, day);
        let n = row.slots.len();
        let mut under_block = Vec::with_capacity(n);
        let mut excess_gaps = Vec::new();

        for i in 0..n {
            let ts = row.slots[i];

            // block_ends[i]: an occupied slot with no occupied successor
            let block_ends = if i + 1 == n {
                ts
            } else {
                let next_ts = row.slots[i + 1];
                reify_and(model, &[ts, !next_ts])
            };
            let shortfall = model.new_int_var([(0, min_class_slots.max(0))]);
            model
                .add_ge(
                    shortfall,
                    LinearExpr::from(min_class_slots) - LinearExpr::from(day_streaks.active[i]),
                )
                .only_enforce_if(&[block_ends]);
            model.add_eq(shortfall, 0i64).only_enforce_if(&[!block_ends]);
            under_block.push(shortfall);

            if i + 1 < n {
                let gap_ends = gap_ends_here(model, row, day_streaks, i);
                let excess = model.new_int_var([(0, n as i64)]);
                model
                    .add_ge(
                        excess,
                        LinearExpr::from(day_streaks.vacant[i]) - max_gap_slots,
                    )
                    .only_enforce_if(&[gap_ends]);
                model.add_eq(excess, 0i64).only_enforce_if(&[!gap_ends]);
                excess_gaps.push(excess);
            }
        }

        let (under_map, gap_map) = match kind {
            EntityKind::Faculty => (
                &mut penalties.faculty_under_minimum_block,
                &mut penalties.faculty_excess_gaps,
            ),
            EntityKind::Batch => (
                &mut penalties.batch_under_minimum_block,
                &mut penalties.batch_excess_gaps,
            ),
        };
        under_map.insert((entity, day), under_block);
        gap_map.insert((entity, day), excess_gaps);
    }

    penalties
}

/// Soft trackers of one slot-penalty family as one flat iterator (for the objective)
pub(crate) fn flatten(map: &BTreeMap<(usize, usize), Vec<IntVar>>) -> impl Iterator<Item = IntVar> + '_ {
    map.values().flat_map(|v| v.iter().copied())
}
