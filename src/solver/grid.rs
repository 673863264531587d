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

//! Per-entity-day slot grid.
//!
//! Every (faculty, day) and (batch, day) pair owns a row of fixed-width slots, each carrying one
//! `time_slot` boolean: 1 = occupied by class time, 0 = vacant. How the booleans get their values
//! is the controller's business ([super::ghost] or [super::oracle]); everything downstream (streak
//! tracking, slot rules, day gaps) reads `time_slot` only and never branches on the controller.

use cp_sat::builder::{BoolVar, CpModelBuilder};

use super::model::ModelVars;
use super::ControllerKind;
use crate::config::Config;
use crate::Dataset;

/// Minutes between two consecutive day origins on the absolute time axis
pub(crate) const MINUTES_IN_A_DAY: i64 = 1440;

/// Absolute minute at which the given day's scheduling window opens
pub(crate) fn day_start_abs(config: &Config, day_idx: usize) -> i64 {
    day_idx as i64 * MINUTES_IN_A_DAY + config.day_start_minutes as i64
}

/// Absolute minute at which the given day's scheduling window closes
pub(crate) fn day_end_abs(config: &Config, day_idx: usize) -> i64 {
    day_idx as i64 * MINUTES_IN_A_DAY + config.day_end(day_idx) as i64
}

/// All slots of one entity on one day: one occupancy boolean per fixed-width slot
pub(crate) struct DayRow {
    pub slots: Vec<BoolVar>,
}

/// The controllers' output: one [DayRow] per (faculty, day) and per (batch, day)
pub(crate) struct TimeslotGrid {
    pub faculty: Vec<Vec<DayRow>>,
    pub batches: Vec<Vec<DayRow>>,
}

/// Who owns a grid row; used by consumers that keep separate tracker maps per entity class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EntityKind {
    Faculty,
    Batch,
}

impl TimeslotGrid {
    /// Iterate all rows in a fixed order: all faculty first, then all batches, days ascending
    pub fn rows(&self) -> impl Iterator<Item = (EntityKind, usize, usize, &DayRow)> {
        let faculty = self.faculty.iter().enumerate().flat_map(|(e, days)| {
            days.iter()
                .enumerate()
                .map(move |(d, row)| (EntityKind::Faculty, e, d, row))
        });
        let batches = self.batches.iter().enumerate().flat_map(|(e, days)| {
            days.iter()
                .enumerate()
                .map(move |(d, row)| (EntityKind::Batch, e, d, row))
        });
        faculty.chain(batches)
    }
}

/// Build the time-slot grid with the selected controller. Both controllers pin banned batch
/// windows vacant, so no class coverage can be placed there.
pub(crate) fn build_grid(
    model: &mut CpModelBuilder,
    dataset: &Dataset,
    config: &Config,
    vars: &mut ModelVars,
    controller: ControllerKind,
) -> TimeslotGrid {
    match controller {
        ControllerKind::GhostInterval => super::ghost::build(model, dataset, config, vars),
        ControllerKind::SlotOracle => super::oracle::build(model, dataset, config, vars),
    }
}
