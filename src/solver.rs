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

//! Two-pass timetable solver.
//!
//! The module builds a CP-SAT model of the timetabling problem twice: Pass 1 carries only the
//! hard rules plus relaxation booleans and minimizes the number of structural violations
//! (unassigned resources, unmet weekly durations, day gaps). Pass 2 rebuilds the model, locks the
//! structural outcome (per-variable or as an aggregate bound, see [crate::config::LockMode]) and
//! minimizes the weighted preference penalties. The Pass-1 model and solver response are dropped
//! before the Pass-2 model is constructed so peak memory stays at a single model.

mod extract;
mod ghost;
mod grid;
mod model;
mod oracle;
mod preference;
mod progress;
mod slot_rules;
mod streaks;
mod structural;

#[cfg(test)]
mod tests;

use std::collections::BTreeMap;
use std::path::PathBuf;

use cp_sat::builder::CpModelBuilder;
use cp_sat::proto::{CpSolverStatus, SatParameters};
use log::{info, warn};

use crate::config::{Config, LockMode};
use crate::error::SchedulerError;
use crate::Dataset;

/// Identifies a section: (subject id, section index in `0..ideal_num_sections`)
pub type SectionKey = (i64, u32);

/// Which mechanism sets the per-entity-day `time_slot` booleans
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControllerKind {
    /// Fixed-position optional "ghost" intervals joined into the per-entity NoOverlap; vacancy is
    /// ghost presence and a conservation law ties ghosts, classes and external meetings to the
    /// day span
    #[default]
    GhostInterval,
    /// Per-(slot, meeting) coverage booleans aggregated with an OR; no ghosts, no conservation
    SlotOracle,
}

/// Options controlling a single two-pass run
#[derive(Debug, Clone)]
pub struct SolveOptions {
    pub seed: i64,
    pub pass1_time_seconds: f64,
    pub pass2_time_seconds: f64,
    /// Solver worker threads; forced to 1 in deterministic mode
    pub num_workers: i32,
    /// Single worker + fixed seed, for byte-identical reruns
    pub deterministic: bool,
    pub controller: ControllerKind,
    pub lock_mode: LockMode,
    /// When false the pipeline stops after Pass 1 and reports a null preference penalty
    pub run_pass2: bool,
    /// Run folder receiving the per-pass solver log and statistics files; `None` disables them
    pub output_folder: Option<PathBuf>,
}

impl Default for SolveOptions {
    fn default() -> Self {
        SolveOptions {
            seed: 0,
            pass1_time_seconds: 60.0,
            pass2_time_seconds: 120.0,
            num_workers: 1,
            deterministic: true,
            controller: ControllerKind::GhostInterval,
            lock_mode: LockMode::Exact,
            run_pass2: true,
            output_folder: None,
        }
    }
}

/// Final solver status as reported to callers and exporters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveStatus {
    Optimal,
    Feasible,
    Infeasible,
    Unknown,
}

impl SolveStatus {
    fn from_proto(status: CpSolverStatus) -> SolveStatus {
        match status {
            CpSolverStatus::Optimal => SolveStatus::Optimal,
            CpSolverStatus::Feasible => SolveStatus::Feasible,
            CpSolverStatus::Infeasible => SolveStatus::Infeasible,
            _ => SolveStatus::Unknown,
        }
    }

    pub fn is_solution(&self) -> bool {
        matches!(self, SolveStatus::Optimal | SolveStatus::Feasible)
    }
}

impl std::fmt::Display for SolveStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            SolveStatus::Optimal => "OPTIMAL",
            SolveStatus::Feasible => "FEASIBLE",
            SolveStatus::Infeasible => "INFEASIBLE",
            SolveStatus::Unknown => "UNKNOWN",
        };
        f.write_str(text)
    }
}

/// One scheduled meeting of a section on a day. `start` is in minutes from midnight of that day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeetingResult {
    pub day: usize,
    pub start: u32,
    pub duration: u32,
    pub active: bool,
}

impl MeetingResult {
    pub fn end(&self) -> u32 {
        self.start + self.duration
    }
}

/// Solved values of one section
#[derive(Debug, Clone)]
pub struct SectionResult {
    pub subject_id: i64,
    pub section: u32,
    /// False for sections no batch picked; such sections carry dummy resources and no meetings
    pub has_batch: bool,
    /// Index into the faculty list, `None` when the dummy faculty was assigned
    pub faculty: Option<usize>,
    /// Index into the room list, `None` when the dummy room was assigned
    pub room: Option<usize>,
    /// Population per enrolling batch index (only picked batches carry a nonzero value)
    pub batch_populations: BTreeMap<usize, u32>,
    pub total_students: u32,
    /// One entry per scheduling day
    pub meetings: Vec<MeetingResult>,
}

/// Extracted values of every violation tracker family
#[derive(Debug, Clone, Default)]
pub struct ViolationValues {
    pub dummy_faculty: BTreeMap<SectionKey, bool>,
    pub dummy_room: BTreeMap<SectionKey, bool>,
    pub duration: BTreeMap<SectionKey, bool>,
    /// (faculty index, day) -> a scheduled day lies between two other scheduled days
    pub faculty_day_gaps: BTreeMap<(usize, usize), bool>,
    pub batch_day_gaps: BTreeMap<(usize, usize), bool>,
    /// Minutes above the faculty's maximum load
    pub faculty_overload: BTreeMap<usize, i64>,
    /// Minutes below the faculty's minimum load (only tracked when min_hours > 0)
    pub faculty_underfill: BTreeMap<usize, i64>,
    pub section_overfill: BTreeMap<SectionKey, i64>,
    pub section_underfill: BTreeMap<SectionKey, i64>,
    /// Reporting-only; the hard capacity constraint keeps this at zero
    pub room_overcapacity: BTreeMap<SectionKey, i64>,
    /// (faculty, subject, section) -> section taught by qualified-but-not-preferred faculty
    pub non_preferred: BTreeMap<(usize, i64, u32), bool>,
    /// (faculty, day) -> per-slot missing slots of blocks shorter than the minimum
    pub faculty_under_minimum_block: BTreeMap<(usize, usize), Vec<i64>>,
    pub batch_under_minimum_block: BTreeMap<(usize, usize), Vec<i64>>,
    /// (faculty, day) -> per-slot slots of gaps longer than the maximum
    pub faculty_excess_gaps: BTreeMap<(usize, usize), Vec<i64>>,
    pub batch_excess_gaps: BTreeMap<(usize, usize), Vec<i64>>,
}

impl ViolationValues {
    /// Sum of all structural violation booleans (the Pass-1 objective)
    pub fn structural_sum(&self) -> i64 {
        let bools = self
            .dummy_faculty
            .values()
            .chain(self.dummy_room.values())
            .chain(self.duration.values())
            .chain(self.faculty_day_gaps.values())
            .chain(self.batch_day_gaps.values());
        bools.map(|b| *b as i64).sum()
    }
}

/// The result bundle handed to exporters
#[derive(Debug, Clone)]
pub struct ScheduleSolution {
    pub status: SolveStatus,
    /// Structural violation sum of the reported solution
    pub structural_objective: i64,
    /// Pass-2 objective value; `None` when only Pass 1 ran
    pub preference_objective: Option<i64>,
    pub dummy_faculty_index: usize,
    pub dummy_room_index: usize,
    pub sections: BTreeMap<SectionKey, SectionResult>,
    pub violations: ViolationValues,
}

/// Values of every structural slack variable in the Pass-1 solution, used to lock Pass 2
#[derive(Debug, Clone)]
pub(crate) struct StructuralSnapshot {
    pub dummy_faculty: BTreeMap<SectionKey, bool>,
    pub dummy_room: BTreeMap<SectionKey, bool>,
    pub duration: BTreeMap<SectionKey, bool>,
    pub faculty_day_gaps: BTreeMap<(usize, usize), bool>,
    pub batch_day_gaps: BTreeMap<(usize, usize), bool>,
    pub total: i64,
}

/// Which constraint families a pass carries
enum PassMode<'a> {
    /// Hard rules + structural relaxations, objective = structural sum
    Structural,
    /// Same base model plus soft trackers, structural outcome locked to the Pass-1 snapshot
    Preference {
        snapshot: &'a StructuralSnapshot,
        lock: LockMode,
    },
}

/// One fully assembled model with all its variable maps
struct PassModel {
    model: CpModelBuilder,
    vars: model::ModelVars,
    structural: structural::StructuralVars,
    prefs: Option<preference::PreferenceVars>,
}

impl PassModel {
    fn build(
        dataset: &Dataset,
        config: &Config,
        opts: &SolveOptions,
        mode: PassMode,
    ) -> Result<PassModel, SchedulerError> {
        let mut model = CpModelBuilder::default();
        let mut vars = model::build_variables(&mut model, dataset, config)?;
        let grid = grid::build_grid(&mut model, dataset, config, &mut vars, opts.controller);
        model::apply_no_overlap(&mut model, &vars);
        let streaks = streaks::add_streak_tracking(&mut model, &grid);
        slot_rules::add_hard_rules(&mut model, config, &grid, &streaks);
        let structural = structural::build(&mut model, dataset, config, &vars, &grid);

        let prefs = match mode {
            PassMode::Structural => {
                let objective = structural::objective(&vars, &structural);
                model.minimize(objective);
                None
            }
            PassMode::Preference { snapshot, lock } => {
                structural::apply_lock(&mut model, &vars, &structural, snapshot, lock);
                let slot_penalties =
                    slot_rules::add_soft_trackers(&mut model, config, &grid, &streaks);
                let prefs =
                    preference::build(&mut model, dataset, &vars, &structural, slot_penalties);
                let objective = preference::objective(config, &structural, &prefs);
                model.minimize(objective);
                Some(prefs)
            }
        };

        Ok(PassModel {
            model,
            vars,
            structural,
            prefs,
        })
    }
}

/// Assemble solver parameters for one pass
fn solver_parameters(opts: &SolveOptions, time_limit_seconds: f64) -> SatParameters {
    let mut params = SatParameters::default();
    params.max_time_in_seconds = Some(time_limit_seconds);
    params.random_seed = Some(opts.seed as i32);
    params.num_search_workers = Some(if opts.deterministic {
        1
    } else {
        opts.num_workers.max(1)
    });
    params.log_search_progress = Some(false);
    params
}

/// Run the two-pass optimization on the given dataset.
///
/// Pass 1 minimizes the structural violation sum; its outcome (per-variable values and the sum)
/// is extracted and the whole Pass-1 model is released. Pass 2 rebuilds the model with the
/// structural outcome locked and minimizes the preference objective. If Pass 2 finds no solution
/// within its budget, the Pass-1 schedule is returned with a null preference penalty.
pub fn solve(
    dataset: &Dataset,
    config: &Config,
    opts: &SolveOptions,
) -> Result<ScheduleSolution, SchedulerError> {
    info!(
        "Building Pass 1 model ({} subjects, {} faculty, {} rooms, {} batches, seed {})",
        dataset.subjects.len(),
        dataset.faculty.len(),
        dataset.rooms.len(),
        dataset.batches.len(),
        opts.seed
    );

    // Pass 1 lives in its own scope so model and response are dropped before Pass 2 is built.
    let (pass1_solution, snapshot) = {
        let pass = PassModel::build(dataset, config, opts, PassMode::Structural)?;
        let params = solver_parameters(opts, opts.pass1_time_seconds);
        let mut log = progress::PassLog::create(opts.output_folder.as_deref(), "pass1")?;

        info!("Pass 1: minimizing structural violations ...");
        let response = pass.model.solve_with_parameters(&params);
        log.record_outcome(&response);
        log.write_stats_summary(&response);

        let status = SolveStatus::from_proto(response.status());
        if !status.is_solution() {
            return Err(SchedulerError::SolverInfeasible {
                status: status.to_string(),
            });
        }

        let solution = extract::extract_solution(dataset, config, &pass, &response, status, None);
        let snapshot = extract::structural_snapshot(&pass, &response);
        info!(
            "Pass 1 complete ({}): structural minimum {}",
            status, snapshot.total
        );
        (solution, snapshot)
    };

    if !opts.run_pass2 {
        return Ok(pass1_solution);
    }

    info!(
        "Building Pass 2 model ({:?} lock, structural budget {})",
        opts.lock_mode, snapshot.total
    );
    let pass2_solution = {
        let pass = PassModel::build(
            dataset,
            config,
            opts,
            PassMode::Preference {
                snapshot: &snapshot,
                lock: opts.lock_mode,
            },
        )?;
        let params = solver_parameters(opts, opts.pass2_time_seconds);
        let mut log = progress::PassLog::create(opts.output_folder.as_deref(), "pass2")?;

        info!("Pass 2: minimizing preference penalties ...");
        let response = pass.model.solve_with_parameters(&params);
        log.record_outcome(&response);
        log.write_stats_summary(&response);

        let status = SolveStatus::from_proto(response.status());
        if status.is_solution() {
            let objective = response.objective_value.round() as i64;
            Some(extract::extract_solution(
                dataset,
                config,
                &pass,
                &response,
                status,
                Some(objective),
            ))
        } else {
            None
        }
    };

    match pass2_solution {
        Some(solution) => {
            info!(
                "Pass 2 complete ({}): preference penalty {}",
                solution.status,
                solution.preference_objective.unwrap_or(0)
            );
            Ok(solution)
        }
        None => {
            warn!("Pass 2 found no solution within its budget; keeping the Pass 1 schedule.");
            Ok(pass1_solution)
        }
    }
}
