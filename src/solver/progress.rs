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

//! Per-pass solver log and statistics summary files.
//!
//! Each pass appends its outcome to `<pass>_solver_log.txt` (objective, bound, relative gap,
//! branch/conflict counts against elapsed wall time) and writes a `<pass>_solver_stats.txt`
//! summary with branch and conflict rates. The underlying solver performs a batch solve, so the
//! numbers come from the final response of the pass.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

use cp_sat::proto::CpSolverResponse;
use log::warn;

pub(crate) struct PassLog {
    log_path: Option<PathBuf>,
    stats_path: Option<PathBuf>,
    started: Instant,
    label: String,
}

impl PassLog {
    /// Start a log for the given pass. With no output folder the logger is inert.
    pub fn create(folder: Option<&Path>, label: &str) -> std::io::Result<PassLog> {
        let (log_path, stats_path) = match folder {
            Some(folder) => {
                let log_path = folder.join(format!("{}_solver_log.txt", label));
                let mut file = File::create(&log_path)?;
                writeln!(file, "=== Solution Log ({}) ===", label)?;
                writeln!(file, "Started: {}", chrono::Local::now().to_rfc3339())?;
                writeln!(file, "--------------------")?;
                (
                    Some(log_path),
                    Some(folder.join(format!("{}_solver_stats.txt", label))),
                )
            }
            None => (None, None),
        };
        Ok(PassLog {
            log_path,
            stats_path,
            started: Instant::now(),
            label: label.to_owned(),
        })
    }

    /// Append the outcome line of the pass to the log file
    pub fn record_outcome(&mut self, response: &CpSolverResponse) {
        let Some(path) = self.log_path.as_ref() else {
            return;
        };
        let elapsed = self.started.elapsed().as_secs_f64();
        let line = format!(
            "{}: penalty = {:.0}, time = {}, bound = {:.0}, gap: {:.1}% | branches: {}, conflicts: {}",
            self.label,
            response.objective_value,
            format_elapsed(elapsed),
            response.best_objective_bound,
            relative_gap_percent(response),
            response.num_branches,
            response.num_conflicts,
        );
        if let Err(e) = append_line(path, &line) {
            warn!("Could not append to solver log {}: {}", path.display(), e);
        }
    }

    /// Write the per-pass statistics summary
    pub fn write_stats_summary(&self, response: &CpSolverResponse) {
        let Some(path) = self.stats_path.as_ref() else {
            return;
        };
        let wall = if response.wall_time > 0.0 {
            response.wall_time
        } else {
            self.started.elapsed().as_secs_f64()
        };
        let branches_per_sec = response.num_branches as f64 / wall.max(1e-9);
        let conflicts_per_sec = response.num_conflicts as f64 / wall.max(1e-9);

        let result = File::create(path).and_then(|mut f| {
            writeln!(f, "{}", "=".repeat(72))?;
            writeln!(f, "SOLVER STATISTICS ({})", self.label)?;
            writeln!(f, "{}", "=".repeat(72))?;
            writeln!(f)?;
            writeln!(f, "Wall time:      {:>12.1}s", wall)?;
            writeln!(f, "Objective:      {:>12.0}", response.objective_value)?;
            writeln!(f, "Best bound:     {:>12.0}", response.best_objective_bound)?;
            writeln!(f, "Relative gap:   {:>11.1}%", relative_gap_percent(response))?;
            writeln!(f, "Branches:       {:>12}", response.num_branches)?;
            writeln!(f, "Conflicts:      {:>12}", response.num_conflicts)?;
            writeln!(f, "Branch rate:    {:>12.0} br/s", branches_per_sec)?;
            writeln!(f, "Conflict rate:  {:>12.0} cf/s", conflicts_per_sec)?;
            if relative_gap_percent(response) < 0.1 {
                writeln!(f)?;
                writeln!(f, "Bound met; no plateau.")?;
            } else if conflicts_per_sec > branches_per_sec * 0.5 {
                writeln!(f)?;
                writeln!(f, "[WARNING] High conflict rate - solver struggling near the bound")?;
            }
            Ok(())
        });
        if let Err(e) = result {
            warn!("Could not write solver statistics {}: {}", path.display(), e);
        }
    }
}

fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new().append(true).open(path)?;
    writeln!(file, "{}", line)
}

fn relative_gap_percent(response: &CpSolverResponse) -> f64 {
    let objective = response.objective_value;
    let bound = response.best_objective_bound;
    if objective.abs() < f64::EPSILON {
        0.0
    } else {
        ((objective - bound).abs() / objective.abs()) * 100.0
    }
}

fn format_elapsed(seconds: f64) -> String {
    let total = seconds as u64;
    let (hours, minutes, secs) = (total / 3600, (total % 3600) / 60, total % 60);
    let mut parts = Vec::new();
    if hours > 0 {
        parts.push(format!("{}h", hours));
    }
    if minutes > 0 {
        parts.push(format!("{}m", minutes));
    }
    parts.push(format!("{}s", secs));
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::format_elapsed;

    #[test]
    fn formats_elapsed_like_the_log() {
        assert_eq!(format_elapsed(12.4), "12s");
        assert_eq!(format_elapsed(75.0), "1m 15s");
        assert_eq!(format_elapsed(3675.0), "1h 1m 15s");
    }
}
