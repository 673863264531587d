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

//! Human-readable violation report.
//!
//! One text file per pass: the structural section first (unassigned resources and missing
//! minutes, filtered to used sections), then day gaps, loads, section fills, the streak-based
//! families and non-preferred assignments, each with a subtotal and a grand total at the end.
//! Unused sections are expected to carry dummy resources and are not reported.

use std::collections::BTreeMap;
use std::io::Write;

use crate::config::Config;
use crate::prefilter::RemovedSubject;
use crate::solver::{ScheduleSolution, SectionKey};
use crate::Dataset;

use super::{consecutive_ranges, format_duration, format_time};

const RULE: &str = "============================================================";

/// Write the violation report. Returns the per-section subtotals and the grand total.
pub fn write_report<W: Write>(
    mut out: W,
    solution: &ScheduleSolution,
    dataset: &Dataset,
    config: &Config,
    removed_subjects: &[RemovedSubject],
) -> std::io::Result<(BTreeMap<String, i64>, i64)> {
    let mut totals: BTreeMap<String, i64> = BTreeMap::new();

    let structural = write_structural(&mut out, solution, dataset)?;
    totals.insert("structural".to_owned(), structural);

    let day_gaps = write_day_gaps(&mut out, solution, dataset, config)?;
    totals.insert("day_gaps".to_owned(), day_gaps);

    let loads = write_faculty_loads(&mut out, solution, dataset)?;
    totals.insert("faculty_load".to_owned(), loads);

    let fills = write_section_fills(&mut out, solution, dataset)?;
    totals.insert("section_fill".to_owned(), fills);

    let gaps = write_slot_family(
        &mut out,
        solution,
        dataset,
        config,
        "EXCESS GAPS (LONGER THAN THE MAXIMUM)",
        &solution.violations.faculty_excess_gaps,
        &solution.violations.batch_excess_gaps,
    )?;
    totals.insert("excess_gaps".to_owned(), gaps);

    let blocks = write_slot_family(
        &mut out,
        solution,
        dataset,
        config,
        "UNDER-MINIMUM CLASS BLOCKS",
        &solution.violations.faculty_under_minimum_block,
        &solution.violations.batch_under_minimum_block,
    )?;
    totals.insert("under_minimum_blocks".to_owned(), blocks);

    let non_preferred = write_non_preferred(&mut out, solution, dataset)?;
    totals.insert("non_preferred".to_owned(), non_preferred);

    if !removed_subjects.is_empty() {
        writeln!(out, "{}", RULE)?;
        writeln!(out, "SUBJECTS REMOVED BEFORE SOLVING")?;
        writeln!(out, "{}", RULE)?;
        for removed in removed_subjects {
            writeln!(out, "{}", removed)?;
        }
        writeln!(out)?;
    }

    let grand_total: i64 = totals.values().sum();
    writeln!(out, "{}", RULE)?;
    writeln!(out, "GRAND TOTAL: {}", grand_total)?;
    for (family, value) in totals.iter() {
        writeln!(out, "  {:<24} {}", family, value)?;
    }
    writeln!(
        out,
        "Structural objective: {} | Preference objective: {}",
        solution.structural_objective,
        solution
            .preference_objective
            .map(|p| p.to_string())
            .unwrap_or_else(|| "n/a".to_owned())
    )?;

    Ok((totals, grand_total))
}

fn subject_code(dataset: &Dataset, key: &SectionKey) -> String {
    dataset
        .subject(key.0)
        .map(|s| s.subject_code.clone())
        .unwrap_or_else(|| format!("subject {}", key.0))
}

fn write_structural<W: Write>(
    out: &mut W,
    solution: &ScheduleSolution,
    dataset: &Dataset,
) -> std::io::Result<i64> {
    writeln!(out, "{}", RULE)?;
    writeln!(out, "STRUCTURAL VIOLATIONS (UNASSIGNED RESOURCES)")?;
    writeln!(out, "{}", RULE)?;
    writeln!(out, "These are hard constraints that could not be satisfied.")?;
    writeln!(out, "The solver relaxed them to find a feasible solution.")?;
    writeln!(out, "{}", RULE)?;
    writeln!(out)?;

    let mut count = 0i64;
    for (key, section) in solution.sections.iter() {
        if !section.has_batch {
            continue;
        }
        let dummy_faculty = solution.violations.dummy_faculty.get(key).copied().unwrap_or(false);
        let dummy_room = solution.violations.dummy_room.get(key).copied().unwrap_or(false);
        let duration = solution.violations.duration.get(key).copied().unwrap_or(false);
        if !(dummy_faculty || dummy_room || duration) {
            continue;
        }

        let teacher = match (dummy_faculty, section.faculty) {
            (false, Some(f)) => format!("{} Assigned", dataset.faculty[f].name),
            _ => "Teacher Unassigned".to_owned(),
        };
        let room = match (dummy_room, section.room) {
            (false, Some(r)) => dataset.rooms[r].room_id.clone(),
            _ => "Room Unassigned".to_owned(),
        };
        let mut line = format!(
            "{} / section {}: {} | {}",
            subject_code(dataset, key),
            key.1,
            teacher,
            room
        );
        if duration {
            let scheduled: u32 = section
                .meetings
                .iter()
                .filter(|m| m.active)
                .map(|m| m.duration)
                .sum();
            let required = dataset
                .subject(key.0)
                .map(|s| s.required_weekly_minutes)
                .unwrap_or(0);
            line.push_str(&format!(
                " | {} missing ({} < {} required)",
                format_duration(required.saturating_sub(scheduled)),
                scheduled,
                required
            ));
        }
        writeln!(out, "{}", line)?;
        count += dummy_faculty as i64 + dummy_room as i64 + duration as i64;
    }
    writeln!(out, "\nSubtotal: {}\n", count)?;
    Ok(count)
}

fn write_day_gaps<W: Write>(
    out: &mut W,
    solution: &ScheduleSolution,
    dataset: &Dataset,
    config: &Config,
) -> std::io::Result<i64> {
    writeln!(out, "{}", RULE)?;
    writeln!(out, "DAY GAPS (FREE DAY BETWEEN TWO TEACHING DAYS)")?;
    writeln!(out, "{}", RULE)?;

    let mut count = 0i64;
    for ((f_idx, day), gap) in solution.violations.faculty_day_gaps.iter() {
        if *gap {
            writeln!(
                out,
                "Faculty {}: free {} between teaching days",
                dataset.faculty[*f_idx].name, config.scheduling_days[*day]
            )?;
            count += 1;
        }
    }
    for ((b_idx, day), gap) in solution.violations.batch_day_gaps.iter() {
        if *gap {
            writeln!(
                out,
                "Batch {}: free {} between class days",
                dataset.batches[*b_idx].batch_id, config.scheduling_days[*day]
            )?;
            count += 1;
        }
    }
    writeln!(out, "\nSubtotal: {}\n", count)?;
    Ok(count)
}

fn write_faculty_loads<W: Write>(
    out: &mut W,
    solution: &ScheduleSolution,
    dataset: &Dataset,
) -> std::io::Result<i64> {
    writeln!(out, "{}", RULE)?;
    writeln!(out, "FACULTY LOAD (OVERLOAD / BELOW MINIMUM)")?;
    writeln!(out, "{}", RULE)?;

    let mut total = 0i64;
    for (f_idx, minutes) in solution.violations.faculty_overload.iter() {
        if *minutes > 0 {
            writeln!(
                out,
                "{}: {} over the maximum load",
                dataset.faculty[*f_idx].name,
                format_duration(*minutes as u32)
            )?;
            total += minutes;
        }
    }
    for (f_idx, minutes) in solution.violations.faculty_underfill.iter() {
        if *minutes > 0 {
            writeln!(
                out,
                "{}: {} below the minimum load",
                dataset.faculty[*f_idx].name,
                format_duration(*minutes as u32)
            )?;
            total += minutes;
        }
    }
    writeln!(out, "\nSubtotal: {} minutes\n", total)?;
    Ok(total)
}

fn write_section_fills<W: Write>(
    out: &mut W,
    solution: &ScheduleSolution,
    dataset: &Dataset,
) -> std::io::Result<i64> {
    writeln!(out, "{}", RULE)?;
    writeln!(out, "SECTION FILL (OVERFILL / UNDERFILL)")?;
    writeln!(out, "{}", RULE)?;

    let mut total = 0i64;
    for (key, students) in solution.violations.section_overfill.iter() {
        if *students > 0 {
            writeln!(
                out,
                "{} / section {}: {} students over the section maximum",
                subject_code(dataset, key),
                key.1,
                students
            )?;
            total += students;
        }
    }
    for (key, students) in solution.violations.section_underfill.iter() {
        if *students > 0 {
            writeln!(
                out,
                "{} / section {}: {} students short of the minimum of 20",
                subject_code(dataset, key),
                key.1,
                students
            )?;
            total += students;
        }
    }
    for (key, students) in solution.violations.room_overcapacity.iter() {
        if *students > 0 {
            writeln!(
                out,
                "{} / section {}: {} students beyond the room capacity",
                subject_code(dataset, key),
                key.1,
                students
            )?;
            total += students;
        }
    }
    writeln!(out, "\nSubtotal: {} students\n", total)?;
    Ok(total)
}

#[allow(clippy::too_many_arguments)]
fn write_slot_family<W: Write>(
    out: &mut W,
    _solution: &ScheduleSolution,
    dataset: &Dataset,
    config: &Config,
    title: &str,
    faculty_map: &BTreeMap<(usize, usize), Vec<i64>>,
    batch_map: &BTreeMap<(usize, usize), Vec<i64>>,
) -> std::io::Result<i64> {
    writeln!(out, "{}", RULE)?;
    writeln!(out, "{}", title)?;
    writeln!(out, "{}", RULE)?;

    let mut total = 0i64;
    let granularity = config.time_granularity_minutes;
    let mut write_entity =
        |out: &mut W, name: String, day: usize, values: &Vec<i64>| -> std::io::Result<()> {
            let violating: Vec<usize> = values
                .iter()
                .enumerate()
                .filter(|(_, v)| **v > 0)
                .map(|(i, _)| i)
                .collect();
            if violating.is_empty() {
                return Ok(());
            }
            let slot_sum: i64 = values.iter().sum();
            total += slot_sum;
            let ranges: Vec<String> = consecutive_ranges(&violating)
                .into_iter()
                .map(|(a, b)| {
                    format!(
                        "{}-{}",
                        format_time(config.day_start_minutes + a as u32 * granularity),
                        format_time(config.day_start_minutes + (b as u32 + 1) * granularity)
                    )
                })
                .collect();
            writeln!(
                out,
                "{} {}: {} ({} slots, {})",
                name,
                config.scheduling_days[day],
                ranges.join(", "),
                slot_sum,
                format_duration(slot_sum as u32 * granularity)
            )
        };

    for ((f_idx, day), values) in faculty_map.iter() {
        write_entity(out, dataset.faculty[*f_idx].name.clone(), *day, values)?;
    }
    for ((b_idx, day), values) in batch_map.iter() {
        write_entity(
            out,
            format!("Batch {}", dataset.batches[*b_idx].batch_id),
            *day,
            values,
        )?;
    }
    writeln!(out, "\nSubtotal: {} slots\n", total)?;
    Ok(total)
}

fn write_non_preferred<W: Write>(
    out: &mut W,
    solution: &ScheduleSolution,
    dataset: &Dataset,
) -> std::io::Result<i64> {
    writeln!(out, "{}", RULE)?;
    writeln!(out, "NON-PREFERRED SUBJECT ASSIGNMENTS")?;
    writeln!(out, "{}", RULE)?;

    let mut count = 0i64;
    for ((f_idx, subject_id, section), assigned) in solution.violations.non_preferred.iter() {
        if *assigned {
            writeln!(
                out,
                "{}: {} / section {} (qualified, not preferred)",
                dataset.faculty[*f_idx].name,
                subject_code(dataset, &(*subject_id, *section)),
                section
            )?;
            count += 1;
        }
    }
    writeln!(out, "\nSubtotal: {}\n", count)?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::{ScheduleSolution, SectionResult, SolveStatus, ViolationValues};
    use crate::{Batch, Faculty, Room, Subject};
    use std::collections::BTreeMap;

    fn tiny_dataset() -> Dataset {
        Dataset {
            subjects: vec![Subject {
                subject_id: 1,
                subject_code: "CS 101".into(),
                required_weekly_minutes: 180,
                ideal_num_sections: 1,
                enrolling_batch_ids: vec!["B1".into()],
                subject_type_id: None,
                subject_type_name: None,
                linked_subject_id: None,
                room_type_id: None,
                max_enrollment: None,
                min_enrollment: None,
                min_meetings: Some(2),
                max_meetings: Some(3),
                row_id: None,
            }],
            rooms: vec![Room {
                room_id: "R101".into(),
                capacity: 40,
                room_type_id: 1,
                row_id: None,
            }],
            faculty: vec![Faculty {
                id: "F1".into(),
                name: "Prof. One".into(),
                max_hours: 20,
                min_hours: 0,
                qualified_subject_ids: [1].into_iter().collect(),
                preferred_subject_ids: Default::default(),
                max_subjects: None,
                row_id: None,
            }],
            batches: vec![Batch {
                batch_id: "B1".into(),
                program_id: "P".into(),
                population: 30,
                subject_ids: vec![1],
                banned_windows: vec![],
                external_meetings: vec![],
                row_id: None,
            }],
            room_types: vec![],
            subject_types: vec![],
        }
    }

    fn config() -> crate::config::Config {
        crate::config::Config::from_reader(crate::config::SAMPLE_CONFIG.as_bytes()).unwrap()
    }

    #[test]
    fn reports_an_unassigned_section() {
        let dataset = tiny_dataset();
        let mut violations = ViolationValues::default();
        violations.dummy_faculty.insert((1, 0), true);
        violations.dummy_room.insert((1, 0), false);
        violations.duration.insert((1, 0), true);
        let mut sections = BTreeMap::new();
        sections.insert(
            (1, 0),
            SectionResult {
                subject_id: 1,
                section: 0,
                has_batch: true,
                faculty: None,
                room: Some(0),
                batch_populations: [(0usize, 30u32)].into_iter().collect(),
                total_students: 30,
                meetings: vec![],
            },
        );
        let solution = ScheduleSolution {
            status: SolveStatus::Feasible,
            structural_objective: 2,
            preference_objective: None,
            dummy_faculty_index: 1,
            dummy_room_index: 1,
            sections,
            violations,
        };

        let mut buffer = Vec::new();
        let (totals, grand) =
            write_report(&mut buffer, &solution, &dataset, &config(), &[]).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert!(text.contains("Teacher Unassigned"));
        assert!(text.contains("180 < 180") || text.contains("3 hrs missing"));
        assert_eq!(totals["structural"], 2);
        assert_eq!(grand, 2);
    }
}
