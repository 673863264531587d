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

//! SQLite export of the solved timetable.
//!
//! Writes one self-contained database per pass: the sections with their resources and
//! populations, the active meetings, and the extracted violation values. An export failure never
//! touches the solution in memory; the caller logs it and moves on.

use std::path::Path;

use rusqlite::{params, Connection};

use crate::config::Config;
use crate::error::SchedulerError;
use crate::solver::ScheduleSolution;
use crate::Dataset;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS run_info (
        key   TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS sections (
        subject_id     INTEGER NOT NULL,
        section        INTEGER NOT NULL,
        subject_code   TEXT NOT NULL,
        faculty_id     TEXT,
        faculty_name   TEXT,
        room_id        TEXT,
        total_students INTEGER NOT NULL,
        has_batch      INTEGER NOT NULL,
        PRIMARY KEY (subject_id, section)
    );
    CREATE TABLE IF NOT EXISTS meetings (
        subject_id       INTEGER NOT NULL,
        section          INTEGER NOT NULL,
        day              INTEGER NOT NULL,
        day_label        TEXT NOT NULL,
        start_minutes    INTEGER NOT NULL,
        end_minutes      INTEGER NOT NULL,
        duration_minutes INTEGER NOT NULL,
        PRIMARY KEY (subject_id, section, day)
    );
    CREATE TABLE IF NOT EXISTS section_batches (
        subject_id INTEGER NOT NULL,
        section    INTEGER NOT NULL,
        batch_id   TEXT NOT NULL,
        population INTEGER NOT NULL,
        PRIMARY KEY (subject_id, section, batch_id)
    );
    CREATE TABLE IF NOT EXISTS violations (
        family TEXT NOT NULL,
        entity TEXT NOT NULL,
        day    TEXT,
        amount INTEGER NOT NULL
    );
";

fn export_err(e: rusqlite::Error) -> SchedulerError {
    SchedulerError::Export(e.to_string())
}

/// Write the full schedule view into a SQLite database at `path`
pub fn save_schedule(
    path: &Path,
    solution: &ScheduleSolution,
    dataset: &Dataset,
    config: &Config,
) -> Result<(), SchedulerError> {
    let mut conn = Connection::open(path).map_err(export_err)?;
    conn.execute_batch(SCHEMA).map_err(export_err)?;
    let tx = conn.transaction().map_err(export_err)?;

    for (key, value) in [
        ("status", solution.status.to_string()),
        (
            "structural_objective",
            solution.structural_objective.to_string(),
        ),
        (
            "preference_objective",
            solution
                .preference_objective
                .map(|p| p.to_string())
                .unwrap_or_else(|| "null".to_owned()),
        ),
        (
            "dummy_faculty_index",
            solution.dummy_faculty_index.to_string(),
        ),
        ("dummy_room_index", solution.dummy_room_index.to_string()),
        ("exported_at", chrono::Local::now().to_rfc3339()),
    ] {
        tx.execute(
            "INSERT OR REPLACE INTO run_info (key, value) VALUES (?1, ?2)",
            params![key, value],
        )
        .map_err(export_err)?;
    }

    for (key, section) in solution.sections.iter() {
        let subject_code = dataset
            .subject(key.0)
            .map(|s| s.subject_code.clone())
            .unwrap_or_default();
        let (faculty_id, faculty_name) = match section.faculty {
            Some(f) => (
                Some(dataset.faculty[f].id.clone()),
                Some(dataset.faculty[f].name.clone()),
            ),
            None => (None, None),
        };
        let room_id = section.room.map(|r| dataset.rooms[r].room_id.clone());
        tx.execute(
            "INSERT OR REPLACE INTO sections \
             (subject_id, section, subject_code, faculty_id, faculty_name, room_id, total_students, has_batch) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                key.0,
                key.1,
                subject_code,
                faculty_id,
                faculty_name,
                room_id,
                section.total_students,
                section.has_batch as i64,
            ],
        )
        .map_err(export_err)?;

        for meeting in section.meetings.iter().filter(|m| m.active) {
            tx.execute(
                "INSERT OR REPLACE INTO meetings \
                 (subject_id, section, day, day_label, start_minutes, end_minutes, duration_minutes) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    key.0,
                    key.1,
                    meeting.day,
                    config
                        .scheduling_days
                        .get(meeting.day)
                        .cloned()
                        .unwrap_or_default(),
                    meeting.start,
                    meeting.end(),
                    meeting.duration,
                ],
            )
            .map_err(export_err)?;
        }

        for (b_idx, population) in section.batch_populations.iter() {
            tx.execute(
                "INSERT OR REPLACE INTO section_batches (subject_id, section, batch_id, population) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![key.0, key.1, dataset.batches[*b_idx].batch_id, population],
            )
            .map_err(export_err)?;
        }
    }

    write_violations(&tx, solution, dataset, config)?;

    tx.commit().map_err(export_err)?;
    Ok(())
}

fn write_violations(
    tx: &rusqlite::Transaction,
    solution: &ScheduleSolution,
    dataset: &Dataset,
    config: &Config,
) -> Result<(), SchedulerError> {
    let violations = &solution.violations;
    let insert = |family: &str, entity: String, day: Option<String>, amount: i64| {
        tx.execute(
            "INSERT INTO violations (family, entity, day, amount) VALUES (?1, ?2, ?3, ?4)",
            params![family, entity, day, amount],
        )
        .map(|_| ())
        .map_err(export_err)
    };

    let section_label = |key: &(i64, u32)| format!("{}/{}", key.0, key.1);
    for (key, value) in violations.dummy_faculty.iter().filter(|(_, v)| **v) {
        insert("dummy_faculty", section_label(key), None, *value as i64)?;
    }
    for (key, value) in violations.dummy_room.iter().filter(|(_, v)| **v) {
        insert("dummy_room", section_label(key), None, *value as i64)?;
    }
    for (key, value) in violations.duration.iter().filter(|(_, v)| **v) {
        insert("duration", section_label(key), None, *value as i64)?;
    }
    for ((f, day), value) in violations.faculty_day_gaps.iter().filter(|(_, v)| **v) {
        insert(
            "faculty_day_gap",
            dataset.faculty[*f].id.clone(),
            Some(config.scheduling_days[*day].clone()),
            *value as i64,
        )?;
    }
    for ((b, day), value) in violations.batch_day_gaps.iter().filter(|(_, v)| **v) {
        insert(
            "batch_day_gap",
            dataset.batches[*b].batch_id.clone(),
            Some(config.scheduling_days[*day].clone()),
            *value as i64,
        )?;
    }
    for (f, minutes) in violations.faculty_overload.iter().filter(|(_, v)| **v > 0) {
        insert("faculty_overload", dataset.faculty[*f].id.clone(), None, *minutes)?;
    }
    for (f, minutes) in violations.faculty_underfill.iter().filter(|(_, v)| **v > 0) {
        insert("faculty_underfill", dataset.faculty[*f].id.clone(), None, *minutes)?;
    }
    for (key, students) in violations.section_overfill.iter().filter(|(_, v)| **v > 0) {
        insert("section_overfill", section_label(key), None, *students)?;
    }
    for (key, students) in violations.section_underfill.iter().filter(|(_, v)| **v > 0) {
        insert("section_underfill", section_label(key), None, *students)?;
    }
    for (key, students) in violations.room_overcapacity.iter().filter(|(_, v)| **v > 0) {
        insert("room_overcapacity", section_label(key), None, *students)?;
    }
    for ((f, subject_id, s), value) in violations.non_preferred.iter().filter(|(_, v)| **v) {
        insert(
            "non_preferred_subject",
            format!("{}:{}/{}", dataset.faculty[*f].id, subject_id, s),
            None,
            *value as i64,
        )?;
    }
    for ((f, day), slots) in violations.faculty_under_minimum_block.iter() {
        let amount: i64 = slots.iter().sum();
        if amount > 0 {
            insert(
                "faculty_under_minimum_block",
                dataset.faculty[*f].id.clone(),
                Some(config.scheduling_days[*day].clone()),
                amount,
            )?;
        }
    }
    for ((b, day), slots) in violations.batch_under_minimum_block.iter() {
        let amount: i64 = slots.iter().sum();
        if amount > 0 {
            insert(
                "batch_under_minimum_block",
                dataset.batches[*b].batch_id.clone(),
                Some(config.scheduling_days[*day].clone()),
                amount,
            )?;
        }
    }
    for ((f, day), slots) in violations.faculty_excess_gaps.iter() {
        let amount: i64 = slots.iter().sum();
        if amount > 0 {
            insert(
                "faculty_excess_gap",
                dataset.faculty[*f].id.clone(),
                Some(config.scheduling_days[*day].clone()),
                amount,
            )?;
        }
    }
    for ((b, day), slots) in violations.batch_excess_gaps.iter() {
        let amount: i64 = slots.iter().sum();
        if amount > 0 {
            insert(
                "batch_excess_gap",
                dataset.batches[*b].batch_id.clone(),
                Some(config.scheduling_days[*day].clone()),
                amount,
            )?;
        }
    }

    Ok(())
}
