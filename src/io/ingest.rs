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

//! CSV ingestion and input normalization.
//!
//! One reader per input table, header-based. The lookup tables and the two window tables
//! (`banned_times.csv`, `external_meetings.csv`) are optional: a missing or unreadable file is
//! logged and treated as empty. Everything else is required and aborts the run when absent.
//!
//! Normalization performed here: load units ×3 into hours, unit counts into weekly minutes,
//! semicolon-separated id lists into sets, `HH:MM` wall times into minutes (banned windows
//! additionally into slot indices), zero-population batches dropped, subject type names resolved
//! for lab detection, and ideal section counts derived from total enrollment.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use log::{debug, info, warn};
use serde::Deserialize;

use crate::config::Config;
use crate::error::SchedulerError;
use crate::{
    Batch, BannedWindow, Dataset, ExternalMeeting, Faculty, Room, RoomType, Subject, SubjectType,
};

#[derive(Debug, Deserialize)]
struct LookupRow {
    id: i64,
    name: String,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FacultyRow {
    faculty_id: String,
    name: String,
    max_load: i64,
    min_load: i64,
    #[serde(default)]
    qualified_subjects: Option<String>,
    #[serde(default)]
    preferred_subjects: Option<String>,
    #[serde(default)]
    max_subjects: Option<i64>,
    #[serde(default)]
    id: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RoomRow {
    room_id: String,
    capacity: i64,
    room_type_id: i64,
    #[serde(default)]
    id: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct SubjectRow {
    id: i64,
    subject_code: String,
    lecture_units: f64,
    lab_units: f64,
    #[serde(default)]
    max_enrollment: Option<i64>,
    #[serde(default)]
    min_enrollment: Option<i64>,
    #[serde(default)]
    min_meetings: Option<i64>,
    #[serde(default)]
    max_meetings: Option<i64>,
    #[serde(default)]
    subject_type_id: Option<i64>,
    #[serde(default)]
    room_type_id: Option<i64>,
    #[serde(default)]
    linked_subject_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct BatchRow {
    batch_id: String,
    program_id: String,
    population: i64,
    #[serde(default)]
    enrolled_subjects: Option<String>,
    #[serde(default)]
    id: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct WindowRow {
    batch_id: String,
    day: String,
    start_time: String,
    end_time: String,
    #[serde(default)]
    event_name: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

/// Parse a semicolon-separated id list ("12;7; 9")
fn parse_id_list(raw: Option<&str>) -> Vec<i64> {
    raw.unwrap_or("")
        .split(';')
        .filter_map(|part| {
            let part = part.trim();
            if part.is_empty() {
                None
            } else {
                part.parse::<i64>().ok()
            }
        })
        .collect()
}

/// Parse "HH:MM" into minutes from midnight
fn parse_hhmm(raw: &str) -> Option<u32> {
    let (h, m) = raw.trim().split_once(':')?;
    let hours: u32 = h.trim().parse().ok()?;
    let minutes: u32 = m.trim().parse().ok()?;
    if hours < 24 && minutes < 60 {
        Some(hours * 60 + minutes)
    } else {
        None
    }
}

fn read_rows<T: for<'de> Deserialize<'de>, R: Read>(reader: R) -> Result<Vec<T>, csv::Error> {
    csv::Reader::from_reader(reader).deserialize().collect()
}

/// Read an optional table: a missing or unparsable file is logged and yields no rows
fn read_optional_rows<T: for<'de> Deserialize<'de>>(path: &Path) -> Vec<T> {
    match std::fs::File::open(path) {
        Err(_) => {
            warn!(
                "{} not found. Continuing without it.",
                path.display()
            );
            Vec::new()
        }
        Ok(file) => match read_rows(file) {
            Ok(rows) => {
                info!("Loaded {} ({} rows)", path.display(), rows.len());
                rows
            }
            Err(e) => {
                warn!(
                    "Could not parse {}: {}. Continuing without it.",
                    path.display(),
                    e
                );
                Vec::new()
            }
        },
    }
}

fn read_required_rows<T: for<'de> Deserialize<'de>>(
    path: &Path,
    table: &str,
) -> Result<Vec<T>, SchedulerError> {
    let file = std::fs::File::open(path).map_err(|e| SchedulerError::ingest(table, e))?;
    let rows = read_rows(file).map_err(|e| SchedulerError::ingest(table, e))?;
    info!("Loaded {} ({} rows)", path.display(), rows.len());
    Ok(rows)
}

/// Load and normalize the full dataset from a data directory
pub fn load_dataset(data_dir: &Path, config: &Config) -> Result<Dataset, SchedulerError> {
    let room_type_rows: Vec<LookupRow> = read_optional_rows(&data_dir.join("room_types.csv"));
    let subject_type_rows: Vec<LookupRow> =
        read_optional_rows(&data_dir.join("subject_types.csv"));
    let faculty_rows: Vec<FacultyRow> =
        read_required_rows(&data_dir.join("faculty.csv"), "faculty")?;
    let room_rows: Vec<RoomRow> = read_required_rows(&data_dir.join("rooms.csv"), "rooms")?;
    let subject_rows: Vec<SubjectRow> =
        read_required_rows(&data_dir.join("subjects.csv"), "subjects")?;
    let batch_rows: Vec<BatchRow> =
        read_required_rows(&data_dir.join("student_batches.csv"), "student_batches")?;
    let banned_rows: Vec<WindowRow> = read_optional_rows(&data_dir.join("banned_times.csv"));
    let external_rows: Vec<WindowRow> =
        read_optional_rows(&data_dir.join("external_meetings.csv"));

    build_dataset(
        config,
        room_type_rows,
        subject_type_rows,
        faculty_rows,
        room_rows,
        subject_rows,
        batch_rows,
        banned_rows,
        external_rows,
    )
}

#[allow(clippy::too_many_arguments)]
fn build_dataset(
    config: &Config,
    room_type_rows: Vec<LookupRow>,
    subject_type_rows: Vec<LookupRow>,
    faculty_rows: Vec<FacultyRow>,
    room_rows: Vec<RoomRow>,
    subject_rows: Vec<SubjectRow>,
    batch_rows: Vec<BatchRow>,
    banned_rows: Vec<WindowRow>,
    external_rows: Vec<WindowRow>,
) -> Result<Dataset, SchedulerError> {
    let room_types: Vec<RoomType> = room_type_rows
        .into_iter()
        .map(|r| RoomType {
            id: r.id,
            name: r.name,
            description: r.description,
        })
        .collect();
    let subject_types: Vec<SubjectType> = subject_type_rows
        .into_iter()
        .map(|r| SubjectType {
            id: r.id,
            name: r.name,
            description: r.description,
        })
        .collect();
    let subject_type_names: BTreeMap<i64, String> = subject_types
        .iter()
        .map(|t| (t.id, t.name.clone()))
        .collect();

    let faculty: Vec<Faculty> = faculty_rows
        .into_iter()
        .map(|row| Faculty {
            id: row.faculty_id,
            name: row.name,
            max_hours: (row.max_load.max(0) * 3) as u32,
            min_hours: (row.min_load.max(0) * 3) as u32,
            qualified_subject_ids: parse_id_list(row.qualified_subjects.as_deref())
                .into_iter()
                .collect(),
            preferred_subject_ids: parse_id_list(row.preferred_subjects.as_deref())
                .into_iter()
                .collect(),
            max_subjects: row.max_subjects.filter(|m| *m > 0).map(|m| m as u32),
            row_id: row.id,
        })
        .collect();

    let rooms: Vec<Room> = room_rows
        .into_iter()
        .map(|row| Room {
            room_id: row.room_id,
            capacity: row.capacity.max(0) as u32,
            room_type_id: row.room_type_id,
            row_id: row.id,
        })
        .collect();

    let mut subjects_map: BTreeMap<i64, Subject> = BTreeMap::new();
    for row in subject_rows {
        let subject_type_name = row
            .subject_type_id
            .and_then(|id| subject_type_names.get(&id).cloned());
        subjects_map.insert(
            row.id,
            Subject {
                subject_id: row.id,
                subject_code: row.subject_code,
                required_weekly_minutes: config.weekly_minutes(row.lecture_units, row.lab_units),
                ideal_num_sections: 0,
                enrolling_batch_ids: Vec::new(),
                subject_type_id: row.subject_type_id,
                subject_type_name,
                linked_subject_id: row.linked_subject_id,
                room_type_id: row.room_type_id,
                max_enrollment: row.max_enrollment.filter(|m| *m > 0).map(|m| m as u32),
                min_enrollment: row.min_enrollment.filter(|m| *m > 0).map(|m| m as u32),
                min_meetings: row.min_meetings.filter(|m| *m >= 0).map(|m| m as u32),
                max_meetings: row.max_meetings.filter(|m| *m >= 0).map(|m| m as u32),
                row_id: Some(row.id),
            },
        );
    }

    // Window tables, grouped per batch. Day labels come from the configuration; rows with an
    // unknown label are skipped.
    let day_index: BTreeMap<String, usize> = config
        .scheduling_days
        .iter()
        .enumerate()
        .map(|(i, d)| (d.to_uppercase(), i))
        .collect();

    let mut banned_by_batch: BTreeMap<String, Vec<BannedWindow>> = BTreeMap::new();
    for row in banned_rows {
        let Some(day_idx) = day_index.get(&row.day.to_uppercase()).copied() else {
            debug!("Skipping banned time with unknown day {:?}", row.day);
            continue;
        };
        let (Some(start), Some(end)) = (parse_hhmm(&row.start_time), parse_hhmm(&row.end_time))
        else {
            debug!("Skipping banned time with unparsable times for {}", row.batch_id);
            continue;
        };
        let granularity = config.time_granularity_minutes;
        let day_start = config.day_start_minutes;
        let start_slot =
            (start.max(day_start) - day_start) / granularity;
        let end_slot = (end.max(day_start) - day_start).div_ceil(granularity);
        let end_slot = (end_slot as usize).min(config.slots_for_day(day_idx));
        if (start_slot as usize) < end_slot {
            banned_by_batch.entry(row.batch_id).or_default().push(BannedWindow {
                day_index: day_idx,
                start_slot: start_slot as usize,
                end_slot,
            });
        }
    }

    let mut external_by_batch: BTreeMap<String, Vec<ExternalMeeting>> = BTreeMap::new();
    for row in external_rows {
        let Some(day_idx) = day_index.get(&row.day.to_uppercase()).copied() else {
            debug!("Skipping external meeting with unknown day {:?}", row.day);
            continue;
        };
        let (Some(start), Some(end)) = (parse_hhmm(&row.start_time), parse_hhmm(&row.end_time))
        else {
            debug!(
                "Skipping external meeting with unparsable times for {}",
                row.batch_id
            );
            continue;
        };
        if start < end {
            external_by_batch
                .entry(row.batch_id)
                .or_default()
                .push(ExternalMeeting {
                    day_index: day_idx,
                    start_minutes: start,
                    end_minutes: end,
                    event_name: row
                        .event_name
                        .filter(|n| !n.trim().is_empty())
                        .unwrap_or_else(|| "External Meeting".to_owned()),
                    description: row.description.unwrap_or_default(),
                });
        }
    }

    let mut batches: Vec<Batch> = Vec::new();
    for row in batch_rows {
        if row.population <= 0 {
            warn!(
                "Dropping batch {} with population {}",
                row.batch_id, row.population
            );
            continue;
        }
        let subject_ids: Vec<i64> = parse_id_list(row.enrolled_subjects.as_deref())
            .into_iter()
            .filter(|sid| subjects_map.contains_key(sid))
            .collect();
        for sid in subject_ids.iter() {
            subjects_map
                .get_mut(sid)
                .expect("filtered to known subjects")
                .enrolling_batch_ids
                .push(row.batch_id.clone());
        }
        batches.push(Batch {
            banned_windows: banned_by_batch.remove(&row.batch_id).unwrap_or_default(),
            external_meetings: external_by_batch.remove(&row.batch_id).unwrap_or_default(),
            batch_id: row.batch_id,
            program_id: row.program_id,
            population: row.population as u32,
            subject_ids,
            row_id: row.id,
        });
    }

    // Ideal section counts from total enrollment against the effective section size
    for sub in subjects_map.values_mut() {
        let total_enrollment: u32 = batches
            .iter()
            .filter(|b| b.subject_ids.contains(&sub.subject_id))
            .map(|b| b.population)
            .sum();
        if total_enrollment > 0 {
            let max_size = sub.effective_max_enrollment();
            sub.ideal_num_sections = total_enrollment.div_ceil(max_size);
        }
    }

    let subjects: Vec<Subject> = subjects_map.into_values().collect();
    info!(
        "Found {} subjects, {} rooms, {} faculty and {} batches for timetabling.",
        subjects.len(),
        rooms.len(),
        faculty.len(),
        batches.len()
    );

    Ok(Dataset {
        subjects,
        rooms,
        faculty,
        batches,
        room_types,
        subject_types,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn test_config() -> Config {
        Config::from_reader(crate::config::SAMPLE_CONFIG.as_bytes()).unwrap()
    }

    fn build(
        config: &Config,
        faculty: &str,
        rooms: &str,
        subjects: &str,
        batches: &str,
        banned: &str,
        external: &str,
    ) -> Dataset {
        build_dataset(
            config,
            read_rows("id,name,description\n1,Lecture Room,\n2,Laboratory,\n".as_bytes()).unwrap(),
            read_rows("id,name\n1,Lecture\n2,Computer Lab\n".as_bytes()).unwrap(),
            read_rows(faculty.as_bytes()).unwrap(),
            read_rows(rooms.as_bytes()).unwrap(),
            read_rows(subjects.as_bytes()).unwrap(),
            read_rows(batches.as_bytes()).unwrap(),
            read_rows(banned.as_bytes()).unwrap(),
            read_rows(external.as_bytes()).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn normalizes_a_small_dataset() {
        let config = test_config();
        let dataset = build(
            &config,
            "faculty_id,name,max_load,min_load,qualified_subjects,preferred_subjects,max_subjects,id\n\
             F1,Prof. One,7,2,1;2,1,3,10\n",
            "room_id,capacity,room_type_id,id\nR101,40,1,1\n",
            "id,subject_code,lecture_units,lab_units,max_enrollment,min_enrollment,min_meetings,max_meetings,subject_type_id,room_type_id,linked_subject_id\n\
             1,CS 101,3,0,40,10,2,3,1,1,\n\
             2,CS 101L,0,1,40,10,1,1,2,2,1\n",
            "batch_id,program_id,population,enrolled_subjects,id\nBSCS-1A,BSCS,30,1;2,1\n",
            "batch_id,day,start_time,end_time\nBSCS-1A,MON,12:00,13:00\n",
            "batch_id,day,start_time,end_time,event_name,description\n\
             BSCS-1A,TUE,10:00,11:00,Assembly,Weekly assembly\n",
        );

        // Loads ×3 into hours
        assert_eq!(dataset.faculty[0].max_hours, 21);
        assert_eq!(dataset.faculty[0].min_hours, 6);
        assert_eq!(
            dataset.faculty[0].qualified_subject_ids,
            [1, 2].into_iter().collect()
        );

        // Unit counts into weekly minutes: 3 lecture units = 180, 1 lab unit = 180
        let cs101 = dataset.subject(1).unwrap();
        assert_eq!(cs101.required_weekly_minutes, 180);
        assert_eq!(cs101.ideal_num_sections, 1);
        let lab = dataset.subject(2).unwrap();
        assert_eq!(lab.required_weekly_minutes, 180);
        assert!(lab.is_lab());
        assert_eq!(lab.canonical_subject_id(), 1);

        // Windows resolved to the batch
        let batch = &dataset.batches[0];
        assert_eq!(batch.banned_windows.len(), 1);
        // 12:00-13:00 at 10-minute slots from a 08:00 day start
        assert_eq!(batch.banned_windows[0].start_slot, 24);
        assert_eq!(batch.banned_windows[0].end_slot, 30);
        assert_eq!(batch.external_meetings.len(), 1);
        assert_eq!(batch.external_meetings[0].event_name, "Assembly");
        assert_eq!(batch.external_meetings[0].start_minutes, 600);

        // Enrollment back-references
        assert_eq!(cs101.enrolling_batch_ids, vec!["BSCS-1A".to_owned()]);
    }

    #[test]
    fn drops_batches_without_population() {
        let config = test_config();
        let dataset = build(
            &config,
            "faculty_id,name,max_load,min_load,qualified_subjects,preferred_subjects\n\
             F1,Prof. One,7,0,1,\n",
            "room_id,capacity,room_type_id\nR101,40,1\n",
            "id,subject_code,lecture_units,lab_units,min_meetings,max_meetings\n\
             1,CS 101,3,0,2,3\n",
            "batch_id,program_id,population,enrolled_subjects\n\
             GHOST,BSCS,0,1\nREAL,BSCS,25,1\n",
            "batch_id,day,start_time,end_time\n",
            "batch_id,day,start_time,end_time,event_name,description\n",
        );
        assert_eq!(dataset.batches.len(), 1);
        assert_eq!(dataset.batches[0].batch_id, "REAL");
    }

    #[test]
    fn splits_large_enrollment_into_sections() {
        let config = test_config();
        let dataset = build(
            &config,
            "faculty_id,name,max_load,min_load,qualified_subjects,preferred_subjects\n\
             F1,Prof. One,7,0,1,\n",
            "room_id,capacity,room_type_id\nR101,40,1\n",
            "id,subject_code,lecture_units,lab_units,max_enrollment,min_meetings,max_meetings\n\
             1,GE 5,3,0,40,2,3\n",
            "batch_id,program_id,population,enrolled_subjects\n\
             A,P,40,1\nB,P,35,1\nC,P,20,1\n",
            "batch_id,day,start_time,end_time\n",
            "batch_id,day,start_time,end_time,event_name,description\n",
        );
        // 95 students over sections of 40
        assert_eq!(dataset.subject(1).unwrap().ideal_num_sections, 3);
    }

    #[test]
    fn parses_time_and_id_helpers() {
        assert_eq!(parse_hhmm("08:30"), Some(510));
        assert_eq!(parse_hhmm("23:59"), Some(1439));
        assert_eq!(parse_hhmm("24:00"), None);
        assert_eq!(parse_hhmm("garbage"), None);
        assert_eq!(parse_id_list(Some("1; 2;;3")), vec![1, 2, 3]);
        assert!(parse_id_list(None).is_empty());
    }
}
