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

pub mod db;
pub mod ingest;
pub mod report;

use std::fmt::Write;

use crate::config::Config;
use crate::solver::ScheduleSolution;
use crate::Dataset;

/// Render minutes from midnight as "8:10 AM" / "4:00 PM"
pub fn format_time(minutes: u32) -> String {
    let hours = minutes / 60;
    let mins = minutes % 60;
    let period = if hours < 12 { "AM" } else { "PM" };
    let display_hour = match hours % 12 {
        0 => 12,
        h => h,
    };
    format!("{}:{:02} {}", display_hour, mins, period)
}

/// Render a duration as "2 hrs 30 mins"
pub fn format_duration(minutes: u32) -> String {
    if minutes == 0 {
        return "0 mins".to_owned();
    }
    let hours = minutes / 60;
    let mins = minutes % 60;
    let mut parts = Vec::new();
    match hours {
        0 => {}
        1 => parts.push("1 hr".to_owned()),
        h => parts.push(format!("{} hrs", h)),
    }
    if mins > 0 {
        parts.push(format!("{} mins", mins));
    }
    parts.join(" ")
}

/// Group sorted slot indices into consecutive (first, last) ranges
pub fn consecutive_ranges(slots: &[usize]) -> Vec<(usize, usize)> {
    let mut sorted = slots.to_vec();
    sorted.sort_unstable();
    let mut ranges = Vec::new();
    for slot in sorted {
        match ranges.last_mut() {
            Some((_, end)) if *end + 1 == slot => *end = slot,
            _ => ranges.push((slot, slot)),
        }
    }
    ranges
}

/// Format the solved timetable into a human readable String (e.g. to print it to stdout).
///
/// The output lists every used section with its faculty, room, batches and meeting times:
/// ```text
/// ===== CS 101 / section 0 =====
/// Faculty: Prof. Grace Hopper | Room: R201 | 30 students
/// - batches: BSCS-1A (30)
/// - MON 8:00 AM - 9:30 AM
/// - WED 8:00 AM - 9:30 AM
/// ```
pub fn format_schedule(
    solution: &ScheduleSolution,
    dataset: &Dataset,
    config: &Config,
) -> String {
    let mut result = String::new();
    for (key, section) in solution.sections.iter() {
        if !section.has_batch {
            continue;
        }
        let code = dataset
            .subject(key.0)
            .map(|s| s.subject_code.as_str())
            .unwrap_or("?");
        write!(result, "\n===== {} / section {} =====\n", code, key.1).unwrap();
        let faculty = match section.faculty {
            Some(f) => dataset.faculty[f].name.as_str(),
            None => "UNASSIGNED",
        };
        let room = match section.room {
            Some(r) => dataset.rooms[r].room_id.as_str(),
            None => "UNASSIGNED",
        };
        writeln!(
            result,
            "Faculty: {} | Room: {} | {} students",
            faculty, room, section.total_students
        )
        .unwrap();
        let batches: Vec<String> = section
            .batch_populations
            .iter()
            .map(|(b, pop)| format!("{} ({})", dataset.batches[*b].batch_id, pop))
            .collect();
        writeln!(result, "- batches: {}", batches.join(", ")).unwrap();
        for meeting in section.meetings.iter().filter(|m| m.active) {
            writeln!(
                result,
                "- {} {} - {}",
                config
                    .scheduling_days
                    .get(meeting.day)
                    .map(|d| d.as_str())
                    .unwrap_or("?"),
                format_time(meeting.start),
                format_time(meeting.end())
            )
            .unwrap();
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_times_in_12h_notation() {
        assert_eq!(format_time(480), "8:00 AM");
        assert_eq!(format_time(0), "12:00 AM");
        assert_eq!(format_time(720), "12:00 PM");
        assert_eq!(format_time(1010), "4:50 PM");
    }

    #[test]
    fn formats_durations() {
        assert_eq!(format_duration(0), "0 mins");
        assert_eq!(format_duration(60), "1 hr");
        assert_eq!(format_duration(150), "2 hrs 30 mins");
        assert_eq!(format_duration(40), "40 mins");
    }

    #[test]
    fn groups_consecutive_slots() {
        assert_eq!(
            consecutive_ranges(&[4, 2, 3, 7, 9, 8]),
            vec![(2, 4), (7, 9)]
        );
        assert!(consecutive_ranges(&[]).is_empty());
    }
}
