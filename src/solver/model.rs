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

//! Decision variables and reified indicator maps.
//!
//! Per section this module creates the faculty/room assignment variables (with a dummy sentinel
//! index meaning "unassigned"), the per-batch population split with its whole-batch pick
//! booleans, and the per-day meetings (start, duration, end, active, optional intervals per
//! candidate resource). The reified maps built here, `is_assigned_*` and `active_for_*`, are
//! the vocabulary every later constraint family speaks; they are built once and reused.

use std::collections::BTreeMap;

use cp_sat::builder::{BoolVar, CpModelBuilder, IntVar, IntervalVar, LinearExpr};

use super::grid::{day_end_abs, day_start_abs};
use super::SectionKey;
use crate::config::Config;
use crate::error::SchedulerError;
use crate::{Dataset, Subject};

/// Minimum total scheduled minutes demanded from a section once a real faculty (or room) is
/// assigned: at least one active meeting.
const MIN_ASSIGNED_SECTION_MINUTES: i64 = 1;

// ---------------------------------------------------------------------------
// Small encoding helpers. The grid controllers and constraint modules share them, which keeps
// every boolean combination in the model down to linear constraints plus enforcement literals.

/// A single boolean as a linear expression
pub(crate) fn lin(b: BoolVar) -> LinearExpr {
    [(1, b)].into_iter().collect()
}

/// Sum of booleans as a linear expression
pub(crate) fn bool_sum<I: IntoIterator<Item = BoolVar>>(bools: I) -> LinearExpr {
    bools.into_iter().map(|b| (1, b)).collect()
}

/// Sum of integer variables as a linear expression
pub(crate) fn int_sum<I: IntoIterator<Item = IntVar>>(vars: I) -> LinearExpr {
    vars.into_iter()
        .fold(LinearExpr::from(0), |acc, v| acc + LinearExpr::from(v))
}

/// New boolean y with y ⇔ AND(lits)
pub(crate) fn reify_and(model: &mut CpModelBuilder, lits: &[BoolVar]) -> BoolVar {
    let y = model.new_bool_var();
    for l in lits {
        model.add_le(lin(y), lin(*l));
    }
    let slack = lits.len() as i64 - 1;
    model.add_ge(lin(y), bool_sum(lits.iter().copied()) - slack);
    y
}

/// New boolean y with y ⇔ OR(lits)
pub(crate) fn reify_or(model: &mut CpModelBuilder, lits: &[BoolVar]) -> BoolVar {
    let y = model.new_bool_var();
    for l in lits {
        model.add_ge(lin(y), lin(*l));
    }
    model.add_le(lin(y), bool_sum(lits.iter().copied()));
    y
}

/// New boolean b with b ⇔ (var == value)
pub(crate) fn reify_eq_const(model: &mut CpModelBuilder, var: IntVar, value: i64) -> BoolVar {
    let b = model.new_bool_var();
    model.add_eq(var, value).only_enforce_if(&[b]);
    model.add_ne(var, value).only_enforce_if(&[!b]);
    b
}

/// New integer prod with prod = x·b, encoded through enforcement literals so the solver sees the
/// nonlinearity explicitly
pub(crate) fn bool_times_int(
    model: &mut CpModelBuilder,
    b: BoolVar,
    x: IntVar,
    max: i64,
) -> IntVar {
    let prod = model.new_int_var([(0, max)]);
    model.add_eq(prod, x).only_enforce_if(&[b]);
    model.add_eq(prod, 0i64).only_enforce_if(&[!b]);
    prod
}

// ---------------------------------------------------------------------------

/// Discrete duration set D(sub): candidate per-meeting durations covering the weekly requirement
/// with n = min..=max meetings. Durations below one hour are not offered; 60 itself is the last
/// value kept. Subjects with `max_meetings = 0` (or nothing to schedule) get the singleton {0}.
pub(crate) fn duration_set(sub: &Subject) -> Result<Vec<i64>, SchedulerError> {
    if sub.max_meetings == Some(0) || sub.required_weekly_minutes == 0 {
        return Ok(vec![0]);
    }
    let (min_meetings, max_meetings) = match (sub.min_meetings, sub.max_meetings) {
        (Some(min), Some(max)) => (min.max(1), max),
        _ => {
            return Err(SchedulerError::IncompleteMeetingBounds {
                subject_id: sub.subject_id,
                required_weekly_minutes: sub.required_weekly_minutes,
            })
        }
    };

    let mut durations = Vec::new();
    for n in min_meetings..=max_meetings {
        let d = sub.required_weekly_minutes as i64 / n as i64;
        if d < 60 {
            break;
        }
        if durations.last() != Some(&d) {
            durations.push(d);
        }
        if d == 60 {
            break;
        }
    }
    if durations.is_empty() {
        // Nothing coverable with >= 1h meetings; the duration violation tracker will report it
        durations.push(0);
    }
    durations.sort_unstable();
    Ok(durations)
}

/// All start minutes of a day aligned to the slot width, as a CP domain
fn aligned_start_domain(config: &Config, day_idx: usize) -> Vec<(i64, i64)> {
    let step = config.time_granularity_minutes as i64;
    let mut domain = Vec::new();
    let mut v = day_start_abs(config, day_idx);
    while v <= day_end_abs(config, day_idx) {
        domain.push((v, v));
        v += step;
    }
    domain
}

/// Variables of one meeting (section × day)
pub(crate) struct MeetingVars {
    pub start: IntVar,
    pub duration: IntVar,
    pub end: IntVar,
    pub active: BoolVar,
    /// duration · active
    pub active_minutes: IntVar,
}

/// Variables of one section
pub(crate) struct SectionVars {
    pub assigned_faculty: IntVar,
    pub assigned_room: IntVar,
    pub is_dummy_faculty: BoolVar,
    pub is_dummy_room: BoolVar,
    /// Structural violation booleans, gated by `has_batch`
    pub dummy_faculty_violation: BoolVar,
    pub dummy_room_violation: BoolVar,
    pub duration_violation: BoolVar,
    /// Some batch fully enrolls in this section
    pub has_batch: BoolVar,
    pub total_students: IntVar,
    pub total_minutes: IntVar,
    /// Faculty indices the assignment variable may take (besides the dummy)
    pub candidate_faculty: Vec<usize>,
    /// Room indices the assignment variable may take (besides the dummy)
    pub candidate_rooms: Vec<usize>,
    /// Largest value of the subject's duration set
    pub max_duration: i64,
}

/// Every variable map of the model, keyed deterministically (BTreeMap / sorted vectors) so that
/// two runs with the same seed build an identical model
pub(crate) struct ModelVars {
    pub dummy_faculty_index: usize,
    pub dummy_room_index: usize,
    pub sections: BTreeMap<SectionKey, SectionVars>,
    /// (subject, section, day) -> meeting
    pub meetings: BTreeMap<(i64, u32, usize), MeetingVars>,
    /// (batch, subject, section) -> students of the batch placed into the section
    pub section_pop: BTreeMap<(usize, i64, u32), IntVar>,
    /// (batch, subject, section) -> the batch entirely enrolls in the section
    pub picks: BTreeMap<(usize, i64, u32), BoolVar>,
    /// (faculty, subject, section) -> faculty is assigned
    pub is_assigned_faculty: BTreeMap<(usize, i64, u32), BoolVar>,
    /// (room, subject, section) -> room is assigned
    pub is_assigned_room: BTreeMap<(usize, i64, u32), BoolVar>,
    /// (faculty, subject, section, day) -> assigned and the meeting is active
    pub active_for_faculty: BTreeMap<(usize, i64, u32, usize), BoolVar>,
    /// (batch, subject, section, day) -> picked and the meeting is active
    pub active_for_batch: BTreeMap<(usize, i64, u32, usize), BoolVar>,
    /// (room, subject, section, day) -> assigned and the meeting is active
    pub active_for_room: BTreeMap<(usize, i64, u32, usize), BoolVar>,
    /// duration · active_for_faculty, feeds faculty loads and the ghost conservation law
    pub faculty_minutes: BTreeMap<(usize, i64, u32, usize), IntVar>,
    /// Optional intervals per resource, the per-resource NoOverlap inputs. The ghost controller
    /// appends its ghost intervals to the faculty/batch collections before NoOverlap is applied.
    pub faculty_intervals: Vec<Vec<IntervalVar>>,
    pub batch_intervals: Vec<Vec<IntervalVar>>,
    pub room_intervals: Vec<Vec<IntervalVar>>,
    /// (batch, day) -> fixed external-meeting minutes, trimmed to the day window
    pub external_minutes: BTreeMap<(usize, usize), i64>,
}

/// Build all decision variables and their channeling constraints. Resource NoOverlap is applied
/// separately by [apply_no_overlap] once the controller had the chance to add ghost intervals.
pub(crate) fn build_variables(
    model: &mut CpModelBuilder,
    dataset: &Dataset,
    config: &Config,
) -> Result<ModelVars, SchedulerError> {
    let num_days = config.num_days();
    let dummy_faculty_index = dataset.faculty.len();
    let dummy_room_index = dataset.rooms.len();

    let mut vars = ModelVars {
        dummy_faculty_index,
        dummy_room_index,
        sections: BTreeMap::new(),
        meetings: BTreeMap::new(),
        section_pop: BTreeMap::new(),
        picks: BTreeMap::new(),
        is_assigned_faculty: BTreeMap::new(),
        is_assigned_room: BTreeMap::new(),
        active_for_faculty: BTreeMap::new(),
        active_for_batch: BTreeMap::new(),
        active_for_room: BTreeMap::new(),
        faculty_minutes: BTreeMap::new(),
        faculty_intervals: vec![Vec::new(); dataset.faculty.len()],
        batch_intervals: vec![Vec::new(); dataset.batches.len()],
        room_intervals: vec![Vec::new(); dataset.rooms.len()],
        external_minutes: BTreeMap::new(),
    };

    // Whole-batch pick booleans: per (batch, subject) exactly one section takes the batch, all
    // other sections take zero students of it. This is what keeps batches unsplit.
    for (b_idx, batch) in dataset.batches.iter().enumerate() {
        for sub in dataset.subjects.iter().filter(|s| batch.enrolls(s.subject_id)) {
            let mut picks_of_subject = Vec::new();
            for s in 0..sub.ideal_num_sections {
                let pop = model.new_int_var([(0, batch.population as i64)]);
                let pick = model.new_bool_var();
                model
                    .add_eq(pop, batch.population as i64)
                    .only_enforce_if(&[pick]);
                model.add_eq(pop, 0i64).only_enforce_if(&[!pick]);
                vars.section_pop.insert((b_idx, sub.subject_id, s), pop);
                vars.picks.insert((b_idx, sub.subject_id, s), pick);
                picks_of_subject.push(pick);
            }
            model.add_eq(bool_sum(picks_of_subject), 1i64);
        }
    }

    // External meetings become fixed intervals in the batch's exclusion set, trimmed to the day
    // window and widened to whole slots so they tile exactly against the slot grid. Their
    // minutes also enter the ghost conservation law.
    let granularity = config.time_granularity_minutes as i64;
    for (b_idx, batch) in dataset.batches.iter().enumerate() {
        for ext in batch.external_meetings.iter() {
            if ext.day_index >= num_days {
                continue;
            }
            let origin = day_start_abs(config, ext.day_index);
            let grid_end = origin + config.slots_for_day(ext.day_index) as i64 * granularity;
            let day_offset = ext.day_index as i64 * super::grid::MINUTES_IN_A_DAY;
            let lo = (day_offset + ext.start_minutes as i64).max(origin);
            let hi = (day_offset + ext.end_minutes as i64).min(grid_end);
            if lo >= hi {
                continue;
            }
            let lo = origin + (lo - origin) / granularity * granularity;
            let hi = origin + (hi - origin + granularity - 1) / granularity * granularity;
            let interval = model.new_interval_var(lo, hi - lo, hi);
            vars.batch_intervals[b_idx].push(interval);
            *vars
                .external_minutes
                .entry((b_idx, ext.day_index))
                .or_insert(0) += hi - lo;
        }
    }

    // Per-section variables and meetings
    for sub in dataset.subjects.iter() {
        let durations = duration_set(sub)?;
        let max_duration = *durations.last().unwrap_or(&0);
        let duration_domain: Vec<(i64, i64)> = durations.iter().map(|d| (*d, *d)).collect();
        let unschedulable = durations == [0];

        let candidate_faculty: Vec<usize> = dataset
            .faculty
            .iter()
            .enumerate()
            .filter(|(_, f)| {
                f.qualified_subject_ids.contains(&sub.subject_id)
                    || f.preferred_subject_ids.contains(&sub.subject_id)
            })
            .map(|(f_idx, _)| f_idx)
            .collect();
        let candidate_rooms: Vec<usize> = dataset
            .rooms
            .iter()
            .enumerate()
            .filter(|(_, r)| match sub.room_type_id {
                Some(rt) => r.room_type_id == rt,
                None => true,
            })
            .map(|(r_idx, _)| r_idx)
            .collect();

        let enrolling_batches: Vec<usize> = dataset
            .batches
            .iter()
            .enumerate()
            .filter(|(_, b)| b.enrolls(sub.subject_id))
            .map(|(b_idx, _)| b_idx)
            .collect();
        let max_students: i64 = enrolling_batches
            .iter()
            .map(|b| dataset.batches[*b].population as i64)
            .sum();

        for s in 0..sub.ideal_num_sections {
            let key = (sub.subject_id, s);

            let mut faculty_domain: Vec<(i64, i64)> = candidate_faculty
                .iter()
                .map(|f| (*f as i64, *f as i64))
                .collect();
            faculty_domain.push((dummy_faculty_index as i64, dummy_faculty_index as i64));
            let assigned_faculty = model.new_int_var(faculty_domain);

            let mut room_domain: Vec<(i64, i64)> = candidate_rooms
                .iter()
                .map(|r| (*r as i64, *r as i64))
                .collect();
            room_domain.push((dummy_room_index as i64, dummy_room_index as i64));
            let assigned_room = model.new_int_var(room_domain);

            let is_dummy_faculty =
                reify_eq_const(model, assigned_faculty, dummy_faculty_index as i64);
            let is_dummy_room = reify_eq_const(model, assigned_room, dummy_room_index as i64);

            // Section is used iff some batch picked it
            let section_picks: Vec<BoolVar> = enrolling_batches
                .iter()
                .map(|b| vars.picks[&(*b, sub.subject_id, s)])
                .collect();
            let has_batch = if section_picks.is_empty() {
                let b = model.new_bool_var();
                model.add_eq(lin(b), 0i64);
                b
            } else {
                reify_or(model, &section_picks)
            };

            // Unused sections are forced to the dummy resources; used sections with dummy
            // resources are the actual structural violations.
            model
                .add_eq(assigned_faculty, dummy_faculty_index as i64)
                .only_enforce_if(&[!has_batch]);
            model
                .add_eq(assigned_room, dummy_room_index as i64)
                .only_enforce_if(&[!has_batch]);
            let dummy_faculty_violation = reify_and(model, &[is_dummy_faculty, has_batch]);
            let dummy_room_violation = reify_and(model, &[is_dummy_room, has_batch]);

            let total_students = model.new_int_var([(0, max_students.max(0))]);
            let pops: Vec<IntVar> = enrolling_batches
                .iter()
                .map(|b| vars.section_pop[&(*b, sub.subject_id, s)])
                .collect();
            model.add_eq(total_students, int_sum(pops));

            // Reified assignment maps, and the room capacity rule through them: an assigned room
            // must hold the whole section (the dummy room has no bound).
            for f_idx in candidate_faculty.iter() {
                let b = reify_eq_const(model, assigned_faculty, *f_idx as i64);
                vars.is_assigned_faculty.insert((*f_idx, sub.subject_id, s), b);
            }
            for r_idx in candidate_rooms.iter() {
                let b = reify_eq_const(model, assigned_room, *r_idx as i64);
                model
                    .add_le(total_students, dataset.rooms[*r_idx].capacity as i64)
                    .only_enforce_if(&[b]);
                vars.is_assigned_room.insert((*r_idx, sub.subject_id, s), b);
            }

            // Meetings: one per scheduling day
            let mut day_actives = Vec::new();
            let mut day_minutes = Vec::new();
            for d in 0..num_days {
                // Start and end are both aligned to the slot width; a duration that is no
                // multiple of the slot width can therefore never carry an active meeting.
                let start = model.new_int_var(aligned_start_domain(config, d));
                let duration = model.new_int_var(duration_domain.clone());
                let end = model.new_int_var(aligned_start_domain(config, d));

                let active = model.new_bool_var();
                model
                    .add_eq(end, LinearExpr::from(start) + LinearExpr::from(duration))
                    .only_enforce_if(&[active]);
                if unschedulable {
                    model.add_eq(lin(active), 0i64);
                }
                // Unused sections hold no meetings
                model.add_le(lin(active), lin(has_batch));

                let active_minutes = bool_times_int(model, active, duration, max_duration);
                day_actives.push(active);
                day_minutes.push(active_minutes);

                // Candidate-resource activation booleans and their optional intervals
                for f_idx in candidate_faculty.iter() {
                    let assigned = vars.is_assigned_faculty[&(*f_idx, sub.subject_id, s)];
                    let active_for = reify_and(model, &[assigned, active]);
                    let interval = model.new_optional_interval_var(start, duration, end, active_for);
                    vars.faculty_intervals[*f_idx].push(interval);
                    let minutes = bool_times_int(model, active_for, duration, max_duration);
                    vars.active_for_faculty
                        .insert((*f_idx, sub.subject_id, s, d), active_for);
                    vars.faculty_minutes
                        .insert((*f_idx, sub.subject_id, s, d), minutes);
                }
                for b_idx in enrolling_batches.iter() {
                    let picked = vars.picks[&(*b_idx, sub.subject_id, s)];
                    let active_for = reify_and(model, &[picked, active]);
                    let interval = model.new_optional_interval_var(start, duration, end, active_for);
                    vars.batch_intervals[*b_idx].push(interval);
                    vars.active_for_batch
                        .insert((*b_idx, sub.subject_id, s, d), active_for);
                }
                for r_idx in candidate_rooms.iter() {
                    let assigned = vars.is_assigned_room[&(*r_idx, sub.subject_id, s)];
                    let active_for = reify_and(model, &[assigned, active]);
                    let interval = model.new_optional_interval_var(start, duration, end, active_for);
                    vars.room_intervals[*r_idx].push(interval);
                    vars.active_for_room
                        .insert((*r_idx, sub.subject_id, s, d), active_for);
                }

                vars.meetings.insert(
                    (sub.subject_id, s, d),
                    MeetingVars {
                        start,
                        duration,
                        end,
                        active,
                        active_minutes,
                    },
                );
            }

            // Meetings of a section keep at least one free day between them
            for d in 0..num_days.saturating_sub(1) {
                model.add_le(bool_sum([day_actives[d], day_actives[d + 1]]), 1i64);
            }

            // Weekly duration accounting and its structural slack
            let total_minutes =
                model.new_int_var([(0, max_duration * num_days as i64)]);
            model.add_eq(total_minutes, int_sum(day_minutes));
            let duration_violation = model.new_bool_var();
            model
                .add_eq(total_minutes, sub.required_weekly_minutes as i64)
                .only_enforce_if(&[!duration_violation, has_batch]);

            // A real resource assignment demands actual class time
            model
                .add_ge(total_minutes, MIN_ASSIGNED_SECTION_MINUTES)
                .only_enforce_if(&[!is_dummy_faculty]);
            model
                .add_ge(total_minutes, MIN_ASSIGNED_SECTION_MINUTES)
                .only_enforce_if(&[!is_dummy_room]);

            vars.sections.insert(
                key,
                SectionVars {
                    assigned_faculty,
                    assigned_room,
                    is_dummy_faculty,
                    is_dummy_room,
                    dummy_faculty_violation,
                    dummy_room_violation,
                    duration_violation,
                    has_batch,
                    total_students,
                    total_minutes,
                    candidate_faculty: candidate_faculty.clone(),
                    candidate_rooms: candidate_rooms.clone(),
                    max_duration,
                },
            );
        }

        // Optional symmetry break: used sections packed to the front, resource indices
        // nondecreasing across the sections of a subject
        if config.symmetry_breaking && sub.ideal_num_sections > 1 {
            for s in 0..sub.ideal_num_sections - 1 {
                let here = &vars.sections[&(sub.subject_id, s)];
                let next = &vars.sections[&(sub.subject_id, s + 1)];
                let (here_hb, next_hb) = (here.has_batch, next.has_batch);
                let (here_f, next_f) = (here.assigned_faculty, next.assigned_faculty);
                let (here_r, next_r) = (here.assigned_room, next.assigned_room);
                model.add_ge(lin(here_hb), lin(next_hb));
                model.add_le(here_f, next_f);
                model.add_le(here_r, next_r);
            }
        }
    }

    Ok(vars)
}

/// Apply one NoOverlap per resource over its collected optional intervals. Must run after the
/// grid controller, which may have added ghost intervals to the faculty/batch collections.
pub(crate) fn apply_no_overlap(model: &mut CpModelBuilder, vars: &ModelVars) {
    for intervals in vars
        .faculty_intervals
        .iter()
        .chain(vars.batch_intervals.iter())
        .chain(vars.room_intervals.iter())
    {
        if intervals.len() > 1 {
            model.add_no_overlap(intervals.iter().copied());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::duration_set;
    use crate::Subject;

    fn subject(req: u32, min: Option<u32>, max: Option<u32>) -> Subject {
        Subject {
            subject_id: 7,
            subject_code: "SUB7".into(),
            required_weekly_minutes: req,
            ideal_num_sections: 1,
            enrolling_batch_ids: vec![],
            subject_type_id: None,
            subject_type_name: None,
            linked_subject_id: None,
            room_type_id: None,
            max_enrollment: None,
            min_enrollment: None,
            min_meetings: min,
            max_meetings: max,
            row_id: None,
        }
    }

    #[test]
    fn splits_weekly_minutes_into_meeting_durations() {
        // 180 minutes over 2 or 3 meetings: 90 or 60 per meeting
        assert_eq!(duration_set(&subject(180, Some(2), Some(3))).unwrap(), vec![60, 90]);
    }

    #[test]
    fn stops_below_one_hour() {
        // 180/1 = 180, 180/2 = 90, 180/3 = 60 (kept, then stop), 180/4 would be 45
        assert_eq!(
            duration_set(&subject(180, Some(1), Some(6))).unwrap(),
            vec![60, 90, 180]
        );
    }

    #[test]
    fn zero_meetings_zero_duration() {
        assert_eq!(duration_set(&subject(0, Some(0), Some(0))).unwrap(), vec![0]);
        assert_eq!(duration_set(&subject(300, None, Some(0))).unwrap(), vec![0]);
    }

    #[test]
    fn missing_bounds_fail_fast() {
        assert!(duration_set(&subject(300, None, None)).is_err());
        assert!(duration_set(&subject(300, Some(2), None)).is_err());
    }

    #[test]
    fn uncoverable_requirement_degrades_to_zero() {
        // 50 minutes cannot form an hour-long meeting
        assert_eq!(duration_set(&subject(50, Some(1), Some(2))).unwrap(), vec![0]);
    }
}
