//! Course definitions and punch validation.
//!
//! A course is an ordered list of control codes, checked either in order
//! (classic courses, via the alignment in [`trace`]) or as a set (score
//! events). Validation never mutates its inputs; it derives one result per
//! expected control plus the list of off-course punches.

mod trace;

use crate::card::{CardRecord, Punch, NO_TIME};

/// A course definition, as produced by a course importer.
#[derive(Debug, Clone)]
pub struct Course {
    pub name: String,
    pub controls: Vec<u16>,
    /// Controls must be visited in order; otherwise any order counts.
    pub inline: bool,
    /// Take the start time punched in the start box as race start.
    pub use_box_start: bool,
    /// Mass-start override, milliseconds since the event midnight.
    pub fixed_start_ms: Option<i64>,
}

impl Course {
    /// An ordered course using the start box.
    pub fn inline(name: impl Into<String>, controls: Vec<u16>) -> Self {
        Course {
            name: name.into(),
            controls,
            inline: true,
            use_box_start: true,
            fixed_start_ms: None,
        }
    }

    /// A free-order (score) course using the start box.
    pub fn score(name: impl Into<String>, controls: Vec<u16>) -> Self {
        Course {
            inline: false,
            ..Course::inline(name, controls)
        }
    }

    /// Race time of a card on this course: finish minus the configured
    /// start (fixed start if set, else the box start), or [`NO_TIME`] when
    /// either end is unknown.
    pub fn race_time_ms(&self, record: &CardRecord) -> i64 {
        let start = match self.fixed_start_ms {
            Some(fixed) => fixed,
            None if self.use_box_start => record.start_ms,
            None => NO_TIME,
        };
        if start < 0 || record.finish_ms < 0 {
            return NO_TIME;
        }
        record.finish_ms - start
    }
}

/// Outcome for one expected control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlResult {
    pub expected_code: u16,
    pub found: bool,
    /// Timestamp of the matching punch, or [`NO_TIME`] when missed.
    pub timestamp_ms: i64,
}

/// Outcome of checking one punch list against one course.
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub course: Course,
    /// One entry per expected control, in course order.
    pub control_results: Vec<ControlResult>,
    pub missing_count: usize,
    /// Codes punched but not on the course, in punch order.
    pub extra_controls: Vec<u16>,
    pub all_correct: bool,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("no courses to match against")]
    NoCourses,
}

/// Checks a punch list against a course.
pub fn validate(course: &Course, punches: &[Punch]) -> ValidationResult {
    let control_results = if course.inline {
        trace::align_ordered(&course.controls, punches)
    } else {
        match_any_order(&course.controls, punches)
    };
    let missing_count = control_results.iter().filter(|r| !r.found).count();
    let extra_controls = punches
        .iter()
        .map(|punch| punch.code)
        .filter(|code| !course.controls.contains(code))
        .collect();
    ValidationResult {
        course: course.clone(),
        all_correct: missing_count == 0,
        missing_count,
        control_results,
        extra_controls,
    }
}

/// Checks a punch list against every course and keeps the best fit: fewest
/// missing controls, longer course on a tie (a short course is too easily a
/// subset match).
pub fn auto_detect(
    courses: &[Course],
    punches: &[Punch],
) -> Result<ValidationResult, ValidationError> {
    let mut best: Option<ValidationResult> = None;
    for course in courses {
        let result = validate(course, punches);
        let better = match &best {
            None => true,
            Some(current) => {
                result.missing_count < current.missing_count
                    || (result.missing_count == current.missing_count
                        && result.course.controls.len() > current.course.controls.len())
            }
        };
        if better {
            best = Some(result);
        }
    }
    best.ok_or(ValidationError::NoCourses)
}

/// Score matching: each expected control takes the first punch with its code
/// that no earlier control has already claimed.
fn match_any_order(expected: &[u16], punches: &[Punch]) -> Vec<ControlResult> {
    let mut used = vec![false; punches.len()];
    expected
        .iter()
        .map(|&code| {
            for (index, punch) in punches.iter().enumerate() {
                if !used[index] && punch.code == code {
                    used[index] = true;
                    return ControlResult {
                        expected_code: code,
                        found: true,
                        timestamp_ms: punch.timestamp_ms,
                    };
                }
            }
            ControlResult {
                expected_code: code,
                found: false,
                timestamp_ms: NO_TIME,
            }
        })
        .collect()
}
