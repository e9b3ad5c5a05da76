//! Grading rules: grade levels, stages, per-subject status and student status.
//!
//! These are the row-level definitions the pipeline and the reports share.
//! Every function here is total over its input domain.

use crate::schema::{stage, status, STUDENT_ID_WIDTH};

/// Passing threshold for the term 1–2 average.
pub const PASSING_AVERAGE: f64 = 6.0;

// ── Stage ───────────────────────────────────────────────────────────────────

/// Coarse schooling level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    LowerSecondary,
    UpperSecondary,
}

impl Stage {
    pub const ALL: [Stage; 2] = [Stage::LowerSecondary, Stage::UpperSecondary];

    pub fn label(self) -> &'static str {
        match self {
            Stage::LowerSecondary => stage::LOWER_SECONDARY,
            Stage::UpperSecondary => stage::UPPER_SECONDARY,
        }
    }

    pub fn from_label(label: &str) -> Option<Stage> {
        Stage::ALL.into_iter().find(|s| s.label() == label)
    }

    /// Number of failed subjects at which a student fails the stage.
    pub fn failing_threshold(self) -> u32 {
        match self {
            Stage::LowerSecondary => 4,
            Stage::UpperSecondary => 7,
        }
    }
}

// ── Grade level ─────────────────────────────────────────────────────────────

/// Canonical grade level ("série") retained by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GradeLevel {
    Year6,
    Year7,
    Year8,
    Year9,
    Series1,
    Series2,
    Series3,
}

impl GradeLevel {
    pub const ALL: [GradeLevel; 7] = [
        GradeLevel::Year6,
        GradeLevel::Year7,
        GradeLevel::Year8,
        GradeLevel::Year9,
        GradeLevel::Series1,
        GradeLevel::Series2,
        GradeLevel::Series3,
    ];

    /// Parse one of the 11 accepted source labels.
    ///
    /// The title-case lower-secondary spellings ("6º Ano") are accepted and
    /// collapse onto the uppercase canonical level. Anything else is out of
    /// scope and yields `None`.
    pub fn parse(label: &str) -> Option<GradeLevel> {
        match label {
            "6º ANO" | "6º Ano" => Some(GradeLevel::Year6),
            "7º ANO" | "7º Ano" => Some(GradeLevel::Year7),
            "8º ANO" | "8º Ano" => Some(GradeLevel::Year8),
            "9º ANO" | "9º Ano" => Some(GradeLevel::Year9),
            "1ª SÉRIE" => Some(GradeLevel::Series1),
            "2ª SÉRIE" => Some(GradeLevel::Series2),
            "3ª SÉRIE" => Some(GradeLevel::Series3),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            GradeLevel::Year6 => "6º ANO",
            GradeLevel::Year7 => "7º ANO",
            GradeLevel::Year8 => "8º ANO",
            GradeLevel::Year9 => "9º ANO",
            GradeLevel::Series1 => "1ª SÉRIE",
            GradeLevel::Series2 => "2ª SÉRIE",
            GradeLevel::Series3 => "3ª SÉRIE",
        }
    }

    pub fn stage(self) -> Stage {
        match self {
            GradeLevel::Year6 | GradeLevel::Year7 | GradeLevel::Year8 | GradeLevel::Year9 => {
                Stage::LowerSecondary
            }
            GradeLevel::Series1 | GradeLevel::Series2 | GradeLevel::Series3 => {
                Stage::UpperSecondary
            }
        }
    }
}

// ── Per-subject status ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    NoGrade,
    Passing,
    Failing,
}

impl Status {
    pub fn from_average(average: Option<f64>) -> Status {
        match average {
            None => Status::NoGrade,
            Some(avg) if avg >= PASSING_AVERAGE => Status::Passing,
            Some(_) => Status::Failing,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Status::NoGrade => status::NO_GRADE,
            Status::Passing => status::PASSING,
            Status::Failing => status::FAILING,
        }
    }
}

/// Null-skipping mean of two term scores.
pub fn term_average(first: Option<f64>, second: Option<f64>) -> Option<f64> {
    match (first, second) {
        (Some(a), Some(b)) => Some((a + b) / 2.0),
        (Some(a), None) | (None, Some(a)) => Some(a),
        (None, None) => None,
    }
}

/// Student-level outcome for a stage, from the number of failed subjects.
pub fn student_status(stage: Stage, failing_subjects: u32) -> Status {
    if failing_subjects >= stage.failing_threshold() {
        Status::Failing
    } else {
        Status::Passing
    }
}

// ── Cell parsing ────────────────────────────────────────────────────────────

/// Parse a locale-formatted score ("7,5"). Unparseable cells become `None`.
pub fn parse_score(raw: &str) -> Option<f64> {
    let cleaned = raw.trim().replace(',', ".");
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Keep only digits and left-pad to the fixed identifier width.
pub fn normalize_cpf(raw: &str) -> String {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    format!("{digits:0>width$}", width = STUDENT_ID_WIDTH)
}
