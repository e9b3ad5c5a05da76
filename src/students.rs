//! Student-level pass/fail.
//!
//! A student fails a stage once the number of failed subjects reaches the
//! stage threshold (see [`student_status`]). Per-student attributes such as
//! region or grade come from the most frequent value among the student's own
//! records.

use polars::prelude::*;

use crate::aggregation::{breakdown, round_to, Bucket, BreakdownSpec, SortBy};
use crate::error::{ReportError, Result};
use crate::grading::{student_status, Stage};
use crate::schema::{derived, record, report, status};

const ROW: &str = "__row";
const COUNT: &str = "__count";

fn require_columns(df: &DataFrame, required: &[&str]) -> Result<()> {
    for &name in required {
        if df.column(name).is_err() {
            return Err(ReportError::MissingColumn(name.to_string()));
        }
    }
    Ok(())
}

/// One row per (student, stage) with the failed-subject count and outcome.
pub fn student_outcomes(df: &DataFrame) -> Result<DataFrame> {
    require_columns(df, &[record::STUDENT_ID, derived::STAGE, derived::STATUS])?;

    let mut out = df
        .clone()
        .lazy()
        .filter(col(record::STUDENT_ID).is_not_null())
        .group_by([
            col(record::STUDENT_ID).cast(DataType::String).alias(record::STUDENT_ID),
            col(derived::STAGE).cast(DataType::String).alias(derived::STAGE),
        ])
        .agg([col(derived::STATUS)
            .cast(DataType::String)
            .eq(lit(status::FAILING))
            .sum()
            .cast(DataType::UInt32)
            .alias(report::FAILING_SUBJECTS)])
        .sort(
            [record::STUDENT_ID, derived::STAGE],
            SortMultipleOptions::default(),
        )
        .collect()?;

    let outcome: StringChunked = {
        let stages = out.column(derived::STAGE)?.str()?;
        let failed = out.column(report::FAILING_SUBJECTS)?.u32()?;
        stages
            .into_iter()
            .zip(failed)
            .map(|(stage, n)| {
                let stage = stage.and_then(Stage::from_label)?;
                Some(student_status(stage, n.unwrap_or(0)).label())
            })
            .collect()
    };
    out.with_column(outcome.with_name(report::STUDENT_STATUS.into()).into_series())?;
    Ok(out)
}

/// Most frequent non-null `column` value per student.
///
/// Ties go to the value whose first record comes earliest in `df`.
pub fn modal_attribute(df: &DataFrame, column: &str) -> Result<DataFrame> {
    require_columns(df, &[record::STUDENT_ID, column])?;

    Ok(df
        .clone()
        .lazy()
        .with_row_index(ROW, None)
        .filter(col(record::STUDENT_ID).is_not_null().and(col(column).is_not_null()))
        .group_by([
            col(record::STUDENT_ID).cast(DataType::String).alias(record::STUDENT_ID),
            col(column).cast(DataType::String).alias(column),
        ])
        .agg([len().alias(COUNT), col(ROW).min()])
        .group_by([col(record::STUDENT_ID)])
        .agg([col(column)
            .sort_by(
                [col(COUNT), col(ROW)],
                SortMultipleOptions::default().with_order_descending_multi([true, false]),
            )
            .first()])
        .sort([record::STUDENT_ID], SortMultipleOptions::default())
        .collect()?)
}

/// Student pass/fail breakdown by a per-student attribute.
pub fn outcomes_by(df: &DataFrame, column: &str, sort: SortBy) -> Result<DataFrame> {
    let outcomes = student_outcomes(df)?;
    let modal = modal_attribute(df, column)?;

    let joined = outcomes
        .lazy()
        .join(
            modal.lazy(),
            [col(record::STUDENT_ID)],
            [col(record::STUDENT_ID)],
            JoinArgs::new(JoinType::Left),
        )
        .collect()?;

    let outcome = |value: &str| col(report::STUDENT_STATUS).eq(lit(value.to_string()));
    let spec = BreakdownSpec {
        group_by: column.to_string(),
        buckets: vec![
            Bucket::new(report::PASSING, outcome(status::PASSING)),
            Bucket::new(report::FAILING, outcome(status::FAILING)),
        ],
        exclude: None,
        sort,
    };
    breakdown(&joined, &spec)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StudentSummary {
    pub total: usize,
    pub passing: usize,
    pub failing: usize,
    pub pct_passing: f64,
    pub pct_failing: f64,
}

pub fn student_summary(df: &DataFrame) -> Result<StudentSummary> {
    let outcomes = student_outcomes(df)?;
    let labels = outcomes.column(report::STUDENT_STATUS)?.str()?;
    let count = |label: &str| labels.into_iter().filter(|v| *v == Some(label)).count();

    let total = outcomes.height();
    let passing = count(status::PASSING);
    let failing = count(status::FAILING);
    let pct = |n: usize| {
        if total == 0 {
            0.0
        } else {
            round_to(n as f64 / total as f64 * 100.0, 2)
        }
    };
    Ok(StudentSummary {
        total,
        passing,
        failing,
        pct_passing: pct(passing),
        pct_failing: pct(failing),
    })
}
