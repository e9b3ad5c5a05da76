//! Parameterized aggregation over filtered grade records.
//!
//! Every report table is a group-by with a row count, one count per tracked
//! bucket and the matching percentages. `breakdown` is the single vectorized
//! implementation; the presets below only differ in their `BreakdownSpec`.

use polars::prelude::*;

use crate::error::{ReportError, Result};
use crate::filter::school_label_expr;
use crate::schema::{derived, record, report, scores, status};

/// Named boolean predicate counted per group.
#[derive(Debug, Clone)]
pub struct Bucket {
    pub name: String,
    pub predicate: Expr,
}

impl Bucket {
    pub fn new(name: impl Into<String>, predicate: Expr) -> Self {
        Self {
            name: name.into(),
            predicate,
        }
    }

    /// Rows whose per-subject `STATUS` equals `value`.
    pub fn status(name: impl Into<String>, value: &str) -> Self {
        Self::new(name, col(derived::STATUS).cast(DataType::String).eq(lit(value.to_string())))
    }

    pub fn missing(column: &str) -> Self {
        Self::new(report::MISSING, col(column).is_null())
    }

    pub fn entered(column: &str) -> Self {
        Self::new(report::ENTERED, col(column).is_not_null())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SortBy {
    Label { descending: bool },
    Percentage { bucket: String, descending: bool },
    /// Numeric part of labels such as "12ª DIREC", then the label itself.
    RegionNumber,
}

#[derive(Debug, Clone)]
pub struct BreakdownSpec {
    pub group_by: String,
    pub buckets: Vec<Bucket>,
    /// Rows matching this predicate are left out before grouping.
    pub exclude: Option<Expr>,
    pub sort: SortBy,
}

impl BreakdownSpec {
    /// Passing/failing per group, ignoring rows without a grade.
    pub fn status_by(group_by: &str, sort: SortBy) -> Self {
        Self {
            group_by: group_by.to_string(),
            buckets: vec![
                Bucket::status(report::PASSING, status::PASSING),
                Bucket::status(report::FAILING, status::FAILING),
            ],
            exclude: Some(
                col(derived::STATUS)
                    .cast(DataType::String)
                    .eq(lit(status::NO_GRADE))
                    .or(col(derived::STATUS).is_null()),
            ),
            sort,
        }
    }

    /// Entered/missing grades of one term per group.
    pub fn entry_by(group_by: &str, term: &str, sort: SortBy) -> Self {
        Self {
            group_by: group_by.to_string(),
            buckets: vec![Bucket::entered(term), Bucket::missing(term)],
            exclude: None,
            sort,
        }
    }
}

pub fn pct_column(bucket: &str) -> String {
    format!("{}{}", report::PCT_PREFIX, bucket)
}

/// Round half up to `decimals` places.
fn round_expr(expr: Expr, decimals: i32) -> Expr {
    let factor = 10f64.powi(decimals);
    (expr * lit(factor) + lit(0.5)).floor() / lit(factor)
}

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor + 0.5).floor() / factor
}

fn percentage(count: Expr, total: Expr) -> Expr {
    round_expr(
        count.cast(DataType::Float64) / total.cast(DataType::Float64) * lit(100.0),
        1,
    )
}

fn require_column(df: &DataFrame, name: &str) -> Result<()> {
    df.column(name)
        .map(|_| ())
        .map_err(|_| ReportError::MissingColumn(name.to_string()))
}

const ORDER_KEY: &str = "__order";

fn sorted(lf: LazyFrame, label: &str, sort: &SortBy) -> Result<LazyFrame> {
    Ok(match sort {
        SortBy::Label { descending } => lf.sort(
            [label],
            SortMultipleOptions::default().with_order_descending(*descending),
        ),
        SortBy::Percentage { bucket, descending } => lf.sort(
            [pct_column(bucket).as_str(), label],
            SortMultipleOptions::default().with_order_descending_multi([*descending, false]),
        ),
        SortBy::RegionNumber => lf
            .with_column(
                col(label)
                    .str()
                    .extract(lit(r"(\d+)"), 1)
                    .cast(DataType::Int64)
                    .alias(ORDER_KEY),
            )
            .sort(
                [ORDER_KEY, label],
                SortMultipleOptions::default().with_nulls_last(true),
            ),
    })
}

/// Group, count buckets, derive percentages (1 decimal) and sort.
///
/// Output columns: `<group_by>`, `total`, then each bucket count followed by
/// every `pct_<bucket>`. Null group keys are dropped.
pub fn breakdown(df: &DataFrame, spec: &BreakdownSpec) -> Result<DataFrame> {
    require_column(df, &spec.group_by)?;
    let group = spec.group_by.as_str();

    let mut lf = df.clone().lazy().filter(col(group).is_not_null());
    if let Some(exclude) = &spec.exclude {
        lf = lf.filter(exclude.clone().not());
    }

    let mut aggs = vec![len().cast(DataType::UInt32).alias(report::TOTAL)];
    aggs.extend(spec.buckets.iter().map(|b| {
        b.predicate
            .clone()
            .sum()
            .cast(DataType::UInt32)
            .alias(b.name.as_str())
    }));
    let pcts: Vec<Expr> = spec
        .buckets
        .iter()
        .map(|b| percentage(col(b.name.as_str()), col(report::TOTAL)).alias(pct_column(&b.name)))
        .collect();

    let mut output: Vec<Expr> = vec![col(group), col(report::TOTAL)];
    output.extend(spec.buckets.iter().map(|b| col(b.name.as_str())));
    output.extend(spec.buckets.iter().map(|b| col(pct_column(&b.name))));

    let lf = lf
        .group_by([col(group).cast(DataType::String).alias(group)])
        .agg(aggs)
        .with_columns(pcts);
    Ok(sorted(lf, group, &spec.sort)?.select(output).collect()?)
}

/// Headline rate across all groups: Σbucket / Σtotal × 100.
pub fn overall_rate(table: &DataFrame, bucket: &str) -> Result<f64> {
    let sum = |name: &str| -> Result<f64> {
        let s = table.column(name)?.cast(&DataType::Float64)?;
        Ok(s.as_materialized_series().f64()?.sum().unwrap_or(0.0))
    };
    let total = sum(report::TOTAL)?;
    if total == 0.0 {
        return Ok(0.0);
    }
    Ok(round_to(sum(bucket)? / total * 100.0, 1))
}

// ── Grade averages ──────────────────────────────────────────────────────────

const AVERAGED: [&str; 3] = [
    scores::BIMESTER_1,
    scores::BIMESTER_2,
    derived::TERM_1_2_AVERAGE,
];

/// Per-group null-skipping means (2 decimals), lowest semester average first.
pub fn grade_averages(df: &DataFrame, group_by: &str) -> Result<DataFrame> {
    require_column(df, group_by)?;
    for c in AVERAGED {
        require_column(df, c)?;
    }
    let aggs: Vec<Expr> = AVERAGED
        .iter()
        .map(|c| round_expr(col(*c).cast(DataType::Float64).mean(), 2).alias(*c))
        .collect();

    Ok(df
        .clone()
        .lazy()
        .filter(col(group_by).is_not_null())
        .group_by([col(group_by).cast(DataType::String).alias(group_by)])
        .agg(aggs)
        .sort(
            [derived::TERM_1_2_AVERAGE, group_by],
            SortMultipleOptions::default().with_nulls_last(true),
        )
        .collect()?)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AverageSummary {
    pub bimester_1: Option<f64>,
    pub bimester_2: Option<f64>,
    pub semester: Option<f64>,
}

/// Mean of the group means of a `grade_averages` table.
pub fn overall_averages(table: &DataFrame) -> Result<AverageSummary> {
    let mean = |name: &str| -> Result<Option<f64>> {
        let s = table.column(name)?.as_materialized_series().clone();
        Ok(s.f64()?.mean().map(|v| round_to(v, 2)))
    };
    Ok(AverageSummary {
        bimester_1: mean(scores::BIMESTER_1)?,
        bimester_2: mean(scores::BIMESTER_2)?,
        semester: mean(derived::TERM_1_2_AVERAGE)?,
    })
}

// ── Grade entry ─────────────────────────────────────────────────────────────

/// Missing and entered counts per reported term over all rows.
///
/// A term column absent from the frame counts as neither missing nor entered.
pub fn missing_grades_summary(df: &DataFrame) -> Result<DataFrame> {
    let total = df.height() as u32;
    let pct = |n: u32| {
        if total == 0 {
            0.0
        } else {
            round_to(n as f64 / total as f64 * 100.0, 1)
        }
    };

    let mut missing = Vec::new();
    let mut entered = Vec::new();
    for term in scores::REPORTED_TERMS {
        let (m, e) = match df.column(term) {
            Ok(c) => {
                let nulls = c.null_count() as u32;
                (nulls, total - nulls)
            }
            Err(_) => (0, 0),
        };
        missing.push(m);
        entered.push(e);
    }

    Ok(df!(
        report::TERM => scores::REPORTED_TERMS.to_vec(),
        report::TOTAL => vec![total; scores::REPORTED_TERMS.len()],
        report::MISSING => missing.clone(),
        pct_column(report::MISSING) => missing.iter().map(|n| pct(*n)).collect::<Vec<_>>(),
        report::ENTERED => entered.clone(),
        pct_column(report::ENTERED) => entered.iter().map(|n| pct(*n)).collect::<Vec<_>>()
    )?)
}

// ── School ranking ──────────────────────────────────────────────────────────

pub fn missing_pct_column(term: &str) -> String {
    format!("{} ({term})", pct_column(report::MISSING))
}

/// One page of a ranked table.
#[derive(Debug, Clone)]
pub struct Page {
    pub rows: DataFrame,
    /// 1-based, clamped into `1..=total_pages`.
    pub page: usize,
    pub total_pages: usize,
    pub total_items: usize,
    /// 1-based index of the first row shown, 0 when empty.
    pub first_item: usize,
    pub last_item: usize,
}

pub fn paginate(df: &DataFrame, page: usize, page_size: usize) -> Page {
    let page_size = page_size.max(1);
    let total_items = df.height();
    let total_pages = total_items.div_ceil(page_size).max(1);
    let page = page.clamp(1, total_pages);
    let offset = (page - 1) * page_size;
    let rows = df.slice(offset as i64, page_size);
    let shown = rows.height();
    Page {
        rows,
        page,
        total_pages,
        total_items,
        first_item: if shown == 0 { 0 } else { offset + 1 },
        last_item: offset + shown,
    }
}

/// Schools ranked by their share of missing grades in `sort_term`.
///
/// One group-by over the school label; each reported term gets a missing
/// percentage column.
pub fn school_missing_ranking(
    df: &DataFrame,
    sort_term: &str,
    page: usize,
    page_size: usize,
) -> Result<Page> {
    if !scores::REPORTED_TERMS.contains(&sort_term) {
        return Err(ReportError::InvalidFilter(format!(
            "cannot rank by {sort_term}; expected one of {:?}",
            scores::REPORTED_TERMS
        )));
    }
    for c in [record::SCHOOL, record::SCHOOL_ID, record::REGION, record::MUNICIPALITY] {
        require_column(df, c)?;
    }

    let mut aggs = vec![
        col(record::REGION).cast(DataType::String).first().alias(record::REGION),
        col(record::MUNICIPALITY)
            .cast(DataType::String)
            .first()
            .alias(record::MUNICIPALITY),
    ];
    for term in scores::REPORTED_TERMS {
        let pct = if df.column(term).is_ok() {
            percentage(col(term).is_null().sum(), len())
        } else {
            lit(0.0)
        };
        aggs.push(pct.alias(missing_pct_column(term)));
    }

    let ranked = df
        .clone()
        .lazy()
        .with_column(school_label_expr().alias(derived::SCHOOL_LABEL))
        .group_by([col(derived::SCHOOL_LABEL)])
        .agg(aggs)
        .sort(
            [missing_pct_column(sort_term).as_str(), derived::SCHOOL_LABEL],
            SortMultipleOptions::default().with_order_descending_multi([true, false]),
        )
        .collect()?;

    Ok(paginate(&ranked, page, page_size))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> DataFrame {
        df!(
            record::REGION => ["2ª DIREC", "2ª DIREC", "10ª DIREC", "1ª DIREC", "1ª DIREC", "1ª DIREC"],
            record::MUNICIPALITY => ["Parnamirim", "Parnamirim", "Caicó", "Natal", "Natal", "Natal"],
            record::SCHOOL => ["EE P", "EE P", "EE C", "EE N", "EE N", "EE M"],
            record::SCHOOL_ID => [20u32, 20, 30, 10, 10, 11],
            record::SUBJECT => ["Arte", "Física", "Arte", "Arte", "Física", "Arte"],
            scores::BIMESTER_1 => [Some(7.0), Some(4.0), None, Some(8.0), None, Some(5.0)],
            scores::BIMESTER_2 => [Some(7.0), Some(5.0), None, Some(6.0), Some(3.0), None],
            scores::BIMESTER_3 => [None::<f64>, None, None, Some(1.0), None, None],
            derived::TERM_1_2_AVERAGE => [Some(7.0), Some(4.5), None, Some(7.0), Some(3.0), Some(5.0)],
            derived::STATUS => ["Aprovado", "Reprovado", "Sem nota", "Aprovado", "Reprovado", "Reprovado"]
        )
        .unwrap()
    }

    fn strings(df: &DataFrame, name: &str) -> Vec<String> {
        df.column(name)
            .unwrap()
            .str()
            .unwrap()
            .into_iter()
            .map(|v| v.unwrap_or_default().to_string())
            .collect()
    }

    #[test]
    fn status_breakdown_by_subject_excludes_no_grade() {
        let spec = BreakdownSpec::status_by(
            record::SUBJECT,
            SortBy::Percentage {
                bucket: report::PASSING.into(),
                descending: false,
            },
        );
        let out = breakdown(&frame(), &spec).unwrap();
        assert_eq!(strings(&out, record::SUBJECT), vec!["Física", "Arte"]);

        let arte = out.slice(1, 1);
        assert_eq!(arte.column(report::TOTAL).unwrap().u32().unwrap().get(0), Some(3));
        assert_eq!(arte.column(report::PASSING).unwrap().u32().unwrap().get(0), Some(2));
        assert_eq!(
            arte.column(&pct_column(report::PASSING)).unwrap().f64().unwrap().get(0),
            Some(66.7)
        );
        assert_eq!(
            arte.column(&pct_column(report::FAILING)).unwrap().f64().unwrap().get(0),
            Some(33.3)
        );
    }

    #[test]
    fn region_number_sort_is_numeric() {
        let spec = BreakdownSpec::entry_by(record::REGION, scores::BIMESTER_1, SortBy::RegionNumber);
        let out = breakdown(&frame(), &spec).unwrap();
        assert_eq!(
            strings(&out, record::REGION),
            vec!["1ª DIREC", "2ª DIREC", "10ª DIREC"]
        );
        assert_eq!(out.get_column_names_str().len(), 6);
        let missing = out.column(report::MISSING).unwrap().u32().unwrap();
        assert_eq!(missing.get(0), Some(1));
        assert_eq!(missing.get(2), Some(1));
    }

    #[test]
    fn breakdown_is_idempotent() {
        let spec = BreakdownSpec::status_by(record::REGION, SortBy::Label { descending: false });
        let df = frame();
        let a = breakdown(&df, &spec).unwrap();
        let b = breakdown(&df, &spec).unwrap();
        assert!(a.equals_missing(&b));
    }

    #[test]
    fn overall_rate_weights_by_group_size() {
        let spec = BreakdownSpec::status_by(record::SUBJECT, SortBy::Label { descending: false });
        let out = breakdown(&frame(), &spec).unwrap();
        assert_eq!(overall_rate(&out, report::PASSING).unwrap(), 40.0);
        assert_eq!(overall_rate(&out, report::FAILING).unwrap(), 60.0);
    }

    #[test]
    fn grade_averages_skip_nulls() {
        let out = grade_averages(&frame(), record::SUBJECT).unwrap();
        assert_eq!(strings(&out, record::SUBJECT), vec!["Física", "Arte"]);
        let b1 = out.column(scores::BIMESTER_1).unwrap().f64().unwrap();
        assert_eq!(b1.get(0), Some(4.0));
        assert_eq!(b1.get(1), Some(6.67));

        let summary = overall_averages(&out).unwrap();
        assert_eq!(summary.semester, Some(5.04));
    }

    #[test]
    fn missing_summary_counts_each_term() {
        let out = missing_grades_summary(&frame()).unwrap();
        let missing = out.column(report::MISSING).unwrap().u32().unwrap();
        assert_eq!(missing.get(0), Some(2));
        assert_eq!(missing.get(1), Some(2));
        assert_eq!(missing.get(2), Some(5));
        let pct = out.column(&pct_column(report::ENTERED)).unwrap().f64().unwrap();
        assert_eq!(pct.get(2), Some(16.7));
    }

    #[test]
    fn school_ranking_sorts_and_paginates() {
        let page = school_missing_ranking(&frame(), scores::BIMESTER_2, 1, 2).unwrap();
        assert_eq!(page.total_items, 4);
        assert_eq!(page.total_pages, 2);
        assert_eq!((page.first_item, page.last_item), (1, 2));
        assert_eq!(
            strings(&page.rows, derived::SCHOOL_LABEL),
            vec!["EE C (cód. Inep: 30)", "EE M (cód. Inep: 11)"]
        );

        let last = school_missing_ranking(&frame(), scores::BIMESTER_2, 9, 2).unwrap();
        assert_eq!(last.page, 2);
        assert_eq!((last.first_item, last.last_item), (3, 4));

        assert!(matches!(
            school_missing_ranking(&frame(), scores::FINAL_EXAM, 1, 10),
            Err(ReportError::InvalidFilter(_))
        ));
    }

    #[test]
    fn empty_frame_paginates_to_a_single_empty_page() {
        let empty = frame().head(Some(0));
        let page = paginate(&empty, 3, 10);
        assert_eq!((page.page, page.total_pages, page.first_item), (1, 1, 0));
    }
}
