//! Report session: one loaded snapshot, the memoized filter layer and the
//! report pages built on top of it.
//!
//! Every report is a pure function of the snapshot, the caller's
//! [`FilterState`] and the page's [`LocalFilter`]. The memo caches only save
//! recomputation.

use std::fs::File;
use std::path::{Path, PathBuf};

use once_cell::unsync::OnceCell;
use polars::prelude::*;
use tracing::{debug, info};

use crate::aggregation::{
    breakdown, grade_averages, missing_grades_summary, overall_averages, overall_rate,
    school_missing_ranking, AverageSummary, BreakdownSpec, Page, SortBy,
};
use crate::config::ReportConfig;
use crate::error::{ReportError, Result};
use crate::filter::{apply_filters, filter_options, FilterOptions, FilterState, LocalFilter};
use crate::memo::TtlCache;
use crate::schema::{record, report, scores};
use crate::students::{outcomes_by, student_summary, StudentSummary};

pub const NO_DATA: &str = "Nenhum dado encontrado para os filtros selecionados.";

/// Result of a report page: a table, or a notice that nothing matched.
#[derive(Debug, Clone)]
pub enum Report<T> {
    Data(T),
    NoData(String),
}

impl<T> Report<T> {
    fn no_data() -> Self {
        Report::NoData(NO_DATA.to_string())
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Report::NoData(_))
    }

    pub fn data(&self) -> Option<&T> {
        match self {
            Report::Data(v) => Some(v),
            Report::NoData(_) => None,
        }
    }

    pub fn into_data(self) -> Option<T> {
        match self {
            Report::Data(v) => Some(v),
            Report::NoData(_) => None,
        }
    }
}

// ── Report payloads ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Sidebar {
    pub options: FilterOptions,
    /// True when a stale selection was reset to its sentinel.
    pub reconciled: bool,
}

#[derive(Debug, Clone)]
pub struct GradeEntryReport {
    pub summary: DataFrame,
    /// (term, breakdown by DIREC) for each reported term.
    pub by_region: Vec<(String, DataFrame)>,
}

#[derive(Debug, Clone)]
pub struct OutcomeReport {
    pub table: DataFrame,
    pub pct_passing: f64,
    pub pct_failing: f64,
}

#[derive(Debug, Clone)]
pub struct AverageReport {
    pub table: DataFrame,
    pub overall: AverageSummary,
}

// ── Session ─────────────────────────────────────────────────────────────────

pub struct ReportSession {
    snapshot_path: Option<PathBuf>,
    snapshot: OnceCell<DataFrame>,
    page_size: usize,
    options: TtlCache<FilterState, FilterOptions>,
    frames: TtlCache<FilterState, DataFrame>,
}

fn read_snapshot(path: &Path) -> Result<DataFrame> {
    if !path.exists() {
        return Err(ReportError::NotLoaded(format!(
            "snapshot {} does not exist; run the transform first",
            path.display()
        )));
    }
    let df = ParquetReader::new(File::open(path)?).finish()?;
    info!(path = %path.display(), rows = df.height(), "loaded snapshot");
    widen(df)
}

/// Undo storage compaction: categoricals back to text, floats to f64.
fn widen(df: DataFrame) -> Result<DataFrame> {
    let casts: Vec<Expr> = df
        .get_columns()
        .iter()
        .filter_map(|c| match c.dtype() {
            DataType::Float32 => Some(col(c.name().clone()).cast(DataType::Float64)),
            dt if dt.is_categorical() => Some(col(c.name().clone()).cast(DataType::String)),
            _ => None,
        })
        .collect();
    if casts.is_empty() {
        return Ok(df);
    }
    Ok(df.lazy().with_columns(casts).collect()?)
}

fn snapshot_of<'a>(cell: &'a OnceCell<DataFrame>, path: Option<&Path>) -> Result<&'a DataFrame> {
    cell.get_or_try_init(|| match path {
        Some(p) => read_snapshot(p),
        None => Err(ReportError::NotLoaded("no snapshot path configured".into())),
    })
}

impl ReportSession {
    pub fn new(config: &ReportConfig) -> Self {
        Self {
            snapshot_path: Some(config.snapshot_path.clone()),
            snapshot: OnceCell::new(),
            page_size: config.page_size,
            options: TtlCache::new(config.memo_ttl()),
            frames: TtlCache::new(config.memo_ttl()),
        }
    }

    /// Session over an already loaded frame.
    pub fn from_frame(df: DataFrame, config: &ReportConfig) -> Result<Self> {
        let session = Self {
            snapshot_path: None,
            snapshot: OnceCell::new(),
            page_size: config.page_size,
            options: TtlCache::new(config.memo_ttl()),
            frames: TtlCache::new(config.memo_ttl()),
        };
        let _ = session.snapshot.set(widen(df)?);
        Ok(session)
    }

    pub fn snapshot(&self) -> Result<&DataFrame> {
        snapshot_of(&self.snapshot, self.snapshot_path.as_deref())
    }

    /// Option lists for the three selectors; stale selections are reset.
    pub fn sidebar(&mut self, state: &mut FilterState) -> Result<Sidebar> {
        let snapshot = snapshot_of(&self.snapshot, self.snapshot_path.as_deref())?;
        let mut reconciled = false;
        // A reset can invalidate a descendant's option list, so settle first.
        loop {
            let key = state.clone();
            let options = self
                .options
                .get_or_try_insert_with(key, || filter_options(snapshot, state))?;
            if !state.reconcile(&options) {
                return Ok(Sidebar {
                    options,
                    reconciled,
                });
            }
            debug!(?state, "reset stale filter selection");
            reconciled = true;
        }
    }

    /// Snapshot restricted to the current selection.
    pub fn filtered(&mut self, state: &FilterState) -> Result<DataFrame> {
        let snapshot = snapshot_of(&self.snapshot, self.snapshot_path.as_deref())?;
        self.frames
            .get_or_try_insert_with(state.clone(), || apply_filters(snapshot, state))
    }

    pub fn clear_filters(&mut self, state: &mut FilterState) {
        state.clear();
        self.options.clear();
        self.frames.clear();
    }

    fn scoped(&mut self, state: &FilterState, local: &LocalFilter) -> Result<Option<DataFrame>> {
        let df = local.apply(&self.filtered(state)?)?;
        Ok((df.height() > 0).then_some(df))
    }

    // ── Pages ───────────────────────────────────────────────────────────────

    /// Missing/entered grades for bimesters 1–3, overall and per DIREC.
    pub fn grade_entry_report(&mut self, state: &FilterState) -> Result<Report<GradeEntryReport>> {
        let Some(df) = self.scoped(state, &LocalFilter::default())? else {
            return Ok(Report::no_data());
        };
        let mut by_region = Vec::with_capacity(scores::REPORTED_TERMS.len());
        for term in scores::REPORTED_TERMS {
            if df.column(term).is_err() {
                continue;
            }
            let spec = BreakdownSpec::entry_by(record::REGION, term, SortBy::Label { descending: false });
            by_region.push((term.to_string(), breakdown(&df, &spec)?));
        }
        Ok(Report::Data(GradeEntryReport {
            summary: missing_grades_summary(&df)?,
            by_region,
        }))
    }

    /// Pass/fail per subject, lowest pass rate first.
    pub fn subject_outcomes_report(
        &mut self,
        state: &FilterState,
        local: &LocalFilter,
    ) -> Result<Report<OutcomeReport>> {
        let Some(df) = self.scoped(state, local)? else {
            return Ok(Report::no_data());
        };
        let spec = BreakdownSpec::status_by(
            record::SUBJECT,
            SortBy::Percentage {
                bucket: report::PASSING.to_string(),
                descending: false,
            },
        );
        let table = breakdown(&df, &spec)?;
        if table.height() == 0 {
            return Ok(Report::no_data());
        }
        Ok(Report::Data(OutcomeReport {
            pct_passing: overall_rate(&table, report::PASSING)?,
            pct_failing: overall_rate(&table, report::FAILING)?,
            table,
        }))
    }

    pub fn subject_averages_report(
        &mut self,
        state: &FilterState,
        local: &LocalFilter,
    ) -> Result<Report<AverageReport>> {
        self.averages_by(state, local, record::SUBJECT)
    }

    pub fn region_averages_report(
        &mut self,
        state: &FilterState,
        local: &LocalFilter,
    ) -> Result<Report<AverageReport>> {
        self.averages_by(state, local, record::REGION)
    }

    fn averages_by(
        &mut self,
        state: &FilterState,
        local: &LocalFilter,
        group_by: &str,
    ) -> Result<Report<AverageReport>> {
        let Some(df) = self.scoped(state, local)? else {
            return Ok(Report::no_data());
        };
        let table = grade_averages(&df, group_by)?;
        Ok(Report::Data(AverageReport {
            overall: overall_averages(&table)?,
            table,
        }))
    }

    pub fn student_outcomes_report(
        &mut self,
        state: &FilterState,
        local: &LocalFilter,
    ) -> Result<Report<StudentSummary>> {
        let Some(df) = self.scoped(state, local)? else {
            return Ok(Report::no_data());
        };
        Ok(Report::Data(student_summary(&df)?))
    }

    /// Student pass/fail per modal DIREC, in DIREC number order.
    pub fn student_region_report(
        &mut self,
        state: &FilterState,
        local: &LocalFilter,
    ) -> Result<Report<DataFrame>> {
        let Some(df) = self.scoped(state, local)? else {
            return Ok(Report::no_data());
        };
        Ok(Report::Data(outcomes_by(&df, record::REGION, SortBy::RegionNumber)?))
    }

    pub fn student_grade_report(
        &mut self,
        state: &FilterState,
        local: &LocalFilter,
    ) -> Result<Report<DataFrame>> {
        let Some(df) = self.scoped(state, local)? else {
            return Ok(Report::no_data());
        };
        Ok(Report::Data(outcomes_by(
            &df,
            record::GRADE_LEVEL,
            SortBy::Label { descending: false },
        )?))
    }

    /// Schools ranked by missing grades in `sort_term` (defaults to bimester 2).
    pub fn school_ranking_report(
        &mut self,
        state: &FilterState,
        sort_term: Option<&str>,
        page: usize,
    ) -> Result<Report<Page>> {
        let Some(df) = self.scoped(state, &LocalFilter::default())? else {
            return Ok(Report::no_data());
        };
        let term = sort_term.unwrap_or(scores::BIMESTER_2);
        Ok(Report::Data(school_missing_ranking(&df, term, page, self.page_size)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{derived, sentinel, stage, status};

    fn snapshot() -> DataFrame {
        df!(
            record::REGION => ["1ª DIREC", "1ª DIREC", "2ª DIREC", "2ª DIREC"],
            record::MUNICIPALITY => ["Natal", "Natal", "Mossoró", "Mossoró"],
            record::SCHOOL => ["EE A", "EE A", "EE B", "EE B"],
            record::SCHOOL_ID => [1u32, 1, 2, 2],
            record::GRADE_LEVEL => ["6º ANO", "6º ANO", "1ª SÉRIE", "1ª SÉRIE"],
            record::SUBJECT => ["Arte", "Física", "Arte", "Física"],
            record::STUDENT_ID => ["00000000001", "00000000001", "00000000002", "00000000002"],
            scores::BIMESTER_1 => [Some(7.0f32), Some(3.0), None, Some(6.0)],
            scores::BIMESTER_2 => [Some(7.0f32), Some(5.0), None, Some(8.0)],
            derived::STAGE => [stage::LOWER_SECONDARY, stage::LOWER_SECONDARY, stage::UPPER_SECONDARY, stage::UPPER_SECONDARY],
            derived::TERM_1_2_AVERAGE => [Some(7.0f32), Some(4.0), None, Some(7.0)],
            derived::STATUS => [status::PASSING, status::FAILING, status::NO_GRADE, status::PASSING]
        )
        .unwrap()
    }

    fn session() -> ReportSession {
        ReportSession::from_frame(snapshot(), &ReportConfig::default()).unwrap()
    }

    #[test]
    fn snapshot_floats_are_widened() {
        let s = session();
        let df = s.snapshot().unwrap();
        assert_eq!(df.column(scores::BIMESTER_1).unwrap().dtype(), &DataType::Float64);
    }

    #[test]
    fn missing_snapshot_is_not_loaded() {
        let config = ReportConfig {
            snapshot_path: PathBuf::from("/nonexistent/snapshot.parquet"),
            ..Default::default()
        };
        let mut s = ReportSession::new(&config);
        assert!(matches!(
            s.filtered(&FilterState::default()),
            Err(ReportError::NotLoaded(_))
        ));
    }

    #[test]
    fn sidebar_resets_stale_municipality() {
        let mut s = session();
        let mut state = FilterState::default();
        state.set_region("1ª DIREC");
        state.set_municipality("Mossoró");

        let sidebar = s.sidebar(&mut state).unwrap();
        assert!(sidebar.reconciled);
        assert_eq!(state.municipality, sentinel::ALL_MUNICIPALITIES);
        assert_eq!(sidebar.options.municipalities, vec!["Todos", "Natal"]);
    }

    #[test]
    fn filtered_rows_match_selection_and_clear_restores_all() {
        let mut s = session();
        let mut state = FilterState::default();
        state.set_region("2ª DIREC");
        assert_eq!(s.filtered(&state).unwrap().height(), 2);

        s.clear_filters(&mut state);
        assert!(state.is_unfiltered());
        assert_eq!(s.filtered(&state).unwrap().height(), 4);
    }

    #[test]
    fn empty_selection_yields_no_data() {
        let mut s = session();
        let mut state = FilterState::default();
        state.set_region("9ª DIREC");
        let report = s
            .subject_outcomes_report(&state, &LocalFilter::default())
            .unwrap();
        assert!(report.is_empty());
        assert!(s.school_ranking_report(&state, None, 1).unwrap().is_empty());
    }

    #[test]
    fn subject_outcomes_ignore_no_grade_rows() {
        let mut s = session();
        let report = s
            .subject_outcomes_report(&FilterState::default(), &LocalFilter::default())
            .unwrap()
            .into_data()
            .unwrap();
        assert_eq!(report.table.height(), 2);
        assert_eq!(report.pct_passing, 66.7);
        assert_eq!(report.pct_failing, 33.3);
    }

    #[test]
    fn student_reports_follow_stage_thresholds() {
        let mut s = session();
        let all = FilterState::default();
        let summary = s
            .student_outcomes_report(&all, &LocalFilter::default())
            .unwrap()
            .into_data()
            .unwrap();
        assert_eq!((summary.total, summary.passing), (2, 2));

        let local = LocalFilter::stage(stage::UPPER_SECONDARY);
        let by_grade = s.student_grade_report(&all, &local).unwrap().into_data().unwrap();
        assert_eq!(by_grade.height(), 1);
    }

    #[test]
    fn grade_entry_covers_each_reported_term() {
        let mut s = session();
        let report = s
            .grade_entry_report(&FilterState::default())
            .unwrap()
            .into_data()
            .unwrap();
        assert_eq!(report.summary.height(), 3);
        assert_eq!(report.by_region.len(), 2);
    }

    #[test]
    fn school_ranking_uses_configured_page_size() {
        let mut s = session();
        let page = s
            .school_ranking_report(&FilterState::default(), Some(scores::BIMESTER_1), 1)
            .unwrap()
            .into_data()
            .unwrap();
        assert_eq!(page.total_items, 2);
        assert_eq!(page.total_pages, 1);
    }
}
