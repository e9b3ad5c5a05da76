use std::path::Path;

use polars::prelude::DataFrame;
use pyo3::prelude::*;
use pyo3::types::PyModule;
use pyo3_polars::PyDataFrame;

use crate::config::Config;
use crate::filter::{FilterState, LocalFilter};
use crate::pipeline;
use crate::schema;
use crate::session::{Report, ReportSession};

fn load_config(config_path: Option<&str>) -> PyResult<Config> {
    Ok(match config_path {
        Some(p) => Config::load(Path::new(p))?,
        None => Config::default(),
    })
}

fn local_filter(stage: Option<String>, grade: Option<String>, subject: Option<String>) -> LocalFilter {
    LocalFilter {
        stage,
        grade_level: grade,
        subject,
    }
}

fn to_py(report: Report<DataFrame>) -> Option<PyDataFrame> {
    report.into_data().map(PyDataFrame)
}

/// Report session bound to one snapshot and one filter selection.
#[pyclass(name = "ReportSession", unsendable)]
pub struct PyReportSession {
    inner: ReportSession,
    state: FilterState,
}

#[pymethods]
impl PyReportSession {
    #[new]
    #[pyo3(signature = (snapshot_path=None, config_path=None))]
    fn new(snapshot_path: Option<String>, config_path: Option<&str>) -> PyResult<Self> {
        let mut config = load_config(config_path)?.report;
        if let Some(p) = snapshot_path {
            config.snapshot_path = p.into();
        }
        Ok(Self {
            inner: ReportSession::new(&config),
            state: FilterState::default(),
        })
    }

    // ── Filter context ──────────────────────────────────────────────────────

    fn set_region(&mut self, region: &str) {
        self.state.set_region(region);
    }

    fn set_municipality(&mut self, municipality: &str) {
        self.state.set_municipality(municipality);
    }

    fn set_school(&mut self, school: &str) {
        self.state.set_school(school);
    }

    fn clear_filters(&mut self) {
        self.inner.clear_filters(&mut self.state);
    }

    #[getter]
    fn filters(&self) -> (String, String, String) {
        (
            self.state.region.clone(),
            self.state.municipality.clone(),
            self.state.school.clone(),
        )
    }

    /// (regions, municipalities, schools), after resetting stale selections.
    fn sidebar(&mut self) -> PyResult<(Vec<String>, Vec<String>, Vec<String>)> {
        let sidebar = self.inner.sidebar(&mut self.state)?;
        let o = sidebar.options;
        Ok((o.regions, o.municipalities, o.schools))
    }

    fn filtered(&mut self) -> PyResult<PyDataFrame> {
        Ok(PyDataFrame(self.inner.filtered(&self.state)?))
    }

    // ── Reports ─────────────────────────────────────────────────────────────

    fn grade_entry_summary(&mut self) -> PyResult<Option<PyDataFrame>> {
        let report = self.inner.grade_entry_report(&self.state)?;
        Ok(report.into_data().map(|r| PyDataFrame(r.summary)))
    }

    #[pyo3(signature = (stage=None, grade=None, subject=None))]
    fn subject_outcomes(
        &mut self,
        stage: Option<String>,
        grade: Option<String>,
        subject: Option<String>,
    ) -> PyResult<Option<PyDataFrame>> {
        let local = local_filter(stage, grade, subject);
        let report = self.inner.subject_outcomes_report(&self.state, &local)?;
        Ok(report.into_data().map(|r| PyDataFrame(r.table)))
    }

    #[pyo3(signature = (stage=None, grade=None, subject=None))]
    fn subject_averages(
        &mut self,
        stage: Option<String>,
        grade: Option<String>,
        subject: Option<String>,
    ) -> PyResult<Option<PyDataFrame>> {
        let local = local_filter(stage, grade, subject);
        let report = self.inner.subject_averages_report(&self.state, &local)?;
        Ok(report.into_data().map(|r| PyDataFrame(r.table)))
    }

    #[pyo3(signature = (stage=None, grade=None, subject=None))]
    fn region_averages(
        &mut self,
        stage: Option<String>,
        grade: Option<String>,
        subject: Option<String>,
    ) -> PyResult<Option<PyDataFrame>> {
        let local = local_filter(stage, grade, subject);
        let report = self.inner.region_averages_report(&self.state, &local)?;
        Ok(report.into_data().map(|r| PyDataFrame(r.table)))
    }

    #[pyo3(signature = (stage=None, grade=None, subject=None))]
    fn student_regions(
        &mut self,
        stage: Option<String>,
        grade: Option<String>,
        subject: Option<String>,
    ) -> PyResult<Option<PyDataFrame>> {
        let local = local_filter(stage, grade, subject);
        Ok(to_py(self.inner.student_region_report(&self.state, &local)?))
    }

    #[pyo3(signature = (stage=None, grade=None, subject=None))]
    fn student_grades(
        &mut self,
        stage: Option<String>,
        grade: Option<String>,
        subject: Option<String>,
    ) -> PyResult<Option<PyDataFrame>> {
        let local = local_filter(stage, grade, subject);
        Ok(to_py(self.inner.student_grade_report(&self.state, &local)?))
    }

    /// One page of the school ranking, or None when nothing matches.
    #[pyo3(signature = (sort_term=None, page=1))]
    fn school_ranking(
        &mut self,
        sort_term: Option<&str>,
        page: usize,
    ) -> PyResult<Option<PyDataFrame>> {
        let report = self.inner.school_ranking_report(&self.state, sort_term, page)?;
        Ok(report.into_data().map(|p| PyDataFrame(p.rows)))
    }
}

/// Run the transform; returns (snapshot rows, absentee rows).
#[pyfunction]
#[pyo3(signature = (config_path=None))]
fn run_pipeline(config_path: Option<&str>) -> PyResult<(usize, usize)> {
    let config = load_config(config_path)?;
    let report = pipeline::run(&config.pipeline)?;
    Ok((report.snapshot_rows, report.absentee_rows))
}

fn add_schema_exports(m: &Bound<'_, PyModule>) -> PyResult<()> {
    let record = PyModule::new(m.py(), "record")?;
    record.add("REGION", schema::record::REGION)?;
    record.add("MUNICIPALITY", schema::record::MUNICIPALITY)?;
    record.add("SCHOOL", schema::record::SCHOOL)?;
    record.add("SCHOOL_ID", schema::record::SCHOOL_ID)?;
    record.add("GRADE_LEVEL", schema::record::GRADE_LEVEL)?;
    record.add("SUBJECT", schema::record::SUBJECT)?;
    record.add("STUDENT_ID", schema::record::STUDENT_ID)?;
    m.add_submodule(&record)?;

    let scores = PyModule::new(m.py(), "scores")?;
    scores.add("BIMESTER_1", schema::scores::BIMESTER_1)?;
    scores.add("BIMESTER_2", schema::scores::BIMESTER_2)?;
    scores.add("BIMESTER_3", schema::scores::BIMESTER_3)?;
    scores.add("BIMESTER_4", schema::scores::BIMESTER_4)?;
    m.add_submodule(&scores)?;

    let derived = PyModule::new(m.py(), "derived")?;
    derived.add("STAGE", schema::derived::STAGE)?;
    derived.add("TERM_1_2_AVERAGE", schema::derived::TERM_1_2_AVERAGE)?;
    derived.add("STATUS", schema::derived::STATUS)?;
    derived.add("SCHOOL_LABEL", schema::derived::SCHOOL_LABEL)?;
    m.add_submodule(&derived)?;

    let status = PyModule::new(m.py(), "status")?;
    status.add("NO_GRADE", schema::status::NO_GRADE)?;
    status.add("PASSING", schema::status::PASSING)?;
    status.add("FAILING", schema::status::FAILING)?;
    m.add_submodule(&status)?;

    Ok(())
}

#[pymodule]
fn _core(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PyReportSession>()?;
    m.add_function(wrap_pyfunction!(run_pipeline, m)?)?;
    add_schema_exports(m)?;
    Ok(())
}
