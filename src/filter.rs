//! Hierarchical report filter (DIREC → municipality → school) and the
//! page-local sub-filters.
//!
//! `FilterState` is the explicit context handed to every report call. A child
//! selection is only meaningful under its ancestors' current values, so any
//! ancestor change resets the descendants.

use std::collections::BTreeSet;

use polars::prelude::*;

use crate::error::Result;
use crate::schema::{derived, record, sentinel};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FilterState {
    pub region: String,
    pub municipality: String,
    pub school: String,
}

impl Default for FilterState {
    fn default() -> Self {
        Self {
            region: sentinel::ALL_REGIONS.to_string(),
            municipality: sentinel::ALL_MUNICIPALITIES.to_string(),
            school: sentinel::ALL_SCHOOLS.to_string(),
        }
    }
}

impl FilterState {
    pub fn set_region(&mut self, region: impl Into<String>) {
        let region = region.into();
        if region != self.region {
            self.region = region;
            self.municipality = sentinel::ALL_MUNICIPALITIES.to_string();
            self.school = sentinel::ALL_SCHOOLS.to_string();
        }
    }

    pub fn set_municipality(&mut self, municipality: impl Into<String>) {
        let municipality = municipality.into();
        if municipality != self.municipality {
            self.municipality = municipality;
            self.school = sentinel::ALL_SCHOOLS.to_string();
        }
    }

    pub fn set_school(&mut self, school: impl Into<String>) {
        self.school = school.into();
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn is_unfiltered(&self) -> bool {
        *self == Self::default()
    }

    fn region(&self) -> Option<&str> {
        (self.region != sentinel::ALL_REGIONS).then_some(self.region.as_str())
    }

    fn municipality(&self) -> Option<&str> {
        (self.municipality != sentinel::ALL_MUNICIPALITIES).then_some(self.municipality.as_str())
    }

    fn school(&self) -> Option<&str> {
        (self.school != sentinel::ALL_SCHOOLS).then_some(self.school.as_str())
    }

    /// Reset stale selections to "all", top-down, against freshly derived options.
    ///
    /// Returns true when anything changed.
    pub fn reconcile(&mut self, options: &FilterOptions) -> bool {
        let before = self.clone();
        if !options.regions.contains(&self.region) {
            self.set_region(sentinel::ALL_REGIONS);
        }
        if !options.municipalities.contains(&self.municipality) {
            self.set_municipality(sentinel::ALL_MUNICIPALITIES);
        }
        if !options.schools.contains(&self.school) {
            self.set_school(sentinel::ALL_SCHOOLS);
        }
        before != *self
    }
}

/// Dropdown contents for the three sidebar filters, sentinel first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterOptions {
    pub regions: Vec<String>,
    pub municipalities: Vec<String>,
    pub schools: Vec<String>,
}

// ── Expressions ─────────────────────────────────────────────────────────────

/// `"<ESCOLA> (cód. Inep: <INEP ESCOLA>)"`, unique per school.
pub fn school_label_expr() -> Expr {
    concat_str(
        [
            col(record::SCHOOL).cast(DataType::String),
            lit(" (cód. Inep: "),
            col(record::SCHOOL_ID).cast(DataType::String),
            lit(")"),
        ],
        "",
        false,
    )
}

fn eq_str(column: &str, value: &str) -> Expr {
    col(column).cast(DataType::String).eq(lit(value.to_string()))
}

fn restrict(lf: LazyFrame, column: &str, value: Option<&str>) -> LazyFrame {
    match value {
        Some(v) => lf.filter(eq_str(column, v)),
        None => lf,
    }
}

/// Sorted distinct non-null values of a column, with an optional sentinel first.
pub fn distinct_values(df: &DataFrame, column: &str, sentinel: Option<&str>) -> Result<Vec<String>> {
    let values = df.column(column)?.cast(&DataType::String)?;
    let set: BTreeSet<String> = values
        .str()?
        .into_iter()
        .flatten()
        .map(str::to_string)
        .collect();
    Ok(sentinel
        .map(str::to_string)
        .into_iter()
        .chain(set)
        .collect())
}

// ── Option derivation ───────────────────────────────────────────────────────

pub fn region_options(df: &DataFrame) -> Result<Vec<String>> {
    distinct_values(df, record::REGION, Some(sentinel::ALL_REGIONS))
}

pub fn municipality_options(df: &DataFrame, region: &str) -> Result<Vec<String>> {
    let state = FilterState {
        region: region.to_string(),
        ..Default::default()
    };
    let scoped = restrict(df.clone().lazy(), record::REGION, state.region()).collect()?;
    distinct_values(&scoped, record::MUNICIPALITY, Some(sentinel::ALL_MUNICIPALITIES))
}

pub fn school_options(df: &DataFrame, region: &str, municipality: &str) -> Result<Vec<String>> {
    let state = FilterState {
        region: region.to_string(),
        municipality: municipality.to_string(),
        ..Default::default()
    };
    let lf = restrict(df.clone().lazy(), record::REGION, state.region());
    let scoped = restrict(lf, record::MUNICIPALITY, state.municipality())
        .select([school_label_expr().alias(derived::SCHOOL_LABEL)])
        .collect()?;
    distinct_values(&scoped, derived::SCHOOL_LABEL, Some(sentinel::ALL_SCHOOLS))
}

pub fn filter_options(df: &DataFrame, state: &FilterState) -> Result<FilterOptions> {
    Ok(FilterOptions {
        regions: region_options(df)?,
        municipalities: municipality_options(df, &state.region)?,
        schools: school_options(df, &state.region, &state.municipality)?,
    })
}

/// Restrict rows to the current filter selection. Shared by every report.
pub fn apply_filters(df: &DataFrame, state: &FilterState) -> Result<DataFrame> {
    let lf = restrict(df.clone().lazy(), record::REGION, state.region());
    let lf = restrict(lf, record::MUNICIPALITY, state.municipality());
    let lf = match state.school() {
        Some(label) => lf.filter(school_label_expr().eq(lit(label.to_string()))),
        None => lf,
    };
    Ok(lf.collect()?)
}

// ── Page-local filters ──────────────────────────────────────────────────────

/// Page-scoped sub-filters. `None` means "all".
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct LocalFilter {
    pub stage: Option<String>,
    pub grade_level: Option<String>,
    pub subject: Option<String>,
}

impl LocalFilter {
    pub fn stage(stage: impl Into<String>) -> Self {
        Self {
            stage: Some(stage.into()),
            ..Default::default()
        }
    }

    pub fn with_grade_level(mut self, grade_level: impl Into<String>) -> Self {
        self.grade_level = Some(grade_level.into());
        self
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Human-readable list of applied sub-filters, for the page caption.
    pub fn describe(&self) -> Vec<String> {
        let mut out = Vec::new();
        if let Some(s) = &self.stage {
            out.push(format!("Etapa: {s}"));
        }
        if let Some(g) = &self.grade_level {
            out.push(format!("Série: {g}"));
        }
        if let Some(c) = &self.subject {
            out.push(format!("Componente: {c}"));
        }
        out
    }

    pub fn apply(&self, df: &DataFrame) -> Result<DataFrame> {
        let lf = restrict(df.clone().lazy(), derived::STAGE, self.stage.as_deref());
        let lf = restrict(lf, record::GRADE_LEVEL, self.grade_level.as_deref());
        let lf = restrict(lf, record::SUBJECT, self.subject.as_deref());
        Ok(lf.collect()?)
    }
}

pub fn stage_options(df: &DataFrame) -> Result<Vec<String>> {
    distinct_values(df, derived::STAGE, None)
}

pub fn grade_options(df: &DataFrame) -> Result<Vec<String>> {
    distinct_values(df, record::GRADE_LEVEL, None)
}

pub fn subject_options(df: &DataFrame) -> Result<Vec<String>> {
    distinct_values(df, record::SUBJECT, None)
}
