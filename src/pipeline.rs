//! Batch transform: raw grade exports + census roster → snapshot + absentees.
//!
//! Steps run in a fixed order and every fatal error aborts before any output
//! file is written. Cell-level parse failures degrade to null.

use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use polars::prelude::*;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::compact::compact_frame;
use crate::config::PipelineConfig;
use crate::error::{ReportError, Result};
use crate::grading::{normalize_cpf, parse_score, GradeLevel, PASSING_AVERAGE};
use crate::schema::*;

/// Summary of one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub input_files: usize,
    pub raw_rows: usize,
    pub scoped_rows: usize,
    pub snapshot_rows: usize,
    pub absentee_rows: usize,
    pub snapshot_path: PathBuf,
    pub absentee_path: PathBuf,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// In-memory result of the transform, before anything is written.
pub struct TransformOutput {
    pub snapshot: DataFrame,
    pub absentees: DataFrame,
    pub input_files: usize,
    pub raw_rows: usize,
    pub scoped_rows: usize,
}

pub fn run(config: &PipelineConfig) -> Result<PipelineReport> {
    let started_at = Utc::now();
    let mut output = transform(config)?;

    fs::create_dir_all(&config.output_dir)?;
    let absentee_path = config.absentee_path();
    let snapshot_path = config.snapshot_path();
    let staged_snapshot = stage_parquet(&mut output.snapshot, &config.output_dir)?;
    let staged_absentees =
        stage_csv(&mut output.absentees, &config.output_dir, config.separator_byte()?)?;
    commit(staged_snapshot, &snapshot_path)?;
    commit(staged_absentees, &absentee_path)?;

    let report = PipelineReport {
        input_files: output.input_files,
        raw_rows: output.raw_rows,
        scoped_rows: output.scoped_rows,
        snapshot_rows: output.snapshot.height(),
        absentee_rows: output.absentees.height(),
        snapshot_path,
        absentee_path,
        started_at,
        finished_at: Utc::now(),
    };
    info!(
        files = report.input_files,
        raw_rows = report.raw_rows,
        scoped_rows = report.scoped_rows,
        snapshot_rows = report.snapshot_rows,
        absentees = report.absentee_rows,
        elapsed_ms = (report.finished_at - report.started_at).num_milliseconds(),
        "pipeline finished"
    );
    Ok(report)
}

/// Run every step in memory.
pub fn transform(config: &PipelineConfig) -> Result<TransformOutput> {
    let separator = config.separator_byte()?;

    let files = list_input_files(&config.input_dir, &config.input_extension)?;
    let raw = ingest(&files, separator, config.header_offset)?;
    let raw_rows = raw.height();
    info!(files = files.len(), rows = raw_rows, "ingested raw exports");

    let df = prune(raw)?;
    let df = normalize_numeric(df)?;
    let df = scope_filter(df)?;
    let scoped_rows = df.height();
    info!(rows = scoped_rows, "scope filter applied");

    let df = derive(df)?;
    let df = compact_frame(df)?;

    let census = read_csv_as_strings(&config.roster_path, separator, 0)?;
    let (snapshot, absentees) = restrict_to_roster(df, census)?;
    info!(
        rows = snapshot.height(),
        absentees = absentees.height(),
        "roster restriction applied"
    );

    Ok(TransformOutput {
        snapshot,
        absentees,
        input_files: files.len(),
        raw_rows,
        scoped_rows,
    })
}

// ── Step 1: ingest ──────────────────────────────────────────────────────────

pub fn list_input_files(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case(extension))
        })
        .collect();
    files.sort();

    if files.is_empty() {
        return Err(ReportError::NoInputFiles {
            dir: dir.display().to_string(),
            extension: extension.to_string(),
        });
    }
    Ok(files)
}

/// Read every export and stack them.
///
/// Files are aligned to the first file's column order; a file with a
/// different column set is a schema mismatch.
pub fn ingest(files: &[PathBuf], separator: u8, skip_rows: usize) -> Result<DataFrame> {
    let mut combined: Option<DataFrame> = None;
    for path in files {
        let df = read_csv_as_strings(path, separator, skip_rows)?;
        debug!(file = %path.display(), rows = df.height(), "read export");
        match combined.as_mut() {
            None => combined = Some(df),
            Some(acc) => {
                let expected: BTreeSet<&str> = acc.get_column_names_str().into_iter().collect();
                let found: BTreeSet<&str> = df.get_column_names_str().into_iter().collect();
                if expected != found {
                    return Err(ReportError::SchemaMismatch {
                        file: path.display().to_string(),
                        detail: format!(
                            "missing {:?}, unexpected {:?}",
                            expected.difference(&found).collect::<Vec<_>>(),
                            found.difference(&expected).collect::<Vec<_>>()
                        ),
                    });
                }
                let aligned = df.select(acc.get_column_names_str())?;
                acc.vstack_mut(&aligned)?;
            }
        }
    }
    combined.ok_or_else(|| ReportError::General("no exports were read".into()))
}

/// Read a delimited file with all columns as String dtype.
/// Trims whitespace from column names.
pub fn read_csv_as_strings(path: &Path, separator: u8, skip_rows: usize) -> Result<DataFrame> {
    let mut df = CsvReadOptions::default()
        .with_has_header(true)
        .with_skip_rows(skip_rows)
        .with_infer_schema_length(Some(0))
        .map_parse_options(|opts| opts.with_separator(separator))
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()?;

    let trimmed: Vec<String> = df
        .get_column_names_str()
        .iter()
        .map(|c| c.trim().to_string())
        .collect();
    df.set_column_names(trimmed.as_slice())?;
    Ok(df)
}

// ── Step 2: prune ───────────────────────────────────────────────────────────

pub fn prune(df: DataFrame) -> Result<DataFrame> {
    let present: HashSet<&str> = PRUNED_COLUMNS
        .iter()
        .copied()
        .filter(|c| df.column(c).is_ok())
        .collect();
    for missing in PRUNED_COLUMNS.iter().filter(|c| !present.contains(*c)) {
        warn!(column = %missing, "pruned column not present in export");
    }

    let keep: Vec<String> = df
        .get_column_names_str()
        .iter()
        .filter(|c| !present.contains(*c))
        .map(|c| c.to_string())
        .collect();
    Ok(df.select(keep)?)
}

// ── Step 3: numeric normalize ───────────────────────────────────────────────

/// Parse the score columns (decimal comma allowed) and the integer id columns.
pub fn normalize_numeric(mut df: DataFrame) -> Result<DataFrame> {
    for name in scores::ALL {
        if df.column(name).is_err() {
            continue;
        }
        let parsed: Float64Chunked = df
            .column(name)?
            .str()?
            .into_iter()
            .map(|v| v.and_then(parse_score))
            .collect();
        let nulls = parsed.null_count();
        df.with_column(parsed.with_name(name.into()).into_series())?;
        debug!(column = name, nulls, "parsed score column");
    }

    let int_cols: Vec<Expr> = INTEGER_COLUMNS
        .iter()
        .filter(|c| df.column(c).is_ok())
        .map(|c| {
            col(*c)
                .str()
                .strip_chars(lit(" \t\r\n"))
                .cast(DataType::Int64)
        })
        .collect();
    if int_cols.is_empty() {
        return Ok(df);
    }
    Ok(df.lazy().with_columns(int_cols).collect()?)
}

// ── Step 4: scope filter ────────────────────────────────────────────────────

fn require_columns(df: &DataFrame, required: &[&str]) -> Result<()> {
    for &col_name in required {
        if df.column(col_name).is_err() {
            return Err(ReportError::MissingColumn(col_name.to_string()));
        }
    }
    Ok(())
}

/// Records that passed the scope filter: every grade label is canonical.
///
/// Only [`scope_filter`] builds one, so [`derive`] never sees an unknown grade.
#[derive(Debug, Clone)]
pub struct ScopedFrame(DataFrame);

impl ScopedFrame {
    pub fn frame(&self) -> &DataFrame {
        &self.0
    }

    pub fn height(&self) -> usize {
        self.0.height()
    }
}

/// Keep only reportable grade levels (canonicalized) and BNCC subjects.
pub fn scope_filter(mut df: DataFrame) -> Result<ScopedFrame> {
    require_columns(&df, &[record::GRADE_LEVEL, record::SUBJECT])?;

    let canonical: StringChunked = df
        .column(record::GRADE_LEVEL)?
        .str()?
        .into_iter()
        .map(|v| v.and_then(GradeLevel::parse).map(GradeLevel::label))
        .collect();
    df.with_column(canonical.with_name(record::GRADE_LEVEL.into()).into_series())?;

    let bncc = Series::new("bncc".into(), BNCC_SUBJECTS);
    let df = df
        .lazy()
        .filter(col(record::GRADE_LEVEL).is_not_null())
        .filter(col(record::SUBJECT).is_in(lit(bncc).implode(), false))
        .collect()?;
    Ok(ScopedFrame(df))
}

// ── Step 5: derive ──────────────────────────────────────────────────────────

/// Add stage, term 1–2 average and status.
pub fn derive(scoped: ScopedFrame) -> Result<DataFrame> {
    let ScopedFrame(mut df) = scoped;
    require_columns(
        &df,
        &[record::GRADE_LEVEL, scores::BIMESTER_1, scores::BIMESTER_2],
    )?;

    let stage: StringChunked = df
        .column(record::GRADE_LEVEL)?
        .str()?
        .into_iter()
        .map(|v| v.and_then(GradeLevel::parse).map(|g| g.stage().label()))
        .collect();
    df.with_column(stage.with_name(derived::STAGE.into()).into_series())?;

    let b1 = col(scores::BIMESTER_1);
    let b2 = col(scores::BIMESTER_2);
    let average = when(b1.clone().is_null())
        .then(b2.clone())
        .when(b2.clone().is_null())
        .then(b1.clone())
        .otherwise((b1 + b2) / lit(2.0))
        .alias(derived::TERM_1_2_AVERAGE);

    let avg = col(derived::TERM_1_2_AVERAGE);
    let status_expr = when(avg.clone().is_null())
        .then(lit(status::NO_GRADE))
        .when(avg.gt_eq(lit(PASSING_AVERAGE)))
        .then(lit(status::PASSING))
        .otherwise(lit(status::FAILING))
        .alias(derived::STATUS);

    Ok(df
        .lazy()
        .with_column(average)
        .with_column(status_expr)
        .collect()?)
}

// ── Step 7: roster restriction ──────────────────────────────────────────────

fn normalized_ids(df: &DataFrame, column: &str) -> Result<StringChunked> {
    let ids = df.column(column)?.cast(&DataType::String)?;
    Ok(ids
        .str()?
        .into_iter()
        .map(|v| v.map(normalize_cpf))
        .collect::<StringChunked>()
        .with_name(column.into()))
}

/// Split into (records of roster students, roster rows with no record).
pub fn restrict_to_roster(
    mut records: DataFrame,
    mut census: DataFrame,
) -> Result<(DataFrame, DataFrame)> {
    require_columns(&census, &[roster::ID])?;
    require_columns(&records, &[record::STUDENT_ID])?;

    let roster_ids = normalized_ids(&census, roster::ID)?;
    census.with_column(roster_ids.clone().into_series())?;

    let record_ids = normalized_ids(&records, record::STUDENT_ID)?;
    records.with_column(record_ids.clone().into_series())?;

    let known: HashSet<&str> = record_ids.into_iter().flatten().collect();
    let enrolled: HashSet<&str> = roster_ids.into_iter().flatten().collect();

    let absent_mask: BooleanChunked = census
        .column(roster::ID)?
        .str()?
        .into_iter()
        .map(|v| v.is_some_and(|id| !known.contains(id)))
        .collect();
    let keep_mask: BooleanChunked = records
        .column(record::STUDENT_ID)?
        .str()?
        .into_iter()
        .map(|v| v.is_some_and(|id| enrolled.contains(id)))
        .collect();

    let absentees = census.filter(&absent_mask)?;
    let snapshot = records.filter(&keep_mask)?;
    Ok((snapshot, absentees))
}

// ── Output ──────────────────────────────────────────────────────────────────

// Outputs are staged next to their destination and renamed into place, so a
// failed run never leaves a truncated file behind.

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    }
}

fn stage_parquet(df: &mut DataFrame, dir: &Path) -> Result<NamedTempFile> {
    let mut staged = NamedTempFile::new_in(dir)?;
    ParquetWriter::new(staged.as_file_mut())
        .with_compression(ParquetCompression::Snappy)
        .finish(df)?;
    Ok(staged)
}

fn stage_csv(df: &mut DataFrame, dir: &Path, separator: u8) -> Result<NamedTempFile> {
    let mut staged = NamedTempFile::new_in(dir)?;
    CsvWriter::new(staged.as_file_mut())
        .include_header(true)
        .with_separator(separator)
        .finish(df)?;
    Ok(staged)
}

fn commit(staged: NamedTempFile, path: &Path) -> Result<()> {
    staged.persist(path).map_err(|e| e.error)?;
    info!(path = %path.display(), "wrote output");
    Ok(())
}

pub fn write_snapshot(df: &mut DataFrame, path: &Path) -> Result<()> {
    let staged = stage_parquet(df, parent_dir(path))?;
    commit(staged, path)
}

pub fn write_csv(df: &mut DataFrame, path: &Path, separator: u8) -> Result<()> {
    let staged = stage_csv(df, parent_dir(path), separator)?;
    commit(staged, path)
}
