use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use grade_report::config::PipelineConfig;
use grade_report::error::ReportError;
use grade_report::pipeline;
use grade_report::schema::{derived, record, roster, status};
use polars::prelude::*;
use tempfile::TempDir;

const HEADER: &str = "DIREC;MUNICÍPIO;ESCOLA;INEP ESCOLA;SÉRIE;COMPONENTE CURRICULAR;CPF PESSOA;\
NOTA 1º BIMESTRE;NOTA 2º BIMESTRE;NOTA 3º BIMESTRE;NOME DO PROFESSOR";

fn write_export(dir: &Path, name: &str, header: &str, rows: &[&str]) {
    let mut body = String::from("Relatório de notas\nGerado em 01/07/2024\n");
    body.push_str(header);
    body.push('\n');
    for row in rows {
        body.push_str(row);
        body.push('\n');
    }
    fs::write(dir.join(name), body).unwrap();
}

fn fixture() -> (TempDir, PipelineConfig) {
    let tmp = TempDir::new().unwrap();
    let input = tmp.path().join("Notas");
    fs::create_dir_all(&input).unwrap();

    write_export(
        &input,
        "a.csv",
        HEADER,
        &[
            "1ª DIREC;Natal;EE A;24000001;6º Ano;Matemática;111;7,5;6,0;;Prof X",
            "1ª DIREC;Natal;EE A;24000001;6º Ano;Arte;111;5;4;;Prof X",
            "1ª DIREC;Natal;EE A;24000001;6º Ano;Robótica;111;5;4;;Prof X",
        ],
    );
    write_export(
        &input,
        "b.csv",
        HEADER,
        &[
            "2ª DIREC;Mossoró;EE B;24000002;1ª SÉRIE;Física;222;;;;Prof Y",
            "2ª DIREC;Mossoró;EE B;24000002;5º ANO;Arte;333;8;8;;Prof Y",
            "2ª DIREC;Mossoró;EE B;24000002;2ª SÉRIE;Química;444;3;3;;Prof Y",
        ],
    );
    fs::write(
        tmp.path().join("censo_escolar.csv"),
        "CPF;NOME\n111;Ana\n222;Bruno\n333;Carla\n000.000.005-55;Davi\n",
    )
    .unwrap();

    let config = PipelineConfig {
        input_dir: input,
        roster_path: tmp.path().join("censo_escolar.csv"),
        output_dir: tmp.path().join("dados_tratados"),
        ..Default::default()
    };
    (tmp, config)
}

fn ids(df: &DataFrame, column: &str) -> BTreeSet<String> {
    df.column(column)
        .unwrap()
        .cast(&DataType::String)
        .unwrap()
        .str()
        .unwrap()
        .into_iter()
        .flatten()
        .map(str::to_string)
        .collect()
}

#[test]
fn transform_scopes_derives_and_restricts_to_roster() {
    let (_tmp, config) = fixture();
    let out = pipeline::transform(&config).unwrap();

    assert_eq!(out.input_files, 2);
    assert_eq!(out.raw_rows, 6);
    assert_eq!(out.scoped_rows, 4);

    let snapshot_ids = ids(&out.snapshot, record::STUDENT_ID);
    let roster_ids = ids(&out.absentees, roster::ID);
    assert_eq!(
        snapshot_ids,
        BTreeSet::from(["00000000111".to_string(), "00000000222".to_string()])
    );
    assert_eq!(
        roster_ids,
        BTreeSet::from(["00000000333".to_string(), "00000000555".to_string()])
    );
    assert!(out.snapshot.column("NOME DO PROFESSOR").is_err());
    assert_eq!(out.snapshot.height(), 3);

    let statuses = ids(&out.snapshot, derived::STATUS);
    assert!(statuses.contains(status::NO_GRADE));
    assert!(statuses.contains(status::PASSING));
    assert!(statuses.contains(status::FAILING));
}

#[test]
fn run_writes_snapshot_and_absentees() {
    let (_tmp, config) = fixture();
    let report = pipeline::run(&config).unwrap();

    assert!(report.snapshot_path.exists());
    assert!(report.absentee_path.exists());
    assert_eq!(report.snapshot_rows, 3);
    assert_eq!(report.absentee_rows, 2);
    assert!(report.finished_at >= report.started_at);

    let reread = ParquetReader::new(fs::File::open(&report.snapshot_path).unwrap())
        .finish()
        .unwrap();
    assert_eq!(reread.height(), 3);
}

#[test]
fn empty_input_directory_is_fatal() {
    let (tmp, mut config) = fixture();
    let empty = tmp.path().join("vazio");
    fs::create_dir_all(&empty).unwrap();
    config.input_dir = empty;

    assert!(matches!(
        pipeline::transform(&config),
        Err(ReportError::NoInputFiles { .. })
    ));
}

#[test]
fn mismatched_export_columns_abort_before_writing() {
    let (_tmp, config) = fixture();
    write_export(
        &config.input_dir,
        "c.csv",
        "DIREC;MUNICÍPIO;ESCOLA",
        &["3ª DIREC;Caicó;EE C"],
    );

    assert!(matches!(
        pipeline::run(&config),
        Err(ReportError::SchemaMismatch { .. })
    ));
    assert!(!config.snapshot_path().exists());
}

#[test]
fn roster_without_id_column_is_fatal() {
    let (_tmp, config) = fixture();
    fs::write(&config.roster_path, "NOME\nAna\n").unwrap();

    assert!(matches!(
        pipeline::transform(&config),
        Err(ReportError::MissingColumn(c)) if c == roster::ID
    ));
}

#[test]
fn exports_with_reordered_columns_are_aligned_by_name() {
    let (_tmp, config) = fixture();
    write_export(
        &config.input_dir,
        "c.csv",
        "MUNICÍPIO;DIREC;ESCOLA;INEP ESCOLA;SÉRIE;COMPONENTE CURRICULAR;CPF PESSOA;\
NOTA 2º BIMESTRE;NOTA 1º BIMESTRE;NOTA 3º BIMESTRE;NOME DO PROFESSOR",
        &["Caicó;10ª DIREC;EE C;24000010;7º ANO;Arte;222;8,0;2,0;;Prof Z"],
    );

    let out = pipeline::transform(&config).unwrap();
    assert_eq!(out.raw_rows, 7);

    let regions = ids(&out.snapshot, record::REGION);
    assert!(regions.contains("10ª DIREC"));
    let caico = out
        .snapshot
        .clone()
        .lazy()
        .filter(col(record::REGION).cast(DataType::String).eq(lit("10ª DIREC")))
        .collect()
        .unwrap();
    let b1 = caico
        .column(grade_report::schema::scores::BIMESTER_1)
        .unwrap()
        .cast(&DataType::Float64)
        .unwrap();
    assert_eq!(b1.f64().unwrap().get(0), Some(2.0));
}

#[test]
fn failed_write_leaves_no_partial_outputs() {
    let (_tmp, config) = fixture();
    // A directory squatting on the snapshot path makes the final rename fail.
    let blocker = config.snapshot_path();
    fs::create_dir_all(blocker.join("occupied")).unwrap();

    assert!(matches!(pipeline::run(&config), Err(ReportError::Io(_))));
    assert!(!config.absentee_path().exists());

    let leftovers: Vec<_> = fs::read_dir(&config.output_dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p != &blocker)
        .collect();
    assert!(leftovers.is_empty(), "unexpected files: {leftovers:?}");
}
