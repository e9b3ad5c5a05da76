//! Command-line front end.
//!
//! ```bash
//! grade-report [--config report.toml] transform [--input-dir Notas] [--roster censo_escolar.csv]
//! grade-report [--config report.toml] summary [--region "1ª DIREC"] [--municipality Natal]
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use grade_report::aggregation::AverageSummary;
use grade_report::{pipeline, Config, FilterState, LocalFilter, Report, ReportSession};

#[derive(Parser, Debug)]
#[clap(name = "grade-report")]
#[clap(about = "Transform grade exports and print school performance reports")]
struct Args {
    /// TOML configuration file; built-in defaults when absent
    #[clap(long, global = true, env = "GRADE_REPORT_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build the snapshot and absentee list from the raw exports
    Transform {
        #[clap(long, env = "GRADE_REPORT_INPUT_DIR")]
        input_dir: Option<PathBuf>,

        #[clap(long, env = "GRADE_REPORT_ROSTER")]
        roster: Option<PathBuf>,

        #[clap(long, env = "GRADE_REPORT_OUTPUT_DIR")]
        output_dir: Option<PathBuf>,
    },

    /// Print the report tables for one filter selection
    Summary {
        #[clap(long, env = "GRADE_REPORT_SNAPSHOT")]
        snapshot: Option<PathBuf>,

        #[clap(long)]
        region: Option<String>,

        #[clap(long)]
        municipality: Option<String>,

        /// School label, e.g. "EE X (cód. Inep: 24000001)"
        #[clap(long)]
        school: Option<String>,

        /// Ranking page to show
        #[clap(long, default_value = "1")]
        page: usize,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("grade_report=info")),
        )
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => Config::default(),
    };

    match args.command {
        Command::Transform {
            input_dir,
            roster,
            output_dir,
        } => {
            let pipeline_config = &mut config.pipeline;
            if let Some(dir) = input_dir {
                pipeline_config.input_dir = dir;
            }
            if let Some(path) = roster {
                pipeline_config.roster_path = path;
            }
            if let Some(dir) = output_dir {
                pipeline_config.output_dir = dir;
            }
            let report = pipeline::run(pipeline_config).context("transform failed")?;
            info!(
                snapshot = %report.snapshot_path.display(),
                absentees = %report.absentee_path.display(),
                "done"
            );
        }
        Command::Summary {
            snapshot,
            region,
            municipality,
            school,
            page,
        } => {
            if let Some(path) = snapshot {
                config.report.snapshot_path = path;
            }
            let mut state = FilterState::default();
            if let Some(r) = region {
                state.set_region(r);
            }
            if let Some(m) = municipality {
                state.set_municipality(m);
            }
            if let Some(s) = school {
                state.set_school(s);
            }
            print_summary(&mut ReportSession::new(&config.report), &mut state, page)?;
        }
    }
    Ok(())
}

fn print_summary(session: &mut ReportSession, state: &mut FilterState, page: usize) -> Result<()> {
    let sidebar = session.sidebar(state).context("loading snapshot")?;
    if sidebar.reconciled {
        println!("Filtro ajustado: {} / {} / {}", state.region, state.municipality, state.school);
    }
    let all = LocalFilter::default();

    section("Lançamento de notas");
    match session.grade_entry_report(state)? {
        Report::Data(r) => {
            println!("{}", r.summary);
            for (term, table) in r.by_region {
                println!("{term}\n{table}");
            }
        }
        Report::NoData(msg) => println!("{msg}"),
    }

    section("Aprovação por componente");
    match session.subject_outcomes_report(state, &all)? {
        Report::Data(r) => {
            println!("Aprovados: {:.1}%  Reprovados: {:.1}%", r.pct_passing, r.pct_failing);
            println!("{}", r.table);
        }
        Report::NoData(msg) => println!("{msg}"),
    }

    section("Médias por componente");
    match session.subject_averages_report(state, &all)? {
        Report::Data(r) => {
            print_averages(&r.overall);
            println!("{}", r.table);
        }
        Report::NoData(msg) => println!("{msg}"),
    }

    section("Médias por DIREC");
    match session.region_averages_report(state, &all)? {
        Report::Data(r) => println!("{}", r.table),
        Report::NoData(msg) => println!("{msg}"),
    }

    section("Situação dos estudantes");
    match session.student_outcomes_report(state, &all)? {
        Report::Data(s) => println!(
            "Estudantes: {}  Aprovados: {} ({:.2}%)  Reprovados: {} ({:.2}%)",
            s.total, s.passing, s.pct_passing, s.failing, s.pct_failing
        ),
        Report::NoData(msg) => println!("{msg}"),
    }
    for (title, report) in [
        ("Estudantes por DIREC", session.student_region_report(state, &all)?),
        ("Estudantes por série", session.student_grade_report(state, &all)?),
    ] {
        section(title);
        match report {
            Report::Data(table) => println!("{table}"),
            Report::NoData(msg) => println!("{msg}"),
        }
    }

    section("Escolas com notas não lançadas");
    match session.school_ranking_report(state, None, page)? {
        Report::Data(p) => {
            println!(
                "Mostrando {}–{} de {} escolas (página {}/{})",
                p.first_item, p.last_item, p.total_items, p.page, p.total_pages
            );
            println!("{}", p.rows);
        }
        Report::NoData(msg) => println!("{msg}"),
    }
    Ok(())
}

fn section(title: &str) {
    println!("\n== {title} ==");
}

fn print_averages(summary: &AverageSummary) {
    let fmt = |v: Option<f64>| v.map_or_else(|| "-".to_string(), |v| format!("{v:.2}"));
    println!(
        "1º bim: {}  2º bim: {}  semestre: {}",
        fmt(summary.bimester_1),
        fmt(summary.bimester_2),
        fmt(summary.semester)
    );
}
