use std::path::{Path, PathBuf};
use std::process;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand, ValueEnum};
use exam_core::model::{AttemptId, ExamType, Selection, SubjectId, UserId};
use exam_core::report::TrendGranularity;
use exam_core::settings::ExamSettings;
use services::{AppServices, Clock, CountdownConfig};

mod seed;
mod take;

#[derive(Parser)]
#[command(name = "exam", version, about = "Timed past-question practice")]
struct Cli {
    /// SQLite database URL or path
    #[arg(long, env = "EXAM_DB_URL", default_value = "sqlite:exam.sqlite3", global = true)]
    db: String,

    /// Learner id
    #[arg(long, default_value = "local", global = true)]
    user: String,

    /// Override an exam's time budget, e.g. `utme=5400`
    #[arg(long = "budget", value_name = "EXAM=SECS", global = true)]
    budgets: Vec<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import questions from a JSON file
    Seed {
        /// Path to a JSON array of questions
        file: PathBuf,
    },

    /// List subjects and years for an exam
    Subjects {
        #[arg(long, default_value = "utme")]
        exam: String,
    },

    /// Start a new timed session
    Take {
        #[arg(long, default_value = "utme")]
        exam: String,

        /// Subject and year as `SUBJECT_ID:YEAR`; repeat for more
        #[arg(long = "select", value_name = "SUBJECT:YEAR", required = true)]
        selections: Vec<String>,

        /// Shuffle questions inside each selection
        #[arg(long)]
        shuffle: bool,
    },

    /// List unfinished attempts, or resume one
    Resume {
        attempt: Option<u64>,
    },

    /// Score trend and per-subject means
    History {
        #[arg(long, value_enum, default_value_t = Granularity::Day)]
        by: Granularity,
    },

    /// One row per past attempt
    Rollup,
}

#[derive(Clone, Copy, ValueEnum)]
enum Granularity {
    Day,
    Year,
}

impl From<Granularity> for TrendGranularity {
    fn from(value: Granularity) -> Self {
        match value {
            Granularity::Day => TrendGranularity::Day,
            Granularity::Year => TrendGranularity::Year,
        }
    }
}

fn parse_selection(raw: &str) -> anyhow::Result<Selection> {
    let (subject, year) = raw
        .split_once(':')
        .with_context(|| format!("selection `{raw}` must look like SUBJECT_ID:YEAR"))?;
    let subject: SubjectId = subject
        .trim()
        .parse()
        .with_context(|| format!("invalid subject id in `{raw}`"))?;
    let year: u16 = year
        .trim()
        .parse()
        .with_context(|| format!("invalid year in `{raw}`"))?;
    Ok(Selection::new(subject, year))
}

fn build_settings(budgets: &[String]) -> anyhow::Result<ExamSettings> {
    let mut settings = ExamSettings::standard();
    for raw in budgets {
        let (exam, secs) = raw
            .split_once('=')
            .with_context(|| format!("budget `{raw}` must look like EXAM=SECS"))?;
        let secs: u32 = secs
            .trim()
            .parse()
            .with_context(|| format!("invalid seconds in `{raw}`"))?;
        settings = settings.with_budget(ExamType::new(exam)?, secs)?;
    }
    Ok(settings)
}

fn normalize_sqlite_url(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed == "sqlite::memory:" || trimmed.starts_with("sqlite://") {
        return trimmed.to_string();
    }

    let path_str = trimmed.strip_prefix("sqlite:").unwrap_or(trimmed);
    let path = Path::new(path_str);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(path)
    };
    format!("sqlite://{}", absolute.display())
}

fn prepare_sqlite_file(db_url: &str) -> anyhow::Result<()> {
    if db_url == "sqlite::memory:" {
        return Ok(());
    }

    let Some(path) = db_url.strip_prefix("sqlite://") else {
        bail!("invalid --db value: {db_url}");
    };
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() {
        bail!("invalid --db value: {db_url}");
    }

    let path = Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if !path.exists() {
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)
            .with_context(|| format!("cannot create {}", path.display()))?;
    }
    Ok(())
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let settings = build_settings(&cli.budgets)?;
    let user = UserId::new(&cli.user)?;

    let db_url = normalize_sqlite_url(&cli.db);
    prepare_sqlite_file(&db_url)?;
    let services =
        AppServices::new_sqlite(&db_url, Clock::default(), settings, CountdownConfig::default())
            .await
            .with_context(|| format!("cannot open {db_url}"))?;
    tracing::debug!(db = %db_url, "storage ready");

    match cli.command {
        Commands::Seed { file } => seed::execute(&services, &file).await,
        Commands::Subjects { exam } => {
            let exam = ExamType::new(&exam)?;
            let subjects = services.catalog().subjects(&exam).await?;
            if subjects.is_empty() {
                println!("no subjects for {exam}");
            }
            for entry in subjects {
                let years: Vec<String> = entry.years.iter().map(u16::to_string).collect();
                println!("{:>4}  {:<24} {}", entry.subject_id, entry.subject, years.join(", "));
            }
            Ok(())
        }
        Commands::Take {
            exam,
            selections,
            shuffle,
        } => {
            let exam = ExamType::new(&exam)?;
            let selections = selections
                .iter()
                .map(|raw| parse_selection(raw))
                .collect::<anyhow::Result<Vec<_>>>()?;
            let assembled = services
                .assembler()
                .as_ref()
                .clone()
                .with_shuffle_within_selection(shuffle)
                .assemble(user, exam, selections)
                .await?;
            for warning in &assembled.warnings {
                println!("warning: {warning}");
            }
            let attempts = services.attempts();
            let id = attempts.begin(assembled).await?;
            take::run(&attempts, id).await
        }
        Commands::Resume { attempt: None } => {
            let incomplete = services.resume().list_incomplete(&user).await?;
            if incomplete.is_empty() {
                println!("nothing to resume");
            }
            for entry in incomplete {
                println!(
                    "#{:<5} {:<8} {:<24} {}  {}/{} answered",
                    entry.attempt_id,
                    entry.exam_type,
                    entry.subject,
                    entry.year,
                    entry.answered_question_ids.len(),
                    entry.total_questions
                );
            }
            Ok(())
        }
        Commands::Resume {
            attempt: Some(attempt),
        } => {
            let resumed = services
                .resume()
                .resume(&user, AttemptId::new(attempt))
                .await?;
            if !resumed.dropped.is_empty() {
                println!(
                    "{} earlier answers no longer match a question and were dropped",
                    resumed.dropped.len()
                );
            }
            if let Some(scores) = &resumed.scores {
                println!("time had already run out; scoring your answers");
                take::print_scores(scores);
                return Ok(());
            }
            take::run(&services.attempts(), resumed.session.id()).await
        }
        Commands::History { by } => {
            let history = services.history();
            let trend = history.trend(&user, by.into()).await?;
            for point in &trend.value {
                println!(
                    "{:<12} subject {:>4}  {:>5.1}%  ({} sessions)",
                    point.period, point.subject_id, point.percentage, point.samples
                );
            }
            let means = history.subject_means(&user).await?;
            if !means.value.is_empty() {
                println!();
                for (subject, mean) in &means.value {
                    println!("subject {subject:>4}  mean {mean:>5.1}%");
                }
            }
            for diagnostic in trend.diagnostics.iter().chain(&means.diagnostics) {
                tracing::warn!(index = diagnostic.index, kind = %diagnostic.kind, "skipped score record");
            }
            Ok(())
        }
        Commands::Rollup => {
            let report = services.history().exam_rollup(&user).await?;
            if report.value.is_empty() {
                println!("no attempts yet");
            }
            for row in &report.value {
                println!(
                    "#{:<5} {}  {:<8} {} subjects  {}/{}  {}%",
                    row.attempt_id,
                    row.date,
                    row.exam_type,
                    row.distinct_subject_count,
                    row.correct_answers,
                    row.total_questions,
                    row.percentage
                );
            }
            if !report.is_clean() {
                println!("({} malformed answer records skipped)", report.diagnostics.len());
            }
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        eprintln!("Error: {err:#}");
        process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selections_parse_subject_and_year() {
        let selection = parse_selection(" 3 : 2019").unwrap();
        assert_eq!(selection, Selection::new(SubjectId::new(3), 2019));
        assert!(parse_selection("3-2019").is_err());
        assert!(parse_selection("x:2019").is_err());
    }

    #[test]
    fn budget_overrides_apply_per_exam() {
        let settings = build_settings(&["utme=60".to_string()]).unwrap();
        assert_eq!(settings.budget_for(&ExamType::new("utme").unwrap()), 60);
        assert_eq!(settings.budget_for(&ExamType::new("wassce").unwrap()), 10_800);
        assert!(build_settings(&["utme=0".to_string()]).is_err());
        assert!(build_settings(&["utme".to_string()]).is_err());
    }

    #[test]
    fn relative_paths_become_absolute_urls() {
        assert_eq!(normalize_sqlite_url("sqlite::memory:"), "sqlite::memory:");
        let url = normalize_sqlite_url("sqlite:exam.sqlite3");
        assert!(url.starts_with("sqlite:///"));
        assert!(url.ends_with("exam.sqlite3"));
    }

    #[test]
    fn cli_accepts_repeated_selections() {
        let cli = Cli::try_parse_from([
            "exam", "take", "--select", "1:2020", "--select", "2:2021", "--budget", "utme=90",
        ])
        .unwrap();
        assert_eq!(cli.budgets, vec!["utme=90".to_string()]);
        match cli.command {
            Commands::Take { selections, .. } => assert_eq!(selections.len(), 2),
            _ => panic!("expected take"),
        }
    }
}
