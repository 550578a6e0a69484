use std::error::Error;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};
use engine::{
    Ctx, Engine, HistoryFilter, MAX_LESSON_COUNT, ScheduleSlot, generate_schedule, parse_timezone,
};
use migration::MigratorTrait;
use sea_orm::{Database, DatabaseConnection};
use uuid::Uuid;

mod settings;

#[derive(Parser, Debug)]
#[command(name = "lessonbook_admin")]
#[command(about = "Admin utilities for the lesson ledger (migrations, schedules, audits)")]
struct Cli {
    /// Database connection string (overrides `LESSONBOOK_DATABASE_URL`).
    #[arg(long, global = true, env = "LESSONBOOK_DATABASE_URL")]
    database_url: Option<String>,

    /// Business timezone, e.g. `Europe/Rome` (overrides `LESSONBOOK_TIMEZONE`).
    #[arg(long, global = true, env = "LESSONBOOK_TIMEZONE")]
    timezone: Option<String>,

    /// Log filter level (overrides `LESSONBOOK_LEVEL`).
    #[arg(long, global = true, env = "LESSONBOOK_LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply or inspect schema migrations.
    Migrate(MigrateArgs),
    /// Preview the lessons a weekly pattern generates.
    Schedule(ScheduleArgs),
    /// Print a student's ledger history.
    History(HistoryArgs),
    /// Replay a student's ledger and report discrepancies.
    Verify(StudentArgs),
}

#[derive(Args, Debug)]
struct MigrateArgs {
    #[arg(value_enum, default_value_t = MigrateAction::Up)]
    action: MigrateAction,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum MigrateAction {
    Up,
    Down,
    Fresh,
    Status,
}

#[derive(Args, Debug)]
struct ScheduleArgs {
    /// Day of week, 0 = Sunday. Repeat together with `--time`.
    #[arg(long = "day", required = true)]
    days: Vec<u8>,
    /// Start time `HH:MM`, one per `--day`.
    #[arg(long = "time", required = true)]
    times: Vec<String>,
    #[arg(long)]
    start: NaiveDate,
    #[arg(long, value_parser = clap::value_parser!(u32).range(0..=i64::from(MAX_LESSON_COUNT)))]
    count: u32,
}

#[derive(Args, Debug)]
struct StudentArgs {
    #[arg(long)]
    organization: String,
    #[arg(long)]
    student: Uuid,
}

#[derive(Args, Debug)]
struct HistoryArgs {
    #[command(flatten)]
    who: StudentArgs,
    /// Only rows of this enrollment.
    #[arg(long, conflicts_with = "unallocated")]
    group: Option<Uuid>,
    /// Only rows of the unallocated balance.
    #[arg(long)]
    unallocated: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let cli = Cli::parse();
    let settings = settings::Settings::new(settings::Overrides {
        database_url: cli.database_url.clone(),
        timezone: cli.timezone.clone(),
        level: cli.log_level.clone(),
    })?;

    tracing_subscriber::fmt()
        .with_env_filter(format!(
            "lessonbook_admin={level},engine={level}",
            level = settings.level
        ))
        .init();

    let timezone = parse_timezone(&settings.timezone)?;

    match cli.command {
        Command::Migrate(args) => {
            let db = Database::connect(&settings.database_url).await?;
            migrate(&db, args.action).await?;
        }
        Command::Schedule(args) => {
            if args.days.len() != args.times.len() {
                return Err("every --day needs a matching --time".into());
            }
            let pattern = args
                .days
                .iter()
                .zip(&args.times)
                .map(|(day, time)| ScheduleSlot::parse(*day, time))
                .collect::<Result<Vec<_>, _>>()?;

            let lessons = generate_schedule(&pattern, args.start, args.count);
            if lessons.len() < args.count as usize {
                tracing::warn!(
                    "pattern produced {} of {} lessons",
                    lessons.len(),
                    args.count
                );
            }
            for lesson in lessons {
                match lesson.starts_at(timezone) {
                    Some(start) => println!("{} {}  ({})", lesson.date, lesson.time_label(), start),
                    None => println!("{} {}  (not a local time)", lesson.date, lesson.time_label()),
                }
            }
        }
        Command::History(args) => {
            let engine = connect(&settings.database_url, timezone).await?;
            let mut filter = HistoryFilter::default();
            if let Some(group_id) = args.group {
                filter = filter.group(group_id);
            } else if args.unallocated {
                filter = filter.unallocated();
            }

            let ctx = Ctx::system(args.who.organization);
            let entries = engine
                .get_ledger_history(&ctx, args.who.student, &filter)
                .await?;
            for entry in entries {
                let pool = entry
                    .target
                    .group_id()
                    .map_or_else(|| "unallocated".to_string(), |id| id.to_string());
                println!(
                    "#{:<6} {} {:<36} {:<15} {:<26} {:>+8} {:>8} -> {:<8} {} {}",
                    entry.id,
                    entry.created_at.format("%Y-%m-%d %H:%M:%S"),
                    pool,
                    entry.field.as_str(),
                    entry.reason.as_str(),
                    entry.delta,
                    entry.balance_before,
                    entry.balance_after,
                    entry.actor_id.as_deref().unwrap_or("system"),
                    entry.comment.as_deref().unwrap_or(""),
                );
            }
        }
        Command::Verify(args) => {
            let engine = connect(&settings.database_url, timezone).await?;
            let ctx = Ctx::system(args.organization);
            let discrepancies = engine.verify_ledger(&ctx, args.student).await?;
            if discrepancies.is_empty() {
                println!("ledger consistent");
            } else {
                for discrepancy in &discrepancies {
                    println!("{}", serde_json::to_string(discrepancy)?);
                }
                return Err(format!("{} discrepancies found", discrepancies.len()).into());
            }
        }
    }

    Ok(())
}

async fn migrate(
    db: &DatabaseConnection,
    action: MigrateAction,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    match action {
        MigrateAction::Up => migration::Migrator::up(db, None).await?,
        MigrateAction::Down => migration::Migrator::down(db, None).await?,
        MigrateAction::Fresh => migration::Migrator::fresh(db).await?,
        MigrateAction::Status => migration::Migrator::status(db).await?,
    }
    tracing::info!("migrate {action:?} done");
    Ok(())
}

async fn connect(
    url: &str,
    timezone: chrono_tz::Tz,
) -> Result<Engine, Box<dyn Error + Send + Sync>> {
    let db = Database::connect(url).await?;
    let engine = Engine::builder()
        .database(db)
        .timezone(timezone)
        .build()
        .await?;
    Ok(engine)
}
