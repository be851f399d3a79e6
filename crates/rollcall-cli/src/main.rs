use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDate, NaiveDateTime};
use clap::{Parser, Subcommand};
use rollcall_core::interchange::{export_csv, import_csv};
use rollcall_core::ledger::{record_check_in, record_check_out};
use rollcall_core::report::{daily_summary, history_filter, DEFAULT_HISTORY_DAYS};
use rollcall_core::types::{AttendanceRecord, NewEmployee, ReportFilter, TIMESTAMP_FORMAT};
use rollcall_core::Ledger;
use rollcall_store::ledger::DEFAULT_BUSY_TIMEOUT;
use rollcall_store::SqliteLedger;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall attendance kiosk CLI")]
struct Cli {
    /// Attendance database (default: $XDG_DATA_HOME/rollcall/attendance.db)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record a check-in
    CheckIn {
        name: String,
        /// Check-in time, "YYYY-MM-DD HH:MM:SS" (default: now)
        #[arg(long, value_parser = parse_timestamp)]
        at: Option<NaiveDateTime>,
    },
    /// Record a check-out against today's check-in
    CheckOut {
        name: String,
        /// Check-out time, "YYYY-MM-DD HH:MM:SS" (default: now)
        #[arg(long, value_parser = parse_timestamp)]
        at: Option<NaiveDateTime>,
    },
    /// Show the daily attendance summary
    Summary {
        /// Day to summarize (default: today)
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long)]
        json: bool,
    },
    /// List attendance records
    Report {
        /// First day, inclusive
        #[arg(long)]
        from: Option<NaiveDate>,
        /// Last day, inclusive
        #[arg(long)]
        to: Option<NaiveDate>,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Manage the employee roster
    Employee {
        #[command(subcommand)]
        action: EmployeeCommand,
    },
    /// Import a register log or a previous export
    Import { file: PathBuf },
    /// Export attendance records as CSV
    Export {
        file: PathBuf,
        #[arg(long)]
        from: Option<NaiveDate>,
        #[arg(long)]
        to: Option<NaiveDate>,
    },
    /// Show one employee's recent attendance
    History {
        name: String,
        #[arg(long, default_value_t = DEFAULT_HISTORY_DAYS)]
        days: u64,
        #[arg(long)]
        json: bool,
    },
    /// Show kiosk daemon status
    Status {
        /// Talk to the daemon on the system bus instead of the session bus
        #[arg(long)]
        system: bool,
    },
}

#[derive(Subcommand)]
enum EmployeeCommand {
    /// Register a new employee
    Add {
        name: String,
        /// External employee code (e.g. "EMP001")
        #[arg(long)]
        code: Option<String>,
        #[arg(long)]
        department: Option<String>,
        #[arg(long)]
        position: Option<String>,
    },
    /// List employees
    List {
        /// Include deactivated employees
        #[arg(long)]
        all: bool,
    },
    /// Deactivate an employee; their attendance history is kept
    Deactivate { name: String },
}

#[zbus::proxy(
    interface = "org.rollcall.Attendance1",
    default_service = "org.rollcall.Attendance1",
    default_path = "/org/rollcall/Attendance1"
)]
trait Attendance {
    fn status(&self) -> zbus::Result<String>;
}

fn parse_timestamp(raw: &str) -> Result<NaiveDateTime, String> {
    let raw = raw.trim();
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S"))
        .map_err(|e| format!("expected \"YYYY-MM-DD HH:MM:SS\": {e}"))
}

fn now() -> NaiveDateTime {
    Local::now().naive_local()
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Commands::Status { system } = cli.command {
        let conn = if system {
            zbus::Connection::system().await?
        } else {
            zbus::Connection::session().await?
        };
        let proxy = AttendanceProxy::new(&conn).await?;
        match proxy.status().await {
            Ok(status) => println!("{status}"),
            Err(e) => println!("rollcalld: not connected ({e})"),
        }
        return Ok(());
    }

    let db = cli.db.unwrap_or_else(rollcall_store::default_db_path);
    tracing::debug!(db = %db.display(), "using attendance database");
    let ledger = SqliteLedger::open(&db, DEFAULT_BUSY_TIMEOUT)
        .with_context(|| format!("opening attendance database {}", db.display()))?;
    run(&ledger, cli.command)
}

fn run(ledger: &SqliteLedger, command: Commands) -> Result<()> {
    match command {
        Commands::CheckIn { name, at } => {
            let record = record_check_in(ledger, &name, at.unwrap_or_else(now))?;
            let time = record.check_in.map(|t| t.format("%H:%M:%S").to_string()).unwrap_or_default();
            println!("{} checked in at {time}", record.name);
        }
        Commands::CheckOut { name, at } => {
            let record = record_check_out(ledger, &name, at.unwrap_or_else(now))?;
            println!(
                "{} checked out (total hours: {:.2})",
                record.name,
                record.total_hours.unwrap_or(0.0)
            );
        }
        Commands::Summary { date, json } => {
            let summary = daily_summary(ledger, date.unwrap_or_else(|| Local::now().date_naive()))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!("{summary}");
            }
        }
        Commands::Report { from, to, name, json } => {
            let filter = ReportFilter {
                start: from,
                end: to,
                name,
            };
            print_records(&ledger.query(&filter)?, json)?;
        }
        Commands::Employee { action } => employee(ledger, action)?,
        Commands::Import { file } => {
            let reader = std::fs::File::open(&file).with_context(|| format!("opening {}", file.display()))?;
            let report = import_csv(ledger, std::io::BufReader::new(reader))?;
            println!(
                "Imported {} check-ins ({} with check-out, {} check-outs rejected); {} duplicates, {} ignored, {} skipped",
                report.imported,
                report.checked_out,
                report.check_out_rejected,
                report.duplicates,
                report.ignored,
                report.skipped
            );
        }
        Commands::Export { file, from, to } => {
            let records = ledger.query(&ReportFilter {
                start: from,
                end: to,
                name: None,
            })?;
            let writer = std::fs::File::create(&file).with_context(|| format!("creating {}", file.display()))?;
            let rows = export_csv(&records, std::io::BufWriter::new(writer))?;
            println!("Exported {rows} records to {}", file.display());
        }
        Commands::History { name, days, json } => {
            let filter = history_filter(&name, days, Local::now().date_naive());
            print_records(&ledger.query(&filter)?, json)?;
        }
        Commands::Status { .. } => bail!("status is answered by the daemon"),
    }
    Ok(())
}

fn employee(ledger: &SqliteLedger, action: EmployeeCommand) -> Result<()> {
    match action {
        EmployeeCommand::Add {
            name,
            code,
            department,
            position,
        } => {
            let employee = ledger.add_employee(&NewEmployee {
                name,
                employee_code: code,
                department,
                position,
            })?;
            println!("Registered {} (id {})", employee.name, employee.id);
        }
        EmployeeCommand::List { all } => {
            let employees = ledger.list_employees(all)?;
            if employees.is_empty() {
                println!("No employees registered");
            }
            for e in employees {
                println!(
                    "{:<24} {:<10} {:<16} {:<16}{}",
                    e.name,
                    e.employee_code.as_deref().unwrap_or("-"),
                    e.department.as_deref().unwrap_or("-"),
                    e.position.as_deref().unwrap_or("-"),
                    if e.active { "" } else { " (inactive)" }
                );
            }
        }
        EmployeeCommand::Deactivate { name } => {
            ledger.deactivate_employee(&name)?;
            println!("Deactivated {}", name.trim());
        }
    }
    Ok(())
}

fn print_records(records: &[AttendanceRecord], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(records)?);
    } else if records.is_empty() {
        println!("No attendance records");
    } else {
        print!("{}", render_records(records));
    }
    Ok(())
}

fn render_records(records: &[AttendanceRecord]) -> String {
    let time = |t: Option<NaiveDateTime>| t.map(|t| t.format("%H:%M:%S").to_string()).unwrap_or_else(|| "-".into());
    let mut out = format!("{:<24} {:<10} {:<8} {:<8} {:>6}\n", "Name", "Date", "In", "Out", "Hours");
    for r in records {
        out.push_str(&format!(
            "{:<24} {:<10} {:<8} {:<8} {:>6}\n",
            r.name,
            r.date,
            time(r.check_in),
            time(r.check_out),
            r.total_hours.map(|h| format!("{h:.2}")).unwrap_or_else(|| "-".into())
        ));
    }
    out
}
