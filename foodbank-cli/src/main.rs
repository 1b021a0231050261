use clap::{Parser, Subcommand, ValueEnum};
use foodbank::config::load_config;
use foodbank::import::{csv::parse_import_csv, parse_import_json};
use foodbank::{Backup, Config, ExportFormat, ImportOptions, ImportRow, Store};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process;
use uuid::Uuid;

/// Food bank intake: bulk client import and full backup/restore
#[derive(Parser)]
#[command(name = "foodbank", version, about)]
struct Cli {
    /// Path to the SQLite database
    #[arg(long, default_value = "foodbank.db")]
    db: PathBuf,

    /// Path to foodbank.yaml (default: ./foodbank.yaml when present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "yaml")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Yaml,
    Json,
}

#[derive(Clone, Copy, ValueEnum)]
enum BackupFormat {
    Json,
    Csv,
}

impl From<BackupFormat> for ExportFormat {
    fn from(format: BackupFormat) -> Self {
        match format {
            BackupFormat::Json => ExportFormat::Json,
            BackupFormat::Csv => ExportFormat::Csv,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Print the CSV import template
    Template,

    /// Check an import file without writing anything
    Validate {
        /// Rows to check (.csv or .json)
        file: PathBuf,
    },

    /// Import clients from a file
    Import {
        /// Rows to import (.csv or .json)
        file: PathBuf,
        /// Staff member recorded as creator of every client
        #[arg(long)]
        created_by: Uuid,
        /// Rows per transaction (0 = configured default)
        #[arg(long, default_value_t = 0)]
        batch_size: usize,
        /// Skip rows matching an existing client's name and address
        #[arg(long)]
        skip_duplicates: bool,
        /// Validate first and import only rows without errors
        #[arg(long)]
        valid_only: bool,
    },

    /// Write a full backup of all collections
    Export {
        /// json document or zip of csv files
        #[arg(long, default_value = "json")]
        format: BackupFormat,
        /// Directory to write the backup into
        #[arg(long, default_value = ".")]
        out: PathBuf,
        /// Recorded as the backup's creator
        #[arg(long, default_value = "cli")]
        created_by: String,
    },

    /// Replace all collections with the contents of a backup (.json or .zip)
    Restore {
        /// Backup to restore from
        file: PathBuf,
    },

    /// Show record counts and maintenance lock state
    Status,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("ERROR:{e}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = resolve_config(cli.config.as_deref())?;

    match cli.command {
        // The template needs no database.
        Command::Template => print!("{}", foodbank::import::csv::template()),
        command => {
            let store = Store::open(&cli.db, config)?;
            execute(&store, command, &cli.format)?;
        }
    }
    Ok(())
}

fn execute(store: &Store, command: Command, format: &OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Template => print!("{}", store.template()),

        Command::Validate { file } => {
            let rows = read_rows(&file)?;
            let report = store.validate(&rows)?;
            if !report.is_ok() {
                log::warn!("{} of {} rows have errors", report.total_rows - report.valid_rows, report.total_rows);
            }
            if report.has_warnings() {
                log::warn!("{} possible duplicate(s) of existing clients", report.warnings.len());
            }
            print_output(&report, format)?;
        }

        Command::Import {
            file,
            created_by,
            batch_size,
            skip_duplicates,
            valid_only,
        } => {
            let rows = read_rows(&file)?;
            let options = ImportOptions {
                created_by,
                batch_size,
                skip_duplicates,
            };
            if valid_only {
                let (report, result) = store.import_valid(&rows, &options)?;
                print_output(
                    &serde_json::json!({ "validation": report, "import": result }),
                    format,
                )?;
            } else {
                let result = store.import(&rows, &options)?;
                print_output(&result, format)?;
            }
        }

        Command::Export {
            format: backup_format,
            out,
            created_by,
        } => {
            let file = store.export(backup_format.into(), &created_by)?;
            let path = out.join(&file.filename);
            std::fs::write(&path, &file.content)
                .map_err(|e| format!("Failed to write '{}': {e}", path.display()))?;
            log::info!("Wrote {} ({} bytes)", path.display(), file.content.len());
            print_output(
                &serde_json::json!({ "ok": true, "file": path.display().to_string() }),
                format,
            )?;
        }

        Command::Restore { file } => {
            let backup = read_backup(&file)?;
            let counts = store.restore(&backup)?;
            print_output(
                &serde_json::json!({ "ok": true, "restored": counts }),
                format,
            )?;
        }

        Command::Status => {
            let status = store.status()?;
            print_output(&status, format)?;
        }
    }

    Ok(())
}

fn resolve_config(explicit: Option<&Path>) -> Result<Config, Box<dyn std::error::Error>> {
    match explicit {
        Some(path) => Ok(load_config(path)?),
        None => {
            let default = Path::new("foodbank.yaml");
            if default.exists() {
                Ok(load_config(default)?)
            } else {
                Ok(Config::default())
            }
        }
    }
}

fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default()
}

fn read_file(path: &Path) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    Ok(std::fs::read(path).map_err(|e| format!("Failed to read '{}': {e}", path.display()))?)
}

fn read_rows(path: &Path) -> Result<Vec<ImportRow>, Box<dyn std::error::Error>> {
    let data = read_file(path)?;
    let rows = match extension(path).as_str() {
        "csv" => parse_import_csv(&data)?,
        "json" => parse_import_json(&data)?,
        other => return Err(format!("Unsupported import file type '.{other}' (expected .csv or .json)").into()),
    };
    Ok(rows)
}

fn read_backup(path: &Path) -> Result<Backup, Box<dyn std::error::Error>> {
    let data = read_file(path)?;
    let backup = match extension(path).as_str() {
        "json" => Backup::from_json(&data)?,
        "zip" => Backup::from_zip(&data)?,
        other => return Err(format!("Unsupported backup file type '.{other}' (expected .json or .zip)").into()),
    };
    Ok(backup)
}

fn print_output<T: Serialize>(value: &T, format: &OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(value)?),
    }
    Ok(())
}
