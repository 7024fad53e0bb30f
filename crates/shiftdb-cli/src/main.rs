mod report;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use shiftdb_config::{AppConfig, ConfigLoader};
use shiftdb_db::{Database, DatabaseOptions};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "shiftdb",
    version,
    about = "Bring a SQLite file in line with declared table models"
)]
struct Cli {
    /// Model file (.yml, .yaml or .toml)
    #[arg(short, long, global = true, default_value = "shiftdb.yml")]
    config: PathBuf,

    /// Database file, overriding `database` from the model file
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    /// Debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Log every SQL statement the migration executes
    #[arg(long, global = true)]
    log_sql: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database to match the model file
    Migrate,
    /// Show what `migrate` would do without touching the file
    Plan {
        #[arg(long)]
        json: bool,
    },
    /// List the managed tables and their versions
    Tables {
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);

    match &cli.command {
        Commands::Migrate => {
            let config = load_config(&cli.config)?;
            let database = database_path(&cli, Some(&config))?;
            let models = config.descriptors()?;

            let mut db = Database::new(DatabaseOptions {
                log_sql: cli.log_sql || config.log_sql,
            });
            if let Err(e) = db.create(&target(&database), &models) {
                if e.is_rolled_back() {
                    warn!("{} was restored to its state before the run", database.display());
                }
                return Err(anyhow::Error::new(e)
                    .context(format!("failed to migrate {}", database.display())));
            }

            let tables = db.tables()?;
            info!(tables = tables.len(), "migration finished");
            println!("{} is up to date", database.display());
        }
        Commands::Plan { json } => {
            let config = load_config(&cli.config)?;
            let database = database_path(&cli, Some(&config))?;
            let models = config.descriptors()?;

            let summary = Database::plan(&target(&database), &models)
                .with_context(|| format!("failed to plan {}", database.display()))?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                for line in report::plan_lines(&database, &summary) {
                    println!("{line}");
                }
            }
        }
        Commands::Tables { json } => {
            // The model file only matters here for its `database` entry.
            let config = match cli.database {
                Some(_) => None,
                None => Some(load_config(&cli.config)?),
            };
            let database = database_path(&cli, config.as_ref())?;

            let tables = Database::stored_tables(&target(&database))
                .with_context(|| format!("failed to read {}", database.display()))?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&tables)?);
            } else {
                for line in report::table_lines(&tables) {
                    println!("{line}");
                }
            }
        }
    }

    Ok(())
}

fn init_tracing(cli: &Cli) {
    // Statements only reach `shiftdb::sql` when SQL logging is switched on.
    let default = if cli.verbose {
        "info,shiftdb=debug"
    } else {
        "info,shiftdb::sql=debug"
    };
    let mut filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    if cli.log_sql {
        if let Ok(directive) = "shiftdb::sql=debug".parse() {
            filter = filter.add_directive(directive);
        }
    }

    let registry = tracing_subscriber::registry().with(filter);
    if cli.json_logs {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn load_config(path: &Path) -> Result<AppConfig> {
    ConfigLoader::load(path).with_context(|| format!("failed to load {}", path.display()))
}

fn database_path(cli: &Cli, config: Option<&AppConfig>) -> Result<PathBuf> {
    cli.database
        .clone()
        .or_else(|| config.and_then(|c| c.database.clone()))
        .context("no database given: pass --database or set `database` in the model file")
}

fn target(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
