use clap::{Parser, Subcommand};
use colored::Colorize;
use eyre::{Context, Result};
use inkbridge::{Config, Ledger, SyncRecord, SyncStatus, TaskFilter, logging, pipeline};
use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "inkbridge")]
#[command(about = "Inkbridge - structured notes from handwriting, checklist items synced to your task tracker")]
#[command(version = env!("GIT_DESCRIBE"))]
struct Cli {
    /// Path to the config file (default: $INKBRIDGE_CONFIG or the user config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log at debug level and echo logs to stderr
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process every enabled bridge once
    Run,

    /// Print structured text for a recognized-text file (or stdin)
    Reflow {
        /// Also repair inline heading markers
        #[arg(short, long)]
        aggressive: bool,

        file: Option<PathBuf>,
    },

    /// List tasks recorded in the ledger
    Tasks {
        #[arg(short, long)]
        bridge: Option<String>,

        /// created, updated, skipped or failed
        #[arg(short, long)]
        status: Option<SyncStatus>,

        /// Only tasks that are not completed
        #[arg(long)]
        open: bool,
    },

    /// Rebuild the ledger's task table from its audit journal
    Rebuild,
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Reflow { aggressive, file } => {
            logging::init_stderr(cli.verbose);
            let raw = match file {
                Some(path) => std::fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))?,
                None => {
                    let mut buf = String::new();
                    std::io::stdin().read_to_string(&mut buf).context("Failed to read stdin")?;
                    buf
                }
            };
            print!("{}", inkbridge::reflow(&raw, aggressive));
        }
        Commands::Run => {
            let config = load_config(&cli.config, cli.verbose)?;
            logging::init(&config.log_path, config.verbose)?;

            if pipeline::run(config)? {
                println!("{}", "Run finished with errors".red());
                return Ok(ExitCode::FAILURE);
            }
            println!("{}", "Run complete".green());
        }
        Commands::Tasks { bridge, status, open } => {
            let config = load_config(&cli.config, cli.verbose)?;
            logging::init_stderr(config.verbose);

            let ledger = Ledger::open(&config.ledger_path)?;
            let records = ledger.list(&TaskFilter {
                bridge_name: bridge,
                status,
                open_only: open,
            })?;

            if records.is_empty() {
                println!("No tasks found");
            }
            for record in &records {
                print_record(record);
            }
            ledger.close()?;
        }
        Commands::Rebuild => {
            let config = load_config(&cli.config, cli.verbose)?;
            logging::init_stderr(config.verbose);

            println!("Rebuilding ledger from journal...");
            let mut ledger = Ledger::open(&config.ledger_path)?;
            let count = ledger.rebuild_from_journal()?;
            ledger.close()?;
            println!("Rebuilt {} task(s)", count);
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn load_config(path: &Option<PathBuf>, verbose: bool) -> Result<Config> {
    let mut config = Config::load(path.as_deref())?;
    config.verbose |= verbose;
    Ok(config)
}

fn print_record(record: &SyncRecord) {
    let status = match record.status {
        SyncStatus::Created => record.status.as_str().green(),
        SyncStatus::Updated => record.status.as_str().cyan(),
        SyncStatus::Skipped => record.status.as_str().yellow(),
        SyncStatus::Failed => record.status.as_str().red(),
    };
    let mark = if record.completed { "[x]" } else { "[ ]" };

    println!(
        "{:<8} {} {}  {}",
        status,
        mark,
        record.title,
        format!("{}:{}", record.note_path, record.line_no).dimmed()
    );
    if let Some(err) = &record.last_error {
        println!("         {}", err.red());
    }
}
