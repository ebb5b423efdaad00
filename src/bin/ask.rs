//! Catalog question CLI
//!
//! Ask natural-language questions about a SQLite price list / stock store.

use anyhow::Context;
use catalog_ask::pipeline::{Answer, Orchestrator, Reply, Session};
use catalog_ask::sql::GeneratedQuery;
use catalog_ask::store::{self, DEFAULT_TABLE};
use catalog_ask::{otel, AskConfig, CompletionService};
use clap::{Parser, Subcommand};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

/// Rows printed per result table.
const DISPLAY_ROWS: usize = 50;

/// Ask questions about a price list / stock database
#[derive(Parser)]
#[command(name = "ask")]
#[command(about = "Ask natural-language questions about a SQLite catalog", long_about = None)]
#[command(version)]
struct Cli {
    /// Database path (overrides ASK_DB_PATH)
    #[arg(long, global = true, env = "ASK_DB_PATH")]
    db: Option<String>,

    /// Completion model (overrides ASK_LLM_MODEL)
    #[arg(long, global = true, env = "ASK_LLM_MODEL")]
    model: Option<String>,

    /// Config file (JSON or YAML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log as JSON lines on stderr
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer one question
    Question {
        /// Question in natural language
        text: String,

        /// Show the generated statement without executing it
        #[arg(long)]
        dry_run: bool,

        /// Print the answer as JSON
        #[arg(long)]
        json: bool,
    },

    /// Interactive question loop
    Repl,

    /// Show the discovered schema
    Schema,

    /// Import a CSV file into the store
    Ingest {
        /// CSV file path
        file: PathBuf,

        /// Target table
        #[arg(long, default_value = DEFAULT_TABLE)]
        table: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    otel::init_tracing(cli.log_json);

    let mut config = AskConfig::load(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        config.db_path = Some(db);
    }
    if let Some(model) = cli.model {
        config.set_model(model);
    }

    match cli.command {
        Commands::Question { text, dry_run, json } => cmd_question(&config, &text, dry_run, json).await,
        Commands::Repl => cmd_repl(&config).await,
        Commands::Schema => cmd_schema(&config),
        Commands::Ingest { file, table } => cmd_ingest(&config, &file, &table),
    }
}

fn open_session(config: &AskConfig) -> anyhow::Result<Session> {
    let path = config.resolved_db_path()?;
    Session::open(&path).with_context(|| format!("cannot open store {}", path.display()))
}

fn orchestrator(config: &AskConfig) -> anyhow::Result<Orchestrator<impl CompletionService>> {
    let session = open_session(config)?;
    let client = config.completion_client()?;
    Ok(Orchestrator::new(session, client, config))
}

async fn cmd_question(config: &AskConfig, text: &str, dry_run: bool, json: bool) -> anyhow::Result<()> {
    let mut orchestrator = orchestrator(config)?;

    if dry_run {
        match orchestrator.dry_run(text).await? {
            GeneratedQuery::Statements(sql) => println!("{}", sql),
            GeneratedQuery::Unanswerable => println!("✗ The question cannot be answered from this data"),
            GeneratedQuery::InsufficientStock => println!("✗ Not enough stock for this request"),
        }
        return Ok(());
    }

    let reply = orchestrator.handle(text).await;
    if json {
        println!("{}", serde_json::to_string_pretty(&reply)?);
    } else {
        print_reply(&reply);
    }
    if let Reply::Failed { message, .. } = reply {
        anyhow::bail!(message);
    }

    orchestrator.into_session().close()?;
    Ok(())
}

async fn cmd_repl(config: &AskConfig) -> anyhow::Result<()> {
    let mut orchestrator = orchestrator(config)?;
    println!(
        "Ask a question about the catalog (model: {}; empty line or 'exit' to quit).",
        orchestrator.service().model()
    );

    let stdin = std::io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next() else { break };
        let line = line?;
        let question = line.trim();
        if question.is_empty() || question.eq_ignore_ascii_case("exit") || question.eq_ignore_ascii_case("quit") {
            break;
        }
        if question == ".schema" {
            print!("{}", orchestrator.session_mut().schema()?);
            continue;
        }

        let reply = orchestrator.handle(question).await;
        print_reply(&reply);
        if reply.is_fatal() {
            anyhow::bail!("session ended: the store is no longer usable");
        }
        println!();
    }

    orchestrator.into_session().close()?;
    Ok(())
}

fn cmd_schema(config: &AskConfig) -> anyhow::Result<()> {
    let mut session = open_session(config)?;
    let schema = session.schema()?;
    if schema.is_empty() {
        println!("No tables in store. Import data with `ask ingest <file.csv>`.");
    } else {
        print!("{}", schema);
    }
    Ok(())
}

fn cmd_ingest(config: &AskConfig, file: &Path, table: &str) -> anyhow::Result<()> {
    let path = config.resolved_db_path()?;
    let conn = store::connect_or_create(&path)?;
    let mut session = Session::from_connection(conn)?;

    let status = session.ingest_csv(file, table);
    if !status.success {
        anyhow::bail!("✗ Import failed: {}", status.message);
    }

    println!("✓ {}", status.message);
    println!("  Store: {}", path.display());
    session.close()?;
    Ok(())
}

fn print_reply(reply: &Reply) {
    match reply {
        Reply::Answered(answer) => print_answer(answer),
        Reply::Failed { message, statement, .. } => {
            if let Some(statement) = statement {
                println!("Query:\n  {}\n", statement);
            }
            println!("✗ {}", message);
        }
    }
}

fn print_answer(answer: &Answer) {
    if let Some(statement) = &answer.statement {
        println!("Query:\n  {}\n", statement.replace('\n', "\n  "));
    }
    if let Some(outcome) = &answer.outcome {
        let table = outcome.render_table(DISPLAY_ROWS);
        if !table.is_empty() {
            println!("{}", table);
        }
        if outcome.rows_affected > 0 {
            println!("{} row(s) changed\n", outcome.rows_affected);
        }
    }
    for warning in &answer.warnings {
        println!("! {}", warning);
    }
    if let Some(similar) = &answer.similar {
        println!("{}", similar.render_table(DISPLAY_ROWS));
    }
    println!("{}", answer.explanation.trim());
}
