use std::sync::Arc;

use clap::{Parser, Subcommand};
use worker::config::Config;
use worker::context::Context;
use worker::datasource::build_datasource;
use worker::store::{DocumentStore, FileDocumentStore, InMemoryDocumentStore};
use worker::telemetry::{get_subscriber, init_subscriber};

/// English-ascending auction worker (spec §6 "Command-line interface").
#[derive(Parser, Debug)]
#[command(name = "auction-texas")]
#[command(about = "Runs a single English-ascending procurement auction")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Auction document id
    auction_doc_id: String,

    /// Path to the YAML config file
    config_path: std::path::PathBuf,

    /// Tag the auction document with this api version instead of the datasource's own
    #[arg(long)]
    with_api_version: Option<String>,

    /// Override planning procedure. Accepted for compatibility with the
    /// source CLI's argument surface; like upstream, nothing in the
    /// coordinator currently branches on it.
    #[arg(long)]
    planning_procerude: Option<PlanningProcedure>,

    /// Verbose (debug-level) logging
    #[arg(long)]
    debug: bool,

    /// Run entirely off local fixtures/in-memory state, no real datasource calls
    #[arg(long)]
    standalone: bool,

    /// Prior audit document id to update, for `post_auction_protocol`
    #[arg(long)]
    doc_id: Option<String>,
}

#[derive(clap::ValueEnum, Debug, Clone, Copy)]
enum PlanningProcedure {
    Full,
    PartialDb,
    PartialCron,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Command {
    /// Validate the config and datasource connectivity, then exit
    Check,
    /// Schedule and serve a previously planned auction until it ends
    Run,
    /// Fetch the auction definition and plan its first two stages
    Planning,
    /// Re-synchronise and open up bidder display names
    Announce,
    /// Push the current results ledger without a live auction
    PostResults,
    /// Mark the auction document cancelled
    Cancel,
    /// Mark the auction document rescheduled
    Reschedule,
    /// Upload or update the audit trail
    PostAuctionProtocol,
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.debug { "debug" } else { "info" };
    init_subscriber(get_subscriber(level.into()));

    let mut config = Config::load(&cli.config_path)?;
    let sandbox_mode = config.sandbox_mode;

    // A `--standalone` run (or a document already marked standalone) forces
    // the test datasource and drops the deadline, the same override
    // `register_utilities` applies in the source before anything else reads
    // `worker_config`.
    if cli.standalone {
        config.datasource.kind = "test".into();
        config.deadline.enabled = false;
    }

    let store: Arc<dyn DocumentStore> = if cli.standalone {
        Arc::new(InMemoryDocumentStore::new())
    } else if let Some(path) = &config.database.path {
        Arc::new(FileDocumentStore::new(path.clone()))
    } else {
        Arc::new(InMemoryDocumentStore::new())
    };

    let datasource = Arc::from(build_datasource(&config, &cli.auction_doc_id)?);
    let scheduler = Arc::new(worker::scheduler::Scheduler::new());

    let ctx = Arc::new(Context::with_deadline(
        cli.auction_doc_id.clone(),
        store,
        datasource,
        scheduler,
        sandbox_mode,
        config.deadline.deadline_time.hour,
        config.deadline.enabled,
        config.hash_secret.clone(),
    ));

    match cli.command {
        Command::Check => {
            worker::coordinator::synchronize_auction_info(&ctx, true).await?;
            println!("ok: {} reachable via {:?} datasource", cli.auction_doc_id, config.datasource.kind);
        }
        Command::Planning => {
            worker::coordinator::prepare_auction_document(&ctx, cli.with_api_version.as_deref()).await?;
            println!("planned {}", cli.auction_doc_id);
        }
        Command::Run => {
            ctx.scheduler.start();
            worker::coordinator::schedule_auction(&ctx, ("0.0.0.0".into(), 8088)).await?;
            ctx.end_auction.notified().await;
            ctx.scheduler.shutdown();
            println!("auction {} finished", cli.auction_doc_id);
        }
        Command::Announce => {
            worker::coordinator::announce(&ctx).await?;
            println!("announced {}", cli.auction_doc_id);
        }
        Command::PostResults => {
            worker::coordinator::post_results_only(&ctx).await?;
            println!("posted results for {}", cli.auction_doc_id);
        }
        Command::Cancel => {
            worker::coordinator::cancel_auction(&ctx).await?;
            println!("cancelled {}", cli.auction_doc_id);
        }
        Command::Reschedule => {
            worker::coordinator::reschedule_auction(&ctx).await?;
            println!("rescheduled {}", cli.auction_doc_id);
        }
        Command::PostAuctionProtocol => {
            let id = worker::coordinator::post_auction_protocol(&ctx, cli.doc_id.clone()).await?;
            println!("audit document {id}");
        }
    }

    Ok(())
}
