use anyhow::{Context, Result};
use biq_cdr::RetailerSelection;
use biq_sync::{SyncConfig, SyncEvent, SyncRequest, SyncServices, SyncSummary};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "biq-cli")]
#[command(about = "BatteryIQ CDR plan sync command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one sync invocation (or every chunk with --follow).
    Sync(SyncArgs),
    /// Apply database migrations.
    Migrate,
    /// Serve the web app and, when enabled, the sync scheduler.
    Serve,
    /// Print the retailer registry.
    Retailers {
        #[arg(long)]
        priority_only: bool,
    },
}

#[derive(Debug, Default, Args)]
struct SyncArgs {
    /// Sync a single retailer by slug.
    #[arg(long)]
    retailer: Option<String>,
    /// Only retailers in priority tier 1.
    #[arg(long)]
    priority_only: bool,
    #[arg(long, default_value_t = 0)]
    cursor: usize,
    /// Defaults to BIQ_DEFAULT_CHUNK_SIZE.
    #[arg(long)]
    chunk_size: Option<usize>,
    /// Session start returned by a previous chunk.
    #[arg(long)]
    session_started_at: Option<DateTime<Utc>>,
    /// Keep invoking until no cursor is returned.
    #[arg(long)]
    follow: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;
    let cli = Cli::parse();
    let config = SyncConfig::from_env();

    match cli.command.unwrap_or(Commands::Sync(SyncArgs::default())) {
        Commands::Sync(args) => run_sync(&config, args).await?,
        Commands::Migrate => {
            let services = SyncServices::connect(&config).await?;
            services.store.migrate().await.context("running migrations")?;
            info!("migrations applied");
        }
        Commands::Serve => biq_web::serve_from_env().await?,
        Commands::Retailers { priority_only } => {
            let registry = config.load_registry()?;
            let selection = RetailerSelection::from_params(None, priority_only);
            for r in registry.select(&selection)? {
                println!("{:<28} {:<24} p{} {}", r.name, r.slug, r.priority, r.base_uri);
            }
        }
    }

    Ok(())
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("BIQ_LOG_JSON")
        .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    let installed = if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };
    installed.context("installing tracing subscriber")
}

async fn run_sync(config: &SyncConfig, args: SyncArgs) -> Result<()> {
    let services = SyncServices::connect(config).await?;
    let request = SyncRequest {
        selection: RetailerSelection::from_params(args.retailer.as_deref(), args.priority_only),
        cursor: args.cursor,
        chunk_size: args.chunk_size.unwrap_or(config.default_chunk_size),
        session_started_at: args.session_started_at,
    };

    let (tx, mut rx) = mpsc::channel(256);
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            print_event(&event);
        }
    });

    let outcome = if args.follow {
        services
            .orchestrator
            .run_to_completion(request, tx)
            .await
            .map(|_| ())
    } else {
        services.orchestrator.run(&request, tx).await.map(|_| ())
    };
    printer.await.context("progress printer task")?;
    outcome?;
    Ok(())
}

fn print_event(event: &SyncEvent) {
    match event {
        SyncEvent::Progress(progress) => println!("{}", progress.message),
        SyncEvent::Done(summary) => print_summary(summary),
        SyncEvent::Failed(failure) => eprintln!("sync failed: {}", failure.error),
    }
}

fn print_summary(summary: &SyncSummary) {
    for r in &summary.retailers {
        let note = r
            .error
            .as_deref()
            .or(r.warning.as_deref())
            .map(|n| format!("  [{n}]"))
            .unwrap_or_default();
        println!(
            "  {:<24} new={} updated={} unchanged={} deleted={} stored={} (inserted={} replaced={}) failed={}{note}",
            r.slug,
            r.new_count,
            r.updated_count,
            r.skipped_count,
            r.deleted_count,
            r.stored_count,
            r.inserted_count,
            r.replaced_count,
            r.failed_count
        );
    }
    match summary.next_cursor {
        Some(cursor) => println!(
            "chunk complete: total_plans={} next: --cursor {cursor} --session-started-at {}",
            summary.total_plans,
            summary.session_started_at.to_rfc3339()
        ),
        None => println!("sync complete: total_plans={}", summary.total_plans),
    }
}
