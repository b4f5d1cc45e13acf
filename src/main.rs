// totalrecall - remembers your shell commands and the context you ran them in
//
// This is the main entry point. Parses CLI args and dispatches to handlers.

mod cli;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use cli::{Cli, Commands};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use totalrecall_lib::bus::{Bus, BusServer, RelayBus, RemoteBus};
use totalrecall_lib::collector::{self, AuditForwarder, CollectorState, SubmitClient, TcpCollector};
use totalrecall_lib::core::submission::CommandEncoding;
use totalrecall_lib::core::{
    ExclusionFilter, Indexer, Normalizer, RankMode, RankedCommand, Recorder, Retriever,
    RetryPolicy, ShellContext, Submission,
};
use totalrecall_lib::shell::{HookInstaller, Shell, ShellDetector};
use totalrecall_lib::{logging, Config, Database};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    logging::init(default_log_level(&cli.cmd));
    let config = Config::load(cli.config.as_deref())
        .map_err(|e| anyhow::anyhow!(e.user_message()))?;

    match cli.cmd {
        Commands::Serve => handle_serve(config).await,
        Commands::Audit { source } => handle_audit(config, source).await,
        Commands::Submit {
            command,
            return_code,
            start_timestamp,
            end_timestamp,
            encoding,
        } => {
            handle_submit(config, command, return_code, start_timestamp, end_timestamp, encoding)
                .await;
            Ok(())
        }
        Commands::Recall { mode, limit } => handle_recall(config, mode, limit).await,
        Commands::Watch { limit } => handle_watch(config, limit).await,
        Commands::Setup { all } => handle_setup(all),
        Commands::Uninstall => handle_uninstall(),
        Commands::Status => handle_status(config).await,
    }
}

// The capture client must never make noise in the user's shell
fn default_log_level(cmd: &Commands) -> &'static str {
    match cmd {
        Commands::Serve | Commands::Audit { .. } | Commands::Watch { .. } => "info",
        Commands::Submit { .. } => "error",
        _ => "warn",
    }
}

async fn handle_serve(config: Config) -> Result<()> {
    let db = Arc::new(
        Database::new(&config.store.path)
            .await
            .with_context(|| format!("opening store at {}", config.store.path.display()))?,
    );
    let bus = RelayBus::with_capacity(config.bus.capacity);
    let cancel = CancellationToken::new();

    // subscribe before anything can publish
    let subscription = bus.subscribe(&config.bus.topic).await?;
    let indexer = Indexer::new(db.clone(), RetryPolicy::from(&config.indexer));

    let state = collector_state(&config, Arc::new(bus.clone()))?;

    let bus_server = BusServer::bind(&config.bus.addr, bus.clone())
        .await
        .with_context(|| format!("binding bus on {}", config.bus.addr))?;
    let tcp = TcpCollector::bind(&config.collector.tcp_addr, state.clone())
        .await
        .with_context(|| format!("binding tcp collector on {}", config.collector.tcp_addr))?;
    let http_listener = TcpListener::bind(&config.collector.http_addr)
        .await
        .with_context(|| format!("binding http collector on {}", config.collector.http_addr))?;

    let mut tasks = tokio::task::JoinSet::new();
    tasks.spawn(bus_server.run(cancel.clone()));
    tasks.spawn(tcp.run(cancel.clone()));
    tasks.spawn(collector::http::serve(http_listener, state, cancel.clone()));
    {
        let cancel = cancel.clone();
        tasks.spawn(async move {
            indexer.run(subscription, cancel).await;
            Ok(())
        });
    }

    info!(store = %db.path().display(), topic = %config.bus.topic, "totalrecall serving");
    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    cancel.cancel();

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "service stopped with error"),
            Err(e) => error!(error = %e, "service task panicked"),
        }
    }
    db.close().await;

    Ok(())
}

async fn handle_audit(config: Config, source: Vec<String>) -> Result<()> {
    let bus = RemoteBus::new(config.bus.addr.clone(), config.collector.timeout());
    let state = collector_state(&config, Arc::new(bus))?;
    let forwarder = AuditForwarder::new(state.normalizer().clone(), state.recorder().clone());

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    let stats = match source.split_first() {
        Some((program, args)) => forwarder.run_command(program, args, cancel).await?,
        None => {
            forwarder
                .run(BufReader::new(tokio::io::stdin()), cancel)
                .await?
        }
    };
    info!(published = stats.published, failed = stats.failed, "audit forwarding finished");

    Ok(())
}

async fn handle_submit(
    config: Config,
    command: String,
    return_code: i32,
    start_timestamp: String,
    end_timestamp: Option<String>,
    encoding: Option<CommandEncoding>,
) {
    let normalizer = Normalizer::new(&config.capture);

    // Nuke internally used env vars.
    let env: BTreeMap<String, String> = std::env::vars()
        .filter(|(key, _)| !normalizer.env_filter().is_reserved(key))
        .collect();

    let submission = Submission {
        command,
        command_encoding: encoding,
        return_code,
        start_timestamp,
        end_timestamp: end_timestamp.or_else(|| Some(Utc::now().to_rfc3339())),
        env,
        hostname: std::env::var("HOSTNAME").ok(),
    };

    let client = SubmitClient::new(&config.collector);
    if let Err(e) = client.send(&submission).await {
        // failed but don't spam the terminal. nobody likes that.
        error!(error = %e, "submit failed");
    }
}

async fn handle_recall(config: Config, mode: RankMode, limit: Option<usize>) -> Result<()> {
    let retriever = open_retriever(&config, limit).await?;
    let normalizer = Normalizer::new(&config.capture);
    let ctx = ShellContext::from_process(normalizer.env_filter());
    let rows = retriever.rank(&ctx, mode).await;

    if rows.is_empty() {
        println!("No commands found.");
    } else {
        print_rows(&rows);
    }

    Ok(())
}

async fn handle_watch(config: Config, limit: Option<usize>) -> Result<()> {
    let retriever = open_retriever(&config, limit).await?;
    let bus = RemoteBus::new(config.bus.addr.clone(), config.collector.timeout());
    let mut subscription = bus
        .subscribe(&config.bus.topic)
        .await
        .with_context(|| format!("subscribing to bus at {}", config.bus.addr))?;

    loop {
        let event = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = subscription.next() => match event {
                Some(event) => event,
                None => break,
            },
        };

        let ctx = ShellContext::from_event(&event);
        println!("\n$ {}  (in {})", event.command, event.cwd.as_deref().unwrap_or("?"));
        for mode in [RankMode::Relevance, RankMode::Chronological] {
            println!("{}", "-".repeat(60));
            println!("{}:", mode);
            print_rows(&retriever.rank(&ctx, mode).await);
        }
    }

    Ok(())
}

fn handle_setup(all: bool) -> Result<()> {
    let installer = HookInstaller::new()?;

    let shells = if all {
        installer.install_all()?
    } else {
        vec![installer.install_auto()?]
    };

    for shell in shells {
        println!("Installed {} hook. Restart your shell or run:", shell);
        match shell {
            Shell::Bash => println!("   source ~/.bashrc"),
            Shell::Zsh => println!("   source ~/.zshrc"),
        }
    }

    Ok(())
}

fn handle_uninstall() -> Result<()> {
    let installer = HookInstaller::new()?;

    for shell in Shell::ALL {
        match installer.uninstall(shell) {
            Ok(()) => println!("Uninstalled {} hook", shell),
            Err(e) => eprintln!("  (skipped {}: {})", shell, e),
        }
    }
    println!("Note: the event store (~/.totalrecall/) was not removed.");

    Ok(())
}

async fn handle_status(config: Config) -> Result<()> {
    let installer = HookInstaller::new()?;

    println!("\ntotalrecall Status");
    println!("{}", "=".repeat(60));

    println!("\nShell Hooks:");
    for shell in Shell::ALL {
        let status = if installer.is_installed(shell) {
            "installed"
        } else {
            "not installed"
        };
        println!("  {:<12} {}", format!("{}:", shell), status);
    }

    println!("\nCurrent Shell:");
    match ShellDetector::detect() {
        Ok(shell) => println!("  {}", shell),
        Err(_) => println!("  Unknown"),
    }

    println!("\nEvent Store ({}):", config.store.path.display());
    let db = Database::new(&config.store.path).await?;
    let stats = db.stats().await?;
    println!("  Events:            {}", stats.total_events);
    println!("  Successful:        {}", stats.successful_events);
    println!("  Distinct commands: {}", stats.distinct_commands);

    println!("\nCollectors:");
    println!("  tcp  {}", config.collector.tcp_addr);
    println!("  http {}", config.collector.http_addr);
    println!("  bus  {} (topic {})", config.bus.addr, config.bus.topic);
    println!("{}", "=".repeat(60));

    db.close().await;
    Ok(())
}

fn collector_state(config: &Config, bus: Arc<dyn Bus>) -> Result<CollectorState> {
    let exclusion = ExclusionFilter::from_optional_file(config.capture.exclude_patterns.as_deref())
        .map_err(|e| anyhow::anyhow!(e.user_message()))?;
    if !exclusion.is_empty() {
        info!(templates = exclusion.len(), "exclusion templates loaded");
    }

    let normalizer = Arc::new(Normalizer::new(&config.capture));
    let recorder = Arc::new(Recorder::new(bus, Arc::new(exclusion), config.bus.topic.clone()));
    Ok(CollectorState::new(normalizer, recorder))
}

async fn open_retriever(config: &Config, limit: Option<usize>) -> Result<Retriever> {
    let db = Database::new(&config.store.path)
        .await
        .with_context(|| format!("opening store at {}", config.store.path.display()))?;

    let mut recall = config.recall.clone();
    if let Some(limit) = limit {
        recall.max_rows = limit.max(1);
    }
    Ok(Retriever::new(Arc::new(db), recall))
}

fn print_rows(rows: &[RankedCommand]) {
    for row in rows {
        println!("{:>6.2}  {}", row.score, row.command);
    }
}
