mod http;
mod runtime;
mod server;
mod watch;

use std::io::Write;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use kindle_core::{ContextHints, EngineConfig, Stimulus, SynthSpec};
use kindle_store::{Instance, default_base_dir, instance_dir, list_instances};
use rmcp::{ServiceExt, transport::stdio};
use tokio_util::sync::CancellationToken;

use crate::runtime::Runtime;

#[derive(Parser)]
#[command(name = "kindle", about = "Graph activation engine CLI, MCP server and dashboard feed")]
struct Cli {
    /// Graph instance to operate on
    #[arg(long, global = true, default_value = "default")]
    instance: String,

    /// Enable verbose debug output
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replace the instance graph with a synthetic clustered graph
    Seed {
        #[arg(long, default_value_t = 100)]
        nodes: usize,
        #[arg(long, default_value_t = 5)]
        clusters: usize,
        /// Mean outgoing links per node
        #[arg(long, default_value_t = 4)]
        out_degree: usize,
        /// RNG seed; the same seed gives the same graph
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },

    /// Run ticks, optionally injecting a stimulus on the first
    Tick {
        /// Number of ticks to run
        #[arg(long, default_value_t = 1)]
        count: u32,
        /// Entry node as `id=score` (score defaults to 1.0); repeatable
        #[arg(long = "stimulus", short = 's')]
        stimuli: Vec<String>,
        /// Channel to attribute injected energy to
        #[arg(long)]
        channel: Option<String>,
        /// Affect vector as comma-separated numbers
        #[arg(long)]
        affect: Option<String>,
        /// Hint: the user is exploring
        #[arg(long)]
        explore: bool,
        /// Hint: the user is implementing
        #[arg(long)]
        implement: bool,
        /// Hint: memories are being formed
        #[arg(long)]
        remember: bool,
        /// Elapsed seconds per tick
        #[arg(long)]
        dt: Option<f64>,
        /// Print one JSON object per tick
        #[arg(long)]
        json: bool,
    },

    /// Show graph statistics
    Stats,

    /// Show the most recent tick events
    Events {
        #[arg(long, default_value_t = 20)]
        limit: usize,
        /// Print raw JSON events
        #[arg(long)]
        json: bool,
    },

    /// Export the graph to a JSON file
    Export {
        /// Output file path
        path: PathBuf,
    },

    /// Import a graph from a JSON file, replacing the current one
    Import {
        /// Input file path
        path: PathBuf,
    },

    /// Validate a config file (default: the instance's config.toml)
    CheckConfig { path: Option<PathBuf> },

    /// Write the default config to the instance's config.toml
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// List instances
    Instances,

    /// Start MCP server on stdio transport
    Serve {
        /// Also tick on a timer (milliseconds)
        #[arg(long)]
        tick_ms: Option<u64>,
    },

    /// Serve the HTTP dashboard feed (status, events, live stream)
    Dashboard {
        #[arg(long, default_value = "127.0.0.1:7733")]
        addr: SocketAddr,
        /// Tick on a timer (milliseconds)
        #[arg(long)]
        tick_ms: Option<u64>,
    },

    /// Follow a running dashboard feed
    Watch {
        #[arg(long, default_value = "http://127.0.0.1:7733")]
        url: String,
        /// Stop after this many events
        #[arg(long)]
        limit: Option<usize>,
    },
}

fn open_instance(cli: &Cli) -> Result<Instance> {
    Instance::open(&cli.instance, None)
        .with_context(|| format!("failed to open instance '{}'", cli.instance))
}

fn config_path(cli: &Cli) -> PathBuf {
    instance_dir(&default_base_dir(), &cli.instance).join("config.toml")
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match &cli.command {
        Commands::Seed {
            nodes,
            clusters,
            out_degree,
            seed,
        } => cmd_seed(&cli, *nodes, *clusters, *out_degree, *seed),
        Commands::Tick {
            count,
            stimuli,
            channel,
            affect,
            explore,
            implement,
            remember,
            dt,
            json,
        } => {
            let hints = ContextHints {
                memory_formation: *remember,
                exploration_goal: *explore,
                implementation_goal: *implement,
            };
            let stimulus = build_stimulus(stimuli, channel.as_deref(), affect.as_deref(), hints)?;
            cmd_tick(&cli, *count, stimulus, *dt, *json)
        }
        Commands::Stats => cmd_stats(&cli),
        Commands::Events { limit, json } => cmd_events(&cli, *limit, *json),
        Commands::Export { path } => cmd_export(&cli, path),
        Commands::Import { path } => cmd_import(&cli, path),
        Commands::CheckConfig { path } => cmd_check_config(&cli, path.as_deref()),
        Commands::InitConfig { force } => cmd_init_config(&cli, *force),
        Commands::Instances => cmd_instances(),
        Commands::Serve { tick_ms } => cmd_serve(&cli, *tick_ms).await,
        Commands::Dashboard { addr, tick_ms } => cmd_dashboard(&cli, *addr, *tick_ms).await,
        Commands::Watch { url, limit } => cmd_watch(url, *limit).await,
    }
}

// ---------------------------------------------------------------------------
// Stimulus parsing
// ---------------------------------------------------------------------------

/// `id=score`, or a bare `id` meaning score 1.0.
fn parse_entry(s: &str) -> Result<(String, f64)> {
    let (node, score) = match s.rsplit_once('=') {
        Some((node, score)) => {
            let score: f64 = score
                .trim()
                .parse()
                .with_context(|| format!("invalid score in stimulus '{s}'"))?;
            (node.trim(), score)
        }
        None => (s.trim(), 1.0),
    };
    if node.is_empty() {
        bail!("stimulus '{s}' has no node id");
    }
    Ok((node.to_string(), score))
}

fn parse_affect(s: &str) -> Result<Vec<f64>> {
    s.split(',')
        .map(|part| {
            part.trim()
                .parse::<f64>()
                .with_context(|| format!("invalid affect component '{part}'"))
        })
        .collect()
}

fn build_stimulus(
    entries: &[String],
    channel: Option<&str>,
    affect: Option<&str>,
    hints: ContextHints,
) -> Result<Option<Stimulus>> {
    if entries.is_empty() {
        if channel.is_some() || affect.is_some() {
            bail!("--channel and --affect need at least one --stimulus");
        }
        return Ok(None);
    }
    let entries = entries
        .iter()
        .map(|e| parse_entry(e))
        .collect::<Result<Vec<_>>>()?;
    let mut stimulus = Stimulus::new(entries).with_hints(hints);
    if let Some(channel) = channel {
        stimulus = stimulus.with_channel(channel);
    }
    if let Some(affect) = affect {
        stimulus = stimulus.with_affect(parse_affect(affect)?);
    }
    Ok(Some(stimulus))
}

// ---------------------------------------------------------------------------
// Advisory pidfile for observability
// ---------------------------------------------------------------------------

fn pidfile_path() -> PathBuf {
    default_base_dir().join("kindle-serve.pid")
}

/// Check for an existing pidfile and log accordingly, then write our own.
fn acquire_pidfile() -> Option<PathBuf> {
    let path = pidfile_path();
    if let Ok(content) = std::fs::read_to_string(&path)
        && let Ok(pid) = content.trim().parse::<u32>()
    {
        if is_process_alive(pid) {
            tracing::warn!("another kindle serve (PID {pid}) is running, coexisting with busy_timeout");
        } else {
            tracing::info!("cleaned up stale pidfile (PID {pid} is dead)");
            let _ = std::fs::remove_file(&path);
        }
    }

    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    match std::fs::File::create(&path) {
        Ok(mut f) => {
            let _ = write!(f, "{}", std::process::id());
            tracing::info!("wrote pidfile: {}", path.display());
            Some(path)
        }
        Err(e) => {
            tracing::warn!("failed to write pidfile: {e}");
            None
        }
    }
}

fn release_pidfile(path: &Path) {
    let _ = std::fs::remove_file(path);
    tracing::info!("removed pidfile: {}", path.display());
}

#[cfg(unix)]
fn is_process_alive(pid: u32) -> bool {
    // kill(pid, 0) checks existence without sending a signal
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

#[cfg(not(unix))]
fn is_process_alive(_pid: u32) -> bool {
    false
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

async fn cmd_serve(cli: &Cli, tick_ms: Option<u64>) -> Result<()> {
    let instance = open_instance(cli)?;
    tracing::info!("starting MCP server for instance '{}'", instance.name());
    let runtime = Runtime::new(instance)?.shared();

    let pidfile = acquire_pidfile();
    let shutdown = CancellationToken::new();
    let ticker = tick_ms.map(|ms| {
        http::spawn_ticker(runtime.clone(), Duration::from_millis(ms), shutdown.clone())
    });

    let service = server::KindleServer::new(runtime)
        .serve(stdio())
        .await
        .context("failed to start MCP server")?;
    let (outcome, interrupted) = tokio::select! {
        result = service.waiting() => (result.map(|_| ()).map_err(anyhow::Error::from), false),
        _ = shutdown_signal() => {
            tracing::info!("interrupted, shutting down");
            (Ok(()), true)
        }
    };

    shutdown.cancel();
    if let Some(ticker) = ticker {
        let _ = ticker.await;
    }
    if let Some(path) = pidfile {
        release_pidfile(&path);
    }
    if interrupted {
        // The stdin reader is still blocked; dropping the runtime would wait on it.
        std::process::exit(0);
    }
    outcome
}

async fn cmd_dashboard(cli: &Cli, addr: SocketAddr, tick_ms: Option<u64>) -> Result<()> {
    let runtime = Runtime::new(open_instance(cli)?)?.shared();
    let listener = http::bind(addr).await?;
    eprintln!("dashboard feed on http://{}", listener.local_addr()?);

    let shutdown = CancellationToken::new();
    let ticker = tick_ms.map(|ms| {
        http::spawn_ticker(runtime.clone(), Duration::from_millis(ms), shutdown.clone())
    });
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("interrupted, shutting down");
        on_signal.cancel();
    });

    http::serve(listener, runtime, shutdown).await?;
    if let Some(ticker) = ticker {
        let _ = ticker.await;
    }
    Ok(())
}

async fn cmd_watch(url: &str, limit: Option<usize>) -> Result<()> {
    let seen = watch::follow(url, limit, |event| println!("{}", watch::format_event(event))).await?;
    tracing::debug!(seen, "feed closed");
    Ok(())
}

fn cmd_seed(cli: &Cli, nodes: usize, clusters: usize, out_degree: usize, seed: u64) -> Result<()> {
    let instance = open_instance(cli)?;
    let spec = SynthSpec {
        nodes,
        clusters,
        out_degree,
        ..SynthSpec::default()
    };
    let graph = instance
        .store()
        .seed_synthetic(&spec, seed)
        .context("failed to seed graph")?;
    println!(
        "seeded {} nodes, {} links (seed {seed})",
        graph.node_count(),
        graph.link_count()
    );
    Ok(())
}

fn cmd_tick(
    cli: &Cli,
    count: u32,
    stimulus: Option<Stimulus>,
    dt: Option<f64>,
    json: bool,
) -> Result<()> {
    let mut runtime = Runtime::new(open_instance(cli)?)?;
    if let Some(stimulus) = stimulus {
        runtime.inject(stimulus);
    }
    for _ in 0..count {
        let outcome = runtime.tick(dt).context("tick failed")?;
        if json {
            println!("{}", serde_json::to_string(&outcome)?);
            continue;
        }
        println!(
            "tick {}: injected={:.3} transferred={:.3} dissipated={:.3} energy={:.3} active={} rho={:.3} target={:.2}{}",
            outcome.tick,
            outcome.injected,
            outcome.transferred,
            outcome.dissipated,
            outcome.total_energy,
            outcome.active_nodes,
            outcome.rho,
            outcome.rho_target,
            outcome
                .mode
                .as_deref()
                .map(|m| format!(" mode={m}"))
                .unwrap_or_default(),
        );
        for node in &outcome.unknown_nodes {
            eprintln!("warning: unknown node '{node}' ignored");
        }
    }
    Ok(())
}

fn cmd_stats(cli: &Cli) -> Result<()> {
    let instance = open_instance(cli)?;
    let store = instance.store();

    println!("instance:     {}", instance.name());
    println!("id:           {}", instance.id());
    println!("dir:          {}", instance.dir().display());
    println!("nodes:        {}", store.node_count()?);
    println!("links:        {}", store.link_count()?);
    println!("total_energy: {:.4}", store.total_energy()?);
    match store.saved_tick()? {
        Some(tick) => println!("last_tick:    {tick}"),
        None => println!("last_tick:    -"),
    }
    Ok(())
}

fn cmd_events(cli: &Cli, limit: usize, json: bool) -> Result<()> {
    let instance = open_instance(cli)?;
    let events = instance
        .store()
        .recent_events(limit)
        .context("failed to read events")?;
    if events.is_empty() {
        println!("(no events)");
    }
    for event in &events {
        if json {
            println!("{}", serde_json::to_string(event)?);
        } else {
            println!("{}", watch::format_event(event));
        }
    }
    Ok(())
}

fn cmd_export(cli: &Cli, path: &Path) -> Result<()> {
    let instance = open_instance(cli)?;
    instance
        .store()
        .export_json_file(path)
        .context("failed to export graph")?;
    println!("exported to {}", path.display());
    Ok(())
}

fn cmd_import(cli: &Cli, path: &Path) -> Result<()> {
    let instance = open_instance(cli)?;
    let store = instance.store();
    store
        .import_json_file(path)
        .context("failed to import JSON")?;
    println!(
        "imported from {}. nodes={}, links={}",
        path.display(),
        store.node_count()?,
        store.link_count()?
    );
    Ok(())
}

fn cmd_check_config(cli: &Cli, path: Option<&Path>) -> Result<()> {
    let path = path.map(PathBuf::from).unwrap_or_else(|| config_path(cli));
    if !path.exists() {
        println!("no config at {}; defaults apply", path.display());
        return Ok(());
    }
    kindle_store::load_config(&path)
        .with_context(|| format!("invalid config {}", path.display()))?;
    println!("config ok: {}", path.display());
    Ok(())
}

fn cmd_init_config(cli: &Cli, force: bool) -> Result<()> {
    let path = config_path(cli);
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    kindle_store::write_config(&path, &EngineConfig::default())
        .context("failed to write config")?;
    println!("wrote {}", path.display());
    Ok(())
}

fn cmd_instances() -> Result<()> {
    let names = list_instances(&default_base_dir())?;
    if names.is_empty() {
        println!("(no instances)");
    }
    for name in names {
        println!("{name}");
    }
    Ok(())
}
