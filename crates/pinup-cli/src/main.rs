//! pinup: upload files to an IPFS gateway and pin them remotely
//!
//! Commands:
//!   upload <paths>...   - upload + pin files or folders, record them in the tree
//!   ls / tree           - browse the local content tree
//!   mkdir / mv / rm     - edit the content tree
//!   pins / unpin        - inspect and remove pins on the pinning service
//!   status              - check gateway and pinning-service reachability
//!   config show         - display current configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use pinup_core::config::PinupConfig;
use pinup_core::types::{FileSource, StageState, Task};
use pinup_sync::{Node, Notifier, Pipeline, SharedTree, TaskPool, TaskRegistry, TreeStore};
use pinup_transport::{credentials_from_config, HttpTransport, PinTransport};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "pinup",
    version,
    about = "Upload and pin files on IPFS",
    long_about = "pinup: upload files and folders to an IPFS gateway, pin them on a remote pinning service, and keep a local tree of what was pinned"
)]
struct Cli {
    /// Path to pinup.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "PINUP_CONFIG",
        default_value = "~/.config/pinup/pinup.toml"
    )]
    config: PathBuf,

    /// Bearer token for the gateway and pinning service (overrides [auth])
    #[arg(long, env = "PINUP_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Content tree file (overrides [tree] state_path)
    #[arg(long, env = "PINUP_TREE")]
    tree: Option<PathBuf>,

    /// Log output format: text or json (overrides [log] format)
    #[arg(long, env = "PINUP_LOG_FORMAT")]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Upload files or folders, pin them, and record them in the content tree
    ///
    /// Folders keep their own name as the first path segment, so uploading
    /// `photos/` with `--target backup` lands files at `/backup/photos/...`.
    Upload {
        /// Files or directories to upload
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Tree folder to place pinned files under (no tree entry if omitted)
        #[arg(long, short = 't')]
        target: Option<String>,
        /// Maximum simultaneous uploads (overrides [pool] concurrency)
        #[arg(long, short = 'j')]
        concurrency: Option<usize>,
        /// Retry the pin stage once for files that uploaded but failed to pin
        #[arg(long)]
        repin: bool,
        /// Skip files and directories whose name matches this glob (repeatable)
        #[arg(long, short = 'x')]
        exclude: Vec<String>,
    },

    /// List a folder in the content tree
    Ls {
        /// Tree path (default: root)
        #[arg(default_value = "/")]
        path: String,
    },

    /// Print the whole content tree
    Tree {
        /// Print the tree as JSON instead
        #[arg(long)]
        json: bool,
    },

    /// Create a folder (and any missing parents) in the content tree
    Mkdir { path: String },

    /// Move or rename a file or folder in the content tree
    Mv { from: String, to: String },

    /// Remove a file or folder from the content tree (the pin is kept)
    Rm { path: String },

    /// List pins on the pinning service
    Pins {
        #[arg(long, default_value_t = 100)]
        limit: usize,
    },

    /// Remove a pin from the pinning service by request id
    Unpin { request_id: String },

    /// Check gateway and pinning-service reachability
    Status,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = expand_tilde(&cli.config);
    let config = load_config(&config_path).await?;

    let log_format = cli.log_format.as_deref().unwrap_or(&config.log.format);
    init_logging(&config.log.level, log_format);

    let tree_path = cli
        .tree
        .clone()
        .unwrap_or_else(|| expand_tilde(&config.tree.state_path));

    match cli.command {
        Commands::Upload {
            paths,
            target,
            concurrency,
            repin,
            exclude,
        } => {
            let opts = UploadOptions {
                target,
                concurrency: concurrency.unwrap_or(config.pool.concurrency),
                repin,
                exclude,
            };
            cmd_upload(&config, cli.token.as_deref(), &tree_path, &paths, &opts).await
        }
        Commands::Ls { path } => cmd_ls(&config, &tree_path, &path),
        Commands::Tree { json } => cmd_tree(&tree_path, json),
        Commands::Mkdir { path } => cmd_mkdir(&tree_path, &path),
        Commands::Mv { from, to } => cmd_mv(&tree_path, &from, &to),
        Commands::Rm { path } => cmd_rm(&tree_path, &path),
        Commands::Pins { limit } => cmd_pins(&config, cli.token.as_deref(), limit).await,
        Commands::Unpin { request_id } => {
            cmd_unpin(&config, cli.token.as_deref(), &request_id).await
        }
        Commands::Status => cmd_status(&config, cli.token.as_deref()).await,
        Commands::Config {
            action: ConfigAction::Show,
        } => cmd_config_show(&config, &config_path),
    }
}

/// Logs go to stderr so they never interleave with command output.
/// `PINUP_LOG` takes precedence over `[log] level`.
fn init_logging(level: &str, format: &str) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_env("PINUP_LOG").unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

// ── Config loading ────────────────────────────────────────────────────────────

async fn load_config(path: &Path) -> Result<PinupConfig> {
    if path.exists() {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading config: {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parsing config: {}", path.display()))
    } else {
        Ok(PinupConfig::default())
    }
}

/// Expand `~` in path to the user's home directory
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    match s.strip_prefix("~/") {
        Some(rest) => {
            let home = std::env::var("HOME").unwrap_or_default();
            PathBuf::from(home).join(rest)
        }
        None => path.to_path_buf(),
    }
}

fn build_transport(config: &PinupConfig, token: Option<&str>) -> Result<HttpTransport> {
    let credentials = credentials_from_config(&config.auth, token);
    HttpTransport::from_core_config(config, credentials).context("building HTTP transport")
}

fn open_tree(path: &Path) -> Result<TreeStore> {
    TreeStore::open(path).with_context(|| format!("opening content tree: {}", path.display()))
}

// ── File selection ────────────────────────────────────────────────────────────

/// Expand the given paths into upload sources.
///
/// A file's relative path is its own name. Files found under a directory
/// are relative to that directory's parent, so the directory name is kept.
fn collect_sources(paths: &[PathBuf], exclude: &[String]) -> Result<Vec<FileSource>> {
    let excludes: Vec<glob::Pattern> = exclude
        .iter()
        .map(|p| glob::Pattern::new(p).with_context(|| format!("invalid exclude pattern: {p}")))
        .collect::<Result<_>>()?;

    let mut sources = Vec::new();
    for path in paths {
        let meta =
            std::fs::metadata(path).with_context(|| format!("stat: {}", path.display()))?;
        if meta.is_dir() {
            // `.` and `..` have no name of their own; resolve to the real directory.
            let dir = path
                .canonicalize()
                .with_context(|| format!("resolving: {}", path.display()))?;
            let base = dir.parent().unwrap_or_else(|| Path::new("/"));
            let mut files = Vec::new();
            collect_files(&dir, &excludes, &mut files)?;
            files.sort();
            for file in files {
                let relative = file
                    .strip_prefix(base)
                    .unwrap_or(&file)
                    .components()
                    .filter_map(|c| match c {
                        Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                        _ => None,
                    })
                    .collect::<Vec<_>>()
                    .join("/");
                sources.push(
                    FileSource::from_path(&file, Some(relative))
                        .with_context(|| format!("stat: {}", file.display()))?,
                );
            }
        } else {
            sources.push(
                FileSource::from_path(path, None)
                    .with_context(|| format!("stat: {}", path.display()))?,
            );
        }
    }
    Ok(sources)
}

fn collect_files(dir: &Path, excludes: &[glob::Pattern], out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in
        std::fs::read_dir(dir).with_context(|| format!("reading dir: {}", dir.display()))?
    {
        let entry = entry.context("reading dir entry")?;
        let path = entry.path();
        let meta = std::fs::metadata(&path).context("stat dir entry")?;

        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            if excludes.iter().any(|p| p.matches(name)) {
                continue;
            }
        }

        if meta.is_dir() {
            collect_files(&path, excludes, out)?;
        } else if meta.is_file() {
            out.push(path);
        }
    }
    Ok(())
}

// ── Progress bar helpers ──────────────────────────────────────────────────────

fn make_progress_bar(total: u64, prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::with_template("{prefix:.bold} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-"),
    );
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Prints notifications above the progress bar instead of tearing it.
struct BarNotifier(ProgressBar);

impl Notifier for BarNotifier {
    fn notify_error(&self, message: &str) {
        self.0.println(format!("error: {message}"));
    }
}

// ── `pinup upload` ────────────────────────────────────────────────────────────

struct UploadOptions {
    target: Option<String>,
    concurrency: usize,
    repin: bool,
    exclude: Vec<String>,
}

async fn cmd_upload(
    config: &PinupConfig,
    token: Option<&str>,
    tree_path: &Path,
    paths: &[PathBuf],
    opts: &UploadOptions,
) -> Result<()> {
    let transport = Arc::new(build_transport(config, token)?);
    let sources = collect_sources(paths, &opts.exclude)?;
    if sources.is_empty() {
        println!("Nothing to upload.");
        return Ok(());
    }

    let mut store = open_tree(tree_path)?;
    let tree = SharedTree::new(store.tree().clone());
    let registry = TaskRegistry::new();
    let pb = make_progress_bar(sources.len() as u64, "upload");
    let pipeline = Pipeline::new(
        transport.clone(),
        transport.clone(),
        registry.clone(),
        tree.clone(),
        Arc::new(BarNotifier(pb.clone())),
    );
    let pool = TaskPool::new(opts.concurrency);

    let total_bytes: u64 = sources.iter().map(|s| s.size).sum();
    println!(
        "Uploading {} files ({}) via {} → pin {}",
        sources.len(),
        fmt_bytes(total_bytes),
        transport.upload_url(),
        transport.pin_url(),
    );

    pipeline.submit_files(&pool, sources, opts.target.as_deref());
    drive(&pool, &registry, &pb).await;

    if opts.repin {
        let retry: Vec<Task> = registry
            .failed()
            .into_iter()
            .filter(|t| t.upload.response.is_some())
            .collect();
        if !retry.is_empty() {
            pb.println(format!("re-pinning {} file(s)", retry.len()));
            for task in &retry {
                pipeline
                    .submit_repin(&pool, task.id)
                    .with_context(|| format!("re-pinning {}", task.name))?;
            }
            drive(&pool, &registry, &pb).await;
        }
    }
    pb.finish_with_message("done".to_string());

    store.replace(tree.snapshot());
    store.flush().context("flushing content tree")?;

    let succeeded = registry.succeeded();
    let failed = registry.failed();
    println!();
    println!("Upload complete:");
    println!("  pinned:  {} files", succeeded.len());
    println!("  failed:  {} files", failed.len());
    for task in &succeeded {
        let cid = task
            .upload
            .response
            .as_ref()
            .map(|r| r.content_id.as_str())
            .unwrap_or("-");
        println!("  ok    {}  {}", cid, task.relative_path);
    }
    for task in &failed {
        let stage = if task.upload.state != StageState::Success {
            "upload"
        } else {
            "pin"
        };
        println!("  FAIL  {} ({stage} failed)", task.relative_path);
    }

    if !failed.is_empty() {
        anyhow::bail!("{} file(s) failed", failed.len());
    }
    Ok(())
}

/// Wait for the pool to drain, ticking the bar as tasks finish.
async fn drive(pool: &TaskPool, registry: &TaskRegistry, pb: &ProgressBar) {
    let idle = pool.await_idle();
    tokio::pin!(idle);
    let mut ticker = tokio::time::interval(Duration::from_millis(100));

    let result = loop {
        tokio::select! {
            res = &mut idle => break res,
            _ = ticker.tick() => {
                let s = registry.summary();
                pb.set_position((s.succeeded + s.failed) as u64);
                pb.set_message(in_flight_message(&registry.active()));
            }
        }
    };

    let s = registry.summary();
    pb.set_position((s.succeeded + s.failed) as u64);
    if let Err(e) = result {
        pb.println(format!("error: {e}"));
    }
}

/// Name the first in-flight task and count the rest.
fn in_flight_message(active: &[Task]) -> String {
    match active {
        [] => String::new(),
        [only] => only.relative_path.clone(),
        [first, rest @ ..] => format!("{} (+{} more)", first.relative_path, rest.len()),
    }
}

// ── Content tree commands ─────────────────────────────────────────────────────

fn cmd_ls(config: &PinupConfig, tree_path: &Path, path: &str) -> Result<()> {
    let store = open_tree(tree_path)?;
    let node = store
        .tree()
        .lookup(path)
        .with_context(|| format!("no such path in tree: {path}"))?;

    let gateway = config.gateway.download.base_url();
    match node {
        Node::Folder(folder) => {
            for child in &folder.children {
                match child {
                    Node::Folder(f) => {
                        println!("{:>10}  {}/", fmt_bytes(child.total_size()), f.name)
                    }
                    Node::File(f) => println!(
                        "{:>10}  {}  {gateway}/ipfs/{}",
                        fmt_bytes(f.size),
                        f.name,
                        f.cid
                    ),
                }
            }
        }
        Node::File(f) => {
            println!("File: {}", f.name);
            println!("  size:       {}", fmt_bytes(f.size));
            println!("  cid:        {}", f.cid);
            println!("  request id: {}", f.request_id);
            println!("  created:    {}", f.created);
            println!("  gateway:    {gateway}/ipfs/{}", f.cid);
        }
    }
    Ok(())
}

fn cmd_tree(tree_path: &Path, json: bool) -> Result<()> {
    let store = open_tree(tree_path)?;
    let tree = store.tree();

    if json {
        let rendered =
            serde_json::to_string_pretty(tree).context("serializing content tree to JSON")?;
        println!("{rendered}");
        return Ok(());
    }

    println!("/");
    for (path, node) in tree.walk() {
        let depth = path.matches('/').count();
        let indent = "  ".repeat(depth);
        match node {
            Node::Folder(_) => println!("{indent}{}/", node.name()),
            Node::File(f) => println!("{indent}{}  ({}, {})", f.name, fmt_bytes(f.size), f.cid),
        }
    }
    println!();
    println!(
        "{} files, {}",
        tree.file_count(),
        fmt_bytes(tree.total_size())
    );
    Ok(())
}

fn cmd_mkdir(tree_path: &Path, path: &str) -> Result<()> {
    let mut store = open_tree(tree_path)?;
    store.tree_mut().mkdir(path)?;
    store.flush().context("flushing content tree")
}

fn cmd_mv(tree_path: &Path, from: &str, to: &str) -> Result<()> {
    let mut store = open_tree(tree_path)?;
    if store.tree().lookup(from).is_none() {
        anyhow::bail!("no such path in tree: {from}");
    }
    store.tree_mut().move_node(from, to)?;
    store.flush().context("flushing content tree")
}

fn cmd_rm(tree_path: &Path, path: &str) -> Result<()> {
    let mut store = open_tree(tree_path)?;
    let removed = store
        .tree_mut()
        .delete(path)
        .with_context(|| format!("no such path in tree: {path}"))?;
    store.flush().context("flushing content tree")?;

    let files = removed.file_count();
    println!("removed {} ({files} file(s); pins are kept)", removed.name());
    Ok(())
}

// ── Pinning-service commands ──────────────────────────────────────────────────

async fn cmd_pins(config: &PinupConfig, token: Option<&str>, limit: usize) -> Result<()> {
    let transport = build_transport(config, token)?;
    let pins = transport
        .list_pins(limit)
        .await
        .context("listing pins")?;

    println!("{} pins ({} shown)", pins.count, pins.results.len());
    for status in &pins.results {
        println!(
            "  {:<8} {}  {}  {}",
            status.status.to_string(),
            status.request_id,
            status.pin.cid,
            status.pin.name.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

async fn cmd_unpin(config: &PinupConfig, token: Option<&str>, request_id: &str) -> Result<()> {
    let transport = build_transport(config, token)?;
    match transport.remove_pin(request_id).await {
        Ok(()) => {
            println!("removed pin {request_id}");
            Ok(())
        }
        Err(e) if e.status() == Some(404) => {
            anyhow::bail!("no pin with request id {request_id} on {}", transport.pin_url())
        }
        Err(e) => Err(e).with_context(|| format!("removing pin {request_id}")),
    }
}

async fn cmd_status(config: &PinupConfig, token: Option<&str>) -> Result<()> {
    let transport = build_transport(config, token)?;
    let report = pinup_transport::check_health(&transport).await;

    match &report.gateway {
        Ok(code) => println!("gateway:     {} (HTTP {code})", transport.upload_url()),
        Err(e) => println!("gateway:     {} UNREACHABLE: {e}", transport.upload_url()),
    }
    match &report.pin_service {
        Ok(()) => println!("pin service: {} ok", transport.pin_url()),
        Err(e) => println!("pin service: {} ERROR: {e}", transport.pin_url()),
    }

    if !report.is_healthy() {
        std::process::exit(1);
    }
    Ok(())
}

// ── `pinup config show` ───────────────────────────────────────────────────────

fn cmd_config_show(config: &PinupConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!(
            "# Configuration: defaults (no file at {})",
            config_path.display()
        );
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}

fn fmt_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
