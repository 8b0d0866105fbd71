//! Command-line interface for stallguard.
//!
//! Provides commands for supervising a single run, serving the artifact
//! store, and showing the resolved configuration.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::adapters::HttpUploader;
use crate::config::{self, ResolvedConfig};
use crate::core::{ProcessTerminator, SysinfoTerminator};
use crate::domain::Credentials;
use crate::store::{self, ArtifactStore};
use crate::task::{SupervisedRunFactory, TaskFactory, TaskParams};

/// stallguard - supervise unattended application runs and collect their output
#[derive(Parser, Debug)]
#[command(name = "stallguard")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file (default: search for .stallguard/config.yaml)
    #[arg(long, global = true, env = "STALLGUARD_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Supervise one run, archive its new output and upload it
    Run {
        /// Target executable
        #[arg(short, long)]
        exe: Option<PathBuf>,

        /// Stall window in seconds
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Extra argument for the target (repeatable)
        #[arg(long = "arg", allow_hyphen_values = true)]
        args: Vec<String>,

        /// Task parameter as KEY=VALUE (repeatable); VALUE may be JSON
        #[arg(short, long = "param")]
        params: Vec<String>,

        /// Task ID, also the archive name (default: random UUID)
        #[arg(long)]
        task_id: Option<String>,

        /// Artifact store base URL
        #[arg(short, long)]
        upload_url: Option<String>,

        /// Basic-auth username for uploads
        #[arg(long)]
        user: Option<String>,

        /// Basic-auth password for uploads
        #[arg(long)]
        password: Option<String>,
    },

    /// Serve a directory as an artifact store
    Serve {
        /// Address to bind to
        #[arg(short, long)]
        addr: Option<String>,

        /// Directory holding the artifacts
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// Username required for upload and delete
        #[arg(long)]
        user: Option<String>,

        /// Password required for upload and delete
        #[arg(long)]
        password: Option<String>,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let cfg = config::load(self.config.as_deref())?;

        match self.command {
            Commands::Run {
                exe,
                timeout,
                args,
                params,
                task_id,
                upload_url,
                user,
                password,
            } => {
                let options = RunOptions {
                    exe,
                    timeout,
                    args,
                    params,
                    task_id,
                    upload_url,
                    user,
                    password,
                };
                run_task(cfg, options).await
            }
            Commands::Serve {
                addr,
                dir,
                user,
                password,
            } => serve(cfg, addr, dir, user, password).await,
            Commands::Config => show_config(&cfg),
        }
    }
}

struct RunOptions {
    exe: Option<PathBuf>,
    timeout: Option<u64>,
    args: Vec<String>,
    params: Vec<String>,
    task_id: Option<String>,
    upload_url: Option<String>,
    user: Option<String>,
    password: Option<String>,
}

/// Turn `KEY=VALUE` pairs into a coordinator parameter map
fn parse_params(pairs: &[String], args: Vec<String>) -> Result<Map<String, Value>> {
    let mut map = Map::new();
    for pair in pairs {
        let (key, raw) = pair
            .split_once('=')
            .with_context(|| format!("Invalid parameter '{}': expected KEY=VALUE", pair))?;
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        map.insert(key.to_string(), value);
    }

    if !args.is_empty() {
        if map.contains_key("args") || map.contains_key("Args") {
            anyhow::bail!("Use either --arg or an args parameter, not both");
        }
        map.insert(
            "args".to_string(),
            Value::Array(args.into_iter().map(Value::String).collect()),
        );
    }

    Ok(map)
}

/// Cancel `token` on Ctrl-C
fn cancel_on_interrupt(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, shutting down");
            token.cancel();
        }
    });
}

/// Build one task from config and flags, run it and print its result
async fn run_task(cfg: ResolvedConfig, options: RunOptions) -> Result<()> {
    let params = parse_params(&options.params, options.args)?;
    let typed = TaskParams::from_map(&params)?;

    let executable = options
        .exe
        .or(cfg.runner.executable.clone())
        .context("No executable given (use --exe or runner.executable in the config file)")?;
    let timeout = options
        .timeout
        .map(Duration::from_secs)
        .unwrap_or_else(|| cfg.runner.timeout());
    let base_url = options
        .upload_url
        .or(cfg.upload.base_url.clone())
        .or(typed.log_file_server.clone())
        .context("No upload URL given (use --upload-url, upload.base_url or a log_file_server parameter)")?;
    let username = options.user.unwrap_or(cfg.upload.username.clone());
    let password = options.password.unwrap_or(cfg.upload.password.clone());
    let uploader = HttpUploader::with_basic_auth(base_url, &username, &password);
    let terminator: Arc<dyn ProcessTerminator> = Arc::new(SysinfoTerminator::new());

    let mut factory = SupervisedRunFactory::new(&executable, timeout, uploader, terminator)
        .with_context(|| format!("Cannot supervise {}", executable.display()))?
        .with_layout(cfg.runner.layout());
    if let Some(dir) = &cfg.runner.retain_failed_uploads {
        factory = factory.retain_failed_uploads(dir);
    }

    let task = factory.new_task(&params).context("Failed to create task")?;
    let task_id = options.task_id.unwrap_or_else(|| Uuid::new_v4().to_string());

    let cancel = CancellationToken::new();
    cancel_on_interrupt(cancel.clone());

    let (tx, mut rx) = mpsc::channel(1);
    task.run(cancel, task_id.clone(), tx).await;
    let result = rx.recv().await.context("Task finished without a result")?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    if !result.success {
        anyhow::bail!("Task {} failed", task_id);
    }
    Ok(())
}

/// Serve the artifact store until Ctrl-C
async fn serve(
    cfg: ResolvedConfig,
    addr: Option<String>,
    dir: Option<PathBuf>,
    user: Option<String>,
    password: Option<String>,
) -> Result<()> {
    let addr = addr.unwrap_or(cfg.store.addr);
    let dir = dir
        .or(cfg.store.dir)
        .context("No store directory given (use --dir or store.dir in the config file)")?;
    let dir = dir
        .canonicalize()
        .with_context(|| format!("Store directory not found: {}", dir.display()))?;

    let username = user.unwrap_or(cfg.store.username);
    let password = password.unwrap_or(cfg.store.password);
    let credentials = Credentials::from_parts(&username, &password);
    if credentials.is_none() {
        warn!("no credentials configured; upload and delete are open to anyone");
    }

    let artifacts = ArtifactStore::open(&dir)?;
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!(dir = %dir.display(), "serving directory");

    let shutdown = CancellationToken::new();
    cancel_on_interrupt(shutdown.clone());

    let app = store::router(Arc::new(artifacts), credentials);
    store::serve(listener, app, shutdown)
        .await
        .context("Artifact store server failed")
}

/// Print the resolved configuration
fn show_config(cfg: &ResolvedConfig) -> Result<()> {
    println!("stallguard configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    print!("{}", serde_yaml::to_string(cfg)?);
    Ok(())
}
