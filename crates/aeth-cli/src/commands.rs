//! `aethctl` subcommands (§7). `serve`/`migrate` own the daemon's lifetime;
//! `status`/`vm`/`worksapce` are thin reads/writes against the same
//! repositories, requiring no separate gateway process.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use colored::Colorize;

use crate::bootstrap::{build_repos, Daemon};
use crate::config::DaemonConfig;
use crate::observability::logging::{self, LogFormat};
use aeth_core::task::{Task, TaskType};
use aeth_core::{VmId, WorkspaceId};
use aeth_queue::{QueueBackend, RedisBackend};

#[derive(Parser)]
#[command(name = "aethctl", version, about = "Firecracker microVM lifecycle and task execution daemon")]
struct Cli {
    /// Path to the daemon's TOML config file.
    #[arg(long, global = true, default_value = "/etc/aetherium/daemon.toml")]
    config: PathBuf,

    /// Emit structured JSON logs instead of compact human-readable ones.
    #[arg(long, global = true)]
    json_logs: bool,

    /// Redis connection string for the task queue. Required by `serve`
    /// for multi-node deployments, and by every `vm`/`workspace` command
    /// that enqueues a task, since the in-memory queue only exists inside
    /// the daemon's own process.
    #[arg(long, global = true)]
    redis_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon: registers this worker, then runs the dispatch loop,
    /// the idle reaper, and the heartbeat loop until interrupted.
    Serve {
        /// Use the in-memory store instead of Postgres. State is lost on
        /// restart; intended for local development only.
        #[arg(long)]
        in_memory: bool,
    },
    /// Run pending Postgres migrations and exit.
    Migrate,
    /// Print cluster-wide worker and VM stats.
    Status,
    /// Manage microVMs.
    Vm {
        #[command(subcommand)]
        action: VmCmd,
    },
    /// Manage workspaces.
    Workspace {
        #[command(subcommand)]
        action: WorkspaceCmd,
    },
}

#[derive(Subcommand)]
enum VmCmd {
    /// List known VMs.
    List,
    /// Enqueue a `vm:create` task.
    Create {
        name: String,
        #[arg(long, default_value_t = 1)]
        vcpu_count: u32,
        #[arg(long, default_value_t = 256)]
        mem_size_mib: u32,
    },
    /// Enqueue a `vm:execute` task.
    Exec {
        vm_id: VmId,
        cmd: String,
        #[arg(trailing_var_arg = true)]
        args: Vec<String>,
    },
    /// Enqueue a `vm:delete` task.
    Delete { vm_id: VmId },
}

#[derive(Subcommand)]
enum WorkspaceCmd {
    /// List known workspaces.
    List,
    /// Enqueue a `prompt:execute` task against a workspace.
    Prompt { workspace_id: WorkspaceId, prompt: String },
}

/// Builds the top-level `clap::Command`, for man-page generation (`xtask`).
pub fn build_cli() -> clap::Command {
    Cli::command()
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    logging::init(if cli.json_logs { LogFormat::Json } else { LogFormat::Human });

    match cli.command {
        Commands::Serve { in_memory } => cmd_serve(&cli.config, in_memory, cli.redis_url.as_deref()).await,
        Commands::Migrate => cmd_migrate(&cli.config).await,
        Commands::Status => cmd_status(&cli.config).await,
        Commands::Vm { action } => cmd_vm(&cli.config, cli.redis_url.as_deref(), action).await,
        Commands::Workspace { action } => cmd_workspace(&cli.config, cli.redis_url.as_deref(), action).await,
    }
}

async fn cmd_serve(config_path: &std::path::Path, in_memory: bool, redis_url: Option<&str>) -> Result<()> {
    let config = DaemonConfig::from_file(config_path)?;
    let daemon = Daemon::bootstrap(&config, in_memory, redis_url).await?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        let _ = shutdown_tx.send(true);
    });

    daemon.run(shutdown_rx).await;
    Ok(())
}

async fn cmd_migrate(config_path: &std::path::Path) -> Result<()> {
    let config = DaemonConfig::from_file(config_path)?;
    aeth_storage::create_pool(
        aeth_storage::DbConfig::from_url(&config.database.url).with_max_connections(config.database.max_connections),
    )
    .await
    .context("running migrations")?;
    println!("migrations applied");
    Ok(())
}

async fn cmd_status(config_path: &std::path::Path) -> Result<()> {
    let config = DaemonConfig::from_file(config_path)?;
    let repos = build_repos(&config, false).await?;
    let workers = repos.worker.list().await?;
    let stats = aeth_cluster::stats::aggregate(&workers, chrono::Utc::now());

    println!("{}", "cluster status".bold());
    println!("workers:  {} ({} healthy)", stats.total_workers, stats.healthy_workers);
    println!(
        "cpu:      {}/{} cores in use",
        stats.used_cpu, stats.total_cpu_cores
    );
    println!(
        "memory:   {}/{} MiB in use",
        stats.used_memory_mb, stats.total_memory_mb
    );
    println!("vms:      {}", stats.total_vms);
    for (zone, z) in &stats.per_zone {
        println!(
            "  zone {zone}: {} workers ({} healthy), {} vms, {} free slots",
            z.worker_count, z.healthy_count, z.vm_count, z.free_vm_slots
        );
    }

    let now = chrono::Utc::now();
    let infos = aeth_cluster::node_infos(&workers, now);
    let node_stats = aeth_cluster::node_stats(&workers, now);
    println!("{}", "nodes".bold());
    for (info, stat) in infos.iter().zip(node_stats.iter()) {
        println!(
            "  {}  {} [{}]  healthy={}  free: {} vcpu, {} MiB, {} vm slots",
            info.id, info.hostname, info.zone, info.healthy, stat.free_cpu, stat.free_memory_mb, stat.free_vm_slots
        );
    }
    Ok(())
}

/// Enqueues a task for a running daemon. Requires Redis: the in-memory
/// queue backend only exists inside the daemon's own process, so an
/// out-of-process CLI has no way to reach it.
async fn enqueue(redis_url: Option<&str>, task: Task) -> Result<()> {
    let Some(url) = redis_url.map(str::to_owned).or_else(|| std::env::var("AETH_REDIS_URL").ok()) else {
        bail!("enqueuing a task requires --redis-url (or AETH_REDIS_URL) pointing at the daemon's queue");
    };
    let backend = RedisBackend::connect(&url).await.context("connecting to redis")?;
    backend.enqueue(task).await.context("enqueuing task")?;
    Ok(())
}

async fn cmd_vm(config_path: &std::path::Path, redis_url: Option<&str>, action: VmCmd) -> Result<()> {
    let config = DaemonConfig::from_file(config_path)?;
    match action {
        VmCmd::List => {
            let repos = build_repos(&config, false).await?;
            for vm in repos.vm.list().await? {
                println!("{}  {}  {:?}  {} vcpu  {} MiB", vm.id, vm.name, vm.status, vm.vcpu_count, vm.memory_mb);
            }
        }
        VmCmd::Create { name, vcpu_count, mem_size_mib } => {
            let task = Task::new(
                TaskType::VmCreate,
                serde_json::json!({ "name": name, "vcpu_count": vcpu_count, "mem_size_mib": mem_size_mib }),
                3,
            );
            let id = task.id;
            enqueue(redis_url, task).await?;
            println!("enqueued vm:create task {id}");
        }
        VmCmd::Exec { vm_id, cmd, args } => {
            let task = Task::new(TaskType::VmExecute, serde_json::json!({ "vm_id": vm_id, "cmd": cmd, "args": args }), 1);
            let id = task.id;
            enqueue(redis_url, task).await?;
            println!("enqueued vm:execute task {id}");
        }
        VmCmd::Delete { vm_id } => {
            let task = Task::new(TaskType::VmDelete, serde_json::json!({ "vm_id": vm_id }), 3);
            let id = task.id;
            enqueue(redis_url, task).await?;
            println!("enqueued vm:delete task {id}");
        }
    }
    Ok(())
}

async fn cmd_workspace(config_path: &std::path::Path, redis_url: Option<&str>, action: WorkspaceCmd) -> Result<()> {
    let config = DaemonConfig::from_file(config_path)?;
    match action {
        WorkspaceCmd::List => {
            let repos = build_repos(&config, false).await?;
            for ws in repos.workspace.list().await? {
                println!("{}  {:?}", ws.id, ws.status);
            }
        }
        WorkspaceCmd::Prompt { workspace_id, prompt } => {
            let task = Task::new(
                TaskType::PromptExecute,
                serde_json::json!({ "workspace_id": workspace_id, "prompt": prompt }),
                1,
            );
            let id = task.id;
            enqueue(redis_url, task).await?;
            println!("enqueued prompt:execute task {id}");
        }
    }
    Ok(())
}
