//! Workspace task runner, invoked as `cargo run -p xtask -- <task>`.
//! Currently the only task is `man`, which renders `aethctl`'s man pages.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

#[derive(Parser)]
struct Xtask {
    #[command(subcommand)]
    task: Task,
}

#[derive(Subcommand)]
enum Task {
    /// Render `aethctl` man pages into `target/man`.
    Man {
        #[arg(long, default_value = "target/man")]
        out_dir: PathBuf,
    },
}

fn main() -> Result<()> {
    let xtask = Xtask::parse();
    match xtask.task {
        Task::Man { out_dir } => man(&out_dir),
    }
}

fn man(out_dir: &PathBuf) -> Result<()> {
    fs::create_dir_all(out_dir).with_context(|| format!("creating {}", out_dir.display()))?;

    let cmd = aeth_cli::build_cli();
    render(&cmd, "aethctl".to_string(), out_dir)?;
    for sub in cmd.get_subcommands() {
        render(sub, format!("aethctl-{}", sub.get_name()), out_dir)?;
    }

    Ok(())
}

fn render(cmd: &clap::Command, page_name: String, out_dir: &PathBuf) -> Result<()> {
    let man = clap_mangen::Man::new(cmd.clone());
    let mut buffer = Vec::new();
    man.render(&mut buffer)?;

    let path = out_dir.join(format!("{page_name}.1"));
    fs::write(&path, buffer).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}
