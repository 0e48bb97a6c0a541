/*!
 * osawait - command line front end
 *
 * Commands:
 * - `run <program> [args..]`: spawn, await exit, exit with the child's code
 * - `disk <path>`: print device size and geometry as JSON
 */

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use os_await::monitoring::span_operation;
use os_await::{disk_geometry, disk_size, init_tracing, run_process, ExitCode};
use serde_json::json;
use std::ffi::OsString;
use std::fs::File;
use std::os::fd::AsFd;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "osawait", version, about = "Await process exits and query block devices")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Spawn a program, wait for it and exit with its exit code
    Run {
        program: OsString,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<OsString>,
    },
    /// Print size and geometry of a device as JSON
    Disk { path: PathBuf },
}

#[tokio::main]
async fn main() -> Result<std::process::ExitCode> {
    init_tracing();

    match Cli::parse().command {
        Command::Run { program, args } => {
            let code = run(program, args).await?;
            Ok(process_exit_code(code))
        }
        Command::Disk { path } => {
            disk(&path)?;
            Ok(std::process::ExitCode::SUCCESS)
        }
    }
}

/// Child exit codes are 0..=255 on Unix; anything else reports failure
fn process_exit_code(code: ExitCode) -> std::process::ExitCode {
    match u8::try_from(code) {
        Ok(code) => std::process::ExitCode::from(code),
        Err(_) => std::process::ExitCode::FAILURE,
    }
}

async fn run(program: OsString, args: Vec<OsString>) -> Result<ExitCode> {
    let _span = span_operation("run");
    let code = run_process(&program, &args)
        .await
        .with_context(|| format!("failed to run {}", program.to_string_lossy()))?;

    info!(program = %program.to_string_lossy(), code, "process exited");
    Ok(code)
}

fn disk(path: &PathBuf) -> Result<()> {
    let _span = span_operation("disk");
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;

    let report = json!({
        "path": path.display().to_string(),
        "size_bytes": disk_size(file.as_fd()),
        "geometry": disk_geometry(file.as_fd()),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
