//! Development automation tasks for the qrgen workspace.
//!
//! Run with: `cargo xtask <command>`
//!
//! This is a CLI tool for developers, so `println!` and `eprintln!` are used
//! for user-facing output rather than structured logging.

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::env;
use std::process::{Command, ExitCode};

use anyhow::{anyhow, Context};

mod features;

fn main() -> ExitCode {
    let task = env::args().nth(1);

    let result = match task.as_deref() {
        Some("ci") => run_ci(),
        Some("fmt") => run_fmt(),
        Some("clippy") => run_clippy(),
        Some("test") => run_test(),
        Some("test-postgres") => run_postgres_tests(),
        Some("deny") => run_deny(),
        Some("audit") => run_audit(),
        Some("test-features") => features::test_feature_matrix(),
        Some("help") | None => {
            print_help();
            Ok(())
        }
        Some(unknown) => {
            eprintln!("Unknown task: {unknown}");
            eprintln!();
            print_help();
            Err(anyhow!("Unknown task"))
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Task failed: {e}");
            ExitCode::FAILURE
        }
    }
}

fn print_help() {
    println!("qrgen Development Tasks");
    println!();
    println!("USAGE:");
    println!("    cargo xtask <TASK>");
    println!();
    println!("TASKS:");
    println!("    ci             Run all CI checks (fmt, clippy, test, feature matrix, deny)");
    println!("    fmt            Check Rust code formatting");
    println!("    clippy         Run Clippy lints");
    println!("    test           Run all tests");
    println!("    test-postgres  Run the ignored Postgres store tests (needs QRGEN_TEST_DATABASE_URL)");
    println!("    test-features  Verify crate feature combinations compile");
    println!("    deny           Check dependencies with cargo-deny");
    println!("    audit          Audit dependencies for security vulnerabilities");
    println!("    help           Show this help message");
}

/// Run all CI checks in sequence
fn run_ci() -> anyhow::Result<()> {
    println!("==> Running CI checks...\n");

    println!("==> Step 1/5: Checking Rust format...");
    run_fmt()?;

    println!("\n==> Step 2/5: Running Clippy...");
    run_clippy()?;

    println!("\n==> Step 3/5: Running tests...");
    run_test()?;

    println!("\n==> Step 4/5: Checking feature combinations...");
    features::test_feature_matrix()?;

    println!("\n==> Step 5/5: Checking dependencies...");
    run_deny()?;

    println!("\n✓ All CI checks passed!");
    Ok(())
}

fn run_fmt() -> anyhow::Result<()> {
    let status = Command::new("cargo").args(["fmt", "--all", "--", "--check"]).status()?;

    if !status.success() {
        anyhow::bail!("Format check failed. Run 'cargo fmt --all' to fix.");
    }

    Ok(())
}

fn run_clippy() -> anyhow::Result<()> {
    let status =
        Command::new("cargo").args(["clippy", "--all-targets", "--all-features"]).status()?;

    if status.success() {
        Ok(())
    } else {
        Err(anyhow!("Clippy run failed. See output above."))
    }
}

fn run_test() -> anyhow::Result<()> {
    let status = Command::new("cargo").args(["test", "--workspace", "--all-features"]).status()?;

    if !status.success() {
        anyhow::bail!("Tests failed");
    }

    Ok(())
}

/// Run the Postgres store tests, one at a time since they share tables
fn run_postgres_tests() -> anyhow::Result<()> {
    env::var("QRGEN_TEST_DATABASE_URL")
        .context("QRGEN_TEST_DATABASE_URL must point at a scratch database")?;

    let status = Command::new("cargo")
        .args([
            "test",
            "-p",
            "qrgen-infra",
            "--test",
            "postgres_integration",
            "--",
            "--ignored",
            "--test-threads=1",
        ])
        .status()?;

    if !status.success() {
        anyhow::bail!("Postgres tests failed");
    }

    Ok(())
}

fn run_deny() -> anyhow::Result<()> {
    ensure_cargo_subcommand("deny", "cargo-deny")?;

    let status = Command::new("cargo").args(["deny", "check"]).status()?;
    if !status.success() {
        anyhow::bail!("cargo-deny found issues");
    }

    Ok(())
}

fn run_audit() -> anyhow::Result<()> {
    ensure_cargo_subcommand("audit", "cargo-audit")?;

    let status = Command::new("cargo").args(["audit"]).status()?;
    if !status.success() {
        anyhow::bail!("cargo-audit found vulnerabilities");
    }

    Ok(())
}

fn ensure_cargo_subcommand(subcommand: &str, package: &str) -> anyhow::Result<()> {
    let installed = Command::new("cargo")
        .args([subcommand, "--version"])
        .output()
        .is_ok_and(|output| output.status.success());

    if !installed {
        eprintln!("{package} is not installed.");
        eprintln!("Install it with: cargo install {package}");
        anyhow::bail!("{package} not found");
    }

    Ok(())
}
