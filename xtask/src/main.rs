//! xtask: Development tasks for pursuit
//!
//! Run with: `cargo xtask <command>`

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use xshell::{cmd, Shell};

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Development tasks for pursuit")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run all tests (workspace + fuzz harnesses)
    Test,
    /// Run fuzz tests with bolero
    Fuzz {
        /// Test to fuzz (e.g. "turn_handoff", "return_code_bytes")
        /// If not specified, runs all fuzz harnesses in test mode (quick smoke test)
        target: Option<String>,
    },
    /// Run the random agent against a real server
    Agent {
        /// Directory holding launcher.exe, HighwayPursuit.exe and server.dll
        #[arg(long)]
        game_dir: PathBuf,
        #[arg(long, default_value_t = 3)]
        episodes: u32,
    },
    /// Run clippy on all code
    Clippy,
    /// Check formatting
    Fmt {
        /// Fix formatting issues instead of just checking
        #[arg(long)]
        fix: bool,
    },
}

fn main() -> ExitCode {
    if let Err(e) = run() {
        eprintln!("Error: {e}");
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let sh = Shell::new()?;

    let workspace_root = workspace_root()?;
    sh.change_dir(&workspace_root);

    match cli.command {
        Commands::Test => {
            println!("=== Running workspace tests ===");

            // Try nextest first, fall back to cargo test
            if cmd!(sh, "cargo nextest --version").quiet().run().is_ok() {
                println!("Using cargo-nextest");
                cmd!(sh, "cargo nextest run --workspace").run()?;
            } else {
                println!("cargo-nextest not found, using cargo test");
                cmd!(sh, "cargo test --workspace").run()?;
            }

            println!("\n=== Running fuzz harnesses (test mode) ===");
            sh.change_dir(workspace_root.join("fuzz"));
            cmd!(sh, "cargo test").run()?;

            println!("\n=== All tests passed ===");
        }
        Commands::Fuzz { target } => {
            sh.change_dir(workspace_root.join("fuzz"));

            if let Some(t) = target {
                println!("=== Fuzzing target: {t} ===");
                println!("Press Ctrl+C to stop.\n");

                if cmd!(sh, "cargo bolero --version").quiet().run().is_err() {
                    eprintln!("cargo-bolero not found. Install with:");
                    eprintln!("  cargo install cargo-bolero");
                    return Err("cargo-bolero not installed".into());
                }

                cmd!(sh, "cargo bolero test {t}").run()?;
            } else {
                println!("=== Running all fuzz harnesses in test mode ===");
                println!("(For real fuzzing, specify a target: cargo xtask fuzz turn_handoff)\n");
                println!("Available targets:");
                println!("  - turn_handoff       (turn ownership and phase machine)");
                println!("  - return_code_bytes  (return-code classification)");
                println!("  - server_info_sizing (segment sizes from server info)\n");

                cmd!(sh, "cargo test").run()?;
            }
        }
        Commands::Agent { game_dir, episodes } => {
            let launcher = game_dir.join("launcher.exe");
            let payload = game_dir.join("HighwayPursuit.exe");
            let module = game_dir.join("server.dll");
            for path in [&launcher, &payload, &module] {
                if !path.exists() {
                    return Err(format!("missing {}", path.display()).into());
                }
            }
            let episodes = episodes.to_string();

            println!("=== Running random agent ===");
            cmd!(
                sh,
                "cargo run -p pursuit --example random_agent -- --launcher {launcher} --payload {payload} --module {module} --episodes {episodes}"
            )
            .run()?;
        }
        Commands::Clippy => {
            println!("=== Running clippy ===");
            cmd!(sh, "cargo clippy --workspace --all-targets -- -D warnings").run()?;

            println!("\n=== Clippy on fuzz crate ===");
            sh.change_dir(workspace_root.join("fuzz"));
            cmd!(sh, "cargo clippy --all-targets -- -D warnings").run()?;
        }
        Commands::Fmt { fix } => {
            if fix {
                println!("=== Fixing formatting ===");
                cmd!(sh, "cargo fmt --all").run()?;
                sh.change_dir(workspace_root.join("fuzz"));
                cmd!(sh, "cargo fmt").run()?;
            } else {
                println!("=== Checking formatting ===");
                cmd!(sh, "cargo fmt --all -- --check").run()?;
                sh.change_dir(workspace_root.join("fuzz"));
                cmd!(sh, "cargo fmt -- --check").run()?;
            }
        }
    }

    Ok(())
}

/// The directory holding the workspace `Cargo.toml` (parent of this crate).
fn workspace_root() -> Result<PathBuf, Box<dyn std::error::Error>> {
    let manifest_dir = match std::env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(_) => std::env::current_dir()?.join("xtask"),
    };
    let root = manifest_dir
        .parent()
        .ok_or("xtask manifest has no parent directory")?;
    Ok(root.to_path_buf())
}
