//! Plays a few episodes with uniformly random actions.
//!
//! ```text
//! cargo run -p pursuit --example random_agent -- \
//!     --launcher launcher.exe --payload HighwayPursuit.exe --module server.dll
//! ```
//!
//! Set `RUST_LOG=pursuit=debug` to follow every hand-off.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use pursuit::prelude::*;
use rand::Rng;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "Drive Highway Pursuit with random actions")]
struct Args {
    /// Launcher executable that injects the server module.
    #[arg(long)]
    launcher: PathBuf,

    /// Game executable.
    #[arg(long)]
    payload: PathBuf,

    /// Server module injected into the game.
    #[arg(long)]
    module: PathBuf,

    #[arg(long, default_value_t = 3)]
    episodes: u32,

    /// Stop an episode after this many steps.
    #[arg(long, default_value_t = 1_000)]
    max_steps: u32,

    /// Run the simulation at wall-clock speed.
    #[arg(long)]
    real_time: bool,

    #[arg(long, default_value_t = 4)]
    frame_skip: u32,

    /// Seconds to wait for the server on each step.
    #[arg(long, default_value_t = 10)]
    turn_timeout: u64,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let args = Args::parse();
    let paths = ServerPaths::new(&args.launcher, &args.payload, &args.module);
    let config = SessionConfig::default()
        .with_real_time(args.real_time)
        .with_frame_skip(args.frame_skip)
        .with_turn_timeout(Duration::from_secs(args.turn_timeout));

    let mut session = Session::connect(&paths, config.clone())?;
    println!(
        "connected: observation {:?}, {} actions",
        session.observation_shape(),
        session.action_count()
    );

    let mut rng = rand::thread_rng();
    let mut episode = 0;
    while episode < args.episodes {
        match play_episode(&mut session, &mut rng, args.max_steps) {
            Ok((steps, total)) => {
                println!("episode {episode}: {steps} steps, return {total:.2}");
                episode += 1;
            }
            Err(e) if e.is_restartable() => {
                tracing::warn!("session failed ({}), reconnecting", e);
                if let Err(close) = session.close() {
                    tracing::warn!("close after failure: {}", close);
                }
                session = Session::connect(&paths, config.clone())?;
            }
            Err(e) => return Err(e.into()),
        }
    }

    let report = session.close()?;
    if !report.is_clean() {
        for failure in &report.release_failures {
            eprintln!("cleanup: {failure}");
        }
    }
    Ok(())
}

fn play_episode(
    session: &mut Session,
    rng: &mut impl Rng,
    max_steps: u32,
) -> Result<(u32, f32), Error> {
    session.reset(ResetMode::NewGame)?;

    let mut actions = vec![false; session.action_count()];
    let mut total = 0.0;
    for steps in 1..=max_steps {
        actions.iter_mut().for_each(|a| *a = rng.gen_bool(0.5));
        let step = session.step(&actions)?;
        total += step.reward;
        if step.is_done() {
            return Ok((steps, total));
        }
    }
    Ok((max_steps, total))
}
