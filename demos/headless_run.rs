use clap::Parser;
use clap_derive::Parser;
use gbn_sim::simulation::sim_config::SimConfig;
use gbn_sim::simulation::simulation::ArqSimulation;
use gbn_sim::frames::frame::FrameState;
use std::sync::Arc;
use std::time::Duration;
use anyhow::{anyhow, bail};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{self, Instant};
use tracing::{info, warn, Level};

/// Runs a simulation without a user interface: frames are sent as soon as the window allows,
///  and frames can be destroyed at given points in (simulated) time
#[derive(Parser)]
struct Args {
    #[clap(long, default_value_t = 20)]
    frames: usize,

    #[clap(long, default_value_t = 5)]
    window: usize,

    /// destroy a frame or its acknowledgement in transit, e.g. `--kill 3@5.5` for frame #3 after 5.5 seconds
    #[clap(long)]
    kill: Vec<String>,

    /// time lapse factor, e.g. 10 to run ten times as fast
    #[clap(long, default_value_t = 1.0)]
    speed: f64,

    #[clap(short, long, default_value_t = false)]
    verbose: bool,

    #[clap(long, default_value_t = false)]
    very_verbose: bool,
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match (args.verbose, args.very_verbose) {
        (_, true) => Level::TRACE,
        (true, _) => Level::DEBUG,
        (false, false) => Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .try_init()
        .ok();

    if args.speed.is_nan() || args.speed <= 0.0 {
        bail!("speed must be positive");
    }

    let mut kills = Vec::new();
    for s in &args.kill {
        kills.push(parse_kill(s)?);
    }
    kills.sort_by(|a, b| a.1.total_cmp(&b.1));

    let mut config = SimConfig::new();
    config.total_frames = args.frames;
    config.window_size = args.window;
    config.tick_interval = config.tick_interval.div_f64(args.speed);
    config.time_out = config.time_out.div_f64(args.speed);

    let poll_interval = config.tick_interval;
    let sim = ArqSimulation::start(Arc::new(config))?;

    let start = Instant::now();
    let speed = args.speed;
    let mut events = sim.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(evt) => println!("{:>7.1}s  {}", start.elapsed().as_secs_f64() * speed, evt),
                Err(RecvError::Lagged(n)) => warn!("event output fell behind, skipped {} events", n),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut pending_kills = kills.into_iter().peekable();
    let mut poll = time::interval(poll_interval);
    loop {
        poll.tick().await;

        let snapshot = sim.snapshot().await?;
        if snapshot.frames.iter().all(|f| f.state() == FrameState::Acknowledged) {
            break;
        }

        if snapshot.next < snapshot.capacity {
            // the window may still be full, that is fine
            let _ = sim.send_frame().await;
        }

        let simulated_secs = start.elapsed().as_secs_f64() * speed;
        while let Some((sequence, _)) = pending_kills.next_if(|(_, at)| *at <= simulated_secs) {
            let result = match sim.select(sequence).await {
                Ok(_) => sim.kill(sequence).await,
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                warn!("cannot destroy frame #{}: {}", sequence, e);
            }
        }
    }

    info!("all {} frames acknowledged after {:.1} simulated seconds", args.frames, start.elapsed().as_secs_f64() * speed);

    // give the printer a chance to catch up
    time::sleep(Duration::from_millis(10)).await;
    printer.abort();
    Ok(())
}

/// parses `<sequence>@<seconds>`
fn parse_kill(s: &str) -> anyhow::Result<(usize, f64)> {
    let (sequence, secs) = s.split_once('@')
        .ok_or_else(|| anyhow!("expected <frame>@<seconds>, was {}", s))?;
    Ok((sequence.trim().parse()?, secs.trim().parse()?))
}
