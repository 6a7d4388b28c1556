use std::sync::Arc;
use anyhow::anyhow;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::frames::frame::Frame;
use crate::simulation::sim_config::SimConfig;
use crate::simulation::sim_driver::{run_simulation, CommandResult, SimCommand};
use crate::simulation::sim_errors::CommandError;
use crate::simulation::sim_events::{ArqEvent, ArqEventNotifier};

/// A consistent copy of the simulation's state, intended for rendering
#[derive(Clone, Debug)]
pub struct SimulationSnapshot {
    pub frames: Vec<Frame>,
    pub base: usize,
    pub next: usize,
    pub window_size: usize,
    pub capacity: usize,
    pub watchdog_armed: bool,
    pub paused: bool,
    pub engine_running: bool,
    pub latest_message: String,
    /// newest first
    pub recent_messages: Vec<String>,
}
impl SimulationSnapshot {
    pub fn frame(&self, sequence: usize) -> Option<&Frame> {
        self.frames.get(sequence)
    }
}

/// Handle to a running Go-Back-N simulation.
///
/// All state lives in a coordinator task that is spawned by [ArqSimulation::start]; the methods
///  here send commands to it and wait for the result. Dropping the handle stops the simulation.
pub struct ArqSimulation {
    commands: mpsc::Sender<SimCommand>,
    events: broadcast::Sender<ArqEvent>,
    driver: JoinHandle<()>,
}
impl ArqSimulation {
    pub fn start(config: Arc<SimConfig>) -> anyhow::Result<ArqSimulation> {
        config.validate()?;

        let notifier = ArqEventNotifier::new(config.event_channel_capacity, config.event_log_size);
        let events = notifier.sender();

        let (commands, command_receiver) = mpsc::channel(32);
        let driver = tokio::spawn(run_simulation(config, notifier, command_receiver));

        Ok(ArqSimulation {
            commands,
            events,
            driver,
        })
    }

    /// Subscribers see all events published after subscribing. A subscriber that falls behind by
    ///  more than the configured channel capacity loses the oldest events.
    pub fn subscribe(&self) -> broadcast::Receiver<ArqEvent> {
        self.events.subscribe()
    }

    async fn request(&self, cmd: impl FnOnce(oneshot::Sender<CommandResult>) -> SimCommand) -> CommandResult {
        let (reply, reply_receiver) = oneshot::channel();
        self.commands.send(cmd(reply)).await
            .map_err(|_| CommandError::SimulationStopped)?;
        reply_receiver.await
            .map_err(|_| CommandError::SimulationStopped)?
    }

    pub async fn send_frame(&self) -> CommandResult {
        self.request(SimCommand::Send).await
    }

    pub async fn pause(&self) -> CommandResult {
        self.request(SimCommand::Pause).await
    }

    pub async fn resume(&self) -> CommandResult {
        self.request(SimCommand::Resume).await
    }

    pub async fn select(&self, sequence: usize) -> CommandResult {
        self.request(|reply| SimCommand::Select { sequence, reply }).await
    }

    /// Destroys the selected frame (or its acknowledgement) while it is in flight
    pub async fn kill(&self, sequence: usize) -> CommandResult {
        self.request(|reply| SimCommand::Kill { sequence, reply }).await
    }

    pub async fn reset(&self) -> CommandResult {
        self.request(SimCommand::Reset).await
    }

    pub async fn snapshot(&self) -> anyhow::Result<SimulationSnapshot> {
        let (reply, reply_receiver) = oneshot::channel();
        self.commands.send(SimCommand::Snapshot(reply)).await
            .map_err(|_| anyhow!("simulation driver has stopped"))?;
        Ok(reply_receiver.await?)
    }

    /// Stops the coordinator. All subsequent commands fail with [CommandError::SimulationStopped].
    pub fn shutdown(&self) {
        debug!("shutting down simulation");
        self.driver.abort();
    }
}

impl Drop for ArqSimulation {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::time::Duration;
    use rstest::rstest;
    use tokio::time::{self, Instant};
    use crate::frames::frame::FrameState::{self, *};
    use crate::simulation::sim_events::TimerStatus;
    use super::*;

    fn start_default() -> ArqSimulation {
        ArqSimulation::start(Arc::new(SimConfig::new())).unwrap()
    }

    async fn sleep_until_millis(start: Instant, millis: u64) {
        time::sleep_until(start + Duration::from_millis(millis)).await;
    }

    fn drain(events: &mut broadcast::Receiver<ArqEvent>) -> Vec<ArqEvent> {
        let mut result = Vec::new();
        while let Ok(evt) = events.try_recv() {
            result.push(evt);
        }
        result
    }

    fn states(snapshot: &SimulationSnapshot, range: std::ops::Range<usize>) -> Vec<FrameState> {
        snapshot.frames[range].iter()
            .map(|f| f.state())
            .collect()
    }

    #[test]
    fn test_start_rejects_invalid_config() {
        let mut config = SimConfig::new();
        config.window_size = 0;
        assert!(ArqSimulation::start(Arc::new(config)).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_snapshot() {
        let sim = start_default();
        let snapshot = sim.snapshot().await.unwrap();

        assert_eq!(snapshot.frames.len(), 20);
        assert!(snapshot.frames.iter().all(|f| f.state() == Unsent));
        assert_eq!((snapshot.base, snapshot.next, snapshot.window_size, snapshot.capacity), (0, 0, 5, 20));
        assert!(!snapshot.watchdog_armed);
        assert!(!snapshot.paused);
        assert!(!snapshot.engine_running);
        assert_eq!(snapshot.latest_message, "Send a frame to start.");
    }

    #[tokio::test(start_paused = true)]
    async fn test_happy_path() {
        let sim = start_default();
        let mut events = sim.subscribe();

        assert_eq!(sim.send_frame().await, Ok(ArqEvent::FrameSent { sequence: 0, timer_armed_for: Some(0) }));
        for sequence in 1..5 {
            assert_eq!(sim.send_frame().await, Ok(ArqEvent::FrameSent { sequence, timer_armed_for: None }));
        }
        assert_eq!(sim.send_frame().await, Err(CommandError::WindowFull { base: 0, next: 5 }));

        time::sleep(Duration::from_secs(25)).await;

        let snapshot = sim.snapshot().await.unwrap();
        assert_eq!(states(&snapshot, 0..6), vec![Acknowledged, Acknowledged, Acknowledged, Acknowledged, Acknowledged, Unsent]);
        assert_eq!(snapshot.base, 5);
        assert!(!snapshot.watchdog_armed);
        assert!(!snapshot.engine_running);

        let acks = drain(&mut events).into_iter()
            .filter_map(|evt| match evt {
                ArqEvent::AckReceived { base, timer, .. } => Some((base, timer)),
                ArqEvent::FramesResent { .. } => panic!("no frame should have timed out"),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(acks, vec![
            (1, TimerStatus::Restarted),
            (2, TimerStatus::Restarted),
            (3, TimerStatus::Restarted),
            (4, TimerStatus::Restarted),
            (5, TimerStatus::Stopped),
        ]);

        assert_eq!(sim.send_frame().await, Ok(ArqEvent::FrameSent { sequence: 5, timer_armed_for: Some(5) }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_opens_with_first_ack() {
        let sim = start_default();
        let mut events = sim.subscribe();

        for _ in 0..5 {
            sim.send_frame().await.unwrap();
        }

        loop {
            if let ArqEvent::AckReceived { sequence: 0, .. } = events.recv().await.unwrap() {
                break;
            }
        }
        assert!(matches!(sim.send_frame().await, Ok(ArqEvent::FrameSent { sequence: 5, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_frame_causes_go_back_n() {
        let start = Instant::now();
        let sim = start_default();
        let mut events = sim.subscribe();

        for _ in 0..3 {
            sim.send_frame().await.unwrap();
        }

        sleep_until_millis(start, 1_100).await;
        assert_eq!(sim.select(1).await, Ok(ArqEvent::FrameSelected { sequence: 1 }));
        assert_eq!(sim.kill(1).await, Ok(ArqEvent::FrameKilled { sequence: 1, was_ack: false }));

        // frame 0 is acknowledged, frame 2 arrives out of order and is not
        sleep_until_millis(start, 19_500).await;
        let snapshot = sim.snapshot().await.unwrap();
        assert_eq!(states(&snapshot, 0..3), vec![Acknowledged, Lost, AtReceiverAwaitingOrder]);
        assert_eq!(snapshot.base, 1);
        assert!(snapshot.watchdog_armed);
        assert!(!snapshot.engine_running);

        // the acknowledgement for frame 0 re-armed the watchdog, so it fires a full timeout later
        sleep_until_millis(start, 38_000).await;
        let snapshot = sim.snapshot().await.unwrap();
        assert_eq!(snapshot.frame(1).unwrap().state(), Lost);

        sleep_until_millis(start, 39_000).await;
        let snapshot = sim.snapshot().await.unwrap();
        assert_eq!(states(&snapshot, 0..3), vec![Acknowledged, OutboundInFlight, OutboundInFlight]);
        assert!(drain(&mut events).contains(&ArqEvent::FramesResent { sequences: vec![1, 2], base: 1 }));

        sleep_until_millis(start, 60_000).await;
        let snapshot = sim.snapshot().await.unwrap();
        assert_eq!(states(&snapshot, 0..3), vec![Acknowledged, Acknowledged, Acknowledged]);
        assert_eq!(snapshot.base, 3);
        assert!(!snapshot.watchdog_armed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_out_of_order_arrival_stalls_until_timeout() {
        let start = Instant::now();
        let sim = start_default();

        sim.send_frame().await.unwrap();
        sim.send_frame().await.unwrap();

        sleep_until_millis(start, 1_100).await;
        sim.select(0).await.unwrap();
        sim.kill(0).await.unwrap();

        sleep_until_millis(start, 19_000).await;
        let snapshot = sim.snapshot().await.unwrap();
        assert_eq!(states(&snapshot, 0..2), vec![Lost, AtReceiverAwaitingOrder]);
        assert_eq!(snapshot.base, 0);
        assert!(snapshot.frame(1).unwrap().reached_receiver());

        sleep_until_millis(start, 20_500).await;
        let snapshot = sim.snapshot().await.unwrap();
        assert_eq!(states(&snapshot, 0..2), vec![OutboundInFlight, OutboundInFlight]);

        sleep_until_millis(start, 39_500).await;
        let snapshot = sim.snapshot().await.unwrap();
        assert_eq!(states(&snapshot, 0..2), vec![Acknowledged, Acknowledged]);
        assert_eq!(snapshot.base, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_discards_elapsed_timeout() {
        let start = Instant::now();
        let sim = start_default();
        let mut events = sim.subscribe();

        sim.send_frame().await.unwrap();
        sleep_until_millis(start, 1_100).await;
        sim.select(0).await.unwrap();
        sim.kill(0).await.unwrap();

        sleep_until_millis(start, 10_100).await;
        assert_eq!(sim.pause().await, Ok(ArqEvent::Paused { timer_paused: true }));
        assert!(!sim.snapshot().await.unwrap().watchdog_armed);

        sleep_until_millis(start, 15_100).await;
        assert_eq!(sim.resume().await, Ok(ArqEvent::Resumed { timer_restarted: true }));

        // a resumed remaining time would have fired at 25.1s
        sleep_until_millis(start, 34_900).await;
        let snapshot = sim.snapshot().await.unwrap();
        assert_eq!(snapshot.frame(0).unwrap().state(), Lost);
        assert!(!drain(&mut events).iter().any(|evt| matches!(evt, ArqEvent::FramesResent { .. })));

        sleep_until_millis(start, 35_500).await;
        let snapshot = sim.snapshot().await.unwrap();
        assert_eq!(snapshot.frame(0).unwrap().state(), OutboundInFlight);
        assert!(drain(&mut events).contains(&ArqEvent::FramesResent { sequences: vec![0], base: 0 }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_freezes_progress() {
        let sim = start_default();
        sim.send_frame().await.unwrap();

        time::sleep(Duration::from_millis(2_100)).await;
        sim.pause().await.unwrap();
        let frozen = sim.snapshot().await.unwrap().frame(0).unwrap().progress();
        assert!(frozen > 0);

        time::sleep(Duration::from_secs(30)).await;
        let snapshot = sim.snapshot().await.unwrap();
        assert_eq!(snapshot.frame(0).unwrap().progress(), frozen);
        assert!(!snapshot.engine_running);
        assert!(snapshot.paused);

        sim.resume().await.unwrap();
        time::sleep(Duration::from_millis(1_100)).await;
        assert!(sim.snapshot().await.unwrap().frame(0).unwrap().progress() > frozen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_commands_while_paused() {
        let sim = start_default();
        sim.send_frame().await.unwrap();

        assert_eq!(sim.resume().await, Err(CommandError::NotPaused));
        assert_eq!(sim.pause().await, Ok(ArqEvent::Paused { timer_paused: true }));
        assert_eq!(sim.pause().await, Err(CommandError::AlreadyPaused));

        assert_eq!(sim.send_frame().await, Err(CommandError::Paused));
        assert_eq!(sim.select(0).await, Ok(ArqEvent::FrameSelected { sequence: 0 }));
        assert_eq!(sim.kill(0).await, Err(CommandError::Paused));

        let snapshot = sim.snapshot().await.unwrap();
        assert_eq!(snapshot.next, 1);
        assert_eq!(snapshot.frame(0).unwrap().state(), OutboundInFlight);

        sim.reset().await.unwrap();
        assert!(!sim.snapshot().await.unwrap().paused);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_without_outstanding_frames() {
        let sim = start_default();
        sim.pause().await.unwrap();
        assert_eq!(sim.resume().await, Ok(ArqEvent::Resumed { timer_restarted: false }));

        let snapshot = sim.snapshot().await.unwrap();
        assert!(!snapshot.watchdog_armed);
        assert!(!snapshot.engine_running);
    }

    #[rstest]
    #[case::unsent(7, CommandError::InvalidSelection(7))]
    #[case::out_of_range(99, CommandError::InvalidSelection(99))]
    #[case::not_selected(0, CommandError::InvalidSelection(0))]
    #[tokio::test(start_paused = true)]
    async fn test_kill_rejected(#[case] sequence: usize, #[case] expected: CommandError) {
        let sim = start_default();
        sim.send_frame().await.unwrap();
        assert_eq!(sim.kill(sequence).await, Err(expected));
        assert_eq!(sim.snapshot().await.unwrap().frame(0).unwrap().state(), OutboundInFlight);
    }

    #[tokio::test(start_paused = true)]
    async fn test_select_rejected() {
        let sim = start_default();
        assert_eq!(sim.select(0).await, Err(CommandError::NotInFlight(0)));
        assert_eq!(sim.select(42).await, Err(CommandError::NotInFlight(42)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_killed_ack_is_resent_after_timeout() {
        let start = Instant::now();
        let sim = start_default();
        sim.send_frame().await.unwrap();

        // frame 0 arrives at 9.2s and travels back as an acknowledgement
        sleep_until_millis(start, 9_300).await;
        sim.select(0).await.unwrap();
        assert_eq!(sim.kill(0).await, Ok(ArqEvent::FrameKilled { sequence: 0, was_ack: true }));

        sleep_until_millis(start, 20_100).await;
        let snapshot = sim.snapshot().await.unwrap();
        let frame = snapshot.frame(0).unwrap();
        assert_eq!(frame.state(), OutboundInFlight);
        assert!(frame.needs_ack());
        assert!(frame.reached_receiver());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset() {
        let sim = start_default();
        let mut events = sim.subscribe();

        sim.send_frame().await.unwrap();
        sim.send_frame().await.unwrap();
        time::sleep(Duration::from_secs(3)).await;

        drain(&mut events);
        assert_eq!(sim.reset().await, Ok(ArqEvent::Reset));

        let snapshot = sim.snapshot().await.unwrap();
        assert!(snapshot.frames.iter().all(|f| f.state() == Unsent && f.progress() == 0 && !f.reached_receiver()));
        assert_eq!((snapshot.base, snapshot.next), (0, 0));
        assert!(!snapshot.watchdog_armed);
        assert!(!snapshot.paused);
        assert!(!snapshot.engine_running);
        assert_eq!(snapshot.latest_message, "Simulation has been restarted.");

        // neither the engine nor the watchdog from before the reset have any effect
        time::sleep(Duration::from_secs(60)).await;
        assert_eq!(drain(&mut events), vec![ArqEvent::Reset]);

        assert_eq!(sim.send_frame().await, Ok(ArqEvent::FrameSent { sequence: 0, timer_armed_for: Some(0) }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recent_messages() {
        let sim = start_default();
        for _ in 0..3 {
            sim.send_frame().await.unwrap();
        }
        sim.select(2).await.unwrap();

        let snapshot = sim.snapshot().await.unwrap();
        assert_eq!(snapshot.latest_message, "Frame #2 has been selected.");
        assert_eq!(snapshot.recent_messages, vec![
            "Frame #2 has been selected.".to_string(),
            "Frame #2 has been sent.".to_string(),
            "Frame #1 has been sent.".to_string(),
            "Frame #0 has been sent. Timer set for Frame #0.".to_string(),
            "Send a frame to start.".to_string(),
        ]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_commands_after_shutdown() {
        let sim = start_default();
        sim.shutdown();

        assert_eq!(sim.send_frame().await, Err(CommandError::SimulationStopped));
        assert!(sim.snapshot().await.is_err());
    }

    /// Sends all frames, destroying the first transmission of every third frame, and checks the
    ///  window bounds along the way
    #[tokio::test(start_paused = true)]
    async fn test_all_frames_delivered_despite_losses() {
        let sim = start_default();
        let mut killed = BTreeSet::new();

        for _ in 0..1_000 {
            let snapshot = sim.snapshot().await.unwrap();
            assert!(snapshot.base <= snapshot.next);
            assert!(snapshot.next <= snapshot.base + snapshot.window_size);
            assert!(snapshot.base + snapshot.window_size <= snapshot.capacity);
            assert!(snapshot.frames[..snapshot.base].iter().all(|f| f.state() == Acknowledged));

            if snapshot.frames.iter().all(|f| f.state() == Acknowledged) {
                break;
            }

            if snapshot.next < snapshot.capacity {
                let _ = sim.send_frame().await;
            }

            for frame in &snapshot.frames {
                let sequence = frame.sequence();
                if sequence % 3 == 0 && frame.state() == OutboundInFlight && !killed.contains(&sequence) {
                    if sim.select(sequence).await.is_ok() {
                        sim.kill(sequence).await.unwrap();
                        killed.insert(sequence);
                    }
                }
            }

            time::sleep(Duration::from_secs(1)).await;
        }

        let snapshot = sim.snapshot().await.unwrap();
        assert!(snapshot.frames.iter().all(|f| f.state() == Acknowledged));
        assert_eq!(snapshot.base, 15);
        assert_eq!(killed, (0..20).filter(|n| n % 3 == 0).collect::<BTreeSet<_>>());
    }
}
