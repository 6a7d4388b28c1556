use std::sync::Arc;
use tokio::select;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info};

use crate::frames::frame_ledger::FrameLedger;
use crate::simulation::sim_config::SimConfig;
use crate::simulation::sim_errors::CommandError;
use crate::simulation::sim_events::{ArqEvent, ArqEventNotifier};
use crate::simulation::simulation::SimulationSnapshot;
use crate::simulation::transit_engine::TransitEngine;
use crate::simulation::watchdog::{TimeoutControl, Watchdog, WatchdogExpiry};

pub type CommandResult = Result<ArqEvent, CommandError>;

pub(crate) enum SimCommand {
    Send(oneshot::Sender<CommandResult>),
    Pause(oneshot::Sender<CommandResult>),
    Resume(oneshot::Sender<CommandResult>),
    Select { sequence: usize, reply: oneshot::Sender<CommandResult> },
    Kill { sequence: usize, reply: oneshot::Sender<CommandResult> },
    Reset(oneshot::Sender<CommandResult>),
    Snapshot(oneshot::Sender<SimulationSnapshot>),
}

/// The coordinator: this loop is the only code that touches the ledger, the engine and the
///  watchdog. Commands, engine ticks and watchdog expiries are all funneled through it, so they
///  are applied one at a time.
pub(crate) async fn run_simulation(config: Arc<SimConfig>, notifier: ArqEventNotifier, mut commands: mpsc::Receiver<SimCommand>) {
    let (expiry_sender, mut expiries) = mpsc::channel(16);
    let mut state = SimulationState::new(config.as_ref(), expiry_sender, notifier);

    let mut ticks = time::interval(config.tick_interval);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!("starting simulation with window size {} and {} frames", config.window_size, config.total_frames);

    loop {
        select! {
            cmd = commands.recv() => {
                match cmd {
                    Some(cmd) => state.on_command(cmd),
                    None => break,
                }
            }
            expiry = expiries.recv() => {
                let expiry = expiry.expect("the watchdog owns an expiry sender for as long as the state exists");
                state.on_watchdog_expiry(expiry);
            }
            _ = ticks.tick(), if state.engine_running => {
                state.on_tick();
            }
        }

        if state.take_engine_wake() {
            // an idle engine starts moving frames right away rather than one interval later
            ticks.reset_immediately();
        }
    }

    info!("all simulation handles were dropped - shutting down");
}


pub(crate) struct SimulationState {
    ledger: FrameLedger,
    engine: TransitEngine,
    watchdog: Watchdog,
    notifier: ArqEventNotifier,
    engine_running: bool,
    engine_wake_requested: bool,
    paused: bool,
}
impl SimulationState {
    pub fn new(config: &SimConfig, expiry_sender: mpsc::Sender<WatchdogExpiry>, notifier: ArqEventNotifier) -> SimulationState {
        SimulationState {
            ledger: FrameLedger::new(config.window_size, config.total_frames),
            engine: TransitEngine::new(config),
            watchdog: Watchdog::new(config.time_out, expiry_sender),
            notifier,
            engine_running: false,
            engine_wake_requested: false,
            paused: false,
        }
    }

    fn on_command(&mut self, cmd: SimCommand) {
        // a dropped reply receiver means the caller lost interest, the command is applied anyway
        match cmd {
            SimCommand::Send(reply) => { let _ = reply.send(self.send_frame()); }
            SimCommand::Pause(reply) => { let _ = reply.send(self.pause()); }
            SimCommand::Resume(reply) => { let _ = reply.send(self.resume()); }
            SimCommand::Select { sequence, reply } => { let _ = reply.send(self.select(sequence)); }
            SimCommand::Kill { sequence, reply } => { let _ = reply.send(self.kill(sequence)); }
            SimCommand::Reset(reply) => { let _ = reply.send(self.reset()); }
            SimCommand::Snapshot(reply) => { let _ = reply.send(self.snapshot()); }
        }
    }

    fn publish(&mut self, event: ArqEvent) -> ArqEvent {
        self.notifier.send_event(event.clone());
        event
    }

    fn wake_engine(&mut self) {
        if !self.engine_running {
            debug!("waking up transit engine");
            self.engine_running = true;
            self.engine_wake_requested = true;
        }
    }

    fn take_engine_wake(&mut self) -> bool {
        std::mem::take(&mut self.engine_wake_requested)
    }

    fn stop_engine(&mut self) {
        self.engine_running = false;
        self.engine_wake_requested = false;
    }

    fn send_frame(&mut self) -> CommandResult {
        if self.paused {
            return Err(CommandError::Paused);
        }

        let sequence = self.ledger.next();
        self.ledger.admit(sequence)?;

        let timer_armed_for = if self.watchdog.is_armed() {
            None
        }
        else {
            let base = self.ledger.base();
            self.watchdog.arm(base);
            Some(base)
        };

        self.wake_engine();
        Ok(self.publish(ArqEvent::FrameSent { sequence, timer_armed_for }))
    }

    /// NB: The watchdog is disarmed rather than suspended, so the time it already waited is
    ///      lost - resuming starts a full timeout
    fn pause(&mut self) -> CommandResult {
        if self.paused {
            return Err(CommandError::AlreadyPaused);
        }

        debug!("pausing simulation");
        self.paused = true;
        self.stop_engine();

        let timer_paused = self.watchdog.is_armed();
        self.watchdog.disarm();

        Ok(self.publish(ArqEvent::Paused { timer_paused }))
    }

    fn resume(&mut self) -> CommandResult {
        if !self.paused {
            return Err(CommandError::NotPaused);
        }

        debug!("resuming simulation");
        self.paused = false;

        let timer_restarted = self.ledger.has_outstanding();
        if timer_restarted {
            let base = self.ledger.base();
            self.watchdog.arm(base);
        }

        if self.ledger.any_in_flight() {
            self.wake_engine();
        }

        Ok(self.publish(ArqEvent::Resumed { timer_restarted }))
    }

    fn select(&mut self, sequence: usize) -> CommandResult {
        self.ledger.select(sequence)?;
        Ok(self.publish(ArqEvent::FrameSelected { sequence }))
    }

    fn kill(&mut self, sequence: usize) -> CommandResult {
        if self.paused {
            return Err(CommandError::Paused);
        }

        let was_ack = match self.ledger.frame(sequence) {
            Some(frame) if frame.is_selected() && frame.is_in_flight() => !frame.needs_ack(),
            _ => return Err(CommandError::InvalidSelection(sequence)),
        };

        // the watchdog is left alone: the sender learns about the loss only through the timeout
        self.ledger.mark_lost(sequence)?;
        Ok(self.publish(ArqEvent::FrameKilled { sequence, was_ack }))
    }

    fn reset(&mut self) -> CommandResult {
        debug!("resetting simulation");
        self.stop_engine();
        self.watchdog.disarm();
        self.ledger.reset();
        self.paused = false;

        Ok(self.publish(ArqEvent::Reset))
    }

    fn snapshot(&self) -> SimulationSnapshot {
        SimulationSnapshot {
            frames: self.ledger.frames().to_vec(),
            base: self.ledger.base(),
            next: self.ledger.next(),
            window_size: self.ledger.window_size(),
            capacity: self.ledger.capacity(),
            watchdog_armed: self.watchdog.is_armed(),
            paused: self.paused,
            engine_running: self.engine_running,
            latest_message: self.notifier.latest_message().to_string(),
            recent_messages: self.notifier.recent_messages(),
        }
    }

    fn on_tick(&mut self) {
        let outcome = self.engine.tick(&mut self.ledger, &mut self.watchdog);
        for event in outcome.events {
            self.publish(event);
        }

        if !outcome.in_flight {
            debug!("no frames in flight - transit engine goes idle");
            self.stop_engine();
        }
    }

    /// Go-Back-N: resend every unacknowledged frame of the window and start over with a full timeout
    fn on_watchdog_expiry(&mut self, expiry: WatchdogExpiry) {
        if !self.watchdog.on_expiry(expiry) {
            return;
        }

        let resent = self.ledger.retransmit_window();
        if resent.is_empty() {
            debug!("watchdog expired with nothing left to resend");
            self.watchdog.disarm();
            return;
        }

        let base = self.ledger.base();
        self.watchdog.arm(base);
        self.wake_engine();
        self.publish(ArqEvent::FramesResent { sequences: resent, base });
    }
}
