use std::collections::VecDeque;
use std::fmt::{Display, Formatter};
use tokio::sync::broadcast;
use tracing::trace;

/// What happened to the watchdog as a consequence of an acknowledgement arriving
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TimerStatus {
    Restarted,
    Stopped,
}

/// One transition of the simulation. The `Display` impl renders the human readable event
///  message shown by user interfaces.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ArqEvent {
    Ready,
    FrameSent {
        sequence: usize,
        /// the base the watchdog was armed for, if sending this frame armed it
        timer_armed_for: Option<usize>,
    },
    FrameReceived {
        sequence: usize,
        ack_sent: bool,
    },
    AckReceived {
        sequence: usize,
        base: usize,
        timer: TimerStatus,
    },
    FrameSelected {
        sequence: usize,
    },
    FrameKilled {
        sequence: usize,
        was_ack: bool,
    },
    FramesResent {
        sequences: Vec<usize>,
        base: usize,
    },
    Paused {
        timer_paused: bool,
    },
    Resumed {
        timer_restarted: bool,
    },
    Reset,
}

impl Display for ArqEvent {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ArqEvent::Ready => write!(f, "Send a frame to start."),
            ArqEvent::FrameSent { sequence, timer_armed_for } => {
                write!(f, "Frame #{} has been sent.", sequence)?;
                if let Some(base) = timer_armed_for {
                    write!(f, " Timer set for Frame #{}.", base)?;
                }
                Ok(())
            }
            ArqEvent::FrameReceived { sequence, ack_sent: true } => write!(f, "Frame #{} has been received. Acknowledgement sent.", sequence),
            ArqEvent::FrameReceived { sequence, ack_sent: false } => write!(f, "Frame #{} has been received. No acknowledgement sent.", sequence),
            ArqEvent::AckReceived { sequence, timer, .. } => {
                write!(f, "Frame #{} acknowledgement has been received.", sequence)?;
                match timer {
                    TimerStatus::Restarted => write!(f, " Timeout timer has restarted."),
                    TimerStatus::Stopped => write!(f, " Timeout timer stopped."),
                }
            }
            ArqEvent::FrameSelected { sequence } => write!(f, "Frame #{} has been selected.", sequence),
            ArqEvent::FrameKilled { sequence, was_ack: false } => write!(f, "Frame #{} has been destroyed. Timeout timer still running.", sequence),
            ArqEvent::FrameKilled { sequence, was_ack: true } => write!(f, "Acknowledgement of Frame #{} has been destroyed. Timeout timer still running.", sequence),
            ArqEvent::FramesResent { .. } => write!(f, "Frames resent due to frame exceeding timeout timer. Timer has restarted."),
            ArqEvent::Paused { timer_paused } => {
                write!(f, "Simulation has been paused.")?;
                if *timer_paused {
                    write!(f, " Timeout timer has been paused.")?;
                }
                Ok(())
            }
            ArqEvent::Resumed { timer_restarted } => {
                write!(f, "Simulation has been resumed.")?;
                if *timer_restarted {
                    write!(f, " Timeout timer has restarted.")?;
                }
                Ok(())
            }
            ArqEvent::Reset => write!(f, "Simulation has been restarted."),
        }
    }
}


/// Publishes events to all subscribers and keeps the most recent messages, newest first
pub struct ArqEventNotifier {
    sender: broadcast::Sender<ArqEvent>,
    recent_messages: VecDeque<String>,
    log_size: usize,
}
impl ArqEventNotifier {
    pub fn new(channel_capacity: usize, log_size: usize) -> ArqEventNotifier {
        let (sender, _) = broadcast::channel(channel_capacity);

        let mut recent_messages = VecDeque::with_capacity(log_size);
        recent_messages.push_front(ArqEvent::Ready.to_string());

        ArqEventNotifier {
            sender,
            recent_messages,
            log_size,
        }
    }

    pub fn sender(&self) -> broadcast::Sender<ArqEvent> {
        self.sender.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ArqEvent> {
        self.sender.subscribe()
    }

    pub fn send_event(&mut self, event: ArqEvent) {
        trace!("event: {:?}", event);

        self.recent_messages.push_front(event.to_string());
        self.recent_messages.truncate(self.log_size);

        // no subscribers is fine
        let _ = self.sender.send(event);
    }

    pub fn latest_message(&self) -> &str {
        self.recent_messages.front()
            .map(|s| s.as_str())
            .unwrap_or_default()
    }

    pub fn recent_messages(&self) -> Vec<String> {
        self.recent_messages.iter().cloned().collect()
    }
}
