use std::cmp::min;
use tracing::{debug, trace};

use crate::frames::frame::FrameState;
use crate::frames::frame_ledger::FrameLedger;
use crate::simulation::sim_config::SimConfig;
use crate::simulation::sim_events::{ArqEvent, TimerStatus};
use crate::simulation::watchdog::TimeoutControl;

pub struct TickOutcome {
    /// arrivals during this tick, in ascending sequence order
    pub events: Vec<ArqEvent>,
    /// false if nothing is travelling any more, i.e. the engine can go idle
    pub in_flight: bool,
}

/// Moves frames and acknowledgements towards their destination and performs the protocol's
///  reaction when they arrive.
pub struct TransitEngine {
    progress_per_tick: u32,
    transit_distance: u32,
}
impl TransitEngine {
    pub fn new(config: &SimConfig) -> TransitEngine {
        TransitEngine {
            progress_per_tick: config.progress_per_tick,
            transit_distance: config.transit_distance,
        }
    }

    /// One scheduling step. Frames are processed in ascending sequence order so that the
    ///  receiver's in-order check sees lower frames' arrivals of the same tick.
    pub fn tick(&self, ledger: &mut FrameLedger, timer: &mut impl TimeoutControl) -> TickOutcome {
        let mut events = Vec::new();

        for sequence in 0..ledger.next() {
            let frame = ledger.frame_mut(sequence);
            if !frame.is_in_flight() {
                continue;
            }

            frame.progress = min(frame.progress + self.progress_per_tick, self.transit_distance);
            if frame.progress < self.transit_distance {
                continue;
            }

            let event = match frame.state {
                FrameState::OutboundInFlight => Self::on_arrival_at_receiver(ledger, sequence),
                FrameState::ReturnInFlight => Self::on_arrival_at_sender(ledger, timer, sequence),
                other => unreachable!("frame #{} is in flight but {:?}", sequence, other),
            };
            events.push(event);
        }

        ledger.check_invariants();

        let in_flight = ledger.any_in_flight();
        trace!("tick: {} arrivals, frames in flight: {}", events.len(), in_flight);
        TickOutcome { events, in_flight }
    }

    fn on_arrival_at_receiver(ledger: &mut FrameLedger, sequence: usize) -> ArqEvent {
        let in_order = ledger.all_reached_receiver_before(sequence);

        let frame = ledger.frame_mut(sequence);
        frame.reached_receiver = true;
        frame.state = FrameState::AtReceiverAwaitingOrder;

        if in_order {
            // the record turns into the acknowledgement and starts its way back
            frame.needs_ack = false;
            frame.progress = 0;
            frame.state = FrameState::ReturnInFlight;
            debug!("frame #{} received in order, acknowledgement sent", sequence);
        }
        else {
            frame.selected = false;
            debug!("frame #{} received out of order, no acknowledgement sent", sequence);
        }

        ArqEvent::FrameReceived { sequence, ack_sent: in_order }
    }

    fn on_arrival_at_sender(ledger: &mut FrameLedger, timer: &mut impl TimeoutControl, sequence: usize) -> ArqEvent {
        let base = ledger.cumulative_ack(sequence);

        let timer_status = if ledger.has_outstanding() {
            timer.arm(base);
            TimerStatus::Restarted
        }
        else {
            timer.disarm();
            TimerStatus::Stopped
        };
        debug!("acknowledgement for frame #{} received, base is now {}, timer {:?}", sequence, base, timer_status);

        ArqEvent::AckReceived { sequence, base, timer: timer_status }
    }
}
