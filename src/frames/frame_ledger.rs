use std::cmp::min;
use tracing::{debug, trace};

use crate::frames::frame::{Frame, FrameState};
use crate::simulation::sim_errors::CommandError;

/// The single owner of all frame records and of the sliding window's pointers.
///
/// ```ascii
///   acknowledged     outstanding        sendable         not admissible yet
///  [0 ........ base) [base ..... next) [next ... base+size) [base+size ... capacity)
/// ```
///
/// Every mutation re-checks the window invariants and panics if they are broken: a broken
///  invariant is a bug in the protocol logic, not something to recover from at runtime.
#[derive(Debug, Clone)]
pub struct FrameLedger {
    frames: Vec<Frame>,
    base: usize,
    next: usize,
    window_size: usize,
}
impl FrameLedger {
    pub fn new(window_size: usize, capacity: usize) -> FrameLedger {
        assert!(window_size > 0, "window size must be positive");
        assert!(window_size <= capacity, "window size {} exceeds capacity {}", window_size, capacity);

        FrameLedger {
            frames: (0..capacity).map(Frame::new).collect(),
            base: 0,
            next: 0,
            window_size,
        }
    }

    pub fn base(&self) -> usize {
        self.base
    }

    pub fn next(&self) -> usize {
        self.next
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn capacity(&self) -> usize {
        self.frames.len()
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn frame(&self, sequence: usize) -> Option<&Frame> {
        self.frames.get(sequence)
    }

    pub(crate) fn frame_mut(&mut self, sequence: usize) -> &mut Frame {
        &mut self.frames[sequence]
    }

    /// exclusive upper bound for sequence numbers the window currently admits
    pub fn window_end(&self) -> usize {
        min(self.base + self.window_size, self.capacity())
    }

    pub fn is_window_full(&self) -> bool {
        self.next >= self.window_end()
    }

    /// Put frame `sequence` on the wire for the first time, moving `next` past it
    pub fn admit(&mut self, sequence: usize) -> Result<(), CommandError> {
        if self.is_window_full() {
            debug!("rejecting frame #{}: window [{}, {}) is full", sequence, self.base, self.window_end());
            return Err(CommandError::WindowFull { base: self.base, next: self.next });
        }
        if sequence != self.next {
            return Err(CommandError::SequenceMismatch { expected: self.next, actual: sequence });
        }

        self.frames[sequence].launch();
        self.next += 1;
        debug!("admitted frame #{}, window is now base={} next={}", sequence, self.base, self.next);

        self.check_invariants();
        Ok(())
    }

    /// Go-Back-N acknowledgements are cumulative: acknowledging `up_to` acknowledges every frame
    ///  before it as well. Any copy of those frames that is still travelling is discarded.
    ///
    /// The base follows the acknowledgement, but never beyond `capacity - window_size` so that a
    ///  full window always fits into the sequence space. Returns the (possibly unchanged) base.
    pub fn cumulative_ack(&mut self, up_to: usize) -> usize {
        assert!(up_to < self.next, "acknowledgement for frame #{} which was never sent (next is #{})", up_to, self.next);

        for frame in &mut self.frames[..=up_to] {
            if frame.state != FrameState::Acknowledged {
                trace!("frame #{} acknowledged", frame.sequence());
                frame.state = FrameState::Acknowledged;
                frame.selected = false;
            }
        }

        let new_base = min(up_to + 1, self.capacity() - self.window_size);
        if new_base > self.base {
            debug!("window base moves from {} to {}", self.base, new_base);
            self.base = new_base;
        }

        self.check_invariants();
        self.base
    }

    /// A frame (or its acknowledgement) disappears in transit. Its progress is frozen.
    pub fn mark_lost(&mut self, sequence: usize) -> Result<(), CommandError> {
        let frame = self.frames.get_mut(sequence)
            .ok_or(CommandError::NotInFlight(sequence))?;
        if !frame.is_in_flight() {
            return Err(CommandError::NotInFlight(sequence));
        }

        frame.state = FrameState::Lost;
        frame.selected = false;
        debug!("frame #{} lost at progress {}", sequence, frame.progress);

        self.check_invariants();
        Ok(())
    }

    /// Go-Back-N retransmission: every frame in `[base, next)` that is not acknowledged is
    ///  launched again from the sender, whatever happened to it before. Returns the resent
    ///  sequence numbers in ascending order.
    pub fn retransmit_window(&mut self) -> Vec<usize> {
        let mut resent = Vec::new();
        for frame in &mut self.frames[self.base..self.next] {
            if frame.state != FrameState::Acknowledged {
                frame.launch();
                resent.push(frame.sequence());
            }
        }
        debug!("retransmitting frames {:?}", resent);

        self.check_invariants();
        resent
    }

    /// true if some frame in the window has been sent but is not acknowledged yet
    pub fn has_outstanding(&self) -> bool {
        self.frames[self.base..self.next].iter()
            .any(|f| f.state != FrameState::Acknowledged)
    }

    pub fn any_in_flight(&self) -> bool {
        self.frames.iter()
            .any(|f| f.is_in_flight())
    }

    /// The receiver acknowledges a frame only if it holds all earlier frames
    pub fn all_reached_receiver_before(&self, sequence: usize) -> bool {
        self.frames[..sequence].iter()
            .all(|f| f.reached_receiver)
    }

    pub fn selected(&self) -> Option<usize> {
        self.frames.iter()
            .find(|f| f.selected)
            .map(|f| f.sequence())
    }

    /// Only frames in flight can be selected, and at most one at a time: selecting a frame moves
    ///  the selection away from any previously selected frame
    pub fn select(&mut self, sequence: usize) -> Result<(), CommandError> {
        match self.frames.get(sequence) {
            Some(frame) if frame.is_in_flight() => {}
            _ => return Err(CommandError::NotInFlight(sequence)),
        }

        for frame in &mut self.frames {
            frame.selected = frame.sequence() == sequence;
        }

        self.check_invariants();
        Ok(())
    }

    pub fn clear_selection(&mut self) {
        for frame in &mut self.frames {
            frame.selected = false;
        }
    }

    pub fn reset(&mut self) {
        for frame in &mut self.frames {
            frame.clear();
        }
        self.base = 0;
        self.next = 0;
        debug!("frame ledger reset");

        self.check_invariants();
    }

    pub fn check_invariants(&self) {
        assert!(self.base <= self.next, "window base {} is beyond next frame {}", self.base, self.next);
        assert!(self.next <= self.window_end(), "next frame {} is beyond window end {}", self.next, self.window_end());
        assert!(self.base + self.window_size <= self.capacity(), "window [{}, {}) exceeds capacity {}", self.base, self.base + self.window_size, self.capacity());

        if let Some(f) = self.frames[..self.base].iter().find(|f| f.state != FrameState::Acknowledged) {
            panic!("frame #{} is below the window base {} but {:?}", f.sequence(), self.base, f.state);
        }
        if let Some(f) = self.frames[self.next..].iter().find(|f| f.state != FrameState::Unsent) {
            panic!("frame #{} was never admitted but is {:?}", f.sequence(), f.state);
        }

        let mut selected = self.frames.iter().filter(|f| f.selected);
        if let Some(f) = selected.next() {
            assert!(f.is_in_flight(), "selected frame #{} is not in flight but {:?}", f.sequence(), f.state);
        }
        assert!(selected.next().is_none(), "more than one frame is selected");
    }
}
