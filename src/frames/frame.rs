/// The lifecycle of a single frame. A frame and its acknowledgement share one record across
///  the round trip, so the states cover both legs.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum FrameState {
    /// Not admitted to the window yet (or wiped by a reset)
    Unsent,
    /// The data frame is travelling from sender to receiver
    OutboundInFlight,
    /// The receiver holds the data but did not acknowledge it because an earlier frame is still
    ///  missing. Terminal until the next timeout resends the window.
    AtReceiverAwaitingOrder,
    /// The acknowledgement is travelling from receiver back to sender
    ReturnInFlight,
    /// Covered by a cumulative acknowledgement. Absorbing until reset.
    Acknowledged,
    /// Killed in transit; this is discovered by the sender only through its timeout
    Lost,
}
impl FrameState {
    pub fn is_in_flight(&self) -> bool {
        matches!(self, FrameState::OutboundInFlight | FrameState::ReturnInFlight)
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Frame {
    sequence: usize,
    pub(crate) state: FrameState,
    /// true while the record represents the data frame, false once it has turned into its
    ///  acknowledgement
    pub(crate) needs_ack: bool,
    pub(crate) progress: u32,
    pub(crate) selected: bool,
    /// receiver side knowledge: the data of this frame arrived at the receiver at least once.
    ///  This survives retransmission and is cleared only by a reset.
    pub(crate) reached_receiver: bool,
}
impl Frame {
    pub fn new(sequence: usize) -> Frame {
        Frame {
            sequence,
            state: FrameState::Unsent,
            needs_ack: true,
            progress: 0,
            selected: false,
            reached_receiver: false,
        }
    }

    pub fn sequence(&self) -> usize {
        self.sequence
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    pub fn needs_ack(&self) -> bool {
        self.needs_ack
    }

    pub fn progress(&self) -> u32 {
        self.progress
    }

    pub fn is_selected(&self) -> bool {
        self.selected
    }

    pub fn reached_receiver(&self) -> bool {
        self.reached_receiver
    }

    pub fn is_in_flight(&self) -> bool {
        self.state.is_in_flight()
    }

    /// (re-)launch the data frame from the sender. Receiver knowledge and selection are kept.
    pub(crate) fn launch(&mut self) {
        self.state = FrameState::OutboundInFlight;
        self.needs_ack = true;
        self.progress = 0;
    }

    pub(crate) fn clear(&mut self) {
        *self = Frame::new(self.sequence);
    }
}
