use crate::frames::frame::FrameState;
use crate::frames::frame_ledger::FrameLedger;

/// a fresh ledger with frames `0..num_sent` admitted and in flight towards the receiver
pub fn ledger_with_sent_frames(window_size: usize, capacity: usize, num_sent: usize) -> FrameLedger {
    let mut ledger = FrameLedger::new(window_size, capacity);
    for sequence in 0..num_sent {
        ledger.admit(sequence)
            .expect("test setup should stay inside the window");
    }
    ledger
}

/// compares the states of the first `expected.len()` frames, reporting all of them on mismatch
pub fn assert_states(ledger: &FrameLedger, expected: &[FrameState]) {
    let actual = ledger.frames().iter()
        .take(expected.len())
        .map(|f| f.state())
        .collect::<Vec<_>>();
    assert_eq!(actual.as_slice(), expected);
}
