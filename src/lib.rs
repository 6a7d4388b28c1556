//! Simulation core of a Go-Back-N sliding window protocol.
//!
//! A sender pushes numbered frames into a bounded window, frames and acknowledgements travel at a
//!  fixed rate, and a single retransmission timer guards the oldest unacknowledged frame. Users
//!  can pause the simulation and destroy frames or acknowledgements in transit to watch the
//!  protocol recover.
//!
//! [simulation::simulation::ArqSimulation] is the entry point.

pub mod frames;
pub mod simulation;
pub mod test_util;
