use std::time::Duration;
use anyhow::bail;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct SimConfig {
    /// maximum number of frames that may be outstanding at the same time
    pub window_size: usize,
    /// total number of frames in the sequence space
    pub total_frames: usize,

    /// the watchdog fires this long after it was armed unless an acknowledgement re-arms or
    ///  disarms it first
    pub time_out: Duration,

    /// the transit engine's scheduling rate
    pub tick_interval: Duration,
    pub progress_per_tick: u32,
    /// progress at which a frame (or acknowledgement) arrives at its destination
    pub transit_distance: u32,

    /// number of recent event messages that are retained for display
    pub event_log_size: usize,
    pub event_channel_capacity: usize,
}

impl SimConfig {
    pub fn new() -> SimConfig {
        SimConfig {
            window_size: 5,
            total_frames: 20,
            time_out: Duration::from_secs(20),
            tick_interval: Duration::from_millis(200),
            progress_per_tick: 5,
            transit_distance: 235,
            event_log_size: 5,
            event_channel_capacity: 128,
        }
    }

    /// number of ticks for a frame or an acknowledgement to travel from one end to the other
    pub fn ticks_per_leg(&self) -> u32 {
        self.transit_distance.div_ceil(self.progress_per_tick)
    }

    /// Time from sending a frame until its acknowledgement arrives, assuming nothing gets lost.
    ///  The first tick happens right when the engine starts, hence the `- 1`.
    pub fn round_trip(&self) -> Duration {
        self.tick_interval * (2 * self.ticks_per_leg() - 1)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.window_size == 0 {
            bail!("window size must be positive");
        }
        if self.window_size > self.total_frames {
            bail!("window size {} exceeds the total number of frames {}", self.window_size, self.total_frames);
        }
        if self.time_out.is_zero() {
            bail!("timeout must be positive");
        }
        if self.tick_interval.is_zero() {
            bail!("tick interval must be positive");
        }
        if self.progress_per_tick == 0 {
            bail!("progress per tick must be positive");
        }
        if self.transit_distance == 0 {
            bail!("transit distance must be positive");
        }
        if self.event_log_size == 0 {
            bail!("event log size must be positive");
        }
        if self.event_channel_capacity == 0 {
            bail!("event channel capacity must be positive");
        }

        if self.time_out <= self.round_trip() {
            warn!("timeout of {:?} does not exceed the round trip time of {:?} - every frame will time out at least once", self.time_out, self.round_trip());
        }

        Ok(())
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self::new()
    }
}
