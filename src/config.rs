//! Timing, buffer and calibration configuration.
//!
//! Every numeric constant consumed by the scheduler or the signal pipeline
//! lives here; the pipeline itself never hard-codes a calibration value.

// ── Scheduler timing ──────────────────────────────────────────────────────────

/// Tick period of the scheduler in microseconds (10 kHz tick).
pub const TICK_PERIOD_US: u32 = 100;
/// Residual-group heartbeat reload: 78 dispatches × 6.4 ms ≈ 0.4992 s.
pub const HEARTBEAT_RELOAD: u8 = 78;

// ── Transport queues ──────────────────────────────────────────────────────────

/// Receive ring capacity in bytes. Power of two.
pub const RX_QUEUE_LEN: usize = 16;
/// Transmit ring capacity in bytes. Sized for a full menu plus a status line.
pub const TX_QUEUE_LEN: usize = 1024;

// ── Command console ───────────────────────────────────────────────────────────

/// Maximum in-flight command length, command letter included.
pub const MSG_BUF_LEN: usize = 10;

// ── Signal pipeline ───────────────────────────────────────────────────────────

/// Vortex sample window length consumed by one frequency estimation pass.
pub const SAMPLE_WINDOW: usize = 1000;

/// Calibration and geometry values for the flow computation.
///
/// The temperature constants come from the sensor datasheet fit; the
/// geometry describes the meter body. Kept numerically identical to the
/// commissioning values for compatibility.
pub struct FlowConfig {
    /// Bluff body width in inches.
    pub bluff_width_in: f32,
    /// Pipe inner diameter in inches.
    pub pipe_id_in: f32,
    /// ADC sample rate in Hz (one vortex sample per tick).
    pub sample_rate_hz: u32,
    /// Low-pass half-width: 2·w+1 samples are averaged per point.
    pub lp_half_width: usize,
    /// Zero-crossing reference level, midpoint of the 16-bit ADC range.
    pub crossing_center: u16,
    /// Temperature sensor output at 25 °C, millivolts.
    pub v_temp25_mv: i32,
    /// Temperature sensor slope, (mV × 1000) / °C.
    pub temp_slope: i32,
    /// Reference temperature for the linear fit, °C.
    pub temp_ref_c: i32,
    /// Velocity convergence tolerance for the flow solve, m/s.
    pub tolerance: f32,
    /// Iteration cap for the flow solve; exceeding it is "no solution".
    pub max_iterations: u32,
}

impl FlowConfig {
    pub const fn new() -> Self {
        Self {
            bluff_width_in: 0.5,
            pipe_id_in: 2.9,
            sample_rate_hz: 1_000_000 / TICK_PERIOD_US,
            lp_half_width: 2,
            crossing_center: 0x8000,
            v_temp25_mv: 716,
            temp_slope: 1620,
            temp_ref_c: 25,
            tolerance: 1e-4,
            max_iterations: 50,
        }
    }
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self::new()
    }
}
