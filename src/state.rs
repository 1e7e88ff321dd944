//! Shared data types and collaborator contracts.
//!
//! All data types are `Copy` so the foreground loop can hand snapshots to the
//! console without borrowing games.

// ── ADC channels ──────────────────────────────────────────────────────────────

/// The three conversion sources read once per sample request.
#[derive(Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Channel {
    /// Reference level (bandgap / VREF).
    Reference,
    /// Vortex-shedding pressure sensor.
    Vortex,
    /// Temperature sensor.
    Temperature,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Reference, Channel::Vortex, Channel::Temperature];

    /// Slot of this channel in an [`AdcReadings`] array.
    pub const fn index(self) -> usize {
        match self {
            Channel::Reference => 0,
            Channel::Vortex => 1,
            Channel::Temperature => 2,
        }
    }
}

/// Latest raw conversion per channel, indexed by [`Channel::index`].
pub type AdcReadings = [u16; 3];

/// Blocking conversion source (external collaborator). The firmware backs
/// this with the on-chip ADC; tests back it with canned samples.
pub trait SampleSource {
    fn read_channel(&mut self, channel: Channel) -> u16;
}

// ── Computed outputs ──────────────────────────────────────────────────────────

/// Output of one pipeline pass, read by the console for display.
#[derive(Clone, Copy, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FlowReadings {
    /// Volumetric flow in gallons per minute; `None` until the solve converges.
    pub flow_gpm: Option<f32>,
    /// Vortex shedding frequency estimate, Hz.
    pub freq_hz: f32,
    /// Process temperature, °C.
    pub temp_c: i32,
}

/// Snapshot handed to the console each foreground lap.
#[derive(Clone, Copy)]
pub struct SystemStatus {
    pub readings: FlowReadings,
    pub adc: AdcReadings,
    /// Core clock in Hz, reported by system info.
    pub core_clock_hz: u32,
}

impl SystemStatus {
    pub const fn new(core_clock_hz: u32) -> Self {
        Self {
            readings: FlowReadings {
                flow_gpm: None,
                freq_hz: 0.0,
                temp_c: 0,
            },
            adc: [0; 3],
            core_clock_hz,
        }
    }
}
