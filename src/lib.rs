//! Vortex-shedding flow meter core.
//!
//! Everything that does not touch hardware lives here: the tick scheduler and
//! its time-slot groups, the SPSC byte rings between interrupt and foreground
//! context, the operator console state machine, and the signal pipeline from
//! raw ADC samples to gallons per minute. The firmware binary (behind the
//! `firmware` feature) wires these onto the MCU; host tests drive them with
//! mocks and canned sample windows.

#![cfg_attr(not(test), no_std)]

pub mod config;
pub mod flow;
pub mod monitor;
pub mod sched;
pub mod state;
pub mod transport;

/// Package version, reported by the console `V` command.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use monitor::{Console, DebugProbe, Mode};
pub use sched::{SchedFlags, Scheduler, SlotGroup};
pub use state::{AdcReadings, Channel, FlowReadings, SampleSource, SystemStatus};
pub use transport::TransportQueue;
