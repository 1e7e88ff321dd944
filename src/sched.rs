//! Fixed-period cyclic executive.
//!
//! One tick arrives every 100 µs. An 8-bit phase counter partitions ticks into
//! time-slot groups by lowest set bit, so each group runs at a geometrically
//! increasing period: every 2nd tick, every 4th, … every 64th, plus a residual
//! group for phases 0/64/128/192. Work of different urgency is staggered
//! across groups; within a tick, every-tick work always runs before group
//! work. There is no preemption between groups and no overrun detection — a
//! handler that outlasts the tick period starves the slow groups, which the
//! tests below would surface as missed timer fires.

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::config::HEARTBEAT_RELOAD;

// ── Time-slot groups ──────────────────────────────────────────────────────────

/// Mutually exclusive partition of phase values, finest cadence first.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SlotGroup {
    /// Odd phases: 1, 3, 5, …
    Every2nd,
    /// Phases 2, 6, 10, …
    Every4th,
    /// Phases 4, 12, 20, …
    Every8th,
    /// Phases 8, 24, 40, …
    Every16th,
    /// Phases 16, 48, 80, …
    Every32nd,
    /// Phases 32, 96, 160, 224.
    Every64th,
    /// Phases 0, 64, 128, 192 — the slowest cadence (6.4 ms at a 100 µs tick).
    Residual,
}

impl SlotGroup {
    /// Group owning `phase`. Pure: ascending bit masks, first set bit wins.
    pub const fn of(phase: u8) -> SlotGroup {
        if phase & 0x01 != 0 {
            SlotGroup::Every2nd
        } else if phase & 0x02 != 0 {
            SlotGroup::Every4th
        } else if phase & 0x04 != 0 {
            SlotGroup::Every8th
        } else if phase & 0x08 != 0 {
            SlotGroup::Every16th
        } else if phase & 0x10 != 0 {
            SlotGroup::Every32nd
        } else if phase & 0x20 != 0 {
            SlotGroup::Every64th
        } else {
            SlotGroup::Residual
        }
    }
}

// ── Software timers ───────────────────────────────────────────────────────────

/// Countdown byte serviced by exactly one slot group.
///
/// `tick()` decrements (wrapping) and, on hitting the fire value, reloads and
/// reports the fire — the counter is never left parked at the fire value.
pub struct SoftwareTimer {
    counter: u8,
    reload: u8,
    fire_at: u8,
}

impl SoftwareTimer {
    pub const fn new(reload: u8, fire_at: u8) -> Self {
        Self {
            counter: reload,
            reload,
            fire_at,
        }
    }

    /// One dispatch of the owning group. True when the timer fired.
    pub fn tick(&mut self) -> bool {
        self.counter = self.counter.wrapping_sub(1);
        if self.counter == self.fire_at {
            self.counter = self.reload;
            true
        } else {
            false
        }
    }

    /// Restart the countdown from `value` (mode switches reset the display
    /// cadence this way).
    pub fn restart(&mut self, value: u8) {
        self.counter = value;
    }
}

// ── Cross-context flags ───────────────────────────────────────────────────────

/// Single-word atomics shared between the tick context and the foreground.
///
/// Every flag has one producer and one consumer; consumption is a
/// read-and-clear swap so a fire is observed exactly once. The ISR counter is
/// diagnostic only — staleness on the reader side is acceptable.
pub struct SchedFlags {
    adc_request: AtomicBool,
    display_ready: AtomicBool,
    heartbeat_due: AtomicBool,
    display_restart: AtomicBool,
    isr_count: AtomicU32,
}

impl SchedFlags {
    pub const fn new() -> Self {
        Self {
            adc_request: AtomicBool::new(false),
            display_ready: AtomicBool::new(false),
            heartbeat_due: AtomicBool::new(false),
            display_restart: AtomicBool::new(false),
            isr_count: AtomicU32::new(0),
        }
    }

    // Tick-context producer side.

    /// Signal that a fresh ADC sample should be taken. Replace semantics.
    pub fn signal_adc_request(&self) {
        self.adc_request.store(true, Ordering::Relaxed);
    }

    /// Signal that one unsolicited status line may be emitted.
    pub fn signal_display_ready(&self) {
        self.display_ready.store(true, Ordering::Relaxed);
    }

    /// Signal that the heartbeat LED should toggle.
    pub fn signal_heartbeat(&self) {
        self.heartbeat_due.store(true, Ordering::Relaxed);
    }

    /// Consume a pending display-restart request (tick context only).
    pub fn take_display_restart(&self) -> bool {
        self.display_restart.swap(false, Ordering::Relaxed)
    }

    // Foreground consumer side.

    /// Consume the per-tick sample request. A request that was never taken is
    /// simply replaced by the next tick — dropped requests are not retried.
    pub fn take_adc_request(&self) -> bool {
        self.adc_request.swap(false, Ordering::Relaxed)
    }

    /// Consume the display-cadence fire.
    pub fn take_display_ready(&self) -> bool {
        self.display_ready.swap(false, Ordering::Relaxed)
    }

    /// Consume the heartbeat fire.
    pub fn take_heartbeat(&self) -> bool {
        self.heartbeat_due.swap(false, Ordering::Relaxed)
    }

    /// Foreground request: restart the display timer at the next residual
    /// dispatch (issued on every mode switch and completed command).
    pub fn request_display_restart(&self) {
        self.display_restart.store(true, Ordering::Relaxed);
    }

    /// Tick handler invocations since boot, diagnostic.
    pub fn isr_count(&self) -> u32 {
        self.isr_count.load(Ordering::Relaxed)
    }
}

impl Default for SchedFlags {
    fn default() -> Self {
        Self::new()
    }
}

// ── Scheduler ─────────────────────────────────────────────────────────────────

/// Phase counter, software timers and dispatch logic. Owned exclusively by
/// the tick context; everything the foreground needs crosses via
/// [`SchedFlags`].
pub struct Scheduler {
    phase: u8,
    /// Fires every 256 residual dispatches ≈ 1.64 s: the unsolicited display
    /// cadence.
    display: SoftwareTimer,
    /// Fires every 78 residual dispatches ≈ 0.5 s: the heartbeat LED toggle.
    heartbeat: SoftwareTimer,
    /// Free-running tick counter (wraps every 6.5 s at 100 µs).
    ticks: u16,
}

impl Scheduler {
    pub const fn new() -> Self {
        Self {
            phase: 0,
            // fire_at 1, reload 1: the counter then free-wraps through
            // 0,255,…,2 and fires again exactly 256 dispatches later.
            display: SoftwareTimer::new(1, 1),
            heartbeat: SoftwareTimer::new(HEARTBEAT_RELOAD, 0),
            ticks: 0,
        }
    }

    /// Wrapping tick count since boot (mod 256).
    pub fn phase(&self) -> u8 {
        self.phase
    }

    pub fn tick_count(&self) -> u16 {
        self.ticks
    }

    /// One periodic tick. Must complete well inside the tick period.
    pub fn tick(&mut self, flags: &SchedFlags) {
        self.phase = self.phase.wrapping_add(1);

        // Every-tick work: signal the foreground to sample the ADC. Replace,
        // never queue.
        flags.signal_adc_request();

        match SlotGroup::of(self.phase) {
            SlotGroup::Every2nd
            | SlotGroup::Every4th
            | SlotGroup::Every8th
            | SlotGroup::Every16th
            | SlotGroup::Every32nd
            | SlotGroup::Every64th => {
                // No actions registered at these cadences yet.
            }
            SlotGroup::Residual => {
                if flags.take_display_restart() {
                    self.display.restart(0);
                }
                if self.display.tick() {
                    flags.signal_display_ready();
                }
                if self.heartbeat.tick() {
                    flags.signal_heartbeat();
                }
            }
        }

        self.ticks = self.ticks.wrapping_add(1);
        flags.isr_count.fetch_add(1, Ordering::Relaxed);
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_phase_selects_exactly_one_group() {
        let mut counts = [0u32; 7];
        for phase in 0..=255u8 {
            let idx = match SlotGroup::of(phase) {
                SlotGroup::Every2nd => 0,
                SlotGroup::Every4th => 1,
                SlotGroup::Every8th => 2,
                SlotGroup::Every16th => 3,
                SlotGroup::Every32nd => 4,
                SlotGroup::Every64th => 5,
                SlotGroup::Residual => 6,
            };
            counts[idx] += 1;
            // Pure function: same phase, same group.
            assert_eq!(SlotGroup::of(phase), SlotGroup::of(phase));
        }
        assert_eq!(counts, [128, 64, 32, 16, 8, 4, 4]);
    }

    #[test]
    fn group_membership_matches_cadence() {
        assert_eq!(SlotGroup::of(1), SlotGroup::Every2nd);
        assert_eq!(SlotGroup::of(6), SlotGroup::Every4th);
        assert_eq!(SlotGroup::of(12), SlotGroup::Every8th);
        assert_eq!(SlotGroup::of(40), SlotGroup::Every16th);
        assert_eq!(SlotGroup::of(80), SlotGroup::Every32nd);
        assert_eq!(SlotGroup::of(96), SlotGroup::Every64th);
        assert_eq!(SlotGroup::of(0), SlotGroup::Residual);
        assert_eq!(SlotGroup::of(192), SlotGroup::Residual);
    }

    #[test]
    fn software_timer_fires_every_reload_dispatches() {
        let mut t = SoftwareTimer::new(78, 0);
        let mut fires = 0;
        for _ in 0..78 * 5 {
            if t.tick() {
                fires += 1;
            }
        }
        assert_eq!(fires, 5);
    }

    #[test]
    fn adc_request_set_each_tick_and_consumed_once() {
        let mut sched = Scheduler::new();
        let flags = SchedFlags::new();

        sched.tick(&flags);
        assert!(flags.take_adc_request());
        // Consumed — stays clear until the next tick replaces it.
        assert!(!flags.take_adc_request());

        sched.tick(&flags);
        sched.tick(&flags);
        // Two ticks, one take: the request was replaced, not queued.
        assert!(flags.take_adc_request());
        assert!(!flags.take_adc_request());
    }

    #[test]
    fn display_fires_once_per_256_residual_dispatches() {
        let mut sched = Scheduler::new();
        let flags = SchedFlags::new();

        // The residual group runs every 64 ticks; the display timer fires
        // every 256 of those dispatches. Run two full display periods.
        let mut fires = 0;
        for _ in 0..(64 * 256 * 2) {
            sched.tick(&flags);
            if flags.take_display_ready() {
                fires += 1;
            }
        }
        assert_eq!(fires, 2);
    }

    #[test]
    fn heartbeat_cadence_is_reload_times_residual_period() {
        let mut sched = Scheduler::new();
        let flags = SchedFlags::new();

        let mut ticks_at_fire = heapless::Vec::<u32, 4>::new();
        for n in 0u32..64 * 78 * 3 {
            sched.tick(&flags);
            if flags.take_heartbeat() {
                let _ = ticks_at_fire.push(n);
            }
        }
        assert_eq!(ticks_at_fire.len(), 3);
        // Steady state: exactly 78 residual dispatches (78 × 64 ticks) apart.
        let d = ticks_at_fire[2] - ticks_at_fire[1];
        assert_eq!(d, 78 * 64);
    }

    #[test]
    fn display_restart_defers_next_fire() {
        let mut sched = Scheduler::new();
        let flags = SchedFlags::new();

        // Advance 200 residual dispatches, then restart the cadence.
        for _ in 0..64 * 200 {
            sched.tick(&flags);
        }
        let _ = flags.take_display_ready();
        flags.request_display_restart();

        // A near-full fresh period must elapse before the next fire.
        let mut fired = false;
        for _ in 0..64 * 250 {
            sched.tick(&flags);
            fired |= flags.take_display_ready();
        }
        assert!(!fired);
        for _ in 0..64 * 10 {
            sched.tick(&flags);
            fired |= flags.take_display_ready();
        }
        assert!(fired);
    }

    #[test]
    fn counters_advance_per_tick() {
        let mut sched = Scheduler::new();
        let flags = SchedFlags::new();
        for _ in 0..300 {
            sched.tick(&flags);
        }
        assert_eq!(flags.isr_count(), 300);
        assert_eq!(sched.tick_count(), 300);
        // Phase wrapped past 255 without reset.
        assert_eq!(sched.phase(), (300 % 256) as u8);
    }
}
