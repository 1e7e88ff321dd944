//! Signal pipeline: raw vortex samples → filtered signal → shedding frequency
//! → volumetric flow.
//!
//! Three pure stages. The low-pass knocks sensor noise off the sample window,
//! the zero-crossing counter estimates the shedding frequency, and the flow
//! solve iterates the Reynolds/Strouhal correlation until the mean velocity
//! settles.

use micromath::F32Ext;

use crate::config::FlowConfig;

// ── Physical constants ────────────────────────────────────────────────────────

/// Inches → meters.
const IN_TO_M: f32 = 0.0254;
/// Meters/s → feet/s.
const MS_TO_FTS: f32 = 3.280_839_9;
/// gpm = GPM_FACTOR · pipe_id_in² · v_ft_s  (π/4 · ft²→gal · s→min collapsed).
const GPM_FACTOR: f32 = 2.45;

// ── Stage 1: low-pass filter ──────────────────────────────────────────────────

/// Symmetric moving average of 2·`half_width`+1 samples per interior point.
///
/// The `half_width` margin at each end is copied through unchanged; callers
/// that care (the crossing counter) skip it.
pub fn low_pass(input: &[u16], output: &mut [u16], half_width: usize) {
    debug_assert_eq!(input.len(), output.len());
    let n = input.len();
    if n < 2 * half_width + 1 {
        output.copy_from_slice(input);
        return;
    }

    output[..half_width].copy_from_slice(&input[..half_width]);
    output[n - half_width..].copy_from_slice(&input[n - half_width..]);

    let width = 2 * half_width + 1;
    for i in half_width..n - half_width {
        let sum: u32 = input[i - half_width..=i + half_width]
            .iter()
            .map(|&s| s as u32)
            .sum();
        output[i] = (sum / width as u32) as u16;
    }
}

// ── Stage 2: zero-crossing frequency estimate ─────────────────────────────────

/// Count rising crossings of `center` over the interior of `filtered`.
///
/// A crossing is counted only on an at-or-below → above transition, so each
/// signal period contributes exactly one count. The crossing state starts
/// unknown (0): a window that opens above center counts that as its first
/// crossing.
pub fn count_rising_crossings(filtered: &[u16], center: u16, margin: usize) -> u32 {
    let n = filtered.len();
    if n < 2 * margin {
        return 0;
    }

    let mut crossings = 0u32;
    let mut sign = 0i8;
    for &s in &filtered[margin..n - margin] {
        if s > center && sign <= 0 {
            sign = 1;
            crossings += 1;
        } else if s < center && sign >= 0 {
            sign = -1;
        }
    }
    crossings
}

/// Crossings over a window of `window_len` samples at `sample_rate_hz` → Hz.
pub fn estimate_frequency(crossings: u32, window_len: usize, sample_rate_hz: u32) -> f32 {
    if window_len == 0 {
        return 0.0;
    }
    crossings as f32 * sample_rate_hz as f32 / window_len as f32
}

/// Full front end: filter `samples` into `scratch`, count crossings, return
/// the frequency estimate in Hz.
pub fn vortex_frequency(samples: &[u16], scratch: &mut [u16], cfg: &FlowConfig) -> f32 {
    low_pass(samples, scratch, cfg.lp_half_width);
    let crossings = count_rising_crossings(scratch, cfg.crossing_center, cfg.lp_half_width);
    estimate_frequency(crossings, samples.len(), cfg.sample_rate_hz)
}

// ── Temperature conversion ────────────────────────────────────────────────────

/// Raw temperature-channel sample → °C via the datasheet linear fit.
///
/// Integer arithmetic kept bit-identical to the commissioning firmware so the
/// calibration constants keep their fitted meaning.
pub fn temperature_c(raw: u16, cfg: &FlowConfig) -> i32 {
    cfg.temp_ref_c - (raw as i32 - cfg.v_temp25_mv) / cfg.temp_slope
}

// ── Stage 3: flow solve ───────────────────────────────────────────────────────

/// Dynamic viscosity of water in kg/(m·s), Vogel-type fit (~9.3e-4 at 23 °C).
fn water_viscosity(temp_k: f32) -> f32 {
    2.4e-5 * 10.0f32.powf(247.8 / (temp_k - 140.0))
}

/// Density of water in kg/m³ (~1000 near room temperature).
fn water_density(temp_c: f32) -> f32 {
    1000.0
        * (1.0
            - (temp_c + 288.9414) / (508_929.2 * (temp_c + 68.12963))
                * (temp_c - 3.9863)
                * (temp_c - 3.9863))
}

/// Solve for volumetric flow in gpm from shedding frequency and temperature.
///
/// Fixed-point iteration: assume a mean velocity, derive the Reynolds number,
/// map it to a Strouhal number through the empirical correlation, recompute
/// velocity from frequency / Strouhal / body width, repeat until the velocity
/// moves less than the configured tolerance. Returns `None` when the
/// iteration cap is hit or the correlation leaves its valid range, rather
/// than spinning forever.
pub fn solve_flow(freq_hz: f32, temp_c: i32, cfg: &FlowConfig) -> Option<f32> {
    // No shedding, no flow — the iteration below would drive the Reynolds
    // number to zero and run the correlation off its valid range.
    if freq_hz <= 0.0 {
        return Some(0.0);
    }

    let t_c = temp_c as f32;
    let t_k = t_c + 273.15;

    let body_m = cfg.bluff_width_in * IN_TO_M;
    let pipe_m = cfg.pipe_id_in * IN_TO_M;

    let viscosity = water_viscosity(t_k);
    let density = water_density(t_c);

    let mut v_m = 10.0f32; // initial velocity guess, m/s
    let mut converged = false;
    for _ in 0..cfg.max_iterations {
        // Reynolds number; typical vortex regime is 1e5 … 1e7.
        let re = density * v_m * pipe_m / viscosity;
        // Strouhal correlation, valid while it stays comfortably positive.
        let st = 0.2648 - 1.0356 / re.sqrt();
        if st <= 1e-3 {
            return None;
        }

        let next = freq_hz * body_m / st;
        let err = (next - v_m).abs();
        v_m = next;
        if err < cfg.tolerance {
            converged = true;
            break;
        }
    }
    if !converged {
        return None;
    }

    let v_ft = v_m * MS_TO_FTS;
    Some(GPM_FACTOR * cfg.pipe_id_in * cfg.pipe_id_in * v_ft)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// One 1 kHz sine period sampled at 10 kHz, 16-bit unsigned (the
    /// commissioning test vector).
    pub(crate) const SINE_1KHZ_10KSPS: [u16; 10] = [
        0x7FFF, 0xCB3B, 0xF9BB, 0xF9BB, 0xCB3B, 0x7FFF, 0x34C3, 0x0643, 0x0643, 0x34C3,
    ];

    fn sine_window<const N: usize>() -> [u16; N] {
        let mut w = [0u16; N];
        for (i, s) in w.iter_mut().enumerate() {
            *s = SINE_1KHZ_10KSPS[i % SINE_1KHZ_10KSPS.len()];
        }
        w
    }

    #[test]
    fn low_pass_is_identity_on_dc() {
        let input = [12_345u16; 64];
        let mut output = [0u16; 64];
        low_pass(&input, &mut output, 2);
        assert_eq!(input, output);
    }

    #[test]
    fn low_pass_averages_neighborhood() {
        let input = [0u16, 0, 0, 500, 0, 0, 0];
        let mut output = [0u16; 7];
        low_pass(&input, &mut output, 2);
        // The impulse spreads over the five-wide window.
        assert_eq!(output[3], 100);
        assert_eq!(output[2], 100);
        assert_eq!(output[4], 100);
        // Margins pass through.
        assert_eq!(output[0], 0);
        assert_eq!(output[6], 0);
    }

    #[test]
    fn sine_window_yields_one_crossing_per_period() {
        let cfg = FlowConfig::new();
        let samples: [u16; 1000] = sine_window();
        let mut scratch = [0u16; 1000];

        low_pass(&samples, &mut scratch, cfg.lp_half_width);
        let crossings =
            count_rising_crossings(&scratch, cfg.crossing_center, cfg.lp_half_width);
        // 100 periods in the window: 99 interior rising edges plus the
        // opens-above-center initial count.
        assert_eq!(crossings, 100);

        let freq = estimate_frequency(crossings, samples.len(), cfg.sample_rate_hz);
        assert!((freq - 1000.0).abs() < 10.0, "freq = {freq}");
    }

    #[test]
    fn constant_signal_has_no_crossings() {
        let below = [0x1000u16; 100];
        assert_eq!(count_rising_crossings(&below, 0x8000, 2), 0);
        // All-above counts the single initial transition, nothing more.
        let above = [0xF000u16; 100];
        assert_eq!(count_rising_crossings(&above, 0x8000, 2), 1);
    }

    #[test]
    fn temperature_fit_reference_points() {
        let cfg = FlowConfig::new();
        assert_eq!(temperature_c(716, &cfg), 25);
        // One slope unit below/above the reference voltage.
        assert_eq!(temperature_c((716 + 1620) as u16, &cfg), 24);
        assert_eq!(temperature_c(0, &cfg), 25);
    }

    #[test]
    fn flow_solve_converges_near_reference_value() {
        let cfg = FlowConfig::new();
        let flow = solve_flow(1000.0, 25, &cfg).unwrap();
        // Commissioning reference: ≈3203 gpm at 1 kHz / room temperature.
        // The fixed-point f32 solve lands a few percent above the original
        // lookup-table math.
        assert!((3100.0..3350.0).contains(&flow), "flow = {flow}");
    }

    #[test]
    fn flow_solve_is_stable_across_invocations() {
        let cfg = FlowConfig::new();
        let a = solve_flow(1000.0, 25, &cfg).unwrap();
        let b = solve_flow(1000.0, 25, &cfg).unwrap();
        assert!((a - b).abs() < 1.0);
    }

    #[test]
    fn zero_frequency_means_zero_flow() {
        let cfg = FlowConfig::new();
        let flow = solve_flow(0.0, 25, &cfg).unwrap();
        assert!(flow.abs() < 1.0, "flow = {flow}");
    }

    #[test]
    fn iteration_cap_reports_no_solution() {
        let mut cfg = FlowConfig::new();
        cfg.max_iterations = 1;
        cfg.tolerance = 1e-9;
        assert!(solve_flow(1000.0, 25, &cfg).is_none());
    }

    #[test]
    fn full_front_end_estimates_the_test_tone() {
        let cfg = FlowConfig::new();
        let samples: [u16; 1000] = sine_window();
        let mut scratch = [0u16; 1000];
        let freq = vortex_frequency(&samples, &mut scratch, &cfg);
        assert!((freq - 1000.0).abs() < 10.0, "freq = {freq}");
    }
}
