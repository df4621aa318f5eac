//! Input shaper kernel.
//!
//! Given a mode, per-axis damping ratio, vibration tolerance and the fixed
//! sampling rate, computes the impulse amplitudes `A[0..=max_i]` and integer
//! sample delays `N[0..=max_i]` of a discrete FIR shaper, and applies the
//! convolution against a cyclic delay line of raw positions.
//!
//! Amplitudes are normalized so each row sums to one; delays derive from the
//! damped half-period `T_h = 0.5 / (f * sqrt(1 - zeta^2))`, except MZV whose
//! first delay uses the 0.375 coefficient. Each supported mode is one match
//! arm so an alternative coefficient derivation stays a local edit.

use crate::config::{DynFreqMode, FtConfig, FtMotionMode};
use crate::math::{expf, powf, roundf, sq, sqrtf};
use crate::{FTM_FS, FTM_MIN_SHAPE_FREQ, FTM_ZMAX};

const PI: f32 = core::f32::consts::PI;

/// Maximum impulses any supported mode uses.
pub const MAX_IMPULSES: usize = 5;

/// Shaping state for one axis: impulse gains, sample delays, and the cyclic
/// delay line of raw (un-shaped) positions.
pub struct AxisShaping {
    /// Impulse amplitudes, summing to 1 over `0..=max_i`.
    pub a: [f32; MAX_IMPULSES],
    /// Impulse delays in whole samples; `n[0] == 0`, non-decreasing.
    pub n: [u32; MAX_IMPULSES],
    /// Raw position history, indexed modulo `FTM_ZMAX`.
    d_zi: [f32; FTM_ZMAX],
}

impl AxisShaping {
    fn new() -> Self {
        Self {
            a: [0.0; MAX_IMPULSES],
            n: [0; MAX_IMPULSES],
            d_zi: [0.0; FTM_ZMAX],
        }
    }

    /// Refresh the delay indices for frequency `f` and damping factor
    /// `df = sqrt(1 - zeta^2)`. Delays are clamped below `FTM_ZMAX` so the
    /// delay-line index can never escape the buffer.
    fn update_delays(&mut self, mode: FtMotionMode, f: f32, df: f32) {
        let base = |coeff: f32| -> u32 {
            let n = roundf((coeff / f / df) * FTM_FS);
            let n = if n < 0.0 { 0.0 } else { n };
            (n as u32).min(FTM_ZMAX as u32 - 1)
        };
        match mode {
            FtMotionMode::Zv => {
                self.n[1] = base(0.5);
            }
            FtMotionMode::Zvd | FtMotionMode::Ei => {
                self.n[1] = base(0.5);
                self.n[2] = (2 * self.n[1]).min(FTM_ZMAX as u32 - 1);
            }
            FtMotionMode::Zvdd | FtMotionMode::TwoHumpEi => {
                self.n[1] = base(0.5);
                self.n[2] = (2 * self.n[1]).min(FTM_ZMAX as u32 - 1);
                self.n[3] = (3 * self.n[1]).min(FTM_ZMAX as u32 - 1);
            }
            FtMotionMode::Zvddd | FtMotionMode::ThreeHumpEi => {
                self.n[1] = base(0.5);
                self.n[2] = (2 * self.n[1]).min(FTM_ZMAX as u32 - 1);
                self.n[3] = (3 * self.n[1]).min(FTM_ZMAX as u32 - 1);
                self.n[4] = (4 * self.n[1]).min(FTM_ZMAX as u32 - 1);
            }
            FtMotionMode::Mzv => {
                self.n[1] = base(0.375);
                self.n[2] = (2 * self.n[1]).min(FTM_ZMAX as u32 - 1);
            }
            _ => self.n = [0; MAX_IMPULSES],
        }
    }

    /// Refresh the impulse gains for decay factor `k` and tolerance `vtol`.
    /// Returns the impulse count minus one for the mode.
    fn update_gains(&mut self, mode: FtMotionMode, k: f32, vtol: f32) -> usize {
        let k2 = sq(k);
        match mode {
            FtMotionMode::Zv => {
                self.a[0] = 1.0 / (1.0 + k);
                self.a[1] = self.a[0] * k;
                1
            }
            FtMotionMode::Zvd => {
                self.a[0] = 1.0 / (1.0 + 2.0 * k + k2);
                self.a[1] = self.a[0] * 2.0 * k;
                self.a[2] = self.a[0] * k2;
                2
            }
            FtMotionMode::Zvdd => {
                self.a[0] = 1.0 / (1.0 + 3.0 * k + 3.0 * k2 + k2 * k);
                self.a[1] = self.a[0] * 3.0 * k;
                self.a[2] = self.a[0] * 3.0 * k2;
                self.a[3] = self.a[0] * k2 * k;
                3
            }
            FtMotionMode::Zvddd => {
                self.a[0] = 1.0 / (1.0 + 4.0 * k + 6.0 * k2 + 4.0 * k2 * k + sq(k2));
                self.a[1] = self.a[0] * 4.0 * k;
                self.a[2] = self.a[0] * 6.0 * k2;
                self.a[3] = self.a[0] * 4.0 * k2 * k;
                self.a[4] = self.a[0] * sq(k2);
                4
            }
            FtMotionMode::Ei => {
                self.a[0] = 0.25 * (1.0 + vtol);
                self.a[1] = 0.50 * (1.0 - vtol) * k;
                self.a[2] = self.a[0] * k2;
                self.normalize(2);
                2
            }
            FtMotionMode::TwoHumpEi => {
                let vtol2 = sq(vtol);
                let x = powf(vtol2 * (sqrtf(1.0 - vtol2) + 1.0), 1.0 / 3.0);
                self.a[0] = (3.0 * sq(x) + 2.0 * x + 3.0 * vtol2) / (16.0 * x);
                self.a[1] = (0.5 - self.a[0]) * k;
                self.a[2] = self.a[1] * k;
                self.a[3] = self.a[0] * k2 * k;
                self.normalize(3);
                3
            }
            FtMotionMode::ThreeHumpEi => {
                self.a[0] = 0.0625 * (1.0 + 3.0 * vtol + 2.0 * sqrtf(2.0 * (vtol + 1.0) * vtol));
                self.a[1] = 0.25 * (1.0 - vtol) * k;
                self.a[2] = (0.5 * (1.0 + vtol) - 2.0 * self.a[0]) * k2;
                self.a[3] = self.a[1] * k2;
                self.a[4] = self.a[0] * sq(k2);
                self.normalize(4);
                4
            }
            FtMotionMode::Mzv => {
                let b = core::f32::consts::SQRT_2 * k;
                self.a[0] = 1.0 / (1.0 + b + k2);
                self.a[1] = self.a[0] * b;
                self.a[2] = self.a[0] * k2;
                2
            }
            _ => {
                self.a = [0.0; MAX_IMPULSES];
                0
            }
        }
    }

    fn normalize(&mut self, max_i: usize) {
        let mut sum = 0.0;
        for i in 0..=max_i {
            sum += self.a[i];
        }
        let adj = 1.0 / sum;
        for i in 0..=max_i {
            self.a[i] *= adj;
        }
    }
}

/// The two-axis shaper kernel. X and Y share one delay-line write cursor.
pub struct ShaperKernel {
    /// Impulse count minus one for the active mode; 0 means bypass.
    pub max_i: usize,
    /// Shared delay-line write cursor.
    zi_idx: usize,
    pub x: AxisShaping,
    pub y: AxisShaping,
    /// Z value the delays were last refreshed for (Z-based dynamic mode).
    last_dyn_z: f32,
}

impl ShaperKernel {
    pub fn new() -> Self {
        Self {
            max_i: 0,
            zi_idx: 0,
            x: AxisShaping::new(),
            y: AxisShaping::new(),
            last_dyn_z: f32::NAN,
        }
    }

    /// Refresh the gains used by the shaping convolution.
    /// To be called on init or on mode, zeta or vtol change.
    pub fn refresh_gains(&mut self, cfg: &FtConfig) {
        let kx = expf(-cfg.zeta[0] * PI / sqrtf(1.0 - sq(cfg.zeta[0])));
        let ky = expf(-cfg.zeta[1] * PI / sqrtf(1.0 - sq(cfg.zeta[1])));
        self.max_i = self.x.update_gains(cfg.mode, kx, cfg.vtol[0]);
        self.y.update_gains(cfg.mode, ky, cfg.vtol[1]);
    }

    /// Refresh the delay indices for the given per-axis frequencies.
    /// To be called when the shaping frequencies change.
    pub fn refresh_delays(&mut self, cfg: &FtConfig, xf: f32, yf: f32) {
        let xdf = sqrtf(1.0 - sq(cfg.zeta[0]));
        let ydf = sqrtf(1.0 - sq(cfg.zeta[1]));
        self.x.update_delays(cfg.mode, xf, xdf);
        self.y.update_delays(cfg.mode, yf, ydf);
    }

    /// Refresh delays from the configured base frequencies.
    pub fn refresh_base_delays(&mut self, cfg: &FtConfig) {
        let xf = cfg.base_freq[0].max(FTM_MIN_SHAPE_FREQ);
        let yf = cfg.base_freq[1].max(FTM_MIN_SHAPE_FREQ);
        self.refresh_delays(cfg, xf, yf);
    }

    /// Per-sample dynamic frequency update. Z-based mode refreshes only
    /// when Z actually changed; mass-based refreshes every sample since E
    /// is expected to change constantly.
    pub fn dynamic_refresh(&mut self, cfg: &FtConfig, z: f32, e: f32) {
        match cfg.dyn_freq_mode {
            DynFreqMode::ZBased => {
                if z != self.last_dyn_z {
                    let xf = cfg.base_freq[0] + cfg.dyn_freq_k[0] * z;
                    let yf = cfg.base_freq[1] + cfg.dyn_freq_k[1] * z;
                    self.refresh_delays(
                        cfg,
                        xf.max(FTM_MIN_SHAPE_FREQ),
                        yf.max(FTM_MIN_SHAPE_FREQ),
                    );
                    self.last_dyn_z = z;
                }
            }
            DynFreqMode::MassBased => {
                let xf = cfg.base_freq[0] + cfg.dyn_freq_k[0] * e;
                let yf = cfg.base_freq[1] + cfg.dyn_freq_k[1] * e;
                self.refresh_delays(
                    cfg,
                    xf.max(FTM_MIN_SHAPE_FREQ),
                    yf.max(FTM_MIN_SHAPE_FREQ),
                );
            }
            DynFreqMode::Disabled => {}
        }
    }

    /// Stash the raw X/Y positions into the delay line and return the
    /// shaped pair. Advances the shared write cursor.
    pub fn apply(&mut self, raw_x: f32, raw_y: f32) -> (f32, f32) {
        self.x.d_zi[self.zi_idx] = raw_x;
        self.y.d_zi[self.zi_idx] = raw_y;
        let mut out_x = self.x.a[0] * raw_x;
        let mut out_y = self.y.a[0] * raw_y;
        for i in 1..=self.max_i {
            let ix = (self.zi_idx + FTM_ZMAX - self.x.n[i] as usize) % FTM_ZMAX;
            let iy = (self.zi_idx + FTM_ZMAX - self.y.n[i] as usize) % FTM_ZMAX;
            out_x += self.x.a[i] * self.x.d_zi[ix];
            out_y += self.y.a[i] * self.y.d_zi[iy];
        }
        self.zi_idx += 1;
        if self.zi_idx == FTM_ZMAX {
            self.zi_idx = 0;
        }
        (out_x, out_y)
    }

    /// Zero the delay lines and write cursor. Gains and delays survive.
    pub fn reset_history(&mut self) {
        self.x.d_zi = [0.0; FTM_ZMAX];
        self.y.d_zi = [0.0; FTM_ZMAX];
        self.zi_idx = 0;
        self.last_dyn_z = f32::NAN;
    }
}

impl Default for ShaperKernel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHAPER_MODES: [FtMotionMode; 8] = [
        FtMotionMode::Zv,
        FtMotionMode::Zvd,
        FtMotionMode::Zvdd,
        FtMotionMode::Zvddd,
        FtMotionMode::Ei,
        FtMotionMode::TwoHumpEi,
        FtMotionMode::ThreeHumpEi,
        FtMotionMode::Mzv,
    ];

    fn kernel_for(mode: FtMotionMode, zeta: f32, vtol: f32) -> (ShaperKernel, FtConfig) {
        let mut cfg = FtConfig {
            mode,
            ..FtConfig::default()
        };
        cfg.zeta = [zeta, zeta];
        cfg.vtol = [vtol, vtol];
        let mut kernel = ShaperKernel::new();
        kernel.refresh_gains(&cfg);
        kernel.refresh_base_delays(&cfg);
        (kernel, cfg)
    }

    #[test]
    fn amplitudes_sum_to_unity_for_all_modes() {
        for mode in SHAPER_MODES {
            for zeta in [0.05, 0.1, 0.3, 0.5] {
                for vtol in [0.01, 0.05, 0.15] {
                    let (kernel, _) = kernel_for(mode, zeta, vtol);
                    let sum: f32 = kernel.x.a[..=kernel.max_i].iter().sum();
                    assert!(
                        (sum - 1.0).abs() < 1e-5,
                        "{mode:?} zeta={zeta} vtol={vtol}: sum={sum}"
                    );
                    assert!(kernel.max_i > 0);
                }
            }
        }
    }

    #[test]
    fn delays_are_monotonic_and_bounded() {
        for mode in SHAPER_MODES {
            let (kernel, _) = kernel_for(mode, 0.1, 0.05);
            assert_eq!(kernel.x.n[0], 0);
            for i in 1..=kernel.max_i {
                assert!(kernel.x.n[i] >= kernel.x.n[i - 1], "{mode:?} tap {i}");
                assert!((kernel.x.n[i] as usize) < FTM_ZMAX);
            }
        }
    }

    #[test]
    fn mzv_uses_shorter_first_delay() {
        let (zv, _) = kernel_for(FtMotionMode::Zv, 0.1, 0.05);
        let (mzv, _) = kernel_for(FtMotionMode::Mzv, 0.1, 0.05);
        // 0.375 vs 0.5 coefficient: three quarters of the ZV delay.
        let expected = roundf(0.75 * zv.x.n[1] as f32) as u32;
        assert_eq!(mzv.x.n[1], expected);
        assert_eq!(mzv.x.n[2], 2 * mzv.x.n[1]);
    }

    #[test]
    fn unsupported_modes_bypass() {
        let (kernel, _) = kernel_for(FtMotionMode::Enabled, 0.1, 0.05);
        assert_eq!(kernel.max_i, 0);
        assert!(kernel.x.a.iter().all(|&a| a == 0.0));
    }

    #[test]
    fn zv_step_response_settles_within_two_half_periods() {
        let (mut kernel, _) = kernel_for(FtMotionMode::Zv, 0.05, 0.05);
        let settle = kernel.x.n[1] as usize;
        let mut peak: f32 = 0.0;
        let mut out = 0.0;
        for i in 0..(2 * settle + 4) {
            let (x, _) = kernel.apply(1.0, 0.0);
            out = x;
            peak = peak.max(x);
            if i < settle {
                assert!(x < 1.0, "converged before the second impulse landed");
            }
        }
        assert!((out - 1.0).abs() < 1e-5);
        // Positive gains summing to one cannot overshoot a unit step.
        assert!(peak <= 1.0 + 1e-6);
    }

    #[test]
    fn z_based_refresh_only_on_z_change() {
        let (mut kernel, mut cfg) = kernel_for(FtMotionMode::Zv, 0.1, 0.05);
        cfg.dyn_freq_mode = DynFreqMode::ZBased;
        cfg.dyn_freq_k = [2.0, 2.0];
        kernel.dynamic_refresh(&cfg, 1.0, 0.0);
        let n_at_z1 = kernel.x.n[1];
        kernel.dynamic_refresh(&cfg, 1.0, 0.0);
        assert_eq!(kernel.x.n[1], n_at_z1);
        kernel.dynamic_refresh(&cfg, 10.0, 0.0);
        assert!(kernel.x.n[1] < n_at_z1, "higher frequency shortens delays");
    }

    #[test]
    fn dynamic_frequency_is_floored() {
        let (mut kernel, mut cfg) = kernel_for(FtMotionMode::Zv, 0.1, 0.05);
        cfg.dyn_freq_mode = DynFreqMode::MassBased;
        cfg.dyn_freq_k = [-100.0, -100.0];
        kernel.dynamic_refresh(&cfg, 0.0, 5.0);
        // base + k*e is far negative; the floor keeps delays finite.
        let xdf = sqrtf(1.0 - sq(cfg.zeta[0]));
        let expected = roundf((0.5 / FTM_MIN_SHAPE_FREQ / xdf) * FTM_FS) as u32;
        assert_eq!(kernel.x.n[1], expected);
    }
}
