//! Configuration store for the fixed-time motion pipeline.
//!
//! Holds the shaper mode, per-axis damping ratios and vibration tolerances,
//! base shaping frequencies, dynamic-frequency gains, the linear advance
//! gain and the interpolator rounding policy. The store is mutated only
//! while the motion pipeline is quiesced; validated setters reject
//! out-of-range values and leave the previous value untouched.

use crate::errors::ConfigError;
use crate::{FTM_FS, FTM_MIN_SHAPE_FREQ};

/// Operating mode of the fixed-time motion pipeline.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub enum FtMotionMode {
    /// Pipeline off; the classic step generator runs instead.
    #[default]
    Disabled,
    /// Fixed-time stepping without input shaping.
    Enabled,
    /// Zero-vibration shaper (2 impulses).
    Zv,
    /// Zero-vibration-derivative shaper (3 impulses).
    Zvd,
    /// ZVDD shaper (4 impulses).
    Zvdd,
    /// ZVDDD shaper (5 impulses).
    Zvddd,
    /// Extra-insensitive shaper (3 impulses).
    Ei,
    /// Two-hump extra-insensitive shaper (4 impulses).
    TwoHumpEi,
    /// Three-hump extra-insensitive shaper (5 impulses).
    ThreeHumpEi,
    /// Modified zero-vibration shaper (3 impulses).
    Mzv,
}

impl FtMotionMode {
    /// Whether this mode runs the X/Y shaping convolution.
    pub fn has_shaper(self) -> bool {
        !matches!(self, FtMotionMode::Disabled | FtMotionMode::Enabled)
    }
}

/// Dynamic shaping-frequency modulation.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub enum DynFreqMode {
    /// Fixed base frequencies.
    #[default]
    Disabled,
    /// `f = base + k * z`, refreshed when Z changes.
    ZBased,
    /// `f = base + k * e`, refreshed every sample.
    MassBased,
}

/// The persisted configuration of the motion core.
#[derive(Debug, Copy, Clone, PartialEq)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub struct FtConfig {
    /// Active pipeline mode.
    pub mode: FtMotionMode,
    /// Damping ratio per shaped axis (X, Y).
    pub zeta: [f32; 2],
    /// Vibration tolerance per shaped axis, used by the EI family.
    pub vtol: [f32; 2],
    /// Base shaping frequency per shaped axis. [Hz]
    pub base_freq: [f32; 2],
    /// Dynamic frequency gain per shaped axis. [Hz/mm or Hz/g]
    pub dyn_freq_k: [f32; 2],
    /// Dynamic frequency modulation mode.
    pub dyn_freq_mode: DynFreqMode,
    /// Linear advance enable.
    pub linear_adv_ena: bool,
    /// Linear advance gain. [s]
    pub linear_adv_k: f32,
    /// Round step targets to nearest instead of truncating. Truncation
    /// matches the legacy generator bit-for-bit but can drift by one step
    /// over very long jobs.
    pub steps_rounding: bool,
}

impl Default for FtConfig {
    fn default() -> Self {
        Self {
            mode: FtMotionMode::Disabled,
            zeta: [0.1, 0.1],
            vtol: [0.05, 0.05],
            base_freq: [37.0, 37.0],
            dyn_freq_k: [0.0, 0.0],
            dyn_freq_mode: DynFreqMode::Disabled,
            linear_adv_ena: false,
            linear_adv_k: 0.0,
            steps_rounding: true,
        }
    }
}

impl FtConfig {
    /// Validated write of a damping ratio. Must lie strictly inside (0, 1)
    /// so the decay factor `exp(-zeta*pi/sqrt(1-zeta^2))` stays finite.
    pub fn set_zeta(&mut self, axis: usize, value: f32) -> Result<(), ConfigError> {
        if axis >= 2 {
            return Err(ConfigError::InvalidAxis);
        }
        if !(value > 0.0 && value < 1.0) {
            return Err(ConfigError::ZetaOutOfRange);
        }
        self.zeta[axis] = value;
        Ok(())
    }

    /// Validated write of a vibration tolerance. Strict (0, 1): the 2HEI
    /// amplitude formula divides by a power of the tolerance.
    pub fn set_vtol(&mut self, axis: usize, value: f32) -> Result<(), ConfigError> {
        if axis >= 2 {
            return Err(ConfigError::InvalidAxis);
        }
        if !(value > 0.0 && value < 1.0) {
            return Err(ConfigError::VtolOutOfRange);
        }
        self.vtol[axis] = value;
        Ok(())
    }

    /// Validated write of a base shaping frequency. Bounded below by
    /// `FTM_MIN_SHAPE_FREQ` and above by Nyquist.
    pub fn set_base_freq(&mut self, axis: usize, value: f32) -> Result<(), ConfigError> {
        if axis >= 2 {
            return Err(ConfigError::InvalidAxis);
        }
        if !(value >= FTM_MIN_SHAPE_FREQ && value < 0.5 * FTM_FS) {
            return Err(ConfigError::FreqOutOfRange);
        }
        self.base_freq[axis] = value;
        Ok(())
    }

    /// Write of a dynamic frequency gain. Any finite value is accepted;
    /// the effective frequency is floored before use.
    pub fn set_dyn_freq_k(&mut self, axis: usize, value: f32) -> Result<(), ConfigError> {
        if axis >= 2 {
            return Err(ConfigError::InvalidAxis);
        }
        if !value.is_finite() {
            return Err(ConfigError::FreqOutOfRange);
        }
        self.dyn_freq_k[axis] = value;
        Ok(())
    }

    /// Validated write of the linear advance gain and enable flag.
    pub fn set_linear_advance(&mut self, enabled: bool, k: f32) -> Result<(), ConfigError> {
        if !(k >= 0.0) {
            return Err(ConfigError::LinearAdvanceGainOutOfRange);
        }
        self.linear_adv_ena = enabled;
        self.linear_adv_k = k;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_writes_keep_previous_value() {
        let mut cfg = FtConfig::default();
        assert_eq!(cfg.set_zeta(0, 1.5), Err(ConfigError::ZetaOutOfRange));
        assert_eq!(cfg.zeta[0], 0.1);
        assert_eq!(cfg.set_zeta(0, 0.0), Err(ConfigError::ZetaOutOfRange));
        assert_eq!(cfg.zeta[0], 0.1);
        assert_eq!(cfg.set_base_freq(1, 1.0), Err(ConfigError::FreqOutOfRange));
        assert_eq!(cfg.base_freq[1], 37.0);
        assert_eq!(cfg.set_vtol(2, 0.1), Err(ConfigError::InvalidAxis));
    }

    #[test]
    fn accepted_writes_apply() {
        let mut cfg = FtConfig::default();
        cfg.set_zeta(1, 0.2).unwrap();
        assert_eq!(cfg.zeta[1], 0.2);
        cfg.set_base_freq(0, 52.5).unwrap();
        assert_eq!(cfg.base_freq[0], 52.5);
        cfg.set_linear_advance(true, 0.06).unwrap();
        assert!(cfg.linear_adv_ena);
    }

    #[test]
    fn shaper_modes_classified() {
        assert!(!FtMotionMode::Disabled.has_shaper());
        assert!(!FtMotionMode::Enabled.has_shaper());
        assert!(FtMotionMode::Zv.has_shaper());
        assert!(FtMotionMode::ThreeHumpEi.has_shaper());
    }
}
