//! Float math shim: native intrinsics on `std`, `libm` on bare targets.

#[cfg(feature = "std")]
pub(crate) fn sqrtf(x: f32) -> f32 {
    x.sqrt()
}

#[cfg(not(feature = "std"))]
pub(crate) fn sqrtf(x: f32) -> f32 {
    libm::sqrtf(x)
}

#[cfg(feature = "std")]
pub(crate) fn expf(x: f32) -> f32 {
    x.exp()
}

#[cfg(not(feature = "std"))]
pub(crate) fn expf(x: f32) -> f32 {
    libm::expf(x)
}

#[cfg(feature = "std")]
pub(crate) fn powf(x: f32, y: f32) -> f32 {
    x.powf(y)
}

#[cfg(not(feature = "std"))]
pub(crate) fn powf(x: f32, y: f32) -> f32 {
    libm::powf(x, y)
}

#[cfg(feature = "std")]
pub(crate) fn roundf(x: f32) -> f32 {
    x.round()
}

#[cfg(not(feature = "std"))]
pub(crate) fn roundf(x: f32) -> f32 {
    libm::roundf(x)
}

#[cfg(feature = "std")]
pub(crate) fn ceilf(x: f32) -> f32 {
    x.ceil()
}

#[cfg(not(feature = "std"))]
pub(crate) fn ceilf(x: f32) -> f32 {
    libm::ceilf(x)
}

/// Squared value, mirroring the `sq()` helper used throughout the
/// trapezoid math.
pub(crate) fn sq(x: f32) -> f32 {
    x * x
}
