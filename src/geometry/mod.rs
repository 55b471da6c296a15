//! Output geometry for resize jobs.
//!
//! One requested side implies the other through the original aspect ratio.
//! All arithmetic is integer and floors, so results are reproducible.

use serde::{Deserialize, Serialize};

/// Intrinsic pixel size of a payload. A zero side means "unknown".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_known(&self) -> bool {
        self.width > 0 && self.height > 0
    }

    pub fn has_odd_side(&self) -> bool {
        self.width % 2 == 1 || self.height % 2 == 1
    }
}

impl std::fmt::Display for Dimensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_known() {
            write!(f, "{}x{}", self.width, self.height)
        } else {
            write!(f, "unknown")
        }
    }
}

/// Resolved output size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetGeometry {
    pub width: u32,
    pub height: u32,
}

impl std::fmt::Display for TargetGeometry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Output would equal the input; nothing to scale.
    Unchanged,
    Resize(TargetGeometry),
    /// The original size is unknown, so the engine derives the missing side.
    EngineScaled {
        width: Option<u32>,
        height: Option<u32>,
    },
}

impl Resolution {
    pub fn is_unchanged(&self) -> bool {
        matches!(self, Resolution::Unchanged)
    }
}

/// Resolve the output size for `original` given the requested sides.
///
/// Callers must reject non-positive requests beforehand. An original with a
/// zero side yields [`Resolution::EngineScaled`] instead of dividing by zero.
pub fn resolve(
    original: Dimensions,
    width: Option<u32>,
    height: Option<u32>,
    even_required: bool,
) -> Resolution {
    if width.is_none() && height.is_none() {
        return Resolution::Unchanged;
    }

    if !original.is_known() {
        return Resolution::EngineScaled {
            width: width.map(|w| make_even(w, even_required)),
            height: height.map(|h| make_even(h, even_required)),
        };
    }

    let (w, h) = match (width, height) {
        (Some(w), Some(h)) => (w, h),
        (Some(w), None) => (w, scale_side(w, original.height, original.width)),
        (None, Some(h)) => (scale_side(h, original.width, original.height), h),
        (None, None) => (original.width, original.height),
    };

    let target = TargetGeometry {
        width: make_even(w, even_required),
        height: make_even(h, even_required),
    };

    if target.width == original.width && target.height == original.height {
        Resolution::Unchanged
    } else {
        Resolution::Resize(target)
    }
}

/// floor(requested * numerator / denominator), saturating at u32::MAX.
fn scale_side(requested: u32, numerator: u32, denominator: u32) -> u32 {
    let scaled = u64::from(requested) * u64::from(numerator) / u64::from(denominator);
    u32::try_from(scaled).unwrap_or(u32::MAX)
}

fn make_even(value: u32, even_required: bool) -> u32 {
    if even_required && value % 2 == 1 {
        value.saturating_add(1)
    } else {
        value
    }
}
