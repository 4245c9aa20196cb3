//! Convolution geometry: kernel size, padding and stride, and the output-size law derived from them.
use serde::{Deserialize, Serialize};

use crate::error::WsError;

/// A (height, width) pair of non-negative integers.
///
/// A pair can be built from a single integer, in which case it is broadcast to both axes.
///
/// ```rust
/// use rusty_ws::geometry::Pair;
///
/// assert_eq!(Pair::from(3), Pair::new(3, 3));
/// assert_eq!(Pair::from((2, 5)), Pair::new(2, 5));
/// ```
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
#[serde(from = "PairRepr", into = "PairRepr")]
pub struct Pair {
    /// Value along the height axis.
    pub h: usize,
    /// Value along the width axis.
    pub w: usize,
}

impl Pair {
    pub fn new(h: usize, w: usize) -> Self {
        Pair { h, w }
    }
}

impl From<usize> for Pair {
    fn from(value: usize) -> Self {
        Pair { h: value, w: value }
    }
}

impl From<(usize, usize)> for Pair {
    fn from((h, w): (usize, usize)) -> Self {
        Pair { h, w }
    }
}

// On disk, a pair is either a single integer or a two-element array.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum PairRepr {
    Single(usize),
    Both(usize, usize),
}

impl From<PairRepr> for Pair {
    fn from(repr: PairRepr) -> Self {
        match repr {
            PairRepr::Single(value) => Pair::from(value),
            PairRepr::Both(h, w) => Pair::new(h, w),
        }
    }
}

impl From<Pair> for PairRepr {
    fn from(pair: Pair) -> Self {
        if pair.h == pair.w {
            PairRepr::Single(pair.h)
        } else {
            PairRepr::Both(pair.h, pair.w)
        }
    }
}

/// The geometry of a 2-D convolution.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
pub struct Conv2dGeometry {
    kernel_size: Pair,
    padding: Pair,
    stride: Pair,
}

impl Conv2dGeometry {
    /// Create a new geometry with the specified parameters.
    /// Returns an error if the kernel size or the stride is zero along any axis.
    pub fn new(
        kernel_size: impl Into<Pair>,
        padding: impl Into<Pair>,
        stride: impl Into<Pair>,
    ) -> Result<Self, WsError> {
        let kernel_size = kernel_size.into();
        let padding = padding.into();
        let stride = stride.into();

        if kernel_size.h == 0 || kernel_size.w == 0 {
            return Err(WsError::InvalidParameter(format!(
                "kernel size must be positive, got {}x{}",
                kernel_size.h, kernel_size.w
            )));
        }
        if stride.h == 0 || stride.w == 0 {
            return Err(WsError::InvalidParameter(format!(
                "stride must be positive, got {}x{}",
                stride.h, stride.w
            )));
        }

        Ok(Conv2dGeometry {
            kernel_size,
            padding,
            stride,
        })
    }

    pub fn kernel_size(&self) -> Pair {
        self.kernel_size
    }

    pub fn padding(&self) -> Pair {
        self.padding
    }

    pub fn stride(&self) -> Pair {
        self.stride
    }

    /// Number of entries of one flattened kernel window over `in_channels` channels.
    pub fn window_len(&self, in_channels: usize) -> usize {
        in_channels * self.kernel_size.h * self.kernel_size.w
    }

    /// Returns the output spatial extent (height, width) for an input of spatial extent (h, w).
    /// Returns an error if the kernel does not fit in the padded input along some axis, or if
    /// the padded input or the number of positions does not fit in a `usize`.
    pub fn output_hw(&self, h: usize, w: usize) -> Result<(usize, usize), WsError> {
        let out_h = output_extent("height", h, self.kernel_size.h, self.padding.h, self.stride.h)?;
        let out_w = output_extent("width", w, self.kernel_size.w, self.padding.w, self.stride.w)?;
        if out_h.checked_mul(out_w).is_none() {
            return Err(WsError::ShapeError(format!(
                "{}x{} output positions overflow",
                out_h, out_w
            )));
        }
        Ok((out_h, out_w))
    }

    /// Returns the number of sliding-window positions L for an input of spatial extent (h, w).
    pub fn output_len(&self, h: usize, w: usize) -> Result<usize, WsError> {
        let (out_h, out_w) = self.output_hw(h, w)?;
        Ok(out_h * out_w)
    }
}

/// Standard convolution output size along one axis.
fn output_extent(
    axis: &str,
    size: usize,
    kernel: usize,
    padding: usize,
    stride: usize,
) -> Result<usize, WsError> {
    let padded = padding
        .checked_mul(2)
        .and_then(|p| size.checked_add(p))
        .ok_or_else(|| {
            WsError::ShapeError(format!(
                "input {} {} with padding {} overflows",
                axis, size, padding
            ))
        })?;
    padded
        .checked_sub(kernel)
        .map(|span| span / stride + 1)
        .ok_or_else(|| {
            WsError::ShapeError(format!(
                "kernel {} {} exceeds padded input {} {}",
                axis, kernel, axis, padded
            ))
        })
}

/// Maps an output index and a kernel tap to the input index it reads along one axis.
/// Returns `None` when the tap falls in the implicit zero padding.
pub(crate) fn input_index(
    out_idx: usize,
    tap: usize,
    stride: usize,
    padding: usize,
    size: usize,
) -> Option<usize> {
    (out_idx * stride + tap)
        .checked_sub(padding)
        .filter(|&idx| idx < size)
}
