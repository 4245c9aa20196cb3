//! Weight materialization: turning raw (full-precision) weights into quantized levels.
//!
//! The counter only ever sees the output of a [`WeightMaterializer`]. With a bit width of 2,
//! the [`UniformQuantizer`] yields ternary weights in {-1, 0, +1}.
use ndarray::{Array4, ArrayView4};
use serde::{Deserialize, Serialize};

use crate::error::WsError;

/// The smallest supported bit width (ternary levels).
pub const MIN_BIT_WIDTH: u32 = 2;
/// The largest supported bit width.
pub const MAX_BIT_WIDTH: u32 = 8;

/// Quantization parameters of a layer.
#[derive(Debug, PartialEq, Clone, Copy, Serialize, Deserialize)]
pub struct QuantParams {
    pub bit_width: u32,
    pub scale: f32,
}

impl Default for QuantParams {
    fn default() -> Self {
        QuantParams {
            bit_width: MIN_BIT_WIDTH,
            scale: 1.0,
        }
    }
}

/// Produces the quantized weight levels of a layer from its raw weights.
pub trait WeightMaterializer {
    /// Returns a tensor of the same shape as `raw` holding quantized levels.
    fn dequantize(
        &self,
        raw: ArrayView4<'_, f32>,
        bit_width: u32,
        scale: f32,
    ) -> Result<Array4<f32>, WsError>;
}

/// Symmetric uniform quantizer: `clamp(round(w / scale), -q_max, q_max)` with `q_max = 2^(b-1) - 1`.
///
/// ```rust
/// use ndarray::Array4;
/// use rusty_ws::quant::{UniformQuantizer, WeightMaterializer};
///
/// let raw = Array4::from_shape_vec((1, 1, 1, 4), vec![-0.9, -0.2, 0.3, 2.0]).unwrap();
/// let levels = UniformQuantizer.dequantize(raw.view(), 2, 0.5).unwrap();
/// assert_eq!(levels.iter().copied().collect::<Vec<f32>>(), vec![-1.0, 0.0, 1.0, 1.0]);
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct UniformQuantizer;

impl WeightMaterializer for UniformQuantizer {
    fn dequantize(
        &self,
        raw: ArrayView4<'_, f32>,
        bit_width: u32,
        scale: f32,
    ) -> Result<Array4<f32>, WsError> {
        if !(MIN_BIT_WIDTH..=MAX_BIT_WIDTH).contains(&bit_width) {
            return Err(WsError::InvalidParameter(format!(
                "bit width must be in {}..={}, got {}",
                MIN_BIT_WIDTH, MAX_BIT_WIDTH, bit_width
            )));
        }
        if !(scale.is_finite() && scale > 0.0) {
            return Err(WsError::InvalidParameter(format!(
                "quantization scale must be positive and finite, got {}",
                scale
            )));
        }

        let q_max = ((1_i32 << (bit_width - 1)) - 1) as f32;
        Ok(raw.mapv(|w| (w / scale).round().clamp(-q_max, q_max)))
    }
}

/// Hands the weights through untouched, for weights that are already quantized.
#[derive(Debug, Default, Clone, Copy)]
pub struct Passthrough;

impl WeightMaterializer for Passthrough {
    fn dequantize(
        &self,
        raw: ArrayView4<'_, f32>,
        _bit_width: u32,
        _scale: f32,
    ) -> Result<Array4<f32>, WsError> {
        Ok(raw.to_owned())
    }
}
