//! Sliding-window patch extraction (im2col) for 2-D convolutions.
use itertools::iproduct;
use ndarray::{Array3, ArrayView4};

use crate::error::WsError;
use crate::geometry::{input_index, Conv2dGeometry};

/// Unfolds a (N, C, H, W) activation into its sliding-window patches.
///
/// The result has shape (N, C * K_h * K_w, L): row `c * K_h * K_w + i * K_w + j` holds the
/// input seen by kernel tap (i, j) of channel c, and column `oh * out_w + ow` is the output
/// position. Taps falling in the padding read zero.
///
/// # Examples
///
/// ```rust
/// use ndarray::Array4;
/// use rusty_ws::geometry::Conv2dGeometry;
/// use rusty_ws::patches::extract;
///
/// let activation = Array4::<f32>::ones((1, 2, 4, 4));
/// let geometry = Conv2dGeometry::new(2, 0, 1).unwrap();
/// let patches = extract(activation.view(), &geometry).unwrap();
/// assert_eq!(patches.dim(), (1, 8, 9));
/// ```
pub fn extract(
    activation: ArrayView4<'_, f32>,
    geometry: &Conv2dGeometry,
) -> Result<Array3<f32>, WsError> {
    let (batch, channels, h, w) = activation.dim();
    let (out_h, out_w) = geometry.output_hw(h, w)?;
    let kernel = geometry.kernel_size();
    let padding = geometry.padding();
    let stride = geometry.stride();

    let mut patches = Array3::<f32>::zeros((batch, geometry.window_len(channels), out_h * out_w));
    for (b, c, i, j) in iproduct!(0..batch, 0..channels, 0..kernel.h, 0..kernel.w) {
        let row = (c * kernel.h + i) * kernel.w + j;
        for oh in 0..out_h {
            let Some(y) = input_index(oh, i, stride.h, padding.h, h) else {
                continue;
            };
            for ow in 0..out_w {
                if let Some(x) = input_index(ow, j, stride.w, padding.w, w) {
                    patches[[b, row, oh * out_w + ow]] = activation[[b, c, y, x]];
                }
            }
        }
    }
    Ok(patches)
}
