//! Weight/spike interaction counting.
//!
//! For a quantized convolution with weights W of shape (C_out, C_in, K_h, K_w) and an input
//! x of shape (N, C_in, H, W), the counter tallies, for every batch element n and output
//! channel c, the multiplications of the convolution where
//! - `W == +1` and the input element is nonzero (`pos`),
//! - `W == -1` and the input element is nonzero (`neg`),
//!
//! summed over all kernel taps and all output positions.
//!
//! Instead of broadcasting the flattened weights against the patches over the joint
//! (N, C_out, C_in * K_h * K_w, L) shape, the number of nonzero inputs seen by each kernel tap
//! is first reduced over the output positions, then contracted against the sign of each
//! weight. The totals are the same exact integer tallies.
//!
//! Weights outside {-1, 0, +1} belong to neither count. Their interactions with nonzero inputs
//! are reported separately in `other` and never folded into `pos` or `neg`.
use ndarray::{Array2, ArrayView2, ArrayView3, ArrayView4, Axis};
use rayon::prelude::*;

use crate::error::WsError;
use crate::geometry::{input_index, Conv2dGeometry};

/// Minimum amount of work (N * C_in * K_h * K_w * L) to spread a count over threads.
pub const MIN_PARALLEL_WORK: usize = 1 << 16;

/// The interaction counts of one invocation, each of shape (N, C_out).
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct InteractionCounts {
    /// Number of `W == +1` and `x != 0` multiplications.
    pub pos: Array2<u64>,
    /// Number of `W == -1` and `x != 0` multiplications.
    pub neg: Array2<u64>,
    /// Number of multiplications of a non-ternary weight with a nonzero input.
    pub other: Array2<u64>,
}

impl InteractionCounts {
    pub fn batch_size(&self) -> usize {
        self.pos.nrows()
    }

    pub fn out_channels(&self) -> usize {
        self.pos.ncols()
    }

    pub fn pos_total(&self) -> u64 {
        self.pos.sum()
    }

    pub fn neg_total(&self) -> u64 {
        self.neg.sum()
    }

    pub fn other_total(&self) -> u64 {
        self.other.sum()
    }
}

/// The sign class of a quantized weight.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum WeightSign {
    Positive,
    Negative,
    Zero,
    /// Anything but exactly -1, 0 or +1 (including NaN).
    Other,
}

impl WeightSign {
    pub fn of(weight: f32) -> Self {
        if weight == 1.0 {
            WeightSign::Positive
        } else if weight == -1.0 {
            WeightSign::Negative
        } else if weight == 0.0 {
            WeightSign::Zero
        } else {
            WeightSign::Other
        }
    }
}

/// Per output channel, the flattened kernel indices of each non-zero sign class.
struct SignMasks {
    positive: Vec<Vec<usize>>,
    negative: Vec<Vec<usize>>,
    other: Vec<Vec<usize>>,
}

impl SignMasks {
    fn new(flat_weight: ArrayView2<'_, f32>) -> Self {
        let out_channels = flat_weight.nrows();
        let mut masks = SignMasks {
            positive: vec![vec![]; out_channels],
            negative: vec![vec![]; out_channels],
            other: vec![vec![]; out_channels],
        };
        for (c, row) in flat_weight.axis_iter(Axis(0)).enumerate() {
            for (k, &w) in row.iter().enumerate() {
                match WeightSign::of(w) {
                    WeightSign::Positive => masks.positive[c].push(k),
                    WeightSign::Negative => masks.negative[c].push(k),
                    WeightSign::Other => masks.other[c].push(k),
                    WeightSign::Zero => {}
                }
            }
        }
        masks
    }

    fn out_channels(&self) -> usize {
        self.positive.len()
    }

    /// Contracts the per-tap nonzero counts of every batch element against the sign masks.
    fn contract(&self, nonzero: &[Vec<u64>]) -> InteractionCounts {
        let shape = (nonzero.len(), self.out_channels());
        let mut counts = InteractionCounts {
            pos: Array2::zeros(shape),
            neg: Array2::zeros(shape),
            other: Array2::zeros(shape),
        };
        let tally = |taps: &[usize], nz: &[u64]| taps.iter().map(|&k| nz[k]).sum::<u64>();
        for (n, nz) in nonzero.iter().enumerate() {
            for c in 0..self.out_channels() {
                counts.pos[[n, c]] = tally(&self.positive[c], nz);
                counts.neg[[n, c]] = tally(&self.negative[c], nz);
                counts.other[[n, c]] = tally(&self.other[c], nz);
            }
        }
        counts
    }
}

/// Flattens a (C_out, C_in, K_h, K_w) weight tensor to (C_out, C_in * K_h * K_w).
fn flatten_weight(weight: ArrayView4<'_, f32>) -> Result<Array2<f32>, WsError> {
    let (out_channels, in_channels, kh, kw) = weight.dim();
    weight
        .as_standard_layout()
        .into_owned()
        .into_shape((out_channels, in_channels * kh * kw))
        .map_err(|e| WsError::ShapeError(e.to_string()))
}

/// Maps `f` over the batch indices, in parallel when the work is large enough.
fn per_batch<F>(batch: usize, work: usize, f: F) -> Vec<Vec<u64>>
where
    F: Fn(usize) -> Vec<u64> + Sync + Send,
{
    if work >= MIN_PARALLEL_WORK {
        (0..batch).into_par_iter().map(f).collect()
    } else {
        (0..batch).map(f).collect()
    }
}

/// Checks that a (C_out, C_in, K_h, K_w) weight fits a (N, C_in, H, W) activation under `geometry`.
pub fn check_conv_shapes(
    weight_dim: (usize, usize, usize, usize),
    activation_dim: (usize, usize, usize, usize),
    geometry: &Conv2dGeometry,
) -> Result<(), WsError> {
    let (_, w_channels, kh, kw) = weight_dim;
    let (_, channels, _, _) = activation_dim;
    let kernel = geometry.kernel_size();
    if w_channels != channels {
        return Err(WsError::ShapeError(format!(
            "weight expects {} input channels, activation has {}",
            w_channels, channels
        )));
    }
    if (kh, kw) != (kernel.h, kernel.w) {
        return Err(WsError::ShapeError(format!(
            "weight kernel {}x{} does not match geometry kernel {}x{}",
            kh, kw, kernel.h, kernel.w
        )));
    }
    Ok(())
}

/// Counts the weight/spike interactions from materialized patches.
///
/// `patches` must have shape (N, C_in * K_h * K_w, L), as produced by [`crate::patches::extract`].
///
/// # Examples
///
/// ```rust
/// use ndarray::Array4;
/// use rusty_ws::counter::count;
/// use rusty_ws::geometry::Conv2dGeometry;
/// use rusty_ws::patches::extract;
///
/// let activation = Array4::<f32>::ones((1, 1, 4, 4));
/// let weight = Array4::from_shape_vec((1, 1, 2, 2), vec![1.0, -1.0, 0.0, 1.0]).unwrap();
/// let geometry = Conv2dGeometry::new(2, 0, 1).unwrap();
///
/// let patches = extract(activation.view(), &geometry).unwrap();
/// let counts = count(weight.view(), patches.view()).unwrap();
/// assert_eq!(counts.pos[[0, 0]], 18);
/// assert_eq!(counts.neg[[0, 0]], 9);
/// ```
pub fn count(
    weight: ArrayView4<'_, f32>,
    patches: ArrayView3<'_, f32>,
) -> Result<InteractionCounts, WsError> {
    let flat_weight = flatten_weight(weight)?;
    let (batch, window, positions) = patches.dim();
    if flat_weight.ncols() != window {
        return Err(WsError::ShapeError(format!(
            "flattened weight width {} does not match patch rows {}",
            flat_weight.ncols(),
            window
        )));
    }

    let masks = SignMasks::new(flat_weight.view());
    let work = batch.saturating_mul(window).saturating_mul(positions);
    let nonzero = per_batch(batch, work, |n| {
        patches
            .index_axis(Axis(0), n)
            .axis_iter(Axis(0))
            .map(|row| row.iter().filter(|&&x| x != 0.0).count() as u64)
            .collect()
    });
    Ok(masks.contract(&nonzero))
}

/// Counts the weight/spike interactions directly from the activation, without materializing patches.
///
/// The totals are identical to `count(weight, extract(activation, geometry))`.
pub fn count_conv(
    weight: ArrayView4<'_, f32>,
    activation: ArrayView4<'_, f32>,
    geometry: &Conv2dGeometry,
) -> Result<InteractionCounts, WsError> {
    check_conv_shapes(weight.dim(), activation.dim(), geometry)?;
    let (_, _, kh, kw) = weight.dim();
    let (batch, channels, h, w) = activation.dim();
    let (out_h, out_w) = geometry.output_hw(h, w)?;
    let padding = geometry.padding();
    let stride = geometry.stride();

    // Input rows (resp. columns) read by each kernel row (resp. column) over the output grid.
    let rows: Vec<Vec<usize>> = (0..kh)
        .map(|i| {
            (0..out_h)
                .filter_map(|oh| input_index(oh, i, stride.h, padding.h, h))
                .collect()
        })
        .collect();
    let cols: Vec<Vec<usize>> = (0..kw)
        .map(|j| {
            (0..out_w)
                .filter_map(|ow| input_index(ow, j, stride.w, padding.w, w))
                .collect()
        })
        .collect();

    let masks = SignMasks::new(flatten_weight(weight)?.view());
    let window = geometry.window_len(channels);
    let work = batch
        .saturating_mul(window)
        .saturating_mul(out_h)
        .saturating_mul(out_w);
    let nonzero = per_batch(batch, work, |n| {
        let mut nz = Vec::with_capacity(window);
        let sample = activation.index_axis(Axis(0), n);
        for plane in sample.axis_iter(Axis(0)) {
            // Nonzero inputs of each row under each kernel column, shared by all kernel rows.
            let row_tallies: Vec<Vec<u64>> = plane
                .axis_iter(Axis(0))
                .map(|line| {
                    cols.iter()
                        .map(|xs| xs.iter().filter(|&&x| line[x] != 0.0).count() as u64)
                        .collect()
                })
                .collect();
            for i in 0..kh {
                for j in 0..kw {
                    nz.push(rows[i].iter().map(|&y| row_tallies[y][j]).sum::<u64>());
                }
            }
        }
        nz
    });
    Ok(masks.contract(&nonzero))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patches::extract;
    use ndarray::Array4;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const SEED: u64 = 42;

    fn scenario_weight() -> Array4<f32> {
        Array4::from_shape_vec(
            (2, 1, 2, 2),
            vec![1.0, -1.0, 0.0, 1.0, -1.0, 0.0, 1.0, -1.0],
        )
        .unwrap()
    }

    fn rand_spikes<R: Rng>(dim: (usize, usize, usize, usize), rate: f64, rng: &mut R) -> Array4<f32> {
        Array4::from_shape_simple_fn(dim, || if rng.gen_bool(rate) { 1.0 } else { 0.0 })
    }

    fn rand_ternary<R: Rng>(dim: (usize, usize, usize, usize), rng: &mut R) -> Array4<f32> {
        Array4::from_shape_simple_fn(dim, || rng.gen_range(-1..=1) as f32)
    }

    #[test]
    fn test_weight_sign() {
        assert_eq!(WeightSign::of(1.0), WeightSign::Positive);
        assert_eq!(WeightSign::of(-1.0), WeightSign::Negative);
        assert_eq!(WeightSign::of(0.0), WeightSign::Zero);
        assert_eq!(WeightSign::of(-0.0), WeightSign::Zero);
        assert_eq!(WeightSign::of(0.5), WeightSign::Other);
        assert_eq!(WeightSign::of(2.0), WeightSign::Other);
        assert_eq!(WeightSign::of(f32::NAN), WeightSign::Other);
    }

    #[test]
    fn test_count_all_ones_scenario() {
        let activation = Array4::<f32>::ones((1, 1, 4, 4));
        let weight = scenario_weight();
        let geometry = Conv2dGeometry::new(2, 0, 1).unwrap();

        let patches = extract(activation.view(), &geometry).unwrap();
        let counts = count(weight.view(), patches.view()).unwrap();

        assert_eq!(counts.pos.to_owned().into_raw_vec(), vec![18, 9]);
        assert_eq!(counts.neg.to_owned().into_raw_vec(), vec![9, 18]);
        assert_eq!(counts.other_total(), 0);

        let fused = count_conv(weight.view(), activation.view(), &geometry).unwrap();
        assert_eq!(fused, counts);
    }

    #[test]
    fn test_count_single_spike_scenario() {
        // A single interior spike is covered by exactly 4 windows of a 2x2 kernel, once under
        // each of the 4 kernel taps.
        let mut activation = Array4::<f32>::zeros((1, 1, 4, 4));
        activation[[0, 0, 1, 2]] = 3.5;
        let geometry = Conv2dGeometry::new(2, 0, 1).unwrap();

        let all_positive = Array4::<f32>::ones((1, 1, 2, 2));
        let counts = count_conv(all_positive.view(), activation.view(), &geometry).unwrap();
        assert_eq!(counts.pos_total(), 4);

        let weight = scenario_weight();
        let counts = count_conv(weight.view(), activation.view(), &geometry).unwrap();
        assert_eq!(counts.pos.to_owned().into_raw_vec(), vec![2, 1]);
        assert_eq!(counts.neg.to_owned().into_raw_vec(), vec![1, 2]);

        // Only the sign of a weight matters, not the magnitude of the spike.
        activation[[0, 0, 1, 2]] = 0.01;
        assert_eq!(
            count_conv(weight.view(), activation.view(), &geometry).unwrap(),
            counts
        );
    }

    #[test]
    fn test_count_shape_mismatch() {
        let activation = Array4::<f32>::ones((1, 2, 4, 4));
        let geometry = Conv2dGeometry::new(2, 0, 1).unwrap();
        let patches = extract(activation.view(), &geometry).unwrap();
        let weight = scenario_weight();

        assert_eq!(
            count(weight.view(), patches.view()),
            Err(WsError::ShapeError(
                "flattened weight width 4 does not match patch rows 8".to_string()
            ))
        );
        assert_eq!(
            count_conv(weight.view(), activation.view(), &geometry),
            Err(WsError::ShapeError(
                "weight expects 1 input channels, activation has 2".to_string()
            ))
        );

        let geometry = Conv2dGeometry::new(3, 0, 1).unwrap();
        let activation = Array4::<f32>::ones((1, 1, 4, 4));
        assert_eq!(
            count_conv(weight.view(), activation.view(), &geometry),
            Err(WsError::ShapeError(
                "weight kernel 2x2 does not match geometry kernel 3x3".to_string()
            ))
        );
    }

    #[test]
    fn test_non_ternary_weights_are_excluded() {
        let activation = Array4::<f32>::ones((1, 1, 2, 2));
        let weight = Array4::from_shape_vec((1, 1, 2, 2), vec![1.0, 2.0, -0.5, -1.0]).unwrap();
        let geometry = Conv2dGeometry::new(2, 0, 1).unwrap();

        let counts = count_conv(weight.view(), activation.view(), &geometry).unwrap();
        assert_eq!(counts.pos_total(), 1);
        assert_eq!(counts.neg_total(), 1);
        assert_eq!(counts.other_total(), 2);
    }

    #[test]
    fn test_count_zero_input() {
        let mut rng = StdRng::seed_from_u64(SEED);
        let activation = Array4::<f32>::zeros((3, 4, 8, 8));
        let weight = rand_ternary((5, 4, 3, 3), &mut rng);
        let geometry = Conv2dGeometry::new(3, 1, 1).unwrap();

        let counts = count_conv(weight.view(), activation.view(), &geometry).unwrap();
        assert_eq!(counts.pos_total(), 0);
        assert_eq!(counts.neg_total(), 0);
        assert_eq!((counts.batch_size(), counts.out_channels()), (3, 5));
    }

    #[test]
    fn test_count_bounds_and_disjointness() {
        let mut rng = StdRng::seed_from_u64(SEED);

        for _ in 0..20 {
            let (batch, in_channels, out_channels): (usize, usize, usize) =
                (rng.gen_range(1..4), rng.gen_range(1..4), rng.gen_range(1..5));
            let (h, w): (usize, usize) = (rng.gen_range(3..10), rng.gen_range(3..10));
            let kernel: (usize, usize) = (rng.gen_range(1..4), rng.gen_range(1..4));
            let geometry =
                Conv2dGeometry::new(kernel, rng.gen_range(0..2_usize), rng.gen_range(1..3_usize)).unwrap();

            let activation = rand_spikes((batch, in_channels, h, w), 0.3, &mut rng);
            let weight = rand_ternary((out_channels, in_channels, kernel.0, kernel.1), &mut rng);
            let counts = count_conv(weight.view(), activation.view(), &geometry).unwrap();
            let bound = (geometry.window_len(in_channels) * geometry.output_len(h, w).unwrap()) as u64;

            for n in 0..batch {
                for c in 0..out_channels {
                    let pos = counts.pos[[n, c]];
                    let neg = counts.neg[[n, c]];
                    assert!(pos <= bound);
                    assert!(neg <= bound);
                    assert!(pos + neg <= bound);
                }
            }
        }
    }

    #[test]
    fn test_count_matches_naive_broadcast() {
        let mut rng = StdRng::seed_from_u64(SEED);
        let activation = rand_spikes((2, 3, 7, 6), 0.25, &mut rng);
        let weight = rand_ternary((4, 3, 3, 2), &mut rng);
        let geometry = Conv2dGeometry::new((3, 2), (1, 0), (2, 1)).unwrap();

        let patches = extract(activation.view(), &geometry).unwrap();
        let counts = count(weight.view(), patches.view()).unwrap();
        let flat = flatten_weight(weight.view()).unwrap();

        let (batch, window, positions) = patches.dim();
        for n in 0..batch {
            for c in 0..flat.nrows() {
                let (mut pos, mut neg) = (0, 0);
                for k in 0..window {
                    for l in 0..positions {
                        if patches[[n, k, l]] != 0.0 {
                            pos += (flat[[c, k]] == 1.0) as u64;
                            neg += (flat[[c, k]] == -1.0) as u64;
                        }
                    }
                }
                assert_eq!(counts.pos[[n, c]], pos);
                assert_eq!(counts.neg[[n, c]], neg);
            }
        }
    }

    #[test]
    fn test_fused_matches_materialized() {
        let mut rng = StdRng::seed_from_u64(SEED);

        // The second case is large enough to go through the parallel path.
        for (dim, out_channels) in [((2, 3, 9, 9), 4), ((8, 16, 16, 16), 8)] {
            let activation = rand_spikes(dim, 0.2, &mut rng);
            let weight = rand_ternary((out_channels, dim.1, 3, 3), &mut rng);
            let geometry = Conv2dGeometry::new(3, 1, 1).unwrap();

            let patches = extract(activation.view(), &geometry).unwrap();
            assert_eq!(
                count(weight.view(), patches.view()).unwrap(),
                count_conv(weight.view(), activation.view(), &geometry).unwrap()
            );
        }
    }

    #[test]
    fn test_fused_matches_materialized_over_geometries() {
        let mut rng = StdRng::seed_from_u64(SEED);

        for _ in 0..40 {
            let kernel: (usize, usize) = (rng.gen_range(1..4), rng.gen_range(1..4));
            let padding: (usize, usize) = (rng.gen_range(0..3), rng.gen_range(0..3));
            let stride: (usize, usize) = (rng.gen_range(1..4), rng.gen_range(1..4));
            let geometry = Conv2dGeometry::new(kernel, padding, stride).unwrap();
            let channels: usize = rng.gen_range(1..4);

            let dim = (2, channels, rng.gen_range(3..10), rng.gen_range(3..10));
            let activation = rand_spikes(dim, 0.3, &mut rng);
            let weight = rand_ternary((3, channels, kernel.0, kernel.1), &mut rng);

            let patches = extract(activation.view(), &geometry).unwrap();
            assert_eq!(
                count(weight.view(), patches.view()).unwrap(),
                count_conv(weight.view(), activation.view(), &geometry).unwrap()
            );
        }
    }

    #[test]
    fn test_check_conv_shapes() {
        let geometry = Conv2dGeometry::new(2, 0, 1).unwrap();
        assert_eq!(check_conv_shapes((2, 3, 2, 2), (1, 3, 4, 4), &geometry), Ok(()));
        assert_eq!(
            check_conv_shapes((2, 1, 1, 4), (1, 1, 4, 4), &geometry),
            Err(WsError::ShapeError(
                "weight kernel 1x4 does not match geometry kernel 2x2".to_string()
            ))
        );
        assert_eq!(
            check_conv_shapes((2, 2, 2, 2), (1, 3, 4, 4), &geometry),
            Err(WsError::ShapeError(
                "weight expects 2 input channels, activation has 3".to_string()
            ))
        );
    }

    #[test]
    fn test_per_batch_saturated_work() {
        let sequential = per_batch(3, 0, |n| vec![n as u64]);
        let parallel = per_batch(3, usize::MAX, |n| vec![n as u64]);
        assert_eq!(sequential, parallel);
        assert_eq!(parallel, vec![vec![0], vec![1], vec![2]]);
    }
}
