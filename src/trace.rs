//! Recorded layer invocations, replayed through a [`crate::monitor::Monitor`].
//!
//! A trace is what the model-execution engine hands over at each forward pass of a
//! convolutional layer: its input activation, its raw weights, its quantization parameters
//! and its padding and stride. Traces are stored as JSON, or sampled at random.
use ndarray::Array4;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use crate::error::WsError;
use crate::geometry::{Conv2dGeometry, Pair};
use crate::quant::QuantParams;
use crate::tensor::{DeviceTensor, TensorRecord};

/// One forward pass through a convolutional layer.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Invocation {
    pub layer: String,
    /// The layer input, (N, C_in, H, W).
    pub activation: TensorRecord,
    /// The raw layer weights, (C_out, C_in, K_h, K_w).
    pub weight: TensorRecord,
    #[serde(default)]
    pub quant: QuantParams,
    pub padding: Pair,
    pub stride: Pair,
}

impl Invocation {
    /// Returns the activation, the raw weights and the convolution geometry of the invocation.
    /// The kernel size is read from the weight shape.
    pub fn tensors(&self) -> Result<(DeviceTensor, DeviceTensor, Conv2dGeometry), WsError> {
        let activation = DeviceTensor::try_from(self.activation.clone())?;
        let weight = DeviceTensor::try_from(self.weight.clone())?;
        let (_, _, kh, kw) = weight.dim();
        let geometry = Conv2dGeometry::new((kh, kw), self.padding, self.stride)?;
        Ok((activation, weight, geometry))
    }
}

/// A sequence of invocations, in execution order.
#[derive(Debug, PartialEq, Clone, Default, Serialize, Deserialize)]
pub struct Trace {
    pub invocations: Vec<Invocation>,
}

impl Trace {
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<(), WsError> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }

    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Trace, WsError> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn len(&self) -> usize {
        self.invocations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.invocations.is_empty()
    }

    /// Samples a random trace: Bernoulli spike inputs and normally distributed raw weights.
    pub fn rand<R: Rng>(spec: &SyntheticSpec, rng: &mut R) -> Result<Trace, WsError> {
        if !(0.0..=1.0).contains(&spec.firing_rate) {
            return Err(WsError::InvalidParameter(format!(
                "firing rate must be in [0, 1], got {}",
                spec.firing_rate
            )));
        }
        let normal = Normal::new(0.0_f32, spec.weight_std).map_err(|e| {
            WsError::InvalidParameter(format!("invalid weight distribution: {}", e))
        })?;

        let mut invocations = Vec::with_capacity(spec.layers.len() * spec.steps);
        for _ in 0..spec.steps {
            for layer in spec.layers.iter() {
                let activation = Array4::from_shape_simple_fn(
                    (spec.batch_size, layer.in_channels, layer.size, layer.size),
                    || if rng.gen_bool(spec.firing_rate) { 1.0 } else { 0.0 },
                );
                let weight = Array4::from_shape_simple_fn(
                    (layer.out_channels, layer.in_channels, layer.kernel, layer.kernel),
                    || normal.sample(rng),
                );
                invocations.push(Invocation {
                    layer: layer.name.clone(),
                    activation: TensorRecord::from(&DeviceTensor::cpu(activation)),
                    weight: TensorRecord::from(&DeviceTensor::cpu(weight)),
                    quant: spec.quant,
                    padding: Pair::from(layer.padding),
                    stride: Pair::from(layer.stride),
                });
            }
        }
        Ok(Trace { invocations })
    }
}

/// A convolutional layer of a synthetic network.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct SyntheticLayer {
    pub name: String,
    pub in_channels: usize,
    pub out_channels: usize,
    /// Spatial size of the (square) input.
    pub size: usize,
    pub kernel: usize,
    pub padding: usize,
    pub stride: usize,
}

impl SyntheticLayer {
    fn conv3x3(name: &str, in_channels: usize, out_channels: usize, size: usize) -> Self {
        SyntheticLayer {
            name: name.to_string(),
            in_channels,
            out_channels,
            size,
            kernel: 3,
            padding: 1,
            stride: 1,
        }
    }
}

/// Parameters of a synthetic trace.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct SyntheticSpec {
    pub layers: Vec<SyntheticLayer>,
    pub batch_size: usize,
    /// Number of forward passes through every layer.
    pub steps: usize,
    /// Probability for an input element to carry a spike.
    pub firing_rate: f64,
    /// Standard deviation of the raw weights.
    pub weight_std: f32,
    pub quant: QuantParams,
}

impl Default for SyntheticSpec {
    /// A scaled-down VGG-style stack of 3x3 convolutions on 32x32 inputs.
    fn default() -> Self {
        SyntheticSpec {
            layers: vec![
                SyntheticLayer::conv3x3("ConvLif1", 3, 16, 32),
                SyntheticLayer::conv3x3("ConvLif2", 16, 16, 32),
                SyntheticLayer::conv3x3("ConvLif3", 16, 32, 16),
                SyntheticLayer::conv3x3("ConvLif4", 32, 32, 16),
                SyntheticLayer::conv3x3("ConvLif5", 32, 64, 8),
                SyntheticLayer::conv3x3("ConvLif6", 64, 64, 8),
            ],
            batch_size: 2,
            steps: 1,
            firing_rate: 0.1,
            weight_std: 0.05,
            quant: QuantParams {
                bit_width: 2,
                scale: 0.05,
            },
        }
    }
}
