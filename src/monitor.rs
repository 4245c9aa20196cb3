//! Explicit, synchronous observation of monitored convolutional layers.
//!
//! The caller invokes [`Monitor::observe`] right after a layer computed its output, with the
//! layer input, a snapshot of its raw weights and its geometry. Nothing is registered on the
//! model and nothing has to be removed afterwards.
use crate::accumulator::{Accumulator, Snapshot};
use crate::config::{CountStrategy, MonitorConfig};
use crate::counter::{check_conv_shapes, count, count_conv, InteractionCounts};
use crate::error::WsError;
use crate::geometry::Conv2dGeometry;
use crate::patches::extract;
use crate::quant::{QuantParams, WeightMaterializer};
use crate::tensor::DeviceTensor;
use crate::trace::Trace;

/// Drives the counting of weight/spike interactions over a measurement run.
#[derive(Debug)]
pub struct Monitor<M: WeightMaterializer> {
    accumulator: Accumulator,
    materializer: M,
    strategy: CountStrategy,
}

impl<M: WeightMaterializer> Monitor<M> {
    pub fn new(accumulator: Accumulator, materializer: M, strategy: CountStrategy) -> Self {
        Monitor {
            accumulator,
            materializer,
            strategy,
        }
    }

    /// Create a monitor with a fresh accumulator for the configured layers.
    pub fn from_config(config: &MonitorConfig, materializer: M) -> Self {
        Monitor::new(
            Accumulator::new(config.layers.iter().cloned()),
            materializer,
            config.strategy,
        )
    }

    pub fn accumulator(&self) -> &Accumulator {
        &self.accumulator
    }

    pub fn into_accumulator(self) -> Accumulator {
        self.accumulator
    }

    pub fn snapshot(&self) -> Snapshot {
        self.accumulator.snapshot()
    }

    /// Counts the interactions of one forward pass through a layer and adds them to its totals.
    ///
    /// Returns `Ok(false)` without looking at the tensors if the layer is not monitored.
    /// On error, nothing is recorded for this invocation and earlier totals are left intact.
    pub fn observe(
        &mut self,
        layer_id: &str,
        activation: &DeviceTensor,
        raw_weight: &DeviceTensor,
        quant: &QuantParams,
        geometry: &Conv2dGeometry,
    ) -> Result<bool, WsError> {
        if !self.accumulator.is_monitored(layer_id) {
            log::trace!("Skipping unmonitored layer {}", layer_id);
            return Ok(false);
        }
        activation.check_colocated(raw_weight)?;
        check_conv_shapes(raw_weight.dim(), activation.dim(), geometry)?;

        let weight =
            self.materializer
                .dequantize(raw_weight.view(), quant.bit_width, quant.scale)?;
        let counts: InteractionCounts = match self.strategy {
            CountStrategy::Fused => count_conv(weight.view(), activation.view(), geometry)?,
            CountStrategy::Materialized => {
                let patches = extract(activation.view(), geometry)?;
                count(weight.view(), patches.view())?
            }
        };

        if counts.other_total() > 0 {
            log::warn!(
                "Layer {}: {} interactions involve non-ternary weights and are left out of both counts",
                layer_id,
                counts.other_total()
            );
        }
        log::debug!(
            "Layer {}: W=1 & S!=0 += {}, W=-1 & S!=0 += {}",
            layer_id,
            counts.pos_total(),
            counts.neg_total()
        );
        Ok(self.accumulator.observe(layer_id, &counts))
    }

    /// Replays a trace, invocation by invocation, and returns the number of recorded observations.
    /// The first failing invocation aborts the replay.
    pub fn replay(&mut self, trace: &Trace) -> Result<usize, WsError> {
        log::info!("Replaying {} invocations...", trace.len());
        let mut recorded = 0;
        for invocation in trace.invocations.iter() {
            if !self.accumulator.is_monitored(&invocation.layer) {
                continue;
            }
            let (activation, weight, geometry) = invocation.tensors()?;
            if self.observe(
                &invocation.layer,
                &activation,
                &weight,
                &invocation.quant,
                &geometry,
            )? {
                recorded += 1;
            }
        }
        log::info!("{} observations recorded", recorded);
        Ok(recorded)
    }
}
