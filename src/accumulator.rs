//! Per-layer running totals of weight/spike interactions.
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use crate::counter::InteractionCounts;
use crate::error::WsError;

/// The running totals of a single layer.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct LayerStats {
    /// The layer identifier.
    pub layer: String,
    /// Cumulative number of `W == +1` and `x != 0` multiplications.
    pub pos_total: u64,
    /// Cumulative number of `W == -1` and `x != 0` multiplications.
    pub neg_total: u64,
}

/// A read-only copy of the accumulator state, with layers in first-observed order.
#[derive(Debug, PartialEq, Eq, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub layers: Vec<LayerStats>,
}

impl Snapshot {
    /// Returns the totals of the given layer, if it was observed.
    pub fn get(&self, layer_id: &str) -> Option<&LayerStats> {
        self.layers.iter().find(|stats| stats.layer == layer_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &LayerStats> {
        self.layers.iter()
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<(), WsError> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }

    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Snapshot, WsError> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        Ok(serde_json::from_reader(reader)?)
    }
}

/// Accumulates interaction counts per layer over a measurement run.
///
/// Only layers on the allow-list are tracked; observations of any other layer are dropped.
/// Totals are never decremented, and there is no way to reset them: a new run needs a new
/// accumulator.
///
/// # Examples
///
/// ```rust
/// use ndarray::Array2;
/// use rusty_ws::accumulator::Accumulator;
/// use rusty_ws::counter::InteractionCounts;
///
/// let mut accumulator = Accumulator::new(["ConvLif2"]);
/// let counts = InteractionCounts {
///     pos: Array2::from_elem((2, 3), 1),
///     neg: Array2::from_elem((2, 3), 2),
///     other: Array2::zeros((2, 3)),
/// };
///
/// assert!(accumulator.observe("ConvLif2", &counts));
/// assert!(!accumulator.observe("ConvLif1", &counts));
///
/// let stats = accumulator.get("ConvLif2").unwrap();
/// assert_eq!((stats.pos_total, stats.neg_total), (6, 12));
/// assert!(accumulator.get("ConvLif1").is_none());
/// ```
#[derive(Debug, Clone)]
pub struct Accumulator {
    allow_list: HashSet<String>,
    records: Vec<LayerStats>,
    // Position of each layer in `records`.
    index: HashMap<String, usize>,
}

impl Accumulator {
    /// Create an empty accumulator monitoring the given layers.
    pub fn new<I, S>(allow_list: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Accumulator {
            allow_list: allow_list.into_iter().map(Into::into).collect(),
            records: vec![],
            index: HashMap::new(),
        }
    }

    /// Returns whether observations of the given layer are recorded.
    pub fn is_monitored(&self, layer_id: &str) -> bool {
        self.allow_list.contains(layer_id)
    }

    /// Adds the summed counts of an invocation to the totals of the given layer.
    /// Returns `false` (and records nothing) if the layer is not monitored.
    pub fn observe(&mut self, layer_id: &str, counts: &InteractionCounts) -> bool {
        self.add(layer_id, counts.pos_total(), counts.neg_total())
    }

    /// Adds raw totals to the given layer; same filtering as [`Accumulator::observe`].
    pub fn add(&mut self, layer_id: &str, pos: u64, neg: u64) -> bool {
        if !self.is_monitored(layer_id) {
            return false;
        }

        let position = match self.index.get(layer_id) {
            Some(&position) => position,
            None => {
                self.records.push(LayerStats {
                    layer: layer_id.to_string(),
                    pos_total: 0,
                    neg_total: 0,
                });
                self.index.insert(layer_id.to_string(), self.records.len() - 1);
                self.records.len() - 1
            }
        };

        let stats = &mut self.records[position];
        stats.pos_total = stats.pos_total.saturating_add(pos);
        stats.neg_total = stats.neg_total.saturating_add(neg);
        true
    }

    /// Returns the totals of the given layer, if it was observed.
    pub fn get(&self, layer_id: &str) -> Option<&LayerStats> {
        self.index.get(layer_id).map(|&position| &self.records[position])
    }

    /// Returns a copy of the current totals.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            layers: self.records.clone(),
        }
    }
}
