//! This crate provides tools for counting weight/spike interactions in ternary-quantized spiking convolutions.
//!
//! For every monitored convolutional layer, it measures how many multiplications of the
//! convolution pair a weight of exactly +1 (resp. -1) with a nonzero input spike. Multiplying by
//! a zero weight or by a silent input is free on a ternary spiking accelerator, so these counts
//! approximate the operations such hardware actually performs.
//!
//! # Counting a Single Convolution
//!
//! ```rust
//! use ndarray::Array4;
//! use rusty_ws::counter::count_conv;
//! use rusty_ws::geometry::Conv2dGeometry;
//!
//! // A 4x4 input where every element spikes, and two 2x2 ternary kernels
//! let activation = Array4::<f32>::ones((1, 1, 4, 4));
//! let weight = Array4::from_shape_vec(
//!     (2, 1, 2, 2),
//!     vec![1.0, -1.0, 0.0, 1.0, -1.0, 0.0, 1.0, -1.0],
//! ).unwrap();
//! let geometry = Conv2dGeometry::new(2, 0, 1).unwrap();
//!
//! let counts = count_conv(weight.view(), activation.view(), &geometry).unwrap();
//! assert_eq!(counts.pos[[0, 0]], 18);
//! assert_eq!(counts.neg[[0, 1]], 18);
//! ```
//!
//! # Monitoring a Run
//!
//! ```rust
//! use ndarray::Array4;
//! use rusty_ws::config::MonitorConfig;
//! use rusty_ws::geometry::Conv2dGeometry;
//! use rusty_ws::monitor::Monitor;
//! use rusty_ws::quant::{QuantParams, UniformQuantizer};
//! use rusty_ws::tensor::DeviceTensor;
//!
//! // Monitor the default layers (ConvLif2 to ConvLif6)
//! let mut monitor = Monitor::from_config(&MonitorConfig::default(), UniformQuantizer);
//!
//! let activation = DeviceTensor::cpu(Array4::ones((1, 2, 5, 5)));
//! let weight = DeviceTensor::cpu(Array4::from_elem((4, 2, 3, 3), 0.2));
//! let quant = QuantParams { bit_width: 2, scale: 0.1 };
//! let geometry = Conv2dGeometry::new(3, 1, 1).unwrap();
//!
//! // Called right after each forward pass through a layer
//! assert!(monitor.observe("ConvLif2", &activation, &weight, &quant, &geometry).unwrap());
//! assert!(!monitor.observe("ConvLif1", &activation, &weight, &quant, &geometry).unwrap());
//!
//! let snapshot = monitor.snapshot();
//! assert_eq!(snapshot.len(), 1);
//! assert_eq!(snapshot.get("ConvLif2").unwrap().neg_total, 0);
//! ```

pub mod accumulator;
pub mod config;
pub mod counter;
pub mod error;
pub mod geometry;
pub mod monitor;
pub mod patches;
pub mod quant;
pub mod report;
pub mod tensor;
pub mod trace;
