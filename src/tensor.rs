//! Rank-4 tensors tagged with the device they live on.
use ndarray::{Array4, ArrayView4, Ix4};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::WsError;

/// The memory space a tensor lives in.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    #[default]
    Cpu,
    /// A CUDA device with its ordinal.
    Cuda(usize),
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda(ordinal) => write!(f, "cuda:{}", ordinal),
        }
    }
}

/// A rank-4 `f32` tensor together with its device.
///
/// Activations are laid out as (batch, channels, height, width) and
/// weights as (out_channels, in_channels, kernel_height, kernel_width).
#[derive(Debug, PartialEq, Clone)]
pub struct DeviceTensor {
    data: Array4<f32>,
    device: Device,
}

impl DeviceTensor {
    pub fn new(data: Array4<f32>, device: Device) -> Self {
        DeviceTensor { data, device }
    }

    /// Create a tensor on the CPU.
    pub fn cpu(data: Array4<f32>) -> Self {
        DeviceTensor::new(data, Device::Cpu)
    }

    pub fn view(&self) -> ArrayView4<'_, f32> {
        self.data.view()
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn dim(&self) -> (usize, usize, usize, usize) {
        self.data.dim()
    }

    pub fn into_data(self) -> Array4<f32> {
        self.data
    }

    /// Returns an error unless both tensors live on the same device.
    pub fn check_colocated(&self, other: &DeviceTensor) -> Result<(), WsError> {
        if self.device != other.device {
            return Err(WsError::PrecisionOrLocation(format!(
                "tensors live on different devices: {} and {}",
                self.device, other.device
            )));
        }
        Ok(())
    }
}

/// The on-disk form of a tensor: a shape, a flat row-major buffer and a device tag.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct TensorRecord {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
    #[serde(default)]
    pub device: Device,
}

impl TryFrom<TensorRecord> for DeviceTensor {
    type Error = WsError;

    fn try_from(record: TensorRecord) -> Result<Self, Self::Error> {
        if record.shape.len() != 4 {
            return Err(WsError::ShapeError(format!(
                "expected a rank-4 tensor, got shape {:?}",
                record.shape
            )));
        }
        let expected: usize = record.shape.iter().product();
        if expected != record.data.len() {
            return Err(WsError::ShapeError(format!(
                "shape {:?} holds {} elements, got {}",
                record.shape,
                expected,
                record.data.len()
            )));
        }
        let data = Array4::from_shape_vec(
            Ix4(record.shape[0], record.shape[1], record.shape[2], record.shape[3]),
            record.data,
        )
        .map_err(|e| WsError::ShapeError(e.to_string()))?;
        Ok(DeviceTensor::new(data, record.device))
    }
}

impl From<&DeviceTensor> for TensorRecord {
    fn from(tensor: &DeviceTensor) -> Self {
        TensorRecord {
            shape: tensor.data.shape().to_vec(),
            data: tensor.data.iter().copied().collect(),
            device: tensor.device,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_conversion() {
        let record = TensorRecord {
            shape: vec![1, 1, 2, 2],
            data: vec![0.0, 1.0, 2.0, 3.0],
            device: Device::Cuda(1),
        };
        let tensor = DeviceTensor::try_from(record.clone()).unwrap();
        assert_eq!(tensor.dim(), (1, 1, 2, 2));
        assert_eq!(tensor.view()[[0, 0, 1, 0]], 2.0);
        assert_eq!(tensor.device(), Device::Cuda(1));
        assert_eq!(TensorRecord::from(&tensor), record);
    }

    #[test]
    fn test_record_invalid_shape() {
        let record = TensorRecord {
            shape: vec![2, 2],
            data: vec![0.0; 4],
            device: Device::Cpu,
        };
        assert!(matches!(
            DeviceTensor::try_from(record),
            Err(WsError::ShapeError(_))
        ));

        let record = TensorRecord {
            shape: vec![1, 1, 2, 2],
            data: vec![0.0; 3],
            device: Device::Cpu,
        };
        assert_eq!(
            DeviceTensor::try_from(record),
            Err(WsError::ShapeError(
                "shape [1, 1, 2, 2] holds 4 elements, got 3".to_string()
            ))
        );
    }

    #[test]
    fn test_colocation() {
        let a = DeviceTensor::cpu(Array4::zeros((1, 1, 1, 1)));
        let b = DeviceTensor::new(Array4::zeros((1, 1, 1, 1)), Device::Cuda(0));
        assert_eq!(a.check_colocated(&a.clone()), Ok(()));
        assert_eq!(
            a.check_colocated(&b),
            Err(WsError::PrecisionOrLocation(
                "tensors live on different devices: cpu and cuda:0".to_string()
            ))
        );
    }

    #[test]
    fn test_device_serde() {
        assert_eq!(serde_json::to_string(&Device::Cpu).unwrap(), "\"cpu\"");
        let device: Device = serde_json::from_str("{\"cuda\":2}").unwrap();
        assert_eq!(device, Device::Cuda(2));
    }
}
