use crate::{
    error::{Error, Result},
    operation::DataType,
};
use half::{f16, slice::HalfFloatSliceExt, vec::HalfFloatVecExt};
use krnl::{buffer::Buffer, device::Device};
use ndarray::{Array4, Ix4};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug, Display};

/// Shape of a tensor in channel fastest order.
#[derive(Default, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Bhwc {
    /// Batch.
    pub b: usize,
    /// Height.
    pub h: usize,
    /// Width.
    pub w: usize,
    /// Channels.
    pub c: usize,
}

impl Bhwc {
    /// Creates a new shape.
    pub const fn new(b: usize, h: usize, w: usize, c: usize) -> Self {
        Self { b, h, w, c }
    }
    /// The number of elements.
    pub const fn len(&self) -> usize {
        self.b * self.h * self.w * self.c
    }
    /// Whether the shape has no elements.
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// The number of pixels, `b * h * w`.
    pub const fn pixels(&self) -> usize {
        self.b * self.h * self.w
    }
    /// The same batch and spatial dimensions with `c` channels.
    pub const fn with_channels(self, c: usize) -> Self {
        Self { c, ..self }
    }
}

impl From<[usize; 4]> for Bhwc {
    fn from([b, h, w, c]: [usize; 4]) -> Self {
        Self::new(b, h, w, c)
    }
}

impl From<Bhwc> for Ix4 {
    fn from(shape: Bhwc) -> Self {
        ndarray::Dim([shape.b, shape.h, shape.w, shape.c])
    }
}

impl Display for Bhwc {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "BHWC({}, {}, {}, {})", self.b, self.h, self.w, self.c)
    }
}

/// Shape of convolution weights, output channels first and input channels last.
#[derive(Default, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Ohwi {
    /// Output channels.
    pub o: usize,
    /// Filter height.
    pub h: usize,
    /// Filter width.
    pub w: usize,
    /// Input channels.
    pub i: usize,
}

impl Ohwi {
    /// Creates a new shape.
    pub const fn new(o: usize, h: usize, w: usize, i: usize) -> Self {
        Self { o, h, w, i }
    }
    /// The number of elements.
    pub const fn len(&self) -> usize {
        self.o * self.h * self.w * self.i
    }
    /// Whether the shape has no elements.
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Display for Ohwi {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "OHWI({}, {}, {}, {})", self.o, self.h, self.w, self.i)
    }
}

/// A tensor of f32 on the host.
///
/// This is the logical representation of a tensor, regardless of how it is stored on a
/// device.
#[derive(Default, Clone, Debug, PartialEq)]
pub struct TensorFloat32 {
    shape: Bhwc,
    data: Vec<f32>,
}

impl TensorFloat32 {
    /// Creates a tensor from `data` in channel fastest order.
    ///
    /// **Errors**
    /// The data length is not `shape.len()`.
    pub fn new(shape: Bhwc, data: Vec<f32>) -> Result<Self> {
        if data.len() != shape.len() {
            return Err(Error::DataLength {
                shape,
                len: data.len(),
            });
        }
        Ok(Self { shape, data })
    }
    /// Creates a tensor filled with 0's.
    pub fn zeros(shape: Bhwc) -> Self {
        Self {
            shape,
            data: vec![0f32; shape.len()],
        }
    }
    /// The shape.
    pub fn shape(&self) -> Bhwc {
        self.shape
    }
    /// The data.
    pub fn data(&self) -> &[f32] {
        &self.data
    }
    /// The data, mutably.
    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }
    /// Moves the data into a vec.
    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }
    /// Moves into an array with dimensions `[b, h, w, c]`.
    pub fn into_array(self) -> Array4<f32> {
        Array4::from_shape_vec(Ix4::from(self.shape), self.data).unwrap()
    }
}

impl From<Array4<f32>> for TensorFloat32 {
    fn from(array: Array4<f32>) -> Self {
        let (b, h, w, c) = array.dim();
        let data = if array.is_standard_layout() {
            array.into_raw_vec()
        } else {
            array.iter().copied().collect()
        };
        Self {
            shape: Bhwc::new(b, h, w, c),
            data,
        }
    }
}

pub(crate) enum TensorBuffer {
    F32(Buffer<f32>),
    F16(Buffer<f16>),
}

impl TensorBuffer {
    /// Copies `data` to `device`, converting to `data_type`.
    pub(crate) fn from_f32(device: Device, data_type: DataType, data: &[f32]) -> Result<Self> {
        let buffer = match data_type {
            DataType::F32 => Self::F32(
                Buffer::from(data.to_vec())
                    .into_device(device)
                    .map_err(Error::device)?,
            ),
            DataType::F16 => Self::F16(
                Buffer::from(Vec::<f16>::from_f32_slice(data))
                    .into_device(device)
                    .map_err(Error::device)?,
            ),
        };
        Ok(buffer)
    }
    pub(crate) fn data_type(&self) -> DataType {
        match self {
            Self::F32(_) => DataType::F32,
            Self::F16(_) => DataType::F16,
        }
    }
    pub(crate) fn device(&self) -> Device {
        match self {
            Self::F32(buffer) => buffer.device(),
            Self::F16(buffer) => buffer.device(),
        }
    }
}

/// A tensor stored on a device.
///
/// The data is stored as [`DataType`] in channel fastest order.
pub struct Tensor {
    shape: Bhwc,
    buffer: TensorBuffer,
}

impl Tensor {
    /// Copies `tensor` to `device`, converting to `data_type`.
    ///
    /// **Errors**
    /// The buffer could not be allocated or copied to the device.
    pub fn from_float32(device: Device, data_type: DataType, tensor: &TensorFloat32) -> Result<Self> {
        Ok(Self {
            shape: tensor.shape(),
            buffer: TensorBuffer::from_f32(device, data_type, tensor.data())?,
        })
    }
    /// Creates a tensor on `device` filled with 0's.
    ///
    /// **Errors**
    /// The buffer could not be allocated.
    pub fn zeros(device: Device, data_type: DataType, shape: Bhwc) -> Result<Self> {
        let len = shape.len();
        let buffer = match data_type {
            DataType::F32 => {
                TensorBuffer::F32(Buffer::zeros(device, len).map_err(Error::device)?)
            }
            DataType::F16 => {
                TensorBuffer::F16(Buffer::zeros(device, len).map_err(Error::device)?)
            }
        };
        Ok(Self { shape, buffer })
    }
    /// Creates a tensor on `device` without initializing it.
    ///
    /// # Safety
    /// The tensor must be written before it is read.
    pub(crate) unsafe fn uninit(device: Device, data_type: DataType, shape: Bhwc) -> Result<Self> {
        let len = shape.len();
        let buffer = match data_type {
            DataType::F32 => {
                TensorBuffer::F32(Buffer::uninit(device, len).map_err(Error::device)?)
            }
            DataType::F16 => {
                TensorBuffer::F16(Buffer::uninit(device, len).map_err(Error::device)?)
            }
        };
        Ok(Self { shape, buffer })
    }
    /// The shape.
    pub fn shape(&self) -> Bhwc {
        self.shape
    }
    /// The data type.
    pub fn data_type(&self) -> DataType {
        self.buffer.data_type()
    }
    /// The device.
    pub fn device(&self) -> Device {
        self.buffer.device()
    }
    /// Copies the tensor to the host as f32.
    ///
    /// Blocks until the tensor is available, see [`Pending::wait()`](crate::conv::Pending::wait).
    ///
    /// **Errors**
    /// The data could not be copied from the device.
    pub fn to_float32(&self) -> Result<TensorFloat32> {
        let data = match &self.buffer {
            TensorBuffer::F32(buffer) => buffer
                .to_device(Device::host())
                .and_then(|buffer| buffer.into_vec())
                .map_err(Error::device)?,
            TensorBuffer::F16(buffer) => buffer
                .to_device(Device::host())
                .and_then(|buffer| buffer.into_vec())
                .map_err(Error::device)?
                .to_f32_vec(),
        };
        TensorFloat32::new(self.shape, data)
    }
    pub(crate) fn buffer(&self) -> &TensorBuffer {
        &self.buffer
    }
    pub(crate) fn buffer_mut(&mut self) -> &mut TensorBuffer {
        &mut self.buffer
    }
}

impl Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("device", &self.device())
            .field("shape", &self.shape)
            .field("data_type", &self.data_type())
            .finish()
    }
}
