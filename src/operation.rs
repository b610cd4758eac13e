use derive_more::IsVariant;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Numeric precision of an operation.
///
/// Accumulation is always in f32.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, IsVariant)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum CalculationsPrecision {
    /// Tensors and weights are stored as f32.
    F32,
    /// Tensors and weights are stored as f16.
    F16,
}

impl CalculationsPrecision {
    /// The relative tolerance of results.
    ///
    /// A result `y` of a convolution with exact result `x` over the stored source, weights
    /// and bias satisfies `|y - x| <= tolerance * max(1, |x|)`. The bound is absolute for
    /// values below 1. Storing f32 data as f16 rounds it before the convolution.
    pub fn tolerance(&self) -> f32 {
        match self {
            Self::F32 => 1e-6,
            Self::F16 => 1e-3,
        }
    }
}

/// Storage data type of a tensor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, IsVariant)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum DataType {
    /// 32 bit float.
    F32,
    /// 16 bit float.
    F16,
}

impl DataType {
    /// The storage type for `precision`.
    pub fn deduce_from_precision(precision: CalculationsPrecision) -> Self {
        match precision {
            CalculationsPrecision::F32 => Self::F32,
            CalculationsPrecision::F16 => Self::F16,
        }
    }
}

/// How a tensor is stored on a device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, IsVariant)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TensorStorageType {
    /// A linear buffer.
    Buffer,
    /// A buffer accessed through an image view.
    ImageBuffer,
    /// A 2D texture.
    Texture2D,
}

/// Memory layout of a tensor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, IsVariant)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Layout {
    /// Height, width, channels, with an implicit batch of 1.
    Hwc,
    /// Batch, height, width, channels.
    Bhwc,
    /// Channels first.
    Chw,
}

impl Layout {
    /// Whether channels vary fastest.
    pub fn is_channel_fastest(&self) -> bool {
        matches!(self, Self::Hwc | Self::Bhwc)
    }
}

/// Describes how a tensor slot of an operation is stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TensorDescriptor {
    /// Data type.
    pub data_type: DataType,
    /// Storage type.
    pub storage_type: TensorStorageType,
    /// Layout.
    pub layout: Layout,
}

impl TensorDescriptor {
    /// Creates a new descriptor.
    pub fn new(data_type: DataType, storage_type: TensorStorageType, layout: Layout) -> Self {
        Self {
            data_type,
            storage_type,
            layout,
        }
    }
}

/// Definition of an operation.
///
/// Selects the precision and the storage of each source and destination tensor.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct OperationDef {
    /// Precision.
    pub precision: CalculationsPrecision,
    /// Source tensors.
    pub src_tensors: Vec<TensorDescriptor>,
    /// Destination tensors.
    pub dst_tensors: Vec<TensorDescriptor>,
}

impl OperationDef {
    /// A definition with one source and one destination stored as buffers with `layout`.
    ///
    /// The data type is deduced from the precision.
    pub fn buffer(precision: CalculationsPrecision, layout: Layout) -> Self {
        let descriptor = TensorDescriptor::new(
            DataType::deduce_from_precision(precision),
            TensorStorageType::Buffer,
            layout,
        );
        Self {
            precision,
            src_tensors: vec![descriptor],
            dst_tensors: vec![descriptor],
        }
    }
    /// Shorthand for [`.buffer(precision, Layout::Hwc)`](Self::buffer).
    pub fn buffer_hwc(precision: CalculationsPrecision) -> Self {
        Self::buffer(precision, Layout::Hwc)
    }
    /// The data type of the first source tensor.
    pub fn src_data_type(&self) -> Option<DataType> {
        self.src_tensors.first().map(|x| x.data_type)
    }
}
