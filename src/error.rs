use crate::{
    conv::{Hw, Padding2D},
    operation::{CalculationsPrecision, DataType, Layout, TensorStorageType},
    tensor::{Bhwc, Ohwi},
};
use thiserror::Error as ThisError;

/// Result type with [`Error`] as the default error.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors.
///
/// Preconditions are checked when an operation is created, shapes are checked when it is
/// executed, before anything is dispatched. Errors reported by the device are wrapped in
/// [`Error::DeviceExecution`].
#[derive(Debug, ThisError)]
pub enum Error {
    /// The operation can not be created with the given arguments.
    #[error("precondition violated: {0}")]
    Precondition(#[from] PreconditionViolation),
    /// The tensor shape does not match the shape the operation was created for.
    #[error("shape mismatch, expected {expected} found {found}")]
    ShapeMismatch {
        /// The expected shape.
        expected: Bhwc,
        /// The shape of the tensor.
        found: Bhwc,
    },
    /// The tensor data type does not match the operation definition.
    #[error("data type mismatch, expected {expected:?} found {found:?}")]
    DataTypeMismatch {
        /// The expected data type.
        expected: DataType,
        /// The data type of the tensor.
        found: DataType,
    },
    /// The tensor data does not have `shape.len()` elements.
    #[error("tensor {shape} requires {} elements, found {len}", shape.len())]
    DataLength {
        /// The shape of the tensor.
        shape: Bhwc,
        /// The length of the data.
        len: usize,
    },
    /// The tensor is not on the device the operation was prepared for.
    #[error("operation is prepared for {expected}, found {found}")]
    DeviceMismatch {
        /// The device of the operation.
        expected: String,
        /// The device of the tensor.
        found: String,
    },
    /// The device failed to allocate, build or execute.
    #[error("device execution failed: {0:#}")]
    DeviceExecution(#[source] anyhow::Error),
}

impl Error {
    /// The violated precondition, if any.
    pub fn precondition(&self) -> Option<&PreconditionViolation> {
        if let Self::Precondition(violation) = self {
            Some(violation)
        } else {
            None
        }
    }
    pub(crate) fn device(error: anyhow::Error) -> Self {
        Self::DeviceExecution(error)
    }
}

/// A violated precondition of [`ConvBuffer1x1`](crate::conv::ConvBuffer1x1).
///
/// Each variant names the field that does not describe a 1x1 convolution over a linear
/// buffer.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
#[non_exhaustive]
pub enum PreconditionViolation {
    /// Strides must be 1x1.
    #[error("strides must be 1x1, found {0}")]
    Stride(Hw),
    /// Dilations must be 1x1.
    #[error("dilations must be 1x1, found {0}")]
    Dilation(Hw),
    /// Padding must be 0.
    #[error("padding must be 0, found {0:?}")]
    Padding(Padding2D),
    /// The filter must be 1x1.
    #[error("weights must be 1x1, found {0}")]
    KernelSize(Ohwi),
    /// Channel counts must be positive.
    #[error("channels must be positive, found {input} input and {output} output channels")]
    Channels {
        /// Input channels.
        input: usize,
        /// Output channels.
        output: usize,
    },
    /// The input shape does not have the channels of the weights.
    #[error("input has {found} channels, weights expect {expected}")]
    InputChannels {
        /// Input channels of the weights.
        expected: usize,
        /// Channels of the input shape.
        found: usize,
    },
    /// The weights data does not match the weights shape.
    #[error("weights {shape} require {} elements, found {len}", shape.len())]
    WeightsLength {
        /// The weights shape.
        shape: Ohwi,
        /// The length of the data.
        len: usize,
    },
    /// The bias length does not equal the output channels.
    #[error("bias length must equal {expected} output channels, found {found}")]
    BiasLength {
        /// Output channels.
        expected: usize,
        /// The bias length.
        found: usize,
    },
    /// Only linear buffers are supported.
    #[error("storage type {0:?} is not supported, expected a buffer")]
    Storage(TensorStorageType),
    /// Tensors must be channel fastest.
    #[error("layout {0:?} is not supported")]
    Layout(Layout),
    /// [`Layout::Hwc`] has no batch dimension.
    #[error("layout {layout:?} requires a batch of 1, found {batch}")]
    BatchLayout {
        /// The layout.
        layout: Layout,
        /// The batch size of the input shape.
        batch: usize,
    },
    /// The tensor data type does not match the precision.
    #[error("data type {found:?} does not match {precision:?} precision")]
    DataType {
        /// The precision.
        precision: CalculationsPrecision,
        /// The data type of the tensor.
        found: DataType,
    },
    /// The operation must have exactly one source and one destination.
    #[error("expected 1 source and 1 destination tensor, found {src} and {dst}")]
    TensorCount {
        /// Source tensors.
        src: usize,
        /// Destination tensors.
        dst: usize,
    },
    /// The precision is not supported by the device.
    #[error("precision {precision:?} is not supported by {device}")]
    Precision {
        /// The precision.
        precision: CalculationsPrecision,
        /// The device name.
        device: String,
    },
    /// The shape is too large to index with 32 bit integers or to dispatch.
    #[error("{0} is too large")]
    TooLarge(Bhwc),
    /// The shape has no pixels.
    #[error("{0} has no pixels")]
    Empty(Bhwc),
}
