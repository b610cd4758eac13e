use crate::{
    error::{PreconditionViolation, Result},
    operation::{DataType, Layout, OperationDef, TensorDescriptor},
    tensor::{Bhwc, Ohwi, TensorFloat32},
};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

mod buffer_1x1;
mod kernel;
pub mod launch;
pub mod pack;

pub use buffer_1x1::{
    create_conv_buffer_1x1, create_conv_buffer_1x1_fully_connected, ConvBuffer1x1,
    OperationState, Pending,
};

/// A pair of spatial values.
#[derive(Default, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Hw {
    /// Height.
    pub h: usize,
    /// Width.
    pub w: usize,
}

impl Hw {
    /// Creates a new pair.
    pub const fn new(h: usize, w: usize) -> Self {
        Self { h, w }
    }
    /// (1, 1).
    pub const fn ones() -> Self {
        Self::new(1, 1)
    }
    /// Whether both values are 1.
    pub const fn is_ones(&self) -> bool {
        self.h == 1 && self.w == 1
    }
    /// Whether both values are 0.
    pub const fn is_zero(&self) -> bool {
        self.h == 0 && self.w == 0
    }
}

impl Display for Hw {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "HW({}, {})", self.h, self.w)
    }
}

/// Spatial padding.
#[derive(Default, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Padding2D {
    /// Padding before the first row and column.
    pub prepended: Hw,
    /// Padding after the last row and column.
    pub appended: Hw,
}

impl Padding2D {
    /// Whether there is no padding.
    pub const fn is_zero(&self) -> bool {
        self.prepended.is_zero() && self.appended.is_zero()
    }
}

/// Attributes of a 2D convolution.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Convolution2DAttributes {
    /// Shape of the weights.
    pub weights_shape: Ohwi,
    /// Weights in OHWI order.
    pub weights: Vec<f32>,
    /// Bias, one per output channel.
    pub bias: Vec<f32>,
    /// Padding.
    pub padding: Padding2D,
    /// Strides.
    pub strides: Hw,
    /// Dilations.
    pub dilations: Hw,
}

impl Convolution2DAttributes {
    /// Creates attributes with unit strides and dilations and no padding.
    pub fn new(weights_shape: Ohwi, weights: Vec<f32>, bias: Vec<f32>) -> Self {
        Self {
            weights_shape,
            weights,
            bias,
            padding: Padding2D::default(),
            strides: Hw::ones(),
            dilations: Hw::ones(),
        }
    }
    /// With `padding`.
    pub fn with_padding(self, padding: Padding2D) -> Self {
        Self { padding, ..self }
    }
    /// With `strides`.
    pub fn with_strides(self, strides: Hw) -> Self {
        Self { strides, ..self }
    }
    /// With `dilations`.
    pub fn with_dilations(self, dilations: Hw) -> Self {
        Self { dilations, ..self }
    }
    /// Input channels.
    pub fn input_channels(&self) -> usize {
        self.weights_shape.i
    }
    /// Output channels.
    pub fn output_channels(&self) -> usize {
        self.weights_shape.o
    }
    /// Checks that the attributes describe a 1x1 convolution.
    ///
    /// Geometry is checked first, then channel counts, then data lengths.
    pub(crate) fn check_1x1(&self) -> Result<(), PreconditionViolation> {
        if !self.strides.is_ones() {
            return Err(PreconditionViolation::Stride(self.strides));
        }
        if !self.dilations.is_ones() {
            return Err(PreconditionViolation::Dilation(self.dilations));
        }
        if !self.padding.is_zero() {
            return Err(PreconditionViolation::Padding(self.padding));
        }
        let shape = self.weights_shape;
        if shape.h != 1 || shape.w != 1 {
            return Err(PreconditionViolation::KernelSize(shape));
        }
        if shape.i == 0 || shape.o == 0 {
            return Err(PreconditionViolation::Channels {
                input: shape.i,
                output: shape.o,
            });
        }
        if self.weights.len() != shape.len() {
            return Err(PreconditionViolation::WeightsLength {
                shape,
                len: self.weights.len(),
            });
        }
        if self.bias.len() != shape.o {
            return Err(PreconditionViolation::BiasLength {
                expected: shape.o,
                found: self.bias.len(),
            });
        }
        Ok(())
    }
}

/// Attributes of a dense layer.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FullyConnectedAttributes {
    /// Output features.
    pub outputs: usize,
    /// Input features.
    pub inputs: usize,
    /// Weights with shape `[outputs, inputs]`.
    pub weights: Vec<f32>,
    /// Bias, one per output.
    pub bias: Vec<f32>,
}

impl FullyConnectedAttributes {
    /// Creates new attributes.
    pub fn new(outputs: usize, inputs: usize, weights: Vec<f32>, bias: Vec<f32>) -> Self {
        Self {
            outputs,
            inputs,
            weights,
            bias,
        }
    }
}

impl From<FullyConnectedAttributes> for Convolution2DAttributes {
    fn from(attr: FullyConnectedAttributes) -> Self {
        Self::new(
            Ohwi::new(attr.outputs, 1, 1, attr.inputs),
            attr.weights,
            attr.bias,
        )
    }
}

fn check_descriptor(
    op_def: &OperationDef,
    descriptor: &TensorDescriptor,
    batch: usize,
) -> Result<(), PreconditionViolation> {
    if !descriptor.storage_type.is_buffer() {
        return Err(PreconditionViolation::Storage(descriptor.storage_type));
    }
    if !descriptor.layout.is_channel_fastest() {
        return Err(PreconditionViolation::Layout(descriptor.layout));
    }
    if descriptor.layout == Layout::Hwc && batch != 1 {
        return Err(PreconditionViolation::BatchLayout {
            layout: descriptor.layout,
            batch,
        });
    }
    if descriptor.data_type != DataType::deduce_from_precision(op_def.precision) {
        return Err(PreconditionViolation::DataType {
            precision: op_def.precision,
            found: descriptor.data_type,
        });
    }
    Ok(())
}

/// Checks the tensor descriptors of `op_def` for a source with `batch` images.
pub(crate) fn check_operation_def(
    op_def: &OperationDef,
    batch: usize,
) -> Result<(), PreconditionViolation> {
    if op_def.src_tensors.len() != 1 || op_def.dst_tensors.len() != 1 {
        return Err(PreconditionViolation::TensorCount {
            src: op_def.src_tensors.len(),
            dst: op_def.dst_tensors.len(),
        });
    }
    for descriptor in op_def.src_tensors.iter().chain(op_def.dst_tensors.iter()) {
        check_descriptor(op_def, descriptor, batch)?;
    }
    Ok(())
}

/// Whether a convolution with `op_def` and `attr` can use [`ConvBuffer1x1`].
///
/// The batch is not known here, so an [`Hwc`](Layout::Hwc) definition is accepted and
/// checked against the input shape on creation.
pub fn is_conv_buffer_1x1_supported(op_def: &OperationDef, attr: &Convolution2DAttributes) -> bool {
    check_operation_def(op_def, 1).is_ok() && attr.check_1x1().is_ok()
}

/// Computes a 1x1 convolution on the host.
///
/// `dst[b, h, w, o] = bias[o] + sum(src[b, h, w, i] * weights[o, 0, 0, i])`, summed in
/// order of increasing `i`.
///
/// **Errors**
/// - The attributes do not describe a 1x1 convolution.
/// - The source channels do not match the weights.
pub fn reference_conv_1x1(
    src: &TensorFloat32,
    attr: &Convolution2DAttributes,
) -> Result<TensorFloat32> {
    attr.check_1x1()?;
    let ic = attr.input_channels();
    let oc = attr.output_channels();
    let src_shape = src.shape();
    if src_shape.c != ic {
        return Err(PreconditionViolation::InputChannels {
            expected: ic,
            found: src_shape.c,
        }
        .into());
    }
    let mut dst = TensorFloat32::zeros(src_shape.with_channels(oc));
    for (x, y) in src
        .data()
        .chunks_exact(ic)
        .zip(dst.data_mut().chunks_exact_mut(oc))
    {
        for ((y, w), b) in y
            .iter_mut()
            .zip(attr.weights.chunks_exact(ic))
            .zip(attr.bias.iter())
        {
            *y = x.iter().zip(w).fold(*b, |acc, (x, w)| acc + x * w);
        }
    }
    Ok(dst)
}

/// The output shape of a 1x1 convolution with `attr` over `src_shape`.
pub(crate) fn dst_shape(src_shape: Bhwc, attr: &Convolution2DAttributes) -> Bhwc {
    src_shape.with_channels(attr.output_channels())
}
