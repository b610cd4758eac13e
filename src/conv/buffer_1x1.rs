use super::{
    check_operation_def, dst_shape,
    kernel::{ConvKernel, KernelSpec},
    launch::LaunchPlan,
    pack::PackedWeights,
    Convolution2DAttributes, FullyConnectedAttributes,
};
use crate::{
    device::DeviceInfo,
    error::{Error, PreconditionViolation, Result},
    operation::{CalculationsPrecision, DataType, OperationDef},
    tensor::{Bhwc, Tensor, TensorBuffer},
};
use krnl::device::Device;
use num_traits::ToPrimitive;
use std::{
    fmt::{self, Debug},
    sync::{
        atomic::{AtomicBool, Ordering},
        OnceLock,
    },
};

/// The state of a [`ConvBuffer1x1`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, derive_more::IsVariant)]
pub enum OperationState {
    /// Created, not yet executed.
    Constructed,
    /// Executed at least once.
    Ready,
}

/// The weights and kernel on the device the operation executes on.
struct Prepared {
    device: Device,
    weights: TensorBuffer,
    kernel: ConvKernel,
}

/// A 1x1 convolution over linear buffers.
///
/// The weights and bias are packed once, see [`pack`](super::pack), and the kernel is
/// specialized for the precision, the channel counts and the [`LaunchPlan`]. On the first
/// execution the packed weights are copied to the device of the source tensor and the
/// kernel is built, subsequent executions on that device reuse both.
///
/// The operation can be shared between threads, each execution writes its own destination.
pub struct ConvBuffer1x1 {
    precision: CalculationsPrecision,
    data_type: DataType,
    src_shape: Bhwc,
    dst_shape: Bhwc,
    host: bool,
    device_name: String,
    packed: PackedWeights,
    spec: KernelSpec,
    prepared: OnceLock<Prepared>,
    ready: AtomicBool,
}

impl ConvBuffer1x1 {
    /// Creates the operation for sources with shape `input_shape`.
    ///
    /// **Errors**
    ///
    /// Checked in order, each failure names the field:
    /// - The tensors of `op_def` are not a single channel fastest buffer of the data type of
    ///   the precision. [`Layout::Hwc`](crate::operation::Layout::Hwc) requires a batch
    ///   of 1.
    /// - The device does not support the precision.
    /// - Strides or dilations are not 1x1, there is padding, or the weights are not 1x1.
    /// - Input or output channels are 0.
    /// - The weights or bias do not have the length of their shapes.
    /// - `input_shape` does not have the input channels of the weights.
    /// - The tensors are too large to index with 32 bit integers, or need more work groups
    ///   than the device can dispatch.
    /// - The input shape has no pixels.
    pub fn new(
        info: &DeviceInfo,
        op_def: &OperationDef,
        attr: &Convolution2DAttributes,
        input_shape: Bhwc,
    ) -> Result<Self> {
        let precision = op_def.precision;
        check_operation_def(op_def, input_shape.b)?;
        if !info.supports(precision) {
            return Err(PreconditionViolation::Precision {
                precision,
                device: info.name().to_string(),
            }
            .into());
        }
        attr.check_1x1()?;
        if input_shape.c != attr.input_channels() {
            return Err(PreconditionViolation::InputChannels {
                expected: attr.input_channels(),
                found: input_shape.c,
            }
            .into());
        }
        if input_shape.len().to_u32().is_none() {
            return Err(PreconditionViolation::TooLarge(input_shape).into());
        }
        let dst_shape = dst_shape(input_shape, attr);
        let packed = PackedWeights::new(attr, info.vector_width())?;
        let plan = LaunchPlan::new(info, precision, dst_shape)?;
        let spec = KernelSpec::new(precision, &packed, plan);
        log::debug!(
            "ConvBuffer1x1 {input_shape} -> {dst_shape} {precision:?} on {}: {plan:?}",
            info.name()
        );
        Ok(Self {
            precision,
            data_type: DataType::deduce_from_precision(precision),
            src_shape: input_shape,
            dst_shape,
            host: info.is_host(),
            device_name: info.name().to_string(),
            packed,
            spec,
            prepared: OnceLock::new(),
            ready: AtomicBool::new(false),
        })
    }
    /// The shape of the source.
    pub fn src_shape(&self) -> Bhwc {
        self.src_shape
    }
    /// The shape of the destination.
    pub fn dst_shape(&self) -> Bhwc {
        self.dst_shape
    }
    /// The precision.
    pub fn precision(&self) -> CalculationsPrecision {
        self.precision
    }
    /// The data type of the source and destination.
    pub fn data_type(&self) -> DataType {
        self.data_type
    }
    /// The launch plan.
    pub fn launch_plan(&self) -> &LaunchPlan {
        &self.spec.plan
    }
    /// The packed weights and bias.
    pub fn packed_weights(&self) -> &PackedWeights {
        &self.packed
    }
    /// The state.
    pub fn state(&self) -> OperationState {
        if self.ready.load(Ordering::Acquire) {
            OperationState::Ready
        } else {
            OperationState::Constructed
        }
    }
    /// Executes the operation on the device of `src`.
    ///
    /// The destination is allocated on the same device. Returns once the dispatch is
    /// enqueued, use [`Pending::wait()`] to wait for the result.
    ///
    /// **Errors**
    /// - [`Error::ShapeMismatch`] or [`Error::DataTypeMismatch`] if `src` does not match the
    ///   operation, nothing is dispatched.
    /// - [`Error::DeviceExecution`] if the device fails.
    pub fn execute(&self, src: &Tensor) -> Result<Pending> {
        self.check_tensor(src, self.src_shape)?;
        // every element is written by the kernel
        let mut dst = unsafe { Tensor::uninit(src.device(), self.data_type, self.dst_shape)? };
        self.execute_into(src, &mut dst)?;
        Ok(Pending { tensor: dst })
    }
    /// Executes the operation, writing to `dst`.
    ///
    /// Like [`.execute()`](Self::execute), `dst` must have the destination shape and be on
    /// the device of `src`.
    ///
    /// **Errors**
    /// See [`.execute()`](Self::execute).
    pub fn execute_into(&self, src: &Tensor, dst: &mut Tensor) -> Result<()> {
        self.check_tensor(src, self.src_shape)?;
        self.check_tensor(dst, self.dst_shape)?;
        let device = src.device();
        if dst.device() != device {
            return Err(Error::DeviceMismatch {
                expected: format!("{device:?}"),
                found: format!("{:?}", dst.device()),
            });
        }
        let prepared = self.prepare(device)?;
        log::trace!(
            "ConvBuffer1x1 dispatch {} -> {} groups: {} threads: {}",
            self.src_shape,
            self.dst_shape,
            self.spec.plan.groups(),
            self.spec.plan.threads(),
        );
        prepared
            .kernel
            .dispatch(src.buffer(), &prepared.weights, dst.buffer_mut())?;
        self.ready.store(true, Ordering::Release);
        Ok(())
    }
    fn check_tensor(&self, tensor: &Tensor, shape: Bhwc) -> Result<()> {
        if tensor.shape() != shape {
            return Err(Error::ShapeMismatch {
                expected: shape,
                found: tensor.shape(),
            });
        }
        if tensor.data_type() != self.data_type {
            return Err(Error::DataTypeMismatch {
                expected: self.data_type,
                found: tensor.data_type(),
            });
        }
        Ok(())
    }
    fn prepare(&self, device: Device) -> Result<&Prepared> {
        let prepared = if let Some(prepared) = self.prepared.get() {
            prepared
        } else {
            if device.is_host() != self.host {
                return Err(Error::DeviceMismatch {
                    expected: self.device_name.clone(),
                    found: format!("{device:?}"),
                });
            }
            let weights =
                TensorBuffer::from_f32(device.clone(), self.data_type, self.packed.as_slice())?;
            let kernel = ConvKernel::build(device.clone(), &self.spec)?;
            log::debug!("ConvBuffer1x1 prepared on {device:?}");
            self.prepared.get_or_init(|| Prepared {
                device: device.clone(),
                weights,
                kernel,
            })
        };
        if prepared.device != device {
            return Err(Error::DeviceMismatch {
                expected: format!("{:?}", prepared.device),
                found: format!("{device:?}"),
            });
        }
        debug_assert_eq!(prepared.weights.device(), device);
        Ok(prepared)
    }
}

impl Debug for ConvBuffer1x1 {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ConvBuffer1x1")
            .field("precision", &self.precision)
            .field("src_shape", &self.src_shape)
            .field("dst_shape", &self.dst_shape)
            .field("launch_plan", &self.spec.plan)
            .field("state", &self.state())
            .finish()
    }
}

/// A destination tensor that may still be written by the device.
#[must_use]
#[derive(Debug)]
pub struct Pending {
    tensor: Tensor,
}

impl Pending {
    /// Waits for the device and returns the destination.
    ///
    /// **Errors**
    /// The device failed.
    pub fn wait(self) -> Result<Tensor> {
        self.tensor
            .device()
            .wait()
            .map_err(|e| Error::device(e.into()))?;
        Ok(self.tensor)
    }
}

/// Creates a [`ConvBuffer1x1`], see [`ConvBuffer1x1::new()`].
pub fn create_conv_buffer_1x1(
    info: &DeviceInfo,
    op_def: &OperationDef,
    attr: &Convolution2DAttributes,
    input_shape: Bhwc,
) -> Result<ConvBuffer1x1> {
    ConvBuffer1x1::new(info, op_def, attr, input_shape)
}

/// Creates a [`ConvBuffer1x1`] computing a dense layer.
///
/// Each pixel of the source is an input vector, typically with shape
/// `[batch, 1, 1, inputs]`.
///
/// **Errors**
/// See [`ConvBuffer1x1::new()`].
pub fn create_conv_buffer_1x1_fully_connected(
    info: &DeviceInfo,
    op_def: &OperationDef,
    attr: &FullyConnectedAttributes,
    input_shape: Bhwc,
) -> Result<ConvBuffer1x1> {
    let attr = Convolution2DAttributes::from(attr.clone());
    ConvBuffer1x1::new(info, op_def, &attr, input_shape)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        conv::Hw,
        operation::{Layout, TensorStorageType},
        tensor::{Ohwi, TensorFloat32},
    };

    fn attr() -> Convolution2DAttributes {
        Convolution2DAttributes::new(Ohwi::new(2, 1, 1, 4), vec![1.; 8], vec![0.; 2])
    }

    fn precondition(result: Result<ConvBuffer1x1>) -> PreconditionViolation {
        result.unwrap_err().precondition().unwrap().clone()
    }

    #[test]
    fn send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ConvBuffer1x1>();
    }

    #[test]
    fn validation_order() {
        let info = DeviceInfo::host();
        let mut op_def = OperationDef::buffer_hwc(CalculationsPrecision::F32);
        op_def.src_tensors[0].storage_type = TensorStorageType::ImageBuffer;
        let attr = attr().with_strides(Hw::new(2, 2));
        let shape = Bhwc::new(1, 2, 1, 3);
        assert_eq!(
            precondition(ConvBuffer1x1::new(&info, &op_def, &attr, shape)),
            PreconditionViolation::Storage(TensorStorageType::ImageBuffer)
        );
        let op_def = OperationDef::buffer_hwc(CalculationsPrecision::F32);
        assert_eq!(
            precondition(ConvBuffer1x1::new(&info, &op_def, &attr, shape)),
            PreconditionViolation::Stride(Hw::new(2, 2))
        );
        let attr = attr.with_strides(Hw::ones());
        assert_eq!(
            precondition(ConvBuffer1x1::new(&info, &op_def, &attr, shape)),
            PreconditionViolation::InputChannels {
                expected: 4,
                found: 3
            }
        );
    }

    #[test]
    fn unsupported_precision() {
        let info = DeviceInfo::simulated(256, 32, 4, false);
        let op_def = OperationDef::buffer_hwc(CalculationsPrecision::F16);
        assert!(matches!(
            precondition(ConvBuffer1x1::new(
                &info,
                &op_def,
                &attr(),
                Bhwc::new(1, 2, 1, 4)
            )),
            PreconditionViolation::Precision { .. }
        ));
    }

    #[test]
    fn data_type_must_match_precision() {
        let info = DeviceInfo::host();
        let mut op_def = OperationDef::buffer(CalculationsPrecision::F16, Layout::Bhwc);
        op_def.dst_tensors[0].data_type = DataType::F32;
        assert_eq!(
            precondition(ConvBuffer1x1::new(
                &info,
                &op_def,
                &attr(),
                Bhwc::new(2, 2, 1, 4)
            )),
            PreconditionViolation::DataType {
                precision: CalculationsPrecision::F16,
                found: DataType::F32
            }
        );
    }

    #[test]
    fn state_and_shape_mismatch() {
        let info = DeviceInfo::host();
        let op_def = OperationDef::buffer_hwc(CalculationsPrecision::F32);
        let op = ConvBuffer1x1::new(&info, &op_def, &attr(), Bhwc::new(1, 2, 1, 4)).unwrap();
        assert_eq!(op.dst_shape(), Bhwc::new(1, 2, 1, 2));
        assert!(op.state().is_constructed());
        let wrong = TensorFloat32::zeros(Bhwc::new(1, 1, 2, 4));
        let wrong = Tensor::from_float32(Device::host(), DataType::F32, &wrong).unwrap();
        assert!(matches!(
            op.execute(&wrong),
            Err(Error::ShapeMismatch { .. })
        ));
        assert!(op.state().is_constructed());
        let src = TensorFloat32::new(Bhwc::new(1, 2, 1, 4), (0..8).map(|x| x as f32).collect())
            .unwrap();
        let src = Tensor::from_float32(Device::host(), DataType::F32, &src).unwrap();
        let dst = op.execute(&src).unwrap().wait().unwrap();
        assert!(op.state().is_ready());
        assert_eq!(dst.to_float32().unwrap().data(), &[6., 6., 22., 22.]);
    }

    #[test]
    fn execute_into_checks_destination() {
        let info = DeviceInfo::host();
        let op_def = OperationDef::buffer_hwc(CalculationsPrecision::F16);
        let op = ConvBuffer1x1::new(&info, &op_def, &attr(), Bhwc::new(1, 2, 1, 4)).unwrap();
        let src = Tensor::zeros(Device::host(), DataType::F16, op.src_shape()).unwrap();
        let mut dst = Tensor::zeros(Device::host(), DataType::F32, op.dst_shape()).unwrap();
        assert!(matches!(
            op.execute_into(&src, &mut dst),
            Err(Error::DataTypeMismatch {
                expected: DataType::F16,
                found: DataType::F32
            })
        ));
        let mut dst = Tensor::zeros(Device::host(), DataType::F16, op.dst_shape()).unwrap();
        op.execute_into(&src, &mut dst).unwrap();
        assert_eq!(dst.to_float32().unwrap().data(), &[0.; 4]);
    }

    #[test]
    fn fully_connected() {
        let info = DeviceInfo::host();
        let op_def = OperationDef::buffer(CalculationsPrecision::F32, Layout::Bhwc);
        let attr = FullyConnectedAttributes::new(3, 2, vec![1., 2., 3., 4., 5., 6.], vec![1., 0., -1.]);
        let op =
            create_conv_buffer_1x1_fully_connected(&info, &op_def, &attr, Bhwc::new(2, 1, 1, 2))
                .unwrap();
        let src = TensorFloat32::new(Bhwc::new(2, 1, 1, 2), vec![1., 1., 0., 2.]).unwrap();
        let src = Tensor::from_float32(Device::host(), DataType::F32, &src).unwrap();
        let dst = op.execute(&src).unwrap().wait().unwrap();
        assert_eq!(dst.shape(), Bhwc::new(2, 1, 1, 3));
        assert_eq!(
            dst.to_float32().unwrap().data(),
            &[4., 7., 10., 5., 8., 11.]
        );
    }

    #[test]
    fn too_large() {
        let info = DeviceInfo::host();
        let op_def = OperationDef::buffer(CalculationsPrecision::F32, Layout::Bhwc);
        let attr = Convolution2DAttributes::new(Ohwi::new(2, 1, 1, 2), vec![1.; 4], vec![0.; 2]);
        let shape = Bhwc::new(1, 65536, 65536, 2);
        assert_eq!(
            precondition(ConvBuffer1x1::new(&info, &op_def, &attr, shape)),
            PreconditionViolation::TooLarge(shape)
        );
        let info = DeviceInfo::simulated(256, 32, 1, true).with_max_groups(2);
        let shape = Bhwc::new(1, 64, 64, 2);
        assert!(matches!(
            precondition(ConvBuffer1x1::new(&info, &op_def, &attr, shape)),
            PreconditionViolation::TooLarge(_)
        ));
    }

    #[test]
    fn empty_input() {
        let info = DeviceInfo::host();
        let op_def = OperationDef::buffer(CalculationsPrecision::F32, Layout::Bhwc);
        let shape = Bhwc::new(0, 2, 1, 4);
        assert_eq!(
            precondition(ConvBuffer1x1::new(&info, &op_def, &attr(), shape)),
            PreconditionViolation::Empty(shape.with_channels(2))
        );
    }

    #[test]
    fn packs_for_vector_width() {
        let op_def = OperationDef::buffer_hwc(CalculationsPrecision::F32);
        let attr = Convolution2DAttributes::new(
            Ohwi::new(5, 1, 1, 2),
            (0..10).map(|x| x as f32).collect(),
            vec![1.; 5],
        );
        let shape = Bhwc::new(1, 2, 1, 2);
        let op = ConvBuffer1x1::new(&DeviceInfo::host(), &op_def, &attr, shape).unwrap();
        assert_eq!(op.packed_weights().vector_width(), 8);
        assert_eq!(op.packed_weights().groups(), 1);
        assert_eq!(op.launch_plan().channel_groups(), 1);
        let info = DeviceInfo::simulated(256, 32, 1, true);
        let op = ConvBuffer1x1::new(&info, &op_def, &attr, shape).unwrap();
        assert_eq!(op.packed_weights().vector_width(), 4);
        assert_eq!(op.packed_weights().groups(), 2);
        assert_eq!(op.packed_weights().as_slice()[..4], [1., 1., 1., 1.]);
        assert_eq!(op.launch_plan().channel_groups(), 2);
    }
}
