use crate::{
    conv::ConvBuffer1x1,
    error::{Error, Result},
    tensor::{Bhwc, Tensor, TensorFloat32},
};
use krnl::device::Device;

/// Executes `operation` on `device`.
///
/// Copies `src` to `device` with the data type of the operation, executes, waits for the
/// device and copies the result back to the host.
///
/// **Errors**
/// - [`Error::ShapeMismatch`] if `src` or `dst_shape` does not match the operation.
/// - [`Error::DeviceExecution`] if the device fails.
pub fn execute_gpu_operation(
    src: &TensorFloat32,
    device: &Device,
    operation: &ConvBuffer1x1,
    dst_shape: Bhwc,
) -> Result<TensorFloat32> {
    if dst_shape != operation.dst_shape() {
        return Err(Error::ShapeMismatch {
            expected: operation.dst_shape(),
            found: dst_shape,
        });
    }
    let src = Tensor::from_float32(device.clone(), operation.data_type(), src)?;
    let dst = operation.execute(&src)?.wait()?;
    dst.to_float32()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        conv::Convolution2DAttributes,
        device::DeviceInfo,
        operation::{CalculationsPrecision, OperationDef},
        tensor::Ohwi,
    };

    #[test]
    fn wrong_dst_shape() {
        let device = Device::host();
        let info = DeviceInfo::new(&device);
        let attr = Convolution2DAttributes::new(Ohwi::new(2, 1, 1, 4), vec![1.; 8], vec![0.; 2]);
        let op_def = OperationDef::buffer_hwc(CalculationsPrecision::F32);
        let op = ConvBuffer1x1::new(&info, &op_def, &attr, Bhwc::new(1, 2, 1, 4)).unwrap();
        let src = TensorFloat32::zeros(op.src_shape());
        let error = execute_gpu_operation(&src, &device, &op, Bhwc::new(1, 2, 1, 4)).unwrap_err();
        assert!(matches!(error, Error::ShapeMismatch { .. }));
        let dst = execute_gpu_operation(&src, &device, &op, op.dst_shape()).unwrap();
        assert_eq!(dst, TensorFloat32::zeros(op.dst_shape()));
    }
}
