/*!
# **pointwise**
Pointwise (1x1) convolution for [**krnl**](https://docs.rs/krnl) devices.

A 1x1 convolution with unit stride, unit dilation and no padding is a per pixel matrix
multiply across channels plus a bias. [`ConvBuffer1x1`](conv::ConvBuffer1x1) repacks the
weights and bias once, specializes a kernel for the precision and channel counts, plans the
dispatch from the [`DeviceInfo`](device::DeviceInfo), and can then be executed any number of
times on tensors of the shape it was built for.

The host ([`Device::host()`](krnl::device::Device::host)) is always available. Device kernels
require the "device" feature and are compiled with [krnlc](https://docs.rs/crate/krnlc).

# Example
```no_run
# fn main() -> pointwise::error::Result<()> {
use pointwise::{
    conv::{Convolution2DAttributes, ConvBuffer1x1},
    device::DeviceInfo,
    driver::execute_gpu_operation,
    krnl::device::Device,
    operation::{CalculationsPrecision, OperationDef},
    tensor::{Bhwc, Ohwi, TensorFloat32},
};

let device = Device::host();
let info = DeviceInfo::new(&device);
let src = TensorFloat32::new(Bhwc::new(1, 2, 1, 4), (0..8).map(|x| x as f32).collect())?;
let attr = Convolution2DAttributes::new(Ohwi::new(2, 1, 1, 4), vec![1.; 8], vec![0.; 2]);
let op_def = OperationDef::buffer_hwc(CalculationsPrecision::F32);
let op = ConvBuffer1x1::new(&info, &op_def, &attr, src.shape())?;
let dst = execute_gpu_operation(&src, &device, &op, Bhwc::new(1, 2, 1, 2))?;
assert_eq!(dst.data(), &[6., 6., 22., 22.]);
# Ok(())
# }
```
*/
#![warn(missing_docs)]
#![cfg_attr(doc_cfg, feature(doc_auto_cfg))]

pub extern crate krnl;

/// Convolution attributes and the 1x1 fast path.
pub mod conv;
/// Device capabilities.
pub mod device;
/// Upload, execute and download.
pub mod driver;
/// Errors.
pub mod error;
/// Operation definitions.
pub mod operation;
/// Shapes and tensors.
pub mod tensor;
