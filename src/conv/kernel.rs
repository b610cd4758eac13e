use super::{launch::LaunchPlan, pack::PackedWeights};
use crate::{
    error::{Error, Result},
    operation::{CalculationsPrecision, DataType},
    tensor::TensorBuffer,
};
use anyhow::format_err;
use half::f16;
#[cfg(feature = "device")]
use krnl::macros::module;
use krnl::{device::Device, scalar::Scalar};
use rayon::prelude::*;
use wide::f32x8;

#[cfg(feature = "device")]
#[module]
mod kernels {
    #[cfg(target_arch = "spirv")]
    use crunchy::unroll;
    use dry::macro_for;
    #[cfg(not(target_arch = "spirv"))]
    use krnl::krnl_core;
    use krnl_core::macros::kernel;
    #[cfg(target_arch = "spirv")]
    use krnl_core::{buffer::UnsafeIndex, num_traits::Zero, scalar::Scalar};
    #[allow(unused_imports)]
    use krnl_core::half::f16;
    use paste::paste;

    // 4 lanes, accumulated in f32.
    macro_for!($T in [f32, f16] {
        paste! {
            #[kernel]
            pub unsafe fn [<conv_buffer_1x1_ $T>]<
                const PIXELS: u32,
                const IC: u32,
                const OC: u32,
                const BLOCK_X: u32,
                const BLOCK_Z: u32,
            >(
                #[global] src: Slice<$T>,
                #[global] weights: Slice<$T>,
                #[global] dst: UnsafeSlice<$T>,
            ) {
                type A = f32;

                let pixels = PIXELS as usize;
                let ic = IC as usize;
                let oc = OC as usize;
                let block_x = BLOCK_X as usize;
                let block_z = BLOCK_Z as usize;

                let groups = oc / 4 + (oc % 4 != 0) as usize;
                let groups_z = groups / block_z;
                let block_len = (ic + 1) * 4;

                let idx = kernel.global_id as usize;
                let pixel_block = idx / groups_z;
                let group_block = idx % groups_z;
                let pixel_start = pixel_block * block_x;
                if pixel_start >= pixels {
                    return;
                }

                for z in 0..block_z {
                    let group = group_block * block_z + z;
                    let w_start = group * block_len;
                    let mut bias = [A::zero(); 4];
                    unroll! { for v in 0 .. 4 {
                        bias[v] = weights[w_start + v].cast::<A>();
                    }}
                    let mut acc = [bias; 4];
                    for i in 0..ic {
                        let mut w = [A::zero(); 4];
                        unroll! { for v in 0 .. 4 {
                            w[v] = weights[w_start + (i + 1) * 4 + v].cast::<A>();
                        }}
                        unroll! { for x in 0 .. 4 {
                            let pixel = pixel_start + x;
                            if x < block_x && pixel < pixels {
                                let s = src[pixel * ic + i].cast::<A>();
                                unroll! { for v in 0 .. 4 {
                                    acc[x][v] += s * w[v];
                                }}
                            }
                        }}
                    }
                    unroll! { for x in 0 .. 4 {
                        let pixel = pixel_start + x;
                        if x < block_x && pixel < pixels {
                            unroll! { for v in 0 .. 4 {
                                let o = group * 4 + v;
                                if o < oc {
                                    unsafe {
                                        *dst.unsafe_index_mut(pixel * oc + o) = acc[x][v].cast::<$T>();
                                    }
                                }
                            }}
                        }
                    }}
                }
            }
        }
    });
}

/// Compile time parameters of a kernel.
///
/// Fixed when the operation is created.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct KernelSpec {
    pub(crate) data_type: DataType,
    pub(crate) ic: u32,
    pub(crate) oc: u32,
    pub(crate) vector_width: u32,
    pub(crate) plan: LaunchPlan,
}

impl KernelSpec {
    pub(crate) fn new(
        precision: CalculationsPrecision,
        packed: &PackedWeights,
        plan: LaunchPlan,
    ) -> Self {
        Self {
            data_type: DataType::deduce_from_precision(precision),
            ic: packed.input_channels() as u32,
            oc: packed.output_channels() as u32,
            vector_width: packed.vector_width() as u32,
            plan,
        }
    }
}

/// A kernel built for a device.
pub(crate) enum ConvKernel {
    Host(KernelSpec),
    #[cfg(feature = "device")]
    DeviceF32(kernels::conv_buffer_1x1_f32::Kernel),
    #[cfg(feature = "device")]
    DeviceF16(kernels::conv_buffer_1x1_f16::Kernel),
}

impl ConvKernel {
    pub(crate) fn build(device: Device, spec: &KernelSpec) -> Result<Self> {
        if device.is_host() {
            return Ok(Self::Host(*spec));
        }
        #[cfg(feature = "device")]
        {
            return Self::build_device(device, spec).map_err(Error::device);
        }
        #[cfg(not(feature = "device"))]
        {
            return Err(Error::device(format_err!(
                "{device:?} requires the \"device\" feature"
            )));
        }
    }
    #[cfg(feature = "device")]
    fn build_device(device: Device, spec: &KernelSpec) -> anyhow::Result<Self> {
        let KernelSpec {
            data_type,
            ic,
            oc,
            vector_width,
            plan,
        } = *spec;
        if vector_width != 4 {
            return Err(format_err!(
                "device kernels use 4 lanes, found {vector_width}"
            ));
        }
        let kernel = match data_type {
            DataType::F32 => Self::DeviceF32(
                kernels::conv_buffer_1x1_f32::builder()?
                    .with_threads(plan.threads())
                    .specialize(plan.pixels(), ic, oc, plan.block_x(), plan.block_z())
                    .build(device)?
                    .with_groups(plan.groups()),
            ),
            DataType::F16 => Self::DeviceF16(
                kernels::conv_buffer_1x1_f16::builder()?
                    .with_threads(plan.threads())
                    .specialize(plan.pixels(), ic, oc, plan.block_x(), plan.block_z())
                    .build(device)?
                    .with_groups(plan.groups()),
            ),
        };
        Ok(kernel)
    }
    /// Enqueues the kernel.
    ///
    /// On the host the kernel is executed before returning.
    pub(crate) fn dispatch(
        &self,
        src: &TensorBuffer,
        weights: &TensorBuffer,
        dst: &mut TensorBuffer,
    ) -> Result<()> {
        match self {
            Self::Host(spec) => match (src, weights, dst) {
                (TensorBuffer::F32(src), TensorBuffer::F32(weights), TensorBuffer::F32(dst)) => {
                    conv_buffer_1x1_host::<f32>(
                        spec,
                        host_slice(src.as_host_slice())?,
                        host_slice(weights.as_host_slice())?,
                        host_slice(dst.as_host_slice_mut())?,
                    );
                    Ok(())
                }
                (TensorBuffer::F16(src), TensorBuffer::F16(weights), TensorBuffer::F16(dst)) => {
                    conv_buffer_1x1_host::<f16>(
                        spec,
                        host_slice(src.as_host_slice())?,
                        host_slice(weights.as_host_slice())?,
                        host_slice(dst.as_host_slice_mut())?,
                    );
                    Ok(())
                }
                (src, _, dst) => Err(Error::DataTypeMismatch {
                    expected: src.data_type(),
                    found: dst.data_type(),
                }),
            },
            #[cfg(feature = "device")]
            Self::DeviceF32(kernel) => match (src, weights, dst) {
                (TensorBuffer::F32(src), TensorBuffer::F32(weights), TensorBuffer::F32(dst)) => {
                    unsafe {
                        kernel
                            .dispatch(src.as_slice(), weights.as_slice(), dst.as_slice_mut())
                            .map_err(Error::device)
                    }
                }
                (src, _, _) => Err(Error::DataTypeMismatch {
                    expected: DataType::F32,
                    found: src.data_type(),
                }),
            },
            #[cfg(feature = "device")]
            Self::DeviceF16(kernel) => match (src, weights, dst) {
                (TensorBuffer::F16(src), TensorBuffer::F16(weights), TensorBuffer::F16(dst)) => {
                    unsafe {
                        kernel
                            .dispatch(src.as_slice(), weights.as_slice(), dst.as_slice_mut())
                            .map_err(Error::device)
                    }
                }
                (src, _, _) => Err(Error::DataTypeMismatch {
                    expected: DataType::F16,
                    found: src.data_type(),
                }),
            },
        }
    }
}

fn host_slice<T>(slice: Option<T>) -> Result<T> {
    slice.ok_or_else(|| Error::device(format_err!("expected a host buffer")))
}

fn lanes<T: Scalar>(x: &[T]) -> f32x8 {
    let mut lanes = [0f32; 8];
    for (y, x) in lanes.iter_mut().zip(x) {
        *y = x.cast();
    }
    f32x8::from(lanes)
}

/// Computes blocks of `block_x` pixels in parallel, `block_z` groups at a time.
///
/// Accumulates in f32 in order of increasing input channel, starting from the bias.
fn conv_buffer_1x1_host<T: Scalar>(spec: &KernelSpec, src: &[T], weights: &[T], dst: &mut [T]) {
    let ic = spec.ic as usize;
    let oc = spec.oc as usize;
    let vector_width = spec.vector_width as usize;
    debug_assert_eq!(vector_width, 8);
    let block_x = spec.plan.block_x() as usize;
    let block_z = spec.plan.block_z() as usize;
    let block_len = ic + 1;
    let weights: Vec<f32x8> = weights.chunks_exact(vector_width).map(lanes).collect();
    dst.par_chunks_mut(block_x * oc)
        .zip(src.par_chunks(block_x * ic))
        .for_each(|(dst, src)| {
            for (group_block, weights) in weights.chunks(block_z * block_len).enumerate() {
                for (z, weights) in weights.chunks_exact(block_len).enumerate() {
                    let start = (group_block * block_z + z) * vector_width;
                    let end = (start + vector_width).min(oc);
                    let (bias, weights) = weights.split_at(1);
                    for (dst, src) in dst.chunks_exact_mut(oc).zip(src.chunks_exact(ic)) {
                        let acc = src
                            .iter()
                            .zip(weights)
                            .fold(bias[0], |acc, (x, w)| acc + f32x8::splat(x.cast()) * *w);
                        for (y, a) in dst[start..end].iter_mut().zip(acc.to_array()) {
                            *y = a.cast();
                        }
                    }
                }
            }
        });
}
