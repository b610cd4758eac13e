//! Dispatch planning.
//!
//! A work item computes `block_x` consecutive pixels for `block_z` consecutive channel
//! groups. The plan is a pure function of the [`DeviceInfo`], the precision and the
//! destination shape.
use super::pack::div_up;
use crate::{
    device::DeviceInfo,
    error::{PreconditionViolation, Result},
    operation::CalculationsPrecision,
    tensor::Bhwc,
};
use num_traits::ToPrimitive;

const MAX_THREADS: u32 = 256;

/// Block sizes and grid of a dispatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LaunchPlan {
    block_x: u32,
    block_z: u32,
    threads: u32,
    items: u32,
    groups: u32,
    channel_groups: u32,
    pixels: u32,
}

impl LaunchPlan {
    /// Plans a dispatch writing `dst_shape`.
    ///
    /// **Errors**
    /// - [`TooLarge`](PreconditionViolation::TooLarge) if the number of elements does not fit
    ///   in a u32, or the dispatch needs more than
    ///   [`max_groups`](DeviceInfo::max_groups) work groups.
    /// - [`Empty`](PreconditionViolation::Empty) if `dst_shape` has no pixels.
    ///
    /// **Panics**
    /// `dst_shape` has no channels.
    pub fn new(info: &DeviceInfo, precision: CalculationsPrecision, dst_shape: Bhwc) -> Result<Self> {
        let too_large = || PreconditionViolation::TooLarge(dst_shape);
        dst_shape.len().to_u32().ok_or_else(too_large)?;
        let pixels = dst_shape.pixels().to_u32().ok_or_else(too_large)?;
        let channel_groups = div_up(dst_shape.c, info.vector_width())
            .to_u32()
            .ok_or_else(too_large)?;
        assert_ne!(channel_groups, 0);
        if pixels == 0 {
            return Err(PreconditionViolation::Empty(dst_shape).into());
        }
        let task_size = dst_shape.pixels() * channel_groups as usize;
        let block_size = recommended_block_size(info, precision, task_size);
        let [block_x, block_z] = split_block_size(block_size, channel_groups);
        let items = div_up(pixels as usize, block_x as usize) as u32 * (channel_groups / block_z);
        let threads = work_group_threads(info, items);
        let groups = div_up(items as usize, threads as usize) as u32;
        if groups > info.max_groups() {
            return Err(too_large().into());
        }
        Ok(Self {
            block_x,
            block_z,
            threads,
            items,
            groups,
            channel_groups,
            pixels,
        })
    }
    /// Pixels per work item.
    pub fn block_x(&self) -> u32 {
        self.block_x
    }
    /// Channel groups per work item.
    pub fn block_z(&self) -> u32 {
        self.block_z
    }
    /// Threads per work group.
    pub fn threads(&self) -> u32 {
        self.threads
    }
    /// The number of work items.
    pub fn items(&self) -> u32 {
        self.items
    }
    /// The number of work groups.
    pub fn groups(&self) -> u32 {
        self.groups
    }
    /// `ceil(channels / vector_width)`.
    pub fn channel_groups(&self) -> u32 {
        self.channel_groups
    }
    /// `b * h * w` of the destination.
    pub fn pixels(&self) -> u32 {
        self.pixels
    }
}

/// 1, 2 or 4 from the work per compute unit.
fn recommended_block_size(
    info: &DeviceInfo,
    precision: CalculationsPrecision,
    task_size: usize,
) -> u32 {
    let task_size_per_cu = task_size as f32 / info.compute_units() as f32;
    let (threshold_1, threshold_2) = match precision {
        CalculationsPrecision::F32 => (256., 256. * 6.),
        CalculationsPrecision::F16 => (256., 256. * 4.),
    };
    if task_size_per_cu <= threshold_1 {
        1
    } else if task_size_per_cu <= threshold_2 {
        2
    } else {
        4
    }
}

/// Splits `block_size` into `[block_x, block_z]`, block_z divides `channel_groups`.
fn split_block_size(block_size: u32, channel_groups: u32) -> [u32; 2] {
    match block_size {
        4 if channel_groups % 2 == 0 => [2, 2],
        4 => [4, 1],
        2 if channel_groups >= 32 && channel_groups % 2 == 0 => [1, 2],
        2 => [2, 1],
        _ => [1, 1],
    }
}

fn work_group_threads(info: &DeviceInfo, items: u32) -> u32 {
    let subgroup_threads = info.subgroup_threads().max(1);
    let max_threads = info.max_threads().min(MAX_THREADS);
    let mut threads = (max_threads / subgroup_threads).max(1) * subgroup_threads;
    while threads / 2 >= items.max(subgroup_threads) && (threads / 2) % subgroup_threads == 0 {
        threads /= 2;
    }
    threads
}
