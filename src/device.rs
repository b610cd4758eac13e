use crate::operation::CalculationsPrecision;
use krnl::device::{Device, Features};

/// Lanes of the host vectors, see [`wide::f32x8`].
pub(crate) const HOST_VECTOR_WIDTH: usize = 8;
/// Lanes of the device kernels.
pub(crate) const DEVICE_VECTOR_WIDTH: usize = 4;
/// Compute units assumed for a device.
///
/// krnl does not report them, so block sizes follow the total work, see
/// [`.with_compute_units()`](DeviceInfo::with_compute_units).
pub(crate) const DEVICE_COMPUTE_UNITS: usize = 1;

/// A snapshot of the capabilities of a [`Device`].
///
/// Used to tune kernels and plan dispatches. The snapshot is immutable, two operations
/// created from the same snapshot and shape make the same choices.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DeviceInfo {
    host: bool,
    name: String,
    vector_width: usize,
    max_threads: u32,
    subgroup_threads: u32,
    max_groups: u32,
    compute_units: usize,
    f16: bool,
}

impl DeviceInfo {
    /// Queries the capabilities of `device`.
    pub fn new(device: &Device) -> Self {
        if let Some(info) = device.info() {
            // f16 buffers are loaded and stored as 16 bit words
            let f16_features = Features::INT8
                .union(Features::INT16)
                .union(Features::BUFFER16);
            Self {
                host: false,
                name: format!("{device:?}"),
                vector_width: DEVICE_VECTOR_WIDTH,
                max_threads: info.max_threads(),
                subgroup_threads: info.max_subgroup_threads().max(1),
                max_groups: info.max_groups(),
                compute_units: DEVICE_COMPUTE_UNITS,
                f16: info.features().contains(f16_features),
            }
        } else {
            Self::host()
        }
    }
    /// The capabilities of [`Device::host()`].
    ///
    /// A work group on the host is a task executed by the [`rayon`] thread pool.
    pub fn host() -> Self {
        Self {
            host: true,
            name: "host".to_string(),
            vector_width: HOST_VECTOR_WIDTH,
            max_threads: 1,
            subgroup_threads: 1,
            max_groups: u32::MAX,
            compute_units: rayon::current_num_threads().max(1),
            f16: true,
        }
    }
    #[cfg(test)]
    pub(crate) fn simulated(
        max_threads: u32,
        subgroup_threads: u32,
        compute_units: usize,
        f16: bool,
    ) -> Self {
        Self {
            host: false,
            name: "simulated".to_string(),
            vector_width: DEVICE_VECTOR_WIDTH,
            max_threads,
            subgroup_threads,
            max_groups: u16::MAX as u32,
            compute_units,
            f16,
        }
    }
    /// Limits the work group size.
    ///
    /// Values below the subgroup size are raised to it.
    pub fn with_max_threads(self, max_threads: u32) -> Self {
        Self {
            max_threads: max_threads.max(self.subgroup_threads),
            ..self
        }
    }
    /// Limits the number of work groups of a dispatch.
    pub fn with_max_groups(self, max_groups: u32) -> Self {
        Self {
            max_groups: max_groups.max(1),
            ..self
        }
    }
    /// Overrides the number of compute units.
    ///
    /// Larger values favor smaller blocks and more work items.
    pub fn with_compute_units(self, compute_units: usize) -> Self {
        Self {
            compute_units: compute_units.max(1),
            ..self
        }
    }
    /// Whether the device is the host.
    pub fn is_host(&self) -> bool {
        self.host
    }
    /// The name of the device.
    pub fn name(&self) -> &str {
        &self.name
    }
    /// The preferred number of channels loaded and stored together.
    pub fn vector_width(&self) -> usize {
        self.vector_width
    }
    /// The maximum work group size.
    pub fn max_threads(&self) -> u32 {
        self.max_threads
    }
    /// The subgroup size.
    pub fn subgroup_threads(&self) -> u32 {
        self.subgroup_threads
    }
    /// The maximum number of work groups of a dispatch.
    pub fn max_groups(&self) -> u32 {
        self.max_groups
    }
    /// The number of compute units.
    pub fn compute_units(&self) -> usize {
        self.compute_units
    }
    /// Whether the device supports `precision`.
    pub fn supports(&self, precision: CalculationsPrecision) -> bool {
        match precision {
            CalculationsPrecision::F32 => true,
            CalculationsPrecision::F16 => self.f16,
        }
    }
    /// The supported precisions, full precision first.
    pub fn supported_precisions(&self) -> Vec<CalculationsPrecision> {
        [CalculationsPrecision::F32, CalculationsPrecision::F16]
            .into_iter()
            .filter(|x| self.supports(*x))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_info() {
        let info = DeviceInfo::new(&Device::host());
        assert!(info.is_host());
        assert_eq!(info.name(), "host");
        assert_eq!(info.vector_width(), HOST_VECTOR_WIDTH);
        assert_eq!(info.subgroup_threads(), 1);
        assert_eq!(info.max_groups(), u32::MAX);
        assert_eq!(info.compute_units(), rayon::current_num_threads());
        assert_eq!(
            info.supported_precisions(),
            [CalculationsPrecision::F32, CalculationsPrecision::F16]
        );
    }

    #[test]
    fn device_without_f16() {
        let info = DeviceInfo::simulated(1024, 32, 16, false);
        assert!(!info.supports(CalculationsPrecision::F16));
        assert_eq!(info.supported_precisions(), [CalculationsPrecision::F32]);
    }

    #[test]
    fn with_max_threads_respects_subgroup() {
        let info = DeviceInfo::host().with_max_threads(0);
        assert_eq!(info.max_threads(), info.subgroup_threads());
    }

    #[test]
    fn overrides_are_positive() {
        let info = DeviceInfo::simulated(256, 32, 4, true)
            .with_max_groups(0)
            .with_compute_units(0);
        assert_eq!(info.max_groups(), 1);
        assert_eq!(info.compute_units(), 1);
    }
}
