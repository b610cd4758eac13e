//! Weight and bias packing.
//!
//! Output channels are split into groups of `vector_width` lanes. Each group is stored as
//! one block of `(ic + 1) * vector_width` values: the bias of the group followed by the
//! weights of each input channel.
//!
//! ```text
//! [ b0 b1 b2 b3 | w00 w10 w20 w30 | w01 w11 w21 w31 | ... ]
//! ```
//! Lanes past the last output channel are 0.
use super::Convolution2DAttributes;
use crate::error::Result;

pub(crate) const fn div_up(a: usize, b: usize) -> usize {
    a / b + (a % b != 0) as usize
}

/// Weights and bias packed for a vector width.
#[derive(Clone, Debug, PartialEq)]
pub struct PackedWeights {
    ic: usize,
    oc: usize,
    vector_width: usize,
    data: Vec<f32>,
}

impl PackedWeights {
    /// Packs the weights and bias of `attr`.
    ///
    /// **Errors**
    /// The attributes do not describe a 1x1 convolution, see
    /// [`ConvBuffer1x1::new()`](super::ConvBuffer1x1::new).
    ///
    /// **Panics**
    /// `vector_width` is 0.
    pub fn new(attr: &Convolution2DAttributes, vector_width: usize) -> Result<Self> {
        assert_ne!(vector_width, 0);
        attr.check_1x1()?;
        Ok(Self::pack(
            attr.input_channels(),
            attr.output_channels(),
            vector_width,
            &attr.weights,
            &attr.bias,
        ))
    }
    fn pack(ic: usize, oc: usize, vector_width: usize, weights: &[f32], bias: &[f32]) -> Self {
        let groups = div_up(oc, vector_width);
        let block_len = (ic + 1) * vector_width;
        let mut data = vec![0f32; groups * block_len];
        for ((block, weights), bias) in data
            .chunks_exact_mut(block_len)
            .zip(weights.chunks(vector_width * ic))
            .zip(bias.chunks(vector_width))
        {
            block[..bias.len()].copy_from_slice(bias);
            for (v, w) in weights.chunks_exact(ic).enumerate() {
                for (i, w) in w.iter().copied().enumerate() {
                    block[(i + 1) * vector_width + v] = w;
                }
            }
        }
        Self {
            ic,
            oc,
            vector_width,
            data,
        }
    }
    /// Input channels.
    pub fn input_channels(&self) -> usize {
        self.ic
    }
    /// Output channels, not including padding lanes.
    pub fn output_channels(&self) -> usize {
        self.oc
    }
    /// Lanes per group.
    pub fn vector_width(&self) -> usize {
        self.vector_width
    }
    /// The number of groups, `ceil(oc / vector_width)`.
    pub fn groups(&self) -> usize {
        div_up(self.oc, self.vector_width)
    }
    /// The length of one group.
    pub fn block_len(&self) -> usize {
        (self.ic + 1) * self.vector_width
    }
    /// The packed data.
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }
}
