// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Implicit im2col: maps (output pixel, kernel tap) to an input row.

use crate::args::ConvolutionParameters;
use crate::element::Element;

/// Resolves rows of a convolution-as-GEMM `A` operand without materialising it.
///
/// The input is NHWC with one pixel every `lda` elements. Row `m` of `A` is
/// output pixel `m` of a batch and section `s` is kernel tap `s`
/// (`ky = s / kernel_width`, `kx = s % kernel_width`). Taps outside the
/// input read a row filled with the padding value.
#[derive(Debug, Clone)]
pub struct Convolver<Ti> {
    params: ConvolutionParameters,
    pad_row: Vec<Ti>,
}

impl<Ti: Element> Convolver<Ti> {
    pub fn new(params: ConvolutionParameters) -> Self {
        let pad_row = vec![Ti::from_f32(params.padding_value); params.input_channels];
        Self { params, pad_row }
    }

    pub fn params(&self) -> &ConvolutionParameters {
        &self.params
    }

    pub fn sections(&self) -> usize {
        self.params.kernel_width * self.params.kernel_height
    }

    /// Input pixel read by output pixel `m` at tap `section`, if inside the input.
    pub fn source_pixel(&self, m: usize, section: usize) -> Option<(usize, usize)> {
        let p = &self.params;
        let (oy, ox) = (m / p.output_width.max(1), m % p.output_width.max(1));
        let (ky, kx) = (section / p.kernel_width.max(1), section % p.kernel_width.max(1));
        let iy = (oy * p.output_stride_h + ky).checked_sub(p.padding_top)?;
        let ix = (ox * p.output_stride_w + kx).checked_sub(p.padding_left)?;
        (iy < p.input_height && ix < p.input_width).then_some((iy, ix))
    }

    /// Pointer to `input_channels` elements of row `m`, section `section`.
    ///
    /// # Safety
    /// `base` must point at one batch of the input described by the parameters.
    #[inline]
    pub unsafe fn row(&self, base: *const Ti, lda: usize, m: usize, section: usize) -> *const Ti {
        match self.source_pixel(m, section) {
            Some((iy, ix)) => base.add((iy * self.params.input_width + ix) * lda),
            None => self.pad_row.as_ptr(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ConvolutionParameters {
        ConvolutionParameters {
            input_width: 3,
            input_height: 3,
            input_channels: 2,
            kernel_width: 3,
            kernel_height: 3,
            output_width: 3,
            output_height: 3,
            output_stride_w: 1,
            output_stride_h: 1,
            padding_top: 1,
            padding_left: 1,
            padding_value: 7.0,
        }
    }

    #[test]
    fn test_source_pixel() {
        let c = Convolver::<f32>::new(params());
        assert_eq!(c.sections(), 9);
        // output (0,0), tap (0,0) falls in the padding
        assert_eq!(c.source_pixel(0, 0), None);
        // output (1,1), centre tap reads (1,1)
        assert_eq!(c.source_pixel(4, 4), Some((1, 1)));
        // output (2,2), bottom-right tap is outside
        assert_eq!(c.source_pixel(8, 8), None);
    }

    #[test]
    fn test_row_pointer() {
        let c = Convolver::<f32>::new(params());
        let input: Vec<f32> = (0..18).map(|v| v as f32).collect();
        unsafe {
            let r = c.row(input.as_ptr(), 2, 4, 4);
            assert_eq!(*r, 8.0);
            let pad = c.row(input.as_ptr(), 2, 0, 0);
            assert_eq!(*pad, 7.0);
            assert_eq!(*pad.add(1), 7.0);
        }
    }
}
