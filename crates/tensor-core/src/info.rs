// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Tensor descriptors: shape, element type, layout, quantization and strides.

use crate::{DataLayout, DataType, QuantizationInfo, TensorShape, MAX_DIMS};

/// Byte distance between consecutive elements along each dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Strides([usize; MAX_DIMS]);

impl Strides {
    /// Dense strides for `shape` with elements of `element_size` bytes.
    pub fn dense(shape: &TensorShape, element_size: usize) -> Self {
        let mut s = [0usize; MAX_DIMS];
        s[0] = element_size;
        for i in 1..MAX_DIMS {
            s[i] = s[i - 1] * shape[i - 1];
        }
        Self(s)
    }

    pub fn as_array(&self) -> &[usize; MAX_DIMS] {
        &self.0
    }
}

impl std::ops::Index<usize> for Strides {
    type Output = usize;

    fn index(&self, dim: usize) -> &usize {
        &self.0[dim]
    }
}

/// Metadata describing a tensor: shape, data type, layout and quantization.
///
/// Descriptors are plain values. Kernels copy what they need at configure
/// time and never hold on to the caller's descriptor.
///
/// # Examples
/// ```
/// use tensor_core::{DataType, TensorInfo, TensorShape};
/// let info = TensorInfo::new(TensorShape::new(&[3, 4]), DataType::F32);
/// assert_eq!(info.total_size(), 48);
/// assert_eq!(info.strides_in_bytes()[1], 12);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct TensorInfo {
    shape: TensorShape,
    data_type: DataType,
    layout: DataLayout,
    qinfo: QuantizationInfo,
    strides: Strides,
    are_values_constant: bool,
}

impl TensorInfo {
    pub fn new(shape: TensorShape, data_type: DataType) -> Self {
        Self {
            shape,
            data_type,
            layout: DataLayout::Nchw,
            qinfo: QuantizationInfo::default(),
            strides: Strides::dense(&shape, data_type.size_bytes()),
            are_values_constant: true,
        }
    }

    /// An uninitialised descriptor, to be filled by `auto_init_if_empty`.
    pub fn empty() -> Self {
        Self::new(TensorShape::empty(), DataType::Unknown)
    }

    pub fn with_layout(mut self, layout: DataLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_quantization(mut self, qinfo: QuantizationInfo) -> Self {
        self.qinfo = qinfo;
        self
    }

    pub fn with_data_type(mut self, data_type: DataType) -> Self {
        self.data_type = data_type;
        self.strides = Strides::dense(&self.shape, data_type.size_bytes());
        self
    }

    pub fn with_shape(mut self, shape: TensorShape) -> Self {
        self.set_shape(shape);
        self
    }

    /// Declares whether the tensor's values may change between runs.
    pub fn with_constant_values(mut self, constant: bool) -> Self {
        self.are_values_constant = constant;
        self
    }

    pub fn set_shape(&mut self, shape: TensorShape) {
        self.shape = shape;
        self.strides = Strides::dense(&shape, self.data_type.size_bytes());
    }

    pub fn set_quantization_info(&mut self, qinfo: QuantizationInfo) {
        self.qinfo = qinfo;
    }

    pub fn shape(&self) -> &TensorShape {
        &self.shape
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn data_layout(&self) -> DataLayout {
        self.layout
    }

    pub fn quantization_info(&self) -> &QuantizationInfo {
        &self.qinfo
    }

    pub fn strides_in_bytes(&self) -> &Strides {
        &self.strides
    }

    pub fn element_size(&self) -> usize {
        self.data_type.size_bytes()
    }

    pub fn num_dimensions(&self) -> usize {
        self.shape.num_dimensions()
    }

    pub fn dimension(&self, dim: usize) -> usize {
        self.shape[dim]
    }

    pub fn are_values_constant(&self) -> bool {
        self.are_values_constant
    }

    /// Total buffer size in bytes.
    pub fn total_size(&self) -> usize {
        self.shape.total_size() * self.element_size()
    }

    /// Returns `true` once a shape and data type have been set.
    pub fn is_initialised(&self) -> bool {
        !self.shape.is_empty() && self.data_type != DataType::Unknown
    }

    /// Byte offset of the element at `coords` (innermost first).
    pub fn offset_element_in_bytes(&self, coords: &[usize]) -> usize {
        coords
            .iter()
            .zip(self.strides.as_array())
            .map(|(c, s)| c * s)
            .sum()
    }

    /// Fills an uninitialised descriptor from a shape, type and quantization.
    ///
    /// Returns `true` if the descriptor was modified.
    pub fn auto_init_if_empty(
        &mut self,
        shape: TensorShape,
        data_type: DataType,
        qinfo: QuantizationInfo,
    ) -> bool {
        if self.shape.is_empty() {
            self.data_type = data_type;
            self.qinfo = qinfo;
            self.set_shape(shape);
            return true;
        }
        false
    }

    /// [`auto_init_if_empty`](Self::auto_init_if_empty) copying everything but
    /// the shape from `src`.
    pub fn auto_init_like(&mut self, shape: TensorShape, src: &TensorInfo) -> bool {
        let changed = self.auto_init_if_empty(shape, src.data_type, src.qinfo.clone());
        if changed {
            self.layout = src.layout;
        }
        changed
    }
}

impl Default for TensorInfo {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dense_strides() {
        let info = TensorInfo::new(TensorShape::new(&[5, 4, 3]), DataType::F16);
        let s = info.strides_in_bytes();
        assert_eq!(s[0], 2);
        assert_eq!(s[1], 10);
        assert_eq!(s[2], 40);
        assert_eq!(s[3], 120);
        assert_eq!(info.total_size(), 120);
    }

    #[test]
    fn test_offset_element() {
        let info = TensorInfo::new(TensorShape::new(&[5, 4]), DataType::F32);
        assert_eq!(info.offset_element_in_bytes(&[2, 3]), 2 * 4 + 3 * 20);
    }

    #[test]
    fn test_auto_init() {
        let mut dst = TensorInfo::empty();
        assert!(!dst.is_initialised());
        let src = TensorInfo::new(TensorShape::new(&[2, 2]), DataType::QAsymm8)
            .with_quantization(QuantizationInfo::new(0.5, 3))
            .with_layout(DataLayout::Nhwc);
        assert!(dst.auto_init_like(TensorShape::new(&[4]), &src));
        assert_eq!(dst.data_type(), DataType::QAsymm8);
        assert_eq!(dst.data_layout(), DataLayout::Nhwc);
        assert_eq!(dst.quantization_info().uniform().offset, 3);
        // Already initialised: untouched.
        assert!(!dst.auto_init_like(TensorShape::new(&[9]), &src));
        assert_eq!(dst.shape().x(), 4);
    }
}
