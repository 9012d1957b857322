// 该文件是 Shanan （山南西风） 项目的一部分。
// src/tensor.rs - NCHW 浮点张量定义
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TensorError {
  #[error("数据长度不匹配: 形状 {shape:?} 期望长度 {expected}, 实际长度 {actual}")]
  LengthMismatch {
    shape: [usize; 4],
    expected: usize,
    actual: usize,
  },
  #[error("张量形状 {0:?} 的元素数量溢出")]
  ShapeOverflow([usize; 4]),
}

fn element_count(shape: &[usize; 4]) -> Result<usize, TensorError> {
  shape
    .iter()
    .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
    .ok_or(TensorError::ShapeOverflow(*shape))
}

/// 借用外部缓冲区的只读 NCHW 张量视图
#[derive(Debug, Clone, Copy)]
pub struct TensorView<'a> {
  shape: [usize; 4],
  data: &'a [f32],
}

impl<'a> TensorView<'a> {
  pub fn new(shape: [usize; 4], data: &'a [f32]) -> Result<Self, TensorError> {
    let expected = element_count(&shape)?;
    if data.len() != expected {
      return Err(TensorError::LengthMismatch {
        shape,
        expected,
        actual: data.len(),
      });
    }
    Ok(Self { shape, data })
  }

  pub fn shape(&self) -> [usize; 4] {
    self.shape
  }

  pub fn batch(&self) -> usize {
    self.shape[0]
  }

  pub fn channels(&self) -> usize {
    self.shape[1]
  }

  pub fn height(&self) -> usize {
    self.shape[2]
  }

  pub fn width(&self) -> usize {
    self.shape[3]
  }

  pub fn as_slice(&self) -> &'a [f32] {
    self.data
  }

  /// 第一个 batch 中第 `c` 个通道的平面数据
  pub fn plane(&self, c: usize) -> &'a [f32] {
    let hw = self.height() * self.width();
    &self.data[c * hw..(c + 1) * hw]
  }

  #[inline]
  pub fn at(&self, c: usize, y: usize, x: usize) -> f32 {
    let (h, w) = (self.height(), self.width());
    self.data[(c * h + y) * w + x]
  }
}

/// 拥有数据的 NCHW 张量
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
  shape: [usize; 4],
  data: Box<[f32]>,
}

impl TryFrom<([usize; 4], Vec<f32>)> for Tensor {
  type Error = TensorError;

  fn try_from((shape, data): ([usize; 4], Vec<f32>)) -> Result<Self, Self::Error> {
    let expected = element_count(&shape)?;
    if data.len() != expected {
      return Err(TensorError::LengthMismatch {
        shape,
        expected,
        actual: data.len(),
      });
    }

    Ok(Self {
      shape,
      data: data.into_boxed_slice(),
    })
  }
}

impl Tensor {
  /// # Panics
  ///
  /// 形状的元素数量溢出 `usize` 时 panic，与 `vec!` 分配失败一致。
  pub fn zeros(shape: [usize; 4]) -> Self {
    let len = match element_count(&shape) {
      Ok(len) => len,
      Err(e) => panic!("{}", e),
    };
    let data = vec![0f32; len].into_boxed_slice();
    Self { shape, data }
  }

  pub fn shape(&self) -> [usize; 4] {
    self.shape
  }

  pub fn channels(&self) -> usize {
    self.shape[1]
  }

  pub fn height(&self) -> usize {
    self.shape[2]
  }

  pub fn width(&self) -> usize {
    self.shape[3]
  }

  pub fn view(&self) -> TensorView<'_> {
    TensorView {
      shape: self.shape,
      data: &self.data,
    }
  }

  pub fn set(&mut self, c: usize, y: usize, x: usize, value: f32) {
    let (h, w) = (self.height(), self.width());
    self.data[(c * h + y) * w + x] = value;
  }
}

impl AsMut<[f32]> for Tensor {
  fn as_mut(&mut self) -> &mut [f32] {
    &mut self.data
  }
}

impl AsRef<[f32]> for Tensor {
  fn as_ref(&self) -> &[f32] {
    &self.data
  }
}

/// 一帧推理输出：中心热力图与关键点偏移图
#[derive(Debug, Clone)]
pub struct OutputTensors {
  pub heatmap: Tensor,
  pub offsetmap: Tensor,
}

impl OutputTensors {
  pub fn new(heatmap: Tensor, offsetmap: Tensor) -> Self {
    Self { heatmap, offsetmap }
  }
}

/// 序列化的单个张量
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TensorRecord {
  pub shape: [usize; 4],
  pub data: Vec<f32>,
}

impl TryFrom<TensorRecord> for Tensor {
  type Error = TensorError;

  fn try_from(record: TensorRecord) -> Result<Self, Self::Error> {
    Tensor::try_from((record.shape, record.data))
  }
}

impl From<&Tensor> for TensorRecord {
  fn from(tensor: &Tensor) -> Self {
    Self {
      shape: tensor.shape(),
      data: tensor.as_ref().to_vec(),
    }
  }
}

/// 一帧推理输出的文件格式
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TensorFileRecord {
  pub heatmap: TensorRecord,
  pub offsetmap: TensorRecord,
}

impl TryFrom<TensorFileRecord> for OutputTensors {
  type Error = TensorError;

  fn try_from(record: TensorFileRecord) -> Result<Self, Self::Error> {
    Ok(OutputTensors::new(
      record.heatmap.try_into()?,
      record.offsetmap.try_into()?,
    ))
  }
}

impl From<&OutputTensors> for TensorFileRecord {
  fn from(tensors: &OutputTensors) -> Self {
    Self {
      heatmap: (&tensors.heatmap).into(),
      offsetmap: (&tensors.offsetmap).into(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_view_rejects_wrong_length() {
    let data = vec![0.0f32; 10];
    let err = TensorView::new([1, 1, 3, 4], &data).unwrap_err();
    assert_eq!(
      err,
      TensorError::LengthMismatch {
        shape: [1, 1, 3, 4],
        expected: 12,
        actual: 10
      }
    );
  }

  #[test]
  fn test_overflowing_shape_is_rejected() {
    let huge = [1, 1, usize::MAX / 2, 4];
    assert_eq!(
      TensorView::new(huge, &[]).unwrap_err(),
      TensorError::ShapeOverflow(huge)
    );
    assert_eq!(
      Tensor::try_from((huge, Vec::new())).unwrap_err(),
      TensorError::ShapeOverflow(huge)
    );

    let record = TensorFileRecord {
      heatmap: TensorRecord {
        shape: huge,
        data: Vec::new(),
      },
      offsetmap: TensorRecord {
        shape: [1, 16, 1, 1],
        data: vec![0.0; 16],
      },
    };
    assert!(OutputTensors::try_from(record).is_err());
  }

  #[test]
  fn test_indexing_is_channel_major() {
    let mut tensor = Tensor::zeros([1, 2, 3, 4]);
    tensor.set(1, 2, 3, 7.0);
    let view = tensor.view();
    assert_eq!(view.at(1, 2, 3), 7.0);
    assert_eq!(view.as_slice()[23], 7.0);
    assert_eq!(view.plane(1)[11], 7.0);
  }
}
