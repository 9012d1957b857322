// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/box3d/peak.rs - 热力图局部极大值提取
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

use tracing::{debug, warn};

use crate::tensor::TensorView;

/// 热力图上的候选中心点（像素坐标）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CandidatePoint {
  pub x: usize,
  pub y: usize,
  pub belief: f32,
}

pub trait PeakExtractor {
  /// 按行优先顺序返回候选中心点
  fn extract(&self, heatmap: &TensorView<'_>) -> Vec<CandidatePoint>;
}

/// 最大值滤波（矩形膨胀）+ 阈值的峰值提取
#[derive(Debug, Clone)]
pub struct MaxPoolPeaks {
  radius: usize,
  threshold: f32,
}

impl MaxPoolPeaks {
  pub fn new(radius: usize, threshold: f32) -> Self {
    Self { radius, threshold }
  }
}

/// 一维滑窗最大值，越界采样夹到最近的边缘下标
fn max_filter_line(src: &[f32], dst: &mut [f32], len: usize, stride: usize, radius: usize) {
  for i in 0..len {
    let start = i.saturating_sub(radius);
    let end = (i + radius).min(len - 1);
    let mut val = f32::MIN;
    for j in start..=end {
      val = val.max(src[j * stride]);
    }
    dst[i * stride] = val;
  }
}

/// 矩形结构元素的膨胀，窗口大小 `2 * radius + 1`
///
/// 仅接受单通道、单 batch 的热力图，否则返回 `None`。
fn dilate_rect(heatmap: &TensorView<'_>, radius: usize) -> Option<Vec<f32>> {
  if heatmap.batch() != 1 || heatmap.channels() != 1 {
    return None;
  }

  let (h, w) = (heatmap.height(), heatmap.width());
  if h == 0 || w == 0 {
    return Some(Vec::new());
  }
  let src = heatmap.plane(0);

  // 先横向再纵向，两次一维最大值等价于二维矩形窗口
  let mut rows = vec![0f32; h * w];
  for y in 0..h {
    let line = y * w;
    max_filter_line(&src[line..line + w], &mut rows[line..line + w], w, 1, radius);
  }

  let mut dst = vec![0f32; h * w];
  for x in 0..w {
    max_filter_line(&rows[x..], &mut dst[x..], h, w, radius);
  }
  Some(dst)
}

impl PeakExtractor for MaxPoolPeaks {
  fn extract(&self, heatmap: &TensorView<'_>) -> Vec<CandidatePoint> {
    let dilated = match dilate_rect(heatmap, self.radius) {
      Some(dilated) => dilated,
      None => {
        warn!(
          "热力图形状 {:?} 无法做最大值滤波, 跳过峰值提取",
          heatmap.shape()
        );
        return Vec::new();
      }
    };

    let width = heatmap.width();
    let data = heatmap.plane(0);
    let peaks: Vec<CandidatePoint> = data
      .iter()
      .zip(dilated.iter())
      .enumerate()
      .filter(|&(_, (&value, &max))| value >= max && value >= self.threshold)
      .map(|(i, (&value, _))| CandidatePoint {
        x: i % width,
        y: i / width,
        belief: value,
      })
      .collect();

    debug!("提取到 {} 个候选中心点", peaks.len());
    peaks
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn heatmap(h: usize, w: usize, spikes: &[(usize, usize, f32)]) -> Vec<f32> {
    let mut data = vec![0.1f32; h * w];
    for &(x, y, v) in spikes {
      data[y * w + x] = v;
    }
    data
  }

  #[test]
  fn test_single_spike_is_the_only_peak() {
    let data = heatmap(40, 30, &[(15, 20, 0.9)]);
    let view = TensorView::new([1, 1, 40, 30], &data).unwrap();
    let peaks = MaxPoolPeaks::new(2, 0.6).extract(&view);
    assert_eq!(
      peaks,
      vec![CandidatePoint {
        x: 15,
        y: 20,
        belief: 0.9
      }]
    );
  }

  #[test]
  fn test_spike_at_origin_survives_border_clamp() {
    let data = heatmap(8, 8, &[(0, 0, 0.7)]);
    let view = TensorView::new([1, 1, 8, 8], &data).unwrap();
    let peaks = MaxPoolPeaks::new(2, 0.6).extract(&view);
    assert_eq!(peaks.len(), 1);
    assert_eq!((peaks[0].x, peaks[0].y), (0, 0));
  }

  #[test]
  fn test_spike_at_far_corner() {
    let data = heatmap(6, 5, &[(4, 5, 0.8)]);
    let view = TensorView::new([1, 1, 6, 5], &data).unwrap();
    let peaks = MaxPoolPeaks::new(2, 0.6).extract(&view);
    assert_eq!(peaks.len(), 1);
    assert_eq!((peaks[0].x, peaks[0].y), (4, 5));
  }

  #[test]
  fn test_equal_neighbours_are_both_kept_in_raster_order() {
    let data = heatmap(10, 10, &[(5, 4, 0.8), (4, 5, 0.8)]);
    let view = TensorView::new([1, 1, 10, 10], &data).unwrap();
    let peaks = MaxPoolPeaks::new(2, 0.6).extract(&view);
    let coords: Vec<_> = peaks.iter().map(|p| (p.x, p.y)).collect();
    assert_eq!(coords, vec![(5, 4), (4, 5)]);
  }

  #[test]
  fn test_weaker_neighbour_is_suppressed() {
    let data = heatmap(10, 10, &[(5, 5, 0.9), (6, 6, 0.8), (9, 0, 0.5)]);
    let view = TensorView::new([1, 1, 10, 10], &data).unwrap();
    let peaks = MaxPoolPeaks::new(2, 0.6).extract(&view);
    assert_eq!(peaks.len(), 1);
    assert_eq!((peaks[0].x, peaks[0].y), (5, 5));
  }

  #[test]
  fn test_multichannel_heatmap_yields_nothing() {
    let data = vec![0.9f32; 2 * 4 * 4];
    let view = TensorView::new([1, 2, 4, 4], &data).unwrap();
    assert!(MaxPoolPeaks::new(2, 0.6).extract(&view).is_empty());
  }
}
