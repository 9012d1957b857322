// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/box3d/reproject.rs - 三维关键点重投影
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

use nalgebra::{Matrix4, Vector4};

use crate::config::CameraConfig;

/// 透视除法的最小 |w|
const MIN_PERSPECTIVE_W: f32 = 1e-6;

#[derive(Debug, Clone)]
pub struct Reprojector {
  projection: Matrix4<f32>,
}

impl Reprojector {
  pub fn new(camera: &CameraConfig) -> Self {
    let flat: Vec<f32> = camera.projection.iter().flatten().copied().collect();
    Self {
      projection: Matrix4::from_row_slice(&flat),
    }
  }

  /// 投影到 [0, 1] 图像坐标，w 接近 0 或结果非有限时返回 `None`
  pub fn project_point(&self, point: &[f32; 3]) -> Option<[f32; 2]> {
    let clip = self.projection * Vector4::new(point[0], point[1], point[2], 1.0);
    let w = clip[3];
    if !w.is_finite() || w.abs() < MIN_PERSPECTIVE_W {
      return None;
    }
    // 与提升时的 x/y 交换相反
    let u = (clip[1] / w + 1.0) * 0.5;
    let v = (clip[0] / w + 1.0) * 0.5;
    (u.is_finite() && v.is_finite()).then_some([u, v])
  }

  pub fn project(&self, points: &[[f32; 3]]) -> Vec<Option<[f32; 2]>> {
    points.iter().map(|p| self.project_point(p)).collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_point_on_optical_axis_maps_to_center() {
    let reprojector = Reprojector::new(&CameraConfig::default());
    let [u, v] = reprojector.project_point(&[0.0, 0.0, -2.0]).unwrap();
    assert!((u - 0.5).abs() < 1e-6);
    assert!((v - 0.5).abs() < 1e-6);
  }

  #[test]
  fn test_axes_are_swapped() {
    let camera = CameraConfig::default();
    let reprojector = Reprojector::new(&camera);
    let [u, v] = reprojector.project_point(&[0.5, 0.0, -1.0]).unwrap();
    // 相机 x 对应图像纵向
    assert!((u - 0.5).abs() < 1e-6);
    assert!((v - (camera.fx() * 0.5 + 1.0) * 0.5).abs() < 1e-6);
  }

  #[test]
  fn test_zero_w_is_flagged_invalid() {
    let reprojector = Reprojector::new(&CameraConfig::default());
    assert_eq!(reprojector.project_point(&[0.3, 0.2, 0.0]), None);
    assert_eq!(reprojector.project_point(&[0.3, 0.2, 1e-9]), None);
    assert_eq!(reprojector.project_point(&[f32::NAN, 0.0, -1.0]), None);

    let points = reprojector.project(&[[0.0, 0.0, 0.0], [0.0, 0.0, -1.0]]);
    assert_eq!(points[0], None);
    assert!(points[1].is_some());
  }
}
