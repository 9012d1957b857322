// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/box3d/box_fit.rs - 立方体尺寸拟合
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

use nalgebra::{Matrix3, Matrix4, Vector3};
use tracing::warn;

use crate::config::{BoxTopology, NUM_BOX_KEYPOINTS, PoseAlignment};

use super::Box3dError;

/// 以中心为原点的局部坐标系下的立方体
#[derive(Debug, Clone, PartialEq)]
pub struct BoxFit {
  pub half_extents: Vector3<f32>,
  pub transform: Matrix4<f32>,
  /// 中心 + 8 个角点，顺序与关键点一致
  pub corners: Vec<Vector3<f32>>,
}

impl BoxFit {
  fn new(half_extents: Vector3<f32>) -> Self {
    let mut fit = Self {
      half_extents,
      transform: Matrix4::identity(),
      corners: Vec::with_capacity(NUM_BOX_KEYPOINTS),
    };
    fit.update_box();
    fit
  }

  /// 标准立方体顶点（未施加变换）
  pub fn local_corners(&self) -> Vec<Vector3<f32>> {
    let (w, h, d) = (
      self.half_extents.x,
      self.half_extents.y,
      self.half_extents.z,
    );
    vec![
      Vector3::new(0.0, 0.0, 0.0),
      Vector3::new(-w, -h, -d),
      Vector3::new(-w, -h, d),
      Vector3::new(-w, h, -d),
      Vector3::new(-w, h, d),
      Vector3::new(w, -h, -d),
      Vector3::new(w, -h, d),
      Vector3::new(w, h, -d),
      Vector3::new(w, h, d),
    ]
  }

  /// 由尺寸和刚体变换重新计算顶点
  pub fn update_box(&mut self) {
    let rotation = self.transform.fixed_view::<3, 3>(0, 0).into_owned();
    let translation = self.transform.fixed_view::<3, 1>(0, 3).into_owned();
    self.corners = self
      .local_corners()
      .iter()
      .map(|p| rotation * p + translation)
      .collect();
  }

  pub fn set_transform(&mut self, transform: Matrix4<f32>) {
    self.transform = transform;
    self.update_box();
  }

  pub fn corners_array(&self) -> Vec<[f32; 3]> {
    self.corners.iter().map(|p| [p.x, p.y, p.z]).collect()
  }
}

#[derive(Debug, Clone)]
pub struct BoxFitter {
  topology: BoxTopology,
  alignment: PoseAlignment,
}

impl BoxFitter {
  pub fn new(topology: &BoxTopology, alignment: PoseAlignment) -> Self {
    Self {
      topology: topology.clone(),
      alignment,
    }
  }

  pub fn fit(&self, vertices: &[[f32; 3]]) -> Result<BoxFit, Box3dError> {
    if vertices.len() != NUM_BOX_KEYPOINTS {
      return Err(Box3dError::KeypointCount {
        expected: NUM_BOX_KEYPOINTS,
        actual: vertices.len(),
      });
    }
    let vertices: Vec<Vector3<f32>> = vertices.iter().map(|v| Vector3::from(*v)).collect();

    let mut scale = Vector3::zeros();
    for axis in 0..BoxTopology::NUM_AXIS {
      let edges = self.topology.axis_edges(axis);
      let total: f32 = edges
        .iter()
        .map(|&[a, b]| (vertices[a] - vertices[b]).norm())
        .sum();
      scale[axis] = total / edges.len() as f32;
    }

    let mut fit = BoxFit::new(scale / 2.0);
    if self.alignment == PoseAlignment::Procrustes {
      match fit_rigid(&fit.local_corners(), &vertices) {
        Some(transform) => fit.set_transform(transform),
        None => warn!("立方体姿态对齐失败, 保持单位变换"),
      }
    }
    Ok(fit)
  }
}

/// 正交 Procrustes：求 R、t 使 `R * local + t` 与 `target` 的平方误差最小
fn fit_rigid(local: &[Vector3<f32>], target: &[Vector3<f32>]) -> Option<Matrix4<f32>> {
  let n = local.len() as f32;
  let local_centroid: Vector3<f32> = local.iter().sum::<Vector3<f32>>() / n;
  let target_centroid: Vector3<f32> = target.iter().sum::<Vector3<f32>>() / n;

  let mut h = Matrix3::zeros();
  for (l, t) in local.iter().zip(target.iter()) {
    h += (l - local_centroid) * (t - target_centroid).transpose();
  }

  let svd = h.svd(true, true);
  let u = svd.u?;
  let v_t = svd.v_t?;

  let mut rotation = v_t.transpose() * u.transpose();
  if rotation.determinant() < 0.0 {
    let mut v = v_t.transpose();
    for i in 0..3 {
      v[(i, 2)] = -v[(i, 2)];
    }
    rotation = v * u.transpose();
  }
  let translation = target_centroid - rotation * local_centroid;
  if rotation.iter().chain(translation.iter()).any(|v| !v.is_finite()) {
    return None;
  }

  let mut transform = Matrix4::identity();
  transform.fixed_view_mut::<3, 3>(0, 0).copy_from(&rotation);
  transform.fixed_view_mut::<3, 1>(0, 3).copy_from(&translation);
  Some(transform)
}

#[cfg(test)]
mod tests {
  use super::*;
  use nalgebra::Rotation3;

  fn ideal_box(half: Vector3<f32>, rotation: Matrix3<f32>, center: Vector3<f32>) -> Vec<[f32; 3]> {
    let mut fit = BoxFit::new(half);
    let mut transform = Matrix4::identity();
    transform.fixed_view_mut::<3, 3>(0, 0).copy_from(&rotation);
    transform.fixed_view_mut::<3, 1>(0, 3).copy_from(&center);
    fit.set_transform(transform);
    fit.corners_array()
  }

  #[test]
  fn test_half_extents_from_edges() {
    let rotation = Rotation3::from_euler_angles(0.3, -0.2, 0.7).into_inner();
    let vertices = ideal_box(
      Vector3::new(0.5, 1.0, 1.5),
      rotation,
      Vector3::new(1.0, 2.0, -5.0),
    );
    let fit = BoxFitter::new(&BoxTopology::default(), PoseAlignment::Identity)
      .fit(&vertices)
      .unwrap();
    assert!((fit.half_extents - Vector3::new(0.5, 1.0, 1.5)).norm() < 1e-5);
  }

  #[test]
  fn test_identity_alignment_centers_box_at_origin() {
    let vertices = ideal_box(
      Vector3::new(0.5, 1.0, 1.5),
      Matrix3::identity(),
      Vector3::new(1.0, 2.0, -5.0),
    );
    let fit = BoxFitter::new(&BoxTopology::default(), PoseAlignment::Identity)
      .fit(&vertices)
      .unwrap();
    assert_eq!(fit.transform, Matrix4::identity());
    assert_eq!(fit.corners[0], Vector3::zeros());
    assert_eq!(fit.corners[1], Vector3::new(-0.5, -1.0, -1.5));
    assert_eq!(fit.corners[8], Vector3::new(0.5, 1.0, 1.5));
  }

  #[test]
  fn test_procrustes_alignment_restores_pose() {
    let rotation = Rotation3::from_euler_angles(0.1, 0.4, -0.3).into_inner();
    let vertices = ideal_box(
      Vector3::new(0.2, 0.3, 0.4),
      rotation,
      Vector3::new(-0.5, 0.25, -3.0),
    );
    let fit = BoxFitter::new(&BoxTopology::default(), PoseAlignment::Procrustes)
      .fit(&vertices)
      .unwrap();
    for (got, want) in fit.corners_array().iter().zip(vertices.iter()) {
      for axis in 0..3 {
        assert!((got[axis] - want[axis]).abs() < 1e-4, "{:?} vs {:?}", got, want);
      }
    }
  }

  #[test]
  fn test_wrong_vertex_count() {
    let fitter = BoxFitter::new(&BoxTopology::default(), PoseAlignment::Identity);
    assert!(fitter.fit(&[[0.0; 3]; 4]).is_err());
  }
}
