// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/box3d/lift.rs - EPnP 二维关键点提升到三维
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

use nalgebra::{DMatrix, Matrix4x3, SMatrix, SymmetricEigen};
use thiserror::Error;
use tracing::debug;

use crate::config::{CameraConfig, EpnpConfig, NUM_BOX_KEYPOINTS, NUM_CORNERS};

const NUM_CONTROL_POINTS: usize = 4;
const NUM_UNKNOWNS: usize = NUM_CONTROL_POINTS * 3;
const EIGEN_MAX_ITERATIONS: usize = 1000;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LiftError {
  #[error("需要 {expected} 个关键点, 实际为 {actual}")]
  KeypointCount { expected: usize, actual: usize },
  #[error("特征值分解未收敛")]
  NotConverged,
  #[error("特征值数量无效: 期望 {expected}, 实际 {actual}")]
  InvalidEigenvalues { expected: usize, actual: usize },
  #[error("求解结果包含非有限值")]
  NonFinite,
}

pub trait PoseLifter {
  /// 输入中心 + 8 个角点的归一化图像坐标，输出对应的物体空间三维坐标
  fn lift(&self, key_points: &[[f32; 2]]) -> Result<Vec<[f32; 3]>, LiftError>;
}

/// 以 4 个虚拟控制点表示立方体顶点的闭式 EPnP 求解
#[derive(Debug, Clone)]
pub struct EpnpLifter {
  camera: CameraConfig,
  alpha: SMatrix<f64, NUM_CORNERS, NUM_CONTROL_POINTS>,
}

impl EpnpLifter {
  pub fn new(camera: &CameraConfig, epnp: &EpnpConfig) -> Self {
    let alpha = SMatrix::<f64, NUM_CORNERS, NUM_CONTROL_POINTS>::from_fn(|r, c| {
      epnp.alpha[r][c] as f64
    });
    Self {
      camera: camera.clone(),
      alpha,
    }
  }

  /// 每个角点两行方程，未知量为 4 个控制点的三维坐标
  fn build_system(&self, corners: &[[f32; 2]]) -> DMatrix<f64> {
    let fx = self.camera.fx() as f64;
    let fy = self.camera.fy() as f64;
    let cx = self.camera.cx() as f64;
    let cy = self.camera.cy() as f64;

    let mut m = DMatrix::<f64>::zeros(2 * NUM_CORNERS, NUM_UNKNOWNS);
    for (i, &[kp_x, kp_y]) in corners.iter().enumerate() {
      // 图像为竖屏方向，交换 x/y
      let u = kp_y as f64 * 2.0 - 1.0;
      let v = kp_x as f64 * 2.0 - 1.0;
      for j in 0..NUM_CONTROL_POINTS {
        let a = self.alpha[(i, j)];
        m[(2 * i, 3 * j)] = fx * a;
        m[(2 * i, 3 * j + 2)] = (cx + u) * a;
        m[(2 * i + 1, 3 * j + 1)] = fy * a;
        m[(2 * i + 1, 3 * j + 2)] = (cy + v) * a;
      }
    }
    m
  }
}

impl PoseLifter for EpnpLifter {
  fn lift(&self, key_points: &[[f32; 2]]) -> Result<Vec<[f32; 3]>, LiftError> {
    if key_points.len() != NUM_BOX_KEYPOINTS {
      return Err(LiftError::KeypointCount {
        expected: NUM_BOX_KEYPOINTS,
        actual: key_points.len(),
      });
    }

    if key_points.iter().flatten().any(|v| !v.is_finite()) {
      return Err(LiftError::NonFinite);
    }

    let m = self.build_system(&key_points[1..]);
    let mt_m = m.transpose() * &m;

    let eigen = SymmetricEigen::try_new(mt_m, f64::EPSILON, EIGEN_MAX_ITERATIONS)
      .ok_or(LiftError::NotConverged)?;
    if eigen.eigenvalues.len() != NUM_UNKNOWNS {
      return Err(LiftError::InvalidEigenvalues {
        expected: NUM_UNKNOWNS,
        actual: eigen.eigenvalues.len(),
      });
    }

    // nalgebra 不保证特征值有序，显式取最小值
    let mut min_idx = 0;
    let mut min_val = eigen.eigenvalues[0];
    for i in 1..NUM_UNKNOWNS {
      if eigen.eigenvalues[i] < min_val {
        min_val = eigen.eigenvalues[i];
        min_idx = i;
      }
    }
    debug!("最小特征值: {:e} (下标 {})", min_val, min_idx);

    let solution: Vec<f64> = eigen.eigenvectors.column(min_idx).iter().copied().collect();
    let mut control = Matrix4x3::<f64>::from_row_slice(&solution);
    // 物体位于相机前方（z 为负）
    if control[(0, 2)] > 0.0 {
      control = -control;
    }
    if control.iter().any(|v| !v.is_finite()) {
      return Err(LiftError::NonFinite);
    }

    let vertices = self.alpha * control;

    let mut key_points_3d = Vec::with_capacity(NUM_BOX_KEYPOINTS);
    key_points_3d.push([
      control[(0, 0)] as f32,
      control[(0, 1)] as f32,
      control[(0, 2)] as f32,
    ]);
    for row in vertices.row_iter() {
      key_points_3d.push([row[0] as f32, row[1] as f32, row[2] as f32]);
    }
    Ok(key_points_3d)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use nalgebra::Vector3;

  /// 以中心和三个半轴向量构造控制点，并把 12 维解向量归一化
  fn control_points(center: Vector3<f64>, axes: [Vector3<f64>; 3]) -> [Vector3<f64>; 4] {
    let mut points = [center, center + axes[0], center + axes[1], center + axes[2]];
    let norm = points.iter().map(|p| p.norm_squared()).sum::<f64>().sqrt();
    for p in points.iter_mut() {
      *p /= norm;
    }
    points
  }

  fn project(camera: &CameraConfig, p: &Vector3<f64>) -> [f32; 2] {
    let proj = camera.projection;
    let row = |r: usize| {
      proj[r][0] as f64 * p.x + proj[r][1] as f64 * p.y + proj[r][2] as f64 * p.z + proj[r][3] as f64
    };
    let w = row(3);
    [
      ((row(1) / w + 1.0) * 0.5) as f32,
      ((row(0) / w + 1.0) * 0.5) as f32,
    ]
  }

  #[test]
  fn test_lift_recovers_normalized_box() {
    let camera = CameraConfig::default();
    let epnp = EpnpConfig::default();
    let lifter = EpnpLifter::new(&camera, &epnp);

    let control = control_points(
      Vector3::new(0.1, -0.05, -2.0),
      [
        Vector3::new(0.3, 0.0, 0.05),
        Vector3::new(0.0, 0.4, 0.0),
        Vector3::new(-0.25 / 6.0, 0.0, 0.25),
      ],
    );
    let mut expected = vec![control[0]];
    for row in epnp.alpha.iter() {
      let v = control
        .iter()
        .zip(row.iter())
        .fold(Vector3::zeros(), |acc, (c, &a)| acc + c * a as f64);
      expected.push(v);
    }

    let key_points: Vec<[f32; 2]> = expected.iter().map(|p| project(&camera, p)).collect();
    let lifted = lifter.lift(&key_points).unwrap();

    assert_eq!(lifted.len(), NUM_BOX_KEYPOINTS);
    for (got, want) in lifted.iter().zip(expected.iter()) {
      for axis in 0..3 {
        assert!(
          (got[axis] as f64 - want[axis]).abs() < 1e-3,
          "{:?} vs {:?}",
          got,
          want
        );
      }
    }
  }

  #[test]
  fn test_lifted_box_lies_in_front_of_camera() {
    let camera = CameraConfig::default();
    let epnp = EpnpConfig::default();
    let lifter = EpnpLifter::new(&camera, &epnp);
    let control = control_points(
      Vector3::new(-0.2, 0.15, -3.0),
      [
        Vector3::new(0.0, 0.35, 0.0),
        Vector3::new(0.4, 0.0, 0.0),
        Vector3::new(0.0, 0.0, 0.3),
      ],
    );
    let mut vertices = vec![control[0]];
    for row in epnp.alpha.iter() {
      vertices.push(
        control
          .iter()
          .zip(row.iter())
          .fold(Vector3::zeros(), |acc, (c, &a)| acc + c * a as f64),
      );
    }
    let key_points: Vec<[f32; 2]> = vertices.iter().map(|p| project(&camera, p)).collect();

    // 中心的符号由求解器修正，角点的深度只能来自正确的解
    for point in lifter.lift(&key_points).unwrap() {
      assert!(point[2] < 0.0, "{:?}", point);
    }
  }

  #[test]
  fn test_lift_rejects_non_finite_key_points() {
    let lifter = EpnpLifter::new(&CameraConfig::default(), &EpnpConfig::default());
    let mut key_points = vec![[0.5, 0.5]; NUM_BOX_KEYPOINTS];
    key_points[4] = [f32::NAN, 0.5];
    assert_eq!(lifter.lift(&key_points), Err(LiftError::NonFinite));
  }

  #[test]
  fn test_lift_rejects_partial_objects() {
    let lifter = EpnpLifter::new(&CameraConfig::default(), &EpnpConfig::default());
    let err = lifter.lift(&[[0.5, 0.5]; 5]).unwrap_err();
    assert_eq!(
      err,
      LiftError::KeypointCount {
        expected: 9,
        actual: 5
      }
    );
  }
}
