// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/box3d/voting.rs - 基于邻域投票的关键点回归
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

use crate::tensor::TensorView;

use super::{Box3dError, CandidatePoint};

/// 一个检测假设：置信度 + 热力图像素坐标下的关键点（下标 0 为中心）
#[derive(Debug, Clone, PartialEq)]
pub struct BeliefBox {
  pub belief: f32,
  pub points: Vec<[f32; 2]>,
}

pub trait KeypointRefiner {
  fn refine(
    &self,
    heatmap: &TensorView<'_>,
    offsetmap: &TensorView<'_>,
    center: &CandidatePoint,
  ) -> Result<BeliefBox, Box3dError>;
}

#[derive(Debug, Clone)]
pub struct VotingRefiner {
  radius: usize,
  threshold: f32,
  allowance: f32,
}

impl VotingRefiner {
  pub fn new(radius: usize, threshold: f32, allowance: f32) -> Self {
    Self {
      radius,
      threshold,
      allowance,
    }
  }
}

impl KeypointRefiner for VotingRefiner {
  /// 调用方保证两张图空间尺寸一致、偏移图通道数为偶数、中心点在图内
  fn refine(
    &self,
    heatmap: &TensorView<'_>,
    offsetmap: &TensorView<'_>,
    center: &CandidatePoint,
  ) -> Result<BeliefBox, Box3dError> {
    let (height, width) = (heatmap.height(), heatmap.width());
    let offset_scale = height.min(width) as f32;
    let num_keypoints = offsetmap.channels() / 2;
    let heat = heatmap.plane(0);

    let (cx, cy) = (center.x, center.y);
    let center_idx = cy * width + cx;

    let x_min = cx.saturating_sub(self.radius);
    let x_max = (cx + self.radius).min(width - 1);
    let y_min = cy.saturating_sub(self.radius);
    let y_max = (cy + self.radius).min(height - 1);

    let mut points = Vec::with_capacity(num_keypoints + 1);
    points.push([cx as f32, cy as f32]);

    for k in 0..num_keypoints {
      let offset_x = offsetmap.plane(2 * k);
      let offset_y = offsetmap.plane(2 * k + 1);

      // 中心像素自身预测的位置
      let center_vote_x = cx as f32 + offset_x[center_idx] * offset_scale;
      let center_vote_y = cy as f32 + offset_y[center_idx] * offset_scale;

      let mut x_sum = 0f32;
      let mut y_sum = 0f32;
      let mut votes = 0f32;
      for y in y_min..=y_max {
        for x in x_min..=x_max {
          let idx = y * width + x;
          let belief = heat[idx];
          if belief.is_nan() || belief < self.threshold {
            continue;
          }
          let vote_x = x as f32 + offset_x[idx] * offset_scale;
          let vote_y = y as f32 + offset_y[idx] * offset_scale;
          let within = (vote_x - center_vote_x).abs() <= self.allowance
            && (vote_y - center_vote_y).abs() <= self.allowance;
          if !within {
            continue;
          }
          x_sum += vote_x * belief;
          y_sum += vote_y * belief;
          votes += belief;
        }
      }

      if votes <= 0.0 || !votes.is_finite() {
        return Err(Box3dError::DegenerateVote {
          keypoint: k + 1,
          x: cx,
          y: cy,
        });
      }
      points.push([x_sum / votes, y_sum / votes]);
    }

    Ok(BeliefBox {
      belief: center.belief,
      points,
    })
  }
}
