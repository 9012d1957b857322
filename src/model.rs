// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model.rs - 解码器与检测结果
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

use serde::Serialize;

/// 将一帧推理输出解码为检测结果
pub trait Decoder {
  type Input;
  type Output;
  type Error;

  fn decode(&mut self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

/// 将结果映射到显示区域时的缩放方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ViewGravity {
  /// 两个方向独立拉伸
  Resize,
  /// 保持比例完整放入，可能留白
  Fit,
  /// 保持比例铺满，可能裁切
  #[default]
  Fill,
}

/// 单个 3D 物体检测结果
///
/// `key_points` 与 `key_points_3d` 长度一致，下标 0 为中心点，其余为立方体角点。
/// 未调整尺寸前，二维坐标归一化到 [0, 1]。
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ObjectInfo {
  pub image_width: u32,
  pub image_height: u32,

  pub x1: f32,
  pub y1: f32,
  pub x2: f32,
  pub y2: f32,

  pub key_points: Vec<[f32; 2]>,
  pub key_points_3d: Vec<[f32; 3]>,

  /// 立方体沿三个轴的半边长
  pub box_half_extents: [f32; 3],
  /// 拟合后的立方体关键点（中心 + 8 个角点）
  pub box_corners: Vec<[f32; 3]>,
  /// 拟合立方体重投影后的二维坐标，退化点为 `None`
  pub projected_points: Vec<Option<[f32; 2]>>,

  pub score: f32,
  pub class_id: i32,
}

impl ObjectInfo {
  pub fn center(&self) -> Option<[f32; 2]> {
    self.key_points.first().copied()
  }

  /// 由二维关键点计算外接矩形
  pub fn compute_bounding_rect(&mut self) {
    let mut left = f32::MAX;
    let mut top = f32::MAX;
    let mut right = f32::MIN;
    let mut bottom = f32::MIN;
    for &[x, y] in self.key_points.iter() {
      left = left.min(x);
      right = right.max(x);
      top = top.min(y);
      bottom = bottom.max(y);
    }
    if self.key_points.is_empty() {
      (left, top, right, bottom) = (0.0, 0.0, 0.0, 0.0);
    }
    self.x1 = left;
    self.y1 = top;
    self.x2 = right;
    self.y2 = bottom;
  }

  fn map_points_2d<F: Fn([f32; 2]) -> [f32; 2]>(&self, f: F) -> Self {
    let mut object = self.clone();
    object.key_points = self.key_points.iter().map(|&p| f(p)).collect();
    object.projected_points = self
      .projected_points
      .iter()
      .map(|p| p.map(&f))
      .collect();
    let [x1, y1] = f([self.x1, self.y1]);
    let [x2, y2] = f([self.x2, self.y2]);
    object.x1 = x1.min(x2);
    object.x2 = x1.max(x2);
    object.y1 = y1.min(y2);
    object.y2 = y1.max(y2);
    object
  }

  /// 将二维坐标缩放到指定图像尺寸；尺寸为 0 时视为归一化坐标
  pub fn adjust_to_image_size(&self, image_height: u32, image_width: u32) -> Self {
    let scale_x = if self.image_width > 0 {
      image_width as f32 / self.image_width as f32
    } else {
      image_width as f32
    };
    let scale_y = if self.image_height > 0 {
      image_height as f32 / self.image_height as f32
    } else {
      image_height as f32
    };

    let mut object = self.map_points_2d(|[x, y]| [x * scale_x, y * scale_y]);
    object.image_width = image_width;
    object.image_height = image_height;
    object
  }

  /// 将图像坐标映射到显示区域；图像尺寸未知时按 [`ViewGravity::Resize`] 处理
  pub fn adjust_to_view_size(
    &self,
    view_height: u32,
    view_width: u32,
    gravity: ViewGravity,
  ) -> Self {
    if self.image_width == 0 || self.image_height == 0 || gravity == ViewGravity::Resize {
      return self.adjust_to_image_size(view_height, view_width);
    }

    let (image_w, image_h) = (self.image_width as f32, self.image_height as f32);
    let (view_w, view_h) = (view_width as f32, view_height as f32);
    let scale = match gravity {
      ViewGravity::Fit => (view_w / image_w).min(view_h / image_h),
      _ => (view_w / image_w).max(view_h / image_h),
    };
    let offset_x = (view_w - image_w * scale) / 2.0;
    let offset_y = (view_h - image_h * scale) / 2.0;

    let mut object = self.map_points_2d(|[x, y]| [x * scale + offset_x, y * scale + offset_y]);
    object.image_width = view_width;
    object.image_height = view_height;
    object
  }

  /// 水平翻转
  pub fn flip_x(&self) -> Self {
    let width = if self.image_width > 0 {
      self.image_width as f32
    } else {
      1.0
    };
    self.map_points_2d(|[x, y]| [width - x, y])
  }

  pub fn add_offset(&self, offset_x: f32, offset_y: f32) -> Self {
    self.map_points_2d(|[x, y]| [x + offset_x, y + offset_y])
  }

  fn area(&self) -> f32 {
    (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
  }

  /// 两个外接矩形的交并比
  pub fn intersection_ratio(&self, other: &ObjectInfo) -> f32 {
    let x1 = self.x1.max(other.x1);
    let y1 = self.y1.max(other.y1);
    let x2 = self.x2.min(other.x2);
    let y2 = self.y2.min(other.y2);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = self.area() + other.area() - intersection;

    if union > 0.0 {
      intersection / union
    } else {
      0.0
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DetectResult {
  pub items: Box<[ObjectInfo]>,
}

impl DetectResult {
  pub fn empty() -> Self {
    Self::default()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn iter(&self) -> std::slice::Iter<'_, ObjectInfo> {
    self.items.iter()
  }
}

impl From<Vec<ObjectInfo>> for DetectResult {
  fn from(items: Vec<ObjectInfo>) -> Self {
    Self {
      items: items.into_boxed_slice(),
    }
  }
}

mod box3d;
pub use self::box3d::{
  BeliefBox, BoxFit, BoxFitter, Box3dDetector, Box3dDetectorBuilder, Box3dError, CandidatePoint,
  EpnpLifter, KeypointRefiner, LandmarkFilter, LiftError, MaxPoolPeaks, PassThrough,
  PeakExtractor, PoseLifter, Reprojector, VotingRefiner, merge_or_push,
};
