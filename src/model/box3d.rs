// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/box3d.rs - 单目 3D 立方体检测后处理
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

use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  config::{ConfigError, DetectorConfig, NUM_CORNERS},
  model::{Decoder, DetectResult, ObjectInfo},
  tensor::{OutputTensors, TensorView},
};

mod box_fit;
mod dedup;
mod filter;
mod lift;
mod peak;
mod reproject;
mod voting;

pub use self::box_fit::{BoxFit, BoxFitter};
pub use self::dedup::merge_or_push;
pub use self::filter::{LandmarkFilter, PassThrough};
pub use self::lift::{EpnpLifter, LiftError, PoseLifter};
pub use self::peak::{CandidatePoint, MaxPoolPeaks, PeakExtractor};
pub use self::reproject::Reprojector;
pub use self::voting::{BeliefBox, KeypointRefiner, VotingRefiner};

#[derive(Error, Debug)]
pub enum Box3dError {
  #[error("热力图与偏移图尺寸不一致: 热力图 {heatmap:?}, 偏移图 {offsetmap:?}")]
  ShapeMismatch {
    heatmap: [usize; 4],
    offsetmap: [usize; 4],
  },
  #[error("通道数不匹配: {name} 期望 {expected}, 实际 {actual}")]
  ChannelMismatch {
    name: &'static str,
    expected: usize,
    actual: usize,
  },
  #[error("关键点 {keypoint} 在中心 ({x}, {y}) 处没有有效投票")]
  DegenerateVote { keypoint: usize, x: usize, y: usize },
  #[error("关键点数量错误: 期望 {expected}, 实际 {actual}")]
  KeypointCount { expected: usize, actual: usize },
  #[error("三维提升失败: {0}")]
  LiftError(#[from] LiftError),
  #[error("配置错误: {0}")]
  ConfigError(#[from] ConfigError),
  #[error("检测器路径必须使用 {0} 方案")]
  SchemeMismatch(&'static str),
}

impl Box3dError {
  /// 整帧被跳过的错误（输入张量不合法）
  pub fn is_frame_skip(&self) -> bool {
    matches!(
      self,
      Box3dError::ShapeMismatch { .. } | Box3dError::ChannelMismatch { .. }
    )
  }
}

const BOX3D_SCHEME: &str = "box3d";

pub struct Box3dDetectorBuilder {
  config: DetectorConfig,
  filter: Option<Box<dyn LandmarkFilter>>,
}

impl Default for Box3dDetectorBuilder {
  fn default() -> Self {
    Self {
      config: DetectorConfig::default(),
      filter: None,
    }
  }
}

impl FromUrlWithScheme for Box3dDetectorBuilder {
  const SCHEME: &'static str = BOX3D_SCHEME;
}

impl FromUrl for Box3dDetectorBuilder {
  type Error = Box3dError;

  /// `box3d:///path/to/config.json?heatmap_threshold=0.5`，路径为空时使用默认参数
  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != BOX3D_SCHEME {
      return Err(Box3dError::SchemeMismatch(BOX3D_SCHEME));
    }

    let path = url.path();
    let mut config = if path.is_empty() || path == "/" {
      DetectorConfig::default()
    } else {
      info!("加载检测器配置文件: {}", path);
      DetectorConfig::from_json_file(path)?
    };

    for (key, value) in url.query_pairs() {
      config.set(&key, &value)?;
    }

    Ok(Box3dDetectorBuilder {
      config,
      filter: None,
    })
  }
}

impl Box3dDetectorBuilder {
  pub fn config(mut self, config: DetectorConfig) -> Self {
    self.config = config;
    self
  }

  pub fn filter<F: LandmarkFilter + 'static>(mut self, filter: F) -> Self {
    self.filter = Some(Box::new(filter));
    self
  }

  pub fn build(self) -> Result<Box3dDetector, Box3dError> {
    self.config.validate()?;
    let config = self.config;
    debug!("检测器配置: {:?}", config);

    let decode = &config.decode;
    let peaks = Box::new(MaxPoolPeaks::new(
      decode.local_max_distance,
      decode.heatmap_threshold,
    ));
    let refiner = Box::new(VotingRefiner::new(
      decode.voting_radius,
      decode.voting_threshold,
      decode.voting_allowance,
    ));
    let lifter = Box::new(EpnpLifter::new(&config.camera, &config.epnp));
    let fitter = BoxFitter::new(&config.topology, config.alignment);
    let reprojector = Reprojector::new(&config.camera);
    let filter = self.filter.unwrap_or_else(|| Box::new(PassThrough));

    info!(
      "3D 检测器就绪: 关键点 {} 个, 姿态对齐 {:?}",
      decode.num_keypoints, config.alignment
    );

    Ok(Box3dDetector {
      config,
      peaks,
      refiner,
      lifter,
      fitter,
      reprojector,
      filter,
    })
  }
}

/// 由热力图与偏移图解码 3D 立方体
///
/// 各阶段在构建时选定，之后每帧按顺序执行：
/// 峰值提取 → 投票回归 → 去重 → 平滑 → 三维提升 → 立方体拟合 → 重投影。
pub struct Box3dDetector {
  config: DetectorConfig,
  peaks: Box<dyn PeakExtractor>,
  refiner: Box<dyn KeypointRefiner>,
  lifter: Box<dyn PoseLifter>,
  fitter: BoxFitter,
  reprojector: Reprojector,
  filter: Box<dyn LandmarkFilter>,
}

impl Box3dDetector {
  pub fn builder() -> Box3dDetectorBuilder {
    Box3dDetectorBuilder::default()
  }

  pub fn config(&self) -> &DetectorConfig {
    &self.config
  }

  fn check_shapes(
    &self,
    heatmap: &TensorView<'_>,
    offsetmap: &TensorView<'_>,
  ) -> Result<(), Box3dError> {
    let expected_offsets = 2 * self.config.decode.num_keypoints;
    if heatmap.channels() != 1 {
      return Err(Box3dError::ChannelMismatch {
        name: "heatmap",
        expected: 1,
        actual: heatmap.channels(),
      });
    }
    if offsetmap.channels() != expected_offsets {
      return Err(Box3dError::ChannelMismatch {
        name: "offsetmap",
        expected: expected_offsets,
        actual: offsetmap.channels(),
      });
    }
    if heatmap.batch() != 1
      || offsetmap.batch() != 1
      || heatmap.height() != offsetmap.height()
      || heatmap.width() != offsetmap.width()
      || heatmap.height() == 0
      || heatmap.width() == 0
    {
      return Err(Box3dError::ShapeMismatch {
        heatmap: heatmap.shape(),
        offsetmap: offsetmap.shape(),
      });
    }
    Ok(())
  }

  /// 峰值提取、投票回归与去重，返回热力图像素坐标下的检测框
  pub fn decode_belief_boxes(
    &self,
    heatmap: &TensorView<'_>,
    offsetmap: &TensorView<'_>,
  ) -> Result<Vec<BeliefBox>, Box3dError> {
    self.check_shapes(heatmap, offsetmap)?;

    let allowance = self.config.decode.voting_allowance;
    let mut boxes = Vec::new();
    for center in self.peaks.extract(heatmap) {
      match self.refiner.refine(heatmap, offsetmap, &center) {
        Ok(candidate) => {
          if !merge_or_push(&mut boxes, candidate, allowance) {
            debug!("中心 ({}, {}) 与已有检测框重复", center.x, center.y);
          }
        }
        Err(e) => warn!("丢弃检测框: {}", e),
      }
    }
    Ok(boxes)
  }

  fn lift_object(&self, object: &mut ObjectInfo) -> Result<(), Box3dError> {
    object.key_points_3d = self.lifter.lift(&object.key_points)?;
    let fit = self.fitter.fit(&object.key_points_3d)?;
    object.box_half_extents = [fit.half_extents.x, fit.half_extents.y, fit.half_extents.z];
    object.box_corners = fit.corners_array();
    object.projected_points = self.reprojector.project(&object.box_corners);
    Ok(())
  }

  /// 解码一帧；输入张量形状不合法时返回整帧错误，单个物体的失败只会跳过该物体
  pub fn detect(
    &mut self,
    heatmap: &TensorView<'_>,
    offsetmap: &TensorView<'_>,
  ) -> Result<DetectResult, Box3dError> {
    let boxes = self.decode_belief_boxes(heatmap, offsetmap)?;
    debug!("去重后剩余 {} 个检测框", boxes.len());

    let x_scale = 1.0 / offsetmap.width() as f32;
    let y_scale = 1.0 / offsetmap.height() as f32;
    let mut objects: Vec<ObjectInfo> = boxes
      .into_iter()
      .map(|b| ObjectInfo {
        key_points: b
          .points
          .iter()
          .map(|&[x, y]| [x * x_scale, y * y_scale])
          .collect(),
        score: b.belief,
        class_id: 0,
        ..Default::default()
      })
      .collect();

    self.filter.apply(&mut objects);

    let lift = self.config.decode.num_keypoints == NUM_CORNERS;
    let mut items = Vec::with_capacity(objects.len());
    for mut object in objects {
      object.compute_bounding_rect();
      if !lift {
        // 非立方体关键点布局只输出二维结果
        items.push(object);
        continue;
      }
      match self.lift_object(&mut object) {
        Ok(()) => items.push(object),
        Err(e) => warn!("跳过物体 (置信度 {:.2}): {}", object.score, e),
      }
    }

    debug!("检测到 {} 个物体", items.len());
    Ok(DetectResult::from(items))
  }

  pub fn reset(&mut self) {
    self.filter.reset();
  }
}

impl Decoder for Box3dDetector {
  type Input = OutputTensors;
  type Output = DetectResult;
  type Error = Box3dError;

  fn decode(&mut self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    match self.detect(&input.heatmap.view(), &input.offsetmap.view()) {
      Err(e) if e.is_frame_skip() => {
        warn!("跳过当前帧: {}", e);
        Ok(DetectResult::empty())
      }
      result => result,
    }
  }
}
