// 该文件是 Shanan （山南西风） 项目的一部分。
// src/config.rs - 检测器参数配置
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

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// 每个物体的角点数量（立方体 8 个顶点）
pub const NUM_CORNERS: usize = 8;
/// 中心点加 8 个角点
pub const NUM_BOX_KEYPOINTS: usize = NUM_CORNERS + 1;

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("配置文件读取错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("配置文件解析错误: {0}")]
  ParseError(#[from] serde_json::Error),
  #[error("配置参数 {key} 无效: {value}")]
  InvalidValue { key: String, value: String },
  #[error("未知的配置参数: {0}")]
  UnknownKey(String),
  #[error("配置校验失败: {0}")]
  Invalid(String),
}

impl ConfigError {
  fn invalid_value(key: &str, value: &str) -> Self {
    ConfigError::InvalidValue {
      key: key.to_string(),
      value: value.to_string(),
    }
  }
}

/// 热力图峰值提取与投票解码参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodeConfig {
  /// 关键点数量 K，偏移图通道数必须为 2K
  pub num_keypoints: usize,
  /// 局部极大值窗口半径，窗口大小为 2r+1
  pub local_max_distance: usize,
  /// 中心点激活阈值
  pub heatmap_threshold: f32,
  /// 投票窗口半径
  pub voting_radius: usize,
  /// 参与投票的最低热力图值
  pub voting_threshold: f32,
  /// 投票容差（像素，x/y 分别判断）
  pub voting_allowance: f32,
}

impl Default for DecodeConfig {
  fn default() -> Self {
    Self {
      num_keypoints: NUM_CORNERS,
      local_max_distance: 2,
      heatmap_threshold: 0.6,
      voting_radius: 2,
      voting_threshold: 0.2,
      voting_allowance: 1.0,
    }
  }
}

/// 相机投影矩阵（行主序 4x4）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
  pub projection: [[f32; 4]; 4],
}

impl Default for CameraConfig {
  fn default() -> Self {
    Self {
      projection: [
        [1.5731, 0.0, 0.0, 0.0],
        [0.0, 2.0975, 0.0, 0.0],
        [0.0, 0.0, -1.0002, -0.2],
        [0.0, 0.0, -1.0, 0.0],
      ],
    }
  }
}

impl CameraConfig {
  pub fn fx(&self) -> f32 {
    self.projection[0][0]
  }

  pub fn fy(&self) -> f32 {
    self.projection[1][1]
  }

  pub fn cx(&self) -> f32 {
    self.projection[0][2]
  }

  pub fn cy(&self) -> f32 {
    self.projection[1][2]
  }
}

/// EPnP 控制点权重，每行对应一个角点
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EpnpConfig {
  pub alpha: [[f32; 4]; NUM_CORNERS],
}

impl Default for EpnpConfig {
  fn default() -> Self {
    Self {
      alpha: [
        [4.0, -1.0, -1.0, -1.0],
        [2.0, -1.0, -1.0, 1.0],
        [2.0, -1.0, 1.0, -1.0],
        [0.0, -1.0, 1.0, 1.0],
        [2.0, 1.0, -1.0, -1.0],
        [0.0, 1.0, -1.0, 1.0],
        [0.0, 1.0, 1.0, -1.0],
        [-2.0, 1.0, 1.0, 1.0],
      ],
    }
  }
}

/// 立方体的 12 条边，按 x-y-z 轴分组，每轴 4 条
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoxTopology {
  pub edges: [[usize; 2]; 12],
}

impl Default for BoxTopology {
  fn default() -> Self {
    Self {
      edges: [
        [1, 5],
        [2, 6],
        [3, 7],
        [4, 8],
        [1, 3],
        [5, 7],
        [2, 4],
        [6, 8],
        [1, 2],
        [3, 4],
        [5, 6],
        [7, 8],
      ],
    }
  }
}

impl BoxTopology {
  pub const NUM_AXIS: usize = 3;
  pub const EDGES_PER_AXIS: usize = 4;

  pub fn axis_edges(&self, axis: usize) -> &[[usize; 2]] {
    let start = axis * Self::EDGES_PER_AXIS;
    &self.edges[start..start + Self::EDGES_PER_AXIS]
  }
}

/// 立方体姿态对齐方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoseAlignment {
  /// 刚体变换保持单位矩阵
  #[default]
  Identity,
  /// 以正交 Procrustes 方法将标准立方体对齐到提升后的顶点
  Procrustes,
}

impl std::str::FromStr for PoseAlignment {
  type Err = ConfigError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "identity" => Ok(PoseAlignment::Identity),
      "procrustes" => Ok(PoseAlignment::Procrustes),
      _ => Err(ConfigError::invalid_value("alignment", s)),
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
  pub decode: DecodeConfig,
  pub camera: CameraConfig,
  pub epnp: EpnpConfig,
  pub topology: BoxTopology,
  pub alignment: PoseAlignment,
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
  value
    .parse::<T>()
    .map_err(|_| ConfigError::invalid_value(key, value))
}

impl DetectorConfig {
  pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
    let path = path.as_ref();
    debug!("读取检测器配置: {}", path.display());
    let text = std::fs::read_to_string(path)?;
    let config = serde_json::from_str(&text)?;
    Ok(config)
  }

  /// 以 `key=value` 形式覆盖单个参数（来自 URL 查询串）
  pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
    let decode = &mut self.decode;
    match key {
      "num_keypoints" => decode.num_keypoints = parse_value(key, value)?,
      "local_max_distance" => decode.local_max_distance = parse_value(key, value)?,
      "heatmap_threshold" => decode.heatmap_threshold = parse_value(key, value)?,
      "voting_radius" => decode.voting_radius = parse_value(key, value)?,
      "voting_threshold" => decode.voting_threshold = parse_value(key, value)?,
      "voting_allowance" => decode.voting_allowance = parse_value(key, value)?,
      "alignment" => self.alignment = value.parse()?,
      _ => return Err(ConfigError::UnknownKey(key.to_string())),
    }
    debug!("覆盖配置参数 {} = {}", key, value);
    Ok(())
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    let decode = &self.decode;
    if decode.num_keypoints == 0 {
      return Err(ConfigError::Invalid("关键点数量必须大于 0".into()));
    }
    for (name, value) in [
      ("heatmap_threshold", decode.heatmap_threshold),
      ("voting_threshold", decode.voting_threshold),
      ("voting_allowance", decode.voting_allowance),
    ] {
      if !value.is_finite() || value < 0.0 {
        return Err(ConfigError::Invalid(format!(
          "{} 必须为非负有限值, 实际为 {}",
          name, value
        )));
      }
    }

    if self.camera.projection.iter().flatten().any(|v| !v.is_finite()) {
      return Err(ConfigError::Invalid("投影矩阵包含非有限值".into()));
    }
    if self.camera.fx() == 0.0 || self.camera.fy() == 0.0 {
      return Err(ConfigError::Invalid("相机焦距不能为 0".into()));
    }

    if self.epnp.alpha.iter().flatten().any(|v| !v.is_finite()) {
      return Err(ConfigError::Invalid("EPnP 权重包含非有限值".into()));
    }

    for edge in self.topology.edges.iter() {
      let valid = |i: usize| (1..=NUM_CORNERS).contains(&i);
      if !valid(edge[0]) || !valid(edge[1]) || edge[0] == edge[1] {
        return Err(ConfigError::Invalid(format!("立方体边 {:?} 无效", edge)));
      }
    }

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_default_config_is_valid() {
    let config = DetectorConfig::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.camera.fx(), 1.5731);
    assert_eq!(config.camera.fy(), 2.0975);
    assert_eq!(config.topology.axis_edges(2), &[[1, 2], [3, 4], [5, 6], [7, 8]]);
  }

  #[test]
  fn test_partial_json_keeps_defaults() {
    let json = r#"{ "decode": { "heatmap_threshold": 0.5 }, "alignment": "procrustes" }"#;
    let config: DetectorConfig = serde_json::from_str(json).unwrap();
    assert_eq!(config.decode.heatmap_threshold, 0.5);
    assert_eq!(config.decode.voting_radius, 2);
    assert_eq!(config.alignment, PoseAlignment::Procrustes);
    assert_eq!(config.epnp, EpnpConfig::default());
  }

  #[test]
  fn test_set_overrides_and_rejects() {
    let mut config = DetectorConfig::default();
    config.set("voting_radius", "3").unwrap();
    assert_eq!(config.decode.voting_radius, 3);
    assert!(matches!(
      config.set("voting_radius", "abc"),
      Err(ConfigError::InvalidValue { .. })
    ));
    assert!(matches!(
      config.set("no_such_key", "1"),
      Err(ConfigError::UnknownKey(_))
    ));
  }

  #[test]
  fn test_validate_rejects_bad_edge() {
    let mut config = DetectorConfig::default();
    config.topology.edges[0] = [0, 5];
    assert!(config.validate().is_err());
  }
}
