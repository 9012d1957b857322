// 该文件是 Shanan （山南西风） 项目的一部分。
// src/input/read_tensor_file.rs - 张量文件输入
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

use std::{
  fs,
  path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::{debug, error};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  tensor::{OutputTensors, TensorError, TensorFileRecord},
};

#[derive(Error, Debug)]
pub enum TensorFileInputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 解析错误: {0}")]
  ParseError(#[from] serde_json::Error),
  #[error("张量数据错误: {0}")]
  TensorError(#[from] TensorError),
  #[error("目录中没有张量文件: {0}")]
  EmptyDirectory(PathBuf),
}

/// 读取单个 JSON 文件或目录下按文件名排序的全部 `.json` 文件
pub struct TensorFileInput {
  files: Vec<PathBuf>,
}

impl TensorFileInput {
  pub fn new(path: impl AsRef<Path>) -> Result<Self, TensorFileInputError> {
    let path = path.as_ref();
    if !path.is_dir() {
      // 提前暴露不存在的路径
      fs::metadata(path)?;
      return Ok(Self {
        files: vec![path.to_path_buf()],
      });
    }

    let mut files = Vec::new();
    for entry in fs::read_dir(path)? {
      let file = entry?.path();
      if file.is_file() && file.extension().is_some_and(|ext| ext == "json") {
        files.push(file);
      }
    }
    if files.is_empty() {
      return Err(TensorFileInputError::EmptyDirectory(path.to_path_buf()));
    }
    files.sort();
    debug!("在 {} 中找到 {} 个张量文件", path.display(), files.len());
    Ok(Self { files })
  }

  pub fn len(&self) -> usize {
    self.files.len()
  }

  pub fn is_empty(&self) -> bool {
    self.files.is_empty()
  }
}

pub fn read_tensor_file(path: &Path) -> Result<OutputTensors, TensorFileInputError> {
  let content = fs::read_to_string(path)?;
  let record: TensorFileRecord = serde_json::from_str(&content)?;
  Ok(record.try_into()?)
}

impl FromUrl for TensorFileInput {
  type Error = TensorFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(TensorFileInputError::SchemeMismatch);
    }

    Self::new(url.path())
  }
}

impl FromUrlWithScheme for TensorFileInput {
  const SCHEME: &'static str = "tensor";
}

impl IntoIterator for TensorFileInput {
  type Item = OutputTensors;
  type IntoIter = TensorFileInputIter;

  fn into_iter(self) -> Self::IntoIter {
    TensorFileInputIter {
      files: self.files.into_iter(),
    }
  }
}

pub struct TensorFileInputIter {
  files: std::vec::IntoIter<PathBuf>,
}

impl Iterator for TensorFileInputIter {
  type Item = OutputTensors;

  fn next(&mut self) -> Option<Self::Item> {
    for path in self.files.by_ref() {
      match read_tensor_file(&path) {
        Ok(tensors) => return Some(tensors),
        Err(e) => error!("读取张量文件 {} 失败: {}", path.display(), e),
      }
    }
    None
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::tensor::Tensor;
  use tempfile::tempdir;

  fn sample(value: f32) -> OutputTensors {
    let mut heatmap = Tensor::zeros([1, 1, 2, 3]);
    heatmap.set(0, 1, 2, value);
    OutputTensors::new(heatmap, Tensor::zeros([1, 16, 2, 3]))
  }

  fn write_sample(path: &Path, value: f32) {
    let record = TensorFileRecord::from(&sample(value));
    fs::write(path, serde_json::to_string(&record).unwrap()).unwrap();
  }

  #[test]
  fn test_single_file() {
    let dir = tempdir().unwrap();
    let file = dir.path().join("frame.json");
    write_sample(&file, 0.75);

    let url = Url::parse(&format!("tensor://{}", file.display())).unwrap();
    let frames: Vec<_> = TensorFileInput::from_url(&url).unwrap().into_iter().collect();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].heatmap.view().at(0, 1, 2), 0.75);
    assert_eq!(frames[0].offsetmap.channels(), 16);
  }

  #[test]
  fn test_directory_is_sorted_and_bad_files_are_skipped() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    write_sample(&root.join("002.json"), 0.2);
    write_sample(&root.join("000.json"), 0.0);
    fs::write(root.join("001.json"), "{ not json").unwrap();
    fs::write(root.join("readme.txt"), "ignored").unwrap();

    let input = TensorFileInput::new(root).unwrap();
    assert_eq!(input.len(), 3);
    let values: Vec<f32> = input
      .into_iter()
      .map(|t| t.heatmap.view().at(0, 1, 2))
      .collect();
    assert_eq!(values, vec![0.0, 0.2]);
  }

  #[test]
  fn test_empty_directory_is_rejected() {
    let dir = tempdir().unwrap();
    assert!(matches!(
      TensorFileInput::new(dir.path()),
      Err(TensorFileInputError::EmptyDirectory(_))
    ));
  }

  #[test]
  fn test_length_mismatch_is_rejected() {
    let record = r#"{
      "heatmap": {"shape": [1, 1, 2, 2], "data": [0.0, 1.0, 2.0]},
      "offsetmap": {"shape": [1, 16, 1, 1], "data": []}
    }"#;
    let parsed: TensorFileRecord = serde_json::from_str(record).unwrap();
    assert!(OutputTensors::try_from(parsed).is_err());
  }

  #[test]
  fn test_scheme_mismatch() {
    let url = Url::parse("image:///tmp/a.png").unwrap();
    assert!(matches!(
      TensorFileInput::from_url(&url),
      Err(TensorFileInputError::SchemeMismatch)
    ));
  }

  #[test]
  fn test_missing_path() {
    assert!(matches!(
      TensorFileInput::new("/nonexistent/shanan-box3d/frame.json"),
      Err(TensorFileInputError::IoError(_))
    ));
  }
}
