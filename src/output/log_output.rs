// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/log_output.rs - 日志输出
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

use std::convert::Infallible;

use tracing::info;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{DetectResult, ObjectInfo},
  output::Render,
  tensor::OutputTensors,
};

/// 将检测结果打印到日志，`log://?verbose` 时额外打印三维角点
#[derive(Debug, Clone, Default)]
pub struct LogOutput {
  verbose: bool,
}

#[derive(Debug)]
pub struct LogOutputSchemeMismatch;

impl FromUrlWithScheme for LogOutput {
  const SCHEME: &'static str = "log";
}

impl FromUrl for LogOutput {
  type Error = LogOutputSchemeMismatch;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(LogOutputSchemeMismatch);
    }
    let verbose = url.query_pairs().any(|(k, _)| k == "verbose");
    Ok(LogOutput { verbose })
  }
}

fn describe(object: &ObjectInfo) -> String {
  let [w, h, d] = object.box_half_extents;
  format!(
    "score {:.3}, 外接矩形 ({:.4}, {:.4}, {:.4}, {:.4}), 半边长 ({:.4}, {:.4}, {:.4})",
    object.score, object.x1, object.y1, object.x2, object.y2, w, h, d
  )
}

impl Render<OutputTensors, DetectResult> for LogOutput {
  type Error = Infallible;

  fn render_result(&self, _frame: &OutputTensors, result: &DetectResult) -> Result<(), Self::Error> {
    info!("检测到 {} 个物体", result.len());
    for (i, object) in result.iter().enumerate() {
      info!("#{}: {}", i, describe(object));
      if self.verbose {
        info!("#{} 三维关键点: {:?}", i, object.key_points_3d);
      }
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_verbose_query() {
    let url = url::Url::parse("log://?verbose").unwrap();
    assert!(LogOutput::from_url(&url).unwrap().verbose);
    let url = url::Url::parse("log://").unwrap();
    assert!(!LogOutput::from_url(&url).unwrap().verbose);
    let url = url::Url::parse("folder:///tmp").unwrap();
    assert!(LogOutput::from_url(&url).is_err());
  }

  #[test]
  fn test_describe_mentions_extents() {
    let object = ObjectInfo {
      score: 0.9,
      box_half_extents: [0.5, 1.0, 1.5],
      ..Default::default()
    };
    let text = describe(&object);
    assert!(text.contains("0.900"));
    assert!(text.contains("1.5000"));
  }
}
