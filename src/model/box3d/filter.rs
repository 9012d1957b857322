// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/box3d/filter.rs - 关键点时域平滑接口
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

use crate::model::ObjectInfo;

/// 外部的关键点平滑滤波器（例如速度滤波器）
///
/// 每帧调用一次，在三维提升之前修改二维关键点；滤波器自行维护历史状态。
pub trait LandmarkFilter {
  fn apply(&mut self, objects: &mut [ObjectInfo]);

  /// 丢弃历史状态，例如输入源切换时
  fn reset(&mut self) {}
}

/// 不做任何平滑
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThrough;

impl LandmarkFilter for PassThrough {
  fn apply(&mut self, _objects: &mut [ObjectInfo]) {}
}
