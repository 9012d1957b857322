// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/box3d/dedup.rs - 重复检测框合并
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

use super::BeliefBox;

/// 除中心点外，所有角点在 x/y 上的差都不超过 `allowance` 时视为同一物体
fn is_identical(a: &BeliefBox, b: &BeliefBox, allowance: f32) -> bool {
  a.points.len() == b.points.len()
    && a
      .points
      .iter()
      .zip(b.points.iter())
      .skip(1)
      .all(|(p, q)| (p[0] - q[0]).abs() <= allowance && (p[1] - q[1]).abs() <= allowance)
}

/// 将候选框并入已有列表
///
/// 与已有框重复时保留置信度更高的那一个（原地替换），返回 `false`；
/// 否则追加到列表末尾并返回 `true`。
pub fn merge_or_push(boxes: &mut Vec<BeliefBox>, candidate: BeliefBox, allowance: f32) -> bool {
  for existing in boxes.iter_mut() {
    if is_identical(existing, &candidate, allowance) {
      if existing.belief < candidate.belief {
        *existing = candidate;
      }
      return false;
    }
  }
  boxes.push(candidate);
  true
}

#[cfg(test)]
mod tests {
  use super::*;

  fn belief_box(belief: f32, center: [f32; 2], shift: f32) -> BeliefBox {
    let mut points = vec![center];
    for i in 0..8 {
      points.push([i as f32 * 2.0 + shift, 10.0 - i as f32 + shift]);
    }
    BeliefBox { belief, points }
  }

  #[test]
  fn test_duplicates_keep_higher_belief_in_any_order() {
    let weak = belief_box(0.7, [5.0, 5.0], 0.0);
    let strong = belief_box(0.9, [6.0, 5.0], 0.8);

    let mut forward = Vec::new();
    assert!(merge_or_push(&mut forward, weak.clone(), 1.0));
    assert!(!merge_or_push(&mut forward, strong.clone(), 1.0));

    let mut backward = Vec::new();
    assert!(merge_or_push(&mut backward, strong.clone(), 1.0));
    assert!(!merge_or_push(&mut backward, weak, 1.0));

    assert_eq!(forward, vec![strong.clone()]);
    assert_eq!(backward, vec![strong]);
  }

  #[test]
  fn test_center_is_not_compared() {
    let a = belief_box(0.7, [0.0, 0.0], 0.0);
    let b = belief_box(0.8, [20.0, 20.0], 0.0);
    let mut boxes = vec![a];
    assert!(!merge_or_push(&mut boxes, b, 1.0));
    assert_eq!(boxes.len(), 1);
    assert_eq!(boxes[0].belief, 0.8);
  }

  #[test]
  fn test_distinct_boxes_are_appended() {
    let a = belief_box(0.7, [5.0, 5.0], 0.0);
    let b = belief_box(0.8, [5.0, 5.0], 1.5);
    let mut boxes = vec![a];
    assert!(merge_or_push(&mut boxes, b, 1.0));
    assert_eq!(boxes.len(), 2);
  }
}
