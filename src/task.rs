// 该文件是 Shanan （山南西风） 项目的一部分。
// src/task.rs - 解码任务循环
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
  sync::mpsc::{self, Receiver},
  thread,
  time::{Duration, Instant},
};
use tracing::{debug, info, warn};

use crate::{model::Decoder, output::Render};

pub trait Task<I, M, O>: Sized {
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<(), Self::Error>;
}

/// 单帧的解码与输出耗时
#[derive(Debug, Clone, Copy)]
struct StepTiming {
  decode: Duration,
  render: Duration,
}

fn step<F, D, M, O>(model: &mut M, output: &O, frame: &F) -> anyhow::Result<StepTiming>
where
  M: Decoder<Input = F, Output = D>,
  M::Error: std::error::Error + Sync + Send + 'static,
  O: Render<F, D>,
  O::Error: std::error::Error + Sync + Send + 'static,
{
  let start = Instant::now();
  let result = model.decode(frame)?;
  let decode = start.elapsed();
  output.render_result(frame, &result)?;
  Ok(StepTiming {
    decode,
    render: start.elapsed() - decode,
  })
}

/// 解码耗时统计，前 `warmup` 帧不计入
#[derive(Debug, Default)]
struct TimingStats {
  warmup: usize,
  frames: usize,
  total: Duration,
  max: Duration,
}

impl TimingStats {
  fn with_warmup(warmup: usize) -> Self {
    Self {
      warmup,
      ..Default::default()
    }
  }

  fn record(&mut self, timing: StepTiming) {
    self.frames += 1;
    if self.frames > self.warmup {
      self.total += timing.decode;
      self.max = self.max.max(timing.decode);
    }
  }

  fn counted(&self) -> usize {
    self.frames.saturating_sub(self.warmup)
  }

  fn mean(&self) -> Option<Duration> {
    let counted = u32::try_from(self.counted()).ok().filter(|&n| n > 0)?;
    Some(self.total / counted)
  }

  fn report(&self) {
    match self.mean() {
      Some(mean) => warn!(
        "共 {} 帧, 平均解码时间: {:.2?}, 最长: {:.2?}",
        self.frames, mean, self.max
      ),
      None => warn!("帧数不足 {} 帧, 不统计平均解码时间", self.warmup + 1),
    }
  }
}

pub struct OneShotTask;

impl<F, D, I, M, O> Task<I, M, O> for OneShotTask
where
  I: Iterator<Item = F>,
  M: Decoder<Input = F, Output = D>,
  M::Error: std::error::Error + Sync + Send + 'static,
  O: Render<F, D>,
  O::Error: std::error::Error + Sync + Send + 'static,
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, mut model: M, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    let timing = step(&mut model, &output, &frame)?;
    info!(
      "解码耗时: {:.2?}, 输出耗时: {:.2?}",
      timing.decode, timing.render
    );
    Ok(())
  }
}

/// 反复解码同一帧，用于测量解码器本身的耗时
pub struct RepeatShotTask {
  repeat_times: usize,
}

impl Default for RepeatShotTask {
  fn default() -> Self {
    Self { repeat_times: 1000 }
  }
}

impl RepeatShotTask {
  const WARMUP: usize = 2;

  pub fn with_repeat_times(mut self, repeat_times: usize) -> Self {
    self.repeat_times = repeat_times;
    self
  }
}

impl<F, D, I, M, O> Task<I, M, O> for RepeatShotTask
where
  I: Iterator<Item = F>,
  M: Decoder<Input = F, Output = D>,
  M::Error: std::error::Error + Sync + Send + 'static,
  O: Render<F, D>,
  O::Error: std::error::Error + Sync + Send + 'static,
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, mut model: M, output: O) -> Result<(), Self::Error> {
    info!("开始任务, 重复 {} 次...", self.repeat_times);
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    let mut stats = TimingStats::with_warmup(Self::WARMUP);
    for i in 0..self.repeat_times {
      let timing = step(&mut model, &output, &frame)?;
      debug!("({}) 解码耗时: {:.2?}", i, timing.decode);
      stats.record(timing);
    }
    stats.report();
    Ok(())
  }
}

#[derive(Default, Debug)]
pub struct ContinuousTask {
  frame_number: Option<usize>,
}

impl ContinuousTask {
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }

  fn reached_limit(&self, frames: usize) -> bool {
    self.frame_number.is_some_and(|n| frames >= n)
  }
}

/// 注册 Ctrl-C；30 秒内没有正常退出则强制结束进程
fn interrupt_channel() -> anyhow::Result<Receiver<()>> {
  let (tx, rx) = mpsc::channel();
  ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    let _ = tx.send(());
    thread::spawn(|| {
      thread::sleep(Duration::from_secs(30));
      warn!("强制退出程序");
      std::process::exit(1);
    });
  })?;
  Ok(rx)
}

impl<F, D, I, M, O> Task<I, M, O> for ContinuousTask
where
  I: Iterator<Item = F>,
  M: Decoder<Input = F, Output = D>,
  M::Error: std::error::Error + Sync + Send + 'static,
  O: Render<F, D>,
  O::Error: std::error::Error + Sync + Send + 'static,
{
  type Error = anyhow::Error;

  fn run_task(self, input: I, mut model: M, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let interrupt = interrupt_channel()?;

    let mut stats = TimingStats::default();
    for frame in input {
      let timing = step(&mut model, &output, &frame)?;
      stats.record(timing);
      info!(
        "第 {} 帧: 解码 {:.2?}, 输出 {:.2?}",
        stats.frames, timing.decode, timing.render
      );
      if self.reached_limit(stats.frames) {
        info!("达到指定帧数 {}, 退出任务循环", stats.frames);
        break;
      }
      if interrupt.try_recv().is_ok() {
        warn!("中断信号接收，退出任务循环");
        break;
      }
    }

    stats.report();
    Ok(())
  }
}
