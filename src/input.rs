// 该文件是 Shanan （山南西风） 项目的一部分。
// src/input.rs - 推理输出张量输入
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

use crate::{FromUrl, tensor::OutputTensors};

#[cfg(feature = "read_tensor_file")]
mod read_tensor_file;
#[cfg(feature = "read_tensor_file")]
pub use self::read_tensor_file::{
  TensorFileInput, TensorFileInputError, TensorFileInputIter, read_tensor_file,
};

#[derive(Error, Debug)]
pub enum InputError {
  #[cfg(feature = "read_tensor_file")]
  #[error("张量文件输入错误: {0}")]
  TensorFileInputError(#[from] TensorFileInputError),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

pub enum InputWrapper {
  #[cfg(feature = "read_tensor_file")]
  ReadTensorFile(TensorFileInput),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "read_tensor_file")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == TensorFileInput::SCHEME {
        let input = TensorFileInput::from_url(url)?;
        return Ok(InputWrapper::ReadTensorFile(input));
      }
    }
    let _ = url;
    Err(InputError::SchemeMismatch)
  }
}

impl IntoIterator for InputWrapper {
  type Item = OutputTensors;
  type IntoIter = InputWrapperIter;

  fn into_iter(self) -> Self::IntoIter {
    match self {
      #[cfg(feature = "read_tensor_file")]
      InputWrapper::ReadTensorFile(input) => InputWrapperIter::ReadTensorFile(input.into_iter()),
    }
  }
}

pub enum InputWrapperIter {
  #[cfg(feature = "read_tensor_file")]
  ReadTensorFile(TensorFileInputIter),
}

impl Iterator for InputWrapperIter {
  type Item = OutputTensors;

  fn next(&mut self) -> Option<Self::Item> {
    match self {
      #[cfg(feature = "read_tensor_file")]
      InputWrapperIter::ReadTensorFile(input) => input.next(),
    }
  }
}
