// Copyright 2023 Divy Srivastava <dj.srivastava23@gmail.com>
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::borrow::Cow;

/// Errors that the egress pipeline can surface.
///
/// Every error is local to one connection. A transport or allocation error
/// leaves the connection permanently unusable; programming errors
/// (`BackToBackWrite`, `AliasedWrite`) indicate a caller that did not go
/// back through the event loop between writes.
#[derive(Debug, thiserror::Error)]
pub enum EgressError {
  #[error("back-to-back write without an intervening writable dispatch")]
  BackToBackWrite,
  #[error("write issued while a truncated send is still pending")]
  AliasedWrite,
  #[error("payload length {0} exceeds the writable limit")]
  PayloadTooLarge(usize),
  #[error("write kind is not valid for a WebSocket frame")]
  UnknownWriteKind,
  #[error("connection is permanently unusable")]
  ConnectionUnusable,
  #[error("buffer carries {available} bytes of headroom, {needed} needed")]
  InsufficientHeadroom { needed: usize, available: usize },
  #[error("unable to stage {0} bytes of unsent data")]
  TruncationAlloc(usize),
  #[error("frame mask nonce unavailable: {0}")]
  MaskSource(rand::Error),
  #[error("parent connection refused the delegated write")]
  ParentWriteFailed,
  #[error("extension failed: {0}")]
  Extension(Cow<'static, str>),
  #[error("pending output flushed, close the connection now")]
  CloseAfterFlush,
  #[error("completion hook requested connection teardown")]
  Hangup,
  #[error(transparent)]
  Io(#[from] std::io::Error),
}

impl EgressError {
  /// True for the error kinds that leave the socket unusable for any
  /// further egress.
  pub fn is_fatal(&self) -> bool {
    matches!(
      self,
      EgressError::Io(_)
        | EgressError::TruncationAlloc(_)
        | EgressError::MaskSource(_)
    )
  }
}
