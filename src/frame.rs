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

use crate::buffer::HeadroomBuf;
use crate::error::EgressError;

/// Headroom every payload buffer must reserve ahead of the payload: the
/// HTTP/2 frame header plus the largest WebSocket header and mask slot.
pub const PRE: usize = 24;

/// Largest payload a single write accepts.
pub const MAX_WRITE_LEN: usize = i32::MAX as usize;

#[repr(u8)]
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum OpCode {
  Continuation = 0x0,
  Text = 0x1,
  Binary = 0x2,
  Close = 0x8,
  Ping = 0x9,
  Pong = 0xA,
}

#[inline]
pub fn is_control(opcode: OpCode) -> bool {
  matches!(opcode, OpCode::Close | OpCode::Ping | OpCode::Pong)
}

/// The opcode class of a write: what kind of protocol unit the payload is.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum WriteKind {
  Text,
  Binary,
  Continuation,
  Ping,
  Pong,
  Close,
  Http,
  HttpFinal,
  HttpHeaders,
  HttpHeadersContinuation,
}

impl WriteKind {
  /// HTTP body/header kinds bypass WebSocket framing entirely.
  #[inline]
  pub fn is_http(self) -> bool {
    matches!(
      self,
      WriteKind::Http
        | WriteKind::HttpFinal
        | WriteKind::HttpHeaders
        | WriteKind::HttpHeadersContinuation
    )
  }

  /// Control frames are never offered to the payload-transforming
  /// extension chain.
  #[inline]
  pub fn is_ws_control(self) -> bool {
    matches!(self, WriteKind::Ping | WriteKind::Pong | WriteKind::Close)
  }

  pub(crate) fn ws_opcode(self) -> Option<OpCode> {
    match self {
      WriteKind::Text => Some(OpCode::Text),
      WriteKind::Binary => Some(OpCode::Binary),
      WriteKind::Continuation => Some(OpCode::Continuation),
      WriteKind::Close => Some(OpCode::Close),
      WriteKind::Ping => Some(OpCode::Ping),
      WriteKind::Pong => Some(OpCode::Pong),
      _ => None,
    }
  }
}

/// Flag bits riding on top of the opcode class.
#[derive(Debug, Default, PartialEq, Eq, Clone, Copy)]
pub struct WriteFlags {
  /// This emission is not the last fragment of the logical message.
  pub no_fin: bool,
  /// Force END_STREAM on the HTTP/2 frame carrying this write.
  pub h2_stream_end: bool,
}

/// A write-protocol tag: opcode class plus flags.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct WriteProtocol {
  pub kind: WriteKind,
  pub flags: WriteFlags,
}

impl WriteProtocol {
  pub fn new(kind: WriteKind) -> Self {
    Self {
      kind,
      flags: WriteFlags::default(),
    }
  }

  pub fn no_fin(mut self) -> Self {
    self.flags.no_fin = true;
    self
  }

  pub fn h2_stream_end(mut self) -> Self {
    self.flags.h2_stream_end = true;
    self
  }

  /// The override applied when replaying an extension drain: the emission
  /// becomes a continuation but inherits the flags of the write that
  /// provoked the fragments, so the FIN decision stays with the last one.
  pub(crate) fn continuation_of(stashed: WriteProtocol) -> Self {
    Self {
      kind: WriteKind::Continuation,
      flags: stashed.flags,
    }
  }
}

/// Synthesizes the RFC 6455 frame header for `buf`'s payload into the
/// headroom immediately preceding it and returns the prefix length used:
/// 2, 4 or 10 bytes of header, plus 4 more reserved for the mask nonce
/// when `masked`. The nonce slot is left for the caller to fill.
pub(crate) fn prepend_header(
  buf: &mut HeadroomBuf,
  opcode: OpCode,
  fin: bool,
  masked: bool,
) -> Result<usize, EgressError> {
  let len = buf.len();
  let base = if len < 126 {
    2
  } else if len < 65536 {
    4
  } else {
    10
  };
  let pre = base + if masked { 4 } else { 0 };

  let is_masked_bit = if masked { 0x80 } else { 0 };
  let head = buf.prefix_mut(pre)?;
  head[0] = opcode as u8 | if fin { 0x80 } else { 0 };
  match base {
    2 => head[1] = len as u8 | is_masked_bit,
    4 => {
      head[1] = 126 | is_masked_bit;
      head[2] = (len >> 8) as u8;
      head[3] = len as u8;
    }
    _ => {
      head[1] = 127 | is_masked_bit;
      #[cfg(target_pointer_width = "64")]
      {
        head[2] = ((len >> 56) & 0x7f) as u8;
        head[3] = (len >> 48) as u8;
        head[4] = (len >> 40) as u8;
        head[5] = (len >> 32) as u8;
      }
      // usize cannot exceed 32 bits here, the top of the extended
      // length is always zero
      #[cfg(not(target_pointer_width = "64"))]
      {
        head[2] = 0;
        head[3] = 0;
        head[4] = 0;
        head[5] = 0;
      }
      head[6] = (len >> 24) as u8;
      head[7] = (len >> 16) as u8;
      head[8] = (len >> 8) as u8;
      head[9] = len as u8;
    }
  }

  Ok(pre)
}
