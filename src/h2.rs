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
use crate::transport::Transport;
use crate::Connection;

/// RFC 7540 frame header: 24-bit length, type, flags, 31-bit stream id.
pub(crate) const FRAME_HEADER_LEN: usize = 9;

pub(crate) const FLAG_END_STREAM: u8 = 0x01;
pub(crate) const FLAG_END_HEADERS: u8 = 0x04;

#[repr(u8)]
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub(crate) enum FrameType {
  Data = 0x0,
  Headers = 0x1,
  Continuation = 0x9,
}

/// HTTP/2 stream bookkeeping for tunnelled writes.
pub(crate) struct H2Tx {
  pub(crate) my_sid: u32,
  pub(crate) send_end_stream: bool,
  /// Flow-control credit for DATA payload bytes.
  pub(crate) tx_credit: i32,
}

impl Default for H2Tx {
  fn default() -> Self {
    Self {
      my_sid: 1,
      send_end_stream: false,
      tx_credit: 65535,
    }
  }
}

impl<T: Transport> Connection<T> {
  /// Remaining HTTP/2 flow-control window for DATA payload.
  pub fn h2_tx_credit(&self) -> i32 {
    self.h2.tx_credit
  }

  /// Credits received from the peer's WINDOW_UPDATE.
  pub fn h2_grant_tx_credit(&mut self, delta: i32) {
    self.h2.tx_credit = self.h2.tx_credit.saturating_add(delta);
  }

  pub fn set_h2_stream_id(&mut self, sid: u32) {
    self.h2.my_sid = sid;
  }

  /// Wraps the already-framed bytes (`pre` prefix plus payload) in an
  /// HTTP/2 frame and issues it. The WS framing, when present, counts as
  /// HTTP/2 payload.
  pub(crate) fn h2_frame_write(
    &mut self,
    ty: FrameType,
    flags: u8,
    buf: &mut HeadroomBuf,
    pre: usize,
  ) -> Result<usize, EgressError> {
    let payload_len = buf.len() + pre;
    let head = buf.prefix_mut(pre + FRAME_HEADER_LEN)?;
    head[0] = (payload_len >> 16) as u8;
    head[1] = (payload_len >> 8) as u8;
    head[2] = payload_len as u8;
    head[3] = ty as u8;
    head[4] = flags;
    let sid = self.h2.my_sid & 0x7fff_ffff;
    head[5..9].copy_from_slice(&sid.to_be_bytes());

    if ty == FrameType::Data {
      self.h2.tx_credit =
        self.h2.tx_credit.saturating_sub(payload_len as i32);
    }

    self.issue_raw_ext_access(buf, pre + FRAME_HEADER_LEN)
  }
}
