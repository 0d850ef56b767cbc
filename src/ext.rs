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
use crate::frame::{WriteKind, WriteProtocol};

/// What an extension did with the payload it was offered.
#[derive(Debug, PartialEq, Eq)]
pub enum ExtTx {
  /// Payload untouched (or edited in place); send the caller's buffer.
  PassThrough,
  /// The extension consumed the input and swapped its own output into
  /// the buffer. `more` announces further output pending without further
  /// input: the connection must come back when writable and let the
  /// extension spill.
  Replaced { more: bool },
  /// Input consumed, nothing to emit yet. The write is reported as
  /// accepted; the opcode is stashed so a later emission can restore it.
  Stashed,
}

/// A payload-transforming egress extension (e.g. a compressor).
///
/// Extensions producing output erratically must emit complete fragments:
/// whatever is in the buffer after `payload_tx` goes out as one frame,
/// and a `more` announcement enrolls the connection for draining.
pub trait Extension {
  fn name(&self) -> &'static str;

  /// Offers the outgoing payload. The extension may leave it alone,
  /// replace it with transformed output (swapping in a buffer that
  /// carries at least [`crate::PRE`] headroom), or consume it silently.
  fn payload_tx(
    &mut self,
    buf: &mut HeadroomBuf,
    wp: WriteProtocol,
  ) -> Result<ExtTx, EgressError>;

  /// Last look at the framed wire bytes before the socket write. An
  /// extension that implements its own transport segmentation returns
  /// `Some(n)` to claim responsibility for `n` bytes; the pipeline then
  /// treats those bytes as accepted.
  fn packet_tx(&mut self, wire: &[u8]) -> Result<Option<usize>, EgressError> {
    let _ = wire;
    Ok(None)
  }
}

/// Where the connection stands with respect to extension draining.
///
/// `InputStashed` records an opcode the extension swallowed with its
/// input; `Draining` records the write that provoked pending fragments so
/// the last one can reuse its FIN state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DrainState {
  Idle,
  InputStashed(WriteKind),
  Draining(WriteProtocol),
}

impl DrainState {
  #[inline]
  pub(crate) fn is_draining(self) -> bool {
    matches!(self, DrainState::Draining(_))
  }
}

/// Aggregate result of running the whole TX chain over one payload.
pub(crate) struct ChainTx {
  pub(crate) replaced: bool,
  pub(crate) more: bool,
}

pub(crate) fn run_payload_tx(
  extensions: &mut [Box<dyn Extension>],
  buf: &mut HeadroomBuf,
  wp: WriteProtocol,
) -> Result<ChainTx, EgressError> {
  let mut out = ChainTx {
    replaced: false,
    more: false,
  };
  for ext in extensions.iter_mut() {
    match ext.payload_tx(buf, wp)? {
      ExtTx::PassThrough => {}
      ExtTx::Replaced { more } => {
        out.replaced = true;
        out.more |= more;
      }
      ExtTx::Stashed => {
        out.replaced = true;
      }
    }
  }
  Ok(out)
}

pub(crate) fn run_packet_tx(
  extensions: &mut [Box<dyn Extension>],
  wire: &[u8],
) -> Result<Option<usize>, EgressError> {
  for ext in extensions.iter_mut() {
    if let Some(n) = ext.packet_tx(wire)? {
      return Ok(Some(n));
    }
  }
  Ok(None)
}
