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

use miniz_oxide::deflate::core::{
  create_comp_flags_from_zip_params, CompressorOxide,
};
use miniz_oxide::deflate::stream::deflate;
use miniz_oxide::{MZError, MZFlush};

use crate::buffer::HeadroomBuf;
use crate::error::EgressError;
use crate::ext::{ExtTx, Extension};
use crate::frame::{WriteProtocol, PRE};

/// DEFLATE payload compression on the egress path.
///
/// Output is raw deflate with the 4-byte sync-flush tail stripped, emitted
/// in fragments of at most `chunk_limit` bytes so one writable never sends
/// an unbounded burst. When the compressor holds more than one fragment it
/// reports `more`, which enrolls the connection for draining; each
/// subsequent writable spills one further fragment.
pub struct DeflateTx {
  state: Box<CompressorOxide>,
  out: Vec<u8>,
  cursor: usize,
  chunk_limit: usize,
}

impl DeflateTx {
  pub fn new(chunk_limit: usize) -> Self {
    let flags = create_comp_flags_from_zip_params(6, -15, 0);
    Self {
      state: Box::new(CompressorOxide::new(flags)),
      out: Vec::new(),
      cursor: 0,
      chunk_limit: chunk_limit.max(1),
    }
  }

  fn compress(&mut self, mut input: &[u8]) -> Result<(), EgressError> {
    let mut scratch = vec![0u8; (input.len() / 2).max(256)];
    loop {
      let res = deflate(&mut self.state, input, &mut scratch, MZFlush::Sync);
      match res.status {
        Ok(_) => {
          self.out.extend_from_slice(&scratch[..res.bytes_written]);
          input = &input[res.bytes_consumed..];
          if input.is_empty() && res.bytes_written < scratch.len() {
            break;
          }
        }
        Err(MZError::Buf) => {
          let grown = scratch.len() * 2;
          scratch.resize(grown, 0);
        }
        Err(_) => {
          return Err(EgressError::Extension("deflate failed".into()));
        }
      }
    }
    if self.out[self.cursor..].ends_with(&[0x00, 0x00, 0xff, 0xff]) {
      self.out.truncate(self.out.len() - 4);
    }
    Ok(())
  }
}

impl Extension for DeflateTx {
  fn name(&self) -> &'static str {
    "deflate-tx"
  }

  fn payload_tx(
    &mut self,
    buf: &mut HeadroomBuf,
    _wp: WriteProtocol,
  ) -> Result<ExtTx, EgressError> {
    if !buf.is_empty() {
      let payload = buf.payload().to_vec();
      self.compress(&payload)?;
    } else if self.cursor == self.out.len() {
      // drain call with nothing pending
      return Ok(ExtTx::PassThrough);
    }

    if self.cursor == self.out.len() {
      // input swallowed, nothing worth a frame yet
      buf.reset();
      return Ok(ExtTx::Stashed);
    }

    let take = self.chunk_limit.min(self.out.len() - self.cursor);
    buf.reset();
    if buf.headroom() < PRE {
      *buf = HeadroomBuf::new(PRE);
    }
    buf.append(&self.out[self.cursor..self.cursor + take]);
    self.cursor += take;

    let more = self.cursor < self.out.len();
    if !more {
      self.out.clear();
      self.cursor = 0;
    }
    Ok(ExtTx::Replaced { more })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::frame::WriteKind;

  use miniz_oxide::inflate::stream::{inflate, InflateState};
  use miniz_oxide::DataFormat;

  fn inflate_all(compressed: &[u8]) -> Vec<u8> {
    let mut out = vec![0u8; compressed.len().saturating_mul(20).max(1024)];
    let mut state = InflateState::new_boxed(DataFormat::Raw);
    let tail = [compressed, [0x00, 0x00, 0xff, 0xff].as_slice()].concat();
    let res = inflate(&mut state, &tail, &mut out, MZFlush::Partial);
    res.status.expect("inflate failed");
    out.truncate(res.bytes_written);
    out
  }

  #[test]
  fn compresses_and_round_trips() {
    let mut ext = DeflateTx::new(usize::MAX);
    let mut buf = HeadroomBuf::with_payload(PRE, &[0x42u8; 4096]);
    let wp = WriteProtocol::new(WriteKind::Text);
    let tx = ext.payload_tx(&mut buf, wp).unwrap();
    assert_eq!(tx, ExtTx::Replaced { more: false });
    assert!(buf.len() < 4096);
    assert_eq!(inflate_all(buf.payload()), vec![0x42u8; 4096]);
  }

  #[test]
  fn spills_in_chunks_until_drained() {
    // incompressible input so several chunks survive compression
    let payload: Vec<u8> =
      (0u32..2048).map(|i| (i.wrapping_mul(2654435761) >> 13) as u8).collect();
    let mut ext = DeflateTx::new(64);
    let wp = WriteProtocol::new(WriteKind::Binary);

    let mut buf = HeadroomBuf::with_payload(PRE, &payload);
    let mut wire = Vec::new();
    let mut tx = ext.payload_tx(&mut buf, wp).unwrap();
    loop {
      wire.extend_from_slice(buf.payload());
      match tx {
        ExtTx::Replaced { more: true } => {
          buf.reset();
          tx = ext.payload_tx(&mut buf, wp).unwrap();
        }
        ExtTx::Replaced { more: false } => break,
        other => panic!("unexpected outcome: {:?}", other),
      }
      assert!(buf.len() <= 64);
    }
    assert_eq!(inflate_all(&wire), payload);
  }

  #[test]
  fn idle_drain_call_passes_through() {
    let mut ext = DeflateTx::new(64);
    let mut buf = HeadroomBuf::new(PRE);
    let wp = WriteProtocol::new(WriteKind::Continuation);
    assert_eq!(ext.payload_tx(&mut buf, wp).unwrap(), ExtTx::PassThrough);
  }
}
