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

//! Scripted in-memory transport for tests.

use std::collections::VecDeque;
use std::io;

use crate::transport::{ReadOutcome, Transport, WriteOutcome};

pub(crate) enum Step {
  /// Accept at most this many of the offered bytes.
  Accept(usize),
  WouldBlock,
  Fatal,
}

/// Plays back a tape of outcomes, then accepts everything. Bytes the
/// transport "sent" accumulate in `wire`.
pub(crate) struct MockTransport {
  script: VecDeque<Step>,
  pub(crate) wire: Vec<u8>,
  pub(crate) rx: VecDeque<u8>,
}

impl MockTransport {
  pub(crate) fn accept_all() -> Self {
    Self::scripted(Vec::new())
  }

  pub(crate) fn scripted(steps: Vec<Step>) -> Self {
    Self {
      script: steps.into_iter().collect(),
      wire: Vec::new(),
      rx: VecDeque::new(),
    }
  }
}

impl Transport for MockTransport {
  fn write(&mut self, buf: &[u8]) -> io::Result<WriteOutcome> {
    match self.script.pop_front() {
      None => {
        self.wire.extend_from_slice(buf);
        Ok(WriteOutcome::Written(buf.len()))
      }
      Some(Step::Accept(n)) => {
        let n = n.min(buf.len());
        self.wire.extend_from_slice(&buf[..n]);
        Ok(WriteOutcome::Written(n))
      }
      Some(Step::WouldBlock) => Ok(WriteOutcome::WouldBlock { hint: true }),
      Some(Step::Fatal) => {
        Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer gone"))
      }
    }
  }

  fn read(&mut self, buf: &mut [u8]) -> io::Result<ReadOutcome> {
    if self.rx.is_empty() {
      return Ok(ReadOutcome::WouldBlock);
    }
    let mut n = 0;
    while n < buf.len() {
      match self.rx.pop_front() {
        Some(b) => {
          buf[n] = b;
          n += 1;
        }
        None => break,
      }
    }
    Ok(ReadOutcome::Read(n))
  }
}
