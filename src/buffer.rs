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

use std::io;
use std::io::Read;

use crate::error::EgressError;

/// A payload buffer with an explicit reserved prefix.
///
/// Frame headers are synthesized *behind* the payload, into the headroom,
/// so the wire bytes go out in one piece without copying the payload.
/// `prepend` moves the payload start down into the headroom; `wire` yields
/// the view that includes the synthesized prefix.
///
/// Invariant: `headroom ≤ start ≤ end == data.len()` is not required for
/// `start` (prepends shrink it below `home`), but `start ≤ end` always
/// holds and the payload is `data[start..end]`.
pub struct HeadroomBuf {
  data: Vec<u8>,
  home: usize,
  start: usize,
  end: usize,
}

impl HeadroomBuf {
  /// An empty buffer reserving `headroom` writable bytes ahead of the
  /// payload. WebSocket writes need at least [`crate::PRE`].
  pub fn new(headroom: usize) -> Self {
    Self {
      data: vec![0; headroom],
      home: headroom,
      start: headroom,
      end: headroom,
    }
  }

  pub fn with_payload(headroom: usize, payload: &[u8]) -> Self {
    let mut data = vec![0; headroom];
    data.extend_from_slice(payload);
    let end = data.len();
    Self {
      data,
      home: headroom,
      start: headroom,
      end,
    }
  }

  #[inline]
  pub fn len(&self) -> usize {
    self.end - self.start
  }

  #[inline]
  pub fn is_empty(&self) -> bool {
    self.start == self.end
  }

  /// Writable headroom still available ahead of the payload.
  #[inline]
  pub fn headroom(&self) -> usize {
    self.start
  }

  pub fn payload(&self) -> &[u8] {
    &self.data[self.start..self.end]
  }

  pub fn payload_mut(&mut self) -> &mut [u8] {
    &mut self.data[self.start..self.end]
  }

  /// Drops any synthesized prefix and payload, restoring the configured
  /// headroom. The allocation is kept.
  pub fn reset(&mut self) {
    self.data.truncate(self.home);
    self.start = self.home;
    self.end = self.home;
  }

  /// Appends bytes after the current payload.
  pub fn append(&mut self, bytes: &[u8]) {
    debug_assert_eq!(self.end, self.data.len());
    self.data.extend_from_slice(bytes);
    self.end = self.data.len();
  }

  /// Moves the payload start backwards and writes `bytes` there, so they
  /// become the new front of the payload.
  pub fn prepend(&mut self, bytes: &[u8]) -> Result<(), EgressError> {
    let head = self.prefix_mut(bytes.len())?;
    head.copy_from_slice(bytes);
    self.start -= bytes.len();
    Ok(())
  }

  /// Reads up to `max` bytes from `r` onto the end of the payload,
  /// returning how many arrived. Short reads below `max` only happen at
  /// end of input.
  pub fn read_from<R: Read>(
    &mut self,
    r: &mut R,
    max: usize,
  ) -> io::Result<usize> {
    debug_assert_eq!(self.end, self.data.len());
    self.data.resize(self.end + max, 0);
    let mut filled = 0;
    while filled < max {
      match r.read(&mut self.data[self.end + filled..]) {
        Ok(0) => break,
        Ok(n) => filled += n,
        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
        Err(e) => {
          self.data.truncate(self.end);
          return Err(e);
        }
      }
    }
    self.data.truncate(self.end + filled);
    self.end = self.data.len();
    Ok(filled)
  }

  /// The last `pre` bytes of headroom, immediately preceding the payload.
  /// Does not move the payload start; used to scribble a header in place.
  pub(crate) fn prefix_mut(
    &mut self,
    pre: usize,
  ) -> Result<&mut [u8], EgressError> {
    if pre > self.start {
      return Err(EgressError::InsufficientHeadroom {
        needed: pre,
        available: self.start,
      });
    }
    Ok(&mut self.data[self.start - pre..self.start])
  }

  /// The wire view: `pre` bytes of synthesized prefix plus the payload.
  pub(crate) fn wire(&self, pre: usize) -> &[u8] {
    &self.data[self.start - pre..self.end]
  }
}

/// Staging area for the unsent tail of a partial send.
///
/// While `len > 0` the pending window has strict priority: it must drain
/// completely before any new write's bytes reach the transport.
#[derive(Default)]
pub(crate) struct TruncationBuffer {
  buf: Vec<u8>,
  offset: usize,
  len: usize,
}

impl TruncationBuffer {
  #[inline]
  pub(crate) fn is_empty(&self) -> bool {
    self.len == 0
  }

  #[inline]
  pub(crate) fn len(&self) -> usize {
    self.len
  }

  pub(crate) fn pending(&self) -> &[u8] {
    &self.buf[self.offset..self.offset + self.len]
  }

  /// Takes ownership of a fresh unsent tail. Reuses the allocation when
  /// it still fits, otherwise reallocates; failure to allocate is fatal
  /// for the connection.
  pub(crate) fn absorb(&mut self, tail: &[u8]) -> Result<(), EgressError> {
    debug_assert!(self.len == 0);
    if self.buf.capacity() < tail.len() {
      self.buf = Vec::new();
      self
        .buf
        .try_reserve(tail.len())
        .map_err(|_| EgressError::TruncationAlloc(tail.len()))?;
    }
    self.buf.clear();
    self.buf.extend_from_slice(tail);
    self.offset = 0;
    self.len = tail.len();
    Ok(())
  }

  /// Advances past `n` replayed bytes. Draining to zero clears the window
  /// but keeps the allocation for the next partial.
  pub(crate) fn advance(&mut self, n: usize) {
    debug_assert!(n <= self.len);
    self.offset += n;
    self.len -= n;
    if self.len == 0 {
      self.offset = 0;
      self.buf.clear();
    }
  }
}
