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

use tokio::net::TcpStream;

/// Outcome of a non-blocking transport write.
#[derive(Debug, PartialEq, Eq)]
pub enum WriteOutcome {
  /// That many bytes left cleanly. May be fewer than offered.
  Written(usize),
  /// Nothing was written; retry after the next writable notification.
  /// `hint` is set when the socket itself reported it would block, as
  /// opposed to an interrupted call.
  WouldBlock { hint: bool },
}

/// Outcome of a non-blocking transport read.
#[derive(Debug, PartialEq, Eq)]
pub enum ReadOutcome {
  /// Bytes received; zero means the peer closed cleanly.
  Read(usize),
  WouldBlock,
}

/// An abstract non-blocking byte sink/source.
///
/// Fatal transport conditions surface as `Err`; the transient
/// nothing-moved case is a normal outcome, not an error. Implementations
/// must never block.
pub trait Transport {
  fn write(&mut self, buf: &[u8]) -> io::Result<WriteOutcome>;

  fn read(&mut self, buf: &mut [u8]) -> io::Result<ReadOutcome>;

  /// Buffered readable bytes beyond what the OS exposes. Plain sockets
  /// have none.
  fn pending(&self) -> usize {
    0
  }
}

/// The reference transport: a plain TCP socket driven through tokio's
/// non-blocking `try_read`/`try_write`.
pub struct TcpTransport {
  stream: TcpStream,
}

impl TcpTransport {
  pub fn new(stream: TcpStream) -> Self {
    Self { stream }
  }

  pub fn into_inner(self) -> TcpStream {
    self.stream
  }

  pub fn stream(&self) -> &TcpStream {
    &self.stream
  }
}

impl Transport for TcpTransport {
  fn write(&mut self, buf: &[u8]) -> io::Result<WriteOutcome> {
    match self.stream.try_write(buf) {
      Ok(n) => Ok(WriteOutcome::Written(n)),
      Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
        Ok(WriteOutcome::WouldBlock { hint: true })
      }
      Err(e) if e.kind() == io::ErrorKind::Interrupted => {
        Ok(WriteOutcome::WouldBlock { hint: false })
      }
      Err(e) => Err(e),
    }
  }

  fn read(&mut self, buf: &mut [u8]) -> io::Result<ReadOutcome> {
    match self.stream.try_read(buf) {
      Ok(n) => Ok(ReadOutcome::Read(n)),
      Err(e)
        if e.kind() == io::ErrorKind::WouldBlock
          || e.kind() == io::ErrorKind::Interrupted =>
      {
        Ok(ReadOutcome::WouldBlock)
      }
      Err(e) => Err(e),
    }
  }
}
