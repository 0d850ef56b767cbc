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

//! The file fragment pump: chunked, range-aware HTTP body transmission
//! through the write pipeline.

use std::collections::VecDeque;
use std::io;
use std::io::{Read, Seek, SeekFrom};

use tracing::{debug, warn};

use crate::buffer::HeadroomBuf;
use crate::error::EgressError;
use crate::frame::{WriteKind, WriteProtocol, PRE};
use crate::h2;
use crate::transport::Transport;
use crate::{ConnState, Connection};

/// Multipart byte-range boundary, as it appears on the wire.
const BOUNDARY: &[u8] = b"_lws\r\n";

/// Front reserve for the chunk-size line of a chunked response.
const CHUNK_RESERVE: usize = 10;
/// Allowance for an interpreter hook growing the fragment.
const CHUNK_SLACK: usize = 128;

/// What the pump reports back to the event loop.
#[derive(Debug, PartialEq, Eq)]
pub enum ServeProgress {
  /// The transport refused more; come back on the next writable.
  More,
  /// The file (or the final range) is fully sent.
  Done,
}

/// Verdict of the end-of-file hook.
#[derive(Debug, PartialEq, Eq)]
pub enum CompletionAction {
  /// Keep the connection for further transactions.
  KeepAlive,
  /// Tear the connection down (for HTTP/2, only the stream).
  HangUp,
}

/// Arguments handed to the interpreter hook alongside the fragment.
pub struct HtmlArgs {
  /// The rewritten payload may grow up to this many bytes.
  pub max_len: usize,
  /// This fragment reaches the end of the file.
  pub final_fragment: bool,
  pub chunked: bool,
}

/// Callbacks the file pump consumes.
pub trait ServeHooks {
  /// Optional server-side rewrite of file bytes before transmission
  /// (e.g. templating). The payload may be edited in place and may grow
  /// up to `args.max_len`.
  fn process_html(
    &mut self,
    buf: &mut HeadroomBuf,
    args: &HtmlArgs,
  ) -> Result<(), EgressError> {
    let _ = (buf, args);
    Ok(())
  }

  /// Invoked once the file is fully sent and closed.
  fn http_file_completion(&mut self) -> CompletionAction {
    CompletionAction::KeepAlive
  }
}

/// The do-nothing hook set.
pub struct NoHooks;

impl ServeHooks for NoHooks {}

trait FileSource: Read + Seek {}
impl<T: Read + Seek> FileSource for T {}

/// An open file being served; any seekable byte source will do.
pub struct FileSlot {
  inner: Box<dyn FileSource>,
}

impl FileSlot {
  pub fn new(src: impl Read + Seek + 'static) -> Self {
    Self {
      inner: Box::new(src),
    }
  }

  pub(crate) fn seek_relative(&mut self, delta: i64) -> io::Result<u64> {
    self.inner.seek(SeekFrom::Current(delta))
  }
}

impl Read for FileSlot {
  fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
    self.inner.read(buf)
  }
}

/// Byte-range state for the transaction being served.
pub struct RangeTx {
  pub(crate) start: u64,
  pub(crate) end: u64,
  pub(crate) extent: u64,
  pub(crate) budget: u64,
  pub(crate) inside: bool,
  pub(crate) send_ctr: u32,
  pub(crate) count_ranges: u32,
  pub(crate) content_type: String,
  queue: VecDeque<(u64, u64)>,
}

impl RangeTx {
  /// `ranges` are inclusive `(start, end)` pairs over a resource of
  /// `extent` bytes. Returns `None` for an empty set.
  pub fn new(
    ranges: &[(u64, u64)],
    extent: u64,
    content_type: &str,
  ) -> Option<Self> {
    let mut queue: VecDeque<(u64, u64)> = ranges.iter().copied().collect();
    let (start, end) = queue.pop_front()?;
    Some(Self {
      start,
      end,
      extent,
      budget: 0,
      inside: false,
      send_ctr: 0,
      count_ranges: ranges.len() as u32,
      content_type: content_type.to_owned(),
      queue,
    })
  }

  fn next_range(&mut self) -> bool {
    match self.queue.pop_front() {
      Some((start, end)) => {
        self.start = start;
        self.end = end;
        true
      }
      None => false,
    }
  }
}

/// HTTP transmission state for the connection.
#[derive(Default)]
pub(crate) struct HttpTx {
  pub(crate) filepos: u64,
  pub(crate) filelen: u64,
  pub(crate) file: Option<FileSlot>,
  pub(crate) tx_content_length: u64,
  pub(crate) tx_content_remain: u64,
  pub(crate) range: Option<RangeTx>,
  pub(crate) chunked: bool,
  pub(crate) interpreting: bool,
}

fn file_missing() -> EgressError {
  EgressError::Io(io::Error::new(
    io::ErrorKind::NotFound,
    "no file staged for serving",
  ))
}

impl<T: Transport> Connection<T> {
  /// Stages an open file for [`Connection::serve_file_fragment`] to pump.
  pub fn stage_file(&mut self, file: FileSlot, filelen: u64) {
    self.http.file = Some(file);
    self.http.filepos = 0;
    self.http.filelen = filelen;
  }

  /// Declares the Content-Length in effect for the response body.
  pub fn set_tx_content_length(&mut self, len: u64) {
    self.http.tx_content_length = len;
    self.http.tx_content_remain = len;
  }

  pub fn set_ranges(&mut self, range: RangeTx) {
    self.http.range = Some(range);
  }

  pub fn set_chunked(&mut self, chunked: bool) {
    self.http.chunked = chunked;
  }

  /// Routes every fragment through the interpreter hook.
  pub fn set_interpreting(&mut self, interpreting: bool) {
    self.http.interpreting = interpreting;
  }

  fn close_file(&mut self) {
    self.http.file = None;
  }

  fn finish_file(
    &mut self,
    hooks: &mut dyn ServeHooks,
  ) -> Result<ServeProgress, EgressError> {
    self.set_state(ConnState::HttpIdle);
    // we might be in keepalive, so close it off here
    self.close_file();
    debug!("file completed");

    match hooks.http_file_completion() {
      CompletionAction::KeepAlive => Ok(ServeProgress::Done),
      CompletionAction::HangUp => {
        // for http/2, completing the transaction is a stream matter,
        // not the network connection's
        if self.mode().is_h2() {
          Ok(ServeProgress::Done)
        } else {
          Err(EgressError::Hangup)
        }
      }
    }
  }

  /// Pumps file bytes through the write pipeline until the transport
  /// refuses more or the file is fully sent. Invoke again on every
  /// writable notification while it reports [`ServeProgress::More`].
  pub fn serve_file_fragment(
    &mut self,
    hooks: &mut dyn ServeHooks,
  ) -> Result<ServeProgress, EgressError> {
    let mut scratch = HeadroomBuf::new(PRE + CHUNK_RESERVE);
    let mut finished = false;

    loop {
      if self.send_pipe_choked() {
        if let Err(e) = self.replay_trunc() {
          self.close_file();
          return Err(e);
        }
        if !self.trunc.is_empty() {
          // transport still jammed; wait for the next writable
          break;
        }
        continue;
      }

      if finished || self.http.filepos >= self.http.filelen {
        return self.finish_file(hooks);
      }

      scratch.reset();

      // entering a new range: seek to it and open the part
      let seek_failed = {
        let HttpTx {
          range,
          file,
          filepos,
          ..
        } = &mut self.http;
        let mut failed = None;
        if let Some(range) = range.as_mut() {
          if !range.inside {
            debug!(start = range.start, "doing range start");
            let delta = range.start as i64 - *filepos as i64;
            match file.as_mut() {
              None => failed = Some(file_missing()),
              Some(f) => match f.seek_relative(delta) {
                Err(e) => failed = Some(e.into()),
                Ok(_) => {
                  *filepos = range.start;
                  if range.count_ranges > 1 {
                    let hdr = format!(
                      "_lws\r\nContent-Type: {}\r\n\
                       Content-Range: bytes {}-{}/{}\r\n\r\n",
                      range.content_type, range.start, range.end,
                      range.extent
                    );
                    scratch.append(hdr.as_bytes());
                  }
                  range.budget = range.end - range.start + 1;
                  range.inside = true;
                }
              },
            }
          }
        }
        failed
      };
      if let Some(e) = seek_failed {
        self.close_file();
        return Err(e);
      }

      // how much this fragment may carry, each rule narrowing it
      let mut poss = self
        .serv_buf_size
        .saturating_sub(scratch.len() + h2::FRAME_HEADER_LEN);
      if self.http.tx_content_length > 0 {
        poss = poss.min(self.http.tx_content_remain as usize);
      }
      if self.tx_packet_size > 0 {
        poss = poss.min(self.tx_packet_size);
      }
      if self.mode().is_h2() {
        let credit = self.h2.tx_credit;
        if credit <= 0 {
          debug!("came here with no tx credit");
          return Ok(ServeProgress::More);
        }
        poss = poss.min(credit as usize);
      }
      if let Some(range) = self.http.range.as_ref() {
        if range.count_ranges > 1 {
          // allow for the final boundary
          poss = poss.saturating_sub(7);
        }
        poss = poss.min(range.budget as usize);
      }
      if self.http.chunked {
        poss = poss.saturating_sub(CHUNK_RESERVE + CHUNK_SLACK);
      }

      let amount = {
        let file = self.http.file.as_mut().ok_or_else(file_missing)?;
        match scratch.read_from(file, poss) {
          Ok(a) => a,
          Err(e) => {
            self.close_file();
            return Err(e.into());
          }
        }
      };

      if scratch.is_empty() {
        warn!(
          filepos = self.http.filepos,
          filelen = self.http.filelen,
          "file ended before its declared length"
        );
        self.close_file();
        return Err(
          io::Error::new(io::ErrorKind::UnexpectedEof, "file ended early")
            .into(),
        );
      }

      let final_fragment =
        self.http.filepos + amount as u64 == self.http.filelen;

      if self.http.interpreting {
        let args = HtmlArgs {
          max_len: poss + CHUNK_SLACK,
          final_fragment,
          chunked: self.http.chunked,
        };
        if let Err(e) = hooks.process_html(&mut scratch, &args) {
          self.close_file();
          return Err(e);
        }
      }

      // last part of a multipart: append the trailing boundary
      if let Some(range) = self.http.range.as_ref() {
        if range.count_ranges > 1
          && range.send_ctr + 1 == range.count_ranges
          && range.budget == amount as u64
        {
          debug!("added trailing boundary");
          scratch.append(BOUNDARY);
        }
      }

      if self.http.chunked {
        // drop the chunk envelope around whatever this fragment carries
        let size_line = format!("{:x}\r\n", scratch.len());
        scratch.prepend(size_line.as_bytes())?;
        scratch.append(b"\r\n");
      }

      let offered = scratch.len();
      let kind = if final_fragment {
        WriteKind::HttpFinal
      } else {
        WriteKind::Http
      };
      let m = match self.write(&mut scratch, WriteProtocol::new(kind)) {
        Ok(m) => m,
        Err(e) => {
          self.close_file();
          return Err(e);
        }
      };

      self.http.filepos += amount as u64;

      if let Some(range) = self.http.range.as_mut() {
        range.budget -= amount as u64;
        if range.budget == 0 {
          debug!("range budget exhausted");
          range.inside = false;
          range.send_ctr += 1;
          if !range.next_range() {
            finished = true;
          }
        }
      }

      if m != offered {
        // adjust for what was not sent
        let shortfall = (offered - m) as i64;
        let seek = {
          match self.http.file.as_mut() {
            Some(f) => f.seek_relative(-shortfall).map(|_| ()),
            None => Err(io::Error::new(
              io::ErrorKind::NotFound,
              "no file staged for serving",
            )),
          }
        };
        if let Err(e) = seek {
          self.close_file();
          return Err(e.into());
        }
      }
    }

    self.request_writable();
    Ok(ServeProgress::More)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::{MockTransport, Step};
  use crate::Mode;
  use std::io::Cursor;

  fn body(n: usize) -> Vec<u8> {
    (0..n).map(|i| (i % 256) as u8).collect()
  }

  fn http1(t: MockTransport) -> Connection<MockTransport> {
    Connection::new(t, Mode::Http1)
  }

  #[test]
  fn serves_a_whole_file() {
    let data = body(1000);
    let mut conn = http1(MockTransport::accept_all());
    conn.stage_file(FileSlot::new(Cursor::new(data.clone())), 1000);

    let progress = conn.serve_file_fragment(&mut NoHooks).unwrap();
    assert_eq!(progress, ServeProgress::Done);
    assert_eq!(conn.transport().wire, data);
    assert_eq!(conn.state(), ConnState::HttpIdle);
  }

  #[test]
  fn two_ranges_produce_a_multipart_body() {
    let data = body(1000);
    let mut conn = http1(MockTransport::accept_all());
    conn.stage_file(FileSlot::new(Cursor::new(data.clone())), 1000);
    conn.set_ranges(
      RangeTx::new(&[(0, 9), (990, 999)], 1000, "text/plain").unwrap(),
    );

    let progress = conn.serve_file_fragment(&mut NoHooks).unwrap();
    assert_eq!(progress, ServeProgress::Done);

    let mut expected = Vec::new();
    expected.extend_from_slice(
      b"_lws\r\nContent-Type: text/plain\r\n\
        Content-Range: bytes 0-9/1000\r\n\r\n",
    );
    expected.extend_from_slice(&data[0..10]);
    expected.extend_from_slice(
      b"_lws\r\nContent-Type: text/plain\r\n\
        Content-Range: bytes 990-999/1000\r\n\r\n",
    );
    expected.extend_from_slice(&data[990..1000]);
    expected.extend_from_slice(b"_lws\r\n");
    assert_eq!(conn.transport().wire, expected);
  }

  #[test]
  fn chunked_fragments_carry_the_envelope() {
    let mut conn = http1(MockTransport::accept_all());
    conn.stage_file(FileSlot::new(Cursor::new(b"hello world".to_vec())), 11);
    conn.set_chunked(true);

    let progress = conn.serve_file_fragment(&mut NoHooks).unwrap();
    assert_eq!(progress, ServeProgress::Done);
    // the terminal 0\r\n\r\n chunk is the caller's business
    assert_eq!(conn.transport().wire, b"b\r\nhello world\r\n");
  }

  #[test]
  fn chunked_splits_into_one_envelope_per_fragment() {
    let data = body(600);
    let mut conn = http1(MockTransport::accept_all());
    conn.set_serv_buf_size(512);
    conn.stage_file(FileSlot::new(Cursor::new(data.clone())), 600);
    conn.set_chunked(true);

    conn.serve_file_fragment(&mut NoHooks).unwrap();

    // two chunks: 512 - 9 - 138 = 365 bytes, then the remaining 235
    let mut expected = Vec::new();
    expected.extend_from_slice(format!("{:x}\r\n", 365).as_bytes());
    expected.extend_from_slice(&data[..365]);
    expected.extend_from_slice(b"\r\n");
    expected.extend_from_slice(format!("{:x}\r\n", 235).as_bytes());
    expected.extend_from_slice(&data[365..]);
    expected.extend_from_slice(b"\r\n");
    assert_eq!(conn.transport().wire, expected);
  }

  #[test]
  fn choked_transport_suspends_and_resumes() {
    let data = body(100);
    let mut conn =
      http1(MockTransport::scripted(vec![Step::Accept(4), Step::Accept(0)]));
    conn.stage_file(FileSlot::new(Cursor::new(data.clone())), 100);

    let progress = conn.serve_file_fragment(&mut NoHooks).unwrap();
    assert_eq!(progress, ServeProgress::More);
    assert!(conn.needs_writable());
    assert_eq!(conn.transport().wire.len(), 4);

    // next writable: the staged tail goes out first, then completion
    let progress = conn.serve_file_fragment(&mut NoHooks).unwrap();
    assert_eq!(progress, ServeProgress::Done);
    assert_eq!(conn.transport().wire, data);
  }

  #[test]
  fn interpreter_hook_rewrites_fragments() {
    struct Upper;
    impl ServeHooks for Upper {
      fn process_html(
        &mut self,
        buf: &mut HeadroomBuf,
        args: &HtmlArgs,
      ) -> Result<(), EgressError> {
        assert!(args.final_fragment);
        for b in buf.payload_mut() {
          b.make_ascii_uppercase();
        }
        Ok(())
      }
    }

    let mut conn = http1(MockTransport::accept_all());
    conn.stage_file(FileSlot::new(Cursor::new(b"quiet".to_vec())), 5);
    conn.set_interpreting(true);

    conn.serve_file_fragment(&mut Upper).unwrap();
    assert_eq!(conn.transport().wire, b"QUIET");
  }

  #[test]
  fn completion_hook_can_hang_up() {
    struct Hang;
    impl ServeHooks for Hang {
      fn http_file_completion(&mut self) -> CompletionAction {
        CompletionAction::HangUp
      }
    }

    let mut conn = http1(MockTransport::accept_all());
    conn.stage_file(FileSlot::new(Cursor::new(b"x".to_vec())), 1);
    let err = conn.serve_file_fragment(&mut Hang).unwrap_err();
    assert!(matches!(err, EgressError::Hangup));

    // an http/2 stream only tears down the stream, not the connection
    let mut conn = Connection::new(MockTransport::accept_all(), Mode::H2);
    conn.stage_file(FileSlot::new(Cursor::new(b"x".to_vec())), 1);
    let progress = conn.serve_file_fragment(&mut Hang).unwrap();
    assert_eq!(progress, ServeProgress::Done);
  }

  #[test]
  fn h2_body_goes_out_as_data_with_end_stream() {
    let mut conn = Connection::new(MockTransport::accept_all(), Mode::H2);
    conn.stage_file(FileSlot::new(Cursor::new(b"h2 body".to_vec())), 7);

    let progress = conn.serve_file_fragment(&mut NoHooks).unwrap();
    assert_eq!(progress, ServeProgress::Done);

    let wire = &conn.transport().wire;
    assert_eq!(wire[3], 0x0); // DATA
    assert_eq!(wire[4] & 0x01, 0x01); // END_STREAM on the final fragment
    assert_eq!(&wire[9..], b"h2 body");
  }

  #[test]
  fn h2_without_credit_waits() {
    let mut conn = Connection::new(MockTransport::accept_all(), Mode::H2);
    conn.stage_file(FileSlot::new(Cursor::new(b"stalled".to_vec())), 7);
    conn.h2_grant_tx_credit(-65535);

    let progress = conn.serve_file_fragment(&mut NoHooks).unwrap();
    assert_eq!(progress, ServeProgress::More);
    assert!(conn.transport().wire.is_empty());
  }

  #[test]
  fn short_file_fails_instead_of_spinning() {
    let mut conn = http1(MockTransport::accept_all());
    conn.stage_file(FileSlot::new(Cursor::new(b"tiny".to_vec())), 100);
    let err = conn.serve_file_fragment(&mut NoHooks).unwrap_err();
    assert!(matches!(err, EgressError::Io(_)));
  }
}
