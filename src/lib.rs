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

//! _ws-egress_ is the egress path of a WebSocket / HTTP server: framing,
//! masking, extension draining and partial-send absorption over a
//! non-blocking transport.
//!
//! A [`Connection`] accepts application-level writes, applies RFC 6455
//! framing (or HTTP/2 DATA/HEADERS reframing), offers the payload to a
//! chain of [`Extension`]s, and hands bytes to a [`Transport`]. When the
//! transport accepts fewer bytes than offered, the remainder is absorbed
//! into a per-connection staging buffer and replayed with strict priority
//! on the next writable dispatch; the caller never sees a partial send.
//!
//! Payload buffers carry an explicit reserved prefix so headers are
//! synthesized in place, behind the payload:
//!
//! ```
//! use ws_egress::{
//!   Connection, HeadroomBuf, Mode, ReadOutcome, Transport, WriteKind,
//!   WriteOutcome, WriteProtocol, PRE,
//! };
//!
//! struct Sink(Vec<u8>);
//!
//! impl Transport for Sink {
//!   fn write(&mut self, buf: &[u8]) -> std::io::Result<WriteOutcome> {
//!     self.0.extend_from_slice(buf);
//!     Ok(WriteOutcome::Written(buf.len()))
//!   }
//!   fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<ReadOutcome> {
//!     Ok(ReadOutcome::WouldBlock)
//!   }
//! }
//!
//! # fn main() -> Result<(), ws_egress::EgressError> {
//! let mut conn = Connection::new(Sink(Vec::new()), Mode::WsServer);
//! let mut buf = HeadroomBuf::with_payload(PRE, b"hi");
//! let sent = conn.write(&mut buf, WriteProtocol::new(WriteKind::Text))?;
//! assert_eq!(sent, 2);
//! assert_eq!(conn.transport().0, [0x81, 0x02, 0x68, 0x69]);
//! # Ok(())
//! # }
//! ```
//!
//! The pipeline never blocks. A partial send latches a writable-rearm
//! request ([`Connection::needs_writable`]); the embedding event loop
//! answers it by calling [`Connection::service_writable`]. Issuing a
//! second write without that round-trip is illegal and fails.
//!
//! HTTP bodies are driven by [`Connection::serve_file_fragment`], which
//! pumps file bytes through the same pipeline with byte-range multipart,
//! chunked transfer-encoding and an optional rewrite hook.

mod buffer;
mod deflate;
mod error;
mod ext;
mod frame;
mod h2;
mod mask;
mod serve;
mod transport;

#[cfg(test)]
pub(crate) mod testing;

use std::time::Duration;
use std::time::Instant;

use tracing::{debug, error, trace, warn};

pub use crate::buffer::HeadroomBuf;
pub use crate::deflate::DeflateTx;
pub use crate::error::EgressError;
pub use crate::ext::{ExtTx, Extension};
pub use crate::frame::is_control;
pub use crate::frame::OpCode;
pub use crate::frame::WriteFlags;
pub use crate::frame::WriteKind;
pub use crate::frame::WriteProtocol;
pub use crate::frame::MAX_WRITE_LEN;
pub use crate::frame::PRE;
pub use crate::serve::{
  CompletionAction, FileSlot, HtmlArgs, NoHooks, RangeTx, ServeHooks,
  ServeProgress,
};
pub use crate::transport::{
  ReadOutcome, TcpTransport, Transport, WriteOutcome,
};

use crate::buffer::TruncationBuffer;
use crate::ext::DrainState;
use crate::h2::H2Tx;
use crate::serve::HttpTx;

/// What kind of traffic the connection carries; selects the framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
  /// Plain HTTP/1 serving.
  Http1,
  /// Server side of a WebSocket connection.
  WsServer,
  /// Client side of a WebSocket connection; payloads are masked.
  WsClient,
  /// HTTP/2 serving.
  H2,
  /// WebSocket tunnelled over an HTTP/2 stream.
  H2Ws,
}

impl Mode {
  #[inline]
  pub(crate) fn is_h2(self) -> bool {
    matches!(self, Mode::H2 | Mode::H2Ws)
  }
}

/// Connection lifecycle state, as far as egress cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
  /// Normal two-way traffic.
  Established,
  /// Draining pending output before closing; new sends are ignored.
  FlushingBeforeClose,
  WaitingToSendClose,
  AwaitingCloseAck,
  ReturnedClose,
  /// Between HTTP transactions (e.g. after a served file).
  HttpIdle,
}

impl ConnState {
  #[inline]
  pub(crate) fn is_ws_writable(self) -> bool {
    matches!(self, ConnState::Established)
  }

  /// States in which a CLOSE frame may still go out.
  #[inline]
  pub(crate) fn in_close_handshake(self) -> bool {
    matches!(
      self,
      ConnState::WaitingToSendClose
        | ConnState::AwaitingCloseAck
        | ConnState::ReturnedClose
    )
  }
}

/// Per-connection WebSocket TX state.
struct WsTx {
  mask: [u8; 4],
  mask_idx: u32,
  /// A frame's header went out but its payload has not fully dispatched;
  /// suppresses header re-emission.
  inside_frame: bool,
  /// No extension replaced the buffer; a partial send may be reported to
  /// the caller as bytes-of-user-buffer consumed.
  clean_buffer: bool,
  drain: DrainState,
}

impl Default for WsTx {
  fn default() -> Self {
    Self {
      mask: [0; 4],
      mask_idx: 0,
      inside_frame: false,
      clean_buffer: true,
      drain: DrainState::Idle,
    }
  }
}

/// Pass-through record for a write delegated to a parent connection.
pub struct WritePassthru<'a> {
  pub payload: &'a [u8],
  pub wp: WriteProtocol,
}

/// Carries a child stream's writes on behalf of a parent connection's
/// protocol handler.
pub trait ParentWriter {
  fn child_write(
    &mut self,
    rec: &WritePassthru<'_>,
  ) -> Result<(), EgressError>;
}

/// One client session: per-connection egress state over a transport.
///
/// All operations on one connection must happen on the event-loop thread
/// that services it; nothing here locks.
pub struct Connection<T> {
  transport: T,
  mode: Mode,
  state: ConnState,
  pub(crate) trunc: TruncationBuffer,
  /// Set on every transport attempt, cleared only by the event loop's
  /// writable dispatch. Catches illegal back-to-back writes.
  could_have_pending: bool,
  wants_writable: bool,
  blocking_send_hinted: bool,
  socket_is_permanently_unusable: bool,
  last_activity: Instant,
  // limits
  pub(crate) tx_packet_size: usize,
  rx_buffer_size: usize,
  pub(crate) serv_buf_size: usize,
  // counters
  tx_bytes: u64,
  rx_bytes: u64,
  partials: u64,
  partial_bytes: u64,
  ws: WsTx,
  pub(crate) http: HttpTx,
  pub(crate) h2: H2Tx,
  extensions: Vec<Box<dyn Extension>>,
  parent_writer: Option<Box<dyn ParentWriter>>,
}

impl<T: Transport> Connection<T> {
  pub fn new(transport: T, mode: Mode) -> Self {
    let state = match mode {
      Mode::WsServer | Mode::WsClient | Mode::H2Ws => ConnState::Established,
      Mode::Http1 | Mode::H2 => ConnState::HttpIdle,
    };
    Self {
      transport,
      mode,
      state,
      trunc: TruncationBuffer::default(),
      could_have_pending: false,
      wants_writable: false,
      blocking_send_hinted: false,
      socket_is_permanently_unusable: false,
      last_activity: Instant::now(),
      tx_packet_size: 0,
      rx_buffer_size: 0,
      serv_buf_size: 4096,
      tx_bytes: 0,
      rx_bytes: 0,
      partials: 0,
      partial_bytes: 0,
      ws: WsTx::default(),
      http: HttpTx::default(),
      h2: H2Tx::default(),
      extensions: Vec::new(),
      parent_writer: None,
    }
  }

  pub fn transport(&self) -> &T {
    &self.transport
  }

  pub fn transport_mut(&mut self) -> &mut T {
    &mut self.transport
  }

  pub fn into_inner(self) -> T {
    self.transport
  }

  pub fn mode(&self) -> Mode {
    self.mode
  }

  pub fn state(&self) -> ConnState {
    self.state
  }

  pub fn set_state(&mut self, state: ConnState) {
    self.state = state;
  }

  /// Hint from the protocol about how much it is worth sending at once.
  pub fn set_tx_packet_size(&mut self, size: usize) {
    self.tx_packet_size = size;
  }

  pub fn set_rx_buffer_size(&mut self, size: usize) {
    self.rx_buffer_size = size;
  }

  /// Size of the scratch buffer the file pump works in.
  pub fn set_serv_buf_size(&mut self, size: usize) {
    self.serv_buf_size = size;
  }

  /// Appends a payload-transforming extension to the TX chain.
  pub fn add_extension(&mut self, ext: Box<dyn Extension>) {
    self.extensions.push(ext);
  }

  /// Delegates all writes to a parent connection's protocol handler.
  pub fn set_parent_writer(&mut self, parent: Box<dyn ParentWriter>) {
    self.parent_writer = Some(parent);
  }

  /// An extension holds output pending without more input; the next
  /// writable dispatch owes it an empty continuation write.
  pub fn tx_draining(&self) -> bool {
    self.ws.drain.is_draining()
  }

  /// True once a partial send (or a drain enrollment) latched a request
  /// for another writable notification.
  pub fn needs_writable(&self) -> bool {
    self.wants_writable
  }

  /// The socket reported it would block on the last send attempt.
  pub fn blocking_send_hinted(&self) -> bool {
    self.blocking_send_hinted
  }

  pub fn socket_is_permanently_unusable(&self) -> bool {
    self.socket_is_permanently_unusable
  }

  /// Time since the last successful transport activity; drives the
  /// ping/pong idle timer.
  pub fn idle_for(&self) -> Duration {
    self.last_activity.elapsed()
  }

  pub fn tx_bytes(&self) -> u64 {
    self.tx_bytes
  }

  pub fn rx_bytes(&self) -> u64 {
    self.rx_bytes
  }

  /// (count, bytes) of sends the transport accepted only partially.
  pub fn partial_sends(&self) -> (u64, u64) {
    (self.partials, self.partial_bytes)
  }

  #[inline]
  fn touch(&mut self) {
    self.last_activity = Instant::now();
  }

  pub(crate) fn request_writable(&mut self) {
    self.wants_writable = true;
  }

  /// The event loop's writable dispatch. Clears the rearm latch and the
  /// pending-write hazard; the only legal point to resume after a
  /// partial send.
  pub fn on_writable(&mut self) {
    self.wants_writable = false;
    self.could_have_pending = false;
  }

  /// Replays any staged partial-send tail. Returns `true` when the stage
  /// is empty afterwards; check [`Connection::tx_draining`] to see
  /// whether an extension still owes output.
  pub fn service_writable(&mut self) -> Result<bool, EgressError> {
    self.on_writable();
    if self.trunc.is_empty() {
      return Ok(true);
    }
    self.replay_trunc()?;
    Ok(self.trunc.is_empty())
  }

  /// Probe: is the egress path unable to take another payload right now?
  /// Checking implies (and has the side effect of) a fresh look at
  /// writability, so the pending-write hazard cannot survive it.
  pub fn send_pipe_choked(&mut self) -> bool {
    self.could_have_pending = false;
    !self.trunc.is_empty()
  }

  /// Non-blocking transport read. Restarts the idle timer and bumps RX
  /// accounting on success; transient conditions are an outcome, not an
  /// error.
  pub fn transport_read(
    &mut self,
    buf: &mut [u8],
  ) -> Result<ReadOutcome, EgressError> {
    match self.transport.read(buf) {
      Ok(ReadOutcome::Read(n)) => {
        self.rx_bytes += n as u64;
        self.touch();
        Ok(ReadOutcome::Read(n))
      }
      Ok(ReadOutcome::WouldBlock) => Ok(ReadOutcome::WouldBlock),
      Err(e) => {
        self.socket_is_permanently_unusable = true;
        Err(e.into())
      }
    }
  }

  /// Accepts one application-level write and drives it through framing,
  /// the extension chain, masking and the raw issuer.
  ///
  /// `buf` must carry at least [`PRE`] bytes of headroom; the prefix is
  /// scribbled in place. On success the returned count is payload the
  /// caller may consider handed off (possibly absorbed into the staging
  /// buffer, not necessarily on the wire). Writes in a state that cannot
  /// carry them are silently dropped and report `Ok(0)`.
  pub fn write(
    &mut self,
    buf: &mut HeadroomBuf,
    mut wp: WriteProtocol,
  ) -> Result<usize, EgressError> {
    if let Some(parent) = self.parent_writer.as_mut() {
      let rec = WritePassthru {
        payload: buf.payload(),
        wp,
      };
      parent.child_write(&rec)?;
      return Ok(buf.len());
    }

    let orig_len = buf.len();
    if orig_len > MAX_WRITE_LEN {
      error!(len = orig_len, "suspicious write length");
      return Err(EgressError::PayloadTooLarge(orig_len));
    }
    self.tx_bytes += orig_len as u64;

    if self.ws.drain.is_draining() && self.state.is_ws_writable() {
      if let DrainState::Draining(stashed) = self.ws.drain {
        self.ws.drain = DrainState::Idle;
        wp = WriteProtocol::continuation_of(stashed);
        trace!(?wp, "forced draining write protocol");
      }
    }

    self.touch();

    if wp.kind.is_http() {
      return self.send_raw(buf, 0, wp, orig_len, false);
    }

    // if not in a state to send ws stuff, just send nothing
    if !self.state.is_ws_writable()
      && !(wp.kind == WriteKind::Close && self.state.in_close_handshake())
    {
      debug!(state = ?self.state, kind = ?wp.kind, "binning write");
      return Ok(0);
    }

    let masked = self.mode == Mode::WsClient;
    let mut pre = 0;

    if !self.ws.inside_frame {
      self.ws.clean_buffer = true;

      if !wp.kind.is_ws_control() {
        let chain = ext::run_payload_tx(&mut self.extensions, buf, wp)?;

        if chain.replaced && orig_len > 0 && buf.is_empty() {
          // the extension ate the input but has nothing to issue yet;
          // hold the write type so the eventual emission can use it
          if !matches!(self.ws.drain, DrainState::InputStashed(_)) {
            self.ws.drain = DrainState::InputStashed(wp.kind);
          }
          return Ok(orig_len);
        }
        if !buf.is_empty() {
          if let DrainState::InputStashed(kind) = self.ws.drain {
            self.ws.drain = DrainState::Idle;
            wp.kind = kind;
          }
        }
        if chain.more && !buf.is_empty() {
          trace!(len = buf.len(), "extension requires further draining");
          // keep the write that provoked these fragments so the last
          // one can use its FIN state; this intermediate one must not
          // go out with a FIN
          self.ws.drain = DrainState::Draining(wp);
          self.request_writable();
          wp.flags.no_fin = true;
        }
        if chain.replaced {
          self.ws.clean_buffer = false;
        }
      }

      let opcode = match wp.kind.ws_opcode() {
        Some(op) => op,
        None => {
          warn!(kind = ?wp.kind, "unknown write opcode");
          return Err(EgressError::UnknownWriteKind);
        }
      };
      pre = frame::prepend_header(buf, opcode, !wp.flags.no_fin, masked)?;
    }

    if masked {
      if !self.ws.inside_frame {
        let mut nonce = [0u8; 4];
        mask::generate(&mut nonce)?;
        self.ws.mask = nonce;
        self.ws.mask_idx = 0;
      }
      let nonce = self.ws.mask;
      let mut idx = self.ws.mask_idx;
      mask::apply(buf.payload_mut(), &nonce, &mut idx);
      self.ws.mask_idx = idx;
      if pre > 0 {
        // the reserved slot between the length field and the payload
        buf.prefix_mut(4)?.copy_from_slice(&nonce);
      }
    }

    self.send_raw(buf, pre, wp, orig_len, true)
  }

  /// Send-raw stage shared by WS-framed and plain HTTP writes: HTTP/2
  /// reframing when the mode calls for it, then the raw issuer.
  fn send_raw(
    &mut self,
    buf: &mut HeadroomBuf,
    pre: usize,
    mut wp: WriteProtocol,
    orig_len: usize,
    ws_framed: bool,
  ) -> Result<usize, EgressError> {
    if self.mode.is_h2() {
      let mut flags = 0u8;
      let mut ty = h2::FrameType::Data;

      match wp.kind {
        WriteKind::HttpHeaders => {
          ty = h2::FrameType::Headers;
          if !wp.flags.no_fin {
            flags |= h2::FLAG_END_HEADERS;
          }
          if self.h2.send_end_stream || wp.flags.h2_stream_end {
            flags |= h2::FLAG_END_STREAM;
            self.h2.send_end_stream = true;
          }
        }
        WriteKind::HttpHeadersContinuation => {
          ty = h2::FrameType::Continuation;
          if !wp.flags.no_fin {
            flags |= h2::FLAG_END_HEADERS;
          }
          if self.h2.send_end_stream || wp.flags.h2_stream_end {
            flags |= h2::FLAG_END_STREAM;
            self.h2.send_end_stream = true;
          }
        }
        WriteKind::Http | WriteKind::HttpFinal
          if self.http.tx_content_length > 0 =>
        {
          self.http.tx_content_remain =
            self.http.tx_content_remain.saturating_sub(orig_len as u64);
          trace!(
            remain = self.http.tx_content_remain,
            "content-length accounting"
          );
          if self.http.tx_content_remain == 0 {
            debug!("selecting final write mode");
            wp.kind = WriteKind::HttpFinal;
          }
        }
        _ => {}
      }

      if wp.kind == WriteKind::HttpFinal || wp.flags.h2_stream_end {
        debug!("setting END_STREAM");
        flags |= h2::FLAG_END_STREAM;
        self.h2.send_end_stream = true;
      }

      let wire_len = buf.len() + pre + h2::FRAME_HEADER_LEN;
      let n = self.h2_frame_write(ty, flags, buf, pre)?;
      if ws_framed {
        self.ws.inside_frame = n != wire_len;
      }
      return Ok(orig_len);
    }

    if matches!(wp.kind, WriteKind::Http | WriteKind::HttpFinal)
      && self.http.tx_content_length > 0
    {
      self.http.tx_content_remain =
        self.http.tx_content_remain.saturating_sub(orig_len as u64);
    }

    let wire_len = buf.len() + pre;
    let n = self.issue_raw_ext_access(buf, pre)?;
    if ws_framed {
      self.ws.inside_frame = true;
      if n == wire_len {
        // everything in the buffer was handled (or staged)
        self.ws.inside_frame = false;
        return Ok(orig_len);
      }
      if self.ws.clean_buffer {
        // how many bytes of the user's own buffer got consumed
        return Ok(n.saturating_sub(pre));
      }
    }
    Ok(orig_len)
  }

  /// L3: raw issue with a last look by the extension chain, which may
  /// claim transport responsibility for the bytes itself.
  pub(crate) fn issue_raw_ext_access(
    &mut self,
    buf: &HeadroomBuf,
    pre: usize,
  ) -> Result<usize, EgressError> {
    self.issue_raw_inner(buf.wire(pre), true)
  }

  /// L2: hands bytes to the transport, absorbing any unsent tail into
  /// the staging buffer. Returns bytes the caller may consider handed
  /// off, which is the full length on a clean or fully-staged send.
  pub fn issue_raw(&mut self, buf: &[u8]) -> Result<usize, EgressError> {
    self.issue_raw_inner(buf, false)
  }

  fn issue_raw_inner(
    &mut self,
    wire: &[u8],
    ext_access: bool,
  ) -> Result<usize, EgressError> {
    if self.socket_is_permanently_unusable {
      return Err(EgressError::ConnectionUnusable);
    }
    // Detect being called twice without going through the event loop:
    // back-to-back writes in one writable dispatch, or a write from
    // outside the writable callback.
    if self.could_have_pending {
      error!(len = wire.len(), "illegal back-to-back write");
      debug_assert!(false, "back-to-back write");
      return Err(EgressError::BackToBackWrite);
    }
    if wire.is_empty() {
      return Ok(0);
    }
    // just ignore sends after we cleared the staging buffer
    if self.state == ConnState::FlushingBeforeClose && self.trunc.is_empty()
    {
      return Ok(wire.len());
    }
    if !self.trunc.is_empty() {
      error!(
        len = wire.len(),
        pending = self.trunc.len(),
        "new write while a truncated send is pending"
      );
      debug_assert!(false, "aliased write during truncation");
      return Err(EgressError::AliasedWrite);
    }

    let n = if ext_access && !self.extensions.is_empty() {
      match ext::run_packet_tx(&mut self.extensions, wire)? {
        Some(handled) => handled,
        None => self.transport_write_capped(wire)?,
      }
    } else {
      self.transport_write_capped(wire)?
    };

    self.absorb_shortfall(wire, n)
  }

  /// Offers at most the per-call rate cap to the transport.
  fn transport_write_capped(
    &mut self,
    wire: &[u8],
  ) -> Result<usize, EgressError> {
    let mut cap = if self.tx_packet_size > 0 {
      self.tx_packet_size
    } else if self.rx_buffer_size > 0 {
      self.rx_buffer_size
    } else {
      self.serv_buf_size
    };
    cap += PRE + 4;
    let offer = cap.min(wire.len());

    let outcome = match self.transport.write(&wire[..offer]) {
      Ok(o) => o,
      Err(e) => {
        // we're going to close, let close know sends aren't possible
        self.socket_is_permanently_unusable = true;
        return Err(e.into());
      }
    };
    // something got written, it can have been truncated now
    self.could_have_pending = true;

    match outcome {
      WriteOutcome::Written(n) => {
        self.touch();
        Ok(n)
      }
      WriteOutcome::WouldBlock { hint } => {
        // nothing got sent, not fatal; treat as a truncated send so the
        // whole thing is retried later
        if hint {
          self.blocking_send_hinted = true;
        }
        Ok(0)
      }
    }
  }

  /// Stages whatever the transport did not take. The staged tail gets
  /// first priority next time the socket is writable.
  fn absorb_shortfall(
    &mut self,
    wire: &[u8],
    n: usize,
  ) -> Result<usize, EgressError> {
    let real_len = wire.len();
    if n == real_len {
      return Ok(n);
    }

    trace!(sent = n, total = real_len, "new partial send");
    self.partials += 1;
    self.partial_bytes += n as u64;

    if let Err(e) = self.trunc.absorb(&wire[n..]) {
      error!(len = real_len - n, "unable to stage truncated send");
      self.socket_is_permanently_unusable = true;
      return Err(e);
    }
    // since something is staged, force another chance to send
    self.request_writable();
    Ok(real_len)
  }

  /// Replays the staged window. Advances past whatever the transport
  /// takes; on draining it while flushing-before-close, tells the caller
  /// to go ahead and close.
  pub(crate) fn replay_trunc(&mut self) -> Result<usize, EgressError> {
    if self.socket_is_permanently_unusable {
      return Err(EgressError::ConnectionUnusable);
    }
    if self.could_have_pending {
      error!("illegal back-to-back write during replay");
      debug_assert!(false, "back-to-back write");
      return Err(EgressError::BackToBackWrite);
    }
    if self.trunc.is_empty() {
      return Ok(0);
    }

    let mut cap = if self.tx_packet_size > 0 {
      self.tx_packet_size
    } else if self.rx_buffer_size > 0 {
      self.rx_buffer_size
    } else {
      self.serv_buf_size
    };
    cap += PRE + 4;
    let offer = cap.min(self.trunc.len());

    let outcome =
      match self.transport.write(&self.trunc.pending()[..offer]) {
        Ok(o) => o,
        Err(e) => {
          self.socket_is_permanently_unusable = true;
          return Err(e.into());
        }
      };
    self.could_have_pending = true;

    let n = match outcome {
      WriteOutcome::Written(n) => {
        self.touch();
        n
      }
      WriteOutcome::WouldBlock { hint } => {
        if hint {
          self.blocking_send_hinted = true;
        }
        0
      }
    };

    trace!(advanced = n, "partial advance");
    self.trunc.advance(n);
    if self.trunc.is_empty() {
      debug!("partial send completed");
      if self.state == ConnState::FlushingBeforeClose {
        debug!("signalling to close now");
        return Err(EgressError::CloseAfterFlush);
      }
    }
    // always come back for another look
    self.request_writable();
    Ok(n)
  }
}
