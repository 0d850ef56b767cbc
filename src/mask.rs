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

use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::EgressError;

/// Fetches a fresh 4-byte per-frame nonce from the OS random source.
///
/// The write that needed the nonce must fail if the source cannot supply
/// all four bytes.
pub(crate) fn generate(mask: &mut [u8; 4]) -> Result<(), EgressError> {
  OsRng
    .try_fill_bytes(mask)
    .map_err(EgressError::MaskSource)
}

/// XORs `payload` with the frame nonce, continuing from `idx`.
///
/// `idx` survives across calls so a frame whose payload is emitted in
/// several pieces keys every byte against the same running position.
pub fn apply(payload: &mut [u8], mask: &[u8; 4], idx: &mut u32) {
  for b in payload.iter_mut() {
    *b ^= mask[(*idx & 3) as usize];
    *idx = idx.wrapping_add(1);
  }
}
