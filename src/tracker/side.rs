// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Orientation payload decoding.
//!
//! The tracker reports the face currently pointing up as the first byte of
//! the orientation characteristic. `0` means the tracker is lying flat on its
//! base and is not on any face.

use std::fmt;
use thiserror::Error;

/// Face of the tracker, guaranteed to lie in `[1, supported_sides]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Side(u8);

impl Side {
    /// Classify a raw value against the supported range.
    pub fn new(raw: u8, supported_sides: u8) -> Result<Self, SideDecodeError> {
        if raw >= 1 && raw <= supported_sides {
            Ok(Self(raw))
        } else {
            Err(SideDecodeError::OutOfRange(raw))
        }
    }

    /// Numeric face value.
    pub fn get(self) -> u8 {
        self.0
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reasons a payload does not carry a usable side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SideDecodeError {
    #[error("empty orientation payload")]
    Empty,
    #[error("invalid side: {0}")]
    OutOfRange(u8),
}

impl SideDecodeError {
    /// Raw byte that failed classification, if the payload had one.
    pub fn raw(&self) -> Option<u8> {
        match self {
            Self::Empty => None,
            Self::OutOfRange(raw) => Some(*raw),
        }
    }
}

/// Pure decoder for orientation notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SideDecoder {
    supported_sides: u8,
}

impl SideDecoder {
    pub fn new(supported_sides: u8) -> Self {
        Self { supported_sides }
    }

    /// Number of faces of the tracked object.
    pub fn supported_sides(&self) -> u8 {
        self.supported_sides
    }

    /// Decode a raw notification payload.
    ///
    /// Trailing bytes are ignored; only the leading byte carries the side.
    pub fn decode(&self, payload: &[u8]) -> Result<Side, SideDecodeError> {
        let raw = *payload.first().ok_or(SideDecodeError::Empty)?;
        Side::new(raw, self.supported_sides)
    }

    /// Whether a raw value falls in the supported range.
    pub fn is_valid(&self, raw: u8) -> bool {
        Side::new(raw, self.supported_sides).is_ok()
    }
}
