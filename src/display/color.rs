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

//! Side to display color mapping.

use serde::{Deserialize, Serialize};

use crate::tracker::Side;

/// Color tags the display controller knows how to render.
pub const PALETTE: &[&str] = &["red", "green", "blue", "white", "yellow", "cyan", "magenta"];

/// Whether the display controller renders this tag (case-insensitive).
pub fn is_known_color(tag: &str) -> bool {
    PALETTE.iter().any(|c| c.eq_ignore_ascii_case(tag))
}

/// One entry of the ordered mapping table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorRule {
    /// Sides this rule covers.
    pub sides: Vec<u8>,
    /// Color tag sent to the display.
    pub color: String,
}

impl ColorRule {
    pub fn new(sides: &[u8], color: impl Into<String>) -> Self {
        Self {
            sides: sides.to_vec(),
            color: color.into(),
        }
    }

    fn matches(&self, side: Side) -> bool {
        self.sides.contains(&side.get())
    }
}

/// Maps each side to a color tag. The first matching rule wins; sides no rule
/// covers get the fallback, which may be `None` for the display default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColorMapper {
    rules: Vec<ColorRule>,
    fallback: Option<String>,
}

impl ColorMapper {
    pub fn new(rules: Vec<ColorRule>, fallback: Option<String>) -> Self {
        Self { rules, fallback }
    }

    /// Color for a side, or `None` to let the display pick.
    pub fn color_for(&self, side: Side) -> Option<&str> {
        self.rules
            .iter()
            .find(|rule| rule.matches(side))
            .map(|rule| rule.color.as_str())
            .or(self.fallback.as_deref())
    }

    pub fn rules(&self) -> &[ColorRule] {
        &self.rules
    }

    pub fn fallback(&self) -> Option<&str> {
        self.fallback.as_deref()
    }
}

impl Default for ColorMapper {
    /// Focus sides green, break sides red, the rest white.
    fn default() -> Self {
        Self::new(default_rules(), Some("white".to_string()))
    }
}

/// Default banding for an eight-sided tracker.
pub fn default_rules() -> Vec<ColorRule> {
    vec![
        ColorRule::new(&[1, 2, 3], "green"),
        ColorRule::new(&[4, 5, 6], "red"),
        ColorRule::new(&[7, 8], "white"),
    ]
}
