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

//! Display controller side: color selection and command dispatch.

mod color;
mod dispatcher;

pub use color::{default_rules, is_known_color, ColorMapper, ColorRule, PALETTE};
pub use dispatcher::{CommandDispatcher, DispatchError, DispatchRequest};

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

use crate::tracker::{Side, SideChangeHandler};

/// Side-change pipeline: pick a color, then push the side to the display.
pub struct DisplayUpdater {
    mapper: ColorMapper,
    dispatcher: CommandDispatcher,
}

impl DisplayUpdater {
    pub fn new(mapper: ColorMapper, dispatcher: CommandDispatcher) -> Self {
        Self { mapper, dispatcher }
    }

    pub fn mapper(&self) -> &ColorMapper {
        &self.mapper
    }

    pub fn dispatcher(&self) -> &CommandDispatcher {
        &self.dispatcher
    }
}

#[async_trait]
impl SideChangeHandler for DisplayUpdater {
    async fn on_side_change(&self, device_name: &str, side: Side) -> Result<()> {
        let color = self.mapper.color_for(side);
        info!(
            "{} side {} detected, updating display ({})",
            device_name,
            side,
            color.unwrap_or("default")
        );
        self.dispatcher.dispatch(side, color).await?;
        Ok(())
    }
}
