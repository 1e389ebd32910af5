// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Pretty printers for reporting information.

use std::{borrow::Cow, sync::Mutex};

use log::Level;

const VERTICAL: char = '│';
const UP_AND_RIGHT: char = '└';
const VERTICAL_AND_RIGHT: char = '├';

lazy_static::lazy_static! {
    static ref DEFERRED_WARNINGS: Mutex<Vec<Vec<Cow<'static, str>>>> = Mutex::new(vec![]);
}

/// Log a title, then each block of lines as a branch of a tree:
///
/// ```text
/// Image geometry
/// ├ 256x256 pixels
/// │ 60" cells
/// └ Stokes I
/// ```
fn draw_tree(level: Level, title: &str, blocks: &[Vec<Cow<'static, str>>]) {
    log::log!(level, "{}", console::style(title).bold());
    let num_blocks = blocks.len();
    for (i_block, block) in blocks.iter().enumerate() {
        let last_block = i_block + 1 == num_blocks;
        for (i_line, line) in block.iter().enumerate() {
            let symbol = match (i_line, i_line + 1 == block.len(), last_block) {
                (0, true, true) => UP_AND_RIGHT,
                (0, _, _) => VERTICAL_AND_RIGHT,
                _ => VERTICAL,
            };
            log::log!(level, "{symbol} {line}");
        }
    }
    log::log!(level, "");
}

pub(crate) struct InfoPrinter {
    title: Cow<'static, str>,
    blocks: Vec<Vec<Cow<'static, str>>>,
}

impl InfoPrinter {
    pub(crate) fn new(title: Cow<'static, str>) -> Self {
        Self {
            title,
            blocks: vec![],
        }
    }

    pub(crate) fn push_line(&mut self, line: Cow<'static, str>) {
        self.blocks.push(vec![line]);
    }

    pub(crate) fn push_block(&mut self, block: Vec<Cow<'static, str>>) {
        self.blocks.push(block);
    }

    pub(crate) fn display(self) {
        draw_tree(Level::Info, &self.title, &self.blocks);
    }
}

/// Something that can be shown to the user as a warning once all arguments
/// have been parsed.
pub(crate) trait Warn {
    fn warn(self);
}

fn defer(block: Vec<Cow<'static, str>>) {
    match DEFERRED_WARNINGS.lock() {
        Ok(mut warnings) => warnings.push(block),
        // Nothing can be deferred; say it now.
        Err(_) => block.iter().for_each(|l| log::warn!("{l}")),
    }
}

impl Warn for &'static str {
    fn warn(self) {
        defer(vec![self.into()]);
    }
}

impl Warn for String {
    fn warn(self) {
        defer(vec![self.into()]);
    }
}

impl Warn for Vec<Cow<'static, str>> {
    fn warn(self) {
        defer(self);
    }
}

/// Print out any warnings that have been collected as CLI arguments have been
/// parsed. This should only be called once before all arguments have been
/// parsed into parameters.
pub(crate) fn display_warnings() {
    log::debug!("Displaying warnings");
    let blocks = match DEFERRED_WARNINGS.lock() {
        Ok(mut warnings) => std::mem::take(&mut *warnings),
        Err(_) => return,
    };
    if !blocks.is_empty() {
        draw_tree(Level::Warn, "Warnings", &blocks);
    }
}

#[cfg(test)]
pub(super) fn num_deferred_warnings() -> usize {
    DEFERRED_WARNINGS.lock().map(|w| w.len()).unwrap_or(0)
}
