// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Static per-wicket positional metadata.
//!
//! Each wicket (a lighting controller placed on the course) has a fixed
//! position in a virtual 1D strip and one or more slots in the play order.
//! Patterns that need this are told via the command's `setVars` channel:
//!
//! ```text
//! {"programName": "chase"}
//!     │  device name "Croquetia5"
//!     ▼
//! {"programName": "chase",
//!  "setVars": {"myLoc": 3, "myStartingPixel": 94, "myPlayOrderLocs": [3]}}
//! ```
//!
//! The table is built once at startup and never mutated.

use crate::device::Command;
use crate::error::{FleetError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;

/// Command key whose presence triggers metadata injection.
pub const PROGRAM_NAME_KEY: &str = "programName";

/// Command key of the device's variable-setting channel.
pub const SET_VARS_KEY: &str = "setVars";

/// Position of one wicket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WicketMetadata {
    /// 0-based position in the virtual strip (first visit).
    pub loc: u32,
    /// Pixel offset of this wicket in the virtual strip.
    pub starting_pixel: u32,
    /// 0-based visit order(s) in a full game.
    pub play_order_locs: Vec<u32>,
}

impl WicketMetadata {
    pub fn new(loc: u32, starting_pixel: u32, play_order_locs: impl Into<Vec<u32>>) -> Self {
        Self {
            loc,
            starting_pixel,
            play_order_locs: play_order_locs.into(),
        }
    }
}

const REFERENCE_TABLE: [(&str, u32, u32, &[u32]); 11] = [
    ("Croquetia1", 0, 0, &[0, 15]),
    ("Croquetia3", 1, 18, &[1, 14]),
    ("Croquetia4", 2, 56, &[2, 13]),
    ("Croquetia5", 3, 94, &[3]),
    ("Croquetia6", 4, 132, &[4, 12]),
    ("Croquetia7", 5, 170, &[5]),
    ("Croquetia8", 6, 208, &[6, 10]),
    ("Croquetia9", 7, 246, &[7, 9]),
    ("Croquetia2", 8, 284, &[8]),
    ("Croquetia10", 9, 302, &[11]),
    ("Croquetia11", 10, 340, &[13]),
];

/// Device name → [`WicketMetadata`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WicketTable {
    entries: HashMap<String, WicketMetadata>,
}

impl WicketTable {
    /// Table with no entries (every lookup misses).
    pub fn empty() -> Self {
        Self::default()
    }

    /// The 11-wicket reference course.
    pub fn reference() -> Self {
        REFERENCE_TABLE
            .iter()
            .map(|(name, loc, pixel, order)| (name.to_string(), WicketMetadata::new(*loc, *pixel, order.to_vec())))
            .collect()
    }

    /// Load a table from a JSON object keyed by device name.
    ///
    /// Rejects tables where two wickets share a `loc`.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let entries: HashMap<String, WicketMetadata> = serde_json::from_str(json)
            .map_err(|e| FleetError::Config(format!("invalid wicket table: {}", e)))?;

        let mut seen: HashMap<u32, &str> = HashMap::new();
        for (name, meta) in &entries {
            if let Some(other) = seen.insert(meta.loc, name) {
                return Err(FleetError::Config(format!(
                    "wicket table: loc {} used by both {} and {}",
                    meta.loc, other, name
                )));
            }
        }
        Ok(Self { entries })
    }

    pub fn lookup(&self, device_name: &str) -> Option<&WicketMetadata> {
        self.entries.get(device_name)
    }

    /// Like [`lookup`](Self::lookup), but a miss is an error.
    pub fn require(&self, device_name: &str) -> Result<&WicketMetadata> {
        self.lookup(device_name).ok_or_else(|| FleetError::MetadataLookupFailed {
            device_name: device_name.to_string(),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, WicketMetadata)> for WicketTable {
    fn from_iter<I: IntoIterator<Item = (String, WicketMetadata)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Whether a command selects a program and therefore wants metadata.
pub fn wants_metadata(command: &Command) -> bool {
    command.contains_key(PROGRAM_NAME_KEY)
}

/// Derive a per-target command carrying `meta` in `setVars`.
///
/// The input is left untouched. Existing `setVars` entries other than the
/// three injected ones are kept; a non-object `setVars` is replaced.
pub fn augment_command(command: &Command, meta: &WicketMetadata) -> Command {
    let mut augmented = command.clone();

    let mut vars = match augmented.remove(SET_VARS_KEY) {
        Some(Value::Object(vars)) => vars,
        _ => Map::new(),
    };
    vars.insert("myLoc".to_string(), json!(meta.loc));
    vars.insert("myStartingPixel".to_string(), json!(meta.starting_pixel));
    vars.insert("myPlayOrderLocs".to_string(), json!(meta.play_order_locs));

    augmented.insert(SET_VARS_KEY.to_string(), Value::Object(vars));
    augmented
}
