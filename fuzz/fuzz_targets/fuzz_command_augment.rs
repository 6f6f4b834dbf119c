//! Fuzz target for command augmentation.
//!
//! Any JSON object must augment without panicking, and the result must
//! always carry an object `setVars`.

#![no_main]

use libfuzzer_sys::fuzz_target;
use pattern_sync::metadata::{augment_command, wants_metadata};
use pattern_sync::{Command, WicketMetadata};

fuzz_target!(|data: &[u8]| {
    let Ok(command) = serde_json::from_slice::<Command>(data) else {
        return;
    };

    let _ = wants_metadata(&command);
    let augmented = augment_command(&command, &WicketMetadata::new(3, 94, [3]));
    assert!(augmented.get("setVars").is_some_and(|v| v.is_object()));
});
