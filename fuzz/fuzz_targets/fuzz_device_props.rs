//! Fuzz target for device property parsing.
//!
//! Controllers report arbitrary JSON; parsing and id extraction must never panic.

#![no_main]

use libfuzzer_sys::fuzz_target;
use pattern_sync::DeviceProps;

fuzz_target!(|data: &[u8]| {
    if let Ok(props) = serde_json::from_slice::<DeviceProps>(data) {
        let _ = props.display_name();
        let _ = props.program_ids();
    }
});
