//! Fuzz target for wicket table loading.

#![no_main]

use libfuzzer_sys::fuzz_target;
use pattern_sync::WicketTable;

fuzz_target!(|data: &str| {
    if let Ok(table) = WicketTable::from_json_str(data) {
        assert_eq!(table.is_empty(), table.len() == 0);
    }
});
