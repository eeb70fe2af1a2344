#![no_main]

use libfuzzer_sys::fuzz_target;
use plugin_store::simple_index::{newest_wheel, wheel_links};

fuzz_target!(|data: &[u8]| {
    if let Ok(html) = std::str::from_utf8(data) {
        let links = wheel_links(html);
        if let Some(newest) = newest_wheel(&links) {
            assert!(newest.filename.to_ascii_lowercase().ends_with(".whl"));
        }
    }
});
