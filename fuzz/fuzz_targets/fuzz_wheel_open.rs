#![no_main]

use libfuzzer_sys::fuzz_target;
use plugin_store::wheel::Wheel;

fuzz_target!(|data: &[u8]| {
    if let Ok(mut wheel) = Wheel::from_bytes(data.to_vec()) {
        if let Ok(entries) = wheel.manifest() {
            for entry in entries.iter().filter(|e| e.is_code()) {
                let _ = plugin_store::wheel::safe_relative_path(&entry.path);
            }
        }
        let _ = wheel.dependencies();
    }
});
