#![no_main]

use libfuzzer_sys::fuzz_target;
use plugin_store::requirement::{dependencies_from_metadata, render_for_installer, Requirement};

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        let _ = dependencies_from_metadata(text);
        let rendered = render_for_installer(text);
        // a rendered requirement parses back to itself
        if let Ok(req) = text.parse::<Requirement>() {
            assert_eq!(rendered, req.to_string());
            let again: Requirement = rendered.parse().expect("rendered requirement parses");
            assert_eq!(again.to_string(), rendered);
        }
    }
});
