#![no_main]

use demora::provider::RecordBundle;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Convert arbitrary bytes to UTF-8 string (lossy conversion)
    if let Ok(input) = std::str::from_utf8(data) {
        // Attempt to parse a records export
        // This should not panic regardless of input
        if let Ok(bundle) = serde_json::from_str::<RecordBundle>(input) {
            let _ = RecordBundle::new(bundle.tasks);
        }
    }
});
