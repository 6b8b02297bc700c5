#![no_main]

use covprobe::capabilities::{CapabilityEditor, INTERNET_PERMISSION};
use libfuzzer_sys::fuzz_target;
use std::path::PathBuf;

fuzz_target!(|data: &[u8]| {
    // Convert arbitrary bytes to UTF-8 string
    if let Ok(input) = std::str::from_utf8(data) {
        // Scanning and rendering must not panic regardless of input
        if let Ok(mut editor) =
            CapabilityEditor::from_content(PathBuf::from("fuzz.xml"), input.to_string())
        {
            let _ = editor.package_name();
            editor.add_capability(INTERNET_PERMISSION);
            let _ = editor.render();
        }
    }
});
