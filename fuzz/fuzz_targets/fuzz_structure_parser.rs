#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Structure files come from disk and may be truncated or hand-edited;
    // parsing must either fail cleanly or yield a tree that passes validation
    if let Ok(xml) = std::str::from_utf8(data)
        && let Ok(tree) = cadscene::cache::parse_structure(xml)
    {
        assert!(cadscene::validate_scene(&tree, None).is_ok());
    }
});
