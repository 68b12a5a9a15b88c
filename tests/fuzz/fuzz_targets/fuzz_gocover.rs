#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Profile parsing and annotation must not panic on any input.
    if let Ok(profiles) = beautiful_coverage::parsers::gocover::parse(data) {
        let source = String::from_utf8_lossy(data);
        for profile in &profiles {
            let _ = profile.coverage();
            let _ = beautiful_coverage::annotate::annotate(&profile.blocks, &source);
        }
    }
});
