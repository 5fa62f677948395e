#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Raw socket bytes, possibly not UTF-8 and possibly truncated mid-line
    let text = String::from_utf8_lossy(data);
    if let Ok(value) = sunmine::miner::parse_reply(&text) {
        let _ = sunmine::miner::MinerSnapshot::from_summary(&value);
    }
});
