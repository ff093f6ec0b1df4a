#![no_main]
use libfuzzer_sys::fuzz_target;
use raxe::telemetry::queue::should_sample_event;

fuzz_target!(|data: &[u8]| {
    if data.len() < 8 {
        return;
    }
    let rate_bits = u32::from_le_bytes(data[0..4].try_into().unwrap());
    let sample_rate = (rate_bits as f64 / u32::MAX as f64).clamp(0.0, 1.0);
    if let Ok(hash) = std::str::from_utf8(&data[4..]) {
        let first = should_sample_event(sample_rate, hash);
        let second = should_sample_event(sample_rate, hash);
        assert_eq!(first, second, "sampling must be deterministic for the same hash");
    }
});
