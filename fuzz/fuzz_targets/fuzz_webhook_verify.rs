#![no_main]
use libfuzzer_sys::fuzz_target;
use raxe::telemetry::webhook::verify_webhook_signature;

fuzz_target!(|data: &[u8]| {
    if data.len() < 9 {
        return;
    }
    let timestamp = i64::from_le_bytes(data[0..8].try_into().unwrap());
    if let Ok(signature) = std::str::from_utf8(&data[8..]) {
        // Should never panic regardless of how malformed the signature is.
        let _ = verify_webhook_signature(data, signature, timestamp, "fuzz-secret", 300);
    }
});
