#![no_main]
use libfuzzer_sys::fuzz_target;
use raxe::l1::executor::RuleExecutor;
use raxe::packs::model::builtin_rules;

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let executor = RuleExecutor::new();
        let rules = builtin_rules();
        rt.block_on(async {
            let first = executor.execute_rules(text, &rules).await;
            let second = executor.execute_rules(text, &rules).await;
            assert_eq!(first.detections.len(), second.detections.len(), "non-deterministic rule matching");
        });
    }
});
