#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    // Parse and validation errors are fine; panics are not
    if let Ok(cfg) = flowmeter_config::load_toml(data)
        && cfg.validate().is_ok()
    {
        let _ = flowmeter_core::SessionConfig::from_config(&cfg, None, None).validate();
    }
});
