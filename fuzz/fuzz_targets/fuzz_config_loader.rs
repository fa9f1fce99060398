#![no_main]

use libfuzzer_sys::fuzz_target;

// The config loader must never panic, whatever bytes an operator feeds it;
// parse failures and validation failures are both acceptable outcomes.
fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        if let Ok(cfg) = beamwalk_config::Config::from_toml(text) {
            let _ = cfg.validate();
        }
    }
});
