//! Fuzz target for the bridge and router configuration parser.
//!
//! Run with: cargo +nightly fuzz run fuzz_config_parser

#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(s) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(config) = jetkit_config::AppConfig::parse(s) {
        // Anything that parsed has passed validation.
        assert!(config.bridge.port != 0);
        assert!(config.daemon.rotate_interval_secs != 0);
        assert!(config.daemon.umask <= 0o777);
    }
});
