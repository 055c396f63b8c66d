//! Fuzz target for the BGP static routes file parser.
//!
//! Run with: cargo +nightly fuzz run fuzz_routes_parser

#![no_main]

use std::net::IpAddr;

use jetkit_config::routes::RoutesFile;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(s) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(routes) = RoutesFile::parse(s) {
        let mut paths = 0;
        for route in &routes.routes {
            assert!(route.length <= 32);
            for nexthop in &route.nexthops {
                assert!(nexthop.parse::<IpAddr>().is_ok());
                paths += 1;
            }
        }
        assert_eq!(paths, routes.path_count());
    }
});
