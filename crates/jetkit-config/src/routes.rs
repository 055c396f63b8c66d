//! BGP static routes file.
//!
//! ## TOML Example
//!
//! ```toml
//! [basics]
//! localPref = 200
//! routePref = 10
//! asPathStr = "65000 65001"
//! originator = "10.0.0.1"
//! cluster = "10.0.0.2"
//!
//! [[route]]
//! prefix = "192.0.2.0"
//! length = 24
//! nexthops = ["10.0.0.10", "10.0.0.11"]
//! ```

use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::ConfigError;

/// Attributes applied to every route in the file.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Basics {
    #[serde(rename = "localPref", default)]
    pub local_pref: u32,

    #[serde(rename = "routePref", default)]
    pub route_pref: u32,

    #[serde(rename = "asPathStr", default)]
    pub as_path: String,

    #[serde(default)]
    pub originator: String,

    #[serde(default)]
    pub cluster: String,
}

/// One destination prefix and the next hops it is announced with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteConfig {
    pub prefix: String,
    pub length: u32,
    #[serde(default)]
    pub nexthops: Vec<String>,
}

/// Parsed routes file.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct RoutesFile {
    #[serde(default)]
    pub basics: Basics,

    #[serde(rename = "route", default)]
    pub routes: Vec<RouteConfig>,
}

impl RoutesFile {
    /// Load a routes file using async I/O.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path).await?;
        let routes = Self::parse(&content)?;
        debug!(
            path = %path.display(),
            routes = routes.routes.len(),
            "Loaded routes file"
        );
        Ok(routes)
    }

    /// Parse a routes file from a TOML string.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let routes: RoutesFile = toml::from_str(s)?;
        routes.validate()?;
        Ok(routes)
    }

    /// Validate every route: IPv4 prefix, length within 0..=32, parseable next hops.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (i, route) in self.routes.iter().enumerate() {
            if route.prefix.parse::<Ipv4Addr>().is_err() {
                return Err(ConfigError::Validation(format!(
                    "route[{i}].prefix must be an IPv4 address, got {:?}",
                    route.prefix
                )));
            }
            if route.length > 32 {
                return Err(ConfigError::Validation(format!(
                    "route[{i}].length must be at most 32, got {}",
                    route.length
                )));
            }
            for (j, hop) in route.nexthops.iter().enumerate() {
                if hop.parse::<IpAddr>().is_err() {
                    return Err(ConfigError::Validation(format!(
                        "route[{i}].nexthops[{j}] must be an IP address, got {hop:?}"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Total number of (route, next hop) pairs, i.e. entries an add request carries.
    pub fn path_count(&self) -> usize {
        self.routes.iter().map(|r| r.nexthops.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = r#"
        [basics]
        localPref = 200
        routePref = 10
        asPathStr = "65000 65001"
        originator = "10.0.0.1"
        cluster = "10.0.0.2"

        [[route]]
        prefix = "192.0.2.0"
        length = 24
        nexthops = ["10.0.0.10", "10.0.0.11"]

        [[route]]
        prefix = "198.51.100.0"
        length = 25
        nexthops = ["10.0.0.12"]
    "#;

    #[test]
    fn test_parse_sample() {
        let file = RoutesFile::parse(SAMPLE).unwrap();
        assert_eq!(file.basics.local_pref, 200);
        assert_eq!(file.basics.route_pref, 10);
        assert_eq!(file.basics.as_path, "65000 65001");
        assert_eq!(file.routes.len(), 2);
        assert_eq!(file.routes[0].nexthops, vec!["10.0.0.10", "10.0.0.11"]);
        assert_eq!(file.path_count(), 3);
    }

    #[test]
    fn test_empty_file() {
        let file = RoutesFile::parse("").unwrap();
        assert!(file.routes.is_empty());
        assert_eq!(file.path_count(), 0);
    }

    #[test]
    fn test_route_without_nexthops() {
        let file = RoutesFile::parse(
            r#"
            [[route]]
            prefix = "203.0.113.0"
            length = 24
        "#,
        )
        .unwrap();
        assert!(file.routes[0].nexthops.is_empty());
    }

    #[test]
    fn test_rejects_bad_prefix() {
        let result = RoutesFile::parse(
            r#"
            [[route]]
            prefix = "not-an-address"
            length = 24
        "#,
        );
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_rejects_long_prefix_length() {
        let result = RoutesFile::parse(
            r#"
            [[route]]
            prefix = "192.0.2.0"
            length = 33
        "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_bad_nexthop() {
        let result = RoutesFile::parse(
            r#"
            [[route]]
            prefix = "192.0.2.0"
            length = 24
            nexthops = ["10.0.0.1", "gateway"]
        "#,
        );
        let err = result.unwrap_err().to_string();
        assert!(err.contains("nexthops[1]"));
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("routes.toml");
        tokio::fs::write(&path, SAMPLE).await.unwrap();

        let file = RoutesFile::load(&path).await.unwrap();
        assert_eq!(file.routes[1].length, 25);
    }
}
