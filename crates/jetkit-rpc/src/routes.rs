//! BGP static route add and remove requests.
//!
//! An add announces one path per (route, next hop) pair, each with its own
//! path cookie drawn from a [`SequenceAllocator`]. A remove withdraws every
//! route in the file by prefix with cookie 0.

use std::net::IpAddr;

use serde::Serialize;
use tracing::{debug, warn};

use jetkit_config::routes::RoutesFile;
use jetkit_core::SequenceAllocator;

use crate::RpcError;

/// Routing table every request targets.
pub const ROUTE_TABLE: &str = "inet.0";

/// What to do with the routes in the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteVerb {
    Add,
    Del,
}

impl RouteVerb {
    /// Parse `add` or `del`. Anything else falls back to `add`.
    pub fn parse_lenient(s: &str) -> Self {
        match s {
            "add" => Self::Add,
            "del" => Self::Del,
            other => {
                warn!(verb = other, "Unrecognised verb, defaulting to add");
                Self::Add
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RouteProtocol {
    #[serde(rename = "PROTO_BGP_STATIC")]
    BgpStatic,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteTable {
    pub name: String,
}

impl RouteTable {
    fn inet0() -> Self {
        Self {
            name: ROUTE_TABLE.to_string(),
        }
    }
}

/// One path to announce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BgpRouteEntry {
    pub dest_prefix: String,
    pub dest_prefix_len: u32,
    pub table: RouteTable,
    pub protocol_nexthops: Vec<IpAddr>,
    pub protocol: RouteProtocol,
    pub path_cookie: u64,
    pub route_preference: u32,
    pub local_preference: u32,
    pub aspath: String,
}

/// Selects routes to withdraw.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BgpRouteMatch {
    pub dest_prefix: String,
    pub dest_prefix_len: u32,
    pub table: RouteTable,
    pub protocol: RouteProtocol,
    pub path_cookie: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BgpRouteUpdateRequest {
    pub bgp_routes: Vec<BgpRouteEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BgpRouteRemoveRequest {
    pub or_longer: bool,
    pub bgp_routes: Vec<BgpRouteMatch>,
}

/// Outcome of initializing the BGP route service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitStatus {
    Success,
    /// The service was already initialized by an earlier session.
    SuccessStateRebound,
    Other(String),
}

impl InitStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success | Self::SuccessStateRebound)
    }
}

impl std::fmt::Display for InitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => f.write_str("SUCCESS"),
            Self::SuccessStateRebound => f.write_str("SUCCESS_STATE_REBOUND"),
            Self::Other(status) => f.write_str(status),
        }
    }
}

/// Status returned for an add or remove.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteReply {
    pub status: String,
}

/// Build the add request, taking one cookie per next hop from `cookies`.
pub async fn build_add_request(
    routes: &RoutesFile,
    cookies: &SequenceAllocator,
) -> Result<BgpRouteUpdateRequest, RpcError> {
    let basics = &routes.basics;
    let mut bgp_routes = Vec::with_capacity(routes.path_count());

    for route in &routes.routes {
        for nexthop in &route.nexthops {
            let nexthop: IpAddr = nexthop
                .parse()
                .map_err(|e| RpcError::Request(format!("next hop '{nexthop}': {e}")))?;
            let path_cookie = cookies
                .next()
                .await
                .map_err(|e| RpcError::Request(e.to_string()))?;

            bgp_routes.push(BgpRouteEntry {
                dest_prefix: route.prefix.clone(),
                dest_prefix_len: route.length,
                table: RouteTable::inet0(),
                protocol_nexthops: vec![nexthop],
                protocol: RouteProtocol::BgpStatic,
                path_cookie,
                route_preference: basics.route_pref,
                local_preference: basics.local_pref,
                aspath: basics.as_path.clone(),
            });
        }
    }

    debug!(paths = bgp_routes.len(), "Built route add request");
    Ok(BgpRouteUpdateRequest { bgp_routes })
}

/// Build the remove request: one match per route, cookie 0, exact length.
pub fn build_remove_request(routes: &RoutesFile) -> BgpRouteRemoveRequest {
    let bgp_routes = routes
        .routes
        .iter()
        .map(|route| BgpRouteMatch {
            dest_prefix: route.prefix.clone(),
            dest_prefix_len: route.length,
            table: RouteTable::inet0(),
            protocol: RouteProtocol::BgpStatic,
            path_cookie: 0,
        })
        .collect();
    BgpRouteRemoveRequest {
        or_longer: false,
        bgp_routes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const ROUTES: &str = r#"
        [basics]
        localPref = 200
        routePref = 10
        asPathStr = "65000 65001"

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
    fn test_verb_parsing() {
        assert_eq!(RouteVerb::parse_lenient("add"), RouteVerb::Add);
        assert_eq!(RouteVerb::parse_lenient("del"), RouteVerb::Del);
        assert_eq!(RouteVerb::parse_lenient("delete"), RouteVerb::Add);
    }

    #[tokio::test]
    async fn test_add_request_has_one_cookie_per_next_hop() {
        let routes = RoutesFile::parse(ROUTES).unwrap();
        let cookies = SequenceAllocator::spawn();

        let request = build_add_request(&routes, &cookies).await.unwrap();
        let cookies: Vec<u64> = request.bgp_routes.iter().map(|r| r.path_cookie).collect();
        assert_eq!(cookies, vec![12_345_679, 12_345_680, 12_345_681]);

        let first = &request.bgp_routes[0];
        assert_eq!(first.dest_prefix, "192.0.2.0");
        assert_eq!(first.dest_prefix_len, 24);
        assert_eq!(first.table.name, "inet.0");
        assert_eq!(first.protocol_nexthops, vec!["10.0.0.10".parse::<IpAddr>().unwrap()]);
        assert_eq!(first.route_preference, 10);
        assert_eq!(first.local_preference, 200);
        assert_eq!(first.aspath, "65000 65001");
        assert_eq!(request.bgp_routes[2].dest_prefix, "198.51.100.0");
    }

    #[tokio::test]
    async fn test_add_request_fails_once_allocator_stopped() {
        let routes = RoutesFile::parse(ROUTES).unwrap();
        let cookies = SequenceAllocator::spawn();
        cookies.stop().await;

        let err = build_add_request(&routes, &cookies).await.unwrap_err();
        assert!(matches!(err, RpcError::Request(_)));
    }

    #[test]
    fn test_remove_request_matches_each_route_with_cookie_zero() {
        let routes = RoutesFile::parse(ROUTES).unwrap();
        let request = build_remove_request(&routes);

        assert!(!request.or_longer);
        assert_eq!(request.bgp_routes.len(), 2);
        assert!(request.bgp_routes.iter().all(|m| m.path_cookie == 0));
        assert_eq!(request.bgp_routes[1].dest_prefix_len, 25);
    }

    #[test]
    fn test_request_json_shape() {
        let routes = RoutesFile::parse(ROUTES).unwrap();
        let json = serde_json::to_value(build_remove_request(&routes)).unwrap();
        assert_eq!(json["bgp_routes"][0]["protocol"], "PROTO_BGP_STATIC");
        assert_eq!(json["bgp_routes"][0]["table"]["name"], "inet.0");
        assert_eq!(json["or_longer"], false);
    }

    #[test]
    fn test_init_status() {
        assert!(InitStatus::Success.is_success());
        assert!(InitStatus::SuccessStateRebound.is_success());
        assert!(!InitStatus::Other("INTERNAL_ERROR".to_string()).is_success());
        assert_eq!(InitStatus::SuccessStateRebound.to_string(), "SUCCESS_STATE_REBOUND");
    }
}
