use std::io::Write;
use std::sync::{Mutex, PoisonError};

use serde::Serialize;
use serde_json::json;

use jetkit_core::BoxFuture;

use crate::RpcError;
use crate::credentials::Password;
use crate::op::{OpCommandReply, OpCommandRequest};
use crate::routes::{BgpRouteRemoveRequest, BgpRouteUpdateRequest, InitStatus, RouteReply};

/// Login request. The password is never serialized.
#[derive(Debug, Serialize)]
pub struct LoginRequest<'a> {
    pub user_name: &'a str,
    pub client_id: &'a str,
    #[serde(skip_serializing)]
    pub password: &'a Password,
}

/// The router's RPC services, as far as jetkit uses them.
pub trait RouterApi: Send + Sync {
    /// Authenticate the session. `Ok(false)` means the router refused.
    fn login<'a>(&'a self, request: &'a LoginRequest<'a>) -> BoxFuture<'a, Result<bool, RpcError>>;

    fn bgp_initialize(&self) -> BoxFuture<'_, Result<InitStatus, RpcError>>;

    fn bgp_add<'a>(
        &'a self,
        request: &'a BgpRouteUpdateRequest,
    ) -> BoxFuture<'a, Result<RouteReply, RpcError>>;

    fn bgp_remove<'a>(
        &'a self,
        request: &'a BgpRouteRemoveRequest,
    ) -> BoxFuture<'a, Result<RouteReply, RpcError>>;

    fn execute_op_command<'a>(
        &'a self,
        request: &'a OpCommandRequest,
    ) -> BoxFuture<'a, Result<OpCommandReply, RpcError>>;
}

/// Prints every call as one JSON line and answers with success.
pub struct DryRunRouter<W> {
    out: Mutex<W>,
}

impl DryRunRouter<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> DryRunRouter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(PoisonError::into_inner)
    }

    fn print(&self, call: &str, request: impl Serialize) -> Result<(), RpcError> {
        let request =
            serde_json::to_value(request).map_err(|e| RpcError::Request(format!("{call}: {e}")))?;
        let line = json!({ "call": call, "request": request });
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        writeln!(out, "{line}").map_err(|e| RpcError::Request(format!("{call}: {e}")))
    }
}

impl<W: Write + Send> RouterApi for DryRunRouter<W> {
    fn login<'a>(&'a self, request: &'a LoginRequest<'a>) -> BoxFuture<'a, Result<bool, RpcError>> {
        Box::pin(async move {
            self.print("LoginCheck", request)?;
            Ok(true)
        })
    }

    fn bgp_initialize(&self) -> BoxFuture<'_, Result<InitStatus, RpcError>> {
        Box::pin(async move {
            self.print("BgpRouteInitialize", json!({}))?;
            Ok(InitStatus::Success)
        })
    }

    fn bgp_add<'a>(
        &'a self,
        request: &'a BgpRouteUpdateRequest,
    ) -> BoxFuture<'a, Result<RouteReply, RpcError>> {
        Box::pin(async move {
            self.print("BgpRouteAdd", request)?;
            Ok(RouteReply {
                status: "SUCCESS".to_string(),
            })
        })
    }

    fn bgp_remove<'a>(
        &'a self,
        request: &'a BgpRouteRemoveRequest,
    ) -> BoxFuture<'a, Result<RouteReply, RpcError>> {
        Box::pin(async move {
            self.print("BgpRouteRemove", request)?;
            Ok(RouteReply {
                status: "SUCCESS".to_string(),
            })
        })
    }

    fn execute_op_command<'a>(
        &'a self,
        request: &'a OpCommandRequest,
    ) -> BoxFuture<'a, Result<OpCommandReply, RpcError>> {
        Box::pin(async move {
            self.print("ExecuteOpCommand", request)?;
            Ok(OpCommandReply {
                data: format!("dry run: {}\n", request.cli_command),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::OutputFormat;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_login_is_printed_without_password() {
        let router = DryRunRouter::new(Vec::new());
        let password = Password::new("hunter2");
        let request = LoginRequest {
            user_name: "jet",
            client_id: "42",
            password: &password,
        };
        assert!(router.login(&request).await.unwrap());

        let out = String::from_utf8(router.into_inner()).unwrap();
        assert!(out.contains("\"LoginCheck\""));
        assert!(out.contains("\"jet\""));
        assert!(!out.contains("hunter2"));
    }

    #[tokio::test]
    async fn test_one_json_line_per_call() {
        let router = DryRunRouter::new(Vec::new());
        router.bgp_initialize().await.unwrap();
        let reply = router
            .execute_op_command(&OpCommandRequest::new("show version", OutputFormat::Json))
            .await
            .unwrap();
        assert_eq!(reply.data, "dry run: show version\n");

        let out = String::from_utf8(router.into_inner()).unwrap();
        let lines: Vec<serde_json::Value> = out
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["call"], "BgpRouteInitialize");
        assert_eq!(lines[1]["request"]["out_format"], "OPERATION_FORMAT_JSON");
        assert_eq!(lines[1]["request"]["request_id"], 42);
    }
}
