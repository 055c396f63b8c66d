use std::future::Future;

use tracing::info;

use jetkit_config::routes::RoutesFile;
use jetkit_core::SequenceAllocator;

use crate::RpcError;
use crate::credentials::Session;
use crate::op::{OpCommandReply, OpCommandRequest};
use crate::router::{LoginRequest, RouterApi};
use crate::routes::{InitStatus, RouteReply, RouteVerb, build_add_request, build_remove_request};

/// Runs the client flows against a [`RouterApi`], bounding every call by the
/// session timeout.
pub struct RouterClient<'a> {
    api: &'a dyn RouterApi,
    session: &'a Session,
}

impl<'a> RouterClient<'a> {
    pub fn new(api: &'a dyn RouterApi, session: &'a Session) -> Self {
        Self { api, session }
    }

    async fn bounded<T, F>(&self, call: F, on_timeout: fn(String) -> RpcError) -> Result<T, RpcError>
    where
        F: Future<Output = Result<T, RpcError>>,
    {
        tokio::time::timeout(self.session.timeout, call)
            .await
            .map_err(|_| on_timeout(format!("timed out after {:?}", self.session.timeout)))?
    }

    pub async fn login(&self) -> Result<(), RpcError> {
        let request = LoginRequest {
            user_name: &self.session.user,
            client_id: &self.session.client_id,
            password: &self.session.password,
        };
        let accepted = self.bounded(self.api.login(&request), RpcError::Login).await?;
        if !accepted {
            return Err(RpcError::Login(format!(
                "{} refused user '{}'",
                self.session.endpoint, self.session.user
            )));
        }
        info!(endpoint = %self.session.endpoint, tls = self.session.tls.is_some(), "Connected");
        Ok(())
    }

    /// Initialize the BGP route service. Only `SUCCESS` and
    /// `SUCCESS_STATE_REBOUND` are accepted.
    pub async fn initialize_bgp(&self) -> Result<InitStatus, RpcError> {
        let status = self
            .bounded(self.api.bgp_initialize(), RpcError::Initialize)
            .await?;
        if !status.is_success() {
            return Err(RpcError::Initialize(status.to_string()));
        }
        info!(%status, "BGP route API initialized");
        Ok(status)
    }

    /// Initialize the BGP route service, then add or remove every route in
    /// `routes`.
    pub async fn push_routes(
        &self,
        routes: &RoutesFile,
        verb: RouteVerb,
        cookies: &SequenceAllocator,
    ) -> Result<RouteReply, RpcError> {
        self.initialize_bgp().await?;

        let reply = match verb {
            RouteVerb::Add => {
                let request = build_add_request(routes, cookies).await?;
                self.bounded(self.api.bgp_add(&request), RpcError::Request)
                    .await?
            }
            RouteVerb::Del => {
                let request = build_remove_request(routes);
                self.bounded(self.api.bgp_remove(&request), RpcError::Request)
                    .await?
            }
        };
        info!(?verb, status = %reply.status, "Route request completed");
        Ok(reply)
    }

    pub async fn run_op_command(
        &self,
        request: &OpCommandRequest,
    ) -> Result<OpCommandReply, RpcError> {
        self.bounded(self.api.execute_op_command(request), RpcError::Request)
            .await
    }
}
