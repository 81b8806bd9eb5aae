//! The HTTP front-end: a `hyper` server that accepts GitLab webhook
//! deliveries, matches them to a configured [`Installation`] by project
//! path, verifies the `X-Gitlab-Token` header, and forwards the translated
//! event to an [`EventSink`]. Shaped after `probot::Server`/`ServerBuilder`
//! (`make_service_fn`/`service_fn` over a shared, cloneable `Server`),
//! generalized from a single GitHub app installation to a list of GitLab
//! projects sharing one sink.

use crate::gitlab::{GitlabEventType, MergeRequestHook, NoteHook, PipelineHook};
use crate::{installation::Installation, service::EventSink, Error, Result};
use futures::future;
use git_operator::Committer;
use hyper::{
    body,
    header::{HeaderValue, CONTENT_TYPE},
    server::conn::AddrStream,
    service::{make_service_fn, service_fn},
    Body, Method, Request, Response, Server as HyperServer, StatusCode,
};
use log::{error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;

const EVENT_TYPE_HEADER: &str = "X-Gitlab-Event";
const TOKEN_HEADER: &str = "X-Gitlab-Token";

pub struct ServerBuilder<E> {
    sink: Arc<E>,
    installations: Vec<Installation>,
}

impl<E: EventSink + 'static> ServerBuilder<E> {
    pub fn new(sink: E) -> Self {
        Self {
            sink: Arc::new(sink),
            installations: Vec::new(),
        }
    }

    pub fn add_installation(mut self, installation: Installation) -> Self {
        self.installations.push(installation);
        self
    }

    pub async fn serve(self, addr: SocketAddr) -> Result<()> {
        let server = Server {
            sink: self.sink,
            installations: Arc::new(self.installations),
        };

        let make_service = make_service_fn(move |socket: &AddrStream| {
            info!("remote address: {:?}", socket.remote_addr());
            let server = server.clone();
            future::ok::<_, Error>(service_fn(move |request| {
                let server = server.clone();
                server.serve(request)
            }))
        });

        info!("listening on http://{}", addr);
        HyperServer::bind(&addr).serve(make_service).await?;
        Ok(())
    }
}

pub struct Server<E> {
    sink: Arc<E>,
    installations: Arc<Vec<Installation>>,
}

impl<E> Clone for Server<E> {
    fn clone(&self) -> Self {
        Self {
            sink: self.sink.clone(),
            installations: self.installations.clone(),
        }
    }
}

impl<E: EventSink> Server<E> {
    async fn serve(self, request: Request<Body>) -> Result<Response<Body>> {
        match (request.method(), request.uri().path()) {
            (&Method::GET, "/") => Ok(Response::new(Body::from("merge queue webhook front-end\n"))),
            (&Method::POST, "/gitlab") => self.route_gitlab(request).await,
            _ => Ok(Response::builder()
                .status(StatusCode::NOT_FOUND)
                .body(Body::empty())?),
        }
    }

    async fn route_gitlab(&self, request: Request<Body>) -> Result<Response<Body>> {
        match self.handle_gitlab(request).await {
            Ok(()) => Ok(Response::builder()
                .status(StatusCode::OK)
                .header(CONTENT_TYPE, "text/plain")
                .body(Body::from("OK"))?),
            Err(RouteError::BadRequest(msg)) => {
                warn!("rejecting gitlab webhook: {}", msg);
                Ok(Response::builder()
                    .status(StatusCode::BAD_REQUEST)
                    .body(Body::empty())?)
            }
            Err(RouteError::Unauthorized) => Ok(Response::builder()
                .status(StatusCode::UNAUTHORIZED)
                .body(Body::empty())?),
            Err(RouteError::Internal(e)) => {
                error!("handling gitlab webhook: {}", e);
                Ok(Response::builder()
                    .status(StatusCode::INTERNAL_SERVER_ERROR)
                    .body(Body::empty())?)
            }
        }
    }

    async fn handle_gitlab(&self, request: Request<Body>) -> std::result::Result<(), RouteError> {
        if !matches!(
            request.headers().get(CONTENT_TYPE).map(HeaderValue::to_str),
            Some(Ok("application/json"))
        ) {
            return Err(RouteError::BadRequest("unexpected content type".into()));
        }

        let event_type = request
            .headers()
            .get(EVENT_TYPE_HEADER)
            .and_then(|h| h.to_str().ok())
            .and_then(|s| s.parse::<GitlabEventType>().ok())
            .ok_or_else(|| RouteError::BadRequest("missing or unknown X-Gitlab-Event".into()))?;

        let token = request
            .headers()
            .get(TOKEN_HEADER)
            .and_then(|h| h.to_str().ok())
            .map(str::to_owned);

        let body = body::to_bytes(request.into_body())
            .await
            .map_err(|e| RouteError::Internal(e.into()))?;

        let project_path = peek_project_path(&body)
            .ok_or_else(|| RouteError::BadRequest("payload carried no project".into()))?;

        let installation = self
            .installations
            .iter()
            .find(|i| i.project_path() == project_path)
            .ok_or_else(|| {
                RouteError::BadRequest(format!("unknown project '{}', dropping", project_path))
            })?;

        if !installation.verify_token(token.as_deref()) {
            return Err(RouteError::Unauthorized);
        }

        match event_type {
            GitlabEventType::MergeRequest => {
                let hook: MergeRequestHook =
                    serde_json::from_slice(&body).map_err(|e| RouteError::BadRequest(e.to_string()))?;
                self.handle_merge_request(installation, hook).await?;
            }
            GitlabEventType::Note => {
                let hook: NoteHook =
                    serde_json::from_slice(&body).map_err(|e| RouteError::BadRequest(e.to_string()))?;
                self.handle_note(installation, hook).await?;
            }
            GitlabEventType::Pipeline => {
                let hook: PipelineHook =
                    serde_json::from_slice(&body).map_err(|e| RouteError::BadRequest(e.to_string()))?;
                self.handle_pipeline(installation, hook).await?;
            }
        }

        Ok(())
    }

    async fn handle_merge_request(
        &self,
        installation: &Installation,
        hook: MergeRequestHook,
    ) -> std::result::Result<(), RouteError> {
        let action = hook.object_attributes.action.as_deref().unwrap_or("");
        if action != "open" && action != "reopen" {
            return Ok(());
        }

        let priority = priority_from_labels(&hook.labels);

        self.sink
            .on_pr_opened(
                installation.repo_url(),
                hook.object_attributes.iid,
                priority,
                &hook.object_attributes.source_branch,
                &hook.object_attributes.target_branch,
            )
            .await
            .map_err(|e| RouteError::Internal(e.into()))
    }

    async fn handle_note(
        &self,
        installation: &Installation,
        hook: NoteHook,
    ) -> std::result::Result<(), RouteError> {
        let mr = match &hook.merge_request {
            Some(mr) => mr,
            None => return Ok(()),
        };

        if !hook
            .object_attributes
            .note
            .trim()
            .eq_ignore_ascii_case(installation.enqueue_trigger())
        {
            return Ok(());
        }

        let committer = Committer::new(
            hook.user.name,
            hook.user.email.unwrap_or_else(|| "unknown@localhost".to_owned()),
        );

        match self
            .sink
            .on_enqueue_request(installation.repo_url(), mr.iid, committer)
            .await
        {
            Ok(()) => Ok(()),
            Err(coordinator::Error::AlreadyEnqueued)
            | Err(coordinator::Error::CIFailed)
            | Err(coordinator::Error::CIStillRunning)
            | Err(coordinator::Error::MergeConflict) => {
                // Expected precondition failures: the Coordinator has
                // already surfaced these to the author via `pr_send_comment`
                // where applicable; nothing more for the front-end to do.
                Ok(())
            }
            Err(e) => Err(RouteError::Internal(e.into())),
        }
    }

    async fn handle_pipeline(
        &self,
        installation: &Installation,
        hook: PipelineHook,
    ) -> std::result::Result<(), RouteError> {
        let repo_url = installation.repo_url();
        let ci_number = hook.object_attributes.id;

        match hook.object_attributes.terminal() {
            None => self
                .sink
                .on_ci_created(repo_url, ci_number, &hook.object_attributes.sha)
                .await
                .map_err(|e| RouteError::Internal(e.into())),
            Some(success) => self
                .sink
                .on_ci_finished(repo_url, ci_number, success)
                .await
                .map_err(|e| RouteError::Internal(e.into())),
        }
    }
}

fn priority_from_labels(labels: &[crate::gitlab::Label]) -> i64 {
    labels
        .iter()
        .find(|l| l.title.eq_ignore_ascii_case("high-priority"))
        .map(|_| 1)
        .unwrap_or(0)
}

/// Peek at just enough of the payload to route it to an installation before
/// committing to a full, event-specific deserialization.
fn peek_project_path(body: &[u8]) -> Option<String> {
    #[derive(serde::Deserialize)]
    struct Peek {
        project: crate::gitlab::Project,
    }
    serde_json::from_slice::<Peek>(body)
        .ok()
        .map(|p| p.project.path_with_namespace)
}

enum RouteError {
    BadRequest(String),
    Unauthorized,
    Internal(anyhow::Error),
}
