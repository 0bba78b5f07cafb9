//! HTTP trigger for the publisher.
//!
//! `GET /api/v1/publish?message=<text>` publishes text, `POST /api/v1/publish`
//! with a JSON user body publishes a record.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::{Body, Bytes};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode, Uri};
use hyper_util::rt::TokioIo;
use relay::{Publisher, User};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

const PUBLISH_PATH: &str = "/api/v1/publish";
const MESSAGE_PARAM: &str = "message";
const MAX_BODY_BYTES: usize = 64 * 1024;

pub async fn route(publisher: &Publisher, method: &Method, uri: &Uri, body: Bytes) -> Response<Full<Bytes>> {
    if uri.path() != PUBLISH_PATH {
        return respond(StatusCode::NOT_FOUND, "Not Found");
    }

    match *method {
        Method::GET => {
            let Some(message) = query_param(uri, MESSAGE_PARAM) else {
                return respond(
                    StatusCode::BAD_REQUEST,
                    format!("Missing query parameter '{}'", MESSAGE_PARAM),
                );
            };
            match publisher.send_message(&message).await {
                Ok(()) => respond(StatusCode::OK, "Message sent to RabbitMQ ..."),
                Err(e) => respond(StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
            }
        }
        Method::POST => {
            let user: User = match serde_json::from_slice(&body) {
                Ok(user) => user,
                Err(e) => {
                    warn!(error=%e, "rejecting undecodable request body");
                    return respond(StatusCode::BAD_REQUEST, format!("Invalid user: {}", e));
                }
            };
            match publisher.send_json_message(&user).await {
                Ok(()) => respond(StatusCode::OK, "Json message sent to RabbitMQ ..."),
                Err(e) => respond(StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
            }
        }
        _ => respond(StatusCode::NOT_FOUND, "Not Found"),
    }
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    publisher: Arc<Publisher>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let (parts, body) = req.into_parts();
    let body = match read_body(body).await {
        Ok(body) => body,
        Err(response) => return Ok(response),
    };
    Ok(route(&publisher, &parts.method, &parts.uri, body).await)
}

/// Collects at most `MAX_BODY_BYTES` of the request body.
async fn read_body<B>(body: B) -> Result<Bytes, Response<Full<Bytes>>>
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    match Limited::new(body, MAX_BODY_BYTES).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
            warn!(limit = MAX_BODY_BYTES, "rejecting oversized request body");
            Err(respond(StatusCode::PAYLOAD_TOO_LARGE, "Request body too large"))
        }
        Err(e) => {
            warn!(error=%e, "failed to read request body");
            Err(respond(StatusCode::BAD_REQUEST, "Unreadable body"))
        }
    }
}

/// Accepts connections until `shutdown` flips to `true`.
pub async fn serve(
    listener: TcpListener,
    publisher: Arc<Publisher>,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    info!("HTTP front end listening on http://{}{}", listener.local_addr()?, PUBLISH_PATH);

    loop {
        let (stream, peer): (_, SocketAddr) = tokio::select! {
            accepted = listener.accept() => accepted?,
            _ = shutdown.changed() => {
                info!("HTTP front end stopped");
                return Ok(());
            }
        };
        let io = TokioIo::new(stream);
        let publisher = publisher.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req| handle_request(req, publisher.clone()));

            if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                error!(peer=%peer, "Error serving connection: {:?}", err);
            }
        });
    }
}

fn query_param(uri: &Uri, name: &str) -> Option<String> {
    form_urlencoded::parse(uri.query()?.as_bytes())
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

fn respond(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
}
