//! Client-facing HTTP server.
//!
//! The request path is the key. GET and HEAD answer with a redirect to a
//! live replica, PUT stores the body, DELETE removes the key; everything
//! else is 405. Diagnostics travel in the `Content-Md5`, `Storages` and
//! `Balanced` headers.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hrw_proxy::coordinator::{ReadOutcome, WriteOutcome};
use hrw_proxy::{Coordinator, ProxyError, StorageClient};
use hyper::body::Incoming;
use hyper::header::{ALLOW, LOCATION};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use tokio::net::TcpListener;

pub const CONTENT_MD5: &str = "content-md5";
pub const STORAGES: &str = "storages";
pub const BALANCED: &str = "balanced";

const ALLOWED: &str = "GET, HEAD, PUT, DELETE";

/// Bind `addr` and serve until the listener fails.
pub async fn serve<S: StorageClient>(
    addr: SocketAddr,
    coord: Coordinator<S>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;
    serve_listener(listener, coord).await
}

/// Serve connections accepted on `listener`, one task per connection.
pub async fn serve_listener<S: StorageClient>(
    listener: TcpListener,
    coord: Coordinator<S>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing::info!("proxy listening on http://{}", listener.local_addr()?);

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let coord = coord.clone();
        tokio::spawn(async move {
            let service = service_fn(move |req| handle(coord.clone(), req));
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                tracing::debug!("client connection error: {}", e);
            }
        });
    }
}

/// Route one client request.
pub async fn handle<S: StorageClient>(
    coord: Coordinator<S>,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let method = req.method().clone();
    let _timer = hrw_metrics::start_request_timer(method.as_str());
    let key = request_key(req.uri().path());

    let response = match method {
        Method::GET | Method::HEAD => read_response(coord.read(&key).await),
        Method::PUT => {
            let body = async move { req.into_body().collect().await.map(|b| b.to_bytes()) };
            // The write runs detached so a client hangup cannot cut it
            // short between placeholder and promotion.
            let task = tokio::spawn(async move { coord.write_from(&key, body).await });
            match task.await {
                Ok(result) => write_response(result),
                Err(e) => {
                    tracing::error!("write task failed: {}", e);
                    empty(StatusCode::INTERNAL_SERVER_ERROR)
                }
            }
        }
        Method::DELETE => {
            let task = tokio::spawn(async move { coord.delete(&key).await });
            match task.await {
                Ok(Ok(())) => empty(StatusCode::NO_CONTENT),
                Ok(Err(e)) => error_response(&e),
                Err(e) => {
                    tracing::error!("delete task failed: {}", e);
                    empty(StatusCode::INTERNAL_SERVER_ERROR)
                }
            }
        }
        _ => build(
            Response::builder()
                .status(StatusCode::METHOD_NOT_ALLOWED)
                .header(ALLOW, ALLOWED),
        ),
    };

    hrw_metrics::record_request(method.as_str(), response.status().as_u16());
    Ok(response)
}

/// The index key for a request path: the path with percent-escapes
/// decoded to raw bytes.
pub fn request_key(path: &str) -> Vec<u8> {
    urlencoding::decode_binary(path.as_bytes()).into_owned()
}

fn read_response(result: Result<ReadOutcome, ProxyError>) -> Response<Full<Bytes>> {
    let read = match result {
        Ok(read) => read,
        Err(e) => return error_response(&e),
    };

    let mut builder = Response::builder()
        .status(StatusCode::MOVED_PERMANENTLY)
        .header(LOCATION, read.location.as_str())
        .header(STORAGES, read.storages.join(","))
        .header(BALANCED, if read.balanced { "y" } else { "n" });
    if !read.hash.is_empty() {
        builder = builder.header(CONTENT_MD5, read.hash.as_str());
    }
    build(builder)
}

fn write_response(result: Result<WriteOutcome, ProxyError>) -> Response<Full<Bytes>> {
    match result {
        Ok(written) => build(
            Response::builder()
                .status(StatusCode::CREATED)
                .header(CONTENT_MD5, written.hash.as_str())
                .header(STORAGES, written.storages.join(",")),
        ),
        Err(e) => error_response(&e),
    }
}

/// HTTP status for a coordinator error.
pub fn status_for(e: &ProxyError) -> StatusCode {
    match e {
        ProxyError::Conflict => StatusCode::CONFLICT,
        ProxyError::Body(_) => StatusCode::BAD_REQUEST,
        ProxyError::NotFound | ProxyError::Unavailable => StatusCode::NOT_FOUND,
        ProxyError::Replica { .. } | ProxyError::Index(_) | ProxyError::Codec(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn error_response(e: &ProxyError) -> Response<Full<Bytes>> {
    match e {
        ProxyError::Codec(_) => tracing::error!("{}", e),
        ProxyError::Replica { .. } | ProxyError::Index(_) | ProxyError::Body(_) => {
            tracing::warn!("{}", e)
        }
        _ => tracing::debug!("{}", e),
    }
    empty(status_for(e))
}

fn empty(status: StatusCode) -> Response<Full<Bytes>> {
    build(Response::builder().status(status))
}

fn build(builder: hyper::http::response::Builder) -> Response<Full<Bytes>> {
    match builder.body(Full::new(Bytes::new())) {
        Ok(resp) => resp,
        Err(e) => {
            tracing::error!("building response failed: {}", e);
            let mut resp = Response::new(Full::new(Bytes::new()));
            *resp.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            resp
        }
    }
}
