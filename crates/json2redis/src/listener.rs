// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP ingestion endpoint.
//!
//! Every `POST` body, whatever the path, is handed to the accumulator as one raw payload. The
//! request waits while the inbound queue is full, so backpressure reaches the HTTP client. Other
//! methods are acknowledged and ignored.

use std::io;
use std::net::SocketAddr;

use http_body_util::{BodyExt, Full, Limited};
use hyper::body::{Bytes, Incoming};
use hyper::service::service_fn;
use hyper::{header, http, HeaderMap, Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

use crate::accumulator_service::AccumulatorHandle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerConfig {
    pub host: String,
    pub port: u16,
    pub max_content_length: usize,
}

pub struct Listener {
    listener: TcpListener,
    handle: AccumulatorHandle,
    max_content_length: usize,
    cancel_token: CancellationToken,
}

impl Listener {
    pub async fn bind(
        config: &ListenerConfig,
        handle: AccumulatorHandle,
        cancel_token: CancellationToken,
    ) -> io::Result<Self> {
        let addr = format!("{}:{}", config.host, config.port);
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            handle,
            max_content_length: config.max_content_length,
            cancel_token,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until cancelled, then aborts the ones still open. A connection that
    /// fails is logged and does not stop the server.
    pub async fn serve(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        debug!("Listening on {}", self.listener.local_addr()?);

        let mut connections = tokio::task::JoinSet::new();
        let result = loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => break Ok(()),
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        trace!("Accepted connection from {peer}");
                        connections.spawn(serve_connection(
                            stream,
                            self.handle.clone(),
                            self.max_content_length,
                        ));
                    }
                    Err(e) if is_transient_accept_error(&e) => {
                        trace!("Ignoring failed accept: {e}");
                    }
                    Err(e) => {
                        error!("Listener failed to accept connections: {e}");
                        break Err(e.into());
                    }
                },
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            error!("Connection task panicked: {e:?}");
                        }
                    }
                }
            }
        };

        debug!("Listener shutting down");
        connections.shutdown().await;
        result
    }
}

fn is_transient_accept_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
    )
}

async fn serve_connection(
    stream: TcpStream,
    handle: AccumulatorHandle,
    max_content_length: usize,
) {
    let service = service_fn(move |req: Request<Incoming>| {
        ingest_endpoint_handler(req, handle.clone(), max_content_length)
    });
    if let Err(e) = hyper::server::conn::http1::Builder::new()
        .serve_connection(TokioIo::new(stream), service)
        .await
    {
        debug!("Connection closed with error: {e}");
    }
}

async fn ingest_endpoint_handler(
    req: Request<Incoming>,
    handle: AccumulatorHandle,
    max_content_length: usize,
) -> http::Result<Response<Full<Bytes>>> {
    if req.method() != Method::POST {
        trace!("Ignoring {} request to {}", req.method(), req.uri().path());
        return create_http_response("OK", StatusCode::OK);
    }

    if let Some(response) =
        verify_request_content_length(req.headers(), max_content_length, "Error ingesting payload")
    {
        return response;
    }

    let body = match Limited::new(req.into_body(), max_content_length)
        .collect()
        .await
    {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            if e.is::<http_body_util::LengthLimitError>() {
                return log_and_create_http_response(
                    "Error ingesting payload: Payload too large",
                    StatusCode::PAYLOAD_TOO_LARGE,
                );
            }
            return log_and_create_http_response(
                &format!("Error ingesting payload: Unable to read body: {e}"),
                StatusCode::BAD_REQUEST,
            );
        }
    };

    trace!("Received payload of {} bytes", body.len());

    match handle.submit(body).await {
        Ok(()) => create_http_response("OK", StatusCode::OK),
        Err(_) => log_and_create_http_response(
            "Error ingesting payload: accumulator is not running",
            StatusCode::SERVICE_UNAVAILABLE,
        ),
    }
}

/// JSON response of the form `{"message": message}`.
fn create_http_response(
    message: &str,
    status: StatusCode,
) -> http::Result<Response<Full<Bytes>>> {
    let body = json!({ "message": message }).to_string();
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(body)))
}

/// Same as [`create_http_response`], logging the message first: at debug level for a success
/// status, as an error otherwise.
fn log_and_create_http_response(
    message: &str,
    status: StatusCode,
) -> http::Result<Response<Full<Bytes>>> {
    if status.is_success() {
        debug!("{message}");
    } else {
        error!("{message}");
    }
    create_http_response(message, status)
}

/// Returns an error response if the declared `Content-Length` is invalid or above
/// `max_content_length`. Chunked bodies carry no length and pass; their size is enforced while
/// reading.
fn verify_request_content_length(
    header_map: &HeaderMap,
    max_content_length: usize,
    error_message_prefix: &str,
) -> Option<http::Result<Response<Full<Bytes>>>> {
    let content_length_header = header_map.get(header::CONTENT_LENGTH)?;

    let content_length = match content_length_header
        .to_str()
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
    {
        Some(length) => length,
        None => {
            return Some(log_and_create_http_response(
                &format!("{error_message_prefix}: Invalid Content-Length header"),
                StatusCode::BAD_REQUEST,
            ));
        }
    };

    if content_length > max_content_length {
        return Some(log_and_create_http_response(
            &format!("{error_message_prefix}: Payload too large"),
            StatusCode::PAYLOAD_TOO_LARGE,
        ));
    }
    None
}
