//! Prometheus metrics HTTP server.
//!
//! Serves metrics on a configurable HTTP endpoint.

use crate::metrics::MetricsCollector;
use crate::shutdown::{DeadChannel, DeadSignal};
use crate::util::TtlCache;
use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{CONTENT_TYPE, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus_client::encoding::text::encode;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

/// Prometheus metrics HTTP server.
pub struct MetricsServer {
    /// Bound listener.
    listener: TcpListener,
    /// Shared request state.
    state: Arc<ScrapeState>,
}

struct ScrapeState {
    /// Path for metrics endpoint.
    path: String,
    /// Metrics collector.
    collector: MetricsCollector,
    /// Last encoded scrape, `None` if encoding failed.
    encoded: TtlCache<Option<Bytes>>,
    /// How long an encoded scrape is reused.
    cache_ttl: Duration,
}

impl ScrapeState {
    fn scrape(&self) -> Option<Bytes> {
        self.encoded.result(self.cache_ttl, || {
            let mut buffer = String::new();
            match encode(&mut buffer, self.collector.registry()) {
                Ok(()) => Some(Bytes::from(buffer)),
                Err(e) => {
                    error!(error = %e, "failed to encode metrics");
                    None
                }
            }
        })
    }
}

impl MetricsServer {
    /// Bind the metrics server.
    pub async fn bind(
        address: SocketAddr,
        path: String,
        cache_ttl: Duration,
        collector: MetricsCollector,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(address).await?;

        Ok(Self {
            listener,
            state: Arc::new(ScrapeState {
                path,
                collector,
                encoded: TtlCache::new(),
                cache_ttl,
            }),
        })
    }

    /// Address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve scrapes until the signal's current generation closes.
    ///
    /// The server counts as an in-flight worker for the whole run.
    pub async fn run(self, signal: Arc<DeadSignal>) {
        let _in_flight = signal.enter();
        let dead = signal.dead_channel();

        info!(
            address = %self.local_addr().map(|a| a.to_string()).unwrap_or_default(),
            path = %self.state.path,
            "metrics server started"
        );

        self.serve(dead).await;
    }

    async fn serve(self, dead: DeadChannel) {
        loop {
            tokio::select! {
                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((stream, _addr)) => {
                            let state = Arc::clone(&self.state);

                            tokio::spawn(async move {
                                let io = TokioIo::new(stream);
                                let service = service_fn(move |req| {
                                    let state = Arc::clone(&state);
                                    async move { handle_request(req, &state).await }
                                });

                                if let Err(e) = http1::Builder::new()
                                    .serve_connection(io, service)
                                    .await
                                {
                                    debug!(error = %e, "metrics connection error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "failed to accept metrics connection");
                        }
                    }
                }

                _ = dead.closed() => {
                    info!("metrics server shutting down");
                    break;
                }
            }
        }
    }
}

/// Handle an incoming metrics request.
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    state: &ScrapeState,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let path = req.uri().path();
    let method = req.method();

    debug!(path = %path, method = %method, "metrics request");

    if method != Method::GET {
        return Ok(text_response(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed\n"));
    }

    if path == state.path {
        let Some(body) = state.scrape() else {
            return Ok(text_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to encode metrics\n",
            ));
        };

        let mut response = Response::new(Full::new(body));
        response.headers_mut().insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/plain; version=0.0.4; charset=utf-8"),
        );
        Ok(response)
    } else if path == "/health" || path == "/healthz" {
        Ok(text_response(StatusCode::OK, "OK\n"))
    } else if path == "/" {
        let body = format!(
            "logpump metrics server\n\nEndpoints:\n  {} - Prometheus metrics\n  /health - Health check\n",
            state.path
        );
        Ok(text_response(StatusCode::OK, body))
    } else {
        Ok(text_response(StatusCode::NOT_FOUND, "Not found\n"))
    }
}

fn text_response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    response
}
