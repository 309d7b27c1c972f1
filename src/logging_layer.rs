//! Tower layer for structured logging of exposition requests.
//!
//! Uses `tower_http::trace::TraceLayer` for the middleware plumbing. Scrapes
//! are frequent, so successful requests are logged at `debug`.

use tower_http::classify::{ServerErrorsAsFailures, ServerErrorsFailureClass, SharedClassifier};
use tower_http::trace::{DefaultOnBodyChunk, DefaultOnEos, TraceLayer};
use tracing::{debug, warn};

/// Create the logging/tracing layer for the exposition router.
pub fn logging_layer() -> TraceLayer<
    SharedClassifier<ServerErrorsAsFailures>,
    ScrapeMakeSpan,
    ScrapeRequestLog,
    ScrapeResponseLog,
    DefaultOnBodyChunk,
    DefaultOnEos,
    ScrapeFailureLog,
> {
    TraceLayer::new_for_http()
        .make_span_with(ScrapeMakeSpan)
        .on_request(ScrapeRequestLog)
        .on_response(ScrapeResponseLog)
        .on_failure(ScrapeFailureLog)
}

/// Span carrying method and path of every exposition request.
#[derive(Clone, Debug)]
pub struct ScrapeMakeSpan;

impl<B> tower_http::trace::MakeSpan<B> for ScrapeMakeSpan {
    fn make_span(&mut self, request: &http::Request<B>) -> tracing::Span {
        tracing::debug_span!(
            "exposition",
            method = %request.method(),
            path = %request.uri().path(),
        )
    }
}

#[derive(Clone, Debug)]
pub struct ScrapeRequestLog;

impl<B> tower_http::trace::OnRequest<B> for ScrapeRequestLog {
    fn on_request(&mut self, request: &http::Request<B>, _span: &tracing::Span) {
        let user_agent = request
            .headers()
            .get(http::header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("-");

        debug!(
            method = %request.method(),
            uri = %request.uri(),
            user_agent,
            "Exposition request received"
        );
    }
}

#[derive(Clone, Debug)]
pub struct ScrapeResponseLog;

impl<B> tower_http::trace::OnResponse<B> for ScrapeResponseLog {
    fn on_response(
        self,
        response: &http::Response<B>,
        latency: std::time::Duration,
        _span: &tracing::Span,
    ) {
        debug!(
            status = %response.status().as_u16(),
            latency_ms = latency.as_millis(),
            "Exposition response sent"
        );
    }
}

#[derive(Clone, Debug)]
pub struct ScrapeFailureLog;

impl tower_http::trace::OnFailure<ServerErrorsFailureClass> for ScrapeFailureLog {
    fn on_failure(
        &mut self,
        failure: ServerErrorsFailureClass,
        latency: std::time::Duration,
        _span: &tracing::Span,
    ) {
        warn!(
            classification = %failure,
            latency_ms = latency.as_millis(),
            "Exposition request failed"
        );
    }
}
