use std::time::Duration;

use tokio::runtime::{self, Runtime};
use tonic::{
    client::Grpc,
    codegen::http::uri::{PathAndQuery, Uri},
    transport::{Channel, Endpoint},
    Code, Request, Status,
};
use tonic_prost::ProstCodec;
use tracing::{trace, warn};

use super::{
    proto::{ExportMetricsServiceRequest, ExportMetricsServiceResponse},
    Transport, TransportError,
};
use crate::{builder::BuildError, exporter::ExportRequest};

const EXPORT_PATH: &str = "/opentelemetry.proto.collector.metrics.v1.MetricsService/Export";

/// Transport sending OTLP export requests over gRPC.
///
/// The transport owns a single-threaded Tokio runtime and a [`tonic`] channel, both created once and reused for every
/// request. The connection to the collector is established lazily on the first export and kept open afterwards,
/// reconnecting as needed. Each call to [`Transport::export`] blocks the calling thread until the collector answers or
/// the request timeout elapses.
pub struct GrpcTransport {
    uri: Uri,
    timeout: Duration,
    client: Grpc<Channel>,
    runtime: Runtime,
}

impl GrpcTransport {
    /// Creates a new `GrpcTransport` for the given endpoint.
    ///
    /// The endpoint is either `<host>:<port>` or `http://<host>:<port>`. Any path is ignored.
    ///
    /// # Errors
    ///
    /// If the endpoint cannot be parsed, or the runtime cannot be created, an error will be returned.
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, BuildError> {
        let uri = collector_uri(endpoint).map_err(|reason| BuildError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            reason,
        })?;

        let runtime = runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| BuildError::FailedToCreateRuntime(e.to_string()))?;

        // The channel spawns its background task on whichever runtime is entered.
        let channel = {
            let _guard = runtime.enter();
            Endpoint::from(uri.clone()).connect_timeout(timeout).timeout(timeout).connect_lazy()
        };

        Ok(GrpcTransport { uri, timeout, client: Grpc::new(channel), runtime })
    }

    /// Returns the URI of the collector.
    pub fn uri(&self) -> &Uri {
        &self.uri
    }
}

impl Transport for GrpcTransport {
    fn export(&mut self, request: &ExportRequest<'_>) -> Result<(), TransportError> {
        let message = ExportMetricsServiceRequest::from(request);
        trace!(records = request.len(), "Sending export request.");

        let client = &mut self.client;
        let timeout = self.timeout;
        let response = self
            .runtime
            .block_on(tokio::time::timeout(timeout, send(client, message)))
            .map_err(|_| TransportError::Timeout(timeout))?
            .map_err(|status| status_error(&status, timeout))?;

        if let Some(partial) = response.partial_success.filter(|p| p.rejected_data_points > 0) {
            warn!(
                rejected = partial.rejected_data_points,
                reason = %partial.error_message,
                "Collector rejected part of an export request."
            );
        }

        Ok(())
    }
}

async fn send(
    client: &mut Grpc<Channel>,
    message: ExportMetricsServiceRequest,
) -> Result<ExportMetricsServiceResponse, Status> {
    client.ready().await.map_err(|e| Status::unavailable(e.to_string()))?;

    let codec = ProstCodec::<ExportMetricsServiceRequest, ExportMetricsServiceResponse>::default();
    let path = PathAndQuery::from_static(EXPORT_PATH);
    let response = client.unary(Request::new(message), path, codec).await?;
    Ok(response.into_inner())
}

/// Normalizes a collector endpoint into the URI the channel connects to.
fn collector_uri(endpoint: &str) -> Result<Uri, String> {
    let endpoint = endpoint.trim();
    let with_scheme =
        if endpoint.contains("://") { endpoint.to_string() } else { format!("http://{endpoint}") };

    let parsed = with_scheme.parse::<Uri>().map_err(|e| e.to_string())?;
    match parsed.scheme_str() {
        Some("http") => {}
        Some(scheme) => return Err(format!("unsupported scheme '{scheme}' (expected 'http')")),
        None => return Err("missing scheme".to_string()),
    }
    let authority = parsed.authority().ok_or_else(|| "missing host".to_string())?;

    Uri::builder()
        .scheme("http")
        .authority(authority.as_str())
        .path_and_query("/")
        .build()
        .map_err(|e| e.to_string())
}

fn status_error(status: &Status, timeout: Duration) -> TransportError {
    let message = status.message().to_string();
    match status.code() {
        Code::DeadlineExceeded => TransportError::Timeout(timeout),
        Code::Unavailable => TransportError::Connection { reason: message },
        code => TransportError::Rejected { code: code as i32, message },
    }
}
