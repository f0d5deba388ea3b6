use std::time::Duration;

use thiserror::Error;

use crate::exporter::ExportRequest;

#[cfg(feature = "grpc")]
mod grpc;
#[cfg(feature = "grpc")]
pub use self::grpc::GrpcTransport;

#[cfg(feature = "grpc")]
mod proto;

/// Errors that could occur while transmitting a single export request.
///
/// Transmission errors are never surfaced to callers updating instruments: the exporter logs them and moves on to the
/// next batch.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The collector could not be reached, or the connection failed mid-request.
    #[error("failed to reach collector: {reason}")]
    Connection {
        /// Details about the failure.
        reason: String,
    },

    /// The collector did not answer within the request timeout.
    #[error("export request timed out after {0:?}")]
    Timeout(Duration),

    /// The collector answered, but rejected the request.
    #[error("collector rejected export request (status {code}): {message}")]
    Rejected {
        /// gRPC status code reported by the collector.
        code: i32,

        /// Message reported by the collector, if any.
        message: String,
    },
}

/// A synchronous channel to a collector.
///
/// The meter worker owns its transport exclusively and calls [`Transport::export`] once per batch, in order. While a
/// call is in flight, the worker applies no other update, so slow transports delay every producer once the inbound
/// queues fill up.
pub trait Transport {
    /// Transmits a single export request, returning once the collector has accepted or refused it.
    ///
    /// # Errors
    ///
    /// If the request could not be delivered, or the collector refused it, an error is returned. The batch is not
    /// retried.
    fn export(&mut self, request: &ExportRequest<'_>) -> Result<(), TransportError>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn export(&mut self, request: &ExportRequest<'_>) -> Result<(), TransportError> {
        (**self).export(request)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn export(&mut self, request: &ExportRequest<'_>) -> Result<(), TransportError> {
        (**self).export(request)
    }
}
