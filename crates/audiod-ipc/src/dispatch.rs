use crate::message::{Notification, Request, RequestCode, Response};
use crate::parcel::ParcelReader;
use async_trait::async_trait;
use audiod_core::{IpcError, StatusCode};
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Identifies one client connection for the lifetime of the server.
pub type ConnectionId = u64;

/// Queues notifications onto one connection's writer.
pub type NotificationSender = mpsc::UnboundedSender<Notification>;

/// Server-side implementation of the request surface.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, conn: ConnectionId, request: Request) -> Result<Response, StatusCode>;

    /// Called before the first request is read. Notifications sent through
    /// `notifier` are written to the connection between replies.
    async fn on_connect(&self, _conn: ConnectionId, _notifier: NotificationSender) {}

    /// Called once when a connection goes away, cleanly or not.
    async fn on_disconnect(&self, _conn: ConnectionId) {}
}

/// Decodes request frames, checks the interface token and routes the request
/// to a handler. A frame whose token differs from the local descriptor is
/// answered with `PermissionDenied` and never reaches the handler.
pub struct Dispatcher<H: RequestHandler> {
    descriptor: String,
    handler: Arc<H>,
}

impl<H: RequestHandler> Dispatcher<H> {
    pub fn new(descriptor: &str, handler: Arc<H>) -> Self {
        Self {
            descriptor: descriptor.to_string(),
            handler,
        }
    }

    pub fn handler(&self) -> &Arc<H> {
        &self.handler
    }

    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    fn decode(&self, frame: Bytes) -> Result<Request, IpcError> {
        let mut r = ParcelReader::new(frame);
        let raw = r.read_u32()?;
        let code = RequestCode::from_code(raw).ok_or(IpcError::UnknownCode(raw))?;
        let token = r.read_string()?;
        if token != self.descriptor {
            return Err(IpcError::AuthenticationFailed {
                expected: self.descriptor.clone(),
                actual: token,
            });
        }
        let request = Request::decode_payload(code, &mut r)?;
        r.finish()?;
        Ok(request)
    }

    /// One request frame in, one response frame out.
    pub async fn dispatch(&self, conn: ConnectionId, frame: Bytes) -> Bytes {
        let request = match self.decode(frame) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(conn, "rejected request: {e}");
                return Response::encode_status(e.status());
            }
        };
        let code = request.code();
        match self.handler.handle(conn, request).await {
            Ok(response) => response.encode(),
            Err(status) => {
                tracing::debug!(conn, request = ?code, status = ?status, "request failed");
                Response::encode_status(status)
            }
        }
    }
}
