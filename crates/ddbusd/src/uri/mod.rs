//! URI-addressed services answering requests routed to the listener.
//!
//! Services implement [`UriService`] and register by name with a
//! [`ServiceRegistry`]. Each request is answered through its own
//! [`RequestContext`], so concurrent requests never share a writer.

mod context;
mod errors;
mod registry;
mod request;

use ddbus_protocol::{Frame, RequestId, ResponseBody, ResultCode};

pub use context::{BinaryWriter, RequestContext, ResponseOutcome, TextWriter};
pub use errors::UriError;
pub use registry::ServiceRegistry;
pub use request::UriRequest;

pub(crate) const URI_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::uri");

/// A named handler for URI requests.
pub trait UriService: Send + Sync {
    /// Name the service registers under.
    fn name(&self) -> &str;

    /// Answers one request.
    ///
    /// Returning an error discards any response body. Handlers may run
    /// concurrently on different threads.
    ///
    /// # Errors
    ///
    /// Returns [`UriError::UnhandledCommand`] for commands the service does
    /// not recognise, or any other [`UriError`] describing the failure.
    fn handle_request(&self, context: &mut RequestContext) -> Result<(), UriError>;

    /// Releases any reference to the listener. Called when the service is
    /// unregistered.
    fn detach(&self) {}
}

/// Resolved answer to a locally dispatched request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceResponse {
    /// Terminal result.
    pub result: ResultCode,
    /// Body, present only on success.
    pub body: Option<ResponseBody>,
    /// Failure detail.
    pub detail: Option<String>,
}

impl ServiceResponse {
    /// Successful response with an optional body.
    #[must_use]
    pub fn success(body: Option<ResponseBody>) -> Self {
        Self {
            result: ResultCode::Success,
            body,
            detail: None,
        }
    }

    /// Failed response without a body.
    #[must_use]
    pub fn failure(result: ResultCode, detail: impl Into<String>) -> Self {
        Self {
            result,
            body: None,
            detail: Some(detail.into()),
        }
    }

    /// Wraps the response in a frame answering `request_id`.
    #[must_use]
    pub fn into_frame(self, request_id: RequestId) -> Frame {
        Frame::Response {
            request_id,
            result: self.result,
            body: self.body,
            detail: self.detail,
        }
    }
}
