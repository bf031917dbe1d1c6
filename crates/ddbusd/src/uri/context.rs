//! Per-request context and response writers.
//!
//! A context starts unopened. Beginning a text or binary response hands out
//! a writer; ending the writer seals the body. Out-of-order calls are logged
//! and reported as [`UriError::InvalidWriterState`] without disturbing a
//! body that has already been sealed.

use std::fmt;
use std::mem;

use ddbus_protocol::ResponseBody;
use tracing::warn;

use super::{URI_TARGET, UriError, UriRequest};

#[derive(Debug)]
enum WriterState {
    Unopened,
    Text(String),
    Binary(Vec<u8>),
    Closed(ResponseBody),
}

impl WriterState {
    fn label(&self) -> &'static str {
        match self {
            Self::Unopened => "unopened",
            Self::Text(_) | Self::Binary(_) => "open",
            Self::Closed(_) => "closed",
        }
    }
}

/// What a handler left behind once it returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseOutcome {
    /// No response was begun.
    Unopened,
    /// A response was begun but never ended.
    Incomplete,
    /// A response was ended with this body.
    Complete(ResponseBody),
}

/// Scratch space handed to a service for one request.
///
/// A context belongs to exactly one in-flight request.
#[derive(Debug)]
pub struct RequestContext {
    request: UriRequest,
    state: WriterState,
}

impl RequestContext {
    /// Wraps a request in an unopened context.
    #[must_use]
    pub fn new(request: UriRequest) -> Self {
        Self {
            request,
            state: WriterState::Unopened,
        }
    }

    /// The request being answered.
    #[must_use]
    pub fn request(&self) -> &UriRequest {
        &self.request
    }

    /// Opens a text response.
    ///
    /// # Errors
    ///
    /// Returns [`UriError::InvalidWriterState`] if a response was already
    /// begun.
    pub fn begin_text_response(&mut self) -> Result<TextWriter<'_>, UriError> {
        self.open("begin a text response", WriterState::Text(String::new()))?;
        Ok(TextWriter { context: self })
    }

    /// Opens a binary response.
    ///
    /// # Errors
    ///
    /// Returns [`UriError::InvalidWriterState`] if a response was already
    /// begun.
    pub fn begin_binary_response(&mut self) -> Result<BinaryWriter<'_>, UriError> {
        self.open("begin a binary response", WriterState::Binary(Vec::new()))?;
        Ok(BinaryWriter { context: self })
    }

    /// Consumes the context, reporting what the handler produced.
    #[must_use]
    pub fn into_outcome(self) -> ResponseOutcome {
        match self.state {
            WriterState::Unopened => ResponseOutcome::Unopened,
            WriterState::Text(_) | WriterState::Binary(_) => ResponseOutcome::Incomplete,
            WriterState::Closed(body) => ResponseOutcome::Complete(body),
        }
    }

    fn open(&mut self, operation: &'static str, next: WriterState) -> Result<(), UriError> {
        if !matches!(self.state, WriterState::Unopened) {
            return Err(self.violation(operation));
        }
        self.state = next;
        Ok(())
    }

    fn append_text(&mut self, fragment: &str) -> Result<(), UriError> {
        if let WriterState::Text(buffer) = &mut self.state {
            buffer.push_str(fragment);
            return Ok(());
        }
        Err(self.violation("write text"))
    }

    fn append_bytes(&mut self, bytes: &[u8]) -> Result<(), UriError> {
        if let WriterState::Binary(buffer) = &mut self.state {
            buffer.extend_from_slice(bytes);
            return Ok(());
        }
        Err(self.violation("write bytes"))
    }

    fn seal(&mut self) -> Result<(), UriError> {
        let body = match mem::replace(&mut self.state, WriterState::Unopened) {
            WriterState::Text(text) => ResponseBody::Text(text),
            WriterState::Binary(bytes) => ResponseBody::Binary(bytes),
            other => {
                self.state = other;
                return Err(self.violation("end the response"));
            }
        };
        self.state = WriterState::Closed(body);
        Ok(())
    }

    fn violation(&self, operation: &'static str) -> UriError {
        let state = self.state.label();
        warn!(
            target: URI_TARGET,
            service = self.request.service(),
            command = self.request.command(),
            operation,
            state,
            "response writer used out of order"
        );
        UriError::InvalidWriterState { operation, state }
    }
}

/// Appends UTF-8 fragments to a text response.
///
/// Supports `write!` through [`TextWriter::write_fmt`].
#[derive(Debug)]
pub struct TextWriter<'a> {
    context: &'a mut RequestContext,
}

impl TextWriter<'_> {
    /// Appends a fragment verbatim.
    ///
    /// # Errors
    ///
    /// Returns [`UriError::InvalidWriterState`] after [`TextWriter::end`].
    pub fn write(&mut self, fragment: &str) -> Result<(), UriError> {
        self.context.append_text(fragment)
    }

    /// Appends formatted text.
    ///
    /// # Errors
    ///
    /// Returns [`UriError::InvalidWriterState`] after [`TextWriter::end`].
    pub fn write_fmt(&mut self, arguments: fmt::Arguments<'_>) -> Result<(), UriError> {
        match arguments.as_str() {
            Some(literal) => self.write(literal),
            None => self.write(&arguments.to_string()),
        }
    }

    /// Seals the response.
    ///
    /// # Errors
    ///
    /// Returns [`UriError::InvalidWriterState`] when called twice.
    pub fn end(&mut self) -> Result<(), UriError> {
        self.context.seal()
    }
}

/// Appends bytes to a binary response.
#[derive(Debug)]
pub struct BinaryWriter<'a> {
    context: &'a mut RequestContext,
}

impl BinaryWriter<'_> {
    /// Appends raw bytes.
    ///
    /// # Errors
    ///
    /// Returns [`UriError::InvalidWriterState`] after [`BinaryWriter::end`].
    pub fn write(&mut self, bytes: &[u8]) -> Result<(), UriError> {
        self.context.append_bytes(bytes)
    }

    /// Seals the response.
    ///
    /// # Errors
    ///
    /// Returns [`UriError::InvalidWriterState`] when called twice.
    pub fn end(&mut self) -> Result<(), UriError> {
        self.context.seal()
    }
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};

    use super::*;

    #[fixture]
    fn context() -> RequestContext {
        RequestContext::new(UriRequest::parse("test/echo", None).expect("request"))
    }

    #[rstest]
    fn untouched_context_is_unopened(context: RequestContext) {
        assert_eq!(context.into_outcome(), ResponseOutcome::Unopened);
    }

    #[rstest]
    fn text_fragments_concatenate_in_order(mut context: RequestContext) {
        let mut writer = context.begin_text_response().expect("begin");
        writer.write("--- ").expect("write");
        write!(writer, "{} Items", 2).expect("write_fmt");
        writer.write(" ---").expect("write");
        writer.end().expect("end");
        assert_eq!(
            context.into_outcome(),
            ResponseOutcome::Complete(ResponseBody::Text("--- 2 Items ---".to_owned()))
        );
    }

    #[rstest]
    fn second_end_fails_without_touching_the_body(mut context: RequestContext) {
        let mut writer = context.begin_binary_response().expect("begin");
        writer.write(&[1, 2]).expect("write");
        writer.end().expect("first end");
        assert_eq!(
            writer.end(),
            Err(UriError::InvalidWriterState {
                operation: "end the response",
                state: "closed"
            })
        );
        assert!(writer.write(&[3]).is_err());
        assert_eq!(
            context.into_outcome(),
            ResponseOutcome::Complete(ResponseBody::Binary(vec![1, 2]))
        );
    }

    #[rstest]
    fn beginning_twice_is_rejected(mut context: RequestContext) {
        context.begin_text_response().expect("first begin");
        let error = context
            .begin_binary_response()
            .expect_err("second begin must fail");
        assert!(matches!(error, UriError::InvalidWriterState { state: "open", .. }));
        assert_eq!(context.into_outcome(), ResponseOutcome::Incomplete);
    }

    #[rstest]
    fn abandoned_writer_leaves_an_incomplete_response(mut context: RequestContext) {
        {
            let mut writer = context.begin_text_response().expect("begin");
            writer.write("partial").expect("write");
        }
        assert_eq!(context.into_outcome(), ResponseOutcome::Incomplete);
    }
}
