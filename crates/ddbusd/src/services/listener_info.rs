//! The `listener` introspection service.
//!
//! Answers `listener/clients`, `listener/transports` and `listener/info`
//! with plain-text reports read from a [`ListenerIntrospection`] view. The
//! service only reads; it never changes router, registry or transport
//! state. Arguments are ignored.

use std::sync::{Arc, PoisonError, RwLock, Weak};

use crate::core::{ListenerCreateInfo, ListenerIntrospection, RouteError};
use crate::registry::ClientManagerDescriptor;
use crate::uri::{RequestContext, TextWriter, UriError, UriService};

const SERVICE_NAME: &str = "listener";

/// Introspection service bound to one listener core.
#[derive(Default)]
pub struct ListenerUriService {
    listener: RwLock<Option<Weak<dyn ListenerIntrospection>>>,
}

impl ListenerUriService {
    /// Creates an unbound service.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds the service to a listener view.
    pub fn bind(&self, listener: Weak<dyn ListenerIntrospection>) {
        *self.listener.write().unwrap_or_else(PoisonError::into_inner) = Some(listener);
    }

    fn listener(&self) -> Result<Arc<dyn ListenerIntrospection>, UriError> {
        self.listener
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(Weak::upgrade)
            .ok_or_else(|| UriError::Unbound {
                service: SERVICE_NAME.to_owned(),
            })
    }

    fn write_clients(
        listener: &dyn ListenerIntrospection,
        context: &mut RequestContext,
    ) -> Result<(), UriError> {
        let clients = listener.connected_clients().map_err(route_failure)?;
        let mut writer = context.begin_text_response()?;
        write!(writer, "--- {} Connected Clients ---", clients.len())?;
        for (index, client) in clients.iter().enumerate() {
            write!(
                writer,
                "\n\n--- Client {index} ---\nName: {}\nDescription: {}\nProcess Id: {}\nClient Id: {}\nHas Been Identified: {}",
                client.name,
                client.description,
                client.process_id,
                client.id,
                flag(client.identified),
            )?;
        }
        writer.end()
    }

    fn write_transports(
        listener: &dyn ListenerIntrospection,
        context: &mut RequestContext,
    ) -> Result<(), UriError> {
        let transports = listener.managed_transports().map_err(route_failure)?;
        let mut writer = context.begin_text_response()?;
        write!(writer, "--- {} Transports ---", transports.len())?;
        for (index, transport) in transports.iter().enumerate() {
            write!(
                writer,
                "\n\n--- Transport {index} ---\nName: {}\nHandle: {}\nIs Forwarding Connection: {}",
                transport.name,
                transport.handle,
                flag(transport.forwarding),
            )?;
        }
        writer.end()
    }

    fn write_info(
        listener: &dyn ListenerIntrospection,
        context: &mut RequestContext,
    ) -> Result<(), UriError> {
        let create_info = listener.create_info();
        let manager = listener.client_manager().map_err(route_failure)?;
        let mut writer = context.begin_text_response()?;
        write_info_lines(&mut writer, &create_info, &manager)?;
        writer.end()
    }
}

fn write_info_lines(
    writer: &mut TextWriter<'_>,
    create_info: &ListenerCreateInfo,
    manager: &ClientManagerDescriptor,
) -> Result<(), UriError> {
    write!(writer, "Listener Description: {}", create_info.description)?;
    write!(
        writer,
        "\nListener Restricted Client Support: {}",
        flag(create_info.flags.enable_restricted_clients)
    )?;
    write!(
        writer,
        "\nListener Server Support: {}",
        flag(create_info.flags.enable_server)
    )?;
    write!(writer, "\nClient Manager Name: {}", manager.name)?;
    write!(writer, "\nClient Manager Host Client Id: {}", manager.host_client_id)
}

impl UriService for ListenerUriService {
    fn name(&self) -> &str {
        SERVICE_NAME
    }

    fn handle_request(&self, context: &mut RequestContext) -> Result<(), UriError> {
        let command = context.request().command().to_owned();
        let listener = self.listener()?;
        match command.as_str() {
            "clients" => Self::write_clients(listener.as_ref(), context),
            "transports" => Self::write_transports(listener.as_ref(), context),
            "info" => Self::write_info(listener.as_ref(), context),
            _ => Err(UriError::unhandled(SERVICE_NAME, command)),
        }
    }

    fn detach(&self) {
        *self.listener.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl std::fmt::Debug for ListenerUriService {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let bound = self
            .listener
            .read()
            .map(|listener| listener.is_some())
            .unwrap_or(false);
        formatter
            .debug_struct("ListenerUriService")
            .field("bound", &bound)
            .finish()
    }
}

fn flag(value: bool) -> u8 {
    u8::from(value)
}

fn route_failure(error: RouteError) -> UriError {
    UriError::internal(error.to_string())
}
