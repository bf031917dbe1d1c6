//! Name-keyed registry of URI services.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use ddbus_protocol::ResultCode;
use tracing::{debug, warn};

use super::{
    RequestContext, ResponseOutcome, ServiceResponse, URI_TARGET, UriError, UriRequest,
    UriService,
};

/// Maps service names to handlers.
#[derive(Default)]
pub struct ServiceRegistry {
    services: RwLock<BTreeMap<String, Arc<dyn UriService>>>,
}

impl ServiceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a service under its own name.
    ///
    /// # Errors
    ///
    /// Returns [`UriError::NameCollision`] when the name is taken; the
    /// existing registration is left untouched.
    pub fn register(&self, service: Arc<dyn UriService>) -> Result<(), UriError> {
        let name = service.name().to_owned();
        let mut services = self.write()?;
        if services.contains_key(&name) {
            warn!(target: URI_TARGET, service = %name, "rejected duplicate service name");
            return Err(UriError::NameCollision { name });
        }
        debug!(target: URI_TARGET, service = %name, "service registered");
        services.insert(name, service);
        Ok(())
    }

    /// Removes and detaches a service.
    ///
    /// # Errors
    ///
    /// Returns [`UriError::Internal`] when the registry lock is poisoned.
    pub fn unregister(&self, name: &str) -> Result<Option<Arc<dyn UriService>>, UriError> {
        let removed = self.write()?.remove(name);
        if let Some(service) = &removed {
            service.detach();
            debug!(target: URI_TARGET, service = name, "service unregistered");
        }
        Ok(removed)
    }

    /// Looks up a service by exact name.
    ///
    /// # Errors
    ///
    /// Returns [`UriError::Internal`] when the registry lock is poisoned.
    pub fn lookup(&self, name: &str) -> Result<Option<Arc<dyn UriService>>, UriError> {
        Ok(self.read()?.get(name).cloned())
    }

    /// Registered names in sorted order.
    ///
    /// # Errors
    ///
    /// Returns [`UriError::Internal`] when the registry lock is poisoned.
    pub fn names(&self) -> Result<Vec<String>, UriError> {
        Ok(self.read()?.keys().cloned().collect())
    }

    /// Detaches and removes every service.
    pub fn clear(&self) {
        let drained = {
            let mut services = self.services.write().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *services)
        };
        for service in drained.values() {
            service.detach();
        }
    }

    /// Runs a request against the named service and resolves the outcome.
    ///
    /// Unknown services and handler errors resolve to [`ResultCode::Error`];
    /// a response that was begun but never ended resolves to
    /// [`ResultCode::Timeout`].
    pub fn dispatch(&self, request: UriRequest) -> ServiceResponse {
        let service = match self.lookup(request.service()) {
            Ok(Some(service)) => service,
            Ok(None) => {
                let error = UriError::UnknownService {
                    service: request.service().to_owned(),
                };
                return ServiceResponse::failure(ResultCode::Error, error.to_string());
            }
            Err(error) => return ServiceResponse::failure(ResultCode::Error, error.to_string()),
        };

        let mut context = RequestContext::new(request);
        let handled = service.handle_request(&mut context);
        let service_name = context.request().service().to_owned();
        let command = context.request().command().to_owned();
        match (handled, context.into_outcome()) {
            (Err(error), _) => {
                debug!(
                    target: URI_TARGET,
                    service = %service_name,
                    command = %command,
                    error = %error,
                    "service request failed"
                );
                ServiceResponse::failure(ResultCode::Error, error.to_string())
            }
            (Ok(()), ResponseOutcome::Incomplete) => {
                warn!(
                    target: URI_TARGET,
                    service = %service_name,
                    command = %command,
                    "service abandoned its response"
                );
                ServiceResponse::failure(
                    ResultCode::Timeout,
                    format!("{service_name}/{command} began a response but never ended it"),
                )
            }
            (Ok(()), ResponseOutcome::Complete(body)) => ServiceResponse::success(Some(body)),
            (Ok(()), ResponseOutcome::Unopened) => ServiceResponse::success(None),
        }
    }

    fn read(
        &self,
    ) -> Result<std::sync::RwLockReadGuard<'_, BTreeMap<String, Arc<dyn UriService>>>, UriError>
    {
        self.services
            .read()
            .map_err(|_| UriError::internal("service registry lock poisoned"))
    }

    fn write(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, BTreeMap<String, Arc<dyn UriService>>>, UriError>
    {
        self.services
            .write()
            .map_err(|_| UriError::internal("service registry lock poisoned"))
    }
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ServiceRegistry")
            .field("services", &self.names().unwrap_or_default())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use ddbus_protocol::ResponseBody;
    use rstest::rstest;

    use super::*;

    struct EchoService {
        name: &'static str,
        detached: AtomicBool,
    }

    impl EchoService {
        fn named(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                detached: AtomicBool::new(false),
            })
        }
    }

    impl UriService for EchoService {
        fn name(&self) -> &str {
            self.name
        }

        fn handle_request(&self, context: &mut RequestContext) -> Result<(), UriError> {
            match context.request().command() {
                "echo" => {
                    let arguments = context.request().arguments().to_owned();
                    let mut writer = context.begin_text_response()?;
                    writer.write(&arguments)?;
                    writer.end()
                }
                "abandon" => {
                    let mut writer = context.begin_text_response()?;
                    writer.write("half")
                }
                "quiet" => Ok(()),
                other => Err(UriError::unhandled(self.name, other)),
            }
        }

        fn detach(&self) {
            self.detached.store(true, Ordering::SeqCst);
        }
    }

    fn request(line: &str) -> UriRequest {
        UriRequest::parse(line, None).expect("request line")
    }

    #[test]
    fn duplicate_names_keep_the_original() {
        let registry = ServiceRegistry::new();
        let original = EchoService::named("echo");
        registry.register(original.clone()).expect("first registration");
        let error = registry
            .register(EchoService::named("echo"))
            .expect_err("duplicate registration");
        assert_eq!(
            error,
            UriError::NameCollision {
                name: "echo".to_owned()
            }
        );
        let found = registry.lookup("echo").expect("lookup").expect("registered");
        let original: Arc<dyn UriService> = original;
        assert!(Arc::ptr_eq(&found, &original));
    }

    #[rstest]
    #[case::echo("echo/echo hi there", ResultCode::Success, Some("hi there"))]
    #[case::quiet("echo/quiet", ResultCode::Success, None)]
    #[case::unknown_command("echo/unknowncmd", ResultCode::Error, None)]
    #[case::unknown_service("missing/echo", ResultCode::Error, None)]
    #[case::abandoned("echo/abandon", ResultCode::Timeout, None)]
    fn dispatch_resolves_every_request(
        #[case] line: &str,
        #[case] result: ResultCode,
        #[case] text: Option<&str>,
    ) {
        let registry = ServiceRegistry::new();
        registry
            .register(EchoService::named("echo"))
            .expect("register");
        let response = registry.dispatch(request(line));
        assert_eq!(response.result, result);
        assert_eq!(
            response.body,
            text.map(|body| ResponseBody::Text(body.to_owned()))
        );
        assert_eq!(response.detail.is_some(), !result.is_success());
    }

    #[test]
    fn service_names_are_case_sensitive() {
        let registry = ServiceRegistry::new();
        registry
            .register(EchoService::named("echo"))
            .expect("register");
        let response = registry.dispatch(request("Echo/echo x"));
        assert_eq!(response.result, ResultCode::Error);
    }

    #[test]
    fn unregister_and_clear_detach_services() {
        let registry = ServiceRegistry::new();
        let first = EchoService::named("first");
        let second = EchoService::named("second");
        registry.register(first.clone()).expect("register first");
        registry.register(second.clone()).expect("register second");

        registry.unregister("first").expect("unregister");
        assert!(first.detached.load(Ordering::SeqCst));
        assert_eq!(registry.names().expect("names"), vec!["second".to_owned()]);

        registry.clear();
        assert!(second.detached.load(Ordering::SeqCst));
        assert!(registry.names().expect("names").is_empty());
    }
}
