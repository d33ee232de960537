use crate::credential::Credential;
use crate::environment::EnvironmentHandle;
use std::collections::HashMap;
use std::sync::Arc;

/// Read-only, populated-at-startup lookup from any of the three credential
/// kinds to the `EnvironmentHandle` it authorizes. The router consults this
/// on every request; nothing ever inserts into it after `Supervisor`
/// finishes bringing environments up, so lookups need no locking.
#[derive(Default)]
pub struct CredentialRegistry {
    server: HashMap<String, Arc<EnvironmentHandle>>,
    mobile: HashMap<String, Arc<EnvironmentHandle>>,
    browser: HashMap<String, Arc<EnvironmentHandle>>,
    /// Server credentials with an event-forwarding handler registered
    /// (§4.4 step 6, `sendEvents`). `/bulk` is authorized against this map
    /// alone, not `server` — an environment with event forwarding disabled
    /// has no handler here even though its server credential still resolves
    /// normally for `/flags` and the eval endpoints.
    event_handlers: HashMap<String, Arc<EnvironmentHandle>>,
}

impl CredentialRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handle: Arc<EnvironmentHandle>) {
        self.server
            .insert(handle.config.api_key.clone(), handle.clone());
        if let Some(mobile_key) = &handle.config.mobile_key {
            self.mobile.insert(mobile_key.clone(), handle.clone());
        }
        if let Some(env_id) = &handle.config.env_id {
            self.browser.insert(env_id.clone(), handle.clone());
        }
    }

    /// Registers `handle`'s server credential as having an event-forwarding
    /// handler, per §4.4 step 6: only called by `Supervisor` when
    /// `sendEvents` is enabled.
    pub fn register_event_handler(&mut self, handle: Arc<EnvironmentHandle>) {
        self.event_handlers
            .insert(handle.config.api_key.clone(), handle);
    }

    pub fn resolve(&self, credential: &Credential) -> Option<Arc<EnvironmentHandle>> {
        let map = match credential {
            Credential::Server(_) => &self.server,
            Credential::Mobile(_) => &self.mobile,
            Credential::Browser(_) => &self.browser,
        };
        map.get(credential.token()).cloned()
    }

    /// Looks up the event-forwarding handler registered for a server
    /// credential, independent of `resolve` — used solely by `/bulk`.
    pub fn resolve_event_handler(&self, token: &str) -> Option<Arc<EnvironmentHandle>> {
        self.event_handlers.get(token).cloned()
    }

    pub fn environments(&self) -> impl Iterator<Item = &Arc<EnvironmentHandle>> {
        self.server.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EnvironmentConfig;
    use crate::sse::Publisher;
    use crate::store::MemoryStore;
    use std::time::Duration;

    fn handle(name: &str, mobile_key: Option<&str>, env_id: Option<&str>) -> Arc<EnvironmentHandle> {
        Arc::new(EnvironmentHandle::new(
            EnvironmentConfig {
                name: name.to_string(),
                api_key: format!("server-{name}"),
                mobile_key: mobile_key.map(str::to_string),
                env_id: env_id.map(str::to_string),
                prefix: None,
            },
            Arc::new(MemoryStore::new()),
            Arc::new(Publisher::new(16, Duration::from_secs(30))),
        ))
    }

    #[test]
    fn resolves_each_credential_kind_independently() {
        let mut registry = CredentialRegistry::new();
        registry.register(handle("production", Some("mob-1"), Some("env-1")));

        assert!(registry
            .resolve(&Credential::Server("server-production".to_string()))
            .is_some());
        assert!(registry
            .resolve(&Credential::Mobile("mob-1".to_string()))
            .is_some());
        assert!(registry
            .resolve(&Credential::Browser("env-1".to_string()))
            .is_some());
        assert!(registry
            .resolve(&Credential::Server("unknown".to_string()))
            .is_none());
    }

    #[test]
    fn event_handler_lookup_is_independent_of_server_resolve() {
        let mut registry = CredentialRegistry::new();
        let with_events = handle("production", None, None);
        let without_events = handle("staging", None, None);
        registry.register(with_events.clone());
        registry.register(without_events.clone());
        registry.register_event_handler(with_events);

        assert!(registry.resolve_event_handler("server-production").is_some());
        assert!(registry.resolve_event_handler("server-staging").is_none());
        // `staging`'s server credential still resolves normally for /flags etc.
        assert!(registry
            .resolve(&Credential::Server("server-staging".to_string()))
            .is_some());
    }
}
