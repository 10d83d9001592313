//! Per-device registration state
//!
//! Registering a device precomputes everything that is stable for its
//! lifetime: relative paths, request header sets, and the credential used
//! to stamp `Authorization` per request. The registry owns the sessions;
//! callers address them through an opaque [`DeviceHandle`].

use std::sync::Arc;

use http_client::sas::{url_encode, SasCredential};
use http_client::HeaderMap;
use tracing::debug;

use crate::error::{Result, TransportError};
use crate::runtime::{ClientRuntime, SendQueue};
use crate::wire;

/// How a device authenticates to the hub
#[derive(Debug, Clone)]
pub enum DeviceCredentials {
    /// Base64 symmetric key; the transport signs a fresh SAS token per request
    DeviceKey(String),
    /// Pre-built SAS token used verbatim as the `Authorization` value
    SasToken(String),
    /// Client-certificate authentication; no `Authorization` header at all
    X509,
}

/// Caller-supplied description of a device to register
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub device_id: String,
    pub credentials: DeviceCredentials,
}

impl DeviceConfig {
    pub fn new(device_id: impl Into<String>, credentials: DeviceCredentials) -> Self {
        Self {
            device_id: device_id.into(),
            credentials,
        }
    }
}

/// Opaque, cloneable reference to a registered device
///
/// Handles stay valid across registry mutations; operations on a handle
/// whose device was unregistered report [`TransportError::DeviceNotFound`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceHandle(Arc<str>);

impl DeviceHandle {
    pub fn device_id(&self) -> &str {
        &self.0
    }
}

/// Per-request credential material, resolved once at registration
#[derive(Debug)]
pub(crate) enum SessionAuth {
    Signed(SasCredential),
    Token(String),
    X509,
}

/// Everything the engine keeps per registered device
pub(crate) struct DeviceSession {
    pub(crate) handle: DeviceHandle,
    pub(crate) auth: SessionAuth,
    pub(crate) event_path: String,
    pub(crate) command_path: String,
    pub(crate) abandon_path_prefix: String,
    pub(crate) event_headers: HeaderMap,
    pub(crate) command_headers: HeaderMap,
    pub(crate) subscribed: bool,
    pub(crate) last_poll: Option<std::time::Instant>,
    pub(crate) runtime: Arc<dyn ClientRuntime>,
    pub(crate) queue: SendQueue,
}

impl DeviceSession {
    fn build(
        config: DeviceConfig,
        hostname: &str,
        runtime: Arc<dyn ClientRuntime>,
        queue: SendQueue,
    ) -> Result<Self> {
        if config.device_id.is_empty() {
            return Err(TransportError::InvalidArgument(
                "device id must not be empty".into(),
            ));
        }

        let encoded_id = url_encode(&config.device_id);
        let is_x509 = matches!(config.credentials, DeviceCredentials::X509);

        let event_endpoint = format!("/devices/{}{}", encoded_id, wire::EVENT_ENDPOINT);
        let event_path = format!("{}{}", event_endpoint, wire::API_VERSION);
        let command_path = format!(
            "/devices/{}{}{}",
            encoded_id,
            wire::MESSAGE_ENDPOINT,
            wire::API_VERSION
        );
        let abandon_path_prefix = format!("/devices/{}{}", encoded_id, wire::MESSAGE_ITEM_ENDPOINT);

        let mut event_headers = HeaderMap::new();
        event_headers.append("iothub-to", event_endpoint);
        if !is_x509 {
            // placeholder; replaced per request by the SAS layer
            event_headers.append("Authorization", " ");
        }
        event_headers.append("Accept", "application/json");
        event_headers.append("Connection", "Keep-Alive");
        event_headers.append("User-Agent", wire::USER_AGENT);

        let mut command_headers = HeaderMap::new();
        command_headers.append("User-Agent", wire::USER_AGENT);
        if !is_x509 {
            command_headers.append("Authorization", " ");
        }

        let auth = match config.credentials {
            DeviceCredentials::DeviceKey(key) => {
                let resource_uri = format!("{}/devices/{}", hostname, encoded_id);
                SessionAuth::Signed(SasCredential::new(&key, resource_uri, None)?)
            }
            DeviceCredentials::SasToken(token) => SessionAuth::Token(token),
            DeviceCredentials::X509 => SessionAuth::X509,
        };

        Ok(Self {
            handle: DeviceHandle(Arc::from(config.device_id.as_str())),
            auth,
            event_path,
            command_path,
            abandon_path_prefix,
            event_headers,
            command_headers,
            subscribed: false,
            last_poll: None,
            runtime,
            queue,
        })
    }

    /// Stamp the `Authorization` header for one request
    ///
    /// X.509 sessions carry no such header and are left untouched.
    pub(crate) fn refresh_authorization(&self, headers: &mut HeaderMap) -> Result<()> {
        match &self.auth {
            SessionAuth::Signed(credential) => {
                headers.set("Authorization", credential.token_now(wire::SAS_TOKEN_TTL)?);
            }
            SessionAuth::Token(token) => {
                headers.set("Authorization", token.clone());
            }
            SessionAuth::X509 => {}
        }
        Ok(())
    }
}

/// The set of registered devices, in registration order
#[derive(Default)]
pub(crate) struct DeviceRegistry {
    devices: Vec<DeviceSession>,
}

impl DeviceRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register a device, enforcing id uniqueness
    pub(crate) fn register(
        &mut self,
        config: DeviceConfig,
        hostname: &str,
        runtime: Arc<dyn ClientRuntime>,
        queue: SendQueue,
    ) -> Result<DeviceHandle> {
        if self.find(&config.device_id).is_some() {
            return Err(TransportError::DuplicateDevice(config.device_id));
        }
        let session = DeviceSession::build(config, hostname, runtime, queue)?;
        let handle = session.handle.clone();
        debug!(device_id = handle.device_id(), "device registered");
        self.devices.push(session);
        Ok(handle)
    }

    /// Remove a device; no-op when the handle no longer resolves
    pub(crate) fn unregister(&mut self, handle: &DeviceHandle) {
        if let Some(index) = self.position(handle) {
            self.devices.remove(index);
            debug!(device_id = handle.device_id(), "device unregistered");
        }
    }

    pub(crate) fn get(&self, handle: &DeviceHandle) -> Option<&DeviceSession> {
        self.position(handle).map(|i| &self.devices[i])
    }

    pub(crate) fn get_mut(&mut self, handle: &DeviceHandle) -> Option<&mut DeviceSession> {
        self.position(handle).map(|i| &mut self.devices[i])
    }

    /// Sessions in registration order
    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut DeviceSession> {
        self.devices.iter_mut()
    }

    pub(crate) fn len(&self) -> usize {
        self.devices.len()
    }

    fn find(&self, device_id: &str) -> Option<&DeviceSession> {
        self.devices
            .iter()
            .find(|s| s.handle.device_id() == device_id)
    }

    fn position(&self, handle: &DeviceHandle) -> Option<usize> {
        self.devices
            .iter()
            .position(|s| s.handle.device_id() == handle.device_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{send_queue, ConfirmationResult, Disposition, QueuedMessage};
    use iothub_message::Message;

    struct NullRuntime;

    impl ClientRuntime for NullRuntime {
        fn send_complete(&self, _completed: Vec<QueuedMessage>, _result: ConfirmationResult) {}

        fn message_received(&self, _message: Message) -> Disposition {
            Disposition::Abandoned
        }
    }

    fn register_one(registry: &mut DeviceRegistry, id: &str) -> Result<DeviceHandle> {
        registry.register(
            DeviceConfig::new(id, DeviceCredentials::SasToken("SharedAccessSignature sr=x".into())),
            "contoso.azure-devices.net",
            Arc::new(NullRuntime),
            send_queue(),
        )
    }

    #[test]
    fn test_relative_paths_carry_api_version() {
        let mut registry = DeviceRegistry::new();
        let handle = register_one(&mut registry, "dev1").unwrap();
        let session = registry.get(&handle).unwrap();

        assert_eq!(
            session.event_path,
            "/devices/dev1/messages/events?api-version=2016-02-03"
        );
        assert_eq!(
            session.command_path,
            "/devices/dev1/messages/devicebound?api-version=2016-02-03"
        );
        assert_eq!(session.abandon_path_prefix, "/devices/dev1/messages/devicebound/");
    }

    #[test]
    fn test_device_id_is_url_encoded_in_paths() {
        let mut registry = DeviceRegistry::new();
        let handle = register_one(&mut registry, "my device#1").unwrap();
        let session = registry.get(&handle).unwrap();

        assert!(session.event_path.starts_with("/devices/my%20device%231/"));
        assert!(session.abandon_path_prefix.starts_with("/devices/my%20device%231/"));
    }

    #[test]
    fn test_event_headers_fixed_set() {
        let mut registry = DeviceRegistry::new();
        let handle = register_one(&mut registry, "dev1").unwrap();
        let session = registry.get(&handle).unwrap();

        assert_eq!(
            session.event_headers.get("iothub-to"),
            Some("/devices/dev1/messages/events")
        );
        assert_eq!(session.event_headers.get("Authorization"), Some(" "));
        assert_eq!(session.event_headers.get("Accept"), Some("application/json"));
        assert_eq!(session.event_headers.get("Connection"), Some("Keep-Alive"));
        assert!(session
            .event_headers
            .get("User-Agent")
            .unwrap()
            .starts_with("iothubclient/"));
    }

    #[test]
    fn test_x509_sessions_have_no_authorization_header() {
        let mut registry = DeviceRegistry::new();
        let handle = registry
            .register(
                DeviceConfig::new("certdev", DeviceCredentials::X509),
                "contoso.azure-devices.net",
                Arc::new(NullRuntime),
                send_queue(),
            )
            .unwrap();
        let session = registry.get(&handle).unwrap();

        assert_eq!(session.event_headers.get("Authorization"), None);
        assert_eq!(session.command_headers.get("Authorization"), None);

        let mut headers = session.command_headers.clone();
        session.refresh_authorization(&mut headers).unwrap();
        assert_eq!(headers.get("Authorization"), None);
    }

    #[test]
    fn test_duplicate_device_id_is_rejected_and_registry_unchanged() {
        let mut registry = DeviceRegistry::new();
        register_one(&mut registry, "dev1").unwrap();

        let err = register_one(&mut registry, "dev1").unwrap_err();
        assert!(matches!(err, TransportError::DuplicateDevice(id) if id == "dev1"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_empty_device_id_is_invalid() {
        let mut registry = DeviceRegistry::new();
        let err = register_one(&mut registry, "").unwrap_err();
        assert!(matches!(err, TransportError::InvalidArgument(_)));
    }

    #[test]
    fn test_unregister_then_lookup_misses() {
        let mut registry = DeviceRegistry::new();
        let handle = register_one(&mut registry, "dev1").unwrap();
        registry.unregister(&handle);
        assert!(registry.get(&handle).is_none());
        // second unregister is a no-op
        registry.unregister(&handle);
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_presupplied_token_is_used_verbatim() {
        let mut registry = DeviceRegistry::new();
        let handle = register_one(&mut registry, "dev1").unwrap();
        let session = registry.get(&handle).unwrap();

        let mut headers = session.event_headers.clone();
        session.refresh_authorization(&mut headers).unwrap();
        assert_eq!(headers.get("Authorization"), Some("SharedAccessSignature sr=x"));
    }

    #[test]
    fn test_device_key_builds_signing_credential() {
        let mut registry = DeviceRegistry::new();
        let handle = registry
            .register(
                DeviceConfig::new(
                    "dev1",
                    DeviceCredentials::DeviceKey("AAECAwQFBgcICQoLDA0ODw==".into()),
                ),
                "contoso.azure-devices.net",
                Arc::new(NullRuntime),
                send_queue(),
            )
            .unwrap();
        let session = registry.get(&handle).unwrap();
        match &session.auth {
            SessionAuth::Signed(credential) => {
                assert_eq!(
                    credential.resource_uri(),
                    "contoso.azure-devices.net/devices/dev1"
                );
            }
            other => panic!("expected signed auth, got {:?}", other),
        }
    }

    #[test]
    fn test_bad_device_key_rolls_back_registration() {
        let mut registry = DeviceRegistry::new();
        let err = registry
            .register(
                DeviceConfig::new("dev1", DeviceCredentials::DeviceKey("///bad key///".into())),
                "contoso.azure-devices.net",
                Arc::new(NullRuntime),
                send_queue(),
            )
            .unwrap_err();
        assert!(matches!(err, TransportError::Sas(_)));
        assert_eq!(registry.len(), 0);
    }
}
