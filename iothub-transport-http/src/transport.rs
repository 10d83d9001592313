//! The HTTP transport engine and its driving trait
//!
//! [`HttpTransport`] owns the device registry and one [`HttpClient`] bound
//! to the hub hostname. It does no work of its own accord: the runtime
//! calls [`Transport::do_work`] once per cooperative cycle, and each cycle
//! runs the outbound step and then the poll step for every registered
//! device, in registration order.

use std::sync::Arc;
use std::time::Duration;

use http_client::{HttpClient, HttpError, OptionValue};
use tracing::debug;

use crate::batch::run_outbound;
use crate::device::{DeviceConfig, DeviceHandle, DeviceRegistry};
use crate::error::{Result, TransportError};
use crate::poll::run_poll;
use crate::runtime::{ClientRuntime, SendQueue, SendStatus};
use crate::wire;

/// Identity of the hub the transport talks to
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub iothub_name: String,
    pub iothub_suffix: String,
    /// When set, requests go to the gateway instead of `name.suffix`
    pub gateway_hostname: Option<String>,
}

impl TransportConfig {
    pub fn new(iothub_name: impl Into<String>, iothub_suffix: impl Into<String>) -> Self {
        Self {
            iothub_name: iothub_name.into(),
            iothub_suffix: iothub_suffix.into(),
            gateway_hostname: None,
        }
    }

    pub fn with_gateway(mut self, gateway_hostname: impl Into<String>) -> Self {
        self.gateway_hostname = Some(gateway_hostname.into());
        self
    }
}

/// Tunables adjusted through [`Transport::set_option`]
pub(crate) struct TransportSettings {
    pub(crate) batching: bool,
    pub(crate) minimum_polling_interval: Duration,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            batching: false,
            minimum_polling_interval: wire::DEFAULT_MINIMUM_POLLING_INTERVAL,
        }
    }
}

/// The operations a device transport exposes to the client runtime
pub trait Transport {
    /// Register a device; its queue and callbacks stay attached until
    /// unregistration
    fn register_device(
        &mut self,
        config: DeviceConfig,
        runtime: Arc<dyn ClientRuntime>,
        queue: SendQueue,
    ) -> Result<DeviceHandle>;

    /// Remove a device; a stale handle is a no-op
    fn unregister_device(&mut self, handle: &DeviceHandle);

    /// Start polling cloud-to-device commands for the device
    fn subscribe(&mut self, handle: &DeviceHandle) -> Result<()>;

    /// Stop polling; a stale handle is a no-op
    fn unsubscribe(&mut self, handle: &DeviceHandle);

    /// Run one cooperative cycle: send queued events, then poll commands
    fn do_work(&mut self);

    /// Whether the device still has queued outbound messages
    fn get_send_status(&self, handle: &DeviceHandle) -> Result<SendStatus>;

    /// Adjust a transport or client option by name
    fn set_option(&mut self, name: &str, value: &OptionValue) -> Result<()>;

    /// The hostname requests are addressed to
    fn hostname(&self) -> &str;
}

/// HTTP implementation of [`Transport`]
pub struct HttpTransport {
    hostname: String,
    client: HttpClient,
    settings: TransportSettings,
    registry: DeviceRegistry,
}

impl HttpTransport {
    pub fn new(config: TransportConfig) -> Result<Self> {
        if config.iothub_name.is_empty() {
            return Err(TransportError::InvalidArgument(
                "iothub name must not be empty".into(),
            ));
        }
        if config.iothub_suffix.is_empty() {
            return Err(TransportError::InvalidArgument(
                "iothub suffix must not be empty".into(),
            ));
        }

        let hostname = match config.gateway_hostname {
            Some(gateway) => gateway,
            None => format!("{}.{}", config.iothub_name, config.iothub_suffix),
        };
        debug!(%hostname, "transport created");

        Ok(Self {
            client: HttpClient::new(&hostname),
            hostname,
            settings: TransportSettings::default(),
            registry: DeviceRegistry::new(),
        })
    }
}

impl Transport for HttpTransport {
    fn register_device(
        &mut self,
        config: DeviceConfig,
        runtime: Arc<dyn ClientRuntime>,
        queue: SendQueue,
    ) -> Result<DeviceHandle> {
        self.registry.register(config, &self.hostname, runtime, queue)
    }

    fn unregister_device(&mut self, handle: &DeviceHandle) {
        self.registry.unregister(handle);
    }

    fn subscribe(&mut self, handle: &DeviceHandle) -> Result<()> {
        let session = self
            .registry
            .get_mut(handle)
            .ok_or(TransportError::DeviceNotFound)?;
        session.subscribed = true;
        Ok(())
    }

    fn unsubscribe(&mut self, handle: &DeviceHandle) {
        if let Some(session) = self.registry.get_mut(handle) {
            session.subscribed = false;
        }
    }

    fn do_work(&mut self) {
        let Self {
            client,
            settings,
            registry,
            ..
        } = self;
        for session in registry.iter_mut() {
            run_outbound(client, settings, session);
            run_poll(client, settings, session);
        }
    }

    fn get_send_status(&self, handle: &DeviceHandle) -> Result<SendStatus> {
        let session = self
            .registry
            .get(handle)
            .ok_or(TransportError::DeviceNotFound)?;
        let status = if session.queue.lock().is_empty() {
            SendStatus::Idle
        } else {
            SendStatus::Busy
        };
        Ok(status)
    }

    fn set_option(&mut self, name: &str, value: &OptionValue) -> Result<()> {
        match name {
            "Batching" => {
                let OptionValue::Bool(batching) = value else {
                    return Err(TransportError::InvalidArgument(
                        "option `Batching` takes a bool".into(),
                    ));
                };
                self.settings.batching = *batching;
                Ok(())
            }
            "MinimumPollingTime" => {
                let OptionValue::Interval(interval) = value else {
                    return Err(TransportError::InvalidArgument(
                        "option `MinimumPollingTime` takes an interval".into(),
                    ));
                };
                self.settings.minimum_polling_interval = *interval;
                Ok(())
            }
            _ => self.client.set_option(name, value).map_err(|e| match e {
                HttpError::InvalidArgument(msg) => TransportError::InvalidArgument(msg),
                other => other.into(),
            }),
        }
    }

    fn hostname(&self) -> &str {
        &self.hostname
    }
}
