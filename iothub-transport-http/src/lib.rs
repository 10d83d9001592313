//! HTTP transport engine for the IoT hub device SDK
//!
//! Moves device-to-cloud telemetry and cloud-to-device commands over plain
//! request/response HTTP, for devices that cannot hold an AMQP or MQTT
//! connection open. Everything is synchronous and cooperative: the owning
//! runtime registers devices, fills their send queues, and calls
//! [`Transport::do_work`] in its own loop; confirmations and received
//! commands come back through the [`ClientRuntime`] callbacks.
//!
//! ```no_run
//! use std::sync::Arc;
//! use iothub_transport_http::{
//!     ClientRuntime, ConfirmationResult, DeviceConfig, DeviceCredentials, Disposition,
//!     HttpTransport, QueuedMessage, Transport, TransportConfig, send_queue,
//! };
//! use iothub_message::Message;
//!
//! struct Printer;
//!
//! impl ClientRuntime for Printer {
//!     fn send_complete(&self, completed: Vec<QueuedMessage>, result: ConfirmationResult) {
//!         println!("{} message(s): {:?}", completed.len(), result);
//!     }
//!     fn message_received(&self, message: Message) -> Disposition {
//!         println!("command: {} bytes", message.body().len());
//!         Disposition::Accepted
//!     }
//! }
//!
//! # fn main() -> Result<(), iothub_transport_http::TransportError> {
//! let mut transport = HttpTransport::new(TransportConfig::new("contoso", "azure-devices.net"))?;
//! let queue = send_queue();
//! let device = transport.register_device(
//!     DeviceConfig::new("device-1", DeviceCredentials::DeviceKey("a2V5".into())),
//!     Arc::new(Printer),
//!     queue.clone(),
//! )?;
//! transport.subscribe(&device)?;
//!
//! queue.lock().push_back(QueuedMessage::new(Message::from_text("hello")));
//! transport.do_work();
//! # Ok(())
//! # }
//! ```

mod batch;
mod device;
mod error;
mod poll;
mod runtime;
mod transport;
pub mod wire;

pub use device::{DeviceConfig, DeviceCredentials, DeviceHandle};
pub use error::{Result, TransportError};
pub use runtime::{
    send_queue, ClientRuntime, ConfirmationResult, Disposition, QueuedMessage, SendQueue,
    SendStatus,
};
pub use transport::{HttpTransport, Transport, TransportConfig};
