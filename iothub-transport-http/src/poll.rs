//! Cloud-to-device command polling and settlement
//!
//! A subscribed device is polled at most once per minimum polling
//! interval. A `200` response carries exactly one command, identified by a
//! quoted `ETag`; the command is handed to the runtime and then settled
//! with the service according to the returned disposition. Settlement is
//! fire and forget: a failed settlement is logged and the command is left
//! for the hub's own redelivery.

use http_client::{HeaderMap, HttpClient, HttpResponse, Method};
use iothub_message::Message;
use tracing::{debug, warn};

use crate::device::DeviceSession;
use crate::runtime::Disposition;
use crate::transport::TransportSettings;
use crate::wire;

/// Extract the opaque ETag value from its quoted header form
///
/// The service always quotes the value; an unquoted or empty tag means
/// the response cannot be settled and is discarded.
pub(crate) fn parse_etag(raw: &str) -> Option<&str> {
    let interior = raw.strip_prefix('"')?.strip_suffix('"')?;
    if interior.is_empty() {
        return None;
    }
    Some(interior)
}

/// Build the inbound [`Message`] from a poll response
///
/// Application properties arrive as `iothub-app-*` headers; ureq reports
/// header names lowercased, so the prefix match is done on the lowercased
/// name.
fn message_from_response(response: &HttpResponse) -> Message {
    let mut message = Message::from_bytes(response.body.clone());
    for (name, value) in response.headers.iter() {
        let lower = name.to_ascii_lowercase();
        if let Some(property) = lower.strip_prefix(wire::IOTHUB_APP_PREFIX) {
            if !property.is_empty() {
                message.set_property(property, value);
            }
        } else if lower == wire::IOTHUB_MESSAGE_ID {
            message.set_message_id(value);
        } else if lower == wire::IOTHUB_CORRELATION_ID {
            message.set_correlation_id(value);
        }
    }
    message
}

/// Per-device inbound step of the work cycle
pub(crate) fn run_poll(
    client: &HttpClient,
    settings: &TransportSettings,
    session: &mut DeviceSession,
) {
    if !session.subscribed {
        return;
    }
    if let Some(last) = session.last_poll {
        if last.elapsed() < settings.minimum_polling_interval {
            return;
        }
    }
    // the interval gates attempts, not successes
    session.last_poll = Some(std::time::Instant::now());

    let mut headers = session.command_headers.clone();
    if let Err(e) = session.refresh_authorization(&mut headers) {
        warn!(device_id = session.handle.device_id(), error = %e, "authorization refresh failed");
        return;
    }

    let response = match client.execute(Method::Get, &session.command_path, &headers, None) {
        Ok(response) => response,
        Err(e) => {
            warn!(device_id = session.handle.device_id(), error = %e, "command poll failed");
            return;
        }
    };

    match response.status {
        200 => {}
        204 => {
            debug!(device_id = session.handle.device_id(), "no command pending");
            return;
        }
        status => {
            warn!(
                device_id = session.handle.device_id(),
                status, "unexpected poll status"
            );
            return;
        }
    }

    let Some(etag) = response.headers.get("ETag").and_then(parse_etag) else {
        warn!(
            device_id = session.handle.device_id(),
            "poll response carries no usable ETag"
        );
        return;
    };
    let etag = etag.to_owned();

    let message = message_from_response(&response);
    let disposition = session.runtime.message_received(message);
    settle(client, session, &etag, disposition);
}

/// Report the runtime's verdict for one command back to the hub
fn settle(client: &HttpClient, session: &DeviceSession, etag: &str, disposition: Disposition) {
    let (method, path, body): (Method, String, Option<&[u8]>) = match disposition {
        Disposition::Accepted => (
            Method::Delete,
            format!("{}{}{}", session.abandon_path_prefix, etag, wire::API_VERSION),
            None,
        ),
        Disposition::Rejected => (
            Method::Delete,
            format!(
                "{}{}{}{}",
                session.abandon_path_prefix,
                etag,
                wire::API_VERSION,
                wire::REJECT_SUFFIX
            ),
            None,
        ),
        Disposition::Abandoned => (
            Method::Post,
            format!(
                "{}{}{}{}",
                session.abandon_path_prefix,
                etag,
                wire::ABANDON_SUFFIX,
                wire::API_VERSION
            ),
            Some(&[]),
        ),
    };

    let mut headers = HeaderMap::new();
    headers.append("User-Agent", wire::USER_AGENT);
    headers.append("If-Match", format!("\"{}\"", etag));
    if let Err(e) = session.refresh_authorization(&mut headers) {
        warn!(device_id = session.handle.device_id(), error = %e, "authorization refresh failed");
        return;
    }

    match client.execute(method, &path, &headers, body) {
        Ok(response) if response.status == 204 => {
            debug!(
                device_id = session.handle.device_id(),
                ?disposition,
                "command settled"
            );
        }
        Ok(response) => {
            warn!(
                device_id = session.handle.device_id(),
                ?disposition,
                status = response.status,
                "command settlement rejected"
            );
        }
        Err(e) => {
            warn!(device_id = session.handle.device_id(), ?disposition, error = %e, "command settlement failed");
        }
    }
}
