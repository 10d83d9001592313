//! Outbound batching and event serialization
//!
//! Once per cycle the engine drains as much of a device's send queue as
//! fits into one request. In batched mode the messages become one JSON
//! array; the array is built with [`BatchPayloadBuilder`], whose `push`
//! enforces the service size budget and whose one-shot `finish` closes the
//! payload. The policy on partial construction is deliberate: whatever was
//! appended before the first rejection is sent, the rest stays queued for
//! the next cycle. Only a head-of-queue message that can never fit is
//! failed outright.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use http_client::{HttpClient, Method};
use iothub_message::{Message, MessageBody};
use tracing::{debug, warn};

use crate::device::DeviceSession;
use crate::runtime::{ConfirmationResult, QueuedMessage, SendQueue};
use crate::transport::TransportSettings;
use crate::wire;

/// Size-budget rejection raised by [`BatchPayloadBuilder::push`]
#[derive(Debug)]
pub(crate) struct OverSizeLimit {
    pub(crate) item_size: usize,
}

/// Incremental builder for the batched event JSON array
pub(crate) struct BatchPayloadBuilder {
    payload: String,
    total_size: usize,
    count: usize,
}

impl BatchPayloadBuilder {
    pub(crate) fn new() -> Self {
        Self {
            payload: String::from("["),
            total_size: 0,
            count: 0,
        }
    }

    /// Append one message, charging it against the running size budget
    pub(crate) fn push(&mut self, message: &Message) -> Result<(), OverSizeLimit> {
        let (item, item_size) = serialize_item(message);
        if self.total_size + item_size > wire::MAXIMUM_MESSAGE_SIZE {
            return Err(OverSizeLimit { item_size });
        }
        self.payload.push_str(&item);
        self.total_size += item_size;
        self.count += 1;
        Ok(())
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Close the array; `None` when nothing was appended
    pub(crate) fn finish(mut self) -> Option<String> {
        if self.count == 0 {
            return None;
        }
        // every appended item ends with ","; the last one becomes "]"
        self.payload.pop();
        self.payload.push(']');
        Some(self.payload)
    }
}

/// Serialized element plus its size contribution
///
/// Byte payloads become `{"body":"<base64>"...}`, string payloads
/// `{"body":<json string>,"base64Encoded":false...}`. Each element ends
/// with a trailing comma for the builder to fix up on finish.
fn serialize_item(message: &Message) -> (String, usize) {
    let mut item = String::new();
    let payload_len = match message.body() {
        MessageBody::Bytes(bytes) => {
            item.push_str("{\"body\":\"");
            item.push_str(&STANDARD.encode(bytes));
            item.push('"');
            bytes.len()
        }
        MessageBody::Text(text) => {
            item.push_str("{\"body\":");
            json_escape_into(&mut item, text);
            item.push_str(",\"base64Encoded\":false");
            text.len()
        }
    };

    let mut properties_size = 0;
    if message.property_count() > 0 {
        item.push_str(",\"properties\":{");
        for (i, (name, value)) in message.properties().enumerate() {
            if i > 0 {
                item.push(',');
            }
            item.push('"');
            item.push_str(wire::IOTHUB_APP_PREFIX);
            item.push_str(name);
            item.push_str("\":\"");
            item.push_str(value);
            item.push('"');
            properties_size += name.len() + value.len() + wire::PROPERTY_OVERHEAD;
        }
        item.push('}');
    }
    item.push_str("},");

    (item, payload_len + wire::PAYLOAD_OVERHEAD + properties_size)
}

/// Write `text` as a quoted JSON string
fn json_escape_into(out: &mut String, text: &str) {
    out.push('"');
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

/// Full size contribution of one message (unbatched accounting)
pub(crate) fn message_size(message: &Message) -> usize {
    message.body().len()
        + wire::PAYLOAD_OVERHEAD
        + message
            .properties()
            .map(|(name, value)| name.len() + value.len() + wire::PROPERTY_OVERHEAD)
            .sum::<usize>()
}

/// What one batch-construction pass produced
pub(crate) enum BatchOutcome {
    /// A sendable payload; `in_flight` holds the included messages in order
    Payload {
        body: String,
        in_flight: Vec<QueuedMessage>,
    },
    /// The head of the queue alone exceeds the size limit
    FirstItemTooLarge(Box<QueuedMessage>),
    NoItems,
}

/// Drain the queue front into a batch payload
///
/// Messages move from the queue into the in-flight list as they are
/// appended, so a rejected later item is still at the queue front for the
/// next cycle.
pub(crate) fn build_batch(queue: &SendQueue) -> BatchOutcome {
    let mut queue = queue.lock();
    let mut builder = BatchPayloadBuilder::new();
    let mut in_flight = Vec::new();

    loop {
        let Some(front) = queue.front() else { break };
        match builder.push(&front.message) {
            Ok(()) => {
                if let Some(entry) = queue.pop_front() {
                    in_flight.push(entry);
                }
            }
            Err(rejected) if builder.is_empty() => {
                debug!(
                    item_size = rejected.item_size,
                    limit = wire::MAXIMUM_MESSAGE_SIZE,
                    "head message exceeds the size limit"
                );
                match queue.pop_front() {
                    Some(failed) => return BatchOutcome::FirstItemTooLarge(Box::new(failed)),
                    None => break,
                }
            }
            Err(_) => break, // send what fits; this item waits for the next cycle
        }
    }

    match builder.finish() {
        Some(body) => BatchOutcome::Payload { body, in_flight },
        None => BatchOutcome::NoItems,
    }
}

/// Push unsent messages back to the queue front, restoring FIFO order
fn restore_front(queue: &SendQueue, in_flight: Vec<QueuedMessage>) {
    let mut queue = queue.lock();
    for entry in in_flight.into_iter().rev() {
        queue.push_front(entry);
    }
}

/// Per-device outbound step of the work cycle
pub(crate) fn run_outbound(
    client: &HttpClient,
    settings: &TransportSettings,
    session: &mut DeviceSession,
) {
    if session.queue.lock().is_empty() {
        return;
    }
    if settings.batching {
        run_batched(client, session);
    } else {
        run_unbatched(client, session);
    }
}

fn run_batched(client: &HttpClient, session: &mut DeviceSession) {
    session
        .event_headers
        .set(wire::CONTENT_TYPE, wire::APPLICATION_VND_MICROSOFT_IOTHUB_JSON);

    let (body, in_flight) = match build_batch(&session.queue) {
        BatchOutcome::Payload { body, in_flight } => (body, in_flight),
        BatchOutcome::FirstItemTooLarge(failed) => {
            session
                .runtime
                .send_complete(vec![*failed], ConfirmationResult::Error);
            return;
        }
        BatchOutcome::NoItems => return,
    };

    let mut headers = session.event_headers.clone();
    if let Err(e) = session.refresh_authorization(&mut headers) {
        warn!(device_id = session.handle.device_id(), error = %e, "authorization refresh failed");
        restore_front(&session.queue, in_flight);
        return;
    }

    match client.execute(Method::Post, &session.event_path, &headers, Some(body.as_bytes())) {
        Ok(response) if response.status < 300 => {
            session
                .runtime
                .send_complete(in_flight, ConfirmationResult::Ok);
        }
        Ok(response) => {
            warn!(
                device_id = session.handle.device_id(),
                status = response.status,
                "batched event send rejected; will retry"
            );
            restore_front(&session.queue, in_flight);
        }
        Err(e) => {
            warn!(device_id = session.handle.device_id(), error = %e, "batched event send failed; will retry");
            restore_front(&session.queue, in_flight);
        }
    }
}

fn run_unbatched(client: &HttpClient, session: &mut DeviceSession) {
    let Some(entry) = session.queue.lock().pop_front() else {
        return;
    };

    if message_size(&entry.message) > wire::MAXIMUM_MESSAGE_SIZE {
        session
            .runtime
            .send_complete(vec![entry], ConfirmationResult::Error);
        return;
    }

    let mut headers = session.event_headers.clone();
    headers.set(wire::CONTENT_TYPE, wire::APPLICATION_OCTET_STREAM);
    for (name, value) in entry.message.properties() {
        headers.set(&format!("{}{}", wire::IOTHUB_APP_PREFIX, name), value);
    }
    if let Some(id) = entry.message.message_id() {
        headers.set(wire::IOTHUB_MESSAGE_ID, id);
    }
    if let Some(id) = entry.message.correlation_id() {
        headers.set(wire::IOTHUB_CORRELATION_ID, id);
    }
    if let Err(e) = session.refresh_authorization(&mut headers) {
        warn!(device_id = session.handle.device_id(), error = %e, "authorization refresh failed");
        session.queue.lock().push_front(entry);
        return;
    }

    let outcome = client.execute(
        Method::Post,
        &session.event_path,
        &headers,
        Some(entry.message.body().as_bytes()),
    );
    match outcome {
        Ok(response) if response.status < 300 => {
            session
                .runtime
                .send_complete(vec![entry], ConfirmationResult::Ok);
        }
        Ok(response) => {
            warn!(
                device_id = session.handle.device_id(),
                status = response.status,
                "event send rejected; will retry"
            );
            session.queue.lock().push_front(entry);
        }
        Err(e) => {
            warn!(device_id = session.handle.device_id(), error = %e, "event send failed; will retry");
            session.queue.lock().push_front(entry);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::send_queue;

    fn serialize(message: &Message) -> String {
        serialize_item(message).0
    }

    #[test]
    fn test_serialize_byte_payload() {
        let message = Message::from_bytes(b"123456".to_vec());
        assert_eq!(serialize(&message), "{\"body\":\"MTIzNDU2\"},");
    }

    #[test]
    fn test_serialize_text_payload_marks_base64_false() {
        let message = Message::from_text("here is some text");
        assert_eq!(
            serialize(&message),
            "{\"body\":\"here is some text\",\"base64Encoded\":false},"
        );
    }

    #[test]
    fn test_serialize_text_payload_escapes_json() {
        let message = Message::from_text("a\"b\\c\nd");
        assert_eq!(
            serialize(&message),
            "{\"body\":\"a\\\"b\\\\c\\nd\",\"base64Encoded\":false},"
        );
    }

    #[test]
    fn test_serialize_properties_carry_app_prefix() {
        let message = Message::from_bytes(b"123456".to_vec()).with_property("redkey", "redvalue");
        assert_eq!(
            serialize(&message),
            "{\"body\":\"MTIzNDU2\",\"properties\":{\"iothub-app-redkey\":\"redvalue\"}},"
        );
    }

    #[test]
    fn test_size_contribution_accounting() {
        let message = Message::from_bytes(b"123456".to_vec())
            .with_property("redkey", "redvalue")
            .with_property("k", "v");
        // payload 6 + overhead 384 + (6+8+16) + (1+1+16)
        assert_eq!(serialize_item(&message).1, 6 + 384 + 30 + 18);
        assert_eq!(message_size(&message), 6 + 384 + 30 + 18);
    }

    #[test]
    fn test_two_message_batch_fixture() {
        let queue = send_queue();
        queue.lock().push_back(QueuedMessage::new(
            Message::from_bytes(b"123456".to_vec()).with_property("redkey", "redvalue"),
        ));
        queue.lock().push_back(QueuedMessage::new(
            Message::from_bytes(b"1234567".to_vec())
                .with_property("bluekey", "bluevalue")
                .with_property("yellowkey", "yellowvaluekey"),
        ));

        match build_batch(&queue) {
            BatchOutcome::Payload { body, in_flight } => {
                assert_eq!(
                    body,
                    "[{\"body\":\"MTIzNDU2\",\"properties\":{\"iothub-app-redkey\":\"redvalue\"}},\
                     {\"body\":\"MTIzNDU2Nw==\",\"properties\":{\"iothub-app-bluekey\":\"bluevalue\",\
                     \"iothub-app-yellowkey\":\"yellowvaluekey\"}}]"
                );
                assert_eq!(in_flight.len(), 2);
                assert!(queue.lock().is_empty());
            }
            _ => panic!("expected a payload"),
        }
    }

    #[test]
    fn test_first_item_over_limit_is_removed_without_payload() {
        let queue = send_queue();
        queue.lock().push_back(QueuedMessage::new(Message::from_bytes(vec![
            0u8;
            wire::MAXIMUM_MESSAGE_SIZE
        ])));
        queue
            .lock()
            .push_back(QueuedMessage::new(Message::from_bytes(b"ok".to_vec())));

        match build_batch(&queue) {
            BatchOutcome::FirstItemTooLarge(failed) => {
                assert_eq!(failed.message.body().len(), wire::MAXIMUM_MESSAGE_SIZE);
                // the rest of the queue is untouched this cycle
                assert_eq!(queue.lock().len(), 1);
            }
            _ => panic!("expected the head to be failed"),
        }
    }

    #[test]
    fn test_later_oversize_item_is_deferred_not_failed() {
        let queue = send_queue();
        queue
            .lock()
            .push_back(QueuedMessage::new(Message::from_bytes(b"first".to_vec())));
        queue.lock().push_back(QueuedMessage::new(Message::from_bytes(vec![
            0u8;
            wire::MAXIMUM_MESSAGE_SIZE
        ])));

        match build_batch(&queue) {
            BatchOutcome::Payload { in_flight, .. } => {
                assert_eq!(in_flight.len(), 1);
                assert_eq!(queue.lock().len(), 1); // oversize item still queued
            }
            _ => panic!("expected the first item to ship"),
        }
    }

    #[test]
    fn test_cumulative_budget_stops_the_batch() {
        // two messages that fit individually but not together
        let half = wire::MAXIMUM_MESSAGE_SIZE / 2;
        let queue = send_queue();
        queue
            .lock()
            .push_back(QueuedMessage::new(Message::from_bytes(vec![0u8; half])));
        queue
            .lock()
            .push_back(QueuedMessage::new(Message::from_bytes(vec![0u8; half])));

        match build_batch(&queue) {
            BatchOutcome::Payload { in_flight, .. } => {
                assert_eq!(in_flight.len(), 1);
                assert_eq!(queue.lock().len(), 1);
            }
            _ => panic!("expected a single-item payload"),
        }
    }

    #[test]
    fn test_empty_queue_yields_no_items() {
        assert!(matches!(build_batch(&send_queue()), BatchOutcome::NoItems));
    }

    #[test]
    fn test_restore_front_preserves_order() {
        let queue = send_queue();
        queue
            .lock()
            .push_back(QueuedMessage::new(Message::from_text("third")));

        restore_front(
            &queue,
            vec![
                QueuedMessage::new(Message::from_text("first")),
                QueuedMessage::new(Message::from_text("second")),
            ],
        );

        let order: Vec<String> = queue
            .lock()
            .iter()
            .map(|entry| match entry.message.body() {
                MessageBody::Text(text) => text.clone(),
                MessageBody::Bytes(_) => unreachable!(),
            })
            .collect();
        assert_eq!(order, vec!["first", "second", "third"]);
    }
}
