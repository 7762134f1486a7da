use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt as _};
use tracing::trace;

const CHANNEL_CAPACITY: usize = 1024;

/// One event delivered to a subscriber: the name it was published under plus
/// the typed payload.
#[derive(Debug, Clone)]
pub struct Event<T> {
    pub name: &'static str,
    pub data: T,
}

/// A single named broadcast channel carrying pre-serialized JSON. Payloads
/// are stored as `serde_json::Value` internally so any number of typed
/// subscribers can deserialize independently without the bus itself being
/// generic over every event's type.
struct Channel {
    sender: broadcast::Sender<Arc<serde_json::Value>>,
}

static BUS: Lazy<Mutex<HashMap<&'static str, Channel>>> = Lazy::new(|| Mutex::new(HashMap::new()));

fn channel_for(name: &'static str) -> broadcast::Sender<Arc<serde_json::Value>> {
    let mut bus = BUS.lock();
    let entry = bus.entry(name).or_insert_with(|| Channel {
        sender: broadcast::channel(CHANNEL_CAPACITY).0,
    });
    entry.sender.clone()
}

/// Publishes `payload` under `name`. Serialization happens eagerly so that
/// publishing never blocks on a slow subscriber and subscribers that joined
/// after publication simply never see the event (matches a best-effort
/// pub/sub bus, not a durable queue).
pub fn send_event<T: Serialize>(name: &'static str, payload: T) -> anyhow::Result<()> {
    let value = serde_json::to_value(payload)?;
    let sender = channel_for(name);
    // No active receivers is not an error: events fired before any listener
    // subscribes are simply dropped, same as a typical pub/sub bus.
    let _ = sender.send(Arc::new(value));
    trace!(event = name, "published event");
    Ok(())
}

/// A typed stream of events published under `name`. Each item is `Ok(T)` when
/// the payload deserializes cleanly, or `Err` when a publisher and a
/// subscriber disagree on shape, or when this subscriber lagged behind the
/// broadcast channel and missed events.
pub fn subscribe_to_event<T>(name: &'static str) -> impl Stream<Item = Event<T>>
where
    T: DeserializeOwned + Send + 'static,
{
    let sender = channel_for(name);
    let receiver = sender.subscribe();
    BroadcastStream::new(receiver).filter_map(move |item| match item {
        Ok(value) => match serde_json::from_value::<T>((*value).clone()) {
            Ok(data) => Some(Event { name, data }),
            Err(err) => {
                trace!(event = name, error = %err, "dropping event with mismatched shape");
                None
            }
        },
        Err(BroadcastStreamRecvError::Lagged(n)) => {
            trace!(event = name, skipped = n, "subscriber lagged, skipping events");
            None
        }
    })
}

/// Type-erased handle kept only so tests can assert on subscriber counts
/// without caring about payload shape.
pub fn subscriber_count(name: &'static str) -> usize {
    channel_for(name).receiver_count()
}

// Re-exported so downstream crates that want to accept "any JSON-serializable
// event" without committing to a concrete type can bound on it.
pub trait EventPayload: Any + Serialize + Send + Sync + 'static {}
impl<T: Any + Serialize + Send + Sync + 'static> EventPayload for T {}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Payload {
        value: i32,
    }

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let mut stream = subscribe_to_event::<Payload>("test_event_a");
        send_event("test_event_a", Payload { value: 7 }).unwrap();
        let event = tokio::time::timeout(std::time::Duration::from_millis(200), stream.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.data, Payload { value: 7 });
    }

    #[tokio::test]
    async fn events_before_subscription_are_not_delivered() {
        send_event("test_event_b", Payload { value: 1 }).unwrap();
        let mut stream = subscribe_to_event::<Payload>("test_event_b");
        send_event("test_event_b", Payload { value: 2 }).unwrap();
        let event = tokio::time::timeout(std::time::Duration::from_millis(200), stream.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.data, Payload { value: 2 });
    }
}
