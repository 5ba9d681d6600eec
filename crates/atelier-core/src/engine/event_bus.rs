//! Event bus for broadcasting committed state changes.
//!
//! Built on a tokio broadcast channel. Publishing never blocks and never
//! fails the operation that published: with no subscribers the event is
//! dropped, and a subscriber that falls behind loses the oldest events.

use atelier_types::AtelierEvent;
use tokio::sync::broadcast;

/// Event bus shared by every core component.
#[derive(Clone)]
pub struct EventBus {
	sender: broadcast::Sender<AtelierEvent>,
}

impl EventBus {
	/// Creates a new event bus that buffers up to `capacity` events per subscriber.
	pub fn new(capacity: usize) -> Self {
		let (sender, _) = broadcast::channel(capacity.max(1));
		Self { sender }
	}

	/// Subscribes to every event published from now on.
	pub fn subscribe(&self) -> broadcast::Receiver<AtelierEvent> {
		self.sender.subscribe()
	}

	/// Publishes an event to all current subscribers.
	pub fn publish(&self, event: AtelierEvent) {
		if self.sender.send(event).is_err() {
			tracing::trace!("No subscribers for event");
		}
	}
}

impl Default for EventBus {
	fn default() -> Self {
		Self::new(1000)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use atelier_types::ProductionEvent;

	#[tokio::test]
	async fn test_subscribers_receive_events() {
		let bus = EventBus::new(8);
		let mut first = bus.subscribe();
		let mut second = bus.subscribe();

		bus.publish(AtelierEvent::Production(ProductionEvent::Cancelled {
			queue_item_id: "pq-1".into(),
		}));

		for receiver in [&mut first, &mut second] {
			match receiver.recv().await.unwrap() {
				AtelierEvent::Production(ProductionEvent::Cancelled { queue_item_id }) => {
					assert_eq!(queue_item_id, "pq-1")
				},
				other => panic!("unexpected event {:?}", other),
			}
		}
	}

	#[test]
	fn test_publish_without_subscribers_is_silent() {
		let bus = EventBus::new(1);
		bus.publish(AtelierEvent::Production(ProductionEvent::Cancelled {
			queue_item_id: "pq-1".into(),
		}));
	}
}
