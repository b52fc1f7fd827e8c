// Bounded lock-free channels

use crate::bus::transport::Frame;
use crate::messaging::notification::Notification;
use ringbuf::traits::{Producer, Split};
use ringbuf::HeapRb;
use std::sync::{Arc, Mutex, PoisonError};

pub type FrameProducer = ringbuf::HeapProd<Frame>;
pub type FrameConsumer = ringbuf::HeapCons<Frame>;

/// Outbound frame queue between bus publishers and the session thread
pub fn create_frame_channel(capacity: usize) -> (FrameProducer, FrameConsumer) {
    let rb = HeapRb::<Frame>::new(capacity);
    rb.split()
}

pub type NotificationProducer = ringbuf::HeapProd<Notification>;
pub type NotificationConsumer = ringbuf::HeapCons<Notification>;

pub fn create_notification_channel(
    capacity: usize,
) -> (NotificationProducer, NotificationConsumer) {
    let rb = HeapRb::<Notification>::new(capacity);
    rb.split()
}

/// Notification producer shared by several components
pub type SharedNotifier = Arc<Mutex<NotificationProducer>>;

/// Push a notification, dropping it if the consumer is not keeping up
///
/// Waits for other producers (the critical section is one ring buffer push)
/// but never for the consumer.
pub fn notify(notifier: Option<&SharedNotifier>, notification: Notification) {
    let Some(notifier) = notifier else {
        return;
    };
    let mut tx = notifier.lock().unwrap_or_else(PoisonError::into_inner);
    if tx.try_push(notification).is_err() {
        tracing::trace!("notification channel full, dropping");
    }
}
