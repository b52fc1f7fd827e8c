// Messaging - ring-buffer channels and diagnostics notifications

pub mod channels;
pub mod notification;

pub use channels::{
    FrameConsumer, FrameProducer, NotificationConsumer, NotificationProducer, SharedNotifier,
    create_frame_channel, create_notification_channel, notify,
};
pub use notification::{Notification, NotificationCategory, NotificationLevel};
