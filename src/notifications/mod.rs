//! Notifications: the shared feed, the REST poller and the realtime channel.

pub mod channel;
pub mod feed;
pub mod machine;
pub mod messages;
pub mod poller;

pub use channel::{ChannelEvent, RealtimeChannel};
pub use feed::{FeedState, NotificationFeed};
pub use machine::{ChannelMachine, ConnectionState, Effect, Input};
pub use messages::{parse_inbound, InboundMessage};
pub use poller::NotificationPoller;
