pub mod bridge;
pub mod error;
pub mod manager;
pub mod types;

pub use bridge::ChannelBridge;
pub use error::{ChannelError, Result};
pub use manager::ChannelManager;
pub use types::{ChannelStatus, InboundMessage, MessageFormat, OutboundMessage, Subscription, SubscriptionFile};
