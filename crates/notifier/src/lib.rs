//! Notification delivery for account-disable events.
//!
//! Records enter through the [`dispatcher::Dispatcher`] inbound queue and are
//! delivered to every enabled channel (Teams webhook, SMTP email) by one
//! rate-limited [`worker::ChannelWorker`] per channel.

pub mod context;
pub mod dispatcher;
pub mod email;
pub mod error;
pub mod monitor;
pub mod queue;
pub mod render;
pub mod result;
pub mod retry;
pub mod scheduler;
pub mod sender;
pub mod smtp;
pub mod stats;
pub mod teams;
pub mod timeout;
pub mod worker;
