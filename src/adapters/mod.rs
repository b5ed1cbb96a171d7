//! Adapters module - chat platform integrations.
//!
//! An adapter turns platform input into [`InboundMessage`]s on the bus and
//! delivers the [`OutboundMessage`]s published for its channel. Each adapter
//! implements the [`Channel`] trait for uniform handling.
//!
//! # Supported Channels
//!
//! - **CLI** - Interactive command line interface
//!
//! # Adding a New Channel
//!
//! 1. Create a new file (e.g., `telegram.rs`)
//! 2. Implement the [`Channel`] trait, sending on the bus with the channel
//!    name as topic and subscribing to outbound messages for it
//!
//! [`InboundMessage`]: crate::bus::InboundMessage
//! [`OutboundMessage`]: crate::bus::OutboundMessage

pub mod cli;

pub use cli::CliChannel;

/// Channel trait for chat adapters.
///
/// All channel implementations must be [`Send`] + [`Sync`] for async compatibility.
pub trait Channel: Send + Sync {
    /// Channel name (e.g., "telegram", "cli"); also its bus topic.
    fn name(&self) -> &str;

    /// Run until the input ends or the channel is stopped.
    fn start(&self) -> impl std::future::Future<Output = crate::Result<()>> + Send;

    /// Stop the channel.
    fn stop(&self) -> impl std::future::Future<Output = crate::Result<()>> + Send;
}
