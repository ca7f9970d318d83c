//! The rustyre node runtime.
//!
//! A node broadcasts UDP beacons, discovers other nodes announcing the same
//! protocol, connects to each one over framed TCP, and exchanges presence,
//! group membership, and application messages. All node state lives on a
//! single event-loop task; the owner talks to it through the [`Node`] handle.
//!
//! ```no_run
//! # async fn example() -> Result<(), rustyre_node::NodeError> {
//! use rustyre_node::{Event, Node, NodeConfig};
//!
//! let mut node = Node::new(NodeConfig::default()).await?;
//! node.join("chat").await?;
//! while let Some(event) = node.recv().await {
//!     if let Event::Shout { peer, content, .. } = event {
//!         println!("{peer}: {}", String::from_utf8_lossy(&content));
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod groups;
pub mod logging;
pub mod node;
pub mod peer;

pub use config::NodeConfig;
pub use error::NodeError;
pub use event::Event;
pub use node::Node;
