//! Telemetry synchronization engine for live simulation data.
//!
//! Simsync reconciles a simulation's asynchronous, multi-rate telemetry
//! channels into a consistent, bounded-staleness state over a persistent
//! socket connection.
//!
//! # Features
//!
//! - **Provenance**: every channel value is tagged with the simulation
//!   instant it was produced at, not when it arrived
//! - **Skew-bounded reads**: multi-channel snapshots fail closed unless the
//!   channels agree within an explicit skew budget
//! - **Entity lifecycle from recency**: added/updated/expired derived from
//!   last-seen instants, no explicit deletion events required
//! - **Transport anomaly detection**: reorders, gaps, frame jumps and
//!   stale channels surface as observational issues
//! - **Declarative sanitization**: known producer defects corrected by a
//!   swappable rule registry before state is exposed
//!
//! # Quick start
//!
//! ```rust,no_run
//! use simsync::{Simsync, SyncConfig};
//!
//! #[tokio::main]
//! async fn main() -> simsync::Result<()> {
//!     let conn = Simsync::connect("127.0.0.1:7777", SyncConfig::default()).await?;
//!
//!     // Consistent multi-channel read with a 2-tick skew budget.
//!     match conn.snapshot(&["POSITIONS", "ENEMIES"], 2) {
//!         Ok(state) => println!("synchronized: {} channels", state.len()),
//!         Err(e) if e.is_query_outcome() => println!("not synchronized yet"),
//!         Err(e) => return Err(e),
//!     }
//!     Ok(())
//! }
//! ```

// Core types and error handling
mod error;
pub mod config;
pub mod types;

// Ingestion pipeline
pub mod codec;
pub mod engine;
pub mod monitor;
pub mod sanitize;
pub mod store;
pub mod tracker;

// Transport plumbing
pub mod connection;
pub mod driver;
pub mod source;
pub mod sources;

// Core exports
pub use config::{EntityKindConfig, SyncConfig, TimingConfig};
pub use engine::{Entity, SyncEngine};
pub use error::{Result, SyncError};
pub use sanitize::{ChannelMatch, Rule, RuleOrigin, RuleSet};
pub use store::{ChannelState, ChannelStore};
pub use tracker::{EntityDiff, EntityTracker, TrackedEntity, TrackerConfig};
pub use types::{
    ChannelUpdate, Command, Envelope, EnvelopeKind, Issue, IssueKind, PROTOCOL_VERSION, RateClass,
    Severity,
};

// Transport exports
pub use connection::SyncConnection;
pub use driver::{Driver, DriverChannels};
pub use source::Source;
pub use sources::{ScriptSource, SocketSource};

/// Unified entry point for synchronization connections.
///
/// # Examples
///
/// ## Live producer
/// ```rust,no_run
/// use simsync::{Simsync, SyncConfig};
///
/// #[tokio::main]
/// async fn main() -> simsync::Result<()> {
///     let conn = Simsync::connect("127.0.0.1:7777", SyncConfig::default()).await?;
///     let _ = conn.is_channel_fresh("POSITIONS", 2);
///     Ok(())
/// }
/// ```
///
/// ## Scripted replay
/// ```rust
/// use simsync::{ScriptSource, Simsync, SyncConfig};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let source = ScriptSource::from_lines(Vec::new());
/// let conn = Simsync::replay(source, SyncConfig::default());
/// # drop(conn);
/// # }
/// ```
pub struct Simsync;

impl Simsync {
    /// Connect to a live telemetry producer over TCP.
    pub async fn connect<A>(addr: A, config: SyncConfig) -> Result<SyncConnection>
    where
        A: tokio::net::ToSocketAddrs + std::fmt::Display,
    {
        SyncConnection::connect(addr, config).await
    }

    /// Drive a connection from a scripted envelope stream.
    ///
    /// Replay behaves identically to a live connection, including issue
    /// reporting and the full read API.
    pub fn replay(source: ScriptSource, config: SyncConfig) -> SyncConnection {
        SyncConnection::scripted(source, config)
    }
}
