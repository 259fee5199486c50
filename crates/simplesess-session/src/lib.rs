//! Partitionable server-side sessions.
//!
//! This crate provides the session lifecycle and storage engine:
//! - Unguessable session ids carried by the client as `id||expires||refresh`
//! - Amortized expiration writes (the marker is only rewritten past the
//!   refresh variant)
//! - Dirty tracking, so untouched sessions never write
//! - One session per namespace per scope via [`SessionRegistry`]
//! - Batch garbage collection of expired record pairs
//!
//! # Example
//!
//! ```rust,ignore
//! use simplesess_session::{CookieTransport, MemoryStore, SessionConfig, SessionRegistry};
//!
//! let config = SessionConfig::default();
//! let transport = Arc::new(CookieTransport::from_header(cookie_header, config.cookie.clone()));
//! let registry = SessionRegistry::new(store, transport.clone(), config)?;
//!
//! let cart = registry.factory("cart")?;
//! cart.lock().set("items", 3);
//! registry.close()?;
//! // send transport.set_cookie_headers() with the response
//! ```

mod config;
mod error;
mod gc;
mod keys;
mod registry;
mod scheduler;
mod session;
mod store;
mod token;
mod wire;

pub use config::{DEFAULT_EXPIRATION, DEFAULT_REFRESH_VARIANT, SessionConfig};
pub use error::{Error, Result};
pub use gc::{CollectionReport, ExpiredSession, GarbageCollector, GcEvent, marker_timestamp};
pub use keys::{DATA_PREFIX, MARKER_PREFIX, RecordKey, RecordKind, validate_namespace};
pub use registry::{SessionHandle, SessionRegistry};
pub use scheduler::{DEFAULT_GC_INTERVAL, GcScheduler};
pub use session::Session;
pub use store::{MemoryStore, OpCounts, RecordStore};
pub use token::generate_id;
pub use wire::{CookieOptions, CookieTransport, MemoryTransport, SessionToken, TokenTransport};

