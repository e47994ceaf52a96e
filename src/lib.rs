//! Nine Scrolls: a universal hierarchical data store.
//!
//! Every datum is a self-describing [`Scroll`] addressed by a path and
//! reached through exactly five operations — read, write, list, watch,
//! close — defined once by the [`Namespace`] trait. Everything else is an
//! implementation of that interface or a layer on top of it:
//!
//! - [`MemoryNamespace`] — the in-RAM baseline.
//! - [`FileNamespace`] — one JSON file per scroll under a root directory.
//! - [`Kernel`] — a mount table routing by longest prefix with path
//!   rewriting in both directions.
//! - [`Store`] — versioned history (RFC 6902 patches, anchors, time
//!   travel) and optional AES-256-GCM encryption at rest over any backend.
//! - [`NetworkNamespace`] — the same five operations across a newline-
//!   framed JSON wire protocol, with server-pushed watch events.
//!
//! Scrolls can also leave the system entirely as [`SealedScroll`]
//! envelopes: password-sealed, URI-encodable blobs third parties can
//! carry and open independently.

pub mod anchor;
pub mod canonical;
pub mod clock;
pub mod config;
pub mod error;
pub mod file;
pub mod kernel;
pub mod memory;
pub mod namespace;
pub mod patch;
pub mod path;
pub mod scroll;
pub mod sealed;
pub mod store;
pub mod watch;
pub mod wire;

pub use anchor::Anchor;
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::Config;
pub use error::{NineError, NineResult};
pub use file::FileNamespace;
pub use kernel::Kernel;
pub use memory::MemoryNamespace;
pub use namespace::{Namespace, WatchStream};
pub use patch::{Patch, PatchError, PatchOp};
pub use scroll::{Metadata, Scroll, Tense};
pub use sealed::{seal, unseal, SealError, SealedScroll};
pub use store::{derive_app_key, Store, StoreConfig};
pub use wire::{ClientConfig, NetworkNamespace};
