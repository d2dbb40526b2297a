//! # Firkin Core
//!
//! An embedded, single-process, log-structured key-value engine built on
//! the bitcask model:
//!
//! - writes append to sequential segment files
//! - a fully in-memory skip list maps keys to record locations
//! - TTL expiry is enforced lazily on read
//! - explicit compaction (`rewrite`) reclaims space from dead records
//!
//! The index is rebuilt on open by replaying every segment in ascending
//! id order, so segment files carry no trailer or embedded index.
//!
//! ## Example
//!
//! ```no_run
//! use firkin_core::{Config, Engine};
//!
//! let engine = Engine::open(Config::new("./data")).unwrap();
//! engine.set(b"cask", b"9 gallons").unwrap();
//! engine.expire(b"cask", 3600).unwrap();
//! assert_eq!(engine.get(b"cask").unwrap(), b"9 gallons");
//! engine.close().unwrap();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
mod compaction;
mod engine;
pub mod error;
pub mod expiry;
pub mod index;
pub mod segment;

pub use config::{Config, IndexMode};
pub use engine::Engine;
pub use error::{CoreError, CoreResult};
pub use firkin_storage::IoMode;
