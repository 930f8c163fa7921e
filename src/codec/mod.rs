//! Compression and authenticated encryption for backup artifacts.
//!
//! Artifacts are gzip-compressed on staging storage and encrypted with
//! AES-256-GCM just before they leave the machine.

pub mod compression;
pub mod encryption;

pub use compression::{compress, decompress};
pub use encryption::{decrypt, encrypt, BackupKey};
