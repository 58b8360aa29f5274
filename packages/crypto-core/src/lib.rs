#![forbid(unsafe_code)]
//! Cryptographic key-lifecycle and operation-dispatch core: a locked key
//! slot table, a wildcard-aware policy algebra, and per-family multi-part
//! operation state machines over pluggable provider, storage, and entropy
//! collaborators.

pub mod adapters;
pub mod aead;
pub mod agreement;
pub mod algorithm;
pub mod cipher;
pub mod core;
pub mod derivation;
pub mod error;
pub mod hash_ops;
mod lifecycle;
pub mod mac;
pub mod pake;
pub mod policy;
pub mod provider;
mod sign;
mod slots;
pub mod software;
mod storage;
pub mod types;

pub use adapters::*;
pub use aead::*;
pub use agreement::*;
pub use algorithm::*;
pub use cipher::*;
pub use core::*;
pub use derivation::*;
pub use error::*;
pub use hash_ops::*;
pub use mac::*;
pub use pake::*;
pub use provider::*;
pub use software::*;
pub use types::*;
