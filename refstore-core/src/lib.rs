// Copyright © 2022 The Radicle Team
//
// This file is part of refstore, distributed under the terms of the GNU
// General Public License v3.0 or later. See the included LICENSE file.

//! Core types shared by every reference-store backend: validated ref names,
//! the object identifier, the reflog line codec, the transaction object,
//! the backend-agnostic symref resolver, and the [`backend::Backend`]
//! contract itself.
//!
//! Backends ([`refstore-files`], [`refstore-kv`]) and the coordinator
//! ([`refstore`]) are downstream crates built against the types here.

pub mod backend;
pub mod error;
pub mod kind;
pub mod name;
pub mod oid;
pub mod reflog;
pub mod resolve;
pub mod transaction;

pub use backend::{Backend, RawRef, RawValue};
pub use error::{Error, Result, Warning};
pub use kind::{classify, Kind};
pub use name::{RefStr, RefString};
pub use oid::Oid;
pub use resolve::{resolve, Resolved, MAX_DEPTH};
pub use transaction::{Flags, ResolveFlags, State, Transaction, Update};
