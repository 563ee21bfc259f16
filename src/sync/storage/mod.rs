//-
// Copyright (c) 2024, Jason Lingle
//
// This file is part of Mailsync.
//
// Mailsync is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published  by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Mailsync is distributed  in the hope that it will  be useful, but WITHOUT
// ANY WARRANTY; without even the  implied warranty of MERCHANTABILITY or
// FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public License for
// more details.
//
// You should have received a copy of the GNU General Public License along
// with Mailsync. If not, see <http://www.gnu.org/licenses/>.

//! The storage layer for the sync core.
//!
//! The storage layer is stateless (aside from the SQLite connection itself)
//! and provides the fundamental building blocks used to implement the state
//! layer. The general guidelines are:
//!
//! 1. Every operation is atomic unless otherwise noted.
//! 2. The concept of a database transaction does not escape the storage
//!    layer. In particular, a mutation apply and its task-log append happen
//!    inside one transaction here, so the state layer can never observe (or
//!    leave behind) a half-written pair.

mod syncdb;
mod types;

pub use syncdb::{Connection as SyncDb, RevertOutcome};
pub use types::{Folder, Message, Task, UnixTimestamp};
