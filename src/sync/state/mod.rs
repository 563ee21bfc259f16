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

//! The stateful engine API over the storage layer. This is what the driver
//! loop, the operator control surface, and front-ends talk to.
//!
//! This module tree should be thought of as one module: the main type is
//! `SyncEngine`, whose implementation is split across multiple files for
//! manageability.

mod apply;
mod defs;
mod drive;
mod rollback;

pub use defs::SyncEngine;
