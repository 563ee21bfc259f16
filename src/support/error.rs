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

use thiserror::Error;

use crate::sync::model::{Seqno, SyncStatus};

#[derive(Error, Debug)]
pub enum Error {
    #[error("Folder not found")]
    NxFolder,
    #[error("Message not found")]
    NxMessage,
    #[error("Task not found")]
    NxTask,
    #[error("Invalid sync status transition from {0:?}")]
    InvalidTransition(SyncStatus),
    #[error("Unknown sync status: {0}")]
    BadSyncStatus(String),
    #[error("Unknown task type: {0}")]
    BadTaskType(String),
    #[error("Task {0} has already been reverted")]
    TaskAlreadyReverted(Seqno),
    #[error(
        "Reverting task {seqno} conflicts with a later change \
         (current value is {current})"
    )]
    RevertConflict { seqno: Seqno, current: bool },
    #[error("Mailbox unreachable: {0}")]
    Transport(String),
    #[error(transparent)]
    Persistence(#[from] rusqlite::Error),
}
