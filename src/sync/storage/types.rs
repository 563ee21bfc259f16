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

//! Bindings for our model types to `rusqlite`, plus the row types specific
//! to the database itself.

use std::str::FromStr;

use chrono::prelude::*;
use rusqlite::types::{
    FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef,
};

use crate::sync::model::*;

macro_rules! transparent_to_sql {
    ($t:ident) => {
        impl ToSql for $t {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                self.0.to_sql()
            }
        }
    };
}

macro_rules! transparent_from_sql {
    ($t:ident) => {
        impl FromSql for $t {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                FromSql::column_result(value).map(Self)
            }
        }
    };
}

transparent_to_sql!(FolderId);
transparent_from_sql!(FolderId);

transparent_to_sql!(MessageId);
transparent_from_sql!(MessageId);

transparent_to_sql!(Seqno);
transparent_from_sql!(Seqno);

transparent_to_sql!(FlagSet);
transparent_from_sql!(FlagSet);

/// A timestamp stored in the database as integral Unix seconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct UnixTimestamp(pub DateTime<Utc>);

impl UnixTimestamp {
    pub fn now() -> Self {
        Self(Utc::now())
    }
}

impl ToSql for UnixTimestamp {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        let ToSqlOutput::Owned(v) = self.0.timestamp().to_sql()? else {
            unreachable!()
        };
        Ok(ToSqlOutput::Owned(v))
    }
}

impl FromSql for UnixTimestamp {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let inner = i64::column_result(value)?;
        DateTime::<Utc>::from_timestamp(inner, 0)
            .ok_or(FromSqlError::OutOfRange(inner))
            .map(Self)
    }
}

impl ToSql for Uid {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        let ToSqlOutput::Owned(v) = self.0.get().to_sql()? else {
            unreachable!()
        };
        Ok(ToSqlOutput::Owned(v))
    }
}

impl FromSql for Uid {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let inner = u32::column_result(value)?;
        Self::of(inner).ok_or(FromSqlError::OutOfRange(inner as i64))
    }
}

impl ToSql for SyncStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::Borrowed(ValueRef::Text(
            self.as_str().as_bytes(),
        )))
    }
}

impl FromSql for SyncStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let ValueRef::Text(as_str) = value else {
            return Err(FromSqlError::InvalidType);
        };
        let Ok(as_str) = std::str::from_utf8(as_str) else {
            return Err(FromSqlError::InvalidType);
        };
        Self::from_str(as_str).map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

impl ToSql for TaskType {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::Borrowed(ValueRef::Text(
            self.as_str().as_bytes(),
        )))
    }
}

impl FromSql for TaskType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let ValueRef::Text(as_str) = value else {
            return Err(FromSqlError::InvalidType);
        };
        let Ok(as_str) = std::str::from_utf8(as_str) else {
            return Err(FromSqlError::InvalidType);
        };
        Self::from_str(as_str).map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

/// All data pertaining to a particular folder.
#[derive(Debug, Clone)]
pub struct Folder {
    pub id: FolderId,
    pub parent_id: FolderId,
    pub name: String,
    /// The full `/`-delimited path, which is also the folder's identity on
    /// the remote mailbox.
    pub path: String,
    pub status: SyncStatus,
    pub last_synced: Option<UnixTimestamp>,
    /// Set when the folder disappears from the upstream listing. Folders
    /// are never hard-deleted while the mailbox exists.
    pub removed: bool,
}

impl FromRow for Folder {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            parent_id: row.get("parent_id")?,
            name: row.get("name")?,
            path: row.get("path")?,
            status: row.get("status")?,
            last_synced: row.get("last_synced")?,
            removed: row.get("removed")?,
        })
    }
}

/// All data pertaining to a single message.
#[derive(Debug, Clone)]
pub struct Message {
    pub id: MessageId,
    pub folder_id: FolderId,
    pub uid: Uid,
    pub flags: FlagSet,
    /// Opaque reference to the message content; this core never looks
    /// inside it.
    pub content_ref: String,
    /// Set when the message is expunged from the active set. The row stays
    /// so that its task history remains meaningful.
    pub purged: bool,
}

impl FromRow for Message {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            folder_id: row.get("folder_id")?,
            uid: row.get("uid")?,
            flags: row.get("flags")?,
            content_ref: row.get("content_ref")?,
            purged: row.get("purged")?,
        })
    }
}

/// One record of the append-only task log.
///
/// Created atomically with its mutation's application; mutated exactly once
/// afterwards (the `reverted` flip); never deleted.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub seqno: Seqno,
    pub task_type: TaskType,
    pub message_id: MessageId,
    pub folder_id: FolderId,
    /// The field value immediately preceding this task's apply. This is
    /// what makes the task reversible using only apply-time data.
    pub old_value: bool,
    pub new_value: bool,
    pub applied_at: UnixTimestamp,
    pub reverted: bool,
}

impl FromRow for Task {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            seqno: row.get("seqno")?,
            task_type: row.get("task_type")?,
            message_id: row.get("message_id")?,
            folder_id: row.get("folder_id")?,
            old_value: row.get("old_value")?,
            new_value: row.get("new_value")?,
            applied_at: row.get("applied_at")?,
            reverted: row.get("reverted")?,
        })
    }
}

pub fn from_row<T: FromRow>(row: &rusqlite::Row<'_>) -> rusqlite::Result<T> {
    T::from_row(row)
}

pub fn from_single<T: FromSql>(row: &rusqlite::Row<'_>) -> rusqlite::Result<T> {
    row.get(0)
}

pub trait FromRow: Sized {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self>;
}

macro_rules! from_row_tuple {
    ($($ix:tt: $t:ident),*) => {
        impl<$($t: FromSql,)*> FromRow
        for ($($t,)*) {
            fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
                Ok(($(row.get($ix)?,)*))
            }
        }
    }
}

from_row_tuple!(0: A);
from_row_tuple!(0: A, 1: B);
from_row_tuple!(0: A, 1: B, 2: C);
from_row_tuple!(0: A, 1: B, 2: C, 3: D);
