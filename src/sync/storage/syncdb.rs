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

use std::fmt::Write as _;
use std::path::Path;
use std::time::Duration;

use log::info;
use rusqlite::OptionalExtension as _;

use super::types::*;
use crate::{
    support::{error::Error, folder_paths::parse_folder_path},
    sync::model::*,
};

/// A connection to the `sync.sqlite` database.
pub struct Connection {
    cxn: rusqlite::Connection,
}

/// The result of `revert_task`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RevertOutcome {
    /// The task's old value was written back to the message.
    Reverted,
    /// The message's current value no longer matched the task's new value;
    /// the task was marked reverted, but the message was left untouched.
    Conflict { current: bool },
}

static MIGRATION_V1: &str = include_str!("syncdb.v1.sql");

impl Connection {
    pub fn new(path: &Path) -> Result<Self, Error> {
        let mut cxn = rusqlite::Connection::open(path)?;

        cxn.pragma_update(None, "foreign_keys", true)?;
        cxn.pragma_update(None, "journal_mode", "PERSIST")?;
        cxn.pragma_update(None, "journal_size_limit", 1024 * 1024)?;
        cxn.busy_timeout(Duration::from_secs(10))?;

        {
            let txn = cxn.transaction_with_behavior(
                rusqlite::TransactionBehavior::Exclusive,
            )?;
            txn.execute(
                "CREATE TABLE IF NOT EXISTS `migration` (\
                   `version` INTEGER NOT NULL PRIMARY KEY, \
                   `applied_at` INTEGER NOT NULL\
                 ) STRICT",
                (),
            )?;

            let current_version = txn
                .query_row(
                    "SELECT MAX(`version`) FROM `migration`",
                    (),
                    from_single::<Option<u32>>,
                )?
                .unwrap_or(0);

            if current_version < 1 {
                info!("Applying V1 migration to sync DB");
                txn.execute_batch(MIGRATION_V1)?;
                txn.execute(
                    "INSERT INTO `migration` (`version`, `applied_at`) \
                     VALUES (1, ?)",
                    (UnixTimestamp::now(),),
                )?;
            }

            txn.commit()?;
        }

        Ok(Self { cxn })
    }

    // ==================== FOLDERS ====================

    /// Interns every component of `path`, creating missing folders along
    /// the way, and returns the IDs along the walk (the last entry is the
    /// leaf).
    ///
    /// A folder previously soft-marked removed is revived by this call.
    /// Returns `Error::NxFolder` if `path` has no components.
    pub fn intern_folder_path(
        &mut self,
        path: &str,
    ) -> Result<Vec<FolderId>, Error> {
        let txn = self.cxn.write_tx()?;

        let mut ids = Vec::<FolderId>::new();
        let mut parent = FolderId::ROOT;
        let mut prefix = String::new();
        for part in parse_folder_path(path) {
            if !prefix.is_empty() {
                prefix.push('/');
            }
            prefix.push_str(part);

            let existing = txn
                .prepare_cached(
                    "SELECT `id` FROM `folder` \
                     WHERE `parent_id` = ? AND `name` = ?",
                )?
                .query_row((parent, part), from_single::<FolderId>)
                .optional()?;
            parent = match existing {
                Some(id) => id,
                None => {
                    txn.prepare_cached(
                        "INSERT INTO `folder` (`parent_id`, `name`, `path`) \
                         VALUES (?, ?, ?)",
                    )?
                    .execute((parent, part, &prefix))?;
                    FolderId(txn.last_insert_rowid())
                },
            };
            ids.push(parent);
        }

        if ids.is_empty() {
            return Err(Error::NxFolder);
        }

        txn.execute(
            "UPDATE `folder` SET `removed` = 0 \
             WHERE `id` = ? AND `removed` != 0",
            (*ids.last().unwrap(),),
        )?;

        txn.commit()?;
        Ok(ids)
    }

    /// Interns `path` and returns the leaf folder ID.
    pub fn intern_folder(&mut self, path: &str) -> Result<FolderId, Error> {
        Ok(*self.intern_folder_path(path)?.last().unwrap())
    }

    /// Finds the ID of the folder with the given path, or returns
    /// `Error::NxFolder` if it does not exist.
    pub fn find_folder(&mut self, path: &str) -> Result<FolderId, Error> {
        self.cxn.enable_write(false)?;

        self.cxn
            .query_row(
                "SELECT `id` FROM `folder` WHERE `path` = ? AND `id` != 0",
                (path,),
                from_single,
            )
            .optional()?
            .ok_or(Error::NxFolder)
    }

    /// Fetches the folder with the given ID.
    pub fn fetch_folder(&mut self, id: FolderId) -> Result<Folder, Error> {
        self.cxn.enable_write(false)?;

        self.cxn
            .query_row(
                "SELECT * FROM `folder` WHERE `id` = ? AND `id` != 0",
                (id,),
                Folder::from_row,
            )
            .optional()?
            .ok_or(Error::NxFolder)
    }

    /// Retrieves all folders currently known, excluding the root.
    pub fn fetch_all_folders(&mut self) -> Result<Vec<Folder>, Error> {
        self.cxn.enable_write(false)?;

        self.cxn
            .prepare(
                "SELECT * FROM `folder` WHERE `id` != 0 ORDER BY `path`",
            )?
            .query_map((), from_row)?
            .collect::<Result<Vec<Folder>, _>>()
            .map_err(Into::into)
    }

    /// Stores a new sync status for the folder.
    ///
    /// This only persists the outcome of a state-machine transition; it
    /// never computes one.
    pub fn set_folder_status(
        &mut self,
        id: FolderId,
        status: SyncStatus,
    ) -> Result<(), Error> {
        self.cxn.enable_write(true)?;

        if 0 == self.cxn.execute(
            "UPDATE `folder` SET `status` = ? WHERE `id` = ? AND `id` != 0",
            (status, id),
        )? {
            return Err(Error::NxFolder);
        }

        Ok(())
    }

    /// Marks the folder `Synced` and stamps `last_synced` in one write.
    pub fn mark_folder_synced(
        &mut self,
        id: FolderId,
        when: UnixTimestamp,
    ) -> Result<(), Error> {
        self.cxn.enable_write(true)?;

        if 0 == self.cxn.execute(
            "UPDATE `folder` SET `status` = ?, `last_synced` = ? \
             WHERE `id` = ? AND `id` != 0",
            (SyncStatus::Synced, when, id),
        )? {
            return Err(Error::NxFolder);
        }

        Ok(())
    }

    /// Soft-marks every folder not in `keep` as removed, returning the
    /// number of folders so marked.
    ///
    /// `keep` must contain every folder on a kept path, ancestors included,
    /// i.e. the accumulated output of `intern_folder_path`.
    pub fn mark_folders_removed_except(
        &mut self,
        keep: &[FolderId],
    ) -> Result<u32, Error> {
        let mut sql = "UPDATE `folder` SET `removed` = 1 \
                       WHERE `removed` = 0 AND `id` != 0"
            .to_owned();
        if !keep.is_empty() {
            sql.push_str(" AND `id` NOT IN (");
            for (ix, id) in keep.iter().enumerate() {
                if ix > 0 {
                    sql.push(',');
                }
                let _ = write!(sql, "{}", id.0);
            }
            sql.push(')');
        }

        self.cxn.enable_write(true)?;
        let marked = self.cxn.execute(&sql, ())?;
        Ok(marked as u32)
    }

    // ==================== MESSAGES ====================

    /// Interns the message identified by `(folder_id, uid)`, creating it
    /// with the given flags and content reference if it is not yet known.
    ///
    /// An already-known message is left untouched; flag changes only ever
    /// arrive through the apply path.
    pub fn intern_message(
        &mut self,
        folder_id: FolderId,
        uid: Uid,
        flags: FlagSet,
        content_ref: &str,
    ) -> Result<MessageId, Error> {
        let txn = self.cxn.write_tx()?;

        let existing = txn
            .prepare_cached(
                "SELECT `id` FROM `message` \
                 WHERE `folder_id` = ? AND `uid` = ?",
            )?
            .query_row((folder_id, uid), from_single::<MessageId>)
            .optional()?;
        let id = match existing {
            Some(id) => id,
            None => {
                txn.prepare_cached(
                    "INSERT INTO `message` \
                     (`folder_id`, `uid`, `flags`, `content_ref`) \
                     VALUES (?, ?, ?, ?)",
                )?
                .execute((folder_id, uid, flags, content_ref))?;
                MessageId(txn.last_insert_rowid())
            },
        };

        txn.commit()?;
        Ok(id)
    }

    /// Finds the ID of the non-purged message with the given UID in the
    /// given folder.
    pub fn find_message(
        &mut self,
        folder_id: FolderId,
        uid: Uid,
    ) -> Result<MessageId, Error> {
        self.cxn.enable_write(false)?;

        self.cxn
            .prepare_cached(
                "SELECT `id` FROM `message` \
                 WHERE `folder_id` = ? AND `uid` = ? AND `purged` = 0",
            )?
            .query_row((folder_id, uid), from_single)
            .optional()?
            .ok_or(Error::NxMessage)
    }

    /// Fetches the message with the given ID, purged or not.
    pub fn fetch_message(&mut self, id: MessageId) -> Result<Message, Error> {
        self.cxn.enable_write(false)?;

        self.cxn
            .query_row(
                "SELECT * FROM `message` WHERE `id` = ?",
                (id,),
                Message::from_row,
            )
            .optional()?
            .ok_or(Error::NxMessage)
    }

    /// Removes the message from the active set.
    ///
    /// The row itself stays so that the task history referencing it remains
    /// meaningful.
    pub fn purge_message(&mut self, id: MessageId) -> Result<(), Error> {
        self.cxn.enable_write(true)?;

        if 0 == self.cxn.execute(
            "UPDATE `message` SET `purged` = 1 WHERE `id` = ?",
            (id,),
        )? {
            return Err(Error::NxMessage);
        }

        Ok(())
    }

    /// Overwrites a message's flag bitset directly, bypassing the applier
    /// and the task log. Models an external writer for conflict tests.
    #[cfg(test)]
    pub fn force_message_flags(
        &mut self,
        id: MessageId,
        flags: FlagSet,
    ) -> Result<(), Error> {
        self.cxn.enable_write(true)?;

        if 0 == self.cxn.execute(
            "UPDATE `message` SET `flags` = ? WHERE `id` = ?",
            (flags, id),
        )? {
            return Err(Error::NxMessage);
        }

        Ok(())
    }

    // ==================== MUTATIONS & THE TASK LOG ====================

    /// Applies `ty` to the message and appends the matching task record,
    /// all in one transaction.
    ///
    /// The returned task carries the field value that immediately preceded
    /// the write as its old value. If anything here fails, neither the flag
    /// write nor the log append persists, so a dangling unlogged mutation
    /// cannot occur.
    pub fn apply_flag_mutation(
        &mut self,
        message_id: MessageId,
        ty: TaskType,
        now: UnixTimestamp,
    ) -> Result<Task, Error> {
        let txn = self.cxn.write_tx()?;

        let (folder_id, flags) = txn
            .prepare_cached(
                "SELECT `folder_id`, `flags` FROM `message` \
                 WHERE `id` = ? AND `purged` = 0",
            )?
            .query_row((message_id,), from_row::<(FolderId, FlagSet)>)
            .optional()?
            .ok_or(Error::NxMessage)?;

        let field = ty.field();
        let old_value = flags.contains(field);
        let new_value = ty.value();

        txn.prepare_cached(
            "UPDATE `message` SET `flags` = ? WHERE `id` = ?",
        )?
        .execute((flags.with(field, new_value), message_id))?;

        txn.prepare_cached(
            "INSERT INTO `task` \
             (`task_type`, `message_id`, `folder_id`, \
              `old_value`, `new_value`, `applied_at`) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )?
        .execute((ty, message_id, folder_id, old_value, new_value, now))?;
        let seqno = Seqno(txn.last_insert_rowid());

        txn.commit()?;

        Ok(Task {
            seqno,
            task_type: ty,
            message_id,
            folder_id,
            old_value,
            new_value,
            applied_at: now,
            reverted: false,
        })
    }

    /// Reverts the task with the given sequence number, all in one
    /// transaction.
    ///
    /// If the message's current field value still equals the task's new
    /// value, the old value is written back; otherwise a later, unrelated
    /// mutation has since changed it, the write is skipped, and the
    /// conflict is reported through the outcome. Either way the task ends
    /// marked reverted. Returns `Error::TaskAlreadyReverted` if it already
    /// was.
    pub fn revert_task(
        &mut self,
        seqno: Seqno,
    ) -> Result<RevertOutcome, Error> {
        let txn = self.cxn.write_tx()?;

        let task = txn
            .prepare_cached("SELECT * FROM `task` WHERE `seqno` = ?")?
            .query_row((seqno,), Task::from_row)
            .optional()?
            .ok_or(Error::NxTask)?;
        if task.reverted {
            return Err(Error::TaskAlreadyReverted(seqno));
        }

        let flags = txn
            .prepare_cached("SELECT `flags` FROM `message` WHERE `id` = ?")?
            .query_row((task.message_id,), from_single::<FlagSet>)
            .optional()?
            .ok_or(Error::NxMessage)?;

        let field = task.task_type.field();
        let current = flags.contains(field);
        let outcome = if current != task.new_value {
            RevertOutcome::Conflict { current }
        } else {
            txn.prepare_cached(
                "UPDATE `message` SET `flags` = ? WHERE `id` = ?",
            )?
            .execute((flags.with(field, task.old_value), task.message_id))?;
            RevertOutcome::Reverted
        };

        txn.prepare_cached(
            "UPDATE `task` SET `reverted` = 1 WHERE `seqno` = ?",
        )?
        .execute((seqno,))?;

        txn.commit()?;
        Ok(outcome)
    }

    /// Returns the non-reverted tasks within `scope`, newest first.
    ///
    /// Strictly descending sequence order is the rollback contract;
    /// everything downstream depends on it.
    pub fn fetch_tasks_for_rollback(
        &mut self,
        scope: RollbackScope,
    ) -> Result<Vec<Task>, Error> {
        self.cxn.enable_write(false)?;

        let tasks = match scope {
            RollbackScope::Full => self
                .cxn
                .prepare_cached(
                    "SELECT * FROM `task` WHERE `reverted` = 0 \
                     ORDER BY `seqno` DESC",
                )?
                .query_map((), from_row)?
                .collect::<Result<Vec<Task>, _>>()?,
            RollbackScope::Folder(folder_id) => self
                .cxn
                .prepare_cached(
                    "SELECT * FROM `task` \
                     WHERE `reverted` = 0 AND `folder_id` = ? \
                     ORDER BY `seqno` DESC",
                )?
                .query_map((folder_id,), from_row)?
                .collect::<Result<Vec<Task>, _>>()?,
            RollbackScope::Since(seqno) => self
                .cxn
                .prepare_cached(
                    "SELECT * FROM `task` \
                     WHERE `reverted` = 0 AND `seqno` >= ? \
                     ORDER BY `seqno` DESC",
                )?
                .query_map((seqno,), from_row)?
                .collect::<Result<Vec<Task>, _>>()?,
        };

        Ok(tasks)
    }

    /// Flips the task's reverted flag without touching its message.
    ///
    /// A second flip of the same task is a consistency violation, not a
    /// retry path, and fails with `Error::TaskAlreadyReverted`.
    pub fn mark_task_reverted(&mut self, seqno: Seqno) -> Result<(), Error> {
        let txn = self.cxn.write_tx()?;

        let reverted = txn
            .prepare_cached(
                "SELECT `reverted` FROM `task` WHERE `seqno` = ?",
            )?
            .query_row((seqno,), from_single::<bool>)
            .optional()?
            .ok_or(Error::NxTask)?;
        if reverted {
            return Err(Error::TaskAlreadyReverted(seqno));
        }

        txn.prepare_cached(
            "UPDATE `task` SET `reverted` = 1 WHERE `seqno` = ?",
        )?
        .execute((seqno,))?;

        txn.commit()?;
        Ok(())
    }

    /// Fetches a single task record.
    pub fn fetch_task(&mut self, seqno: Seqno) -> Result<Task, Error> {
        self.cxn.enable_write(false)?;

        self.cxn
            .query_row(
                "SELECT * FROM `task` WHERE `seqno` = ?",
                (seqno,),
                Task::from_row,
            )
            .optional()?
            .ok_or(Error::NxTask)
    }

    /// Returns the full task history of one message, oldest first. This is
    /// the audit view; reverted tasks are included.
    pub fn fetch_tasks_for_message(
        &mut self,
        message_id: MessageId,
    ) -> Result<Vec<Task>, Error> {
        self.cxn.enable_write(false)?;

        self.cxn
            .prepare_cached(
                "SELECT * FROM `task` WHERE `message_id` = ? \
                 ORDER BY `seqno`",
            )?
            .query_map((message_id,), from_row)?
            .collect::<Result<Vec<Task>, _>>()
            .map_err(Into::into)
    }
}

trait ConnectionExt {
    fn write_tx(&mut self) -> rusqlite::Result<rusqlite::Transaction<'_>>;
    fn enable_write(&mut self, enabled: bool) -> rusqlite::Result<()>;
}

impl ConnectionExt for rusqlite::Connection {
    fn write_tx(&mut self) -> rusqlite::Result<rusqlite::Transaction<'_>> {
        self.enable_write(true)?;
        self.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)
    }

    #[cfg(debug_assertions)]
    fn enable_write(&mut self, enabled: bool) -> rusqlite::Result<()> {
        // PRAGMA doesn't actually support templates, so switch the whole
        // query string based on `enabled`.
        self.execute(
            if enabled {
                "PRAGMA query_only = false"
            } else {
                "PRAGMA query_only = true"
            },
            (),
        )?;
        Ok(())
    }

    #[cfg(not(debug_assertions))]
    fn enable_write(&mut self, _: bool) -> rusqlite::Result<()> {
        Ok(())
    }
}
