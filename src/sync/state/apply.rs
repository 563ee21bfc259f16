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

use log::info;

use super::super::storage;
use super::defs::SyncEngine;
use crate::support::error::Error;
use crate::sync::model::*;

impl SyncEngine {
    /// Applies `task_type` to the message and logs the corresponding task.
    ///
    /// This is the only path through which message flags change. The field
    /// write and the log append are one storage transaction; a persistence
    /// failure means neither happened, and the caller must not consider the
    /// mutation applied.
    pub fn apply_mutation(
        &mut self,
        message: MessageId,
        task_type: TaskType,
    ) -> Result<storage::Task, Error> {
        let task = self.db.apply_flag_mutation(
            message,
            task_type,
            storage::UnixTimestamp::now(),
        )?;
        info!(
            "{} Applied {} to message {} as task {}",
            self.log_prefix,
            task_type.as_str(),
            message.0,
            task.seqno,
        );
        Ok(task)
    }

    /// Reverts one task, writing its old value back to the message.
    ///
    /// If a later, unrelated mutation has since changed the field, the
    /// message is left untouched, the task is still marked reverted, and
    /// the conflict surfaces as `Error::RevertConflict` for the caller to
    /// report.
    pub fn revert_one(&mut self, task: &storage::Task) -> Result<(), Error> {
        match self.db.revert_task(task.seqno)? {
            storage::RevertOutcome::Reverted => Ok(()),
            storage::RevertOutcome::Conflict { current } => {
                Err(Error::RevertConflict {
                    seqno: task.seqno,
                    current,
                })
            },
        }
    }

    /// Applies one inbound mailbox event to the folder.
    pub(super) fn apply_event(
        &mut self,
        folder: FolderId,
        event: MailboxEvent,
    ) -> Result<(), Error> {
        match event {
            MailboxEvent::New {
                uid,
                flags,
                content_ref,
            } => {
                self.db.intern_message(folder, uid, flags, &content_ref)?;
            },
            MailboxEvent::FlagChange { uid, task_type } => {
                let message = self.db.find_message(folder, uid)?;
                self.apply_mutation(message, task_type)?;
            },
            MailboxEvent::Purge { uid } => {
                let message = self.db.find_message(folder, uid)?;
                self.db.purge_message(message)?;
            },
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::super::defs::TestFixture;
    use super::*;

    #[test]
    fn apply_then_revert_restores_field() {
        let mut fixture = TestFixture::new();
        let (_, message, tasks) =
            fixture.message_with_tasks("INBOX", 1, &[TaskType::MarkRead]);

        assert!(fixture
            .engine
            .message(message)
            .unwrap()
            .flags
            .contains(FlagField::Seen));

        fixture.engine.revert_one(&tasks[0]).unwrap();
        assert!(!fixture
            .engine
            .message(message)
            .unwrap()
            .flags
            .contains(FlagField::Seen));

        // Reverting again is a consistency error.
        assert_matches!(
            Err(Error::TaskAlreadyReverted(..)),
            fixture.engine.revert_one(&tasks[0]),
        );
    }

    #[test]
    fn revert_conflict_is_reported_not_swallowed() {
        let mut fixture = TestFixture::new();
        let (_, message, tasks) =
            fixture.message_with_tasks("INBOX", 1, &[TaskType::Flag]);

        // Someone else rewrites the flag out from under the task.
        fixture
            .engine
            .db
            .force_message_flags(message, FlagSet::default())
            .unwrap();

        assert_matches!(
            Err(Error::RevertConflict { current: false, .. }),
            fixture.engine.revert_one(&tasks[0]),
        );
        // The task is spent regardless, and the newer state is preserved.
        assert!(fixture
            .engine
            .db
            .fetch_task(tasks[0].seqno)
            .unwrap()
            .reverted);
        assert_eq!(
            FlagSet::default(),
            fixture.engine.message(message).unwrap().flags,
        );
    }

    #[test]
    fn events_route_to_their_handlers() {
        let mut fixture = TestFixture::new();
        let folder = fixture.engine.db.intern_folder("INBOX").unwrap();

        fixture
            .engine
            .apply_event(
                folder,
                MailboxEvent::New {
                    uid: Uid::u(7),
                    flags: FlagSet::default(),
                    content_ref: "blob-7".to_owned(),
                },
            )
            .unwrap();
        let message = fixture.engine.db.find_message(folder, Uid::u(7)).unwrap();

        fixture
            .engine
            .apply_event(
                folder,
                MailboxEvent::FlagChange {
                    uid: Uid::u(7),
                    task_type: TaskType::MarkRead,
                },
            )
            .unwrap();
        assert_eq!(1, fixture.engine.task_history(message).unwrap().len());

        fixture
            .engine
            .apply_event(folder, MailboxEvent::Purge { uid: Uid::u(7) })
            .unwrap();
        assert!(fixture.engine.message(message).unwrap().purged);

        // Flag changes for unknown messages surface as NxMessage.
        assert_matches!(
            Err(Error::NxMessage),
            fixture.engine.apply_event(
                folder,
                MailboxEvent::FlagChange {
                    uid: Uid::u(99),
                    task_type: TaskType::MarkRead,
                },
            ),
        );
    }
}
