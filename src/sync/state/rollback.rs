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

use log::{info, warn};

use super::defs::SyncEngine;
use crate::support::error::Error;
use crate::sync::model::*;

impl SyncEngine {
    /// Replays the scoped slice of the task log in reverse, writing each
    /// task's old value back.
    ///
    /// Each task is its own atomic unit. A task whose message has since
    /// moved on (its field no longer carries the task's new value) is
    /// marked reverted without touching the message and reported in the
    /// summary; the replay continues past it. The halt flag is honoured
    /// between tasks, and a later invocation with the same scope picks up
    /// the remaining tail because reverted tasks drop out of the fetch.
    pub fn rollback(
        &mut self,
        scope: RollbackScope,
    ) -> Result<RollbackSummary, Error> {
        let tasks = self.db.fetch_tasks_for_rollback(scope)?;
        info!(
            "{} Rolling back {} task(s), newest first",
            self.log_prefix,
            tasks.len(),
        );

        let mut summary = RollbackSummary::default();
        for task in &tasks {
            match self.revert_one(task) {
                Ok(()) => summary.reverted += 1,
                Err(Error::RevertConflict { seqno, current }) => {
                    warn!(
                        "{} Task {} conflicts (field is now {}); \
                         marked reverted, message untouched",
                        self.log_prefix, seqno, current,
                    );
                    summary.conflicts.push(seqno);
                },
                Err(e) => return Err(e),
            }

            if self.halt.is_set() {
                summary.halted = true;
                break;
            }
        }

        info!(
            "{} Rollback done: {} reverted, {} conflict(s){}",
            self.log_prefix,
            summary.reverted,
            summary.conflicts.len(),
            if summary.halted { ", halted early" } else { "" },
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod test {
    use proptest::prelude::*;

    use super::super::defs::TestFixture;
    use super::*;

    #[test]
    fn full_rollback_restores_original_state() {
        let mut fixture = TestFixture::new();
        let (_, message, _) = fixture.message_with_tasks(
            "INBOX",
            1,
            &[TaskType::MarkRead, TaskType::Flag, TaskType::MarkUnread],
        );

        let summary =
            fixture.engine.rollback(RollbackScope::Full).unwrap();
        assert_eq!(
            RollbackSummary {
                reverted: 3,
                conflicts: vec![],
                halted: false,
            },
            summary,
        );

        assert_eq!(
            FlagSet::default(),
            fixture.engine.message(message).unwrap().flags,
        );
        assert!(fixture
            .engine
            .task_history(message)
            .unwrap()
            .iter()
            .all(|t| t.reverted));

        // Nothing left to revert.
        let summary =
            fixture.engine.rollback(RollbackScope::Full).unwrap();
        assert_eq!(0, summary.reverted);
    }

    #[test]
    fn tail_scope_reverts_only_the_newest_run() {
        let mut fixture = TestFixture::new();
        let (_, message, tasks) = fixture.message_with_tasks(
            "INBOX",
            1,
            &[TaskType::MarkRead, TaskType::MarkUnread],
        );

        // Scoping to the second task undoes only the mark-unread, leaving
        // the message read again.
        let summary = fixture
            .engine
            .rollback(RollbackScope::Since(tasks[1].seqno))
            .unwrap();
        assert_eq!(1, summary.reverted);

        let flags = fixture.engine.message(message).unwrap().flags;
        assert!(flags.contains(FlagField::Seen));
        let history = fixture.engine.task_history(message).unwrap();
        assert!(!history[0].reverted);
        assert!(history[1].reverted);
    }

    #[test]
    fn folder_scope_leaves_other_folders_alone() {
        let mut fixture = TestFixture::new();
        let (inbox, in_message, _) =
            fixture.message_with_tasks("INBOX", 1, &[TaskType::MarkRead]);
        let (_, spam_message, _) =
            fixture.message_with_tasks("Spam", 1, &[TaskType::Flag]);

        let summary = fixture
            .engine
            .rollback(RollbackScope::Folder(inbox))
            .unwrap();
        assert_eq!(1, summary.reverted);

        assert!(!fixture
            .engine
            .message(in_message)
            .unwrap()
            .flags
            .contains(FlagField::Seen));
        // The other folder's task is neither reverted nor undone.
        assert!(fixture
            .engine
            .message(spam_message)
            .unwrap()
            .flags
            .contains(FlagField::Flagged));
        assert!(!fixture.engine.task_history(spam_message).unwrap()[0]
            .reverted);
    }

    #[test]
    fn conflicting_task_is_spent_but_not_undone() {
        let mut fixture = TestFixture::new();
        let (_, message, tasks) =
            fixture.message_with_tasks("INBOX", 1, &[TaskType::MarkRead]);

        // The message moved on after the task was applied.
        let external = FlagSet::default()
            .with(FlagField::Seen, false)
            .with(FlagField::DeletedPending, true);
        fixture
            .engine
            .db
            .force_message_flags(message, external)
            .unwrap();

        let summary =
            fixture.engine.rollback(RollbackScope::Full).unwrap();
        assert_eq!(
            RollbackSummary {
                reverted: 0,
                conflicts: vec![tasks[0].seqno],
                halted: false,
            },
            summary,
        );

        // Newer state preserved; the task will not be replayed again.
        assert_eq!(
            external,
            fixture.engine.message(message).unwrap().flags,
        );
        assert!(fixture.engine.task_history(message).unwrap()[0].reverted);
    }

    #[test]
    fn halt_stops_between_tasks_and_rollback_resumes() {
        let mut fixture = TestFixture::new();
        let types = [
            TaskType::MarkRead,
            TaskType::Flag,
            TaskType::MarkUnread,
            TaskType::Unflag,
            TaskType::MarkRead,
            TaskType::Flag,
            TaskType::MarkUnread,
            TaskType::Unflag,
            TaskType::MarkRead,
            TaskType::Flag,
        ];
        let (_, message, _) =
            fixture.message_with_tasks("INBOX", 1, &types);

        fixture.halt.trip_after(3);
        let summary =
            fixture.engine.rollback(RollbackScope::Full).unwrap();
        assert_eq!(3, summary.reverted);
        assert!(summary.halted);
        assert_eq!(
            3,
            fixture
                .engine
                .task_history(message)
                .unwrap()
                .iter()
                .filter(|t| t.reverted)
                .count(),
        );

        fixture.halt.clear();
        let summary =
            fixture.engine.rollback(RollbackScope::Full).unwrap();
        assert_eq!(7, summary.reverted);
        assert!(!summary.halted);
        assert_eq!(
            FlagSet::default(),
            fixture.engine.message(message).unwrap().flags,
        );
    }

    proptest! {
        /// A full rollback of any uncontested history restores the
        /// message's initial flags, with no conflicts.
        #[test]
        fn full_rollback_inverts_any_history(
            seen in any::<bool>(),
            flagged in any::<bool>(),
            types in prop::collection::vec(
                prop::sample::select(vec![
                    TaskType::MarkRead,
                    TaskType::MarkUnread,
                    TaskType::Flag,
                    TaskType::Unflag,
                ]),
                0..16,
            ),
        ) {
            let mut fixture = TestFixture::new();
            let initial = FlagSet::default()
                .with(FlagField::Seen, seen)
                .with(FlagField::Flagged, flagged);

            let folder =
                fixture.engine.db.intern_folder("INBOX").unwrap();
            let message = fixture
                .engine
                .db
                .intern_message(folder, Uid::u(1), initial, "ref")
                .unwrap();
            for &ty in &types {
                fixture.engine.apply_mutation(message, ty).unwrap();
            }

            let summary =
                fixture.engine.rollback(RollbackScope::Full).unwrap();
            prop_assert_eq!(types.len() as u32, summary.reverted);
            prop_assert!(summary.conflicts.is_empty());
            prop_assert_eq!(
                initial,
                fixture.engine.message(message).unwrap().flags,
            );
        }
    }
}
