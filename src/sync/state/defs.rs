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

use std::path::Path;
use std::sync::Arc;

use super::super::storage;
use crate::support::{error::Error, halt::HaltFlag};
use crate::sync::model::*;

/// The synchronisation engine for one account database.
///
/// The engine itself is single-threaded (`&mut self` throughout). Callers
/// wanting per-folder parallelism run one engine per worker over the same
/// database file; individual record writes are serialised by the storage
/// layer's transactions, and the engines share nothing else but the halt
/// flag.
pub struct SyncEngine {
    pub(super) db: storage::SyncDb,
    pub(super) halt: Arc<HaltFlag>,
    pub(super) log_prefix: String,
}

impl SyncEngine {
    pub fn new(
        log_prefix: String,
        db_path: &Path,
        halt: Arc<HaltFlag>,
    ) -> Result<Self, Error> {
        Ok(Self {
            db: storage::SyncDb::new(db_path)?,
            halt,
            log_prefix,
        })
    }

    /// The shared cooperative halt flag.
    pub fn halt_flag(&self) -> &Arc<HaltFlag> {
        &self.halt
    }

    /// Fetches one folder.
    pub fn folder(&mut self, id: FolderId) -> Result<storage::Folder, Error> {
        self.db.fetch_folder(id)
    }

    /// Retrieves all folders currently known, removed ones included.
    pub fn folders(&mut self) -> Result<Vec<storage::Folder>, Error> {
        self.db.fetch_all_folders()
    }

    /// Fetches one message, purged or not.
    pub fn message(
        &mut self,
        id: MessageId,
    ) -> Result<storage::Message, Error> {
        self.db.fetch_message(id)
    }

    /// Returns the full task history of one message, oldest first.
    pub fn task_history(
        &mut self,
        message: MessageId,
    ) -> Result<Vec<storage::Task>, Error> {
        self.db.fetch_tasks_for_message(message)
    }

    /// Operator trigger: the folder forgets all sync progress and will be
    /// re-synced from scratch on the next run.
    pub fn restart_folder(&mut self, id: FolderId) -> Result<(), Error> {
        let status = self.db.fetch_folder(id)?.status;
        self.db.set_folder_status(id, status.restart())
    }

    /// External notification that the folder changed upstream.
    ///
    /// Called from outside the driver loop (e.g. by whatever watches IMAP
    /// IDLE); if a pass is in flight for the folder, this raises the
    /// need-resync flag rather than interleaving with it.
    pub fn note_remote_change(&mut self, id: FolderId) -> Result<(), Error> {
        let status = self.db.fetch_folder(id)?.status;
        self.db.set_folder_status(id, status.note_remote_change())
    }
}

#[cfg(test)]
pub(super) struct TestFixture {
    _root: tempfile::TempDir,
    pub(super) halt: Arc<HaltFlag>,
    pub(super) engine: SyncEngine,
}

#[cfg(test)]
impl TestFixture {
    pub(super) fn new() -> Self {
        crate::init_test_log();

        let root = tempfile::TempDir::new().unwrap();
        let halt = Arc::new(HaltFlag::new());
        let engine = SyncEngine::new(
            "test".to_owned(),
            &root.path().join("sync.sqlite"),
            Arc::clone(&halt),
        )
        .unwrap();

        Self {
            _root: root,
            halt,
            engine,
        }
    }

    pub(super) fn db_path(&self) -> std::path::PathBuf {
        self._root.path().join("sync.sqlite")
    }

    /// Interns a folder with one message and applies `types` in order.
    pub(super) fn message_with_tasks(
        &mut self,
        path: &str,
        uid: u32,
        types: &[TaskType],
    ) -> (FolderId, MessageId, Vec<storage::Task>) {
        let folder = self.engine.db.intern_folder(path).unwrap();
        let message = self
            .engine
            .db
            .intern_message(folder, Uid::u(uid), FlagSet::default(), "ref")
            .unwrap();
        let tasks = types
            .iter()
            .map(|&ty| self.engine.apply_mutation(message, ty).unwrap())
            .collect();
        (folder, message, tasks)
    }
}

/// A scripted mailbox for driver tests: fixed folder listing, queued poll
/// batches per folder, optional per-folder transport failure.
#[cfg(test)]
pub(super) struct StubMailbox {
    pub(super) folders: Vec<RemoteFolder>,
    pub(super) events: std::collections::HashMap<
        String,
        std::collections::VecDeque<Vec<MailboxEvent>>,
    >,
    pub(super) broken: std::collections::HashSet<String>,
    pub(super) polls: std::collections::HashMap<String, u32>,
}

#[cfg(test)]
impl StubMailbox {
    pub(super) fn new(paths: &[&str]) -> Self {
        Self {
            folders: paths
                .iter()
                .map(|&path| RemoteFolder {
                    path: path.to_owned(),
                })
                .collect(),
            events: Default::default(),
            broken: Default::default(),
            polls: Default::default(),
        }
    }

    pub(super) fn queue(&mut self, folder: &str, batch: Vec<MailboxEvent>) {
        self.events
            .entry(folder.to_owned())
            .or_default()
            .push_back(batch);
    }
}

#[cfg(test)]
impl MailboxClient for StubMailbox {
    fn list_folders(&mut self) -> Result<Vec<RemoteFolder>, Error> {
        Ok(self.folders.clone())
    }

    fn poll_events(
        &mut self,
        folder: &str,
    ) -> Result<Vec<MailboxEvent>, Error> {
        *self.polls.entry(folder.to_owned()).or_insert(0) += 1;

        if self.broken.contains(folder) {
            return Err(Error::Transport(format!("{folder} is unreachable")));
        }

        Ok(self
            .events
            .get_mut(folder)
            .and_then(|batches| batches.pop_front())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn operator_surface() {
        let mut fixture = TestFixture::new();
        let (folder, message, tasks) = fixture.message_with_tasks(
            "INBOX",
            1,
            &[TaskType::MarkRead, TaskType::Flag],
        );

        // Accessors see what the applier wrote.
        let flags = fixture.engine.message(message).unwrap().flags;
        assert!(flags.contains(FlagField::Seen));
        assert!(flags.contains(FlagField::Flagged));
        assert_eq!(
            tasks.iter().map(|t| t.seqno).collect::<Vec<_>>(),
            fixture
                .engine
                .task_history(message)
                .unwrap()
                .iter()
                .map(|t| t.seqno)
                .collect::<Vec<_>>(),
        );
        assert_eq!(1, fixture.engine.folders().unwrap().len());

        // note_remote_change raises the need-resync flag mid-pass.
        fixture
            .engine
            .db
            .set_folder_status(folder, SyncStatus::Syncing)
            .unwrap();
        fixture.engine.note_remote_change(folder).unwrap();
        assert_eq!(
            SyncStatus::SyncingNeedResync,
            fixture.engine.folder(folder).unwrap().status,
        );

        // restart_folder recovers even from Error.
        fixture
            .engine
            .db
            .set_folder_status(folder, SyncStatus::Error)
            .unwrap();
        fixture.engine.restart_folder(folder).unwrap();
        assert_eq!(
            SyncStatus::NotSynced,
            fixture.engine.folder(folder).unwrap().status,
        );
    }
}
