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

//! Model types shared by the state machine, the storage layer, and the
//! engine API.
//!
//! Everything here is pure data; all I/O lives in `sync::storage` and
//! `sync::state`.

use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::support::error::Error;

/// Uniquely identifies a folder in the local database.
#[derive(
    Deserialize,
    Serialize,
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
)]
#[serde(transparent)]
pub struct FolderId(pub i64);

impl FolderId {
    /// ID for the root pseudo-folder.
    ///
    /// This is used for the parent link of top-level folders solely so that
    /// `(parent_id, name)` still works as a uniqueness constraint for them.
    pub const ROOT: Self = Self(0);
}

/// Uniquely identifies a message in the local database.
///
/// Distinct from [`Uid`]: the UID is the remote mailbox's key for the
/// message; the `MessageId` is ours, and survives even after the message is
/// purged from the active set so that task history stays meaningful.
#[derive(
    Deserialize,
    Serialize,
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
)]
#[serde(transparent)]
pub struct MessageId(pub i64);

/// A task sequence number.
///
/// Sequence numbers are assigned by the storage layer in strictly
/// increasing order and are never reused, even across restarts. Rollback
/// order is strictly descending `Seqno`.
#[derive(
    Deserialize,
    Serialize,
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
)]
#[serde(transparent)]
pub struct Seqno(pub i64);

impl fmt::Display for Seqno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Uniquely identifies a message within a single remote folder.
///
/// This is the server-assigned IMAP UID (or equivalent). This core never
/// allocates UIDs; it only records the ones the mailbox reports.
#[derive(
    Deserialize, Serialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(transparent)]
pub struct Uid(pub NonZeroU32);

impl fmt::Debug for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Uid({})", self.0.get())
    }
}

impl Uid {
    pub const MIN: Self = Uid(NonZeroU32::MIN);

    pub fn of(uid: u32) -> Option<Self> {
        NonZeroU32::new(uid).map(Uid)
    }

    /// Shorthand for tests and literals; panics on 0.
    pub fn u(uid: u32) -> Self {
        Uid::of(uid).unwrap()
    }
}

/// A single boolean flag slot on a message.
///
/// Flags are stored as a bitset in one integer column, one bit per field.
#[derive(
    Deserialize,
    Serialize,
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
)]
pub enum FlagField {
    Seen,
    Flagged,
    DeletedPending,
}

impl FlagField {
    pub fn bit(self) -> i64 {
        match self {
            Self::Seen => 1 << 0,
            Self::Flagged => 1 << 1,
            Self::DeletedPending => 1 << 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Seen => "seen",
            Self::Flagged => "flagged",
            Self::DeletedPending => "deleted-pending",
        }
    }
}

/// The flag bitset of a message.
///
/// This is the single source of truth consumed by both the front-end reader
/// and the rollback engine; it is mutated only through the mutation applier.
#[derive(
    Deserialize,
    Serialize,
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Hash,
)]
#[serde(transparent)]
pub struct FlagSet(pub i64);

impl FlagSet {
    pub fn contains(self, field: FlagField) -> bool {
        0 != self.0 & field.bit()
    }

    pub fn with(self, field: FlagField, value: bool) -> Self {
        if value {
            Self(self.0 | field.bit())
        } else {
            Self(self.0 & !field.bit())
        }
    }
}

/// The sync lifecycle state of a folder.
///
/// All transitions are pure; persisting the outcome is the caller's
/// business. The storage layer encodes the status as text via `as_str` and
/// `FromStr`.
#[derive(
    Deserialize,
    Serialize,
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
)]
pub enum SyncStatus {
    /// Initial state; also the state after an operator-requested full
    /// resync.
    NotSynced,
    /// A sync pass is in flight for the folder.
    Syncing,
    /// A pass is in flight, and a remote change arrived during it. The
    /// current pass must finish first; this flag coalesces any number of
    /// such notifications into exactly one follow-up pass.
    SyncingNeedResync,
    /// The last pass completed with no pending events.
    Synced,
    /// The last pass aborted. Recoverable only by re-entering the sync
    /// loop; tasks applied before the abort stay applied and logged.
    Error,
}

impl SyncStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotSynced => "not-synced",
            Self::Syncing => "syncing",
            Self::SyncingNeedResync => "syncing-need-resync",
            Self::Synced => "synced",
            Self::Error => "error",
        }
    }

    /// Whether the driver may select this folder for a pass.
    pub fn is_eligible(self) -> bool {
        matches!(
            self,
            Self::NotSynced | Self::Syncing | Self::SyncingNeedResync,
        )
    }

    /// A sync pass starts (or resumes) for this folder.
    ///
    /// `Error` is accepted here because re-entering the sync loop is
    /// exactly the explicit restart that recovers from it. `Synced` is not:
    /// a synced folder only becomes eligible again once
    /// [`note_remote_change`](Self::note_remote_change) or
    /// [`restart`](Self::restart) knocks it back.
    pub fn begin_pass(self) -> Result<Self, Error> {
        match self {
            Self::NotSynced
            | Self::Syncing
            | Self::SyncingNeedResync
            | Self::Error => Ok(Self::Syncing),
            Self::Synced => Err(Error::InvalidTransition(self)),
        }
    }

    /// An external mutation event (new mail, flag change, purge) arrived
    /// for this folder.
    ///
    /// A folder mid-pass must neither drop the event nor interleave it with
    /// the in-progress pass, so the event is queued by flipping to
    /// `SyncingNeedResync`. A folder at rest simply becomes eligible again.
    /// A folder in `Error` stays there; only an explicit restart recovers
    /// it.
    pub fn note_remote_change(self) -> Self {
        match self {
            Self::Syncing | Self::SyncingNeedResync => {
                Self::SyncingNeedResync
            },
            Self::NotSynced | Self::Synced => Self::NotSynced,
            Self::Error => Self::Error,
        }
    }

    /// The current pass completed without error.
    ///
    /// If the need-resync flag was raised during the pass, the folder
    /// re-enters `Syncing` for another pass instead of being marked
    /// `Synced`.
    pub fn finish_pass(self) -> Result<Self, Error> {
        match self {
            Self::Syncing => Ok(Self::Synced),
            Self::SyncingNeedResync => Ok(Self::Syncing),
            Self::NotSynced | Self::Synced | Self::Error => {
                Err(Error::InvalidTransition(self))
            },
        }
    }

    /// The current pass aborted with an unrecoverable failure.
    pub fn fail(self) -> Self {
        Self::Error
    }

    /// Operator-triggered restart: the folder forgets all sync progress.
    pub fn restart(self) -> Self {
        Self::NotSynced
    }
}

impl FromStr for SyncStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "not-synced" => Ok(Self::NotSynced),
            "syncing" => Ok(Self::Syncing),
            "syncing-need-resync" => Ok(Self::SyncingNeedResync),
            "synced" => Ok(Self::Synced),
            "error" => Ok(Self::Error),
            _ => Err(Error::BadSyncStatus(s.to_owned())),
        }
    }
}

/// The closed set of loggable mutation types.
///
/// Each type declares the field it touches and the value it writes; apply
/// writes `value()` into `field()`, and the inverse writes the captured old
/// value back into the same `field()`. Adding a mutation type (move,
/// delete) means adding a variant with its own apply/inverse payload rather
/// than growing a central conditional.
#[derive(
    Deserialize,
    Serialize,
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
)]
pub enum TaskType {
    MarkRead,
    MarkUnread,
    Flag,
    Unflag,
}

impl TaskType {
    /// The flag field this mutation touches.
    pub fn field(self) -> FlagField {
        match self {
            Self::MarkRead | Self::MarkUnread => FlagField::Seen,
            Self::Flag | Self::Unflag => FlagField::Flagged,
        }
    }

    /// The value this mutation writes into its field.
    pub fn value(self) -> bool {
        matches!(self, Self::MarkRead | Self::Flag)
    }

    /// The task type that writes `value` into `field`.
    pub fn of(field: FlagField, value: bool) -> Option<Self> {
        match (field, value) {
            (FlagField::Seen, true) => Some(Self::MarkRead),
            (FlagField::Seen, false) => Some(Self::MarkUnread),
            (FlagField::Flagged, true) => Some(Self::Flag),
            (FlagField::Flagged, false) => Some(Self::Unflag),
            (FlagField::DeletedPending, _) => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::MarkRead => "mark-read",
            Self::MarkUnread => "mark-unread",
            Self::Flag => "flag",
            Self::Unflag => "unflag",
        }
    }
}

impl FromStr for TaskType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "mark-read" => Ok(Self::MarkRead),
            "mark-unread" => Ok(Self::MarkUnread),
            "flag" => Ok(Self::Flag),
            "unflag" => Ok(Self::Unflag),
            _ => Err(Error::BadTaskType(s.to_owned())),
        }
    }
}

/// One folder as reported by the remote mailbox listing.
///
/// `path` is `/`-delimited; interning it creates any missing ancestors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteFolder {
    pub path: String,
}

/// One pending change reported by the remote mailbox for a folder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MailboxEvent {
    /// A message not seen before appeared.
    New {
        uid: Uid,
        flags: FlagSet,
        content_ref: String,
    },
    /// A flag changed upstream; recorded locally as the given mutation so
    /// that it lands in the task log like any local change.
    FlagChange { uid: Uid, task_type: TaskType },
    /// The message was expunged upstream.
    Purge { uid: Uid },
}

/// The mailbox transport collaborator.
///
/// The engine treats the mailbox as push-free polling: ordering within one
/// poll batch is preserved, but nothing is guaranteed across polls. Both
/// operations surface connectivity problems as [`Error::Transport`], which
/// the driver retries at its next scheduled pass rather than immediately.
pub trait MailboxClient {
    fn list_folders(&mut self) -> Result<Vec<RemoteFolder>, Error>;

    fn poll_events(
        &mut self,
        folder: &str,
    ) -> Result<Vec<MailboxEvent>, Error>;
}

/// The subset of the task log eligible for reverse replay.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RollbackScope {
    /// Every non-reverted task in the log.
    Full,
    /// Non-reverted tasks applied to messages of one folder.
    Folder(FolderId),
    /// The contiguous tail of the log starting at the given task.
    ///
    /// Scoping to the newest task touches exactly that task; scoping to the
    /// first task of a run reverts that whole run.
    Since(Seqno),
}

/// What one rollback invocation accomplished.
///
/// Reported in full at the end of every run, never silently truncated.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RollbackSummary {
    /// Tasks whose old value was written back.
    pub reverted: u32,
    /// Tasks whose message no longer carried the task's new value. They
    /// were marked reverted, but the message was left untouched so as not
    /// to clobber the newer state.
    pub conflicts: Vec<Seqno>,
    /// Whether the run stopped early on the halt flag. The remaining
    /// non-reverted tail is picked up by the next invocation.
    pub halted: bool,
}

/// What one driver run accomplished.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SyncRunSummary {
    pub folders_synced: u32,
    pub folders_failed: u32,
    pub events_applied: u32,
    /// Whether the run stopped early on the halt flag.
    pub halted: bool,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn flag_set_ops() {
        let flags = FlagSet::default();
        assert!(!flags.contains(FlagField::Seen));

        let flags = flags.with(FlagField::Seen, true);
        assert!(flags.contains(FlagField::Seen));
        assert!(!flags.contains(FlagField::Flagged));

        let flags = flags
            .with(FlagField::Flagged, true)
            .with(FlagField::Seen, false);
        assert!(!flags.contains(FlagField::Seen));
        assert!(flags.contains(FlagField::Flagged));

        // Clearing an already-clear field is a no-op.
        assert_eq!(flags, flags.with(FlagField::DeletedPending, false));
    }

    #[test]
    fn task_type_apply_inverse_pairs() {
        for ty in [
            TaskType::MarkRead,
            TaskType::MarkUnread,
            TaskType::Flag,
            TaskType::Unflag,
        ] {
            assert_eq!(Some(ty), TaskType::of(ty.field(), ty.value()));
            assert_eq!(ty, ty.as_str().parse::<TaskType>().unwrap());
        }

        assert_eq!(FlagField::Seen, TaskType::MarkUnread.field());
        assert!(!TaskType::MarkUnread.value());
        assert_matches!(
            Err(Error::BadTaskType(..)),
            "shred".parse::<TaskType>(),
        );
    }

    #[test]
    fn status_machine_happy_path() {
        let status = SyncStatus::NotSynced;
        assert!(status.is_eligible());

        let status = status.begin_pass().unwrap();
        assert_eq!(SyncStatus::Syncing, status);

        let status = status.finish_pass().unwrap();
        assert_eq!(SyncStatus::Synced, status);
        assert!(!status.is_eligible());

        assert_matches!(
            Err(Error::InvalidTransition(SyncStatus::Synced)),
            status.begin_pass(),
        );
    }

    #[test]
    fn status_machine_coalesces_concurrent_changes() {
        // An event mid-pass queues a follow-up pass...
        let status = SyncStatus::Syncing.note_remote_change();
        assert_eq!(SyncStatus::SyncingNeedResync, status);

        // ...any number of further events coalesce into the same flag...
        assert_eq!(SyncStatus::SyncingNeedResync, status.note_remote_change());

        // ...and completing the current pass re-enters Syncing rather than
        // marking the folder synced.
        assert_eq!(SyncStatus::Syncing, status.finish_pass().unwrap());
    }

    #[test]
    fn status_machine_at_rest_and_error() {
        assert_eq!(
            SyncStatus::NotSynced,
            SyncStatus::Synced.note_remote_change(),
        );
        assert_eq!(
            SyncStatus::NotSynced,
            SyncStatus::NotSynced.note_remote_change(),
        );

        // Error recovers only through an explicit restart or re-entry.
        assert_eq!(
            SyncStatus::Error,
            SyncStatus::Error.note_remote_change(),
        );
        assert!(!SyncStatus::Error.is_eligible());
        assert_eq!(
            SyncStatus::Syncing,
            SyncStatus::Error.begin_pass().unwrap(),
        );
        assert_eq!(SyncStatus::NotSynced, SyncStatus::Error.restart());

        assert_eq!(SyncStatus::Error, SyncStatus::Syncing.fail());
        assert_matches!(
            Err(Error::InvalidTransition(..)),
            SyncStatus::Error.finish_pass(),
        );
    }

    #[test]
    fn status_string_round_trip() {
        for status in [
            SyncStatus::NotSynced,
            SyncStatus::Syncing,
            SyncStatus::SyncingNeedResync,
            SyncStatus::Synced,
            SyncStatus::Error,
        ] {
            assert_eq!(
                status,
                status.as_str().parse::<SyncStatus>().unwrap(),
            );
        }

        assert_matches!(
            Err(Error::BadSyncStatus(..)),
            "halfway-synced".parse::<SyncStatus>(),
        );
    }
}
