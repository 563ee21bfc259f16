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

use log::{error, info};

use super::super::storage;
use super::defs::SyncEngine;
use crate::support::error::Error;
use crate::sync::model::*;

/// What one folder pass accomplished.
struct PassOutcome {
    events_applied: u32,
    /// False when the pass was cut short by the halt flag; the folder then
    /// stays mid-pass and a later run resumes it.
    completed: bool,
}

impl SyncEngine {
    /// Runs the sync driver once: refreshes the folder listing, then drives
    /// every eligible folder through as many passes as it needs.
    ///
    /// A folder whose pass fails is moved to `Error` and the run proceeds
    /// with the next folder; one folder's failure never halts the whole
    /// run. Tasks applied before such an abort stay applied and logged —
    /// undoing them is an explicit, operator-triggered rollback.
    pub fn sync_run(
        &mut self,
        client: &mut dyn MailboxClient,
    ) -> Result<SyncRunSummary, Error> {
        let mut summary = SyncRunSummary::default();

        let listed = client.list_folders()?;
        let mut known = Vec::new();
        for remote in &listed {
            known.extend(self.db.intern_folder_path(&remote.path)?);
        }
        let removed = self.db.mark_folders_removed_except(&known)?;
        if removed > 0 {
            info!(
                "{} {} folder(s) disappeared upstream; soft-marked removed",
                self.log_prefix, removed,
            );
        }

        for folder in self.db.fetch_all_folders()? {
            if folder.removed || !folder.status.is_eligible() {
                continue;
            }

            match self.sync_folder(client, &folder) {
                Ok(outcome) => {
                    summary.events_applied += outcome.events_applied;
                    if outcome.completed {
                        summary.folders_synced += 1;
                    }
                },
                Err(e) => {
                    error!(
                        "{} Sync pass for {} failed: {}",
                        self.log_prefix, folder.path, e,
                    );
                    let status = self.db.fetch_folder(folder.id)?.status;
                    self.db.set_folder_status(folder.id, status.fail())?;
                    summary.folders_failed += 1;
                },
            }

            if self.halt.is_set() {
                summary.halted = true;
                break;
            }
        }

        Ok(summary)
    }

    /// Drives one folder until it is synced, halted, or failed.
    fn sync_folder(
        &mut self,
        client: &mut dyn MailboxClient,
        folder: &storage::Folder,
    ) -> Result<PassOutcome, Error> {
        self.db
            .set_folder_status(folder.id, folder.status.begin_pass()?)?;
        info!("{} Syncing {}", self.log_prefix, folder.path);

        let mut events_applied = 0u32;
        loop {
            let events = client.poll_events(&folder.path)?;

            if events.is_empty() {
                // Pass complete. The stored status reveals whether a change
                // notification arrived while the pass was in flight.
                let status = self.db.fetch_folder(folder.id)?.status;
                match status.finish_pass()? {
                    SyncStatus::Synced => {
                        self.db.mark_folder_synced(
                            folder.id,
                            storage::UnixTimestamp::now(),
                        )?;
                        info!(
                            "{} {} synced ({} event(s) applied)",
                            self.log_prefix, folder.path, events_applied,
                        );
                        return Ok(PassOutcome {
                            events_applied,
                            completed: true,
                        });
                    },
                    next => {
                        // The need-resync flag was raised during the pass;
                        // run another pass instead of marking synced.
                        self.db.set_folder_status(folder.id, next)?;
                        continue;
                    },
                }
            }

            for event in events {
                self.apply_event(folder.id, event)?;
                events_applied += 1;

                if self.halt.is_set() {
                    // Stop at the step boundary, never mid-mutation.
                    info!(
                        "{} Halt requested; leaving {} mid-pass",
                        self.log_prefix, folder.path,
                    );
                    return Ok(PassOutcome {
                        events_applied,
                        completed: false,
                    });
                }
            }
        }
    }
}
