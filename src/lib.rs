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

//! The change-tracking core of an IMAP mailbox synchronisation engine.
//!
//! This crate provides the pieces that sit between inbound IMAP events and
//! durable storage: the per-folder sync state machine, the append-only task
//! log which records every locally-applied mutation with enough data to
//! reverse it, and the rollback engine that undoes a logged tail of tasks in
//! strictly reverse order.
//!
//! The IMAP transport itself, the front-end that renders synced messages,
//! and process supervision are external collaborators. The transport is
//! reached through the [`sync::model::MailboxClient`] trait; everything else
//! consumes the database this crate maintains.

#[cfg(test)]
macro_rules! assert_matches {
    ($expected:pat, $actual:expr $(,)?) => {
        match $actual {
            $expected => (),
            unexpected => panic!(
                "Expected {} matches {}, got {:?}",
                stringify!($expected),
                stringify!($actual),
                unexpected
            ),
        }
    };
}

pub mod support;
pub mod sync;

#[cfg(test)]
static INIT_TEST_LOG: std::sync::Once = std::sync::Once::new();

#[cfg(test)]
fn init_test_log() {
    INIT_TEST_LOG.call_once(|| {
        fern::Dispatch::new()
            .format(|out, message, record| {
                out.finish(format_args!(
                    "{} [{}][{}] {}",
                    chrono::Local::now().format("%H:%M:%S%.3f"),
                    record.level(),
                    record.target(),
                    message,
                ))
            })
            .level(log::LevelFilter::Debug)
            .chain(std::io::stderr())
            .apply()
            .unwrap();
    })
}
