//! Completion watcher - detects process exits and completes handles
//!
//! In notify mode each launched process gets a small task awaiting its
//! exit, which posts an [`ExitNotice`] back to the watcher. In poll mode
//! the watcher checks every running process on a fixed cadence instead.
//! Either way the watcher ends once the scheduler drops the notice sender.

use super::launcher::ExitStatusSource;
use super::scheduler::Shared;
use crate::config::ExitDetection;
use std::sync::Weak;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

/// Exit code recorded when the exit status itself could not be read
pub const UNKNOWN_EXIT_CODE: i32 = -1;

/// A process exited
#[derive(Debug, Clone, Copy)]
pub(crate) struct ExitNotice {
    pub id: Uuid,
    pub exit_code: i32,
}

/// Watcher loop; holds only a weak reference so a dropped scheduler ends it
pub(crate) async fn run(
    shared: Weak<Shared>,
    mut notices: mpsc::UnboundedReceiver<ExitNotice>,
    detection: ExitDetection,
) {
    log::debug!("Completion watcher started ({:?})", detection);

    match detection {
        ExitDetection::Notify => {
            while let Some(notice) = notices.recv().await {
                let Some(shared) = shared.upgrade() else { break };
                shared.finish(notice.id, notice.exit_code);
            }
        }
        ExitDetection::Poll(interval) => {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    notice = notices.recv() => match notice {
                        Some(notice) => {
                            let Some(shared) = shared.upgrade() else { break };
                            shared.finish(notice.id, notice.exit_code);
                        }
                        None => break,
                    },
                    _ = ticker.tick() => {
                        let Some(shared) = shared.upgrade() else { break };
                        shared.poll_running();
                    }
                }
            }
        }
    }

    log::debug!("Completion watcher stopped");
}

/// Await one process's exit and report it to the watcher
pub(crate) fn watch_exit(
    id: Uuid,
    mut exit: Box<dyn ExitStatusSource>,
    notices: mpsc::UnboundedSender<ExitNotice>,
) {
    tokio::spawn(async move {
        let exit_code = match exit.wait().await {
            Ok(code) => code,
            Err(e) => {
                log::warn!("Process {} exit status unavailable: {}", id, e);
                UNKNOWN_EXIT_CODE
            }
        };

        if notices.send(ExitNotice { id, exit_code }).is_err() {
            log::warn!("Process {} exited after its watcher stopped", id);
        }
    });
}
