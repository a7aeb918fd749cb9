#![allow(clippy::redundant_pub_crate)]

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::command::{DriverCommand, Responder};
use crate::error::DriverError;
use crate::session::EngineSession;
use crate::store::ResumeStore;
use crate::types::{EngineAlert, InfoHash};

const ALERT_POLL_INTERVAL: Duration = Duration::from_millis(200);

pub(crate) fn spawn(
    session: Box<dyn EngineSession>,
    store: ResumeStore,
    mut commands: mpsc::Receiver<DriverCommand>,
) {
    tokio::spawn(async move {
        let mut worker = Worker {
            session,
            store,
            pending_reads: Vec::new(),
        };
        let mut poll = tokio::time::interval(ALERT_POLL_INTERVAL);
        loop {
            tokio::select! {
                command = commands.recv() => {
                    match command {
                        Some(command) => worker.handle(command).await,
                        None => break,
                    }
                }
                _ = poll.tick() => worker.pump().await,
            }
        }
        // Let parked operations settle before the session drops.
        worker.pump().await;
    });
}

struct PendingRead {
    hash: InfoHash,
    piece: u32,
    requested: bool,
    respond_to: Responder<Vec<u8>>,
}

struct Worker {
    session: Box<dyn EngineSession>,
    store: ResumeStore,
    pending_reads: Vec<PendingRead>,
}

impl Worker {
    async fn handle(&mut self, command: DriverCommand) {
        match command {
            DriverCommand::Add { source, respond_to } => {
                let save_path = self.store.downloads_root().to_path_buf();
                let result = self
                    .session
                    .add_torrent(&source, &save_path)
                    .await
                    .map_err(engine_err("add_torrent"));
                respond(respond_to, result);
            }
            DriverCommand::Remove {
                hash,
                delete_files,
                respond_to,
            } => {
                let result = self
                    .session
                    .remove_torrent(&hash, delete_files)
                    .await
                    .map_err(engine_err("remove_torrent"));
                self.drop_pending_for(&hash);
                respond(respond_to, result);
            }
            DriverCommand::HasMetadata { hash, respond_to } => {
                let result = self
                    .session
                    .has_metadata(&hash)
                    .await
                    .map_err(engine_err("has_metadata"));
                respond(respond_to, result);
            }
            DriverCommand::TorrentFiles { hash, respond_to } => {
                let result = self
                    .session
                    .torrent_files(&hash)
                    .await
                    .map_err(engine_err("torrent_files"));
                respond(respond_to, result);
            }
            DriverCommand::PieceLength { hash, respond_to } => {
                let result = self
                    .session
                    .piece_length(&hash)
                    .await
                    .map_err(engine_err("piece_length"));
                respond(respond_to, result);
            }
            DriverCommand::NumPieces { hash, respond_to } => {
                let result = self
                    .session
                    .num_pieces(&hash)
                    .await
                    .map_err(engine_err("num_pieces"));
                respond(respond_to, result);
            }
            DriverCommand::PrioritizeFiles {
                hash,
                priorities,
                respond_to,
            } => {
                let result = self
                    .session
                    .prioritize_files(&hash, &priorities)
                    .await
                    .map_err(engine_err("prioritize_files"));
                respond(respond_to, result);
            }
            DriverCommand::PiecePriority {
                hash,
                piece,
                priority,
                respond_to,
            } => {
                let result = self
                    .session
                    .piece_priority(&hash, piece, priority)
                    .await
                    .map_err(engine_err("piece_priority"));
                respond(respond_to, result);
            }
            DriverCommand::HavePiece {
                hash,
                piece,
                respond_to,
            } => {
                let result = self
                    .session
                    .have_piece(&hash, piece)
                    .await
                    .map_err(engine_err("have_piece"));
                respond(respond_to, result);
            }
            DriverCommand::ReadPiece {
                hash,
                piece,
                respond_to,
            } => {
                self.pending_reads.push(PendingRead {
                    hash,
                    piece,
                    requested: false,
                    respond_to,
                });
                // Pieces already on disk complete without waiting for the
                // next poll round.
                if self.service_pending_reads().await {
                    self.drain_alerts().await;
                }
            }
            DriverCommand::Status { hash, respond_to } => {
                let result = self
                    .session
                    .status(&hash)
                    .await
                    .map_err(engine_err("status"));
                respond(respond_to, result);
            }
            DriverCommand::Pause { hash, respond_to } => {
                let result = self.session.pause(&hash).await.map_err(engine_err("pause"));
                respond(respond_to, result);
            }
            DriverCommand::Resume { hash, respond_to } => {
                let result = self
                    .session
                    .resume(&hash)
                    .await
                    .map_err(engine_err("resume"));
                respond(respond_to, result);
            }
            DriverCommand::ForceRecheck { hash, respond_to } => {
                let result = self
                    .session
                    .force_recheck(&hash)
                    .await
                    .map_err(engine_err("force_recheck"));
                respond(respond_to, result);
            }
            DriverCommand::SaveResumeData { hash, respond_to } => {
                let result = self
                    .session
                    .request_save_resume(&hash)
                    .await
                    .map_err(engine_err("save_resume_data"));
                respond(respond_to, result);
            }
            DriverCommand::RemoveResumeData { hash, respond_to } => {
                let result = self
                    .store
                    .remove_fastresume(&hash)
                    .map_err(|source| DriverError::Io {
                        path: self.store.fastresume_path(&hash),
                        source,
                    });
                respond(respond_to, result);
            }
            DriverCommand::ProcessAlerts { respond_to } => {
                self.pump().await;
                respond(respond_to, Ok(()));
            }
        }
    }

    /// One alert-pump round: request reads whose pieces arrived, drain the
    /// engine queue, complete parked operations.
    async fn pump(&mut self) {
        self.service_pending_reads().await;
        self.drain_alerts().await;
        // Pieces that arrived in this round get their read issued now
        // instead of waiting out another poll interval, and their alerts
        // drained in the same round.
        if self.service_pending_reads().await {
            self.drain_alerts().await;
        }
    }

    async fn drain_alerts(&mut self) {
        match self.session.poll_alerts().await {
            Ok(alerts) => {
                for alert in alerts {
                    self.apply_alert(alert);
                }
            }
            Err(err) => warn!(error = %err, "engine alert polling failed"),
        }
    }

    async fn service_pending_reads(&mut self) -> bool {
        let mut issued = false;
        let mut index = 0;
        while index < self.pending_reads.len() {
            if self.pending_reads[index].requested {
                index += 1;
                continue;
            }
            let hash = self.pending_reads[index].hash.clone();
            let piece = self.pending_reads[index].piece;
            match self.session.have_piece(&hash, piece).await {
                Ok(true) => match self.session.request_piece_read(&hash, piece).await {
                    Ok(()) => {
                        self.pending_reads[index].requested = true;
                        issued = true;
                        index += 1;
                    }
                    Err(err) => {
                        let pending = self.pending_reads.swap_remove(index);
                        respond(pending.respond_to, Err(engine_err("read_piece")(err)));
                    }
                },
                Ok(false) => {
                    index += 1;
                }
                Err(err) => {
                    let pending = self.pending_reads.swap_remove(index);
                    respond(pending.respond_to, Err(engine_err("have_piece")(err)));
                }
            }
        }
        issued
    }

    fn apply_alert(&mut self, alert: EngineAlert) {
        match alert {
            EngineAlert::ReadPiece { hash, piece, data } => {
                let mut index = 0;
                while index < self.pending_reads.len() {
                    let matches = self.pending_reads[index].hash == hash
                        && self.pending_reads[index].piece == piece;
                    if matches {
                        let pending = self.pending_reads.swap_remove(index);
                        respond(pending.respond_to, Ok(data.clone()));
                    } else {
                        index += 1;
                    }
                }
            }
            EngineAlert::ResumeData { hash, payload } => {
                if let Err(err) = self.store.write_fastresume(&hash, &payload) {
                    warn!(
                        error = %err,
                        torrent = %hash,
                        "failed to persist fastresume payload"
                    );
                }
            }
            EngineAlert::MetadataReceived { hash } => {
                debug!(torrent = %hash, "torrent metadata received");
            }
            EngineAlert::Error { hash, message } => {
                warn!(torrent = ?hash, message = %message, "engine reported an error");
            }
        }
    }

    fn drop_pending_for(&mut self, hash: &InfoHash) {
        let mut index = 0;
        while index < self.pending_reads.len() {
            if self.pending_reads[index].hash == *hash {
                let pending = self.pending_reads.swap_remove(index);
                respond(
                    pending.respond_to,
                    Err(DriverError::TorrentNotFound { hash: hash.clone() }),
                );
            } else {
                index += 1;
            }
        }
    }
}

fn respond<T>(responder: Responder<T>, result: Result<T, DriverError>) {
    // The caller may have given up waiting; that is not an error here.
    let _ = responder.send(result);
}

fn engine_err(operation: &'static str) -> impl FnOnce(anyhow::Error) -> DriverError {
    move |source| DriverError::Engine { operation, source }
}
