//! Upstream link (spec §4.8, §6): two Unix-domain sockets — one inbound for
//! commands, one outbound for decoded data — each accepted exactly once.
//! Socket plumbing and framing are in scope; the process on the other end
//! is not (spec §1).

use std::path::Path;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::FleetConfig;
use crate::error::ConcentratorError;
use crate::fleet::FleetController;
use crate::model::{BlunoMappingEntry, Command, CommandKind, DataMessage, Packet, TimestampEntry};

fn bind(path: &Path) -> Result<UnixListener, ConcentratorError> {
    let _ = std::fs::remove_file(path);
    UnixListener::bind(path).map_err(|source| ConcentratorError::SocketBind {
        path: path.display().to_string(),
        source,
    })
}

/// Accept exactly one connection on each socket, then run both the
/// command-reader and data-writer loops until `cancel` fires.
pub async fn serve(
    notif_path: &Path,
    data_path: &Path,
    fleet: Arc<Mutex<FleetController>>,
    fleet_config: &FleetConfig,
    batch_tx: mpsc::UnboundedSender<Vec<Packet>>,
    mut batch_rx: mpsc::UnboundedReceiver<Vec<Packet>>,
    cancel: CancellationToken,
) -> Result<(), ConcentratorError> {
    let notif_listener = bind(notif_path)?;
    let data_listener = bind(data_path)?;

    info!(path = %notif_path.display(), "waiting for notif connection");
    let (notif_stream, _) = notif_listener
        .accept()
        .await
        .map_err(ConcentratorError::SocketAccept)?;

    info!(path = %data_path.display(), "waiting for data connection");
    let (data_stream, _) = data_listener
        .accept()
        .await
        .map_err(ConcentratorError::SocketAccept)?;

    let (mut data_read, mut data_write) = data_stream.into_split();
    // Silence unused-read-half warnings; the data socket is outbound-only
    // per spec §6, but `UnixStream` does not offer a write-only accept.
    tokio::spawn(async move {
        let mut buf = [0u8; 1];
        let _ = tokio::io::AsyncReadExt::read(&mut data_read, &mut buf).await;
    });

    write_bluno_mapping(&mut data_write, fleet_config).await;

    // time_sync replies are one of the data socket's three outbound shapes
    // (spec §6), not a reply on the inbound notif connection, so they are
    // funnelled through the same writer task as packet batches.
    let (timesync_tx, mut timesync_rx) = mpsc::unbounded_channel::<Vec<TimestampEntry>>();

    let reader_cancel = cancel.clone();
    let reader = tokio::spawn(read_commands(notif_stream, fleet.clone(), batch_tx, timesync_tx, reader_cancel));

    let writer_cancel = cancel.clone();
    let writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = writer_cancel.cancelled() => return,
                batch = batch_rx.recv() => {
                    match batch {
                        Some(packets) => {
                            if write_message(&mut data_write, &DataMessage::Packets { packets }).await.is_err() {
                                return;
                            }
                        }
                        None => return,
                    }
                }
                timestamps = timesync_rx.recv() => {
                    match timestamps {
                        Some(timestamps) => {
                            if write_message(&mut data_write, &DataMessage::Timestamps { timestamps }).await.is_err() {
                                return;
                            }
                        }
                        None => return,
                    }
                }
            }
        }
    });

    let _ = reader.await;
    let _ = writer.await;
    Ok(())
}

async fn write_bluno_mapping(write: &mut (impl AsyncWriteExt + Unpin), config: &FleetConfig) {
    let mapping = config
        .peripherals
        .iter()
        .map(|p| BlunoMappingEntry {
            num: p.num,
            username: p.username.clone(),
        })
        .collect();
    let _ = write_message(write, &DataMessage::BlunoMapping { bluno_mapping: mapping }).await;
}

async fn write_message(write: &mut (impl AsyncWriteExt + Unpin), message: &DataMessage) -> std::io::Result<()> {
    let mut line = serde_json::to_vec(message).expect("DataMessage always serializes");
    line.push(b'\n');
    write.write_all(&line).await
}

/// Read newline-delimited [`Command`] JSON from the notif socket and act on
/// each one. The notif socket is inbound-only (spec §4.8/§6); a `time_sync`
/// command's reply is handed to `timesync_tx`, which feeds the same data
/// socket writer that sends `packets`/`bluno_mapping`.
async fn read_commands(
    stream: UnixStream,
    fleet: Arc<Mutex<FleetController>>,
    batch_tx: mpsc::UnboundedSender<Vec<Packet>>,
    timesync_tx: mpsc::UnboundedSender<Vec<TimestampEntry>>,
    cancel: CancellationToken,
) {
    let mut lines = BufReader::new(stream).lines();

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            line = lines.next_line() => line,
        };

        let line = match next {
            Ok(Some(line)) => line,
            Ok(None) => {
                info!("notif socket closed by peer");
                return;
            }
            Err(e) => {
                warn!(error = %e, "notif socket read error");
                return;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        let command: Command = match serde_json::from_str(&line) {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, line = %line, "malformed command, ignored");
                continue;
            }
        };

        handle_command(command, &fleet, &batch_tx, &timesync_tx).await;
    }
}

async fn handle_command(
    command: Command,
    fleet: &Arc<Mutex<FleetController>>,
    batch_tx: &mpsc::UnboundedSender<Vec<Packet>>,
    timesync_tx: &mpsc::UnboundedSender<Vec<TimestampEntry>>,
) {
    match command.cmd {
        CommandKind::Resume => {
            fleet.lock().await.resume(batch_tx.clone()).await;
        }
        CommandKind::Pause => {
            fleet.lock().await.pause().await;
        }
        CommandKind::TimeSync => {
            let t_one = command.t_one.unwrap_or_default();
            let timestamps = fleet.lock().await.time_sync_reply(t_one);
            let _ = timesync_tx.send(timestamps);
        }
    }
}
