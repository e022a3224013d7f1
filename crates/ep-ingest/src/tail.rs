//! Tail Source (C2): watches one log file, emitting appended lines with
//! rotation/truncation recovery. One task per file, restartable from a
//! persisted (inode, offset) pair.

use std::io::SeekFrom;
use std::os::unix::fs::MetadataExt;
use std::path::PathBuf;
use std::time::Duration;

use ep_types::LogKind;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::mpsc;

const MAX_LINE_BYTES_HARD_CAP: usize = 1_048_576;
const TRUNCATION_MARKER: &[u8] = b"...[truncated]";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileOffset {
    pub inode: u64,
    pub offset: u64,
}

#[derive(Debug, Clone)]
pub struct RawLine {
    pub line: String,
    pub log_kind: LogKind,
    pub source_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct WatchedFile {
    pub path: PathBuf,
    pub log_kind: LogKind,
}

enum State {
    Opening,
    Reading { file: File, inode: u64, offset: u64, buf: Vec<u8> },
}

/// Runs until `cancel` fires, emitting `RawLine`s on `tx`. Send blocks when
/// `tx` is full — that back-pressure is what stalls an upstream-saturated
/// pipeline before anything is dropped.
pub async fn run(
    watched: WatchedFile,
    start_at: FileOffset,
    tx: mpsc::Sender<RawLine>,
    mut cancel: tokio::sync::watch::Receiver<bool>,
    poll_interval: Duration,
    stats: crate::stats::IngestStatsHandle,
) {
    let mut state = State::Opening;
    let mut resume = start_at;

    while !*cancel.borrow() {
        state = match state {
            State::Opening => match open_at(&watched.path, resume).await {
                Ok((file, inode, offset)) => {
                    stats.inc_files_processed();
                    State::Reading { file, inode, offset, buf: Vec::new() }
                }
                Err(e) => {
                    tracing::warn!(path = %watched.path.display(), error = %e, "tail open failed, retrying");
                    stats.inc_errors();
                    wait_or_cancel(poll_interval, &mut cancel).await;
                    State::Opening
                }
            },
            State::Reading { mut file, inode, mut offset, mut buf } => {
                match tokio::fs::metadata(&watched.path).await {
                    Err(_) => {
                        resume = FileOffset { inode, offset };
                        State::Opening
                    }
                    Ok(meta) if meta.ino() != inode || meta.len() < offset => {
                        // Rotation or truncation: discard any buffered partial
                        // line, close, and reopen from the start.
                        resume = FileOffset { inode: 0, offset: 0 };
                        State::Opening
                    }
                    Ok(_) => {
                        let mut chunk = vec![0u8; 64 * 1024];
                        match file.read(&mut chunk).await {
                            Ok(0) => {
                                wait_or_cancel(poll_interval, &mut cancel).await;
                                State::Reading { file, inode, offset, buf }
                            }
                            Ok(n) => {
                                offset += n as u64;
                                buf.extend_from_slice(&chunk[..n]);
                                if !emit_complete_lines(&mut buf, &watched, &tx, &stats, &mut cancel).await {
                                    return;
                                }
                                State::Reading { file, inode, offset, buf }
                            }
                            Err(e) => {
                                tracing::warn!(path = %watched.path.display(), error = %e, "tail read error");
                                stats.inc_errors();
                                State::Reading { file, inode, offset, buf }
                            }
                        }
                    }
                }
            }
        };
    }
}

async fn wait_or_cancel(interval: Duration, cancel: &mut tokio::sync::watch::Receiver<bool>) {
    tokio::select! {
        _ = tokio::time::sleep(interval) => {}
        _ = cancel.changed() => {}
    }
}

async fn open_at(path: &PathBuf, resume: FileOffset) -> std::io::Result<(File, u64, u64)> {
    let mut file = File::open(path).await?;
    let meta = file.metadata().await?;
    let inode = meta.ino();
    let offset = if inode == resume.inode && resume.offset <= meta.len() {
        resume.offset
    } else {
        0
    };
    file.seek(SeekFrom::Start(offset)).await?;
    Ok((file, inode, offset))
}

/// Drains complete (newline-terminated) lines from `buf` into `tx`. Returns
/// `false` if the receiver was dropped and the caller should stop entirely.
async fn emit_complete_lines(
    buf: &mut Vec<u8>,
    watched: &WatchedFile,
    tx: &mpsc::Sender<RawLine>,
    stats: &crate::stats::IngestStatsHandle,
    cancel: &mut tokio::sync::watch::Receiver<bool>,
) -> bool {
    loop {
        let Some(newline_pos) = buf.iter().position(|&b| b == b'\n') else {
            if buf.len() > MAX_LINE_BYTES_HARD_CAP {
                tracing::warn!(path = %watched.path.display(), "line exceeds max size before newline, truncating");
                stats.inc_truncated_lines();
                buf.truncate(MAX_LINE_BYTES_HARD_CAP);
                buf.extend_from_slice(TRUNCATION_MARKER);
            }
            return true;
        };
        let mut raw: Vec<u8> = buf.drain(..=newline_pos).collect();
        raw.pop(); // drop the newline
        if raw.last() == Some(&b'\r') {
            raw.pop();
        }
        if raw.len() > MAX_LINE_BYTES_HARD_CAP {
            raw.truncate(MAX_LINE_BYTES_HARD_CAP);
            raw.extend_from_slice(TRUNCATION_MARKER);
            stats.inc_truncated_lines();
        }
        let line = String::from_utf8_lossy(&raw).into_owned();
        stats.inc_lines_read();
        let item = RawLine {
            line,
            log_kind: watched.log_kind,
            source_path: watched.path.clone(),
        };
        tokio::select! {
            result = tx.send(item) => {
                if result.is_err() {
                    return false;
                }
            }
            _ = cancel.changed() => {
                if *cancel.borrow() {
                    return false;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tokio::sync::{mpsc, watch};

    #[tokio::test]
    async fn emits_appended_lines_and_stops_on_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("main.log");
        std::fs::write(&path, "first line\n").unwrap();

        let (tx, mut rx) = mpsc::channel(16);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let stats = crate::stats::IngestStatsHandle::new();

        let watched = WatchedFile { path: path.clone(), log_kind: LogKind::Main };
        let handle = tokio::spawn(run(
            watched,
            FileOffset::default(),
            tx,
            cancel_rx,
            Duration::from_millis(20),
            stats.clone(),
        ));

        let first = rx.recv().await.unwrap();
        assert_eq!(first.line, "first line");

        {
            let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
            writeln!(f, "second line").unwrap();
        }
        let second = rx.recv().await.unwrap();
        assert_eq!(second.line, "second line");

        cancel_tx.send(true).unwrap();
        let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;
    }
}
