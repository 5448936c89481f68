//! `HandoffReceiver`: accepts stream connections from one or more edges,
//! decodes newline-delimited JSON hits, and feeds the enrichment queue.
//! A parallel task tails the failover directory for catch-up replay.

use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use pixl_common::Hit;
use tokio::fs;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info, warn};

use crate::health::HealthCounters;

const CATCH_UP_INTERVAL: Duration = Duration::from_secs(60);

/// Listens on a Unix domain socket, accepting up to
/// `max_concurrent` simultaneous connections, each decoded on its own
/// task and fed into `tx`.
pub async fn run_listener(
    endpoint: PathBuf,
    max_concurrent: usize,
    tx: mpsc::Sender<Hit>,
    counters: Arc<HealthCounters>,
) -> anyhow::Result<()> {
    let _ = std::fs::remove_file(&endpoint);
    if let Some(parent) = endpoint.parent() {
        fs::create_dir_all(parent).await.ok();
    }
    let listener = UnixListener::bind(&endpoint)?;
    info!(endpoint = %endpoint.display(), "handoff receiver listening");

    let permits = Arc::new(Semaphore::new(max_concurrent));

    loop {
        let (stream, _addr) = listener.accept().await?;
        let permit = Arc::clone(&permits);
        let tx = tx.clone();
        let counters = Arc::clone(&counters);
        tokio::spawn(async move {
            let Ok(_guard) = permit.acquire_owned().await else {
                return;
            };
            handle_connection(stream, tx, counters).await;
        });
    }
}

async fn handle_connection(stream: UnixStream, tx: mpsc::Sender<Hit>, counters: Arc<HealthCounters>) {
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => decode_and_forward(&line, &tx, &counters).await,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "handoff connection read error, closing");
                break;
            }
        }
    }
}

async fn decode_and_forward(line: &str, tx: &mpsc::Sender<Hit>, counters: &HealthCounters) {
    if line.trim().is_empty() {
        return;
    }
    match serde_json::from_str::<Hit>(line) {
        Ok(hit) => {
            if tx.send(hit).await.is_err() {
                warn!("enrichment queue closed, dropping hit");
            }
        }
        Err(e) => {
            counters.malformed_lines.fetch_add(1, Ordering::Relaxed);
            warn!(error = %e, "malformed handoff line, skipping");
        }
    }
}

/// Scans `directory` every 60 seconds for `failover_*.jsonl` files not
/// modified today (so a file an edge is still actively writing is left
/// alone), replays each into `tx`, then moves it to `directory/archive/`.
pub async fn run_catch_up(directory: PathBuf, tx: mpsc::Sender<Hit>, counters: Arc<HealthCounters>) {
    let archive_dir = directory.join("archive");
    let mut ticker = tokio::time::interval(CATCH_UP_INTERVAL);
    loop {
        ticker.tick().await;
        if let Err(e) = scan_once(&directory, &archive_dir, &tx, &counters).await {
            warn!(error = %e, "failover catch-up scan failed");
        }
    }
}

async fn scan_once(
    directory: &Path,
    archive_dir: &Path,
    tx: &mpsc::Sender<Hit>,
    counters: &HealthCounters,
) -> anyhow::Result<()> {
    if !directory.exists() {
        return Ok(());
    }
    fs::create_dir_all(archive_dir).await?;

    let today = chrono::Utc::now().date_naive();
    let mut entries = fs::read_dir(directory).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !is_stale_failover_file(&path, today) {
            continue;
        }
        replay_file(&path, tx, counters).await;
        let dest = archive_dir.join(path.file_name().expect("failover file has a name"));
        if let Err(e) = fs::rename(&path, &dest).await {
            warn!(error = %e, file = %path.display(), "failed to archive failover file");
        } else {
            debug!(file = %path.display(), "failover file archived");
        }
    }
    Ok(())
}

fn is_stale_failover_file(path: &Path, today: chrono::NaiveDate) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    let Some(date_part) = name
        .strip_prefix("failover_")
        .and_then(|s| s.strip_suffix(".jsonl"))
    else {
        return false;
    };
    let Ok(file_date) = chrono::NaiveDate::parse_from_str(date_part, "%Y_%m_%d") else {
        return false;
    };
    file_date < today
}

async fn replay_file(path: &Path, tx: &mpsc::Sender<Hit>, counters: &HealthCounters) {
    let Ok(contents) = fs::read_to_string(path).await else {
        warn!(file = %path.display(), "failed to read failover file for replay");
        return;
    };
    let mut replayed = 0u64;
    for line in contents.lines() {
        decode_and_forward(line, tx, counters).await;
        replayed += 1;
    }
    counters.failover_replayed.fetch_add(replayed, Ordering::Relaxed);
    info!(file = %path.display(), replayed, "replayed failover file");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_file_naming_scheme_parses_and_compares_by_day() {
        let today = chrono::NaiveDate::from_ymd_opt(2026, 7, 27).unwrap();
        assert!(is_stale_failover_file(
            Path::new("/tmp/failover_2026_07_26.jsonl"),
            today
        ));
        assert!(!is_stale_failover_file(
            Path::new("/tmp/failover_2026_07_27.jsonl"),
            today
        ));
    }

    #[test]
    fn non_failover_files_are_never_stale() {
        let today = chrono::NaiveDate::from_ymd_opt(2026, 7, 27).unwrap();
        assert!(!is_stale_failover_file(Path::new("/tmp/notes.txt"), today));
    }

    #[tokio::test]
    async fn decode_and_forward_skips_malformed_lines_without_closing() {
        let (tx, mut rx) = mpsc::channel(8);
        let counters = HealthCounters::default();
        decode_and_forward("not json", &tx, &counters).await;
        decode_and_forward("", &tx, &counters).await;
        assert_eq!(counters.malformed_lines.load(Ordering::Relaxed), 1);

        let hit = pixl_common::Hit {
            company_id: "c".into(),
            pixel_id: "p".into(),
            address: "1.2.3.4".into(),
            request_path: "/c/p_SMART.GIF".into(),
            query_string: String::new(),
            headers_json: "{}".into(),
            user_agent: String::new(),
            referrer: String::new(),
            received_at: chrono::Utc::now(),
        };
        let line = serde_json::to_string(&hit).unwrap();
        decode_and_forward(&line, &tx, &counters).await;
        drop(tx);

        let received = rx.recv().await.unwrap();
        assert_eq!(received.company_id, "c");
        assert!(rx.recv().await.is_none());
    }
}
