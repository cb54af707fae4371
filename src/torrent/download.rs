//! Piece scheduling and download orchestration.
//!
//! A download is a FIFO queue of piece jobs worked by a pool of tasks, one
//! per peer connection. Workers pull jobs, drive the wire protocol, verify
//! each piece against its SHA-1 digest and spill it to disk; verified pieces
//! collect in a min-heap so the final file can be assembled in index order
//! no matter which worker finished first.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};
use std::net::{SocketAddr, SocketAddrV4};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use sha1::{Digest, Sha1};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use super::error::TorrentError;
use super::message::Message;
use super::metainfo::{piece_size, TorrentMetainfo};
use super::peer::{Peer, PeerConfig};
use super::tracker::{self, TrackerConfig};

/// Blocks are requested in 16 KiB units; only a piece's final block may be
/// shorter.
pub const BLOCK_SIZE: usize = 16 * 1024;

/// Number of block requests kept in flight per peer before reading the
/// matching piece responses back.
pub const REQUEST_PIPELINE: usize = 5;

/// Upper bound on concurrent peer connections.
const POOL_THRESHOLD: usize = 10;

/// One piece's journey from queue to spill file.
#[derive(Debug)]
struct PieceJob {
    index: usize,
    expected_length: usize,
    expected_hash: [u8; 20],
    downloaded_len: usize,
    buffer: Vec<u8>,
    spill_path: Option<PathBuf>,
}

impl PieceJob {
    /// Clears download progress so the job can be requeued after a failure.
    fn reset(&mut self) {
        self.downloaded_len = 0;
        self.buffer = Vec::new();
        self.spill_path = None;
    }
}

// Jobs are ordered by piece index for the completion heap.
impl PartialEq for PieceJob {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}
impl Eq for PieceJob {}
impl PartialOrd for PieceJob {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for PieceJob {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.index.cmp(&other.index)
    }
}

type WorkQueue = Arc<Mutex<VecDeque<PieceJob>>>;
type CompletedHeap = Arc<Mutex<BinaryHeap<Reverse<PieceJob>>>>;

/// Manages the download of a torrent, coordinating peer connections and
/// piece retrieval.
pub struct Downloader {
    info_hash: [u8; 20],
    piece_hashes: Vec<[u8; 20]>,
    piece_length: usize,
    total_length: usize,
    peers: Vec<SocketAddrV4>,
}

impl Downloader {
    /// Creates a downloader for a `.torrent` metainfo, contacting the
    /// tracker for peers.
    pub async fn from_metainfo(torrent: &TorrentMetainfo) -> Result<Self> {
        let announce = torrent
            .announce
            .as_deref()
            .context("metainfo has no tracker URL")?;
        let peers = tracker::get_peers(
            announce,
            torrent.info_hash(),
            Some(torrent.info.total_length() as u64),
            TrackerConfig::default(),
        )
        .await?;

        Self::from_parts(
            torrent.info_hash(),
            torrent.info.piece_hashes()?,
            torrent.info.piece_length,
            torrent.info.total_length(),
            peers,
        )
    }

    /// Creates a downloader from already-resolved parts, as the magnet path
    /// does once the metadata fetch has completed.
    pub fn from_parts(
        info_hash: [u8; 20],
        piece_hashes: Vec<[u8; 20]>,
        piece_length: usize,
        total_length: usize,
        peers: Vec<SocketAddrV4>,
    ) -> Result<Self> {
        if peers.is_empty() {
            bail!("no peers available");
        }
        if piece_hashes.is_empty() {
            bail!("torrent has no pieces");
        }
        Ok(Self {
            info_hash,
            piece_hashes,
            piece_length,
            total_length,
            peers,
        })
    }

    /// Downloads every piece (or just `piece_index`, when given) and
    /// assembles the verified pieces into `out_path`.
    pub async fn download(&self, out_path: &str, piece_index: Option<usize>) -> Result<()> {
        let jobs = self.build_jobs(piece_index);
        if jobs.is_empty() {
            bail!(
                "piece index {} out of range (torrent has {} pieces)",
                piece_index.unwrap_or(0),
                self.piece_hashes.len()
            );
        }
        let expected = jobs.len();

        // one task per peer connection, a single task in single-piece mode
        let pool_size = if piece_index.is_some() {
            1
        } else {
            self.peers
                .len()
                .min(expected)
                .min(POOL_THRESHOLD)
        };
        info!("downloading {} pieces with {} peer workers", expected, pool_size);

        let queue: WorkQueue = Arc::new(Mutex::new(jobs));
        let completed: CompletedHeap = Arc::new(Mutex::new(BinaryHeap::new()));
        let started = Instant::now();

        let mut handles = Vec::with_capacity(pool_size);
        for worker_index in 0..pool_size {
            let addr = self.peers[worker_index];
            let config = PeerConfig {
                info_hash: self.info_hash,
                ..Default::default()
            };
            let queue = Arc::clone(&queue);
            let completed = Arc::clone(&completed);
            let out_path = out_path.to_owned();
            handles.push(tokio::spawn(worker_loop(
                worker_index,
                addr,
                config,
                queue,
                completed,
                out_path,
            )));
        }
        for handle in handles {
            handle.await.context("worker task panicked")?;
        }

        let heap = std::mem::take(&mut *completed.lock().unwrap());
        if heap.len() != expected {
            let queued = queue.lock().unwrap().len();
            bail!(
                "download incomplete: {} of {} pieces verified, {} left in the queue",
                heap.len(),
                expected,
                queued
            );
        }

        assemble(heap, out_path).await?;
        info!(
            "downloaded {} pieces in {} ms",
            expected,
            started.elapsed().as_millis()
        );
        Ok(())
    }

    /// Builds jobs in ascending index order; when `only` is given the queue
    /// holds that one piece.
    fn build_jobs(&self, only: Option<usize>) -> VecDeque<PieceJob> {
        let total_pieces = self.piece_hashes.len();
        let mut jobs = VecDeque::new();

        for (index, &expected_hash) in self.piece_hashes.iter().enumerate() {
            if only.map_or(true, |only| only == index) {
                jobs.push_back(PieceJob {
                    index,
                    expected_length: piece_size(
                        index,
                        total_pieces,
                        self.piece_length,
                        self.total_length,
                    ),
                    expected_hash,
                    downloaded_len: 0,
                    buffer: Vec::new(),
                    spill_path: None,
                });
            }
        }
        debug_assert_eq!(
            (0..total_pieces)
                .map(|index| piece_size(index, total_pieces, self.piece_length, self.total_length))
                .sum::<usize>(),
            self.total_length,
            "piece lengths must sum to the total"
        );
        jobs
    }
}

/// Works the queue until it runs dry, or until the bound peer fails.
///
/// Each worker is permanently bound to one peer; when a piece fails the job
/// goes back on the queue for another worker and this worker retires, since
/// it has no spare peer to retry with.
async fn worker_loop(
    worker_index: usize,
    addr: SocketAddrV4,
    config: PeerConfig,
    queue: WorkQueue,
    completed: CompletedHeap,
    out_path: String,
) {
    let mut peer = Peer::new(SocketAddr::V4(addr), config);

    loop {
        let job = queue.lock().unwrap().pop_front();
        let Some(mut job) = job else { break };
        let index = job.index;
        info!("worker #{} downloading piece {} from {}", worker_index, index, addr);

        match download_piece(&mut peer, &mut job, &out_path).await {
            Ok(()) => completed.lock().unwrap().push(Reverse(job)),
            Err(err) => {
                warn!("worker #{} failed piece {}: {:#}", worker_index, index, err);
                job.reset();
                queue.lock().unwrap().push_back(job);
                peer.close();
                break;
            }
        }
    }
    info!("worker #{} exiting", worker_index);
}

/// Downloads, verifies and spills a single piece over an owned peer
/// connection.
async fn download_piece(peer: &mut Peer, job: &mut PieceJob, out_path: &str) -> Result<()> {
    peer.prepare_for_requests().await?;

    job.downloaded_len = 0;
    job.buffer = vec![0u8; job.expected_length];

    let mut requests_sent = 0usize;
    let mut batch = 0usize;
    while job.downloaded_len < job.expected_length {
        let begin = requests_sent * BLOCK_SIZE;
        let length = (job.expected_length - job.downloaded_len).min(BLOCK_SIZE);

        peer.send_message(&Message::Request {
            index: job.index as u32,
            begin: begin as u32,
            length: length as u32,
        })
        .await?;
        requests_sent += 1;
        batch += 1;
        // counted at request time; a dropped block leaves a zeroed gap that
        // the hash check below catches
        job.downloaded_len += length;

        if batch == REQUEST_PIPELINE || job.downloaded_len == job.expected_length {
            receive_blocks(peer, job, batch).await?;
            batch = 0;
        }
    }

    let mut hasher = Sha1::new();
    hasher.update(&job.buffer);
    let digest: [u8; 20] = hasher.finalize().into();
    if digest != job.expected_hash {
        return Err(TorrentError::HashMismatch { index: job.index }.into());
    }

    let spill = PathBuf::from(format!("{}_piece_{}", out_path, job.index));
    tokio::fs::write(&spill, &job.buffer)
        .await
        .map_err(TorrentError::Io)?;
    job.spill_path = Some(spill);
    job.buffer = Vec::new(); // the data now lives in the spill file
    info!("piece {} verified", job.index);
    Ok(())
}

/// Reads back exactly one batch of piece responses and places the blocks.
async fn receive_blocks(peer: &mut Peer, job: &mut PieceJob, expected: usize) -> Result<()> {
    for _ in 0..expected {
        match peer.receive_data_message().await? {
            Message::Piece {
                index,
                begin,
                block,
            } => {
                if index as usize != job.index {
                    return Err(TorrentError::ProtocolViolation(format!(
                        "got a block of piece {} while downloading piece {}",
                        index, job.index
                    ))
                    .into());
                }
                let begin = begin as usize;
                if begin + block.len() > job.expected_length {
                    return Err(TorrentError::ProtocolViolation(format!(
                        "block at {}+{} overruns piece of {} bytes",
                        begin,
                        block.len(),
                        job.expected_length
                    ))
                    .into());
                }
                job.buffer[begin..begin + block.len()].copy_from_slice(&block);
            }
            other => {
                return Err(TorrentError::ProtocolViolation(format!(
                    "expected piece message, got {other:?}"
                ))
                .into())
            }
        }
    }
    Ok(())
}

/// Streams the verified pieces into the output file in ascending index
/// order, deleting each spill file as it is consumed.
async fn assemble(mut heap: BinaryHeap<Reverse<PieceJob>>, out_path: &str) -> Result<()> {
    let mut output = tokio::fs::File::create(out_path)
        .await
        .map_err(TorrentError::Io)
        .with_context(|| format!("failed to open output file {out_path}"))?;

    while let Some(Reverse(job)) = heap.pop() {
        let spill = job
            .spill_path
            .as_ref()
            .context("verified piece has no spill file")?;
        let mut piece_file = tokio::fs::File::open(spill)
            .await
            .map_err(TorrentError::Io)?;
        tokio::io::copy(&mut piece_file, &mut output)
            .await
            .map_err(TorrentError::Io)?;
        tokio::fs::remove_file(spill)
            .await
            .map_err(TorrentError::Io)?;
    }

    output.flush().await.map_err(TorrentError::Io)?;
    Ok(())
}
