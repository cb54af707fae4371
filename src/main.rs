use std::net::{SocketAddr, SocketAddrV4};

use anyhow::{Context, Result};
use bencode::Bencode;
use once_cell::sync::Lazy;
use torrent::{
    download::Downloader,
    extension,
    magnet_link::MagnetLink,
    metainfo::TorrentMetainfo,
    peer::{Peer, PeerConfig, PeerId},
    tracker::{self, TrackerConfig},
};
use tracing::info;

pub mod bencode;
pub mod cli;
pub mod torrent;
pub mod utils;

pub const PROTOCOL: &str = "BitTorrent protocol";
pub static PEER_ID: Lazy<PeerId> = Lazy::new(utils::generate_peer_id);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = cli::Args::parse();

    match args.command {
        cli::Command::Decode { input } => {
            let decoded_value = Bencode::decode(input.as_bytes())?;
            println!("{}", decoded_value.to_json());
        }
        cli::Command::Info { path } => {
            let torrent = read_torrent(&path)?;
            print!("{}", torrent);
        }
        cli::Command::Peers { path } => {
            let torrent = read_torrent(&path)?;
            for peer in announce(&torrent).await? {
                println!("{}", peer);
            }
        }
        cli::Command::Handshake { path, peer } => handle_handshake(path, peer).await?,
        cli::Command::DownloadPiece {
            output,
            path,
            piece_index,
        } => handle_download(output, path, Some(piece_index)).await?,
        cli::Command::Download { output, path } => handle_download(output, path, None).await?,
        cli::Command::MagnetParse { magnet_link } => {
            println!("{}", MagnetLink::parse(&magnet_link)?);
        }
        cli::Command::MagnetHandshake { magnet_link } => {
            handle_magnet_handshake(magnet_link).await?
        }
        cli::Command::MagnetInfo { magnet_link } => handle_magnet_info(magnet_link).await?,
        cli::Command::MagnetDownloadPiece {
            output,
            magnet_link,
            piece_index,
        } => handle_magnet_download(output, magnet_link, Some(piece_index)).await?,
        cli::Command::MagnetDownload {
            output,
            magnet_link,
        } => handle_magnet_download(output, magnet_link, None).await?,
    }

    Ok(())
}

fn read_torrent(path: &str) -> Result<TorrentMetainfo> {
    let bytes = std::fs::read(path).with_context(|| format!("failed to read {path}"))?;
    TorrentMetainfo::from_bytes(&bytes)
}

async fn announce(torrent: &TorrentMetainfo) -> Result<Vec<SocketAddrV4>> {
    let announce = torrent
        .announce
        .as_deref()
        .context("metainfo has no tracker URL")?;
    tracker::get_peers(
        announce,
        torrent.info_hash(),
        Some(torrent.info.total_length() as u64),
        TrackerConfig::default(),
    )
    .await
}

async fn handle_handshake(path: String, peer: String) -> Result<()> {
    let torrent = read_torrent(&path)?;
    let addr: SocketAddr = peer.parse().context("invalid peer address")?;

    let mut peer = Peer::new(
        addr,
        PeerConfig {
            info_hash: torrent.info_hash(),
            ..Default::default()
        },
    );
    peer.connect().await?;
    let peer_id = peer.peer_id.context("no peer ID received")?;
    println!("Peer ID: {}", hex::encode(peer_id));
    Ok(())
}

async fn handle_download(output: String, path: String, piece_index: Option<usize>) -> Result<()> {
    let torrent = read_torrent(&path)?;
    let downloader = Downloader::from_metainfo(&torrent).await?;
    downloader.download(&output, piece_index).await?;
    info!("wrote {}", output);
    Ok(())
}

/// Parses a magnet link and asks its tracker for peers.
async fn magnet_bootstrap(magnet_link: &str) -> Result<(MagnetLink, Vec<SocketAddrV4>)> {
    let magnet = MagnetLink::parse(magnet_link)?;
    let tracker_url = magnet
        .tracker
        .as_deref()
        .context("magnet link has no tracker URL")?;

    let peers = tracker::get_peers(
        tracker_url,
        magnet.info_hash,
        None,
        TrackerConfig::default(),
    )
    .await?;
    if peers.is_empty() {
        anyhow::bail!("no peers available");
    }
    Ok((magnet, peers))
}

/// Connects to the first peer the tracker returned.
async fn connect_first_peer(magnet: &MagnetLink, peers: &[SocketAddrV4]) -> Result<Peer> {
    let mut peer = Peer::new(
        SocketAddr::V4(peers[0]),
        PeerConfig {
            info_hash: magnet.info_hash,
            ..Default::default()
        },
    );
    peer.connect().await?;
    Ok(peer)
}

async fn handle_magnet_handshake(magnet_link: String) -> Result<()> {
    let (magnet, peers) = magnet_bootstrap(&magnet_link).await?;
    let mut peer = connect_first_peer(&magnet, &peers).await?;

    let ut_metadata_id = extension::negotiate(&mut peer).await?;
    let peer_id = peer.peer_id.context("no peer ID received")?;
    println!("Peer ID: {}", hex::encode(peer_id));
    println!("Peer Metadata Extension ID: {}", ut_metadata_id);
    Ok(())
}

async fn handle_magnet_info(magnet_link: String) -> Result<()> {
    let (magnet, peers) = magnet_bootstrap(&magnet_link).await?;
    let mut peer = connect_first_peer(&magnet, &peers).await?;

    let torrent_info = extension::fetch_info(&mut peer, magnet.info_hash).await?;
    let torrent = TorrentMetainfo::new(magnet.tracker.clone(), torrent_info, magnet.info_hash);
    print!("{}", torrent);
    Ok(())
}

async fn handle_magnet_download(
    output: String,
    magnet_link: String,
    piece_index: Option<usize>,
) -> Result<()> {
    let (magnet, peers) = magnet_bootstrap(&magnet_link).await?;

    // fetch the metadata over a throwaway connection; the scheduler opens
    // its own connections afterwards
    let mut peer = connect_first_peer(&magnet, &peers).await?;
    let torrent_info = extension::fetch_info(&mut peer, magnet.info_hash).await?;
    peer.close();

    let downloader = Downloader::from_parts(
        magnet.info_hash,
        torrent_info.piece_hashes()?,
        torrent_info.piece_length,
        torrent_info.total_length(),
        peers,
    )?;
    downloader.download(&output, piece_index).await?;
    info!("wrote {}", output);
    Ok(())
}
