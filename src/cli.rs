use clap::{Parser, Subcommand};

/// Command line arguments for the BitTorrent client
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands, mirroring the usual BitTorrent client surface:
/// inspect metainfo, talk to a peer, download from a torrent file or a
/// magnet link.
#[derive(Subcommand, Debug)]
#[command(rename_all = "snake_case")]
pub enum Command {
    /// Decode a bencoded value and print it as JSON
    Decode {
        /// The bencoded value to decode
        input: String,
    },
    /// Print metadata about a torrent file
    Info {
        /// Path to the torrent file
        path: String,
    },
    /// Print the peers the tracker returns for a torrent file
    Peers {
        /// Path to the torrent file
        path: String,
    },
    /// Perform the base handshake with a peer
    Handshake {
        /// Path to the torrent file
        path: String,
        /// Peer address as ip:port
        peer: String,
    },
    /// Download a single piece
    DownloadPiece {
        /// Output path for the piece
        #[arg(short, long)]
        output: String,
        /// Path to the torrent file
        path: String,
        /// Index of the piece to download
        piece_index: usize,
    },
    /// Download the whole file
    Download {
        /// Output path for the file
        #[arg(short, long)]
        output: String,
        /// Path to the torrent file
        path: String,
    },
    /// Print the tracker URL and info hash of a magnet link
    MagnetParse {
        /// The magnet URI
        magnet_link: String,
    },
    /// Handshake with a peer discovered from a magnet link
    MagnetHandshake {
        /// The magnet URI
        magnet_link: String,
    },
    /// Fetch metadata via the extension protocol and print it
    MagnetInfo {
        /// The magnet URI
        magnet_link: String,
    },
    /// Download a single piece from a magnet link
    MagnetDownloadPiece {
        /// Output path for the piece
        #[arg(short, long)]
        output: String,
        /// The magnet URI
        magnet_link: String,
        /// Index of the piece to download
        piece_index: usize,
    },
    /// Download the whole file from a magnet link
    MagnetDownload {
        /// Output path for the file
        #[arg(short, long)]
        output: String,
        /// The magnet URI
        magnet_link: String,
    },
}

impl Args {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }
}
