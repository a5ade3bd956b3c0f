use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use bytes::Bytes;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use swell::bencode::{decode, encode, Value};
use swell::client::{self, Config, DownloadError};
use swell::metainfo::{MagnetLink, Metainfo};

/// Download files from the BitTorrent network.
#[derive(Parser)]
#[command(name = "swell", version, about)]
struct Args {
    /// Torrent file.
    #[arg(long, conflicts_with = "magnet", required_unless_present = "magnet")]
    file: Option<PathBuf>,

    /// Magnet link.
    #[arg(long)]
    magnet: Option<String>,

    /// Destination folder.
    #[arg(long, default_value = ".")]
    folder: PathBuf,

    /// Resume the download from the sidecar next to it.
    #[arg(long)]
    resume: bool,

    /// Maximum number of peer connections.
    #[arg(long, default_value_t = 50)]
    peers: usize,

    /// Maximum number of outstanding block requests per peer.
    #[arg(long, default_value_t = 50)]
    requests: usize,

    /// Port reported to trackers.
    #[arg(long, default_value_t = 6881)]
    port: u16,

    /// Log file; without it, logging is disabled.
    #[arg(long)]
    log: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let _log_guard = match init_logging(args.log.as_deref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("cannot open log file: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(
    path: Option<&std::path::Path>,
) -> std::io::Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let Some(path) = path else {
        return Ok(None);
    };

    let file = std::fs::File::create(path)?;
    let (writer, guard) = tracing_appender::non_blocking(file);
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("swell=debug")),
        )
        .with_writer(writer)
        .with_ansi(false)
        .init();
    Ok(Some(guard))
}

async fn run(args: Args) -> Result<(), DownloadError> {
    let config = Config {
        folder: args.folder.clone(),
        resume: args.resume,
        max_peers: args.peers.max(1),
        max_requests: args.requests.max(1),
        port: args.port,
    };

    let meta = if let Some(path) = &args.file {
        println!("Reading metadata from {}.", path.display());
        let raw = std::fs::read(path).map_err(swell::metainfo::MetainfoError::Io)?;
        Arc::new(Metainfo::from_bytes(&raw)?)
    } else {
        let magnet = MagnetLink::parse(args.magnet.as_deref().expect("clap enforces one input"))?;
        println!("Downloading metadata from peers...");
        let raw_info = client::fetch_metadata(&magnet, &config).await?;
        println!("Done.");

        let torrent_path = args.folder.join(format!("{}.torrent", magnet.info_hash));
        match assemble_torrent(&raw_info, &magnet.trackers) {
            Ok(torrent) => {
                if let Err(e) = std::fs::write(&torrent_path, torrent) {
                    eprintln!("cannot write {}: {}", torrent_path.display(), e);
                } else {
                    println!("Wrote metadata to {}.", torrent_path.display());
                }
            }
            Err(e) => eprintln!("cannot assemble torrent file: {}", e),
        }

        Arc::new(Metainfo::from_raw_info(&raw_info, magnet.trackers.clone())?)
    };

    println!(
        "Downloading {} ({} bytes, {} pieces) to {}.",
        meta.name,
        meta.total_length,
        meta.piece_count(),
        args.folder.display(),
    );

    client::download(meta.clone(), config).await?;

    println!("Download of {} complete.", meta.name);
    Ok(())
}

// Wraps raw info bytes into a complete .torrent file with the magnet's
// trackers, so the metadata fetch does not have to be repeated.
fn assemble_torrent(
    raw_info: &[u8],
    trackers: &[String],
) -> Result<Vec<u8>, swell::bencode::BencodeError> {
    let info = decode(raw_info)?;

    let mut root = BTreeMap::new();
    if let Some(first) = trackers.first() {
        root.insert(Bytes::from_static(b"announce"), Value::string(first));
    }
    if !trackers.is_empty() {
        let tiers: Vec<Value> = trackers
            .iter()
            .map(|t| Value::List(vec![Value::string(t)]))
            .collect();
        root.insert(Bytes::from_static(b"announce-list"), Value::List(tiers));
    }
    root.insert(Bytes::from_static(b"info"), info);

    encode(&Value::Dict(root))
}
