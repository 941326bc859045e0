use clap::{Parser, Subcommand, ValueEnum};
use haas::{HaasConfig, HaasNode, StorageMode};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const DEFAULT_CONFIG_PATH: &str = "config/haas.yaml";

#[derive(Parser)]
#[command(name = "haas")]
#[command(about = "Content-addressed chunk storage placed on a consistent-hash ring")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Layout {
    /// Self-contained chunk messages
    Network,
    /// Shared data blobs plus per-file headers
    Dedup,
}

impl From<Layout> for StorageMode {
    fn from(layout: Layout) -> Self {
        match layout {
            Layout::Network => StorageMode::Network,
            Layout::Dedup => StorageMode::Dedup,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Split a file into chunks and record its metadata
    Chunk {
        /// Path to the file to chunk
        #[arg(short, long)]
        file: PathBuf,
        /// Chunk size in bytes (defaults to the configured size)
        #[arg(short = 's', long)]
        chunk_size: Option<u32>,
        /// Storage layout (defaults to the configured layout)
        #[arg(short, long, value_enum)]
        layout: Option<Layout>,
        /// Configuration file path
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: String,
    },
    /// Rebuild a file from its metadata record
    Join {
        /// Metadata key: `{digest}.meta` or `{digest}`
        #[arg(short, long)]
        meta: String,
        /// Configuration file path
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: String,
    },
    /// Show the host responsible for a chunk path
    WhereTo {
        /// Chunk path `{config_id}-{node_id}-{chunk_hash}`
        cpath: String,
        /// Configuration file path
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: String,
    },
    /// Show the chunk path a chunk hash maps to
    BucketPath {
        /// Chunk digest
        chunk_hash: String,
        /// Configuration file path
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: String,
    },
    /// Turn a dedup-layout chunk into a self-contained message
    Mobilize {
        /// Digest of the file the chunk belongs to
        #[arg(short, long)]
        file_hash: String,
        /// Chunk digest
        #[arg(short = 'k', long)]
        chunk_hash: String,
        /// Write the message to this path instead of the reassembly bucket
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Configuration file path
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: String,
    },
    /// Decode a stored message and print it as JSON
    Inspect {
        /// Path to a metadata record or chunk message
        path: PathBuf,
        /// Configuration file path
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: String,
    },
    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Chunk {
            file,
            chunk_size,
            layout,
            config,
        } => {
            info!("Chunking file: {:?}", file);
            let node = open_node(&config).await?;

            let report = node
                .chunk_file(&file, chunk_size, layout.map(StorageMode::from))
                .await?;

            println!("File chunked successfully!");
            println!("File hash: {}", report.file_hash);
            println!("Size: {}", format_bytes(report.metadata.size));
            println!(
                "Chunks: {} of {}",
                report.metadata.pieces.len(),
                format_bytes(u64::from(report.metadata.chunk_size))
            );
            if report.blobs_deduplicated > 0 {
                println!("Deduplicated blobs: {}", report.blobs_deduplicated);
            }
            println!("Metadata: {:?}", report.meta_path);
            for placement in &report.placements {
                println!("  {}", placement);
            }

            Ok(())
        }
        Commands::Join { meta, config } => {
            info!("Joining chunks for: {}", meta);
            let node = open_node(&config).await?;

            let report = node.join_chunks(&meta).await?;

            println!("File reassembled successfully!");
            println!("Output file: {:?}", report.output_path);
            println!(
                "Written: {} in {} chunks",
                format_bytes(report.bytes_written),
                report.pieces
            );

            Ok(())
        }
        Commands::WhereTo { cpath, config } => {
            let node = open_node(&config).await?;
            let placement = node.where_to(&cpath)?;
            println!("{}", placement.host);
            Ok(())
        }
        Commands::BucketPath { chunk_hash, config } => {
            let node = open_node(&config).await?;
            let chunk_path = node.bucket_path(&chunk_hash)?;
            println!("{}", chunk_path);
            Ok(())
        }
        Commands::Mobilize {
            file_hash,
            chunk_hash,
            output,
            config,
        } => {
            let node = open_node(&config).await?;

            let path = match output {
                Some(path) => {
                    let encoded = node.mobilize_chunk(&file_hash, &chunk_hash).await?;
                    tokio::fs::write(&path, &encoded).await?;
                    path
                }
                None => node.mobilize_to_bucket(&file_hash, &chunk_hash).await?,
            };

            println!("Chunk mobilized: {:?}", path);
            Ok(())
        }
        Commands::Inspect { path, config } => {
            let node = open_node(&config).await?;
            let message = node.inspect(&path).await?;
            println!("{}", serde_json::to_string_pretty(&message)?);
            Ok(())
        }
        Commands::Version => {
            println!("HaaS v{}", env!("CARGO_PKG_VERSION"));
            println!("Content-addressed chunk storage");
            Ok(())
        }
    }
}

/// Load the configuration at `path`, writing a default one first if it is missing
fn load_or_create_config(path: &str) -> anyhow::Result<HaasConfig> {
    if Path::new(path).exists() {
        return Ok(HaasConfig::from_file(path)?);
    }

    warn!("Configuration file not found, creating default configuration");
    let default_config = HaasConfig::default();
    if let Some(parent) = Path::new(path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    default_config.save_to_file(path)?;
    info!("Default configuration saved to: {}", path);
    Ok(default_config)
}

async fn open_node(config_path: &str) -> anyhow::Result<HaasNode> {
    let config = load_or_create_config(config_path)?;
    Ok(HaasNode::from_config(config).await?)
}

/// Format bytes in a human-readable format
fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit = 0;

    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{} {}", bytes, UNITS[unit])
    } else {
        format!("{:.1} {}", size, UNITS[unit])
    }
}
