//! btsnoop CLI: record, inspect, and replay BTSNOOP HCI capture logs

use anyhow::{Context, Result};
use btsnoop_core::{CaptureService, SnoopReader, SnoopRecord, DEFAULT_MIRROR_PORT};
use btsnoop_hci::Direction;
use chrono::DateTime;
use clap::{Parser, Subcommand, ValueEnum};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::net::TcpListener;

use source::H4StreamSource;

mod source;

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture a raw H4 byte stream into a snoop log
    Record {
        /// Input carrying the H4 stream: a file, FIFO, or "-" for stdin
        input: String,

        /// Snoop log to write
        #[arg(short, long, default_value = "btsnoop_hci.log", env = "BTSNOOP_OUT")]
        out: PathBuf,

        /// Also serve attached clients the live packet stream on this port
        #[arg(long)]
        mirror_port: Option<u16>,

        /// Append to an existing log instead of truncating
        #[arg(long)]
        append: bool,

        /// Direction recorded for ACL/SCO packets (a raw stream does not carry it)
        #[arg(long, value_enum, default_value = "sent")]
        data_direction: DataDirection,
    },

    /// Print every record of a snoop log
    Dump {
        /// Snoop log to read
        file: PathBuf,

        /// Emit one JSON object per record instead of columns
        #[arg(long)]
        json: bool,
    },

    /// Summarize a snoop log
    Info {
        /// Snoop log to read
        file: PathBuf,
    },

    /// Replay a saved snoop log to hcidump-style TCP clients
    Serve {
        /// Snoop log to replay
        file: PathBuf,

        /// Listen port
        #[arg(long, default_value_t = DEFAULT_MIRROR_PORT)]
        port: u16,
    },
}

/// Direction stamped on data packets when recording a raw stream
#[derive(Debug, Clone, Copy, ValueEnum)]
enum DataDirection {
    /// Host to controller
    Sent,
    /// Controller to host
    Received,
}

impl From<DataDirection> for Direction {
    fn from(value: DataDirection) -> Self {
        match value {
            DataDirection::Sent => Direction::HostToController,
            DataDirection::Received => Direction::ControllerToHost,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("btsnoop=info")
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Record {
            input,
            out,
            mirror_port,
            append,
            data_direction,
        } => {
            handle_record(&input, &out, mirror_port, append, data_direction.into()).await?;
        }
        Commands::Dump { file, json } => {
            handle_dump(&file, json).await?;
        }
        Commands::Info { file } => {
            handle_info(&file).await?;
        }
        Commands::Serve { file, port } => {
            handle_serve(&file, port).await?;
        }
    }

    Ok(())
}

async fn handle_record(
    input: &str,
    out: &Path,
    mirror_port: Option<u16>,
    append: bool,
    data_direction: Direction,
) -> Result<()> {
    let reader: Box<dyn AsyncRead + Unpin + Send> = if input == "-" {
        Box::new(tokio::io::stdin())
    } else {
        Box::new(
            tokio::fs::File::open(input)
                .await
                .with_context(|| format!("opening input {input}"))?,
        )
    };

    let mut builder = CaptureService::builder().path(out).append(append);
    if let Some(port) = mirror_port {
        builder = builder.mirror_port(port);
    }
    let service = builder.build();
    service.start().await?;

    if let Some(addr) = service.mirror_addr().await {
        println!("Mirror listening on {addr}");
    }
    println!("Recording to {}", out.display());

    let mut h4_source = H4StreamSource::new(reader, data_direction);
    tokio::select! {
        result = service.run(&mut h4_source) => {
            let logged = result?;
            println!("Input ended after {logged} packets");
        }
        _ = tokio::signal::ctrl_c() => {
            println!("Interrupted");
        }
    }

    service.stop().await?;
    let stats = service.stats().await;
    println!(
        "Wrote {} records ({} bytes) to {}",
        stats.writer.records_written,
        stats.writer.bytes_written,
        out.display()
    );
    Ok(())
}

async fn handle_dump(file: &Path, json: bool) -> Result<()> {
    let mut reader = SnoopReader::open(file)
        .await
        .with_context(|| format!("opening {}", file.display()))?;

    let mut index = 0u64;
    while let Some(record) = reader.next_record().await? {
        if json {
            println!("{}", record_json(index, &record));
        } else {
            println!("{}", record_line(index, &record));
        }
        index += 1;
    }
    Ok(())
}

async fn handle_info(file: &Path) -> Result<()> {
    let mut reader = SnoopReader::open(file)
        .await
        .with_context(|| format!("opening {}", file.display()))?;

    let mut counts: BTreeMap<String, u64> = BTreeMap::new();
    let mut payload_bytes = 0u64;
    let mut first_ts: Option<u64> = None;
    let mut last_ts: Option<u64> = None;
    let mut torn = false;

    loop {
        match reader.next_record().await {
            Ok(Some(record)) => {
                *counts.entry(record.packet_type.to_string()).or_default() += 1;
                payload_bytes += record.payload.len() as u64;
                first_ts.get_or_insert(record.timestamp_us);
                last_ts = Some(record.timestamp_us);
            }
            Ok(None) => break,
            Err(btsnoop_core::ReaderError::TruncatedRecord { index, .. }) => {
                eprintln!("warning: file ends inside record {index} (torn write)");
                torn = true;
                break;
            }
            Err(e) => return Err(e.into()),
        }
    }

    println!("File:      {}", file.display());
    println!("Format:    btsnoop v1, HCI UART (H4)");
    println!("Records:   {}{}", reader.records_read(), if torn { " (+1 torn)" } else { "" });
    println!("Payload:   {payload_bytes} bytes");
    for (packet_type, count) in &counts {
        println!("  {packet_type}: {count}");
    }
    if let (Some(first), Some(last)) = (first_ts, last_ts) {
        println!("First:     {}", format_timestamp(first));
        println!("Last:      {}", format_timestamp(last));
        println!(
            "Duration:  {:.6}s",
            last.saturating_sub(first) as f64 / 1_000_000.0
        );
    }
    Ok(())
}

async fn handle_serve(file: &Path, port: u16) -> Result<()> {
    let mut reader = SnoopReader::open(file)
        .await
        .with_context(|| format!("opening {}", file.display()))?;
    let records = reader.read_all().await?;

    // Pre-frame every packet once; each client gets the same stream
    let frames: Vec<_> = records
        .iter()
        .map(|r| btsnoop_hci::frame(r.packet_type, &r.payload))
        .collect();

    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("binding port {port}"))?;
    println!(
        "Serving {} packets from {} on {}",
        frames.len(),
        file.display(),
        listener.local_addr()?
    );
    println!("Press Ctrl-C to stop");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (mut stream, peer) = accepted?;
                tracing::info!(%peer, "Replay client attached");
                let frames = frames.clone();
                tokio::spawn(async move {
                    for frame in &frames {
                        if let Err(e) = stream.write_all(frame).await {
                            tracing::info!(%peer, error = %e, "Replay client detached");
                            return;
                        }
                    }
                    let _ = stream.shutdown().await;
                    tracing::info!(%peer, "Replay complete");
                });
            }
            _ = tokio::signal::ctrl_c() => {
                println!("Stopped");
                return Ok(());
            }
        }
    }
}

fn record_line(index: u64, record: &SnoopRecord) -> String {
    format!(
        "#{index:06} {} {} {} len={:<4} {}",
        format_timestamp(record.timestamp_us),
        record.direction,
        record.packet_type,
        record.payload.len(),
        hex_bytes(&record.payload)
    )
}

fn record_json(index: u64, record: &SnoopRecord) -> String {
    serde_json::json!({
        "index": index,
        "timestamp_us": record.timestamp_us,
        "timestamp": format_timestamp(record.timestamp_us),
        "type": record.packet_type.to_string(),
        "direction": record.direction.to_string(),
        "length": record.payload.len(),
        "payload": hex_bytes(&record.payload),
    })
    .to_string()
}

fn format_timestamp(unix_us: u64) -> String {
    match DateTime::from_timestamp_micros(unix_us as i64) {
        Some(ts) => ts.format("%Y-%m-%d %H:%M:%S%.6f").to_string(),
        None => format!("{unix_us}us"),
    }
}

fn hex_bytes(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}
