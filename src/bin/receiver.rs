//! DAC listener
//!
//! Receives DAC packets and plays one channel live on an output device.

use anyhow::{Context, Result};
use clap::Parser;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dac_live_stream::{
    audio::{list_output_devices, LiveStreamer, PlaybackListener, StreamEvent},
    config::AppConfig,
    network::DacReceiver,
    subscribers::DacListener,
};

#[derive(Parser, Debug)]
#[command(name = "dac-listen", version, about = "Play a DAC channel live")]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// UDP port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// DAC channel to play (1-4)
    #[arg(long)]
    channel: Option<u8>,

    /// Output device name
    #[arg(short, long)]
    device: Option<String>,

    /// Multicast group to join
    #[arg(short, long)]
    multicast_group: Option<Ipv4Addr>,

    /// List output devices and exit
    #[arg(long)]
    list_devices: bool,
}

/// Logs playback lifecycle events
struct EventLogger;

impl PlaybackListener for EventLogger {
    fn update(&self, event: &StreamEvent) {
        match event {
            StreamEvent::Failed { attempts, reason } => {
                tracing::error!("Live stream failed after {} attempts: {}", attempts, reason)
            }
            other => tracing::info!("Live stream event: {:?}", other),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    if args.list_devices {
        println!("\n=== Available Output Devices ===");
        for device in list_output_devices() {
            let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
            println!("  {}{}:", device.name, default_marker);
            println!("    Sample rates: {:?}", device.sample_rates);
            println!("    Channels: {:?}", device.channels);
        }
        println!();
        return Ok(());
    }

    let mut config = AppConfig::load_or_default(args.config.as_deref())
        .context("Failed to load configuration")?;
    if let Some(port) = args.port {
        config.network.udp_port = port;
    }
    if let Some(channel) = args.channel {
        config.stream.channel = channel;
    }
    if let Some(device) = args.device {
        config.stream.device = Some(device);
    }
    if let Some(group) = args.multicast_group {
        config.network.multicast_group = Some(group);
    }
    config.validate()?;

    tracing::info!("Starting DAC listener");

    let receiver = DacReceiver::bind(config.network.clone(), &config.sequence)?;

    let streamer = LiveStreamer::builder(config.stream.channel)
        .config(&config.stream)
        .listener(Arc::new(EventLogger))
        .start_on_device()
        .context("Failed to open the output device")?;
    let streamer: Arc<LiveStreamer> = Arc::new(streamer);
    let listener: Arc<dyn DacListener> = streamer.clone();

    receiver.subscribe(listener.clone())?;
    receiver.start()?;

    tracing::info!(
        "Playing channel {} from {} (Ctrl-C to stop)",
        config.stream.channel,
        receiver.local_addr()
    );

    let mut stats_timer =
        tokio::time::interval(Duration::from_secs(config.network.stats_interval_secs.max(1)));
    stats_timer.tick().await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = stats_timer.tick() => {
                let stats = receiver.stats();
                tracing::info!(
                    "Receiver stats: {} packets, {} bytes, {} invalid, {} dropped; \
                     stream {:?}, {} bytes buffered",
                    stats.packets_received,
                    stats.bytes_received,
                    stats.invalid_packets,
                    stats.rejected(),
                    streamer.state(),
                    streamer.buffered()
                );
            }
        }
    }

    streamer.dispose();
    receiver.unsubscribe(&listener);
    receiver.halt();

    Ok(())
}
