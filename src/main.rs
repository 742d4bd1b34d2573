use std::path::PathBuf;

use anyhow::{Result, anyhow, bail};
use clap::Parser;
use log::{LevelFilter, info, warn};

use ble_central::config::ControllerConfig;
use ble_central::core::bluetooth::{
    Address, BluestRadio, ConnectionState, ControllerEvent, ControllerRuntime, HostEnvironment,
};
use ble_central::logging;
use ble_central::storage::JsonFileNameStore;

#[derive(Parser)]
#[command(name = "ble-central")]
#[command(about = "Scan for BLE peripherals and talk to one over its UART service", long_about = None)]
#[command(version)]
struct Cli {
    /// Controller configuration file (defaults are used if it does not exist)
    #[arg(short, long, default_value = "ble-central.json")]
    config: PathBuf,

    /// Where the name of the last connected device is kept
    #[arg(long, default_value = "last_device.json")]
    state: PathBuf,

    /// Connect to this address as soon as it is discovered
    #[arg(long)]
    connect: Option<String>,

    /// Hex payload to send once the connection is ready, e.g. "01 02 ff"
    #[arg(long)]
    send: Option<String>,

    #[arg(short, long)]
    verbose: bool,
}

fn parse_hex(text: &str) -> Result<Vec<u8>> {
    let digits: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    if !digits.is_ascii() || digits.len() % 2 != 0 {
        bail!("hex payload must be an even number of hex digits: {:?}", text);
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| {
            let pair = &digits[i..i + 2];
            u8::from_str_radix(pair, 16).map_err(|e| anyhow!("invalid hex byte {:?}: {}", pair, e))
        })
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    })?;

    let config = ControllerConfig::load(&cli.config).await?;
    let mut payload = cli.send.as_deref().map(parse_hex).transpose()?;
    let mut target = cli.connect.map(Address::new);

    let store = JsonFileNameStore::new(&cli.state);
    if let Some(last) = store.last_device().await? {
        info!("Last connected device: {} ({})", last.name, last.connected_at);
    }

    let runtime = ControllerRuntime::new();
    let adapter = BluestRadio::default_adapter().await?;
    let env = HostEnvironment::new(adapter.clone(), runtime.remediation_notifier()).await;
    let radio = BluestRadio::new(adapter, runtime.radio_sink());
    let (handle, mut events) = runtime.spawn(config, radio, env, store)?;

    if let Err(e) = handle.start().await {
        warn!("Scan not started yet: {}", e);
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                println!("{}", serde_json::to_string(&event)?);

                match &event {
                    ControllerEvent::DeviceFound { device }
                        if target.as_ref() == Some(&device.address) =>
                    {
                        target = None;
                        if let Err(e) = handle.connect(device.address.clone()).await {
                            warn!("Connect failed: {}", e);
                        }
                    }
                    ControllerEvent::ConnectionStateChanged {
                        state: ConnectionState::Ready,
                        ..
                    } => {
                        if let Some(data) = payload.take() {
                            match handle.send(data).await {
                                Ok(()) => info!("Payload sent"),
                                Err(e) => warn!("Send failed: {}", e),
                            }
                        }
                    }
                    _ => {}
                }
            }
        }
    }

    handle.shutdown().await?;
    Ok(())
}
