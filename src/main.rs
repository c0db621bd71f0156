//! Demo accessory: a lightbulb served through a logging IP transport.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use hap_core::{Accessory, Category, Service, ServiceKind};
use hap_server::setup::SetupPayloadFlags;
use hap_server::{
    AccessoryServer, AdvertisingData, CallbackDelegate, FileStore, ServerState, SetupCode,
    SetupId, SetupPayload, StaticAccessorySetup, Transport, TransportKind,
};
use tokio::time::sleep_until;
use tracing::{debug, info, Level};

/// Command-line arguments
struct Args {
    /// Enable debug logging
    debug: bool,
    /// Key-value store file (default: accessory.json)
    store: PathBuf,
    name: String,
    /// Setup code, random if absent
    setup_code: Option<String>,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            debug: false,
            store: PathBuf::from("accessory.json"),
            name: "Demo Lightbulb".to_string(),
            setup_code: None,
        }
    }
}

fn parse_args() -> Args {
    let mut args = Args::default();
    let mut iter = std::env::args().skip(1);

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--debug" | "-d" => {
                args.debug = true;
            }
            "--store" | "-s" => {
                if let Some(path) = iter.next() {
                    args.store = PathBuf::from(path);
                }
            }
            "--name" | "-n" => {
                if let Some(name) = iter.next() {
                    args.name = name;
                }
            }
            "--setup-code" | "-c" => {
                args.setup_code = iter.next();
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            _ => {
                eprintln!("Unknown argument: {}", arg);
                print_help();
                std::process::exit(1);
            }
        }
    }

    args
}

fn print_help() {
    println!("hap-accessory - Demo HomeKit accessory server");
    println!();
    println!("Usage: hap-accessory [OPTIONS]");
    println!();
    println!("Options:");
    println!("  -d, --debug            Enable debug logging");
    println!("  -s, --store PATH       Key-value store file (default: accessory.json)");
    println!("  -n, --name NAME        Accessory name (default: Demo Lightbulb)");
    println!("  -c, --setup-code CODE  Setup code XXX-XX-XXX (default: random)");
    println!("  -h, --help             Show this help message");
}

/// IP transport that only logs what it would advertise.
struct LoggingTransport;

impl LoggingTransport {
    fn log(&self, advertising: &AdvertisingData) {
        info!(
            "_hap._tcp {}: id={} c#={} sf={} ff={} ci={} discoverable={}",
            advertising.name,
            advertising.device_id,
            advertising.config_number,
            advertising.status_flags.0,
            advertising.feature_flags.0,
            advertising.category.0,
            advertising.is_discoverable
        );
    }
}

impl Transport for LoggingTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Ip
    }

    fn start(&mut self, advertising: &AdvertisingData) {
        info!("IP transport started.");
        self.log(advertising);
    }

    fn update_advertising_data(&mut self, advertising: &AdvertisingData) {
        self.log(advertising);
    }

    fn try_stop(&mut self) -> bool {
        info!("IP transport stopped.");
        true
    }
}

fn lightbulb(name: &str) -> Accessory {
    Accessory {
        aid: Accessory::PRIMARY_AID,
        category: Category::LIGHTING,
        name: name.to_string(),
        manufacturer: "Example".to_string(),
        model: "Bulb1,1".to_string(),
        serial_number: "0000001".to_string(),
        firmware_version: env!("CARGO_PKG_VERSION").to_string(),
        hardware_version: None,
        product_data: None,
        services: vec![
            Service::new(1, ServiceKind::AccessoryInformation),
            Service::new(0x10, ServiceKind::ProtocolInformation),
            Service::new(0x20, ServiceKind::Pairing),
            Service::new(0x30, ServiceKind::Other(0x43)),
        ],
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline.into()).await,
        None => std::future::pending().await,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args();

    tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(if args.debug { Level::DEBUG } else { Level::INFO })
        .init();

    let code = match &args.setup_code {
        Some(code) => SetupCode::parse(code).with_context(|| format!("invalid setup code {:?}", code))?,
        None => SetupCode::generate_random(),
    };
    let setup_id = SetupId::generate_random();
    let store = FileStore::open(&args.store)
        .with_context(|| format!("failed to open {}", args.store.display()))?;

    let mut server = AccessoryServer::builder()
        .key_value_store(store)
        .accessory_setup(StaticAccessorySetup::new(code.clone(), Some(setup_id.clone())))
        .transport(LoggingTransport)
        .delegate(CallbackDelegate::new(|event| debug!("Server event: {:?}", event)))
        .build()?;

    server.start(lightbulb(&args.name))?;

    if !server.is_paired() {
        let flags = SetupPayloadFlags {
            ip_supported: true,
            ..Default::default()
        };
        let payload = SetupPayload::new(Some(&code), Some(&setup_id), flags, Category::LIGHTING);
        println!("Setup code:    {}", code.as_str());
        println!("Setup payload: {}", payload);
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted.");
                server.force_stop();
                break;
            }
            _ = wait_until(server.next_timer_deadline()) => server.process_timers(),
        }
        if server.state() == ServerState::Idle {
            break;
        }
    }

    Ok(())
}
