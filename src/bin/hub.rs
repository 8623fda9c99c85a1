use std::collections::BTreeSet;
use std::time::Duration;

use clap::Parser;
use sensor_registry::{
    DeviceManagerHandle,
    config::{Config, read_config_file},
};
use tracing::{debug, error, info, instrument, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short)]
    file: String,

    /// Seconds between two temperature reports
    #[arg(short, default_value_t = 10)]
    interval: u64,
}

fn init() {
    let filter = filter::Targets::new().with_targets(vec![
        ("sensor_registry", LevelFilter::TRACE),
        ("hub", LevelFilter::TRACE),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let config = read_config_file(&args.file)?;

    let manager = DeviceManagerHandle::spawn(&config.registry);
    let groups = register_devices(&manager, &config).await;

    let mut ticker = tokio::time::interval(Duration::from_secs(args.interval.max(1)));
    let mut request_id = 0u64;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                request_id += 1;
                report(&manager, &groups, request_id).await;
            }
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    error!("failed to listen for shutdown signal: {e}");
                }
                info!("shutting down");
                break;
            }
        }
    }

    manager.stop().await;
    let reason = manager.terminated().await;
    debug!("device manager exited: {reason:?}");

    Ok(())
}

/// Track every configured device and record its initial reading
///
/// Returns the ids of all groups that were touched.
#[instrument(skip_all)]
async fn register_devices(manager: &DeviceManagerHandle, config: &Config) -> BTreeSet<String> {
    let mut groups = BTreeSet::new();

    let Some(devices) = &config.devices else {
        warn!("no devices configured");
        return groups;
    };

    for (request_id, entry) in (0u64..).zip(devices) {
        let device = match manager.track(&entry.group, &entry.device).await {
            Ok(device) => device,
            Err(e) => {
                error!("{}/{}: failed to register: {e}", entry.group, entry.device);
                continue;
            }
        };
        debug!("{}/{}: registered as {}", entry.group, entry.device, device.id());
        groups.insert(entry.group.clone());

        if let Some(value) = entry.initial {
            if let Err(e) = device.record(request_id, value).await {
                error!("{}/{}: failed to record {value}: {e}", entry.group, entry.device);
            }
        }
    }

    groups
}

/// Print the readings of every group as one JSON object per line
async fn report(manager: &DeviceManagerHandle, groups: &BTreeSet<String>, request_id: u64) {
    for group in groups {
        let temperatures = match manager.all_temperatures(group, request_id).await {
            Ok(temperatures) => temperatures,
            Err(e) => {
                error!("{group}: query failed ({}): {e}", e.as_label());
                continue;
            }
        };

        let report = serde_json::json!({
            "group": group,
            "request_id": request_id,
            "temperatures": temperatures,
        });
        println!("{report}");
    }
}
