mod telemetry;

use anyhow::{bail, Context};
use clap::Parser;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Pushes random readings to the registry's telemetry endpoint
#[derive(Debug, Parser)]
#[command(name = "simulator")]
struct Args {
    /// Base URL of the registry service
    #[arg(long, env = "REGISTRY_URL", default_value = "http://localhost:8080")]
    registry_url: String,

    /// Submissions per second
    #[arg(long, env = "RATE", default_value_t = 100)]
    rate: u64,

    /// API keys to submit with; devices are registered when empty
    #[arg(long, env = "DEVICES", value_delimiter = ',')]
    devices: Vec<String>,

    /// Number of devices to register when no keys are given
    #[arg(long, env = "DEVICE_COUNT", default_value_t = 10)]
    device_count: usize,

    #[arg(long, env = "ADMIN_TOKEN", default_value = "your-auth-token", hide_env_values = true)]
    admin_token: String,

    /// Stop after this many seconds; runs until interrupted when unset
    #[arg(long, env = "DURATION_SECS")]
    duration_secs: Option<u64>,
}

#[derive(Deserialize)]
struct RegisteredDevice {
    id: String,
    #[serde(rename = "apiKey")]
    api_key: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt::init();

    if args.rate == 0 {
        bail!("RATE must be positive");
    }

    info!("Starting IoT Simulator");
    info!("Registry: {}, Rate: {} msg/s", args.registry_url, args.rate);

    let client = Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .context("failed to build HTTP client")?;

    let keys = if args.devices.is_empty() {
        register_devices(&client, &args).await?
    } else {
        args.devices.clone()
    };
    if keys.is_empty() {
        bail!("no devices to simulate");
    }
    info!("Simulating {} devices", keys.len());

    let url = format!("{}/telemetry", args.registry_url.trim_end_matches('/'));
    let deadline = args
        .duration_secs
        .map(|secs| Instant::now() + Duration::from_secs(secs));

    let mut rng = rand::thread_rng();
    let mut counter = 0u64;
    let mut rejected = 0u64;

    let burst_size = args.rate.clamp(1, 200) as usize;
    let burst_interval = Duration::from_millis((burst_size as u64 * 1000) / args.rate);

    info!(
        "Publishing in bursts of {} submissions every {:?}",
        burst_size, burst_interval
    );

    loop {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
        let burst_start = Instant::now();

        for _ in 0..burst_size {
            let key = keys[(counter % keys.len() as u64) as usize].clone();
            let submission = telemetry::generate(&mut rng, key);

            match client.post(&url).json(&submission).send().await {
                Ok(response) if response.status() == StatusCode::ACCEPTED => {}
                Ok(response) => {
                    rejected += 1;
                    warn!("Submission rejected with {}", response.status());
                }
                Err(e) => {
                    rejected += 1;
                    error!("Failed to submit telemetry: {}", e);
                }
            }
            counter += 1;
        }

        if counter % 1000 < burst_size as u64 {
            info!("Sent {} submissions ({} rejected)", counter, rejected);
        }

        let elapsed = burst_start.elapsed();
        if elapsed < burst_interval {
            tokio::time::sleep(burst_interval - elapsed).await;
        } else if elapsed > burst_interval * 2 {
            warn!(
                "Burst took {:?}, target was {:?} - registry may be overloaded",
                elapsed, burst_interval
            );
        }
    }

    info!("Done: {} submissions, {} rejected", counter, rejected);
    Ok(())
}

async fn register_devices(client: &Client, args: &Args) -> anyhow::Result<Vec<String>> {
    let url = format!("{}/devices", args.registry_url.trim_end_matches('/'));
    let mut keys = Vec::with_capacity(args.device_count);

    for i in 0..args.device_count {
        let response = client
            .post(&url)
            .header("X-Auth-Token", &args.admin_token)
            .json(&serde_json::json!({ "name": format!("sim-{}", i) }))
            .send()
            .await
            .context("failed to reach registry")?;

        if response.status() != StatusCode::CREATED {
            bail!("device registration failed with {}", response.status());
        }
        let device: RegisteredDevice = response.json().await?;
        info!("Registered simulated device {}", device.id);
        keys.push(device.api_key);
    }

    Ok(keys)
}
