use std::sync::Arc;

use chrono::Local;
use tracing_subscriber::EnvFilter;

use timetable_engine::capabilities::CapabilityCache;
use timetable_engine::config::EngineConfig;
use timetable_engine::domain::{
    DepartureRequest, InfoKey, ProviderData, Request, RequestCommon, SourceName,
};
use timetable_engine::network::HttpDownloader;
use timetable_engine::scheduler::{JobEvent, Scheduler};

/// Descriptor used when no path is given on the command line.
const DEFAULT_DESCRIPTOR: &str = "demos/demo_city/provider.json";

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let descriptor = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_DESCRIPTOR.to_string());
    let stop = std::env::args().nth(2).unwrap_or_else(|| "Main St".to_string());

    let provider =
        ProviderData::from_json_file(&descriptor).expect("Failed to load provider descriptor");
    println!(
        "Provider '{}' using script {}",
        provider.id,
        provider.script_path.display()
    );

    let downloader = HttpDownloader::new().expect("Failed to create HTTP client");
    let scheduler = Scheduler::new(EngineConfig::default(), Arc::new(downloader));

    // Probe capabilities first; the probe runs an interpreter, so keep it
    // off the async threads.
    let cache = Arc::new(CapabilityCache::new(scheduler.sandbox()));
    let features = tokio::task::spawn_blocking({
        let cache = Arc::clone(&cache);
        let provider = provider.clone();
        move || cache.features_for(&provider)
    })
    .await
    .expect("capability probe panicked");

    if !features.ok {
        eprintln!(
            "Provider script failed to probe: {}",
            features.error.as_deref().unwrap_or("unknown error")
        );
        std::process::exit(1);
    }
    let names: Vec<&str> = features.features.iter().map(|f| f.name()).collect();
    println!("Capabilities: {}", names.join(", "));

    let request = Request::Departures(DepartureRequest {
        common: RequestCommon::new(
            provider.id.clone(),
            SourceName::new(format!("Departures {}|stop={stop}", provider.id)),
            Local::now().naive_local(),
            20,
        ),
        stop: stop.clone(),
        stop_id: None,
        city: None,
    });

    let mut events = scheduler.subscribe();
    let handle = scheduler
        .submit(provider, request)
        .expect("Failed to submit job");
    println!("Fetching departures for '{stop}' ({})...", handle.id());
    println!();

    loop {
        let event = events.recv().await.expect("event channel closed");
        match event {
            JobEvent::Started { job } => {
                println!("[{}] started", job.id);
            }
            JobEvent::ResultBatch { batch, .. } => {
                for record in &batch.records {
                    let line = record
                        .get(InfoKey::TransportLine)
                        .and_then(|v| v.as_text())
                        .unwrap_or("?");
                    let target = record
                        .get(InfoKey::Target)
                        .and_then(|v| v.as_text())
                        .unwrap_or("?");
                    let time = record
                        .get(InfoKey::DepartureDateTime)
                        .and_then(|v| v.as_date_time())
                        .map(|dt| dt.format("%H:%M").to_string())
                        .unwrap_or_else(|| "--:--".to_string());
                    println!("  {time}  {line:<6} {target}");
                }
            }
            JobEvent::Done { job, published } => {
                println!();
                println!("[{}] done, {published} departures", job.id);
                break;
            }
            JobEvent::Failed { job, error, last_url, .. } => {
                eprintln!("[{}] failed: {error}", job.id);
                if let Some(url) = last_url {
                    eprintln!("  last URL: {url}");
                }
                break;
            }
            JobEvent::Cancelled { job, .. } => {
                println!("[{}] cancelled", job.id);
                break;
            }
        }
    }

    scheduler.shutdown().await;
}
