//! Chronycle CLI

use std::collections::BTreeMap;
use std::path::Path;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde_json::json;
use tracing_subscriber::EnvFilter;

use chronycle::{DeliveryState, FilterPolicy, Record, Recorder, RecorderConfig};

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 3 {
        usage();
        process::exit(1);
    }

    let command = &args[1];
    let result = match command.as_str() {
        "check" if args.len() >= 4 => check(Path::new(&args[2]), &args[3..]),
        "send-test" => send_test(Path::new(&args[2])),
        "check" => {
            eprintln!("Usage: chronycle check <config.toml> <endpoint>...");
            process::exit(1);
        }
        _ => {
            eprintln!("Unknown command: {command}");
            eprintln!("Run 'chronycle' for usage information.");
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn usage() {
    eprintln!("Chronycle v{}", env!("CARGO_PKG_VERSION"));
    eprintln!();
    eprintln!("Usage: chronycle <command> <config.toml> [args]");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  check <config> <endpoint>...  Show the recording decision per endpoint");
    eprintln!("  send-test <config>            Deliver one synthetic record to the collector");
}

fn load_config(path: &Path) -> anyhow::Result<RecorderConfig> {
    let mut config = RecorderConfig::from_file(path)
        .with_context(|| format!("loading {}", path.display()))?;
    config.apply_env_overrides(|key| std::env::var(key).ok());
    Ok(config)
}

fn check(path: &Path, endpoints: &[String]) -> anyhow::Result<()> {
    let config = load_config(path)?;
    let policy = FilterPolicy::new(&config)?;

    for endpoint in endpoints {
        let decision = policy.evaluate(endpoint, None);
        let verdict = if decision.is_record() { "RECORD" } else { "SKIP" };
        println!("{verdict:<8} {endpoint} ({decision:?})");
    }

    if let Some(rate) = config.sample_rate {
        println!();
        println!(
            "Sampling not applied; {:.0}% of recorded requests are kept at runtime.",
            rate * 100.0
        );
    }

    Ok(())
}

fn send_test(path: &Path) -> anyhow::Result<()> {
    let config = Arc::new(load_config(path)?);
    let recorder = Recorder::new(Arc::clone(&config))?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building runtime")?;

    let record = Record {
        method: "GET".to_string(),
        endpoint: "http://localhost/chronycle/send-test".to_string(),
        headers: BTreeMap::new(),
        query_params: BTreeMap::new(),
        request_body: serde_json::Value::Null,
        duration: 0,
        status_code: 200,
        response_headers: BTreeMap::new(),
        response_body: json!({"source": "chronycle send-test"}),
    };

    let state = runtime.block_on(recorder.deliver(record));
    println!("Delivery to {} {state}", config.recording_url());

    if state == DeliveryState::Delivered {
        Ok(())
    } else {
        anyhow::bail!("delivery failed within {:?}", Duration::from_millis(config.timeout))
    }
}
