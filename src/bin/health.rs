use std::env;
use std::error;
use std::process::exit;

use reqwest::Url;
use serde::Deserialize;

#[derive(Deserialize)]
struct HealthResponse {
    status: String,
    model_loaded: bool,
}

/// Probe for container healthchecks: exits non-zero unless the service
/// responds and reports its model as loaded.
fn main() -> Result<(), Box<dyn error::Error>> {
    let args: Vec<String> = env::args().collect();
    let url = match args.get(1) {
        Some(arg) => Url::parse(arg)?,
        None => Url::parse("http://127.0.0.1:25566/health")?,
    };

    let response = reqwest::blocking::get(url)?;
    if !response.status().is_success() {
        eprintln!("Request failed with status {}", response.status());
        exit(1);
    }

    let health: HealthResponse = response.json()?;
    if health.status != "healthy" || !health.model_loaded {
        eprintln!("Service is up but the model is not loaded");
        exit(1);
    }

    Ok(())
}
