//! Runs a JSON-serialized script against a JSON-described in-memory store.
//!
//! Usage: `arcscript <store.json> <script.json> [config file]`
//!
//! The store file is a list of `{"uri", "schema", "type", "versions": [...]}`
//! objects, versions oldest first.

use std::process::ExitCode;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use arcscript::config::EngineConfig;
use arcscript::storage::MemoryStorage;
use arcscript::{ArcScript, ArcScriptError, Engine, Result};

#[derive(Deserialize)]
struct StoredObject {
    uri: String,
    schema: String,
    #[serde(rename = "type")]
    type_name: String,
    versions: Vec<Value>,
}

fn load_store(path: &str) -> Result<Arc<MemoryStorage>> {
    let text = std::fs::read_to_string(path).map_err(|e| ArcScriptError::Execution(format!("{path}: {e}")))?;
    let objects: Vec<StoredObject> = serde_json::from_str(&text)?;
    let storage = Arc::new(MemoryStorage::new());
    for object in objects {
        let mut versions = object.versions.into_iter();
        let first = versions.next().unwrap_or(Value::Null);
        let entry = storage.add(object.uri, object.schema, object.type_name, first);
        for version in versions {
            storage.add_version(entry.id(), version)?;
        }
    }
    Ok(storage)
}

fn load_script(path: &str) -> Result<ArcScript> {
    let text = std::fs::read_to_string(path).map_err(|e| ArcScriptError::Execution(format!("{path}: {e}")))?;
    Ok(serde_json::from_str(&text)?)
}

async fn run(args: &[String]) -> Result<()> {
    let (Some(store_path), Some(script_path)) = (args.get(1), args.get(2)) else {
        return Err(ArcScriptError::Config(
            "usage: arcscript <store.json> <script.json> [config file]".into(),
        ));
    };
    let config = EngineConfig::load(args.get(3).map(String::as_str))?;
    let storage = load_store(store_path)?;
    let script = load_script(script_path)?;
    info!(entries = storage.len(), instructions = script.instructions().len(), "loaded");

    let result = Engine::new(config).execute(script, &storage.instance()).await;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("arcscript=info")))
        .init();
    let args: Vec<String> = std::env::args().collect();
    match run(&args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "run failed");
            ExitCode::FAILURE
        }
    }
}
