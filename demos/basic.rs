//! Basic Quire Example
//!
//! This example demonstrates the versioned document store in embedded mode:
//! create a document, update it with a version check, apply a patch, and
//! walk the recorded history.
//!
//! Run with: cargo run --example basic

use std::sync::Arc;

use serde_json::json;

use quire_protocol::DocumentService;
use quire_store::{MemoryStore, RuntimeMode};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    println!("Quire Basic Example\n");

    let store = Arc::new(MemoryStore::new(RuntimeMode::Development));
    let service = DocumentService::new(store);

    // Create a document; the store assigns the id.
    let document = json!({"name": "Alice", "age": 30}).as_object().unwrap().clone();
    let created = service.create("users", document).await?;
    let id = created.id.clone().expect("store assigns an id");
    println!("Created users/{} at version {}", id, created.version);

    // Whole-document update: state the version we read.
    let updated = json!({"name": "Alice", "age": 31, "city": "Oslo"})
        .as_object()
        .unwrap()
        .clone();
    let replaced = service.replace("users", &id, updated, 0).await?;
    println!("Replaced -> version {}", replaced.version);

    // Patch update: structural operations, recorded verbatim.
    let operations = vec![json!({"op": "replace", "path": "/city", "value": "Bergen"})];
    let patched = service.apply_patch("users", &id, &operations, 1).await?;
    println!("Patched  -> version {}", patched.version);

    // A stale writer is rejected without touching the document.
    let stale = json!({"name": "Mallory"}).as_object().unwrap().clone();
    match service.replace("users", &id, stale, 0).await {
        Err(e) => println!("Stale write rejected: {}", e),
        Ok(_) => unreachable!("expected a version conflict"),
    }

    // Walk the history from version 0.
    println!("\nHistory:");
    for patch in service.history_since("users", &id, 0).await? {
        println!(
            "  v{} -> v{}: {} operation(s)",
            patch.version,
            patch.version + 1,
            patch.operations.len()
        );
    }

    let current = service.get("users", &id).await?.expect("document visible");
    println!(
        "\nCurrent document: {}",
        serde_json::to_string_pretty(&serde_json::Value::Object(current.document))?
    );

    Ok(())
}
