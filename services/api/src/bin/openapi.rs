//! services/api/src/bin/openapi.rs
//!
//! Writes the OpenAPI document of the session API to disk so clients can be
//! generated without running the server.
//!
//! Usage: `openapi [OUTPUT]` (defaults to `openapi.json`).

use std::path::{Path, PathBuf};
use study_api_lib::{error::ApiError, web::ApiDoc};
use utoipa::OpenApi;

const DEFAULT_OUTPUT: &str = "openapi.json";

fn write_document(output: &Path) -> Result<usize, ApiError> {
    let mut doc = ApiDoc::openapi();
    doc.info.version = env!("CARGO_PKG_VERSION").to_string();
    let json = doc
        .to_pretty_json()
        .map_err(|e| ApiError::Internal(format!("Could not render the document: {}", e)))?;

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(output, json)?;
    Ok(doc.paths.paths.len())
}

fn main() -> Result<(), ApiError> {
    let output = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT));
    let paths = write_document(&output)?;
    println!("Wrote {} paths to {}", paths, output.display());
    Ok(())
}
