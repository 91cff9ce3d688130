//! Writes the API's OpenAPI document.
//!
//! Usage: `openapi [PATH]`. With no path the document goes to
//! `openapi.json`; `-` prints it to stdout instead.

use anyhow::Context;
use std::{fs, path::Path};
use triage_api::router::ApiDoc;
use utoipa::OpenApi;

fn main() -> anyhow::Result<()> {
    let target = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "openapi.json".to_string());
    let doc = ApiDoc::openapi();
    let spec_json = doc
        .to_pretty_json()
        .context("Failed to serialize the OpenAPI document")?;

    if target == "-" {
        println!("{spec_json}");
        return Ok(());
    }

    let path = Path::new(&target);
    fs::write(path, spec_json)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    eprintln!(
        "Wrote {} paths for API version {} to {}",
        doc.paths.paths.len(),
        doc.info.version,
        path.display()
    );
    Ok(())
}
