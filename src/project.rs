//! Project persistence: a versioned JSON file holding the document recipe.
//!
//! Only the recipe is stored. Decoded sources are re-resolved on load and
//! paint bitmaps travel inside the document, so a project file plus its
//! source images fully reconstruct the edit state.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use log::info;
use serde::{Deserialize, Serialize};

use crate::compositor::{self, SourceCache};
use crate::error::{EngineError, Result};
use crate::layer::Document;

/// Bumped whenever the on-disk schema changes shape.
pub const FORMAT_VERSION: u32 = 1;

#[derive(Serialize)]
struct ProjectFileRef<'a> {
    version: u32,
    document: &'a Document,
}

#[derive(Deserialize)]
struct ProjectFile {
    version: u32,
    document: Document,
}

fn io_err(path: &Path, e: impl ToString) -> EngineError {
    EngineError::Resource {
        path: path.display().to_string(),
        reason: e.to_string(),
    }
}

/// Write the document to `path` as pretty-printed JSON. Source paths under
/// the project directory are stored relative to it, so the project folder
/// can move as a unit.
pub fn save(doc: &Document, path: &Path) -> Result<()> {
    let mut doc = doc.clone();
    if let Some(dir) = path.parent() {
        for layer in doc.layers_mut() {
            if let Some(src) = &layer.source_path {
                if let Ok(rel) = Path::new(src).strip_prefix(dir) {
                    layer.source_path = Some(rel.to_string_lossy().into_owned());
                }
            }
        }
    }

    let file = File::create(path).map_err(|e| io_err(path, e))?;
    serde_json::to_writer_pretty(
        BufWriter::new(file),
        &ProjectFileRef {
            version: FORMAT_VERSION,
            document: &doc,
        },
    )
    .map_err(|e| io_err(path, e))?;
    info!("saved project to {}", path.display());
    Ok(())
}

/// Read a project file, check its version, validate the document and
/// resolve relative source paths against the project directory.
///
/// Sources are not decoded here; call [`compositor::attach_sources`] with a
/// cache when pixels are needed.
pub fn load(path: &Path) -> Result<Document> {
    let file = File::open(path).map_err(|e| io_err(path, e))?;
    let parsed: ProjectFile =
        serde_json::from_reader(BufReader::new(file)).map_err(|e| io_err(path, e))?;

    if parsed.version > FORMAT_VERSION {
        return Err(EngineError::Validation(format!(
            "project version {} is newer than supported version {FORMAT_VERSION}",
            parsed.version
        )));
    }

    let mut doc = parsed.document;
    if let Some(dir) = path.parent() {
        for layer in doc.layers_mut() {
            if let Some(src) = &layer.source_path {
                let p = Path::new(src);
                if p.is_relative() {
                    layer.source_path =
                        Some(dir.join(p).to_string_lossy().into_owned());
                }
            }
        }
    }
    doc.validate()?;
    Ok(doc)
}

/// Convenience: load a project and decode its sources.
pub fn open(path: &Path, cache: &mut SourceCache) -> Result<Document> {
    let mut doc = load(path)?;
    compositor::attach_sources(&mut doc, cache);
    Ok(doc)
}

/// Flatten the document and encode it as PNG.
pub fn export_png(doc: &Document, path: &Path) -> Result<()> {
    let flat = compositor::composite(doc)?;
    flat.to_rgba_image()
        .save(path)
        .map_err(|e| io_err(path, e))?;
    info!("exported {}x{} PNG to {}", doc.width, doc.height, path.display());
    Ok(())
}
