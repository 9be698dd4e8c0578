//! Record file readers.
//!
//! Two formats are understood, picked by file extension:
//!
//! - JSON lines (`.jsonl`, `.ndjson`, `.json`): one object per line with an
//!   `id`, optional `title` and `text`, and an `embedding` array.
//! - Binary vectors (`.fvecs`, `.bin`): `[u32 count LE][u32 dim LE]` followed
//!   by `count * dim` little-endian `f32`. Ids are `"{file stem}-{index:08}"`.

use crate::config::MAX_DIMENSION;
use crate::ingest::{IngestError, Record};
use serde::Deserialize;
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::Path;

#[derive(Debug, Deserialize)]
struct JsonRecord {
    id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    text: Option<String>,
    embedding: Vec<Option<f64>>,
}

fn io_err(path: &Path, source: std::io::Error) -> IngestError {
    IngestError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn check_dimension(path: &Path, dim: usize) -> Result<(), IngestError> {
    if dim == 0 || dim > MAX_DIMENSION {
        return Err(IngestError::Malformed {
            path: path.to_path_buf(),
            message: format!("dimension {dim} outside 1..={MAX_DIMENSION}"),
        });
    }
    Ok(())
}

/// Read every record of one file.
pub fn read_file(path: &Path) -> Result<Vec<Record>, IngestError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jsonl" | "ndjson" | "json" => read_jsonl(path),
        "fvecs" | "bin" => read_fvecs(path),
        _ => Err(IngestError::UnsupportedFormat(path.to_path_buf())),
    }
}

/// Read a JSON lines file. Blank lines are skipped; line numbers in errors
/// are 1-based.
pub fn read_jsonl(path: &Path) -> Result<Vec<Record>, IngestError> {
    let file = fs::File::open(path).map_err(|e| io_err(path, e))?;
    let mut records = Vec::new();

    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line_no = idx + 1;
        let line = line.map_err(|e| io_err(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        let raw: JsonRecord = serde_json::from_str(&line).map_err(|source| IngestError::Json {
            path: path.to_path_buf(),
            line: line_no,
            source,
        })?;
        check_dimension(path, raw.embedding.len())?;

        let mut vector = Vec::with_capacity(raw.embedding.len());
        for (i, value) in raw.embedding.iter().enumerate() {
            match value {
                Some(v) => vector.push(*v as f32),
                None => {
                    return Err(IngestError::Malformed {
                        path: path.to_path_buf(),
                        message: format!("line {line_no}: embedding element {i} is null"),
                    })
                }
            }
        }
        records.push(Record {
            id: raw.id,
            vector,
            title: raw.title,
            text: raw.text,
        });
    }
    Ok(records)
}

/// Read a binary vector file.
pub fn read_fvecs(path: &Path) -> Result<Vec<Record>, IngestError> {
    let bytes = fs::read(path).map_err(|e| io_err(path, e))?;
    let malformed = |message: String| IngestError::Malformed {
        path: path.to_path_buf(),
        message,
    };
    if bytes.len() < 8 {
        return Err(malformed(format!("{} bytes, header needs 8", bytes.len())));
    }
    let count = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    let dim = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
    check_dimension(path, dim)?;

    let expected = count
        .checked_mul(dim)
        .and_then(|n| n.checked_mul(4))
        .and_then(|n| n.checked_add(8))
        .ok_or_else(|| malformed(format!("header {count} x {dim} overflows")))?;
    if bytes.len() != expected {
        return Err(malformed(format!(
            "header declares {count} x {dim} vectors ({expected} bytes), file has {}",
            bytes.len()
        )));
    }

    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("vectors");
    let records = bytes[8..]
        .chunks_exact(dim * 4)
        .enumerate()
        .map(|(i, chunk)| Record {
            id: format!("{stem}-{i:08}"),
            vector: chunk
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect(),
            title: None,
            text: None,
        })
        .collect();
    Ok(records)
}

/// Write vectors in the binary format read by [`read_fvecs`].
pub fn write_fvecs(path: &Path, vectors: &[Vec<f32>]) -> Result<(), IngestError> {
    let dim = vectors.first().map_or(0, Vec::len);
    check_dimension(path, dim)?;
    if let Some(v) = vectors.iter().find(|v| v.len() != dim) {
        return Err(IngestError::Malformed {
            path: path.to_path_buf(),
            message: format!("mixed dimensions {dim} and {}", v.len()),
        });
    }
    let mut out = Vec::with_capacity(8 + vectors.len() * dim * 4);
    out.extend_from_slice(&(vectors.len() as u32).to_le_bytes());
    out.extend_from_slice(&(dim as u32).to_le_bytes());
    for x in vectors.iter().flatten() {
        out.extend_from_slice(&x.to_le_bytes());
    }
    fs::write(path, out).map_err(|e| io_err(path, e))
}
