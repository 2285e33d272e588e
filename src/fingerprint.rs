//! blake3 fingerprints of files and table states

use crate::error::Result;
use crate::substrate::{as_text, quote_ident, Substrate};
use crate::table::ROW_ID;
use blake3::Hasher;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Hex blake3 of a file's contents
pub fn file_checksum(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Hasher::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

/// Fingerprint of a table's complete state: column names, column types,
/// and every value (internal columns included) in row identity order.
///
/// Two tables with equal fingerprints are indistinguishable to the engine.
pub fn table_fingerprint(db: &Substrate, table: &str) -> Result<String> {
    let columns = db.columns(table)?;
    let mut hasher = Hasher::new();

    for column in &columns {
        hasher.update(column.name.as_bytes());
        hasher.update(b":");
        hasher.update(column.data_type.as_bytes());
        hasher.update(b"|");
    }
    hasher.update(b"||");

    let names: Vec<String> = columns.iter().map(|c| c.name.clone()).collect();
    let select = names.iter().map(|c| as_text(c)).collect::<Vec<_>>().join(", ");
    let order = if names.iter().any(|c| c == ROW_ID) {
        quote_ident(ROW_ID)
    } else {
        (1..=names.len()).map(|i| i.to_string()).collect::<Vec<_>>().join(", ")
    };
    let rows = db.query_text(
        &format!("SELECT {} FROM {} ORDER BY {}", select, quote_ident(table), order),
        names.len(),
    )?;

    for row in rows {
        for value in row {
            match value {
                // Length prefix keeps "a|b" distinct from "a" + "b"
                Some(v) => {
                    hasher.update(&(v.len() as u64).to_le_bytes());
                    hasher.update(v.as_bytes());
                }
                None => {
                    hasher.update(b"\xff\xff\xff\xff\xff\xff\xff\xff");
                }
            }
        }
        hasher.update(b"\n");
    }

    Ok(hasher.finalize().to_hex().to_string())
}
