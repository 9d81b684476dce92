//! On-disk database images.
//!
//! Layout: `IDBQ` magic, format version (u32 LE), crc32 of the payload
//! (u32 LE), payload length (u64 LE), then the bincode payload. Records are
//! stored as raw BSON bytes; indexes are rebuilt on load.

use super::store::StoreData;
use crate::errors::DbError;
use crate::schema::StoreSchema;
use crate::types::Key;
use bincode::config::standard;
use bincode::serde::{decode_from_slice, encode_to_vec};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const MAGIC: &[u8; 4] = b"IDBQ";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 4 + 4 + 4 + 8;

#[derive(Debug, Serialize, Deserialize)]
struct DatabaseImage {
    name: String,
    version: u32,
    saved_at: String,
    stores: Vec<StoreImage>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreImage {
    /// JSON, because key paths are untagged and bincode is not self-describing.
    schema_json: String,
    next_key: u64,
    records: Vec<(Key, Vec<u8>)>,
}

/// A decoded image: version plus stores with rebuilt indexes.
#[derive(Debug)]
pub struct LoadedImage {
    pub version: u32,
    pub saved_at: String,
    pub stores: BTreeMap<String, StoreData>,
}

/// File holding database `name` under `dir`. Characters outside
/// `[A-Za-z0-9_.-]` are replaced so any database name maps to one file.
#[must_use]
pub fn image_path(dir: &Path, name: &str) -> PathBuf {
    let safe: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    dir.join(format!("{safe}.idb"))
}

fn io_err<'a>(op: &'a str, path: &'a Path) -> impl FnOnce(std::io::Error) -> DbError + 'a {
    move |e| DbError::Io(format!("{op} {}: {e}", path.display()))
}

fn corrupt(path: &Path, what: impl std::fmt::Display) -> DbError {
    DbError::CorruptImage(format!("{}: {what}", path.display()))
}

/// Writes the image atomically (temp file + rename).
///
/// # Errors
/// Returns `Io`, `Bson` or `Encode` errors.
pub fn save(
    path: &Path,
    name: &str,
    version: u32,
    stores: &BTreeMap<String, Arc<StoreData>>,
) -> Result<(), DbError> {
    let mut images = Vec::with_capacity(stores.len());
    for store in stores.values() {
        let mut records = Vec::with_capacity(store.records.len());
        for (k, rec) in &store.records {
            records.push((k.clone(), rec.to_vec()?));
        }
        images.push(StoreImage {
            schema_json: serde_json::to_string(&store.schema)?,
            next_key: store.next_key,
            records,
        });
    }
    let image = DatabaseImage {
        name: name.to_string(),
        version,
        saved_at: chrono::Utc::now().to_rfc3339(),
        stores: images,
    };
    let payload = encode_to_vec(&image, standard())?;
    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
    buf.extend_from_slice(MAGIC);
    buf.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    buf.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    buf.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    buf.extend_from_slice(&payload);

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err("create", parent))?;
    }
    let tmp = path.with_extension("idb.tmp");
    {
        let mut f = File::create(&tmp).map_err(io_err("create", &tmp))?;
        f.write_all(&buf).map_err(io_err("write", &tmp))?;
        f.sync_all().map_err(io_err("sync", &tmp))?;
    }
    fs::rename(&tmp, path).map_err(io_err("rename to", path))?;
    log::debug!("saved image {} (v{version}, {} bytes)", path.display(), buf.len());
    Ok(())
}

/// Reads an image; `Ok(None)` when the file does not exist.
///
/// # Errors
/// `CorruptImage` on bad magic, unknown format, length or checksum mismatch.
pub fn load(path: &Path) -> Result<Option<LoadedImage>, DbError> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_err("read", path)(e)),
    };
    if bytes.len() < HEADER_LEN || &bytes[..4] != MAGIC {
        return Err(corrupt(path, "bad header"));
    }
    let word = |at: usize| {
        let mut w = [0u8; 4];
        w.copy_from_slice(&bytes[at..at + 4]);
        u32::from_le_bytes(w)
    };
    let format = word(4);
    if format != FORMAT_VERSION {
        return Err(corrupt(path, format_args!("unsupported format {format}")));
    }
    let crc = word(8);
    let mut len_bytes = [0u8; 8];
    len_bytes.copy_from_slice(&bytes[12..HEADER_LEN]);
    let len = usize::try_from(u64::from_le_bytes(len_bytes))
        .map_err(|_| corrupt(path, "length overflow"))?;
    let payload = &bytes[HEADER_LEN..];
    if payload.len() != len {
        let found = payload.len();
        return Err(corrupt(
            path,
            format_args!("expected {len} payload bytes, found {found}"),
        ));
    }
    if crc32fast::hash(payload) != crc {
        return Err(corrupt(path, "checksum mismatch"));
    }
    let (image, _): (DatabaseImage, usize) = decode_from_slice(payload, standard())?;
    let mut stores = BTreeMap::new();
    for si in image.stores {
        let schema: StoreSchema = serde_json::from_str(&si.schema_json)?;
        let mut data = StoreData::new(schema);
        data.next_key = si.next_key;
        for (k, raw) in si.records {
            let rec = bson::Document::from_reader(&mut &raw[..])?;
            data.records.insert(k, rec);
        }
        data.rebuild_indexes();
        stores.insert(data.schema.name.clone(), data);
    }
    Ok(Some(LoadedImage {
        version: image.version,
        saved_at: image.saved_at,
        stores,
    }))
}

/// Removes an image if present.
///
/// # Errors
/// `Io` for failures other than a missing file.
pub fn remove(path: &Path) -> Result<(), DbError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io_err("remove", path)(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::IndexSchema;
    use crate::types::KeyRange;
    use bson::doc;

    fn sample() -> BTreeMap<String, Arc<StoreData>> {
        let schema = StoreSchema::new("users")
            .key_path("id")
            .auto_increment(true)
            .index(IndexSchema::on("name"));
        let mut s = StoreData::new(schema);
        s.put(doc! {"name": "alice"}, None, true).unwrap();
        s.put(doc! {"name": "bob", "tags": ["x"]}, None, true).unwrap();
        let mut m = BTreeMap::new();
        m.insert("users".to_string(), Arc::new(s));
        m
    }

    #[test]
    fn image_survives_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = image_path(dir.path(), "app");
        save(&path, "app", 3, &sample()).unwrap();
        let loaded = load(&path).unwrap().unwrap();
        assert_eq!(loaded.version, 3);
        let users = &loaded.stores["users"];
        assert_eq!(users.records.len(), 2);
        assert_eq!(users.next_key, 3);
        let by_name = users.index("name").unwrap();
        assert_eq!(by_name.count(&KeyRange::all()), 2);
    }

    #[test]
    fn flipped_payload_byte_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = image_path(dir.path(), "app");
        save(&path, "app", 1, &sample()).unwrap();
        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        fs::write(&path, bytes).unwrap();
        assert!(matches!(load(&path), Err(DbError::CorruptImage(_))));
    }

    #[test]
    fn missing_image_is_none_and_names_are_sanitized() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(&image_path(dir.path(), "nope")).unwrap().is_none());
        assert!(image_path(dir.path(), "a/b c").ends_with("a_b_c.idb"));
    }
}
