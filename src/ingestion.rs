use crate::error::{BridgeError, Result};
use log::debug;
use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

/// An untyped table as uploaded: every cell is raw text, an empty cell means
/// the value is missing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<BTreeMap<String, String>>,
}

impl RawTable {
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self> {
        let mut csvr = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);

        let headers: Vec<String> = csvr
            .headers()?
            .iter()
            .enumerate()
            .map(|(idx, h)| {
                if idx == 0 {
                    h.trim_start_matches('\u{feff}').to_string()
                } else {
                    h.to_string()
                }
            })
            .collect();

        let mut rows = Vec::new();
        for record in csvr.records() {
            let record = record?;
            let row: BTreeMap<String, String> = headers
                .iter()
                .enumerate()
                .map(|(idx, header)| (header.clone(), record.get(idx).unwrap_or("").to_string()))
                .collect();
            rows.push(row);
        }

        Ok(Self { headers, rows })
    }

    pub fn from_csv_str(data: &str) -> Result<Self> {
        Self::from_csv_reader(data.as_bytes())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.headers.iter().any(|h| h == column)
    }

    pub fn require_columns(&self, table: &str, required: &[&str]) -> Result<()> {
        for column in required {
            if !self.has_column(column) {
                return Err(BridgeError::MissingColumn {
                    table: table.to_string(),
                    column: column.to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Named byte objects the two input tables are fetched from.
pub trait BlobStore {
    fn put(&mut self, name: &str, bytes: &[u8]) -> Result<()>;

    fn get(&self, name: &str) -> Result<Vec<u8>>;

    fn contains(&self, name: &str) -> bool;

    fn fetch_table(&self, name: &str) -> Result<RawTable> {
        let bytes = self.get(name)?;
        RawTable::from_csv_reader(bytes.as_slice())
    }
}

/// Rejects names that are empty or could address anything outside a flat
/// namespace.
pub fn validate_table_name(name: &str) -> Result<()> {
    let invalid = name.trim().is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0');
    if invalid {
        return Err(BridgeError::InvalidTableName(name.to_string()));
    }
    Ok(())
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryBlobStore {
    objects: BTreeMap<String, Vec<u8>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn names(&self) -> Vec<String> {
        self.objects.keys().cloned().collect()
    }
}

impl BlobStore for InMemoryBlobStore {
    fn put(&mut self, name: &str, bytes: &[u8]) -> Result<()> {
        validate_table_name(name)?;
        self.objects.insert(name.to_string(), bytes.to_vec());
        Ok(())
    }

    fn get(&self, name: &str) -> Result<Vec<u8>> {
        validate_table_name(name)?;
        self.objects
            .get(name)
            .cloned()
            .ok_or_else(|| BridgeError::TableNotFound(name.to_string()))
    }

    fn contains(&self, name: &str) -> bool {
        self.objects.contains_key(name)
    }
}

/// Directory-backed store, one file per object, keyed by file name.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, name: &str) -> Result<PathBuf> {
        validate_table_name(name)?;
        Ok(self.root.join(name))
    }
}

impl BlobStore for FsBlobStore {
    fn put(&mut self, name: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(name)?;
        fs::write(&path, bytes)?;
        debug!("Stored {} bytes at {}", bytes.len(), path.display());
        Ok(())
    }

    fn get(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.path_for(name)?;
        if !path.is_file() {
            return Err(BridgeError::TableNotFound(name.to_string()));
        }
        Ok(fs::read(path)?)
    }

    fn contains(&self, name: &str) -> bool {
        self.path_for(name).map(|p| p.is_file()).unwrap_or(false)
    }
}

/// Persists a batch of uploaded files, overwriting objects with the same
/// name. Returns the stored names in upload order.
pub fn store_uploads<S, N, B>(store: &mut S, files: &[(N, B)]) -> Result<Vec<String>>
where
    S: BlobStore + ?Sized,
    N: AsRef<str>,
    B: AsRef<[u8]>,
{
    let mut stored = Vec::with_capacity(files.len());
    for (name, bytes) in files {
        store.put(name.as_ref(), bytes.as_ref())?;
        stored.push(name.as_ref().to_string());
    }
    Ok(stored)
}
