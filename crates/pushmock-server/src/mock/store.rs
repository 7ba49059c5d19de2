//! On-disk mock store.
//!
//! Documents live under `<root>/Domains/<domain>/SSE/<fileId>.json`, one
//! JSON object per file. The file id is derived deterministically from the
//! identity (and scenario, when present) so repeated saves of the same
//! identity+scenario overwrite the same file.

use super::types::MockDefinition;
use base64::Engine as _;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Default domain for documents saved without an explicit one.
pub const DEFAULT_DOMAIN: &str = "Dev";

const SSE_FOLDER: &str = "SSE";
const FILE_ID_LEN: usize = 20;

/// A definition together with where it is stored.
#[derive(Debug, Clone)]
pub struct StoredMock {
    pub domain: String,
    pub file_id: String,
    pub definition: MockDefinition,
}

/// Read-only enumeration seam consumed by the resolver.
///
/// Implementations must enumerate in a stable, repeatable order so that
/// resolution ties break deterministically across runs.
pub trait MockStore: Send + Sync {
    fn list_all(&self) -> Vec<StoredMock>;
}

/// Filesystem-backed store rooted at a mock folder.
pub struct FileMockStore {
    root: PathBuf,
}

impl FileMockStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the seeded directory layout (`Domains/Dev/SSE/`) if absent.
    pub fn ensure_layout(&self) -> Result<(), std::io::Error> {
        fs::create_dir_all(self.domain_folder(DEFAULT_DOMAIN))
    }

    fn domains_path(&self) -> PathBuf {
        self.root.join("Domains")
    }

    fn domain_folder(&self, domain: &str) -> PathBuf {
        self.domains_path().join(domain).join(SSE_FOLDER)
    }

    fn document_path(&self, domain: &str, file_id: &str) -> PathBuf {
        self.domain_folder(domain).join(format!("{file_id}.json"))
    }

    /// Derive the deterministic file id for an identity + optional scenario.
    pub fn file_id(url: &str, scenario: Option<&str>) -> String {
        let seed = match scenario {
            Some(scenario) => format!("{url}#{scenario}"),
            None => url.to_string(),
        };
        let encoded = base64::engine::general_purpose::STANDARD.encode(seed);
        encoded
            .chars()
            .filter(|c| !matches!(c, '/' | '+' | '='))
            .take(FILE_ID_LEN)
            .collect()
    }

    /// Sorted domain directory names, or empty when the layout is missing.
    fn domains(&self) -> Vec<String> {
        let Ok(entries) = fs::read_dir(self.domains_path()) else {
            debug!("Domains folder not found under {:?}", self.root);
            return Vec::new();
        };
        let mut domains: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect();
        domains.sort();
        domains
    }

    /// Sorted `.json` file stems within one domain's SSE folder.
    fn file_ids_in(&self, domain: &str) -> Vec<String> {
        let Ok(entries) = fs::read_dir(self.domain_folder(domain)) else {
            return Vec::new();
        };
        let mut ids: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .filter_map(|path| {
                path.file_stem()
                    .and_then(|stem| stem.to_str())
                    .map(str::to_string)
            })
            .collect();
        ids.sort();
        ids
    }

    fn read_document(&self, domain: &str, file_id: &str) -> Option<MockDefinition> {
        let path = self.document_path(domain, file_id);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Skipping unreadable mock file {:?}: {}", path, e);
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(definition) => Some(definition),
            Err(e) => {
                warn!("Skipping corrupt mock file {:?}: {}", path, e);
                None
            }
        }
    }

    /// Save a definition, deriving domain-relative placement and file id.
    /// Overwrites any previous document for the same identity+scenario.
    pub fn save(
        &self,
        domain: &str,
        definition: &MockDefinition,
    ) -> Result<StoredMock, std::io::Error> {
        let file_id = Self::file_id(&definition.url, definition.scenario.as_deref());
        self.save_with_id(domain, &file_id, definition)
    }

    /// Save a definition under an explicit file id (admin updates).
    pub fn save_with_id(
        &self,
        domain: &str,
        file_id: &str,
        definition: &MockDefinition,
    ) -> Result<StoredMock, std::io::Error> {
        fs::create_dir_all(self.domain_folder(domain))?;
        let json = serde_json::to_string_pretty(definition)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
        fs::write(self.document_path(domain, file_id), json)?;
        Ok(StoredMock {
            domain: domain.to_string(),
            file_id: file_id.to_string(),
            definition: definition.clone(),
        })
    }

    /// Look up a document by file id, searching every domain.
    pub fn find_by_id(&self, file_id: &str) -> Option<StoredMock> {
        for domain in self.domains() {
            if self.document_path(&domain, file_id).exists() {
                let definition = self.read_document(&domain, file_id)?;
                return Some(StoredMock {
                    domain,
                    file_id: file_id.to_string(),
                    definition,
                });
            }
        }
        None
    }

    /// Whether a document exists for the id within the given domain.
    pub fn exists(&self, domain: &str, file_id: &str) -> bool {
        self.document_path(domain, file_id).exists()
    }

    /// Read one document from a known domain.
    pub fn get(&self, domain: &str, file_id: &str) -> Option<StoredMock> {
        if !self.exists(domain, file_id) {
            return None;
        }
        self.read_document(domain, file_id).map(|definition| StoredMock {
            domain: domain.to_string(),
            file_id: file_id.to_string(),
            definition,
        })
    }

    /// Delete a document. Returns false when it was not present.
    pub fn delete(&self, domain: &str, file_id: &str) -> Result<bool, std::io::Error> {
        let path = self.document_path(domain, file_id);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(path)?;
        Ok(true)
    }
}

impl MockStore for FileMockStore {
    /// Enumerate every stored definition, lexically by domain then file id.
    /// Unreadable or corrupt files are skipped; enumeration continues.
    fn list_all(&self) -> Vec<StoredMock> {
        let mut mocks = Vec::new();
        for domain in self.domains() {
            for file_id in self.file_ids_in(&domain) {
                if let Some(definition) = self.read_document(&domain, &file_id) {
                    mocks.push(StoredMock {
                        domain: domain.clone(),
                        file_id,
                        definition,
                    });
                }
            }
        }
        mocks
    }
}
