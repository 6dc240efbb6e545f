//! Binary storage for per-family embedding matrices.
//!
//! Two files per family, both inside the data directory:
//!
//! `<family>_codes.json`: JSON array of codes, one per matrix row.
//!
//! `<family>_embeddings.bin`:
//!
//! Header (51 bytes):
//! - version: u8 (1)
//! - model_id: [u8; 32] (SHA256 hash of model name)
//! - dimensions: u32 (little-endian)
//! - rows: u64 (little-endian)
//! - flags: u16 (reserved, 0)
//! - checksum: u32 (CRC32 of header fields before checksum)
//!
//! Body: rows * dimensions f32 values (little-endian, row-major)

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::family::CodeFamily;
use crate::semantic::index::EmbeddingMatrix;

/// Current file format version
const FORMAT_VERSION: u8 = 1;

/// Header size in bytes: version(1) + model_id(32) + dimensions(4) + rows(8) + flags(2) + checksum(4)
const HEADER_SIZE: usize = 51;

/// Header bytes covered by the checksum
const CHECKSUMMED: usize = HEADER_SIZE - 4;

/// Errors that can occur while loading or saving a store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Embedding store for {family} not found at {path}. Run: medcode build-index --family {family}")]
    NotFound { family: CodeFamily, path: PathBuf },

    #[error("Embedding store {path} is corrupt: {reason}. Regenerate with: medcode build-index")]
    Corrupt { path: PathBuf, reason: String },

    #[error("Embedding store {path} was built with a different model. Regenerate with: medcode build-index")]
    ModelMismatch { path: PathBuf },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn corrupt(path: &Path, reason: impl Into<String>) -> Self {
        StoreError::Corrupt {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }
}

/// Storage manager for embedding matrices.
#[derive(Debug, Clone)]
pub struct EmbeddingStorage {
    data_dir: PathBuf,
}

impl EmbeddingStorage {
    pub fn new(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }

    pub fn matrix_path(&self, family: CodeFamily) -> PathBuf {
        self.data_dir.join(family.matrix_file())
    }

    pub fn codes_path(&self, family: CodeFamily) -> PathBuf {
        self.data_dir.join(family.codes_file())
    }

    /// Check if both artifacts exist for `family`.
    pub fn exists(&self, family: CodeFamily) -> bool {
        self.matrix_path(family).exists() && self.codes_path(family).exists()
    }

    /// Load the code list and matrix for `family`.
    ///
    /// When `expected_model_id` is given, a store built with another model is
    /// rejected. Vectors are returned exactly as stored.
    pub fn load(
        &self,
        family: CodeFamily,
        expected_model_id: Option<&[u8; 32]>,
    ) -> Result<EmbeddingMatrix, StoreError> {
        let matrix_path = self.matrix_path(family);
        let codes_path = self.codes_path(family);

        for path in [&matrix_path, &codes_path] {
            if !path.exists() {
                return Err(StoreError::NotFound {
                    family,
                    path: path.clone(),
                });
            }
        }

        let codes = Self::read_codes(&codes_path)?;

        let file = File::open(&matrix_path).map_err(|e| StoreError::io(&matrix_path, e))?;
        let file_len = file
            .metadata()
            .map_err(|e| StoreError::io(&matrix_path, e))?
            .len();
        let mut reader = BufReader::new(file);

        let header = Self::read_header(&mut reader, &matrix_path)?;
        if let Some(expected) = expected_model_id {
            if header.model_id != *expected {
                return Err(StoreError::ModelMismatch { path: matrix_path });
            }
        }

        if codes.len() as u64 != header.rows {
            return Err(StoreError::corrupt(
                &matrix_path,
                format!(
                    "{} codes in {} vs {} embedding rows",
                    codes.len(),
                    codes_path.display(),
                    header.rows
                ),
            ));
        }

        let data = Self::read_body(&mut reader, &matrix_path, &header, file_len)?;

        EmbeddingMatrix::new(codes, header.dimensions as usize, data)
            .map_err(|e| StoreError::corrupt(&matrix_path, e.to_string()))
    }

    /// Save the code list and matrix for `family`.
    ///
    /// Uses atomic writes: temp file -> fsync -> rename
    pub fn save(
        &self,
        family: CodeFamily,
        matrix: &EmbeddingMatrix,
        model_id: &[u8; 32],
    ) -> Result<(), StoreError> {
        std::fs::create_dir_all(&self.data_dir).map_err(|e| StoreError::io(&self.data_dir, e))?;

        let codes_path = self.codes_path(family);
        let codes_json = serde_json::to_vec(matrix.codes())
            .map_err(|e| StoreError::io(&codes_path, std::io::Error::new(std::io::ErrorKind::Other, e)))?;
        Self::write_atomic(&codes_path, |writer| writer.write_all(&codes_json))?;

        let matrix_path = self.matrix_path(family);
        Self::write_atomic(&matrix_path, |writer| {
            let header = Header {
                version: FORMAT_VERSION,
                model_id: *model_id,
                dimensions: matrix.dimensions() as u32,
                rows: matrix.len() as u64,
                flags: 0,
            };
            writer.write_all(&header.encode())?;
            for &value in matrix.data() {
                writer.write_all(&value.to_le_bytes())?;
            }
            Ok(())
        })?;

        log::info!(
            "Saved {} {} embeddings ({} dimensions) to {}",
            matrix.len(),
            family,
            matrix.dimensions(),
            matrix_path.display()
        );
        Ok(())
    }

    fn write_atomic<F>(path: &Path, write: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut BufWriter<File>) -> std::io::Result<()>,
    {
        let temp_path = path.with_extension("tmp");

        let result = (|| {
            let file = File::create(&temp_path)?;
            let mut writer = BufWriter::new(file);
            write(&mut writer)?;
            writer.flush()?;
            let file = writer
                .into_inner()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
            file.sync_all()
        })();

        if let Err(e) = result {
            // Clean up temp file on error
            let _ = std::fs::remove_file(&temp_path);
            return Err(StoreError::io(path, e));
        }

        std::fs::rename(&temp_path, path).map_err(|e| StoreError::io(path, e))
    }

    fn read_codes(path: &Path) -> Result<Vec<String>, StoreError> {
        let raw = std::fs::read(path).map_err(|e| StoreError::io(path, e))?;
        serde_json::from_slice(&raw)
            .map_err(|e| StoreError::corrupt(path, format!("invalid code list: {}", e)))
    }

    fn read_header(reader: &mut impl Read, path: &Path) -> Result<Header, StoreError> {
        let mut bytes = [0u8; HEADER_SIZE];
        reader
            .read_exact(&mut bytes)
            .map_err(|_| StoreError::corrupt(path, "truncated header"))?;

        let version = bytes[0];
        if version == 0 || version > FORMAT_VERSION {
            return Err(StoreError::corrupt(
                path,
                format!("unsupported format version {}", version),
            ));
        }

        let stored_checksum = u32::from_le_bytes([bytes[47], bytes[48], bytes[49], bytes[50]]);
        if stored_checksum != crc32fast::hash(&bytes[..CHECKSUMMED]) {
            return Err(StoreError::corrupt(path, "header checksum mismatch"));
        }

        let mut model_id = [0u8; 32];
        model_id.copy_from_slice(&bytes[1..33]);

        let mut dimensions = [0u8; 4];
        dimensions.copy_from_slice(&bytes[33..37]);
        let mut rows = [0u8; 8];
        rows.copy_from_slice(&bytes[37..45]);
        let mut flags = [0u8; 2];
        flags.copy_from_slice(&bytes[45..47]);

        Ok(Header {
            version,
            model_id,
            dimensions: u32::from_le_bytes(dimensions),
            rows: u64::from_le_bytes(rows),
            flags: u16::from_le_bytes(flags),
        })
    }

    /// Read the matrix body. The header's size is checked against `file_len`
    /// before anything is allocated.
    fn read_body(
        reader: &mut impl Read,
        path: &Path,
        header: &Header,
        file_len: u64,
    ) -> Result<Vec<f32>, StoreError> {
        let values = header
            .rows
            .checked_mul(u64::from(header.dimensions))
            .ok_or_else(|| StoreError::corrupt(path, "matrix size overflows"))?;
        let expected_len = values
            .checked_mul(4)
            .and_then(|body| body.checked_add(HEADER_SIZE as u64))
            .ok_or_else(|| StoreError::corrupt(path, "matrix size overflows"))?;

        if file_len < expected_len {
            return Err(StoreError::corrupt(
                path,
                format!("expected {} embedding values, file is {} bytes", values, file_len),
            ));
        }
        if file_len > expected_len {
            return Err(StoreError::corrupt(path, "trailing bytes after matrix"));
        }

        let body_len = usize::try_from(values * 4)
            .map_err(|_| StoreError::corrupt(path, "matrix too large for this platform"))?;
        let mut bytes = vec![0u8; body_len];
        reader
            .read_exact(&mut bytes)
            .map_err(|_| StoreError::corrupt(path, format!("expected {} embedding values", values)))?;

        let mut trailing = [0u8; 1];
        if reader.read(&mut trailing).map_err(|e| StoreError::io(path, e))? != 0 {
            return Err(StoreError::corrupt(path, "trailing bytes after matrix"));
        }

        Ok(bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect())
    }
}

/// File header structure.
#[derive(Debug)]
struct Header {
    version: u8,
    model_id: [u8; 32],
    dimensions: u32,
    rows: u64,
    flags: u16,
}

impl Header {
    fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0] = self.version;
        bytes[1..33].copy_from_slice(&self.model_id);
        bytes[33..37].copy_from_slice(&self.dimensions.to_le_bytes());
        bytes[37..45].copy_from_slice(&self.rows.to_le_bytes());
        bytes[45..47].copy_from_slice(&self.flags.to_le_bytes());

        let checksum = crc32fast::hash(&bytes[..CHECKSUMMED]);
        bytes[47..51].copy_from_slice(&checksum.to_le_bytes());
        bytes
    }
}
