pub use log::{debug, error, info, trace, warn};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Sql(#[from] rusqlite::Error),
    #[error(transparent)]
    Xml(#[from] serde_xml_rs::Error),
    #[error(transparent)]
    CompsXml(#[from] quick_xml::DeError),
    #[error(transparent)]
    QuickXml(#[from] quick_xml::Error),

    #[error("Invalid query term {0:?}: {1}")]
    InvalidTerm(String, String),
    #[error("Invalid size range: {0}")]
    InvalidSizeRange(String),
    #[error("Invalid dependency value: {0:?}")]
    InvalidDependency(String),
    #[error("Invalid boolean value: {0:?}")]
    InvalidBoolean(String),
    #[error("Invalid repository name {0:?}, expected [0-9A-Za-z_-]+")]
    InvalidRepoName(String),
    #[error("Invalid architecture: {0:?}")]
    InvalidArch(String),
    #[error("Invalid checksum algorithm: {0:?}")]
    InvalidChecksumAlgo(String),
    #[error("Invalid compression type: {0:?}")]
    InvalidCompression(String),
    #[error("Invalid metadata-filename scheme: {0:?}")]
    InvalidFilenameScheme(String),
    #[error("Invalid options: {0}")]
    InvalidOptions(String),

    #[error("Repository not found: {0:?}")]
    RepoNotFound(String),
    #[error("Architecture not supported: {0:?}")]
    ArchNotFound(String),
    #[error("Package not found: {0:?}")]
    PackageNotFound(String),
    #[error("Metadata entry not found: {0:?}")]
    MetadataNotFound(String),

    #[error("Checksum mismatch for {entry:?}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        entry: String,
        expected: String,
        actual: String,
    },
    #[error("repomd.xml is older than database file {0:?}")]
    StaleManifest(String),

    #[error("Failed to read RPM file {0:?}: {1}")]
    Rpm(String, String),
    #[error("Permission error: {0}")]
    Permission(String),
    #[error("createrepo_c exited with {status}: {stderr}")]
    SubprocessFailed {
        status: std::process::ExitStatus,
        stderr: String,
    },

    #[error("Signing key is missing")]
    SigningKeyMissing,
    #[error("Signing key is empty")]
    SigningKeyEmpty,
    #[error("Signing key is encrypted and no passphrase was supplied")]
    SigningKeyEncrypted,
    #[error("Signature does not match")]
    SignatureMismatch,
    #[error("OpenPGP error: {0}")]
    Pgp(String),

    #[error("Repository is not initialized")]
    NotInitialized,
    #[error("Repository storage is already initialized")]
    AlreadyInitialized,
    #[error("Cannot register a custom SQL function after storage has been built")]
    RegistryFrozen,
}

pub type Result<T> = std::result::Result<T, Error>;
