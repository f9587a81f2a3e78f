use thiserror::Error;

/// I/O errors that can occur when reading a slide's backing file(s).
#[derive(Debug, Clone, Error)]
pub enum IoError {
    /// Requested range exceeds resource bounds
    #[error("Range out of bounds: requested {requested} bytes at offset {offset}, size is {size}")]
    RangeOutOfBounds {
        offset: u64,
        requested: u64,
        size: u64,
    },

    /// The underlying file system read/seek/open failed
    #[error("I/O failure on {path}: {message}")]
    Os { path: String, message: String },

    /// Object not found
    #[error("File not found: {0}")]
    NotFound(String),

    /// The file handle pool could not hand out a handle
    #[error("File handle pool exhausted for {0}")]
    HandlePoolExhausted(String),
}

/// Errors related to format detection and validation.
#[derive(Debug, Clone, Error)]
pub enum FormatError {
    /// I/O error while reading the file
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// TIFF parsing error
    #[error("TIFF error: {0}")]
    Tiff(#[from] TiffError),

    /// DICOM parsing error
    #[error("DICOM error: {0}")]
    Dicom(#[from] DicomError),

    /// File format is not supported by any backend, or by this backend's
    /// confirmed subset of a proprietary format
    #[error("Unsupported format: {reason}")]
    UnsupportedFormat { reason: String },
}

/// Errors that can occur when parsing TIFF / BigTIFF / NDPI files.
#[derive(Debug, Clone, Error)]
pub enum TiffError {
    /// I/O error while reading the file
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// Invalid TIFF magic bytes (not II or MM)
    #[error("Invalid TIFF magic bytes: expected 0x4949 (II) or 0x4D4D (MM), got 0x{0:04X}")]
    InvalidMagic(u16),

    /// Invalid TIFF version number
    #[error("Invalid TIFF version: expected 42 (TIFF) or 43 (BigTIFF), got {0}")]
    InvalidVersion(u16),

    /// Invalid BigTIFF offset byte size (must be 8)
    #[error("Invalid BigTIFF offset byte size: expected 8, got {0}")]
    InvalidBigTiffOffsetSize(u16),

    /// File is too small to contain a valid TIFF header
    #[error("File too small: need at least {required} bytes, got {actual}")]
    FileTooSmall { required: u64, actual: u64 },

    /// Invalid IFD offset (points outside file or to invalid location)
    #[error("Invalid IFD offset: {0}")]
    InvalidIfdOffset(u64),

    /// A directory chain revisited an offset already seen
    #[error("Loop detected in IFD chain at offset {0}")]
    LoopDetected(u64),

    /// Required tag is missing from IFD
    #[error("Missing required tag: {0}")]
    MissingTag(&'static str),

    /// Tag has unexpected type or count
    #[error("Invalid tag value for {tag}: {message}")]
    InvalidTagValue { tag: &'static str, message: String },

    /// Unsupported compression scheme
    #[error("Unsupported compression: {0}")]
    UnsupportedCompression(String),

    /// File uses strips instead of tiles
    #[error("Unsupported organization: file uses strips instead of tiles")]
    StripOrganization,

    /// Unknown field type in IFD entry
    #[error("Unknown field type: {0}")]
    UnknownFieldType(u16),

    /// Tag count would overflow an addressable byte length
    #[error("Tag {0} count overflows: count={1} size={2}")]
    CountOverflow(&'static str, u64, usize),
}

/// Errors that can occur when parsing a DICOM WSI series.
#[derive(Debug, Clone, Error)]
pub enum DicomError {
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    #[error("Not a DICOM file (missing DICM preamble marker)")]
    NotDicom,

    #[error("Missing required element: {0}")]
    MissingElement(&'static str),

    #[error("Unsupported transfer syntax: {0}")]
    UnsupportedTransferSyntax(String),

    #[error("Series {0} has no VOLUME instances")]
    EmptySeries(String),
}

/// Crate-wide error kind, matching SPEC_FULL.md §7 one-to-one. Carried by
/// every public-facing `SlideError` so callers can branch on the kind
/// without pattern-matching the full backend-specific cause chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// `detect` failed for every backend
    NotASlide,
    /// Metadata malformed, or a recognised-but-unsupported variant
    FormatFailure,
    /// A requested property/tag is absent
    NoValue,
    /// A read, seek, or open failed or was truncated
    IoFailure,
    /// A codec returned an error
    DecodeFailure,
    /// Caller-supplied argument is out of range (negative size, bad level, …)
    InvalidArgument,
}

/// The crate's top-level error type. Every public `Slide` operation that
/// can fail returns this; on `open`, a copy of it is also stored in the
/// slide's sticky error cell.
#[derive(Debug, Clone, Error)]
#[error("{kind:?}: {message}")]
pub struct SlideError {
    pub kind: ErrorKind,
    pub message: String,
    #[source]
    pub source: Option<std::sync::Arc<dyn std::error::Error + Send + Sync>>,
}

impl SlideError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        SlideError {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        kind: ErrorKind,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        SlideError {
            kind,
            message: message.into(),
            source: Some(std::sync::Arc::new(source)),
        }
    }

    pub fn not_a_slide(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotASlide, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    pub fn no_value(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NoValue, message)
    }
}

impl From<FormatError> for SlideError {
    fn from(err: FormatError) -> Self {
        let kind = match &err {
            FormatError::Io(_) => ErrorKind::IoFailure,
            FormatError::Tiff(TiffError::Io(_)) => ErrorKind::IoFailure,
            FormatError::Tiff(_) => ErrorKind::FormatFailure,
            FormatError::Dicom(DicomError::Io(_)) => ErrorKind::IoFailure,
            FormatError::Dicom(_) => ErrorKind::FormatFailure,
            FormatError::UnsupportedFormat { .. } => ErrorKind::FormatFailure,
        };
        SlideError::with_source(kind, err.to_string(), err)
    }
}

impl From<IoError> for SlideError {
    fn from(err: IoError) -> Self {
        SlideError::with_source(ErrorKind::IoFailure, err.to_string(), err)
    }
}

impl From<TiffError> for SlideError {
    fn from(err: TiffError) -> Self {
        let kind = match &err {
            TiffError::Io(_) => ErrorKind::IoFailure,
            _ => ErrorKind::FormatFailure,
        };
        SlideError::with_source(kind, err.to_string(), err)
    }
}

impl From<DicomError> for SlideError {
    fn from(err: DicomError) -> Self {
        let kind = match &err {
            DicomError::Io(_) => ErrorKind::IoFailure,
            _ => ErrorKind::FormatFailure,
        };
        SlideError::with_source(kind, err.to_string(), err)
    }
}
