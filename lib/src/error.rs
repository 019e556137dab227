use zstd_safe::{ErrorCode, get_error_name};

/// A `Result` alias where the `Err` case is `bgzf2::Error`.
pub type Result<T> = core::result::Result<T, Error>;

/// The errors that may occur when working with this crate.
#[derive(Debug)]
pub struct Error {
    kind: Kind,
}

impl Error {
    /// A custom error.
    pub fn other<E>(err: E) -> Self
    where
        E: Into<Box<dyn core::error::Error + Send + Sync>>,
    {
        Self {
            kind: Kind::Other(err.into()),
        }
    }

    /// Returns true if the error cannot be categorized into any other kind.
    pub fn is_other(&self) -> bool {
        matches!(self.kind, Kind::Other(_))
    }

    pub(crate) fn format(detail: &'static str) -> Self {
        Self {
            kind: Kind::Format(detail),
        }
    }

    /// Returns true if the error origins from malformed container data.
    pub fn is_format(&self) -> bool {
        matches!(self.kind, Kind::Format(_))
    }

    pub(crate) fn block_too_large(size: u64) -> Self {
        Self {
            kind: Kind::BlockTooLarge(size),
        }
    }

    /// Returns true if a frame declared an uncompressed size beyond the block limit.
    pub fn is_block_too_large(&self) -> bool {
        matches!(self.kind, Kind::BlockTooLarge(_))
    }

    pub(crate) fn size_mismatch(expected: u64, actual: u64) -> Self {
        Self {
            kind: Kind::SizeMismatch { expected, actual },
        }
    }

    /// Returns true if decompressed data did not match the declared frame size.
    pub fn is_size_mismatch(&self) -> bool {
        matches!(self.kind, Kind::SizeMismatch { .. })
    }

    pub(crate) fn resource(detail: &'static str) -> Self {
        Self {
            kind: Kind::Resource(detail),
        }
    }

    /// Returns true if a worker pipeline could not accept or finish work.
    pub fn is_resource(&self) -> bool {
        matches!(self.kind, Kind::Resource(_))
    }

    pub(crate) fn no_index() -> Self {
        Self { kind: Kind::NoIndex }
    }

    /// Returns true if an operation required an index that is not present.
    pub fn is_no_index(&self) -> bool {
        matches!(self.kind, Kind::NoIndex)
    }

    pub(crate) fn offset_out_of_range() -> Self {
        Self {
            kind: Kind::OffsetOutOfRange,
        }
    }

    /// Returns true if the error origins from an out of range offset.
    pub fn is_offset_out_of_range(&self) -> bool {
        matches!(self.kind, Kind::OffsetOutOfRange)
    }

    pub(crate) fn not_seekable() -> Self {
        Self {
            kind: Kind::NotSeekable,
        }
    }

    /// Returns true if the underlying stream does not support seeking.
    pub fn is_not_seekable(&self) -> bool {
        matches!(self.kind, Kind::NotSeekable)
    }

    /// Returns true if the error origins from an IO error.
    pub fn is_io(&self) -> bool {
        matches!(self.kind, Kind::IO(_))
    }

    /// Returns true if the error origins from the zstd library.
    pub fn is_zstd(&self) -> bool {
        matches!(self.kind, Kind::Zstd(_))
    }

    /// Returns true if the error origins from a failed number conversion.
    pub fn is_number_conversion_failed(&self) -> bool {
        matches!(self.kind, Kind::NumberConversionFailed(_))
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match &self.kind {
            Kind::Other(err) => write!(f, "{err}"),
            Kind::NumberConversionFailed(err) => write!(f, "number conversion failed: {err}"),
            Kind::Format(detail) => write!(f, "malformed container: {detail}"),
            Kind::BlockTooLarge(size) => {
                write!(f, "frame declares {size} uncompressed bytes, above block limit")
            }
            Kind::SizeMismatch { expected, actual } => {
                write!(f, "frame decompressed to {actual} bytes, expected {expected}")
            }
            Kind::Resource(detail) => write!(f, "pipeline failure: {detail}"),
            Kind::NoIndex => f.write_str("no index present"),
            Kind::OffsetOutOfRange => f.write_str("offset out of range"),
            Kind::NotSeekable => f.write_str("stream is not seekable"),
            Kind::IO(err) => write!(f, "io error: {err}"),
            Kind::Zstd(code) => f.write_str(get_error_name(*code)),
        }
    }
}

impl core::error::Error for Error {}

impl From<core::num::TryFromIntError> for Error {
    fn from(value: core::num::TryFromIntError) -> Self {
        Self {
            kind: Kind::NumberConversionFailed(value),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        // ESPIPE gets its own kind so callers can degrade to sequential
        // streaming.
        if value.kind() == std::io::ErrorKind::NotSeekable {
            return Self::not_seekable();
        }

        Self {
            kind: Kind::IO(value),
        }
    }
}

impl From<ErrorCode> for Error {
    fn from(value: ErrorCode) -> Self {
        Self {
            kind: Kind::Zstd(value),
        }
    }
}

enum Kind {
    Other(Box<dyn core::error::Error + Send + Sync>),
    /// Out of range integral type conversion attempted
    NumberConversionFailed(core::num::TryFromIntError),
    /// Magic mismatch, bad length field, reserved bits set or truncated frame.
    Format(&'static str),
    /// A frame declared more uncompressed data than `MAX_BLOCK_SIZE`.
    BlockTooLarge(u64),
    /// Decompressed length differs from the size declared in the frame header.
    SizeMismatch { expected: u64, actual: u64 },
    /// A worker pipeline terminated or rejected a dispatch.
    Resource(&'static str),
    /// An index was required but is absent.
    NoIndex,
    /// The desired offset is out of range.
    OffsetOutOfRange,
    /// The stream rejected a seek.
    NotSeekable,
    /// IO error.
    IO(std::io::Error),
    /// An error from the zstd library.
    Zstd(ErrorCode),
}

impl core::fmt::Debug for Kind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Other(arg0) => f.debug_tuple("Other").field(arg0).finish(),
            Self::NumberConversionFailed(arg0) => {
                f.debug_tuple("NumberConversionFailed").field(arg0).finish()
            }
            Self::Format(detail) => f.debug_tuple("Format").field(detail).finish(),
            Self::BlockTooLarge(size) => f.debug_tuple("BlockTooLarge").field(size).finish(),
            Self::SizeMismatch { expected, actual } => f
                .debug_struct("SizeMismatch")
                .field("expected", expected)
                .field("actual", actual)
                .finish(),
            Self::Resource(detail) => f.debug_tuple("Resource").field(detail).finish(),
            Self::NoIndex => write!(f, "NoIndex"),
            Self::OffsetOutOfRange => write!(f, "OffsetOutOfRange"),
            Self::NotSeekable => write!(f, "NotSeekable"),
            Self::IO(arg0) => f.debug_tuple("IO").field(arg0).finish(),
            Self::Zstd(c) => write!(f, "{}; code {}", get_error_name(*c), c),
        }
    }
}
