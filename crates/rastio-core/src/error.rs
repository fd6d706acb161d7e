//! Error types for raster access operations.
//!
//! One [`Error`] enum covers the failure modes of the whole stack: window
//! validation, block allocation, decode and write-back failures reported by
//! a format driver, and progress-callback cancellation.
//!
//! Cancellation travels through the same channel as true errors so that a
//! multi-block loop can abort uniformly; callers that care can distinguish
//! it with [`Error::is_cancelled`].

use thiserror::Error;

/// Result type alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during windowed raster access.
///
/// `Clone` is derived because a write-back failure is remembered per band
/// and re-surfaced on later writes.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Memory allocation for a block or working buffer failed.
    ///
    /// The failed block is never inserted into the live set, so no partial
    /// cache state survives this error.
    #[error("failed to allocate {requested} bytes: {reason}")]
    AllocationFailed {
        /// Bytes requested.
        requested: usize,
        /// Failure reason.
        reason: String,
    },

    /// The format driver failed to decode a block.
    ///
    /// Any buffer content partially filled by the enclosing request is
    /// undefined and must not be trusted.
    #[error("decode failed at block ({col}, {row}): {message}")]
    Decode {
        /// Block column offset.
        col: usize,
        /// Block row offset.
        row: usize,
        /// Driver-supplied detail.
        message: String,
    },

    /// The format driver failed to write back a dirty block.
    ///
    /// Recorded per band as a sticky error: subsequent writes on that band
    /// fail with this error until it is acknowledged, so a lost write-back
    /// cannot be masked by later successful-looking writes.
    #[error("write-back failed at block ({col}, {row}): {message}")]
    WriteBack {
        /// Block column offset.
        col: usize,
        /// Block row offset.
        row: usize,
        /// Driver-supplied detail.
        message: String,
    },

    /// The progress callback vetoed the operation.
    #[error("operation cancelled by progress callback")]
    Cancelled,

    /// The requested window does not lie within the raster.
    #[error("window ({x}, {y}, {width}x{height}) exceeds raster {raster_width}x{raster_height}")]
    InvalidWindow {
        /// Window X origin.
        x: usize,
        /// Window Y origin.
        y: usize,
        /// Window width.
        width: usize,
        /// Window height.
        height: usize,
        /// Raster width.
        raster_width: usize,
        /// Raster height.
        raster_height: usize,
    },

    /// A block offset outside the band's block grid was requested.
    #[error("illegal block offset ({col}, {row}) for grid {cols}x{rows}")]
    IllegalBlockOffset {
        /// Requested block column.
        col: usize,
        /// Requested block row.
        row: usize,
        /// Blocks per row.
        cols: usize,
        /// Blocks per column.
        rows: usize,
    },

    /// The caller-supplied buffer is too small for the request shape.
    #[error("buffer of {got} bytes is too small, need at least {needed}")]
    BufferTooSmall {
        /// Bytes required by the request shape.
        needed: usize,
        /// Bytes supplied.
        got: usize,
    },

    /// Invalid argument that does not fit a more specific variant.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl Error {
    /// Creates an [`Error::AllocationFailed`].
    #[inline]
    pub fn allocation_failed(requested: usize, reason: impl Into<String>) -> Self {
        Self::AllocationFailed {
            requested,
            reason: reason.into(),
        }
    }

    /// Creates an [`Error::Decode`].
    #[inline]
    pub fn decode(col: usize, row: usize, message: impl Into<String>) -> Self {
        Self::Decode {
            col,
            row,
            message: message.into(),
        }
    }

    /// Creates an [`Error::WriteBack`].
    #[inline]
    pub fn write_back(col: usize, row: usize, message: impl Into<String>) -> Self {
        Self::WriteBack {
            col,
            row,
            message: message.into(),
        }
    }

    /// Creates an [`Error::InvalidArgument`].
    #[inline]
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Returns `true` if this error is a progress-callback cancellation.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns `true` if this error came from the format driver.
    #[inline]
    pub fn is_driver_error(&self) -> bool {
        matches!(self, Self::Decode { .. } | Self::WriteBack { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_message() {
        let err = Error::decode(3, 7, "truncated record");
        let msg = err.to_string();
        assert!(msg.contains("(3, 7)"));
        assert!(msg.contains("truncated record"));
        assert!(err.is_driver_error());
        assert!(!err.is_cancelled());
    }

    #[test]
    fn test_cancelled() {
        assert!(Error::Cancelled.is_cancelled());
        assert!(!Error::Cancelled.is_driver_error());
    }

    #[test]
    fn test_invalid_window_message() {
        let err = Error::InvalidWindow {
            x: 10,
            y: 20,
            width: 100,
            height: 50,
            raster_width: 64,
            raster_height: 64,
        };
        assert!(err.to_string().contains("100x50"));
        assert!(err.to_string().contains("64x64"));
    }
}
