use thiserror::Error;

/// An I/O failure at the transport. Fatal to the session: the next poll
/// surfaces it as an unexpected disconnect and the session goes inert.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport closed")]
    Closed,
    #[error("transport I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// A malformed or unexpected report. Absorbed: the report is dropped and the
/// session continues, the device keeps sending reports.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("report too short for its type")]
    MissingData,
    #[error("unknown report tag {0:#04x}")]
    UnknownReportTag(u8),
    #[error("invalid report data")]
    InvalidData,
    #[error("calibration block checksum mismatch")]
    InvalidChecksum,
}

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    /// The calibration read failed or returned defaults. The session keeps
    /// running with zeroed calibration; derived orientation and gravity
    /// values are nominal but not meaningful.
    #[error("accelerometer calibration unavailable")]
    CalibrationUnavailable,
    /// The expansion identification code matched no known peripheral.
    /// The port stays disabled until the next insertion edge.
    #[error("unknown expansion identity {0:#010x}")]
    UnknownExpansionIdentity(u32),
    #[error("remote is disconnected")]
    Disconnected,
}

pub type RemoteResult<T> = Result<T, RemoteError>;
