use std::{io, path::PathBuf};

/// Error taxonomy for one layer-file run. Every variant except
/// `UnresolvedGeometry` is fatal for the current layer file; the driver
/// reports it and moves on to the next file. `UnresolvedGeometry` is
/// recoverable: the pipeline catches it, logs a warning and drops the
/// affected anchor from the output.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An attribute's anchor index points outside its anchor collection,
    /// or is not an integer at all.
    #[error("malformed index reference in partition {partition}, collection {collection}: {reference}")]
    MalformedIndexReference {
        partition: String,
        collection: String,
        reference: String,
    },

    /// A segment anchor's fractional offsets lie outside [0, 1].
    #[error(
        "segment anchor {anchor_index} in partition {partition} has offsets outside [0, 1]: start {start}, end {end}"
    )]
    InvalidOffsetRange {
        partition: String,
        anchor_index: usize,
        start: f64,
        end: f64,
    },

    /// No base geometry was found for an anchor's reference.
    #[error(
        "no geometry for {anchor_kind} anchor {anchor_index} in partition {partition} (identifier {identifier:?})"
    )]
    UnresolvedGeometry {
        partition: String,
        anchor_kind: &'static str,
        anchor_index: usize,
        identifier: String,
    },

    /// The partition source could not supply a decoded partition record.
    #[error("partition file {} unavailable: {reason}", .path.display())]
    PartitionUnavailable { path: PathBuf, reason: String },

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
