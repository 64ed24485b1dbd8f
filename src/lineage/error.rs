use thiserror::Error;

/// Precondition failure of an edit operation.
///
/// Every operation validates against the committed table before mutating
/// anything, so a `ValidationError` always leaves table and raster unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("track {0} is not in the table")]
    TrackNotFound(u32),
    #[error("frame {frame} is not part of track {track}")]
    FrameNotInTrack { track: u32, frame: usize },
    #[error("frame {0} is outside the raster volume")]
    FrameOutOfRange(usize),
    #[error("track {merged} overlaps with track {cut} after the cut frame")]
    TrackOverlap { cut: u32, merged: u32 },
    #[error("cannot swap track {0} with itself")]
    SameTrack(u32),
    #[error("track {daughter} already has parent {parent}, unlink it first")]
    AlreadyLinked { daughter: u32, parent: u32 },
    #[error("track {0} does not have a parent")]
    NotLinked(u32),
    #[error("track {daughter} is not a daughter of track {parent}")]
    NotDaughterOf { daughter: u32, parent: u32 },
    #[error("label {label} is already used in frame {frame}, draw with a larger label")]
    DuplicateLabel { frame: usize, label: u32 },
    #[error("track {track} already has an object in frame {frame}")]
    TrackInFrame { track: u32, frame: usize },
    #[error("state {0:?} is not registered for this dataset")]
    UnknownState(String),
    #[error("label {label} is not present in frame {frame} of the raster")]
    LabelNotInRaster { frame: usize, label: u32 },
    #[error("cannot copy an object onto its own frame")]
    SameFrame,
    #[error("end frame {end} precedes start frame {start}")]
    InvertedRange { start: usize, end: usize },
    #[error("frame {0} belongs to neither the parent nor a daughter track")]
    FrameNotInLineage(usize),
    #[error("more than one daughter spans frame {0}, break the mitosis first")]
    MultipleDaughters(usize),
}
