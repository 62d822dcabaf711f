// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Kinds of data-quality problems that are recorded in the result sink instead
/// of aborting the batch. Each kind is either a warning (data is usable but
/// suspicious) or marks the data invalid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord,
         Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Validity {
    Unknown,
    Invalid,
    ManualOutSorted,
    PossibleNoise,
    PossibleWrongThreshold,
    ImageNotReadable,
    ChannelOutOfRange,
    NoInputObjects,
    EmptyMask,
    InvalidKernelSize,
    InvalidRegex,
    CommandFailed,
    NanInResult,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Invalid,
}

impl Validity {
    pub const ALL: [Validity; 13] = [
        Validity::Unknown, Validity::Invalid, Validity::ManualOutSorted,
        Validity::PossibleNoise, Validity::PossibleWrongThreshold,
        Validity::ImageNotReadable, Validity::ChannelOutOfRange,
        Validity::NoInputObjects, Validity::EmptyMask,
        Validity::InvalidKernelSize, Validity::InvalidRegex,
        Validity::CommandFailed, Validity::NanInResult];

    pub fn severity(self) -> Severity {
        match self {
            Validity::PossibleNoise | Validity::PossibleWrongThreshold |
            Validity::NoInputObjects | Validity::EmptyMask |
            Validity::ManualOutSorted => Severity::Warning,
            _ => Severity::Invalid,
        }
    }

    fn bit(self) -> u32 {
        1 << (self as u32)
    }
}

/// Bit set of [Validity] flags. Flags are only ever raised, never cleared,
/// during a run.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ValiditySet(u32);

impl ValiditySet {
    pub fn new() -> Self {
        ValiditySet(0)
    }

    pub fn with(validity: Validity) -> Self {
        ValiditySet(validity.bit())
    }

    pub fn set(&mut self, validity: Validity) {
        self.0 |= validity.bit();
    }

    pub fn contains(&self, validity: Validity) -> bool {
        self.0 & validity.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// True if any raised flag has [Severity::Invalid].
    pub fn is_invalid(&self) -> bool {
        self.iter().any(|v| v.severity() == Severity::Invalid)
    }

    pub fn iter(&self) -> impl Iterator<Item = Validity> + '_ {
        Validity::ALL.iter().copied().filter(|v| self.contains(*v))
    }
}

impl fmt::Debug for ValiditySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl Serialize for ValiditySet {
    fn serialize<S: serde::Serializer>(&self, serializer: S)
                                       -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}

impl<'de> Deserialize<'de> for ValiditySet {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D)
                                               -> Result<Self, D::Error> {
        let flags = Vec::<Validity>::deserialize(deserializer)?;
        let mut set = ValiditySet::new();
        for flag in flags {
            set.set(flag);
        }
        Ok(set)
    }
}

/// Problems with the project configuration. Detected before any image is
/// touched.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read project file {path:?}: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("cannot parse project file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("working directory {0:?} does not exist")]
    MissingWorkingDirectory(PathBuf),
    #[error("project defines no classes")]
    EmptyClassList,
    #[error("project defines no pipelines")]
    EmptyPipelineList,
    #[error("class id {0} is defined twice")]
    DuplicateClass(u16),
    #[error("tile size must be positive, got {0}x{1}")]
    InvalidTileSize(u32, u32),
    #[error("invalid filename regex {pattern:?}: {message}")]
    InvalidRegex { pattern: String, message: String },
    #[error("{0}")]
    Invalid(String),
}

/// Failures reported by a plane loader.
#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("cannot open image {path:?}: {message}")]
    Open { path: PathBuf, message: String },
    #[error("series {series} out of range (image has {n_series})")]
    SeriesOutOfRange { series: u32, n_series: u32 },
    #[error("plane c={c} z={z} t={t} is not part of the image")]
    PlaneOutOfRange { c: u32, z: u32, t: u32 },
    #[error("cannot read tile: {0}")]
    Read(String),
}

/// Failures reported by a result sink.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("unknown image id {0}")]
    UnknownImage(u64),
    #[error("no job is running")]
    NoJob,
    #[error("cannot write results to {path:?}: {source}")]
    Write { path: PathBuf, source: std::io::Error },
    #[error("cannot serialize results: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// A recoverable problem inside a command. The command becomes a no-op and
/// the processor records the attached [Validity] kind.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct CommandError {
    pub validity: Validity,
    pub scope: ValidityScope,
    pub message: String,
}

/// Where a command problem is recorded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValidityScope {
    Image,
    Plane,
}

impl CommandError {
    pub fn plane(validity: Validity, message: impl Into<String>) -> Self {
        CommandError{validity, scope: ValidityScope::Plane,
                     message: message.into()}
    }

    pub fn image(validity: Validity, message: impl Into<String>) -> Self {
        CommandError{validity, scope: ValidityScope::Image,
                     message: message.into()}
    }
}

/// Top level error of a job run.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Loader(#[from] LoaderError),
    #[error(transparent)]
    Sink(#[from] SinkError),
    #[error("cannot list images in {path:?}: {source}")]
    Io { path: PathBuf, source: std::io::Error },
    #[error("no images found in {0:?}")]
    NoImages(PathBuf),
    #[error("no iteration could be started")]
    NothingProcessed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validity_set() {
        let mut set = ValiditySet::new();
        assert!(set.is_empty());
        set.set(Validity::PossibleNoise);
        assert!(set.contains(Validity::PossibleNoise));
        assert!(!set.is_invalid());
        set.set(Validity::ImageNotReadable);
        assert!(set.is_invalid());
        let flags: Vec<Validity> = set.iter().collect();
        assert_eq!(flags, vec![Validity::PossibleNoise,
                               Validity::ImageNotReadable]);
    }

    #[test]
    fn test_validity_set_serde() {
        let mut set = ValiditySet::with(Validity::EmptyMask);
        set.set(Validity::CommandFailed);
        let text = serde_json::to_string(&set).unwrap();
        assert_eq!(text, r#"["EMPTY_MASK","COMMAND_FAILED"]"#);
        let back: ValiditySet = serde_json::from_str(&text).unwrap();
        assert_eq!(back, set);
    }
}  // mod tests.
