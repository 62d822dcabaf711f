// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

//! Image discovery and assignment of images to plate groups (wells).

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use regex_lite::Regex;

use crate::config::{GroupBy, PlateSettings};
use crate::error::ConfigError;

pub const SUPPORTED_EXTENSIONS: [&str; 7] =
    ["tif", "tiff", "btf", "png", "jpg", "jpeg", "bmp"];

/// Group of images that do not match the filename pattern.
pub const UNMATCHED_GROUP: &str = "unmatched";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupInfo {
    pub group: String,
    /// 1-based well position, when known.
    pub well: Option<(u32, u32)>,
    /// 1-based image index inside the well, when known.
    pub image_index: Option<u32>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageFile {
    pub path: PathBuf,
    pub group: GroupInfo,
}

fn is_supported(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str())
        .map(|e| {
            SUPPORTED_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str())
        })
        .unwrap_or(false)
}

/// Recursively lists the supported images below `folder`, sorted by path.
pub fn find_images(folder: &Path) -> io::Result<Vec<PathBuf>> {
    let mut images = Vec::new();
    let mut pending = vec![folder.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
            } else if is_supported(&path) {
                images.push(path);
            }
        }
    }
    images.sort();
    debug!("Found {} images in {:?}", images.len(), folder);
    Ok(images)
}

/// Well coordinate component: digits are read as a number, letters count
/// from A = 1.
fn parse_position(text: &str) -> u32 {
    text.chars().fold(0_u32, |acc, c| {
        if let Some(d) = c.to_digit(10) {
            acc.saturating_mul(10).saturating_add(d)
        } else if c.is_ascii_alphabetic() {
            acc.saturating_mul(10)
                .saturating_add(c.to_ascii_uppercase() as u32 - 'A' as u32 + 1)
        } else {
            acc
        }
    })
}

fn row_label(row: u32) -> String {
    if (1..=26).contains(&row) {
        char::from(b'A' + (row - 1) as u8).to_string()
    } else {
        row.to_string()
    }
}

pub struct FileGrouper {
    group_by: GroupBy,
    regex: Option<Regex>,
}

impl FileGrouper {
    pub fn new(plate: &PlateSettings) -> Result<Self, ConfigError> {
        let regex = match plate.group_by {
            GroupBy::Filename => Some(plate.filename_regex()?),
            _ => None,
        };
        Ok(FileGrouper{group_by: plate.group_by, regex})
    }

    pub fn group_of(&self, path: &Path) -> GroupInfo {
        match self.group_by {
            GroupBy::Off => GroupInfo{group: String::new(), well: None,
                                      image_index: None},
            GroupBy::Directory => GroupInfo{
                group: path.parent()
                    .map(|p| p.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                well: None, image_index: None},
            GroupBy::Filename => self.group_by_filename(path),
        }
    }

    fn group_by_filename(&self, path: &Path) -> GroupInfo {
        let unmatched = GroupInfo{group: UNMATCHED_GROUP.to_string(),
                                  well: None, image_index: None};
        let (regex, name) = match (&self.regex, path.file_name()) {
            (Some(regex), Some(name)) => (regex, name.to_string_lossy()),
            _ => return unmatched,
        };
        let captures = match regex.captures(&name) {
            Some(captures) => captures,
            None => {
                warn!("{:?} does not match the filename pattern", path);
                return unmatched;
            },
        };
        let (row, col) = match (captures.name("row"), captures.name("col")) {
            (Some(row), Some(col)) => (parse_position(row.as_str()),
                                       parse_position(col.as_str())),
            _ => return unmatched,
        };
        let image_index = captures.name("img")
            .map(|m| parse_position(m.as_str()));
        GroupInfo{group: format!("well_{}_{}", row_label(row), col),
                  well: Some((row, col)), image_index}
    }

    /// Sorts `paths` into groups, keeping path order inside a group.
    pub fn group(&self, paths: &[PathBuf]) -> BTreeMap<String, Vec<ImageFile>> {
        let mut groups: BTreeMap<String, Vec<ImageFile>> = BTreeMap::new();
        for path in paths {
            let group = self.group_of(path);
            groups.entry(group.group.clone()).or_default()
                .push(ImageFile{path: path.clone(), group});
        }
        groups
    }
}

// mod tests.
