// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

//! Project settings. A project is read from JSON and validated before a job
//! starts; the engine never sees an unvalidated project.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use regex_lite::Regex;
use serde::{Deserialize, Serialize};

use crate::classes::{ClassId, ClassInfo, ClassRef};
use crate::commands::CommandSettings;
use crate::error::ConfigError;
use crate::plane::{MemoryIdx, ZProjection};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectSettings {
    pub meta: ProjectMeta,
    pub image_setup: ImageSetup,
    pub plates: Vec<PlateSettings>,
    pub classes: Vec<ClassInfo>,
    pub pipelines: Vec<PipelineSettings>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectMeta {
    pub name: String,
    /// Results are written here. Must exist when set.
    pub working_directory: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ZStackHandling {
    #[default]
    ExactOne,
    EachOne,
    Projection,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TStackHandling {
    #[default]
    ExactOne,
    EachOne,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TileSize {
    pub width: u32,
    pub height: u32,
}

impl Default for TileSize {
    fn default() -> Self {
        TileSize{width: 4096, height: 4096}
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelSizeMode {
    #[default]
    Auto,
    Manual,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicalPixelSize {
    pub mode: PixelSizeMode,
    pub width: f64,
    pub height: f64,
    pub unit: String,
}

impl Default for PhysicalPixelSize {
    fn default() -> Self {
        PhysicalPixelSize{mode: PixelSizeMode::Auto, width: 1.0, height: 1.0,
                          unit: "um".to_string()}
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageSetup {
    pub z_stack_handling: ZStackHandling,
    pub t_stack_handling: TStackHandling,
    pub series: u32,
    pub tile: TileSize,
    pub physical_pixel_size: PhysicalPixelSize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GroupBy {
    #[default]
    Off,
    Directory,
    Filename,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlateSettings {
    pub plate_id: u32,
    pub name: String,
    pub rows: u32,
    pub cols: u32,
    /// Position of each image index within a well, row by row.
    pub well_image_order: Vec<Vec<u32>>,
    pub image_folder: PathBuf,
    pub group_by: GroupBy,
    /// Needs the named groups `row` and `col`; `img` is optional.
    pub filename_regex: String,
}

pub const DEFAULT_FILENAME_REGEX: &str =
    r"_(?P<row>[A-Za-z]+)(?P<col>[0-9]+)_(?P<img>[0-9]+)";

impl Default for PlateSettings {
    fn default() -> Self {
        PlateSettings{plate_id: 1, name: "Plate 1".to_string(), rows: 16,
                      cols: 24, well_image_order: vec![vec![1]],
                      image_folder: PathBuf::new(), group_by: GroupBy::Off,
                      filename_regex: DEFAULT_FILENAME_REGEX.to_string()}
    }
}

impl PlateSettings {
    /// Compiles the filename regex and checks its named groups.
    pub fn filename_regex(&self) -> Result<Regex, ConfigError> {
        let invalid = |message: String| ConfigError::InvalidRegex{
            pattern: self.filename_regex.clone(), message};
        let regex = Regex::new(&self.filename_regex)
            .map_err(|e| invalid(e.to_string()))?;
        let names: HashSet<&str> = regex.capture_names().flatten().collect();
        for required in ["row", "col"] {
            if !names.contains(required) {
                return Err(invalid(format!("missing group {:?}", required)));
            }
        }
        Ok(regex)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineSource {
    #[default]
    FromFile,
    FromMemory,
    Blank,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub name: String,
    pub disabled: bool,
    pub source: PipelineSource,
    /// Slot read by `FROM_MEMORY` pipelines.
    pub source_memory: MemoryIdx,
    pub c_stack: u32,
    pub z_stack: u32,
    pub t_stack: u32,
    pub z_projection: ZProjection,
    pub default_class_id: ClassRef,
    /// Object store the pipeline works on; store 0 is the main store.
    pub default_object_store_id: u8,
    pub commands: Vec<CommandSettings>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        PipelineSettings{name: String::new(), disabled: false,
                         source: PipelineSource::FromFile,
                         source_memory: MemoryIdx::None,
                         c_stack: 0, z_stack: 0, t_stack: 0,
                         z_projection: ZProjection::None,
                         default_class_id: ClassRef::literal(0),
                         default_object_store_id: 0, commands: Vec::new()}
    }
}

impl PipelineSettings {
    /// The literal class of the pipeline. Validation guarantees it exists.
    pub fn default_class(&self) -> ClassId {
        match self.default_class_id {
            ClassRef::Literal(id) => id,
            _ => ClassId(0),
        }
    }
}

impl ProjectSettings {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let settings: ProjectSettings = serde_json::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| {
            ConfigError::Read{path: path.to_path_buf(), source}})?;
        Self::from_json(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(dir) = &self.meta.working_directory {
            if !dir.is_dir() {
                return Err(ConfigError::MissingWorkingDirectory(dir.clone()));
            }
        }
        if self.classes.is_empty() {
            return Err(ConfigError::EmptyClassList);
        }
        if self.pipelines.is_empty() {
            return Err(ConfigError::EmptyPipelineList);
        }
        let tile = self.image_setup.tile;
        if tile.width == 0 || tile.height == 0 {
            return Err(ConfigError::InvalidTileSize(tile.width, tile.height));
        }
        let mut seen = HashSet::new();
        for class in &self.classes {
            if !seen.insert(class.class_id) {
                return Err(ConfigError::DuplicateClass(class.class_id.0));
            }
        }
        for plate in &self.plates {
            if plate.group_by == GroupBy::Filename {
                plate.filename_regex()?;
            }
        }
        for pipeline in &self.pipelines {
            if !matches!(pipeline.default_class_id, ClassRef::Literal(_)) {
                return Err(ConfigError::Invalid(format!(
                    "pipeline {:?} needs a literal default class",
                    pipeline.name)));
            }
            if pipeline.source == PipelineSource::FromMemory &&
                !matches!(pipeline.source_memory, MemoryIdx::Slot(_))
            {
                return Err(ConfigError::Invalid(format!(
                    "pipeline {:?} reads from memory but names no slot",
                    pipeline.name)));
            }
        }
        Ok(())
    }

    pub fn class_name(&self, class_id: ClassId) -> Option<&str> {
        self.classes.iter().find(|c| c.class_id == class_id)
            .map(|c| c.name.as_str())
    }

    /// Pipelines that take part in a run.
    pub fn active_pipelines(
        &self) -> impl Iterator<Item = (usize, &PipelineSettings)> {
        self.pipelines.iter().enumerate().filter(|(_, p)| !p.disabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::threshold::ThresholdMethod;

    const PROJECT: &str = r##"{
        "meta": {"name": "demo"},
        "image_setup": {"z_stack_handling": "PROJECTION",
                        "tile": {"width": 512, "height": 512}},
        "plates": [{"group_by": "FILENAME"}],
        "classes": [{"class_id": 1, "name": "nuclei"},
                    {"class_id": 2, "name": "spots", "color": "#ff0000"}],
        "pipelines": [{
            "name": "nuclei",
            "c_stack": 1,
            "z_projection": "MAX",
            "default_class_id": 1,
            "commands": [
                {"command": "threshold", "method": "TRIANGLE",
                 "threshold_min": 100},
                {"command": "classifier",
                 "classes": [{"class_out": "$", "min_particle_size": 5}]}
            ]
        }]
    }"##;

    #[test]
    fn test_parse_project() {
        let project = ProjectSettings::from_json(PROJECT).unwrap();
        assert_eq!(project.image_setup.z_stack_handling,
                   ZStackHandling::Projection);
        assert_eq!(project.image_setup.tile.width, 512);
        assert_eq!(project.image_setup.t_stack_handling,
                   TStackHandling::ExactOne);
        assert_eq!(project.classes[0].color, "#808080");
        assert_eq!(project.class_name(ClassId(2)), Some("spots"));
        let pipeline = &project.pipelines[0];
        assert_eq!(pipeline.default_class(), ClassId(1));
        assert_eq!(pipeline.z_projection, ZProjection::Max);
        assert_eq!(pipeline.commands.len(), 2);
        match &pipeline.commands[0] {
            CommandSettings::Threshold(t) => {
                assert_eq!(t.method, ThresholdMethod::Triangle);
                assert_eq!(t.threshold_min, 100);
                assert_eq!(t.threshold_max, u16::MAX);
            },
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_unknown_enum_value() {
        let text = PROJECT.replace("PROJECTION", "SOMETIMES");
        assert!(matches!(ProjectSettings::from_json(&text),
                         Err(ConfigError::Parse(_))));
        let text = PROJECT.replace("\"threshold\"", "\"frobnicate\"");
        assert!(matches!(ProjectSettings::from_json(&text),
                         Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_validate() {
        let valid = ProjectSettings::from_json(PROJECT).unwrap();

        let mut project = valid.clone();
        project.classes.clear();
        assert!(matches!(project.validate(), Err(ConfigError::EmptyClassList)));

        let mut project = valid.clone();
        project.pipelines.clear();
        assert!(matches!(project.validate(),
                         Err(ConfigError::EmptyPipelineList)));

        let mut project = valid.clone();
        project.classes.push(ClassInfo::new(1, "again"));
        assert!(matches!(project.validate(),
                         Err(ConfigError::DuplicateClass(1))));

        let mut project = valid.clone();
        project.image_setup.tile.height = 0;
        assert!(matches!(project.validate(),
                         Err(ConfigError::InvalidTileSize(512, 0))));

        let mut project = valid.clone();
        project.plates[0].filename_regex = "(?P<row>[A-Z]".to_string();
        assert!(matches!(project.validate(),
                         Err(ConfigError::InvalidRegex{..})));
        project.plates[0].filename_regex = "(?P<row>[A-Z])".to_string();
        assert!(matches!(project.validate(),
                         Err(ConfigError::InvalidRegex{..})));

        let mut project = valid.clone();
        project.meta.working_directory =
            Some(PathBuf::from("/does/not/exist/anywhere"));
        assert!(matches!(project.validate(),
                         Err(ConfigError::MissingWorkingDirectory(_))));

        let mut project = valid;
        project.pipelines[0].default_class_id = ClassRef::Default;
        assert!(matches!(project.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("project.icproj");
        fs::write(&path, PROJECT).unwrap();
        let project = ProjectSettings::from_file(&path).unwrap();
        assert_eq!(project.meta.name, "demo");
        assert!(matches!(
            ProjectSettings::from_file(&dir.path().join("missing.icproj")),
            Err(ConfigError::Read{..})));
    }
}  // mod tests.
