// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::fmt;
use std::str::FromStr;

use log::warn;
use serde::{Deserialize, Serialize};

/// A concrete class label. Values at and above [TEMP_CLASS_BASE] are
/// reserved for pipeline-local temporaries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord,
         Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassId(pub u16);

pub const TEMP_CLASS_BASE: u16 = 60000;
/// Number of temporaries each pipeline may use.
pub const TEMP_CLASSES_PER_PIPELINE: u16 = 10;

impl ClassId {
    pub fn is_temporary(self) -> bool {
        self.0 >= TEMP_CLASS_BASE
    }
}

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A class as written in a project.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord,
         Serialize, Deserialize)]
#[serde(try_from = "ClassRefRepr", into = "ClassRefRepr")]
pub enum ClassRef {
    Literal(ClassId),
    /// `$`: the pipeline's default class.
    #[default]
    Default,
    /// Off; commands treat the reference as a no-op.
    Undefined,
    /// `temp<k>`, k in 1..=TEMP_CLASSES_PER_PIPELINE.
    Temp(u16),
}

impl ClassRef {
    pub fn literal(id: u16) -> Self {
        ClassRef::Literal(ClassId(id))
    }

    /// Maps the reference to a concrete class. Returns None for
    /// [ClassRef::Undefined]. Temporaries are offset by the pipeline index so
    /// that pipelines never share them; a temporary outside
    /// 1..=TEMP_CLASSES_PER_PIPELINE, or one of a pipeline whose range
    /// would pass the largest class id, resolves to None as well.
    pub fn resolve(self, default_class: ClassId, pipeline_index: usize)
                   -> Option<ClassId> {
        match self {
            ClassRef::Literal(id) => Some(id),
            ClassRef::Default => Some(default_class),
            ClassRef::Undefined => None,
            ClassRef::Temp(k) => {
                if k == 0 || k > TEMP_CLASSES_PER_PIPELINE {
                    return None;
                }
                let id = pipeline_index
                    .checked_mul(TEMP_CLASSES_PER_PIPELINE as usize)
                    .and_then(|offset| offset.checked_add(
                        TEMP_CLASS_BASE as usize + (k as usize - 1)))
                    .and_then(|id| u16::try_from(id).ok());
                if id.is_none() {
                    warn!("Pipeline {} has no room for temporary class {}",
                          pipeline_index, k);
                }
                id.map(ClassId)
            },
        }
    }
}

impl FromStr for ClassRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "$" => return Ok(ClassRef::Default),
            "undefined" | "UNDEFINED" | "none" | "NONE" =>
                return Ok(ClassRef::Undefined),
            _ => (),
        }
        let lower = s.to_ascii_lowercase();
        if let Some(rest) = lower.strip_prefix("temp") {
            let k: u16 = rest.trim_start_matches('_').parse()
                .map_err(|_| format!("invalid temporary class {:?}", s))?;
            if k == 0 || k > TEMP_CLASSES_PER_PIPELINE {
                return Err(format!("temporary class {:?} out of range", s));
            }
            return Ok(ClassRef::Temp(k));
        }
        let id: u16 = s.parse().map_err(|_| format!("invalid class {:?}", s))?;
        if id >= TEMP_CLASS_BASE {
            return Err(format!("class id {} is reserved", id));
        }
        Ok(ClassRef::literal(id))
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum ClassRefRepr {
    Number(u16),
    Text(String),
}

impl TryFrom<ClassRefRepr> for ClassRef {
    type Error = String;

    fn try_from(value: ClassRefRepr) -> Result<Self, Self::Error> {
        match value {
            ClassRefRepr::Number(n) => n.to_string().parse(),
            ClassRefRepr::Text(s) => s.parse(),
        }
    }
}

impl From<ClassRef> for ClassRefRepr {
    fn from(value: ClassRef) -> Self {
        match value {
            ClassRef::Literal(id) => ClassRefRepr::Number(id.0),
            ClassRef::Default => ClassRefRepr::Text("$".to_string()),
            ClassRef::Undefined => ClassRefRepr::Text("undefined".to_string()),
            ClassRef::Temp(k) => ClassRefRepr::Text(format!("temp{}", k)),
        }
    }
}

/// Measurements a class carries by default in the results.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Measurement {
    Count,
    Area,
    Perimeter,
    Circularity,
    Centroid,
    IntensitySum,
    IntensityAvg,
    IntensityMin,
    IntensityMax,
    Distance,
}

/// Class definition from the project.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClassInfo {
    pub class_id: ClassId,
    pub name: String,
    #[serde(default = "default_color")]
    pub color: String,
    #[serde(default)]
    pub default_measurements: Vec<Measurement>,
}

fn default_color() -> String {
    "#808080".to_string()
}

impl ClassInfo {
    pub fn new(class_id: u16, name: &str) -> Self {
        ClassInfo{class_id: ClassId(class_id), name: name.to_string(),
                  color: default_color(), default_measurements: Vec::new()}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve() {
        let default = ClassId(4);
        assert_eq!(ClassRef::literal(2).resolve(default, 0), Some(ClassId(2)));
        assert_eq!(ClassRef::Default.resolve(default, 3), Some(default));
        assert_eq!(ClassRef::Undefined.resolve(default, 0), None);
    }

    #[test]
    fn test_temporaries_do_not_collide() {
        let default = ClassId(0);
        let a = ClassRef::Temp(1).resolve(default, 0).unwrap();
        let b = ClassRef::Temp(1).resolve(default, 1).unwrap();
        let c = ClassRef::Temp(TEMP_CLASSES_PER_PIPELINE).resolve(default, 0)
            .unwrap();
        assert_ne!(a, b);
        assert!(c < b);
        assert!(a.is_temporary());
    }

    #[test]
    fn test_temporaries_out_of_range() {
        let default = ClassId(0);
        assert_eq!(ClassRef::Temp(6).resolve(default, 553),
                   Some(ClassId(u16::MAX)));
        assert_eq!(ClassRef::Temp(7).resolve(default, 553), None);
        assert_eq!(ClassRef::Temp(1).resolve(default, 554), None);
        assert_eq!(ClassRef::Temp(1).resolve(default, usize::MAX), None);
        assert_eq!(ClassRef::Temp(0).resolve(default, 0), None);
        assert_eq!(ClassRef::Temp(TEMP_CLASSES_PER_PIPELINE + 1)
                       .resolve(default, 0), None);
    }

    #[test]
    fn test_parse() {
        let refs: Vec<ClassRef> = serde_json::from_str(
            r#"[3, "$", "undefined", "temp2", "TEMP_1"]"#).unwrap();
        assert_eq!(refs, vec![ClassRef::literal(3), ClassRef::Default,
                              ClassRef::Undefined, ClassRef::Temp(2),
                              ClassRef::Temp(1)]);
        assert!(serde_json::from_str::<ClassRef>(r#""temp0""#).is_err());
        assert!(serde_json::from_str::<ClassRef>("60001").is_err());
        assert_eq!(serde_json::to_string(&ClassRef::Temp(3)).unwrap(),
                   r#""temp3""#);
    }
}  // mod tests.
