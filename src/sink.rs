// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

//! Result store. The engine writes through the [ResultSink] trait; writes
//! come from many workers and every implementation serializes them.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::classes::{ClassId, ClassInfo};
use crate::error::{SinkError, Validity, ValiditySet};
use crate::loader::SeriesInfo;
use crate::object_list::ObjectList;
use crate::plane::{ImageId, ResolvedPlane, Tile};
use crate::roi::{Distance, Intensity, ObjectId, Roi, TrackingId};

pub type DbImageId = u64;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct JobInfo {
    pub job_name: String,
    pub project_name: String,
    pub images_folder: PathBuf,
    /// Seconds since the Unix epoch.
    pub started_at: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    pub total_iterations: u64,
    pub finished_iterations: u64,
    pub finished_images: u64,
    pub cancelled: bool,
    pub duration_secs: f64,
}

/// Validity flags of one plane, or of one class within a plane.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PlaneValidity {
    pub plane: ResolvedPlane,
    pub class_id: Option<ClassId>,
    pub validity: ValiditySet,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ImageRecord {
    pub image_id: DbImageId,
    pub path: PathBuf,
    pub series: u32,
    pub group: String,
    pub info: Option<SeriesInfo>,
    pub validity: ValiditySet,
    pub plane_validity: Vec<PlaneValidity>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct IntensityRecord {
    pub image: ImageId,
    #[serde(flatten)]
    pub intensity: Intensity,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DistanceRecord {
    pub peer: ObjectId,
    #[serde(flatten)]
    pub distance: Distance,
}

/// What is persisted of one object.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ObjectRecord {
    pub image_id: DbImageId,
    pub object_id: ObjectId,
    pub class_id: ClassId,
    pub parent: Option<ObjectId>,
    pub tracking_id: TrackingId,
    pub plane: ResolvedPlane,
    pub tile: Tile,
    pub confidence: f32,
    /// Bounding box in image coordinates: x, y, width, height.
    pub bbox: [i64; 4],
    pub area: u64,
    pub perimeter: f64,
    pub circularity: f64,
    pub centroid: (f64, f64),
    pub intensity: Vec<IntensityRecord>,
    pub distances: Vec<DistanceRecord>,
    pub linked: Vec<ObjectId>,
}

impl ObjectRecord {
    pub fn from_roi(image_id: DbImageId, roi: &Roi) -> Self {
        let b = roi.bbox_real();
        ObjectRecord{
            image_id, object_id: roi.object_id(), class_id: roi.class_id,
            parent: roi.parent, tracking_id: roi.tracking_id,
            plane: roi.plane, tile: roi.tile(), confidence: roi.confidence,
            bbox: [b.left() as i64, b.top() as i64, b.width() as i64,
                   b.height() as i64],
            area: roi.area(), perimeter: roi.perimeter(),
            circularity: roi.circularity(), centroid: roi.centroid_real(),
            intensity: roi.intensity().iter()
                .map(|(image, intensity)| IntensityRecord{
                    image: *image, intensity: *intensity})
                .collect(),
            distances: roi.distances().iter()
                .map(|(peer, distance)| DistanceRecord{
                    peer: *peer, distance: *distance})
                .collect(),
            linked: roi.linked().iter().copied().collect()}
    }
}

pub trait ResultSink: Send + Sync {
    fn start_job(&self, job: &JobInfo) -> Result<(), SinkError>;

    /// Upserts by class id.
    fn insert_classes(&self, classes: &[ClassInfo]) -> Result<(), SinkError>;

    /// Registers an image. `info` is None when the image could not be opened.
    fn create_image(&self, path: &Path, series: u32, group: &str,
                    info: Option<&SeriesInfo>) -> Result<DbImageId, SinkError>;

    fn set_image_validity(&self, image_id: DbImageId, validity: Validity)
                          -> Result<(), SinkError>;

    fn set_image_plane_validity(&self, image_id: DbImageId,
                                plane: ResolvedPlane, validity: Validity)
                                -> Result<(), SinkError>;

    fn set_image_plane_class_validity(&self, image_id: DbImageId,
                                      plane: ResolvedPlane, class_id: ClassId,
                                      validity: Validity)
                                      -> Result<(), SinkError>;

    /// Persists every object of the list except those in temporary classes.
    /// Returns the number of objects written.
    fn insert_objects(&self, image_id: DbImageId, objects: &ObjectList)
                      -> Result<usize, SinkError>;

    fn select_classes(&self) -> Result<Vec<ClassInfo>, SinkError>;

    fn finish_job(&self, summary: &JobSummary) -> Result<(), SinkError>;
}

/// Everything a job wrote.
#[derive(Clone, Debug, Default, Serialize)]
pub struct Records {
    pub job: Option<JobInfo>,
    pub classes: Vec<ClassInfo>,
    pub images: Vec<ImageRecord>,
    pub objects: Vec<ObjectRecord>,
    pub summary: Option<JobSummary>,
}

impl Records {
    fn image_mut(&mut self, image_id: DbImageId)
                 -> Result<&mut ImageRecord, SinkError> {
        if image_id == 0 {
            return Err(SinkError::UnknownImage(image_id));
        }
        self.images.get_mut(image_id as usize - 1)
            .ok_or(SinkError::UnknownImage(image_id))
    }

    fn set_plane_validity(&mut self, image_id: DbImageId, plane: ResolvedPlane,
                          class_id: Option<ClassId>, validity: Validity)
                          -> Result<(), SinkError> {
        let image = self.image_mut(image_id)?;
        match image.plane_validity.iter_mut()
            .find(|p| p.plane == plane && p.class_id == class_id)
        {
            Some(entry) => entry.validity.set(validity),
            None => image.plane_validity.push(PlaneValidity{
                plane, class_id, validity: ValiditySet::with(validity)}),
        }
        Ok(())
    }
}

/// Keeps all records in memory.
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Records>,
}

impl MemorySink {
    pub fn new() -> Self {
        MemorySink::default()
    }

    fn lock(&self) -> MutexGuard<'_, Records> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Snapshot of everything written so far.
    pub fn records(&self) -> Records {
        self.lock().clone()
    }

    pub fn image(&self, image_id: DbImageId) -> Option<ImageRecord> {
        let records = self.lock();
        image_id.checked_sub(1)
            .and_then(|i| records.images.get(i as usize).cloned())
    }

    pub fn objects_of_class(&self, class_id: ClassId) -> Vec<ObjectRecord> {
        self.lock().objects.iter().filter(|o| o.class_id == class_id)
            .cloned().collect()
    }

    fn write_json(&self, writer: impl Write) -> Result<(), SinkError> {
        let records = self.lock();
        serde_json::to_writer_pretty(writer, &*records)?;
        Ok(())
    }
}

impl ResultSink for MemorySink {
    fn start_job(&self, job: &JobInfo) -> Result<(), SinkError> {
        let mut records = self.lock();
        *records = Records::default();
        records.job = Some(job.clone());
        Ok(())
    }

    fn insert_classes(&self, classes: &[ClassInfo]) -> Result<(), SinkError> {
        let mut records = self.lock();
        for class in classes {
            match records.classes.iter_mut()
                .find(|c| c.class_id == class.class_id)
            {
                Some(existing) => *existing = class.clone(),
                None => records.classes.push(class.clone()),
            }
        }
        Ok(())
    }

    fn create_image(&self, path: &Path, series: u32, group: &str,
                    info: Option<&SeriesInfo>) -> Result<DbImageId, SinkError> {
        let mut records = self.lock();
        if records.job.is_none() {
            return Err(SinkError::NoJob);
        }
        let image_id = records.images.len() as DbImageId + 1;
        records.images.push(ImageRecord{
            image_id, path: path.to_path_buf(), series,
            group: group.to_string(), info: info.cloned(),
            validity: ValiditySet::new(), plane_validity: Vec::new()});
        Ok(image_id)
    }

    fn set_image_validity(&self, image_id: DbImageId, validity: Validity)
                          -> Result<(), SinkError> {
        self.lock().image_mut(image_id)?.validity.set(validity);
        Ok(())
    }

    fn set_image_plane_validity(&self, image_id: DbImageId,
                                plane: ResolvedPlane, validity: Validity)
                                -> Result<(), SinkError> {
        self.lock().set_plane_validity(image_id, plane, None, validity)
    }

    fn set_image_plane_class_validity(&self, image_id: DbImageId,
                                      plane: ResolvedPlane, class_id: ClassId,
                                      validity: Validity)
                                      -> Result<(), SinkError> {
        self.lock().set_plane_validity(image_id, plane, Some(class_id),
                                       validity)
    }

    fn insert_objects(&self, image_id: DbImageId, objects: &ObjectList)
                      -> Result<usize, SinkError> {
        let new_records: Vec<ObjectRecord> = objects.iter()
            .filter(|roi| !roi.class_id.is_temporary())
            .map(|roi| ObjectRecord::from_roi(image_id, roi))
            .collect();
        let mut records = self.lock();
        records.image_mut(image_id)?;
        let count = new_records.len();
        records.objects.extend(new_records);
        Ok(count)
    }

    fn select_classes(&self) -> Result<Vec<ClassInfo>, SinkError> {
        Ok(self.lock().classes.clone())
    }

    fn finish_job(&self, summary: &JobSummary) -> Result<(), SinkError> {
        let mut records = self.lock();
        if records.job.is_none() {
            return Err(SinkError::NoJob);
        }
        records.summary = Some(summary.clone());
        Ok(())
    }
}

/// Collects records in memory and writes them as one JSON document,
/// `<directory>/<job name>.icdb.json`, when the job finishes.
pub struct JsonSink {
    directory: PathBuf,
    path: Mutex<Option<PathBuf>>,
    records: MemorySink,
}

impl JsonSink {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        JsonSink{directory: directory.into(), path: Mutex::new(None),
                 records: MemorySink::new()}
    }

    /// Output file of the running (or last) job.
    pub fn path(&self) -> Option<PathBuf> {
        self.path.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn records(&self) -> Records {
        self.records.records()
    }
}

impl ResultSink for JsonSink {
    fn start_job(&self, job: &JobInfo) -> Result<(), SinkError> {
        let path = self.directory.join(format!("{}.icdb.json", job.job_name));
        debug!("Results of job {:?} go to {:?}", job.job_name, path);
        *self.path.lock().unwrap_or_else(|e| e.into_inner()) = Some(path);
        self.records.start_job(job)
    }

    fn insert_classes(&self, classes: &[ClassInfo]) -> Result<(), SinkError> {
        self.records.insert_classes(classes)
    }

    fn create_image(&self, path: &Path, series: u32, group: &str,
                    info: Option<&SeriesInfo>) -> Result<DbImageId, SinkError> {
        self.records.create_image(path, series, group, info)
    }

    fn set_image_validity(&self, image_id: DbImageId, validity: Validity)
                          -> Result<(), SinkError> {
        self.records.set_image_validity(image_id, validity)
    }

    fn set_image_plane_validity(&self, image_id: DbImageId,
                                plane: ResolvedPlane, validity: Validity)
                                -> Result<(), SinkError> {
        self.records.set_image_plane_validity(image_id, plane, validity)
    }

    fn set_image_plane_class_validity(&self, image_id: DbImageId,
                                      plane: ResolvedPlane, class_id: ClassId,
                                      validity: Validity)
                                      -> Result<(), SinkError> {
        self.records.set_image_plane_class_validity(image_id, plane, class_id,
                                                    validity)
    }

    fn insert_objects(&self, image_id: DbImageId, objects: &ObjectList)
                      -> Result<usize, SinkError> {
        self.records.insert_objects(image_id, objects)
    }

    fn select_classes(&self) -> Result<Vec<ClassInfo>, SinkError> {
        self.records.select_classes()
    }

    fn finish_job(&self, summary: &JobSummary) -> Result<(), SinkError> {
        self.records.finish_job(summary)?;
        let path = self.path().ok_or(SinkError::NoJob)?;
        let start = Instant::now();
        let file = File::create(&path)
            .map_err(|source| SinkError::Write{path: path.clone(), source})?;
        let mut writer = BufWriter::new(file);
        self.records.write_json(&mut writer)?;
        writer.flush()
            .map_err(|source| SinkError::Write{path: path.clone(), source})?;
        info!("Wrote results to {:?} in {:?}", path, start.elapsed());
        Ok(())
    }
}

// mod tests.
