// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

//! Runs a job: finds and groups the images, opens each one, and runs every
//! active pipeline over every iteration (tile, T, Z) of it. Iterations are
//! independent and run on the blocking thread pool, bounded by the worker
//! count. Objects of store 0 are written to the sink when an iteration ends.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use log::{debug, info, warn};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::config::{PipelineSettings, PlateSettings, ProjectSettings};
use crate::context::{GlobalContext, ImageContext, IterationContext,
                     PipelineContext, ProcessContext};
use crate::error::{CommandError, PipelineError, SinkError, Validity,
                   ValidityScope};
use crate::file_grouper::{find_images, FileGrouper};
use crate::initializer::{Iteration, PipelineInitializer};
use crate::loader::PlaneLoader;
use crate::sink::{JobInfo, JobSummary, ResultSink};

/// Per-run options that are not part of the project.
#[derive(Clone, Debug)]
pub struct JobOptions {
    pub job_name: String,
    /// Overrides the plate's image folder when not empty.
    pub images_folder: PathBuf,
    pub workers: usize,
}

impl Default for JobOptions {
    fn default() -> Self {
        JobOptions{job_name: "job".to_string(), images_folder: PathBuf::new(),
                   workers: 4}
    }
}

/// Counters readable while a job runs.
#[derive(Debug, Default)]
pub struct Progress {
    total_iterations: AtomicU64,
    finished_iterations: AtomicU64,
    finished_images: AtomicU64,
}

impl Progress {
    pub fn total_iterations(&self) -> u64 {
        self.total_iterations.load(Ordering::Relaxed)
    }

    pub fn finished_iterations(&self) -> u64 {
        self.finished_iterations.load(Ordering::Relaxed)
    }

    pub fn finished_images(&self) -> u64 {
        self.finished_images.load(Ordering::Relaxed)
    }
}

pub struct Processor {
    settings: Arc<ProjectSettings>,
    loader: Arc<dyn PlaneLoader>,
    sink: Arc<dyn ResultSink>,
    cancel: Arc<AtomicBool>,
    progress: Arc<Progress>,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "command panicked".to_string()
    }
}

/// Registers the image with the sink. An image that cannot be opened is
/// recorded as unreadable and None is returned.
fn open_image(global: &GlobalContext, path: &Path, group: &str)
              -> Result<Option<ImageContext>, SinkError> {
    let setup = &global.settings.image_setup;
    match PipelineInitializer::open(setup, global.loader.clone(), path) {
        Ok(initializer) => {
            let image_id = global.sink.create_image(
                path, initializer.series(), group,
                Some(initializer.series_info()))?;
            Ok(Some(ImageContext::new(image_id, initializer)))
        },
        Err(e) => {
            warn!("Skipping {:?}: {}", path, e);
            let image_id = global.sink.create_image(path, setup.series,
                                                    group, None)?;
            global.sink.set_image_validity(image_id,
                                           Validity::ImageNotReadable)?;
            Ok(None)
        },
    }
}

/// Runs one pipeline on its starting plane. The problem of a failing
/// command is recorded and the remaining commands still run.
fn run_pipeline(global: &GlobalContext, image: &ImageContext,
                iteration: &mut IterationContext, index: usize,
                pipeline: &PipelineSettings) {
    let initializer = &image.initializer;
    let current = iteration.iteration;
    let start_image = {
        let pipeline_cache = image.pipeline_cache();
        initializer.init_pipeline(pipeline, &current, &mut iteration.cache,
                                  &pipeline_cache)
    };
    let store = pipeline.default_object_store_id;
    let mut objects = iteration.object_stores.remove(&store)
        .unwrap_or_default();
    let mut plane = start_image.plane;
    let pipeline_context = PipelineContext{
        index, default_class: pipeline.default_class(),
        projection: initializer.projection_for(pipeline.z_projection),
        plane: initializer.resolve_plane(pipeline, &current)};
    let mut ctx = ProcessContext::new(global, image, iteration,
                                      pipeline_context);
    if let Some(validity) = start_image.validity {
        ctx.set_plane_validity(validity);
    }
    for command in &pipeline.commands {
        let start = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            command.command().execute(&mut ctx, &mut plane, &mut objects)
        }));
        let error = match outcome {
            Ok(Ok(())) => {
                debug!("{} in {:?}", command.name(), start.elapsed());
                continue;
            },
            Ok(Err(e)) => e,
            Err(payload) => CommandError::plane(Validity::CommandFailed,
                                                panic_message(&*payload)),
        };
        warn!("Pipeline {:?}: {} failed on {:?}: {}", pipeline.name,
              command.name(), image.path, error);
        match error.scope {
            ValidityScope::Image => ctx.set_image_validity(error.validity),
            ValidityScope::Plane => ctx.set_plane_validity(error.validity),
        }
    }
    ctx.iteration.object_stores.insert(store, objects);
}

/// Runs every active pipeline in order and writes the main object store.
/// Returns the number of objects written.
fn process_iteration(global: &GlobalContext, image: &ImageContext,
                     iteration: Iteration) -> Result<usize, SinkError> {
    let start = Instant::now();
    let mut context = IterationContext::new(iteration);
    for (index, pipeline) in global.settings.active_pipelines() {
        run_pipeline(global, image, &mut context, index, pipeline);
    }
    let objects = context.object_stores.remove(&0).unwrap_or_default();
    let written = global.sink.insert_objects(image.image_id, &objects)?;
    debug!("Iteration {:?} of {:?}: {} objects in {:?}", iteration,
           image.path, written, start.elapsed());
    Ok(written)
}

impl Processor {
    pub fn new(settings: Arc<ProjectSettings>, loader: Arc<dyn PlaneLoader>,
               sink: Arc<dyn ResultSink>) -> Self {
        Processor{settings, loader, sink,
                  cancel: Arc::new(AtomicBool::new(false)),
                  progress: Arc::new(Progress::default())}
    }

    /// Setting the flag stops the job before the next iteration starts.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    pub fn progress(&self) -> Arc<Progress> {
        self.progress.clone()
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    pub async fn run(&self, job: &JobOptions)
                     -> Result<JobSummary, PipelineError> {
        let start = Instant::now();
        let plate = self.settings.plates.first().cloned()
            .unwrap_or_else(PlateSettings::default);
        let folder = if job.images_folder.as_os_str().is_empty() {
            plate.image_folder.clone()
        } else {
            job.images_folder.clone()
        };
        let paths = find_images(&folder).map_err(|source| {
            PipelineError::Io{path: folder.clone(), source}})?;
        if paths.is_empty() {
            return Err(PipelineError::NoImages(folder));
        }
        let groups = FileGrouper::new(&plate)?.group(&paths);
        info!("Job {:?}: {} images in {} groups", job.job_name, paths.len(),
              groups.len());

        let started_at = SystemTime::now().duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs()).unwrap_or(0);
        self.sink.start_job(&JobInfo{
            job_name: job.job_name.clone(),
            project_name: self.settings.meta.name.clone(),
            images_folder: folder.clone(), started_at})?;
        self.sink.insert_classes(&self.settings.classes)?;

        let global = Arc::new(GlobalContext{settings: self.settings.clone(),
                                            loader: self.loader.clone(),
                                            sink: self.sink.clone()});
        let semaphore = Arc::new(Semaphore::new(job.workers.max(1)));
        let mut tasks: Vec<JoinHandle<()>> = Vec::new();
        'images: for (group, files) in &groups {
            for file in files {
                if self.cancelled() {
                    break 'images;
                }
                // Opening decodes the file; keep it off the runtime threads.
                let opening = {
                    let global = global.clone();
                    let path = file.path.clone();
                    let group = group.clone();
                    tokio::task::spawn_blocking(move || {
                        open_image(&global, &path, &group)
                    })
                };
                let image = match opening.await {
                    Ok(opened) => match opened? {
                        Some(image) => Arc::new(image),
                        None => continue,
                    },
                    Err(e) => {
                        warn!("Cannot open {:?}: {}", file.path, e);
                        continue;
                    },
                };
                let iterations = image.initializer.iterations();
                self.progress.total_iterations
                    .fetch_add(iterations.len() as u64, Ordering::Relaxed);
                let remaining = Arc::new(AtomicUsize::new(iterations.len()));
                for iteration in iterations {
                    if self.cancelled() {
                        break 'images;
                    }
                    let permit = match semaphore.clone().acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => break 'images,
                    };
                    let global = global.clone();
                    let image = image.clone();
                    let progress = self.progress.clone();
                    let remaining = remaining.clone();
                    tasks.push(tokio::task::spawn_blocking(move || {
                        let _permit = permit;
                        match process_iteration(&global, &image, iteration) {
                            Ok(_) => {
                                progress.finished_iterations
                                    .fetch_add(1, Ordering::Relaxed);
                            },
                            Err(e) => warn!("Cannot store results of {:?}: {}",
                                            image.path, e),
                        }
                        if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                            progress.finished_images
                                .fetch_add(1, Ordering::Relaxed);
                            info!("Finished {:?}", image.path);
                        }
                    }));
                }
            }
        }
        for task in tasks {
            if let Err(e) = task.await {
                warn!("Iteration task failed: {}", e);
            }
        }

        let summary = JobSummary{
            total_iterations: self.progress.total_iterations(),
            finished_iterations: self.progress.finished_iterations(),
            finished_images: self.progress.finished_images(),
            cancelled: self.cancelled(),
            duration_secs: start.elapsed().as_secs_f64()};
        self.sink.finish_job(&summary)?;
        info!("Job {:?}: {}/{} iterations of {} images in {:.1}s{}",
              job.job_name, summary.finished_iterations,
              summary.total_iterations, summary.finished_images,
              summary.duration_secs,
              if summary.cancelled { " (cancelled)" } else { "" });
        if summary.finished_iterations == 0 {
            return Err(PipelineError::NothingProcessed);
        }
        Ok(summary)
    }
}

// mod tests.
