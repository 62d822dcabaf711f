// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::path::PathBuf;
use std::process;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use clap::Parser;
use log::{error, info, warn};

use plate_pipeline::config::ProjectSettings;
use plate_pipeline::loader::FileLoader;
use plate_pipeline::processor::{JobOptions, Processor};
use plate_pipeline::sink::JsonSink;

/// Runs the pipelines of a project over every image of a plate folder and
/// writes the objects found to a JSON result file.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about=None)]
struct Args {
    /// Project settings (JSON).
    project: PathBuf,

    /// Folder searched recursively for images.
    images: PathBuf,

    /// Name of the job; also the name of the result file.
    #[arg(short, long, default_value_t = String::from("job"))]
    job_name: String,

    /// Number of iterations processed concurrently.
    #[arg(short, long, default_value_t = 4)]
    workers: usize,

    /// Directory for the result file. Defaults to the project's working
    /// directory, else the current directory.
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let settings = match ProjectSettings::from_file(&args.project) {
        Ok(settings) => settings,
        Err(e) => {
            error!("Cannot load project {:?}: {}", args.project, e);
            process::exit(1);
        },
    };
    let output = args.output.clone()
        .or_else(|| settings.meta.working_directory.clone())
        .unwrap_or_else(|| PathBuf::from("."));
    let sink = Arc::new(JsonSink::new(output));
    let processor = Processor::new(Arc::new(settings),
                                   Arc::new(FileLoader::new()), sink.clone());

    let cancel = processor.cancel_flag();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("Interrupted, stopping after the running iterations");
                cancel.store(true, Ordering::Relaxed);
            },
            Err(e) => warn!("Cannot listen for interrupts: {}", e),
        }
    });

    let job = JobOptions{job_name: args.job_name.clone(),
                         images_folder: args.images.clone(),
                         workers: args.workers};
    match processor.run(&job).await {
        Ok(summary) => {
            if let Some(path) = sink.path() {
                info!("Results in {:?}", path);
            }
            if summary.cancelled {
                warn!("Job {:?} was cancelled", job.job_name);
            }
        },
        Err(e) => {
            error!("Job {:?} failed: {}", job.job_name, e);
            process::exit(1);
        },
    }
}
