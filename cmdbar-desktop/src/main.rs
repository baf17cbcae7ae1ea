use std::{
    fs::{File, OpenOptions},
    io::{self, Write},
    path::Path,
    sync::{Arc, Mutex, mpsc},
};

use clap::Parser;
use cmdbar_desktop::{
    config::{self, DesktopArgs},
    coordinator::{Coordinator, UiEvent},
    runtime::spawn_ingestion,
};
use tracing::{error, info, warn};
use tracing_subscriber::fmt::MakeWriter;

#[derive(Clone)]
struct FileMakeWriter {
    file: Arc<Mutex<File>>,
}

struct FileWriterGuard {
    file: Arc<Mutex<File>>,
}

impl Write for FileWriterGuard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut locked = self
            .file
            .lock()
            .map_err(|_| io::Error::other("log file lock poisoned"))?;
        locked.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut locked = self
            .file
            .lock()
            .map_err(|_| io::Error::other("log file lock poisoned"))?;
        locked.flush()
    }
}

impl<'a> MakeWriter<'a> for FileMakeWriter {
    type Writer = FileWriterGuard;

    fn make_writer(&'a self) -> Self::Writer {
        FileWriterGuard {
            file: Arc::clone(&self.file),
        }
    }
}

fn main() {
    let args = DesktopArgs::parse();
    init_logging(args.log_file.as_deref());

    let config_path = args.config.clone().unwrap_or_else(config::config_path);
    let saved = config::load_config(&config_path);
    let config = match config::resolve(&args, &saved) {
        Ok(config) => config,
        Err(err) => {
            error!("{err}");
            std::process::exit(2);
        }
    };

    if args.save_config {
        match config::save_config_with_retry(&config_path, &config.to_saved()) {
            Ok(()) => info!(path = %config_path.display(), "config saved"),
            Err(err) => warn!(path = %config_path.display(), "failed to save config: {err}"),
        }
    }

    let (ui_event_tx, ui_event_rx) = mpsc::channel::<UiEvent>();
    let ingestion = match spawn_ingestion(config.listener, ui_event_tx.clone()) {
        Ok(ingestion) => ingestion,
        Err(err) => {
            error!("failed to start async runtime: {err}");
            std::process::exit(1);
        }
    };

    ingestion.runtime().spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                let _ = ui_event_tx.send(UiEvent::ShutdownRequested);
            }
            Err(err) => warn!("cannot listen for ctrl-c: {err}"),
        }
    });

    info!(
        port = config.listener.port,
        screen_width = config.screen.width,
        screen_height = config.screen.height,
        "cmdbar starting"
    );

    let mut coordinator = Coordinator::new(config.screen);
    coordinator.run(&ui_event_rx, config.tick);

    coordinator.clear_all();
    ingestion.shutdown();
    info!("cmdbar stopped");
}

fn init_logging(log_file: Option<&Path>) {
    let env_filter = tracing_subscriber::EnvFilter::from_default_env();

    let Some(log_path) = log_file else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(io::stderr)
            .init();
        return;
    };

    let file = match OpenOptions::new().create(true).append(true).open(log_path) {
        Ok(file) => file,
        Err(err) => {
            eprintln!("failed to open log file {}: {err}", log_path.display());
            tracing_subscriber::fmt().with_env_filter(env_filter).init();
            return;
        }
    };

    let make_writer = FileMakeWriter {
        file: Arc::new(Mutex::new(file)),
    };

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(make_writer)
        .with_ansi(false)
        .init();
}
