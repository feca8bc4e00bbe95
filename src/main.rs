//! simple-cam binary: capture frames from a camera into image files.

use std::time::Duration;

use clap::Parser;
use simple_cam::settings::{Args, BackendKind, Settings};
use simple_cam::{list_cameras, run, MockBackend, V4L2Backend};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if let Err(err) = execute(&args) {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn execute(args: &Args) -> simple_cam::Result<()> {
    let settings = Settings::load(args)?;
    log::debug!("settings: {settings:?}");

    match settings.backend {
        BackendKind::V4l2 => dispatch(V4L2Backend, settings, args.list),
        BackendKind::Mock => {
            let backend = MockBackend::new(settings.mock.cameras)
                .with_pattern(settings.mock.pattern)
                .with_frame_interval(Duration::from_millis(settings.mock.frame_interval_ms));
            dispatch(backend, settings, args.list)
        }
    }
}

fn dispatch<B: simple_cam::Backend>(
    backend: B,
    settings: Settings,
    list: bool,
) -> simple_cam::Result<()> {
    if list {
        list_cameras(backend)?;
        return Ok(());
    }

    let summary = run(backend, settings)?;
    log::info!(
        "{} frames captured, {} images written",
        summary.frames,
        summary.images
    );
    Ok(())
}
