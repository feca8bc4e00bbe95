//! Command line arguments and the YAML settings file they override.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};

use crate::controls::{parse_assignment, ControlList};
use crate::error::{CameraError, Result};
use crate::mock::TestPattern;
use crate::traits::{FourCC, Size};

/// Capture backend to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// V4L2 capture devices.
    #[default]
    V4l2,
    /// Generated test patterns, no hardware needed.
    Mock,
}

/// Capture frames from a camera and dump them as images.
#[derive(Parser, Debug, Default)]
#[command(version, about)]
pub struct Args {
    /// YAML settings file; command line values take precedence.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Capture backend.
    #[arg(short, long, value_enum)]
    pub backend: Option<BackendKind>,

    /// Camera id or index. Defaults to the first camera.
    #[arg(long)]
    pub camera: Option<String>,

    /// Requested frame width.
    #[arg(long)]
    pub width: Option<u32>,

    /// Requested frame height.
    #[arg(long)]
    pub height: Option<u32>,

    /// Requested pixel format as a FourCC, e.g. YUYV.
    #[arg(long)]
    pub pixel_format: Option<String>,

    /// Number of buffers (and requests) to allocate.
    #[arg(long)]
    pub buffers: Option<u32>,

    /// Seconds to capture for.
    #[arg(short, long)]
    pub timeout: Option<u64>,

    /// Stop after this many frames.
    #[arg(short = 'n', long)]
    pub frames: Option<u32>,

    /// Directory images are written to.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Control applied to every initial request, as NAME=VALUE. Repeatable.
    #[arg(long = "control", value_name = "NAME=VALUE")]
    pub controls: Vec<String>,

    /// Do not write images.
    #[arg(long)]
    pub no_save: bool,

    /// List cameras and exit.
    #[arg(short, long)]
    pub list: bool,

    /// Number of mock cameras.
    #[arg(long)]
    pub mock_cameras: Option<u32>,

    /// Delay between mock frames in milliseconds.
    #[arg(long)]
    pub mock_interval_ms: Option<u64>,
}

/// Settings of the mock backend.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct MockSettings {
    /// Number of cameras.
    pub cameras: u32,
    /// Delay between frames in milliseconds.
    pub frame_interval_ms: u64,
    /// Pattern drawn into frames.
    pub pattern: TestPattern,
}

impl Default for MockSettings {
    fn default() -> Self {
        Self {
            cameras: 1,
            frame_interval_ms: 33,
            pattern: TestPattern::ColorBars,
        }
    }
}

/// Resolved application settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Capture backend.
    pub backend: BackendKind,
    /// Camera id or index.
    pub camera: Option<String>,
    /// Requested frame width.
    pub width: u32,
    /// Requested frame height.
    pub height: u32,
    /// Requested pixel format.
    pub pixel_format: Option<String>,
    /// Buffer count override.
    pub buffers: Option<u32>,
    /// Capture duration in seconds.
    pub timeout_secs: u64,
    /// Frame limit.
    pub frames: Option<u32>,
    /// Image output directory.
    pub output: PathBuf,
    /// Whether images are written.
    pub save_images: bool,
    /// Controls as NAME=VALUE.
    pub controls: Vec<String>,
    /// Mock backend settings.
    pub mock: MockSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            camera: None,
            width: 2592,
            height: 1944,
            pixel_format: None,
            buffers: None,
            timeout_secs: 3,
            frames: None,
            output: PathBuf::from("images"),
            save_images: true,
            controls: Vec::new(),
            mock: MockSettings::default(),
        }
    }
}

impl Settings {
    /// Read settings from a YAML file. Missing keys keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .map_err(|err| CameraError::Config(format!("{}: {err}", path.display())))?;
        serde_yaml::from_reader(file)
            .map_err(|err| CameraError::Config(format!("{}: {err}", path.display())))
    }

    /// Build settings from the command line, on top of `--config` if given.
    pub fn load(args: &Args) -> Result<Self> {
        let mut settings = match &args.config {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        settings.apply(args);
        settings.control_list()?;
        settings.pixel_format()?;
        Ok(settings)
    }

    /// Override fields with the values given on the command line.
    pub fn apply(&mut self, args: &Args) {
        if let Some(backend) = args.backend {
            self.backend = backend;
        }
        if let Some(camera) = &args.camera {
            self.camera = Some(camera.clone());
        }
        if let Some(width) = args.width {
            self.width = width;
        }
        if let Some(height) = args.height {
            self.height = height;
        }
        if let Some(pixel_format) = &args.pixel_format {
            self.pixel_format = Some(pixel_format.clone());
        }
        if args.buffers.is_some() {
            self.buffers = args.buffers;
        }
        if let Some(timeout) = args.timeout {
            self.timeout_secs = timeout;
        }
        if args.frames.is_some() {
            self.frames = args.frames;
        }
        if let Some(output) = &args.output {
            self.output = output.clone();
        }
        if args.no_save {
            self.save_images = false;
        }
        self.controls.extend(args.controls.iter().cloned());
        if let Some(cameras) = args.mock_cameras {
            self.mock.cameras = cameras;
        }
        if let Some(interval) = args.mock_interval_ms {
            self.mock.frame_interval_ms = interval;
        }
    }

    /// Requested frame size.
    pub const fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    /// Capture duration.
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Requested pixel format, if any.
    pub fn pixel_format(&self) -> Result<Option<FourCC>> {
        self.pixel_format.as_deref().map(str::parse).transpose()
    }

    /// Parsed controls. Later assignments to the same control win.
    pub fn control_list(&self) -> Result<ControlList> {
        let mut list = ControlList::new();
        for assignment in &self.controls {
            let (id, value) = parse_assignment(assignment)?;
            list.set(id, value);
        }
        Ok(list)
    }
}
