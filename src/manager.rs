//! Camera manager: enumerates cameras and hands out exclusive access.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::camera::Camera;
use crate::controls::CameraLocation;
use crate::error::{CameraError, Result};
use crate::traits::{Backend, CameraInfo};

static MANAGER_ACTIVE: AtomicBool = AtomicBool::new(false);

/// Set of camera ids currently acquired.
#[derive(Debug, Clone, Default)]
pub(crate) struct AcquireRegistry {
    acquired: Arc<Mutex<HashSet<String>>>,
}

impl AcquireRegistry {
    pub(crate) fn try_acquire(&self, id: &str) -> Result<()> {
        let mut acquired = self
            .acquired
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if acquired.insert(id.to_owned()) {
            Ok(())
        } else {
            Err(CameraError::CameraBusy(id.to_owned()))
        }
    }

    pub(crate) fn release(&self, id: &str) {
        self.acquired
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
    }
}

/// Enumerates the cameras of a backend. Only one may exist per process.
pub struct CameraManager<B: Backend> {
    backend: B,
    cameras: Vec<CameraInfo>,
    started: bool,
    registry: AcquireRegistry,
}

impl<B: Backend> CameraManager<B> {
    /// Create the process-wide camera manager.
    pub fn new(backend: B) -> Result<Self> {
        if MANAGER_ACTIVE
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(CameraError::ManagerAlreadyRunning);
        }
        Ok(Self {
            backend,
            cameras: Vec::new(),
            started: false,
            registry: AcquireRegistry::default(),
        })
    }

    /// Enumerate cameras.
    pub fn start(&mut self) -> Result<()> {
        let mut cameras = self.backend.enumerate()?;
        cameras.sort_by(|a, b| id_order(&a.id).cmp(&id_order(&b.id)));
        log::info!("camera manager started, {} camera(s) found", cameras.len());
        self.cameras = cameras;
        self.started = true;
        Ok(())
    }

    /// Forget the enumerated cameras. Acquired cameras stay usable.
    pub fn stop(&mut self) {
        if self.started {
            log::info!("camera manager stopped");
        }
        self.cameras.clear();
        self.started = false;
    }

    /// Cameras found by `start`, sorted by id with numeric suffixes in
    /// numeric order.
    pub fn cameras(&self) -> &[CameraInfo] {
        &self.cameras
    }

    /// Camera with the given id.
    pub fn get(&self, id: &str) -> Option<&CameraInfo> {
        self.cameras.iter().find(|info| info.id == id)
    }

    /// Open a camera for exclusive use.
    pub fn acquire(&self, id: &str) -> Result<Camera<B::Device>> {
        if !self.started {
            return Err(CameraError::ManagerNotStarted);
        }
        let info = self
            .get(id)
            .ok_or_else(|| CameraError::CameraNotFound(id.to_owned()))?;

        self.registry.try_acquire(id)?;
        match self.backend.open(info) {
            Ok(device) => Camera::new(info.clone(), device, self.registry.clone()),
            Err(err) => {
                self.registry.release(id);
                Err(err)
            }
        }
    }

}

/// Sort key for camera ids: `video2` goes before `video10`.
fn id_order(id: &str) -> (&str, Option<u64>, &str) {
    let prefix = id.trim_end_matches(|c: char| c.is_ascii_digit());
    let number = id.get(prefix.len()..).and_then(|digits| digits.parse().ok());
    (prefix, number, id)
}

impl<B: Backend> Drop for CameraManager<B> {
    fn drop(&mut self) {
        MANAGER_ACTIVE.store(false, Ordering::Release);
    }
}

/// Human readable camera name built from its location and model.
pub fn camera_name(info: &CameraInfo) -> String {
    let props = &info.properties;
    let name = match props.location {
        Some(CameraLocation::Front) => "Internal front camera".to_owned(),
        Some(CameraLocation::Back) => "Internal back camera".to_owned(),
        Some(CameraLocation::External) => match &props.model {
            Some(model) => format!("External camera '{model}'"),
            None => "External camera".to_owned(),
        },
        None => props.model.clone().unwrap_or_else(|| "Camera".to_owned()),
    };
    format!("{name} ({})", info.id)
}
