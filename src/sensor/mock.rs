//! A mock sensor that records interactions and writes stub frames.

use crate::error::{RigError, RigResult};
use crate::sensor::{ImageSensor, SensorSettings};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Shared observable state of a [`MockSensor`]; stays alive after the sensor
/// itself has been moved into a capture worker.
#[derive(Default)]
pub struct MockSensorState {
    configured: Mutex<Vec<SensorSettings>>,
    captured: Mutex<Vec<PathBuf>>,
    closed: AtomicBool,
    exposure_us: AtomicU64,
    fail_captures: AtomicBool,
}

impl MockSensorState {
    pub fn configured(&self) -> Vec<SensorSettings> {
        self.lock(&self.configured).clone()
    }

    pub fn captured(&self) -> Vec<PathBuf> {
        self.lock(&self.captured).clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn lock<'a, T>(&self, mutex: &'a Mutex<T>) -> std::sync::MutexGuard<'a, T> {
        match mutex.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Test double for [`ImageSensor`]: captures touch a stub file on disk so
/// filesystem assertions work, and every interaction is observable through
/// [`MockSensor::state`].
pub struct MockSensor {
    state: Arc<MockSensorState>,
}

impl MockSensor {
    pub fn new() -> Self {
        Self::with_exposure_us(20_000)
    }

    pub fn with_exposure_us(exposure_us: u64) -> Self {
        let state = MockSensorState {
            exposure_us: AtomicU64::new(exposure_us),
            ..Default::default()
        };
        Self {
            state: Arc::new(state),
        }
    }

    /// Observer handle, valid after the sensor moves into a worker.
    pub fn state(&self) -> Arc<MockSensorState> {
        self.state.clone()
    }

    /// Make every subsequent capture fail.
    pub fn fail_captures(&self) {
        self.state.fail_captures.store(true, Ordering::SeqCst);
    }
}

impl Default for MockSensor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ImageSensor for MockSensor {
    async fn configure(&mut self, settings: &SensorSettings) -> RigResult<()> {
        self.state
            .lock(&self.state.configured)
            .push(settings.clone());
        Ok(())
    }

    async fn capture(&mut self, path: &Path) -> RigResult<()> {
        if self.state.fail_captures.load(Ordering::SeqCst) {
            return Err(RigError::Capture("injected capture failure".to_string()));
        }
        std::fs::write(path, b"")
            .map_err(|e| RigError::Capture(format!("failed to write {}: {e}", path.display())))?;
        self.state
            .lock(&self.state.captured)
            .push(path.to_path_buf());
        Ok(())
    }

    async fn exposure_us(&self) -> RigResult<u64> {
        Ok(self.state.exposure_us.load(Ordering::SeqCst))
    }

    async fn close(&mut self) -> RigResult<()> {
        self.state.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_capture_touches_stub_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("well01.jpg");
        let mut sensor = MockSensor::new();

        sensor.capture(&path).await.unwrap();
        assert!(path.exists());
        assert_eq!(sensor.state().captured(), vec![path]);
    }

    #[tokio::test]
    async fn test_injected_capture_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut sensor = MockSensor::new();
        sensor.fail_captures();

        let err = sensor.capture(&dir.path().join("x.jpg")).await.unwrap_err();
        assert!(matches!(err, RigError::Capture(_)));
    }

    #[tokio::test]
    async fn test_close_is_observable() {
        let mut sensor = MockSensor::new();
        let state = sensor.state();
        assert!(!state.is_closed());
        sensor.close().await.unwrap();
        assert!(state.is_closed());
    }
}
