//! Head-tracking sensor subscription and posture snapshot.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use arc_swap::ArcSwap;
use tracing::debug;

use auricle_core::HeadPosture;
use auricle_effect::PostureProvider;

use crate::{EngineError, Result};

/// Which spatializer consumes the sensor stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpatializerEngine {
    /// No spatializer active.
    None,
    /// AP-side (ARM) spatializer.
    Arm,
    /// DSP-side spatializer.
    Dsp,
}

/// Callback the sensor invokes with each orientation sample.
pub type PostureListener = Arc<dyn Fn(HeadPosture) + Send + Sync>;

/// The IMU subscription surface.
///
/// Implemented over the platform sensor service in production; tests and
/// demos use [`NullPostureSensor`].
pub trait PostureSensor: Send + Sync {
    /// Prepare the sensor. Idempotent.
    fn init(&self) -> Result<()>;

    /// Select the consumer of the sample stream.
    fn set_config(&self, engine: SpatializerEngine) -> Result<()>;

    /// Start delivering samples to `listener`.
    fn activate(&self, listener: PostureListener) -> Result<()>;

    /// Stop delivering samples.
    fn deactivate(&self) -> Result<()>;
}

/// Sensor that never produces samples. Activation succeeds so state
/// transitions can be exercised without hardware.
#[derive(Debug, Default)]
pub struct NullPostureSensor {
    active: AtomicBool,
}

impl PostureSensor for NullPostureSensor {
    fn init(&self) -> Result<()> {
        Ok(())
    }
    fn set_config(&self, engine: SpatializerEngine) -> Result<()> {
        debug!(?engine, "null posture sensor configured");
        Ok(())
    }
    fn activate(&self, _listener: PostureListener) -> Result<()> {
        self.active.store(true, Ordering::Release);
        Ok(())
    }
    fn deactivate(&self) -> Result<()> {
        if !self.active.swap(false, Ordering::AcqRel) {
            return Err(EngineError::Sensor("sensor was not active".to_string()));
        }
        Ok(())
    }
}

/// Owns the sensor subscription and a double-buffered posture snapshot.
///
/// The sensor callback writes whole postures through an [`ArcSwap`]; the
/// render thread reads them wait-free via [`PostureProvider`].
pub struct HeadTracker {
    sensor: Arc<dyn PostureSensor>,
    snapshot: Arc<ArcSwap<HeadPosture>>,
}

impl HeadTracker {
    /// Tracker over the given sensor, starting at the identity posture.
    pub fn new(sensor: Arc<dyn PostureSensor>) -> Arc<Self> {
        Arc::new(HeadTracker {
            sensor,
            snapshot: Arc::new(ArcSwap::from_pointee(HeadPosture::IDENTITY)),
        })
    }

    /// Initialize the sensor and route it at the given engine.
    pub fn configure(&self, engine: SpatializerEngine) -> Result<()> {
        self.sensor.init()?;
        self.sensor.set_config(engine)
    }

    /// Subscribe the snapshot to the sensor stream.
    pub fn activate(&self) -> Result<()> {
        let snapshot = Arc::clone(&self.snapshot);
        self.sensor.activate(Arc::new(move |posture| {
            snapshot.store(Arc::new(posture));
        }))
    }

    /// Unsubscribe and reset the snapshot to identity.
    pub fn deactivate(&self) -> Result<()> {
        let result = self.sensor.deactivate();
        self.snapshot.store(Arc::new(HeadPosture::IDENTITY));
        result
    }

    /// Overwrite the snapshot directly (tests, simulated sensors).
    pub fn set_posture(&self, posture: HeadPosture) {
        self.snapshot.store(Arc::new(posture));
    }
}

impl PostureProvider for HeadTracker {
    fn posture(&self) -> HeadPosture {
        **self.snapshot.load()
    }
}

impl std::fmt::Debug for HeadTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeadTracker")
            .field("posture", &self.posture())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_starts_at_identity() {
        let tracker = HeadTracker::new(Arc::new(NullPostureSensor::default()));
        assert_eq!(tracker.posture(), HeadPosture::IDENTITY);
    }

    #[test]
    fn set_posture_visible_to_reader() {
        let tracker = HeadTracker::new(Arc::new(NullPostureSensor::default()));
        let tilted = HeadPosture {
            order: 7,
            w: 0.7,
            x: 0.1,
            y: 0.2,
            z: 0.3,
        };
        tracker.set_posture(tilted);
        assert_eq!(tracker.posture(), tilted);
    }

    #[test]
    fn deactivate_resets_to_identity() {
        let tracker = HeadTracker::new(Arc::new(NullPostureSensor::default()));
        tracker.configure(SpatializerEngine::Arm).unwrap();
        tracker.activate().unwrap();
        tracker.set_posture(HeadPosture {
            order: 2,
            w: 0.5,
            x: 0.5,
            y: 0.5,
            z: 0.5,
        });
        tracker.deactivate().unwrap();
        assert_eq!(tracker.posture(), HeadPosture::IDENTITY);
    }
}
