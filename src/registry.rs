//! Detector registry: assembles and owns the detector set of one session.

use crate::detector::{
    Detector, DetectorType, HardwareDetector, IntervalDetector, MotionDetector, MetaDataDetector,
    NetworkDetector,
};
use crate::session::{SessionContext, SessionMode};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

/// A detector behind its own lock. Each detector is touched by one callback
/// path at a time; detectors never share a lock.
pub type SharedDetector = Arc<Mutex<Box<dyn Detector>>>;

/// Lock a detector, recovering from a poisoned lock.
pub fn lock(detector: &SharedDetector) -> MutexGuard<'_, Box<dyn Detector>> {
    detector.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Ordered detector set for one session.
#[derive(Default)]
pub struct DetectorRegistry {
    detectors: Vec<(DetectorType, SharedDetector)>,
}

impl DetectorRegistry {
    /// Build the detector set for the context's mode.
    ///
    /// Gathering sessions lead with the metadata detector, then the hardware
    /// detector, whose info row is written here. Sensing detectors follow in
    /// a fixed order, filtered by the configured sources. A detector without
    /// its capability is still constructed; it settles in `Disabled` when
    /// started.
    pub fn assemble(ctx: &SessionContext) -> Self {
        let mut registry = Self::default();

        if ctx.mode == SessionMode::Gather {
            registry.insert(Box::new(MetaDataDetector::new(ctx)));
            registry.insert(Box::new(HardwareDetector::new(ctx)));
        }

        let sources = &ctx.config.sources;
        for kind in DetectorType::ALL {
            if matches!(kind, DetectorType::MetaData | DetectorType::Hardware) {
                continue;
            }
            if !sources.includes(kind) {
                debug!(detector = %kind, "source not selected");
                continue;
            }
            let detector: Box<dyn Detector> = match kind {
                DetectorType::Accelerometer => Box::new(MotionDetector::accelerometer(ctx)),
                DetectorType::Gyroscope => Box::new(MotionDetector::gyroscope(ctx)),
                DetectorType::Magnetometer => Box::new(MotionDetector::magnetometer(ctx)),
                DetectorType::Network => Box::new(NetworkDetector::new(ctx)),
                DetectorType::Location => Box::new(IntervalDetector::location(ctx)),
                DetectorType::Bluetooth => Box::new(IntervalDetector::bluetooth(ctx)),
                DetectorType::AmbientSound => Box::new(IntervalDetector::ambient_sound(ctx)),
                DetectorType::Image => Box::new(IntervalDetector::image(ctx)),
                DetectorType::MetaData | DetectorType::Hardware => continue,
            };
            registry.insert(detector);
        }

        info!(count = registry.len(), mode = ?ctx.mode, "assembled detectors");
        registry
    }

    fn insert(&mut self, detector: Box<dyn Detector>) {
        let kind = detector.detector_type();
        self.detectors.push((kind, Arc::new(Mutex::new(detector))));
    }

    pub fn get(&self, kind: DetectorType) -> Option<&SharedDetector> {
        self.detectors
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, d)| d)
    }

    /// Detector types in registration order.
    pub fn types(&self) -> Vec<DetectorType> {
        self.detectors.iter().map(|(k, _)| *k).collect()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &SharedDetector> {
        self.detectors.iter().map(|(_, d)| d)
    }

    /// Start every detector. Returns how many are listening.
    pub fn start_all(&self) -> usize {
        self.iter()
            .filter(|d| {
                let mut detector = lock(d);
                detector.start_listening() || detector.is_listening()
            })
            .count()
    }

    /// Stop every detector, flushing each one.
    pub fn stop_all(&self) {
        for detector in self.iter() {
            lock(detector).stop_listening();
        }
    }

    pub fn len(&self) -> usize {
        self.detectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }
}

impl std::fmt::Debug for DetectorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetectorRegistry")
            .field("detectors", &self.types())
            .finish()
    }
}
