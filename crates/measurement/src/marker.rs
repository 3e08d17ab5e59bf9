use std::sync::atomic::{AtomicU64, Ordering};

/// Marker edge used when the entered value is missing or not positive.
pub const DEFAULT_MARKER_SIDE_CM: f64 = 5.0;

/// Real-world side length of the calibration marker, as entered by the user.
///
/// The controller reads it at the start of every tick, so edits made while a
/// session runs apply to the next submitted frame.
#[derive(Debug)]
pub struct MarkerSide {
    centimeters: AtomicU64,
}

impl MarkerSide {
    pub fn new(centimeters: f64) -> Self {
        Self {
            centimeters: AtomicU64::new(centimeters.to_bits()),
        }
    }

    pub fn set_centimeters(&self, centimeters: f64) {
        self.centimeters
            .store(centimeters.to_bits(), Ordering::Relaxed);
    }

    pub fn centimeters(&self) -> f64 {
        let cm = f64::from_bits(self.centimeters.load(Ordering::Relaxed));
        if cm.is_finite() && cm > 0.0 {
            cm
        } else {
            DEFAULT_MARKER_SIDE_CM
        }
    }

    pub fn meters(&self) -> f64 {
        self.centimeters() / 100.0
    }
}

impl Default for MarkerSide {
    fn default() -> Self {
        Self::new(DEFAULT_MARKER_SIDE_CM)
    }
}
