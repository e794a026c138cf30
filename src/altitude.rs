/// Accumulates altitude gain and loss with a dead band
///
/// GPS altitude jitters by several meters, so a change only counts once the
/// altitude has moved `threshold_m` away from the last reference altitude.
#[derive(Debug, Clone)]
pub struct AltitudeAccumulator {
    threshold_m: f64,
    reference: Option<f64>,
    gain_m: f64,
    loss_m: f64,
}

impl AltitudeAccumulator {
    pub fn new(threshold_m: f64) -> Self {
        Self {
            threshold_m,
            reference: None,
            gain_m: 0.0,
            loss_m: 0.0,
        }
    }

    /// Continue from totals of a previously recorded track
    pub fn with_totals(threshold_m: f64, gain_m: f64, loss_m: f64) -> Self {
        Self {
            threshold_m,
            reference: None,
            gain_m,
            loss_m,
        }
    }

    /// Change the dead band; applies from the next sample on.
    pub fn set_threshold(&mut self, threshold_m: f64) {
        self.threshold_m = threshold_m;
    }

    pub fn add(&mut self, altitude_m: f64) {
        if !altitude_m.is_finite() {
            return;
        }
        let Some(reference) = self.reference else {
            self.reference = Some(altitude_m);
            return;
        };

        let delta = altitude_m - reference;
        if delta >= self.threshold_m {
            self.gain_m += delta;
            self.reference = Some(altitude_m);
        } else if -delta >= self.threshold_m {
            self.loss_m += -delta;
            self.reference = Some(altitude_m);
        }
    }

    /// Forget the reference altitude; totals are kept.
    pub fn reset_reference(&mut self) {
        self.reference = None;
    }

    pub fn gain_m(&self) -> f64 {
        self.gain_m
    }

    pub fn loss_m(&self) -> f64 {
        self.loss_m
    }
}
