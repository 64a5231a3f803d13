use serde::{Deserialize, Serialize};

/// Slack used when dividing by a step so that `0.3 / 0.1` counts as 3 units.
const STEP_EPSILON: f64 = 1e-9;

/// Trading granularity of one instrument.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InstrumentSpec {
    /// Price tick. Derived prices are rounded to the nearest multiple.
    #[serde(default = "default_step")]
    pub price_step: f64,
    /// Volume lot. Volumes are always rounded down to a multiple.
    #[serde(default = "default_step")]
    pub volume_step: f64,
    #[serde(default = "default_step")]
    pub min_volume: f64,
    /// `None` = no venue maximum.
    #[serde(default)]
    pub max_volume: Option<f64>,
}

fn default_step() -> f64 {
    0.01
}

impl Default for InstrumentSpec {
    fn default() -> Self {
        Self {
            price_step: default_step(),
            volume_step: default_step(),
            min_volume: default_step(),
            max_volume: None,
        }
    }
}

impl InstrumentSpec {
    /// Round a derived price to the nearest tick.
    pub fn round_price(&self, price: f64) -> f64 {
        if self.price_step <= 0.0 {
            return price;
        }
        (price / self.price_step).round() * self.price_step
    }

    /// Round a volume down to the lot size. Never rounds up.
    pub fn floor_volume(&self, volume: f64) -> f64 {
        if volume <= 0.0 {
            return 0.0;
        }
        if self.volume_step <= 0.0 {
            return volume;
        }
        let units = (volume / self.volume_step + STEP_EPSILON).floor();
        (units * self.volume_step).min(volume)
    }

    /// Clamp to `[min_volume, max_volume]` without normalizing to the step.
    pub fn clamp_volume(&self, volume: f64) -> f64 {
        let upper = self.max_volume.unwrap_or(f64::INFINITY);
        volume.max(self.min_volume).min(upper)
    }

    /// Volume that may actually be sent: capped at the maximum, floored to
    /// the step, and 0.0 when the result is below the minimum tradable size.
    pub fn normalize_volume(&self, volume: f64) -> f64 {
        let capped = match self.max_volume {
            Some(max) => volume.min(max),
            None => volume,
        };
        let floored = self.floor_volume(capped);
        if floored + STEP_EPSILON < self.min_volume {
            0.0
        } else {
            floored
        }
    }
}
