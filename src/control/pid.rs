//! PID controller for the Peltier element
//!
//! Proportional-integral-derivative controller with symmetric output
//! limits.  The sign of the output selects heating or cooling; the
//! magnitude becomes the PWM value sent to the device.

/// PID controller
#[derive(Debug, Clone)]
pub struct PidController {
    kp: f64,
    ki: f64,
    kd: f64,
    setpoint: f64,
    /// Accumulated integral term (already scaled by `ki`).
    integral: f64,
    prev_measurement: Option<f64>,
    output_min: f64,
    output_max: f64,
}

impl PidController {
    pub fn new(kp: f64, ki: f64, kd: f64, setpoint: f64) -> Self {
        Self {
            kp,
            ki,
            kd,
            setpoint,
            integral: 0.0,
            prev_measurement: None,
            output_min: -255.0,
            output_max: 255.0,
        }
    }

    /// Set output limits
    pub fn set_limits(&mut self, min: f64, max: f64) {
        self.output_min = min;
        self.output_max = max;
    }

    /// Update setpoint
    pub fn set_target(&mut self, setpoint: f64) {
        self.setpoint = setpoint;
    }

    /// Current integral accumulator.
    pub fn integral(&self) -> f64 {
        self.integral
    }

    /// Compute PID output given current measurement and seconds since the
    /// previous call.
    pub fn compute(&mut self, measurement: f64, dt: f64) -> f64 {
        let error = self.setpoint - measurement;

        // Proportional
        let p = self.kp * error;

        // Integral, clamped to the output range (anti-windup)
        if dt > 0.0 {
            self.integral =
                (self.integral + self.ki * error * dt).clamp(self.output_min, self.output_max);
        }

        // Derivative on measurement, so setpoint changes don't kick
        let d = match self.prev_measurement {
            Some(prev) if dt > 0.0 => -self.kd * (measurement - prev) / dt,
            _ => 0.0,
        };

        self.prev_measurement = Some(measurement);

        (p + self.integral + d).clamp(self.output_min, self.output_max)
    }

    /// Reset controller state
    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.prev_measurement = None;
    }
}
