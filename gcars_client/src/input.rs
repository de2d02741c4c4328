//! Input handling.
//!
//! In a real client this would integrate with windowing and key bindings.
//! This scaffold focuses on turning sampled input into one [`Signal`] per
//! tick.

use gcars_shared::net::{Signal, Throttle};

/// User input state at a moment in time.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct InputState {
    /// Steering delta in radians, counter-clockwise positive.
    pub steer: f64,
    pub throttle: Option<Throttle>,
}

impl InputState {
    pub fn is_idle(&self) -> bool {
        self.steer == 0.0 && self.throttle.is_none()
    }
}

/// Turns sampled input into a `Signal` for a tick.
pub fn build_signal(input: InputState) -> Signal {
    Signal {
        angle: input.steer,
        throttle: input.throttle,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_mirrors_input() {
        let input = InputState {
            steer: -0.2,
            throttle: Some(Throttle::Accelerate),
        };
        let s = build_signal(input);
        assert_eq!(s.angle, -0.2);
        assert_eq!(s.throttle, Some(Throttle::Accelerate));
        assert!(!input.is_idle());
        assert!(InputState::default().is_idle());
    }
}
