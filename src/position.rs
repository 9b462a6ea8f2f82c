//! Position decoding and display smoothing.

use serde::Deserialize;

/// A position in floor-map coordinates, as computed by the positioning
/// service from published readings.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// Decode an inbound result payload.
///
/// Anything that is not a JSON object with numeric `x` and `y` fields is
/// dropped; one lost update is inconsequential under the smoothing filter,
/// so no error surfaces from here.
pub fn decode_position(payload: &[u8]) -> Option<Position> {
    serde_json::from_slice(payload).ok()
}

/// First-order exponential moving average over received positions.
///
/// The first update passes through unchanged; afterwards each raw position
/// pulls the smoothed value toward it by the configured factor. The filter
/// never overshoots and converges geometrically toward a constant input.
/// There is no reset; the state lives for the session.
#[derive(Debug)]
pub struct PositionSmoother {
    alpha: f64,
    smoothed: Option<Position>,
}

impl PositionSmoother {
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha,
            smoothed: None,
        }
    }

    /// Fold a raw position into the filter and return the new display value.
    pub fn update(&mut self, raw: Position) -> Position {
        let next = match self.smoothed {
            None => raw,
            Some(prev) => Position {
                x: prev.x + self.alpha * (raw.x - prev.x),
                y: prev.y + self.alpha * (raw.y - prev.y),
            },
        };
        self.smoothed = Some(next);
        next
    }

    /// The current display value, absent until the first update.
    pub fn current(&self) -> Option<Position> {
        self.smoothed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f64 = 1e-9;

    #[test]
    fn test_first_update_passes_through() {
        let mut smoother = PositionSmoother::new(0.15);
        assert_eq!(smoother.current(), None);

        let smoothed = smoother.update(Position { x: 1.0, y: 1.0 });
        assert_eq!(smoothed, Position { x: 1.0, y: 1.0 });
    }

    #[test]
    fn test_second_update_moves_by_alpha() {
        let mut smoother = PositionSmoother::new(0.15);
        smoother.update(Position { x: 1.0, y: 1.0 });
        let smoothed = smoother.update(Position { x: 0.0, y: 0.0 });

        // 1 + 0.15 * (0 - 1) = 0.85
        assert!((smoothed.x - 0.85).abs() < EPSILON);
        assert!((smoothed.y - 0.85).abs() < EPSILON);
    }

    #[test]
    fn test_converges_without_overshoot() {
        let mut smoother = PositionSmoother::new(0.15);
        smoother.update(Position { x: 10.0, y: -10.0 });

        let mut previous = 10.0;
        for _ in 0..100 {
            let smoothed = smoother.update(Position { x: 0.0, y: 0.0 });
            assert!(smoothed.x >= 0.0);
            assert!(smoothed.x < previous);
            previous = smoothed.x;
        }
        assert!(previous < 1e-4);
    }

    #[test]
    fn test_decode_valid_payload() {
        let position = decode_position(br#"{"x": 1.5, "y": -2.25}"#).unwrap();
        assert_eq!(position, Position { x: 1.5, y: -2.25 });

        // integer coordinates are numbers too
        let position = decode_position(br#"{"x": 3, "y": 4}"#).unwrap();
        assert_eq!(position, Position { x: 3.0, y: 4.0 });
    }

    #[test]
    fn test_decode_tolerates_extra_fields() {
        let position = decode_position(br#"{"x": 1.0, "y": 2.0, "confidence": 0.9}"#).unwrap();
        assert_eq!(position, Position { x: 1.0, y: 2.0 });
    }

    #[test]
    fn test_decode_rejects_malformed_payloads() {
        assert_eq!(decode_position(b"not json"), None);
        assert_eq!(decode_position(br#"{"x": 1.0}"#), None);
        assert_eq!(decode_position(br#"{"x": "a", "y": 2.0}"#), None);
        assert_eq!(decode_position(br#"[1.0, 2.0]"#), None);
        assert_eq!(decode_position(b""), None);
    }
}
