//! Scripted tracking oracle.
//!
//! The Oracle plays the AR runtime's role of observation producer:
//! - A script of tracking states per target (how long each lasts, in ticks)
//! - The true pose of each reference image
//! - Per-frame observations with seeded pose jitter

use anchorview_core::{PoseMatrix, TrackingObservation, TrackingState};
use nalgebra::{Isometry3, Translation3, UnitQuaternion, Vector3};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// One stretch of identical tracking state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub state: TrackingState,
    pub ticks: u64,
}

impl Segment {
    pub fn new(state: TrackingState, ticks: u64) -> Self {
        Self { state, ticks }
    }
}

/// Ground truth and script for one reference image.
#[derive(Debug, Clone)]
pub struct ScriptedTarget {
    pub name: String,
    /// Where the printed image really is (meters, camera space)
    pub position: Vector3<f64>,
    /// Yaw of the image about its normal (radians)
    pub yaw: f64,
    pub script: Vec<Segment>,
}

impl ScriptedTarget {
    pub fn new(name: &str, script: Vec<Segment>) -> Self {
        Self {
            name: name.to_string(),
            position: Vector3::new(0.0, 0.0, -0.5),
            yaw: 0.0,
            script,
        }
    }

    pub fn total_ticks(&self) -> u64 {
        self.script.iter().map(|s| s.ticks).sum()
    }

    /// State reported at `tick` (0-based); `None` once the script is over.
    pub fn state_at(&self, tick: u64) -> Option<TrackingState> {
        let mut start = 0;
        for segment in &self.script {
            if tick < start + segment.ticks {
                return Some(segment.state);
            }
            start += segment.ticks;
        }
        None
    }

    /// Number of maximal runs of consecutive `Tracking` ticks.
    pub fn tracking_runs(&self) -> usize {
        let mut runs = 0;
        let mut previous = None;
        for segment in self.script.iter().filter(|s| s.ticks > 0) {
            if segment.state == TrackingState::Tracking && previous != Some(TrackingState::Tracking) {
                runs += 1;
            }
            previous = Some(segment.state);
        }
        runs
    }
}

/// Produces per-frame observations for every scripted target.
pub struct TrackingOracle {
    targets: Vec<ScriptedTarget>,
    rng: ChaCha8Rng,
    /// Uniform translation noise (meters)
    jitter_m: f64,
    dt: f64,
    tick: u64,
}

impl TrackingOracle {
    pub fn new(seed: u64, tick_rate_hz: u32) -> Self {
        Self {
            targets: Vec::new(),
            rng: ChaCha8Rng::seed_from_u64(seed),
            jitter_m: 0.002,
            dt: 1.0 / tick_rate_hz.max(1) as f64,
            tick: 0,
        }
    }

    pub fn with_jitter(mut self, jitter_m: f64) -> Self {
        self.jitter_m = jitter_m.abs();
        self
    }

    pub fn add_target(&mut self, target: ScriptedTarget) {
        self.targets.push(target);
    }

    pub fn target(&self, name: &str) -> Option<&ScriptedTarget> {
        self.targets.iter().find(|t| t.name == name)
    }

    /// Ticks until every script has finished.
    pub fn duration_ticks(&self) -> u64 {
        self.targets.iter().map(|t| t.total_ticks()).max().unwrap_or(0)
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn time(&self) -> f64 {
        self.tick as f64 * self.dt
    }

    pub fn is_finished(&self) -> bool {
        self.tick >= self.duration_ticks()
    }

    /// True pose of `target` (no noise).
    pub fn true_pose(target: &ScriptedTarget) -> PoseMatrix {
        let rotation = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), target.yaw);
        let iso = Isometry3::from_parts(Translation3::from(target.position), rotation);
        PoseMatrix::from_matrix4(&iso.to_homogeneous())
    }

    /// Observations of the next frame, then advances one tick.
    pub fn next_frame(&mut self) -> Vec<TrackingObservation> {
        let tick = self.tick;
        let timestamp = self.time();
        let mut frame = Vec::with_capacity(self.targets.len());

        for target in &self.targets {
            let Some(state) = target.state_at(tick) else {
                continue;
            };
            let jitter = if self.jitter_m > 0.0 {
                Vector3::new(
                    self.rng.gen_range(-self.jitter_m..=self.jitter_m),
                    self.rng.gen_range(-self.jitter_m..=self.jitter_m),
                    self.rng.gen_range(-self.jitter_m..=self.jitter_m),
                )
            } else {
                Vector3::zeros()
            };

            let mut noisy = target.clone();
            noisy.position += jitter;
            frame.push(TrackingObservation::new(
                target.name.clone(),
                state,
                Self::true_pose(&noisy),
                timestamp,
            ));
        }

        self.tick += 1;
        frame
    }
}

/// Random script: `segments` stretches with random states and lengths.
pub fn random_script(rng: &mut ChaCha8Rng, segments: usize, max_ticks: u64) -> Vec<Segment> {
    const STATES: [TrackingState; 3] = [
        TrackingState::Tracking,
        TrackingState::NotTracking,
        TrackingState::Stopped,
    ];
    (0..segments)
        .map(|_| {
            let state = STATES[rng.gen_range(0..STATES.len())];
            Segment::new(state, rng.gen_range(1..=max_ticks.max(1)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use TrackingState::*;

    #[test]
    fn test_state_at_follows_script() {
        let target = ScriptedTarget::new("TargetQR", vec![Segment::new(NotTracking, 2), Segment::new(Tracking, 3)]);
        assert_eq!(target.state_at(0), Some(NotTracking));
        assert_eq!(target.state_at(2), Some(Tracking));
        assert_eq!(target.state_at(4), Some(Tracking));
        assert_eq!(target.state_at(5), None);
        assert_eq!(target.total_ticks(), 5);
    }

    #[test]
    fn test_tracking_runs_merge_adjacent_segments() {
        let target = ScriptedTarget::new(
            "TargetQR",
            vec![
                Segment::new(Tracking, 2),
                Segment::new(Tracking, 2),
                Segment::new(Stopped, 1),
                Segment::new(Tracking, 0),
                Segment::new(NotTracking, 1),
                Segment::new(Tracking, 1),
            ],
        );
        assert_eq!(target.tracking_runs(), 2);
    }

    #[test]
    fn test_oracle_is_deterministic() {
        let script = vec![Segment::new(Tracking, 5)];
        let mut a = TrackingOracle::new(9, 30);
        let mut b = TrackingOracle::new(9, 30);
        a.add_target(ScriptedTarget::new("TargetQR", script.clone()));
        b.add_target(ScriptedTarget::new("TargetQR", script));

        for _ in 0..5 {
            assert_eq!(a.next_frame(), b.next_frame());
        }
        assert!(a.is_finished());
        assert!(a.next_frame().is_empty());
    }

    #[test]
    fn test_jitter_is_bounded() {
        let mut oracle = TrackingOracle::new(3, 30).with_jitter(0.01);
        oracle.add_target(ScriptedTarget::new("TargetQR", vec![Segment::new(Tracking, 50)]));

        while !oracle.is_finished() {
            for obs in oracle.next_frame() {
                let offset = obs.pose.translation() - Vector3::new(0.0, 0.0, -0.5);
                assert!(offset.amax() <= 0.01 + 1e-12);
            }
        }
    }
}
