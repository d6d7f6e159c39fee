//! Sparse rotation/scale keyframes and their expansion into per-frame curves.

use serde::{Deserialize, Serialize};

/// A control point: `value` at a fraction of the trajectory
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Keyframe {
    pub trajectory_progress: f32,
    pub value: f32,
}

impl Keyframe {
    pub fn new(trajectory_progress: f32, value: f32) -> Self {
        Self {
            trajectory_progress,
            value,
        }
    }
}

impl std::str::FromStr for Keyframe {
    type Err = String;

    /// Parses `"progress:value"`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (progress, value) = s
            .split_once(':')
            .ok_or_else(|| format!("expected progress:value but got '{s}'"))?;
        let progress = progress
            .trim()
            .parse()
            .map_err(|e| format!("bad progress in '{s}': {e}"))?;
        let value = value
            .trim()
            .parse()
            .map_err(|e| format!("bad value in '{s}': {e}"))?;
        Ok(Keyframe::new(progress, value))
    }
}

/// Which curve a keyframe belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyframeKind {
    /// Degrees
    Rotation,
    /// Multiplier
    Scale,
}

impl KeyframeKind {
    /// Value of a curve with no keyframes
    pub fn default_value(self) -> f32 {
        match self {
            KeyframeKind::Rotation => 0.0,
            KeyframeKind::Scale => 1.0,
        }
    }
}

/// Keyframes sorted ascending by progress, at most one per progress value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<Keyframe>", into = "Vec<Keyframe>")]
pub struct KeyframeTrack {
    keys: Vec<Keyframe>,
}

impl From<Vec<Keyframe>> for KeyframeTrack {
    fn from(keys: Vec<Keyframe>) -> Self {
        Self::from_keys(keys)
    }
}

impl From<KeyframeTrack> for Vec<Keyframe> {
    fn from(track: KeyframeTrack) -> Self {
        track.keys
    }
}

impl KeyframeTrack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a track from arbitrary keyframes; later duplicates win
    pub fn from_keys(keys: impl IntoIterator<Item = Keyframe>) -> Self {
        let mut track = Self::new();
        for key in keys {
            track.insert(key);
        }
        track
    }

    pub fn keys(&self) -> &[Keyframe] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Insert keeping the order; progress is clamped to `[0, 1]` and a key
    /// at an existing progress replaces it. NaN progress is ignored.
    pub fn insert(&mut self, key: Keyframe) -> bool {
        if key.trajectory_progress.is_nan() {
            tracing::warn!("Ignoring keyframe with NaN progress");
            return false;
        }
        let key = Keyframe::new(key.trajectory_progress.clamp(0.0, 1.0), key.value);

        let idx = self
            .keys
            .partition_point(|k| k.trajectory_progress < key.trajectory_progress);
        match self.keys.get_mut(idx) {
            Some(existing) if existing.trajectory_progress == key.trajectory_progress => {
                *existing = key;
            }
            _ => self.keys.insert(idx, key),
        }
        true
    }

    pub fn remove(&mut self, index: usize) -> Option<Keyframe> {
        (index < self.keys.len()).then(|| self.keys.remove(index))
    }

    pub fn clear(&mut self) {
        self.keys.clear();
    }

    /// Dense per-frame values, see [`expand_keyframes`]
    pub fn expand(&self, frames: usize, kind: KeyframeKind) -> Vec<f32> {
        expand_keyframes(&self.keys, frames, kind.default_value())
    }
}

/// Expand sorted keyframes into one value per frame
///
/// Frame `i` sits at progress `i / (frames - 1)`. Values are linearly
/// interpolated between the bracketing keys and held at the boundary keys
/// outside the authored range. No keys gives a constant `default`.
pub fn expand_keyframes(keys: &[Keyframe], frames: usize, default: f32) -> Vec<f32> {
    let (Some(first), Some(last)) = (keys.first(), keys.last()) else {
        return vec![default; frames];
    };

    (0..frames)
        .map(|i| {
            let progress = if frames > 1 {
                i as f32 / (frames - 1) as f32
            } else {
                0.0
            };

            if progress <= first.trajectory_progress {
                return first.value;
            }
            if progress >= last.trajectory_progress {
                return last.value;
            }

            // First key strictly after `progress`; its predecessor brackets it
            let next = keys.partition_point(|k| k.trajectory_progress <= progress);
            let (a, b) = (keys[next - 1], keys[next]);
            let span = b.trajectory_progress - a.trajectory_progress;
            if span <= 0.0 {
                return b.value;
            }
            let t = (progress - a.trajectory_progress) / span;
            a.value + (b.value - a.value) * t
        })
        .collect()
}
