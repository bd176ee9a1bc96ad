use serde::{Deserialize, Serialize};

/// Capture mode of the pipeline. The integer values are part of the wire
/// protocol and must stay in sync with the front end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum Mode {
    Initializing,
    CamerasNotFound,
    CamerasFound,
    SaveImage,
    ImageProcessing,
    PointCapture,
    Triangulation,
    ObjectDetection,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ModeError {
    #[error("unknown mode {0}")]
    UnknownMode(i32),
    #[error("cannot change mode from \"{from}\" to \"{to}\"")]
    InvalidTransition { from: Mode, to: Mode },
}

impl From<Mode> for i32 {
    fn from(mode: Mode) -> i32 {
        match mode {
            Mode::Initializing => -1,
            Mode::CamerasNotFound => 0,
            Mode::CamerasFound => 1,
            Mode::SaveImage => 2,
            Mode::ImageProcessing => 3,
            Mode::PointCapture => 4,
            Mode::Triangulation => 5,
            Mode::ObjectDetection => 6,
        }
    }
}

impl TryFrom<i32> for Mode {
    type Error = ModeError;

    fn try_from(value: i32) -> Result<Self, ModeError> {
        use Mode::*;
        Ok(match value {
            -1 => Initializing,
            0 => CamerasNotFound,
            1 => CamerasFound,
            2 => SaveImage,
            3 => ImageProcessing,
            4 => PointCapture,
            5 => Triangulation,
            6 => ObjectDetection,
            other => return Err(ModeError::UnknownMode(other)),
        })
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Mode::Initializing => "Initializing",
            Mode::CamerasNotFound => "Cameras not found",
            Mode::CamerasFound => "Cameras found",
            Mode::SaveImage => "Save image",
            Mode::ImageProcessing => "Processing images",
            Mode::PointCapture => "Capturing points",
            Mode::Triangulation => "Triangulating",
            Mode::ObjectDetection => "Detecting objects",
        };
        write!(f, "{}", name)
    }
}

impl Mode {
    /// Modes from which a transition into `self` is allowed.
    ///
    /// `Initializing` and `CamerasNotFound` are entered only internally (at
    /// startup and on device failure) and are never valid targets of a
    /// requested transition.
    pub fn allowed_from(self) -> &'static [Mode] {
        use Mode::*;
        match self {
            SaveImage => &[CamerasFound],
            CamerasFound => &[ImageProcessing, SaveImage],
            ImageProcessing => &[CamerasFound, PointCapture],
            PointCapture => &[ImageProcessing, Triangulation],
            Triangulation => &[PointCapture, ObjectDetection],
            ObjectDetection => &[Triangulation],
            Initializing | CamerasNotFound => &[],
        }
    }

    /// Validate a requested transition from `self` into `target`.
    pub fn transition(self, target: Mode) -> Result<Mode, ModeError> {
        if target.allowed_from().contains(&self) {
            Ok(target)
        } else {
            Err(ModeError::InvalidTransition {
                from: self,
                to: target,
            })
        }
    }

    /// Whether the per-frame stage for `stage` runs in this mode.
    ///
    /// Each mode enables all earlier-numbered processing stages.
    #[inline]
    pub fn enables(self, stage: Mode) -> bool {
        i32::from(self) >= i32::from(stage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_table() {
        assert_eq!(
            Mode::CamerasFound.transition(Mode::SaveImage),
            Ok(Mode::SaveImage)
        );
        assert_eq!(
            Mode::PointCapture.transition(Mode::Triangulation),
            Ok(Mode::Triangulation)
        );
        assert_eq!(
            Mode::ObjectDetection.transition(Mode::Triangulation),
            Ok(Mode::Triangulation)
        );
        // skipping a stage is rejected
        assert!(Mode::CamerasFound
            .transition(Mode::Triangulation)
            .is_err());
        assert!(Mode::ImageProcessing
            .transition(Mode::ObjectDetection)
            .is_err());
        // nothing may enter Initializing
        assert!(Mode::CamerasFound.transition(Mode::Initializing).is_err());
    }

    #[test]
    fn wire_roundtrip() {
        for i in -1..=6 {
            let mode = Mode::try_from(i).unwrap();
            assert_eq!(i32::from(mode), i);
            let json = serde_json::to_string(&mode).unwrap();
            assert_eq!(json, i.to_string());
            assert_eq!(serde_json::from_str::<Mode>(&json).unwrap(), mode);
        }
        assert!(Mode::try_from(7).is_err());
    }

    #[test]
    fn stage_gating() {
        assert!(Mode::ObjectDetection.enables(Mode::Triangulation));
        assert!(Mode::Triangulation.enables(Mode::PointCapture));
        assert!(!Mode::PointCapture.enables(Mode::Triangulation));
    }
}
