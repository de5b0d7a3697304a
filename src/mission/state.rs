use serde::{Deserialize, Serialize};

/// Lifecycle state of a mission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissionState {
    Pending,
    Planning,
    Researching,
    Analyzing,
    Scoring,
    Correcting,
    Exporting,
    Paused,
    Completed,
    Failed,
}

impl MissionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MissionState::Pending => "pending",
            MissionState::Planning => "planning",
            MissionState::Researching => "researching",
            MissionState::Analyzing => "analyzing",
            MissionState::Scoring => "scoring",
            MissionState::Correcting => "correcting",
            MissionState::Exporting => "exporting",
            MissionState::Paused => "paused",
            MissionState::Completed => "completed",
            MissionState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, MissionState::Completed | MissionState::Failed)
    }

    /// Whether `self -> to` is an edge of the lifecycle graph.
    ///
    /// `paused_from` is the state a paused mission resumes into;
    /// `in_correction` opens the `researching -> scoring` shortcut used by
    /// the self-correction loop.
    pub fn can_transition_to(
        &self,
        to: MissionState,
        paused_from: Option<MissionState>,
        in_correction: bool,
    ) -> bool {
        use MissionState::*;

        if self.is_terminal() {
            return false;
        }
        if to == Failed {
            return true;
        }
        if to == Paused {
            return *self != Paused;
        }

        match (*self, to) {
            (Paused, target) => paused_from == Some(target),
            (Pending, Planning) => true,
            (Planning, Researching) => true,
            (Researching, Researching | Analyzing) => true,
            (Researching, Scoring) => in_correction,
            (Analyzing, Analyzing | Scoring) => true,
            (Scoring, Correcting | Exporting) => true,
            (Correcting, Researching | Scoring | Exporting) => true,
            (Exporting, Completed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for MissionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
