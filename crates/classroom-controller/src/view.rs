//! Screen router for the presenter and viewer clients.
//!
//! The set of screens is closed and every move between them is checked
//! against an explicit edge list. The room actor drives the presenter's
//! view through Setup, Live and Report as the room changes state.

use crate::errors::CcError;
use common::types::RoomCode;
use serde::Serialize;

/// The screen a client is on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "view", rename_all = "snake_case")]
pub enum View {
    Landing,
    PresenterSetup,
    PresenterLive { code: RoomCode },
    PresenterReport { code: RoomCode },
    ViewerLogin,
    ViewerLive { code: RoomCode, identity: String },
}

impl View {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            View::Landing => "landing",
            View::PresenterSetup => "presenter_setup",
            View::PresenterLive { .. } => "presenter_live",
            View::PresenterReport { .. } => "presenter_report",
            View::ViewerLogin => "viewer_login",
            View::ViewerLive { .. } => "viewer_live",
        }
    }

    /// Whether `next` is reachable from `self` in one step.
    #[must_use]
    pub fn allows(&self, next: &View) -> bool {
        match (self, next) {
            (View::Landing, View::PresenterSetup | View::ViewerLogin)
            | (
                View::PresenterSetup | View::PresenterReport { .. } | View::ViewerLive { .. },
                View::Landing,
            )
            | (View::PresenterSetup, View::PresenterLive { .. } | View::PresenterReport { .. })
            | (View::PresenterReport { .. }, View::PresenterSetup)
            | (View::ViewerLogin, View::ViewerLive { .. } | View::Landing) => true,
            // The report belongs to the session that just ran.
            (View::PresenterLive { code }, View::PresenterReport { code: next_code }) => {
                code == next_code
            }
            _ => false,
        }
    }

    /// Move to `next`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` if the edge is not allowed.
    pub fn transition(&self, next: View) -> Result<View, CcError> {
        if self.allows(&next) {
            Ok(next)
        } else {
            Err(CcError::InvalidTransition(format!(
                "cannot move from {} to {}",
                self.name(),
                next.name()
            )))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn code(s: &str) -> RoomCode {
        s.parse().unwrap()
    }

    #[test]
    fn test_presenter_flow() {
        let view = View::Landing
            .transition(View::PresenterSetup)
            .unwrap()
            .transition(View::PresenterLive { code: code("K3ZQ9A") })
            .unwrap()
            .transition(View::PresenterReport { code: code("K3ZQ9A") })
            .unwrap();
        assert_eq!(view.transition(View::Landing).unwrap(), View::Landing);
    }

    #[test]
    fn test_viewer_flow() {
        let live = View::ViewerLive {
            code: code("K3ZQ9A"),
            identity: "Priya".to_string(),
        };
        let view = View::Landing
            .transition(View::ViewerLogin)
            .unwrap()
            .transition(live)
            .unwrap();
        assert_eq!(view.transition(View::Landing).unwrap(), View::Landing);
    }

    #[test]
    fn test_rejected_edges() {
        assert!(matches!(
            View::Landing.transition(View::PresenterLive { code: code("K3ZQ9A") }),
            Err(CcError::InvalidTransition(_))
        ));
        assert!(!View::PresenterLive { code: code("K3ZQ9A") }.allows(&View::PresenterSetup));
        assert!(!View::ViewerLogin.allows(&View::PresenterSetup));
        // Live -> Live is not a step.
        assert!(!View::PresenterSetup.allows(&View::PresenterSetup));
    }

    #[test]
    fn test_room_ended_from_setup_goes_to_report() {
        let view = View::PresenterSetup
            .transition(View::PresenterReport { code: code("K3ZQ9A") })
            .unwrap();
        assert_eq!(view.name(), "presenter_report");
        assert!(!View::ViewerLogin.allows(&view));
    }

    #[test]
    fn test_report_must_match_live_room() {
        let live = View::PresenterLive { code: code("K3ZQ9A") };
        assert!(!live.allows(&View::PresenterReport { code: code("ABC123") }));
    }

    #[test]
    fn test_serializes_with_view_tag() {
        let value = serde_json::to_value(View::PresenterLive { code: code("K3ZQ9A") }).unwrap();
        assert_eq!(value["view"], "presenter_live");
        assert_eq!(value["code"], "K3ZQ9A");
    }
}
