use faultline_entities::types::IssueStatus;

/// What an incoming event did to its issue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OccurrenceOutcome {
    /// First event for this fingerprint in the project
    NewIssue,
    /// The issue was resolved and is now unresolved again
    Regression,
    /// Any other update of an existing issue
    Recurrence,
}

impl OccurrenceOutcome {
    pub fn is_notification_worthy(&self) -> bool {
        matches!(self, OccurrenceOutcome::NewIssue | OccurrenceOutcome::Regression)
    }

    pub fn is_new(&self) -> bool {
        matches!(self, OccurrenceOutcome::NewIssue)
    }

    pub fn was_reactivated(&self) -> bool {
        matches!(self, OccurrenceOutcome::Regression)
    }

    /// Whether the stored issue must be flipped back to `unresolved`
    pub fn reopens(&self) -> bool {
        self.was_reactivated()
    }
}

/// Decide the outcome of an event given the current status of the issue for
/// its fingerprint, or `None` when no issue exists yet.
///
/// Ignored issues stay ignored: only `resolved` regresses.
pub fn classify_occurrence(existing: Option<IssueStatus>) -> OccurrenceOutcome {
    match existing {
        None => OccurrenceOutcome::NewIssue,
        Some(IssueStatus::Resolved) => OccurrenceOutcome::Regression,
        Some(IssueStatus::Unresolved) | Some(IssueStatus::Ignored) => OccurrenceOutcome::Recurrence,
    }
}

pub fn is_regression(from: IssueStatus, to: IssueStatus) -> bool {
    from == IssueStatus::Resolved && to == IssueStatus::Unresolved
}

/// Every status may move to every other status; a no-op change is rejected
/// so that each resolution row records a real transition.
pub fn validate_status_change(from: IssueStatus, to: IssueStatus) -> Result<(), IssueStatus> {
    if from == to {
        Err(to)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::Iterable;

    #[test]
    fn test_classify_occurrence() {
        assert_eq!(classify_occurrence(None), OccurrenceOutcome::NewIssue);
        assert_eq!(
            classify_occurrence(Some(IssueStatus::Resolved)),
            OccurrenceOutcome::Regression
        );
        assert_eq!(
            classify_occurrence(Some(IssueStatus::Unresolved)),
            OccurrenceOutcome::Recurrence
        );
        assert_eq!(
            classify_occurrence(Some(IssueStatus::Ignored)),
            OccurrenceOutcome::Recurrence
        );
    }

    #[test]
    fn test_only_new_and_regression_notify() {
        assert!(OccurrenceOutcome::NewIssue.is_notification_worthy());
        assert!(OccurrenceOutcome::Regression.is_notification_worthy());
        assert!(!OccurrenceOutcome::Recurrence.is_notification_worthy());

        assert!(OccurrenceOutcome::NewIssue.is_new());
        assert!(!OccurrenceOutcome::NewIssue.was_reactivated());
        assert!(OccurrenceOutcome::Regression.was_reactivated());
        assert!(OccurrenceOutcome::Regression.reopens());
        assert!(!OccurrenceOutcome::Recurrence.reopens());
    }

    #[test]
    fn test_regression_is_resolved_to_unresolved_only() {
        for from in IssueStatus::iter() {
            for to in IssueStatus::iter() {
                let expected = from == IssueStatus::Resolved && to == IssueStatus::Unresolved;
                assert_eq!(is_regression(from, to), expected, "{from} -> {to}");
            }
        }
    }

    #[test]
    fn test_validate_status_change() {
        for from in IssueStatus::iter() {
            for to in IssueStatus::iter() {
                assert_eq!(validate_status_change(from, to).is_ok(), from != to);
            }
        }
    }
}
