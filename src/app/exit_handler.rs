//! Exit code logic for the downloader process.
//!
//! Single responsibility: map a run's outcome to the process exit code.

use crate::ProcessExit;

/// Determines the process exit outcome from succeeded and failed page counts.
///
/// A run that found nothing to download is a failure: the work name or URL
/// almost certainly did not match anything.
pub(crate) fn determine_exit_outcome(succeeded: usize, failed: usize) -> ProcessExit {
    if failed == 0 && succeeded > 0 {
        ProcessExit::Success
    } else if succeeded > 0 {
        ProcessExit::Partial
    } else {
        ProcessExit::Failure
    }
}

#[cfg(test)]
mod tests {
    use super::determine_exit_outcome;
    use crate::ProcessExit;

    #[test]
    fn test_exit_outcome_success_when_no_failures() {
        assert_eq!(determine_exit_outcome(3, 0), ProcessExit::Success);
    }

    #[test]
    fn test_exit_outcome_failure_when_nothing_found() {
        assert_eq!(determine_exit_outcome(0, 0), ProcessExit::Failure);
    }

    #[test]
    fn test_exit_outcome_partial_when_mixed() {
        assert_eq!(determine_exit_outcome(2, 1), ProcessExit::Partial);
    }

    #[test]
    fn test_exit_outcome_failure_when_all_failed() {
        assert_eq!(determine_exit_outcome(0, 2), ProcessExit::Failure);
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(ProcessExit::Success.code(), 0);
        assert_eq!(ProcessExit::Failure.code(), 1);
        assert_eq!(ProcessExit::Partial.code(), 2);
    }
}
