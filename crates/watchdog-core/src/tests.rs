#[cfg(test)]
mod status_transitions {
    use crate::model::DocumentStatus::*;

    #[test]
    fn forward_path_is_legal() {
        assert!(New.can_transition_to(Fetched));
        assert!(Fetched.can_transition_to(Extracted));
        assert!(Extracted.can_transition_to(Processed));
    }

    #[test]
    fn error_reachable_from_non_terminal_states() {
        assert!(New.can_transition_to(Error));
        assert!(Fetched.can_transition_to(Error));
        assert!(Extracted.can_transition_to(Error));
    }

    #[test]
    fn reobservation_resets_to_new() {
        assert!(Fetched.can_transition_to(New));
        assert!(Extracted.can_transition_to(New));
        assert!(Processed.can_transition_to(New));
    }

    #[test]
    fn processed_never_transitions_directly_to_error() {
        assert!(!Processed.can_transition_to(Error));
    }

    #[test]
    fn skipping_stages_is_illegal() {
        assert!(!New.can_transition_to(Extracted));
        assert!(!New.can_transition_to(Processed));
        assert!(!Fetched.can_transition_to(Processed));
    }

    #[test]
    fn error_is_terminal_for_forward_progress() {
        assert!(!Error.can_transition_to(Fetched));
        assert!(!Error.can_transition_to(Extracted));
        assert!(!Error.can_transition_to(Processed));
    }
}

#[cfg(test)]
mod error_retryability {
    use crate::error::{Error, Retryability};

    #[test]
    fn transport_and_5xx_are_transient() {
        assert_eq!(Error::Transport("x".into()).retryability(), Retryability::Transient);
        assert_eq!(Error::Status5xx(503).retryability(), Retryability::Transient);
        assert_eq!(Error::Timeout.retryability(), Retryability::Transient);
    }

    #[test]
    fn rate_limit_429_is_transient_but_other_4xx_is_permanent() {
        assert_eq!(Error::Status4xx(429).retryability(), Retryability::Transient);
        assert_eq!(Error::Status4xx(404).retryability(), Retryability::Permanent);
    }

    #[test]
    fn blocked_url_and_content_mismatch_are_permanent() {
        assert_eq!(Error::BlockedUrl("x".into()).retryability(), Retryability::Permanent);
        assert_eq!(
            Error::ContentMismatch {
                expected: "application/pdf".into(),
                actual: "text/html".into()
            }
            .retryability(),
            Retryability::Permanent
        );
    }

    #[test]
    fn store_unavailable_is_fatal() {
        assert_eq!(Error::Store("disk full".into()).retryability(), Retryability::Fatal);
    }
}
