use std::fmt;

use crate::ErrorKind;

/// State of a pull operation.
///
/// Every state except [`Failed`](PullState::Failed) has an action. When
/// the action finishes, [`PullState::next`] gives the following state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PullState {
    Start,

    /// Get the manifest from the registry.
    ResolvingManifest,

    /// Check the image with the trust policy.
    PolicyCheck,

    /// Download the layers, and write them to the store in order.
    FetchingLayers,

    /// Attach the filesystem to its base layer, if the platform needs it.
    ReconcilingBase,

    /// Store the signatures of the image.
    RecordingSignatures,

    /// Make the image visible in the store.
    Done,

    Failed(ErrorKind),
}

impl PullState {
    /// State after the action of this state finishes with `outcome`.
    ///
    /// Failures move to [`PullState::Failed`], except in
    /// [`RecordingSignatures`](PullState::RecordingSignatures), where
    /// only a cancellation can stop the pull. Once the action of
    /// [`Done`](PullState::Done) succeeds, the state does not change.
    pub fn next(self, outcome: Result<(), ErrorKind>) -> PullState {
        use PullState::*;

        match (self, outcome) {
            (Failed(kind), _) => Failed(kind),

            (RecordingSignatures, Err(ErrorKind::Cancelled)) => Failed(ErrorKind::Cancelled),
            (RecordingSignatures, _) => Done,

            (_, Err(kind)) => Failed(kind),

            (Start, Ok(())) => ResolvingManifest,
            (ResolvingManifest, Ok(())) => PolicyCheck,
            (PolicyCheck, Ok(())) => FetchingLayers,
            (FetchingLayers, Ok(())) => ReconcilingBase,
            (ReconcilingBase, Ok(())) => RecordingSignatures,
            (Done, Ok(())) => Done,
        }
    }
}

impl fmt::Display for PullState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PullState::Start => f.write_str("start"),
            PullState::ResolvingManifest => f.write_str("resolving manifest"),
            PullState::PolicyCheck => f.write_str("policy check"),
            PullState::FetchingLayers => f.write_str("fetching layers"),
            PullState::ReconcilingBase => f.write_str("reconciling base layer"),
            PullState::RecordingSignatures => f.write_str("recording signatures"),
            PullState::Done => f.write_str("done"),
            PullState::Failed(kind) => write!(f, "failed ({kind:?})"),
        }
    }
}

#[test]
fn transitions_without_failures() {
    let mut state = PullState::Start;
    let mut visited = vec![state];

    while state != PullState::Done {
        state = state.next(Ok(()));
        visited.push(state);
    }

    assert_eq!(
        visited,
        [
            PullState::Start,
            PullState::ResolvingManifest,
            PullState::PolicyCheck,
            PullState::FetchingLayers,
            PullState::ReconcilingBase,
            PullState::RecordingSignatures,
            PullState::Done,
        ]
    );

    assert_eq!(state.next(Ok(())), PullState::Done);
}

#[test]
fn failures_are_terminal() {
    let failed = PullState::PolicyCheck.next(Err(ErrorKind::PolicyDenied));
    assert_eq!(failed, PullState::Failed(ErrorKind::PolicyDenied));
    assert_eq!(failed.next(Ok(())), failed);

    assert_eq!(
        PullState::Done.next(Err(ErrorKind::Store)),
        PullState::Failed(ErrorKind::Store)
    );

    assert_eq!(
        PullState::FetchingLayers.next(Err(ErrorKind::Cancelled)),
        PullState::Failed(ErrorKind::Cancelled)
    );
}

#[test]
fn signature_failures_are_not_fatal() {
    assert_eq!(
        PullState::RecordingSignatures.next(Err(ErrorKind::StoreUnavailable)),
        PullState::Done
    );

    assert_eq!(
        PullState::RecordingSignatures.next(Err(ErrorKind::Transfer)),
        PullState::Done
    );

    assert_eq!(
        PullState::RecordingSignatures.next(Err(ErrorKind::Cancelled)),
        PullState::Failed(ErrorKind::Cancelled)
    );
}
