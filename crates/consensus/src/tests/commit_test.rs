use borsh::BorshDeserialize;

use super::*;
use crate::error::ConsensusError;
use crate::machine::{State, ROUND_STATE_KEY};
use crate::round::RoundState;
use crate::types::{Request, View};

fn round_subject() -> Subject {
    Subject::new(View::new(0, 1), vec![1])
}

fn prepared_core(system: &mut [Core<TestBackend>], index: usize) -> &mut Core<TestBackend> {
    let core = &mut system[index];
    seed_round(core, &round_subject());
    core.state = State::Prepared;
    core
}

#[test]
fn test_commit_quorum_finalizes_once() {
    let mut system = new_test_system(4, 1);
    let core = prepared_core(&mut system, 0);

    for i in 0..3 {
        core.handle_commit(&round_subject(), &validator(i)).unwrap();
    }

    let committed = core.backend().committed();
    assert_eq!(committed.len(), 1);
    assert_eq!(committed[0].number, 1);
    assert_eq!(committed[0].digest, vec![1]);

    assert_eq!(core.state(), State::AcceptRequest);
    assert!(core.snapshot().is_none());
    assert_eq!(core.round_state().last_committed, 1);
    assert_eq!(core.next_round(), View::new(0, 2));
    assert_eq!(core.last_committed(), Some(&committed[0]));

    // A late fourth vote is valid but delivers nothing
    core.handle_commit(&round_subject(), &validator(3)).unwrap();
    assert_eq!(core.backend().committed().len(), 1);
    assert!(core.backend().sent_messages().is_empty());
}

#[test]
fn test_commit_posts_events_and_persists_round() {
    let mut system = new_test_system(4, 1);
    let core = prepared_core(&mut system, 2);
    for i in 0..3 {
        core.handle_commit(&round_subject(), &validator(i)).unwrap();
    }

    assert_eq!(
        core.backend().events(),
        vec![
            ConsensusEvent::FinalCommitted {
                sequence: 1,
                digest: vec![1]
            },
            ConsensusEvent::RoundStarted {
                view: View::new(0, 2)
            },
        ]
    );

    let stored = core.backend().stored(ROUND_STATE_KEY).unwrap();
    assert_eq!(
        RoundState::try_from_slice(&stored).unwrap(),
        RoundState {
            view_number: 0,
            last_committed: 1
        }
    );
}

#[test]
fn test_commit_below_quorum_waits() {
    let mut system = new_test_system(4, 1);
    let core = prepared_core(&mut system, 0);
    core.handle_commit(&round_subject(), &validator(1)).unwrap();
    core.handle_commit(&round_subject(), &validator(1)).unwrap();
    core.handle_commit(&round_subject(), &validator(2)).unwrap();

    assert_eq!(core.snapshot().unwrap().commits.size(), 2);
    assert_eq!(core.state(), State::Prepared);
    assert!(core.backend().committed().is_empty());
}

#[test]
fn test_commit_quorum_before_prepared_does_not_finalize() {
    let mut system = new_test_system(4, 1);
    let core = &mut system[0];
    seed_round(core, &round_subject());
    core.state = State::Preprepared;

    for i in 0..4 {
        core.handle_commit(&round_subject(), &validator(i)).unwrap();
    }
    assert_eq!(core.state(), State::Preprepared);
    assert!(core.backend().committed().is_empty());
}

#[test]
fn test_commit_validation_mirrors_prepare() {
    let mut system = new_test_system(4, 1);
    let core = prepared_core(&mut system, 0);

    assert_eq!(
        core.handle_commit(&Subject::new(View::new(0, 2), vec![1]), &validator(1)),
        Err(ConsensusError::FutureMessage)
    );
    assert_eq!(
        core.handle_commit(&Subject::new(View::new(0, 0), vec![1]), &validator(1)),
        Err(ConsensusError::OldMessage)
    );
    assert_eq!(
        core.handle_commit(&Subject::new(View::new(0, 1), vec![9]), &validator(1)),
        Err(ConsensusError::SubjectNotMatched)
    );
    assert!(core.snapshot().unwrap().commits.is_empty());
}

#[test]
fn test_failed_commit_is_retried_by_next_vote() {
    let mut system = new_test_system(4, 1);
    let core = prepared_core(&mut system, 0);
    core.backend().set_fail_commit(true);

    core.handle_commit(&round_subject(), &validator(0)).unwrap();
    core.handle_commit(&round_subject(), &validator(1)).unwrap();
    let err = core
        .handle_commit(&round_subject(), &validator(2))
        .unwrap_err();
    assert!(matches!(err, ConsensusError::Backend(BackendError::Commit(_))));
    assert_eq!(core.state(), State::Prepared);

    core.backend().set_fail_commit(false);
    core.handle_commit(&round_subject(), &validator(3)).unwrap();
    assert_eq!(core.backend().committed().len(), 1);
    assert_eq!(core.state(), State::AcceptRequest);
}

#[test]
fn test_full_round_across_four_validators() {
    let mut system = new_test_system(4, 1);

    for sequence in 1..=3u64 {
        let request = Request::new(format!("request-{}", sequence).into_bytes());
        assert!(system[0].send_preprepare(&request));
        run_until_quiet(&mut system);

        for core in &system {
            let committed = core.backend().committed();
            assert_eq!(committed.len() as u64, sequence);
            assert_eq!(committed.last().unwrap().payload, request.payload);
            assert_eq!(core.state(), State::AcceptRequest);
            assert_eq!(core.next_round(), View::new(0, sequence + 1));
        }
    }

    // Everyone agreed on the same digests in the same order
    let reference = system[0].backend().committed();
    for core in &system[1..] {
        assert_eq!(core.backend().committed(), reference);
    }
}

#[test]
fn test_round_commits_with_one_silent_validator() {
    let mut system = new_test_system(4, 1);
    // Validator 3 never receives or sends anything
    let mut live: Vec<Core<TestBackend>> = system.drain(..3).collect();

    assert!(live[0].send_preprepare(&Request::new(b"tx".to_vec())));
    run_until_quiet(&mut live);

    for core in &live {
        assert_eq!(core.backend().committed().len(), 1);
    }
}

#[test]
fn test_round_stalls_with_two_silent_validators() {
    let mut system = new_test_system(4, 1);
    let mut live: Vec<Core<TestBackend>> = system.drain(..2).collect();

    assert!(live[0].send_preprepare(&Request::new(b"tx".to_vec())));
    run_until_quiet(&mut live);

    for core in &live {
        assert_eq!(core.state(), State::Preprepared);
        assert!(core.backend().committed().is_empty());
        assert_eq!(core.snapshot().unwrap().prepares.size(), 2);
    }
}

#[test]
fn test_restore_round_state() {
    let validators = test_validator_set(4);
    let saved = borsh::to_vec(&RoundState {
        view_number: 2,
        last_committed: 5,
    })
    .unwrap();
    let backend =
        TestBackend::new(test_address(1), validators.clone()).with_stored(ROUND_STATE_KEY, saved);
    let core = Core::new(backend).unwrap();
    assert_eq!(core.next_round(), View::new(2, 6));
    assert_eq!(core.subject().view, View::new(2, 5));

    let corrupt =
        TestBackend::new(test_address(1), validators).with_stored(ROUND_STATE_KEY, vec![1]);
    assert!(matches!(
        Core::new(corrupt),
        Err(ConsensusError::Persistence(_))
    ));
}
