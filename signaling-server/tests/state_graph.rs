use std::sync::Arc;

use peer_calls_protocol::{CallStatus, CallType, UserId};
use peer_calls_server::{CallError, LifecycleManager, MemoryCallStore, PubSub, StaticMembership};
use proptest::prelude::*;

#[derive(Debug, Clone, Copy)]
enum Op {
    Answer(bool),
    Decline(bool),
    Missed,
    End(bool),
    Fail(bool),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        any::<bool>().prop_map(Op::Answer),
        any::<bool>().prop_map(Op::Decline),
        Just(Op::Missed),
        any::<bool>().prop_map(Op::End),
        any::<bool>().prop_map(Op::Fail),
    ]
}

async fn run(ops: Vec<Op>) -> Vec<(CallStatus, CallStatus, bool)> {
    let membership = StaticMembership::new();
    membership
        .add_conversation("conv".into(), ["alice".into(), "bob".into()])
        .await;
    let manager = LifecycleManager::new(
        Arc::new(MemoryCallStore::new()),
        Arc::new(membership),
        PubSub::new(),
    );
    let alice = UserId::from("alice");
    let bob = UserId::from("bob");
    let who = |by_initiator: bool| if by_initiator { &alice } else { &bob };

    let call = manager
        .initiate(&alice, &"conv".into(), CallType::Video)
        .await
        .unwrap();
    let mut history = Vec::new();
    let mut before = call.status;
    for op in ops {
        let result = match op {
            Op::Answer(i) => manager.answer(who(i), &call.id).await,
            Op::Decline(i) => manager.decline(who(i), &call.id).await,
            Op::Missed => manager.missed(&call.id).await,
            Op::End(i) => manager.end(who(i), &call.id).await,
            Op::Fail(i) => manager.fail(who(i), &call.id, "ice failure").await,
        };
        if let Err(err) = &result {
            assert!(
                matches!(err, CallError::Conflict { .. } | CallError::Forbidden(_)),
                "unexpected error {err}"
            );
        }
        let after = manager.get_call(&alice, &call.id).await.unwrap().status;
        history.push((before, after, result.is_ok()));
        before = after;
    }
    history
}

proptest! {
    #[test]
    fn random_operations_stay_on_the_call_graph(ops in prop::collection::vec(op(), 1..12)) {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let history = runtime.block_on(run(ops));
        for (before, after, applied) in history {
            if applied {
                prop_assert!(before.can_transition_to(after), "{before} -> {after}");
            } else {
                prop_assert_eq!(before, after);
            }
            if before.is_terminal() {
                prop_assert_eq!(before, after);
            }
        }
    }
}
