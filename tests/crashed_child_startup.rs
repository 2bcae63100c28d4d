//! Spec §8 end-to-end scenario 4: a child that exits right after spawn does
//! not block broker startup. It's still listed (terminated) so `/status`
//! can report it, but contributes nothing to the tool catalog.

mod common;

use std::time::Duration;

use toolbroker::child::ChildState;

#[tokio::test]
async fn crashed_child_is_terminated_but_does_not_block_startup() {
    let fast = common::marker_tool_script("ping", "pong");
    let registry = common::spawn_registry(
        &[("crasher", common::crasher_script()), ("fast", &fast)],
        Duration::from_secs(5),
    )
    .await;

    assert!(!registry.all_failed().await, "one live child means startup did not fully fail");

    let crasher = registry.get("crasher").await.expect("crasher is still registered");
    assert_eq!(crasher.state(), ChildState::Terminated);

    let tools = registry.list_all_tools().await;
    assert!(tools.iter().all(|(server, _)| server != "crasher"));
    assert!(tools.iter().any(|(server, _)| server == "fast"));
}

#[tokio::test]
async fn every_child_crashing_is_reported_as_total_failure() {
    let registry = common::spawn_registry(&[("crasher", common::crasher_script())], Duration::from_secs(5)).await;
    assert!(registry.all_failed().await);
}
