//! Spec §8 end-to-end scenario 2: two children both offer a tool named `a`;
//! the namespaced registry keeps them addressable separately and a call
//! reaches only the targeted child.

mod common;

use std::time::Duration;

use toolbroker::transport::{invoke_tool, DEFAULT_CALL_DEADLINE};

#[tokio::test]
async fn same_tool_name_on_two_servers_stays_namespaced() {
    let server1 = common::marker_tool_script("a", "server1-a");
    let server2 = common::marker_tool_script("a", "server2-a");
    let registry =
        common::spawn_registry(&[("server1", &server1), ("server2", &server2)], Duration::from_secs(5)).await;

    let tools = registry.list_all_tools().await;
    assert_eq!(tools.len(), 2);
    assert!(tools.iter().any(|(server, tool)| server == "server1" && tool.name == "a"));
    assert!(tools.iter().any(|(server, tool)| server == "server2" && tool.name == "a"));

    let result = invoke_tool(&registry, "server2", "a", serde_json::json!({"x": 1}), DEFAULT_CALL_DEADLINE)
        .await
        .expect("call to server2 should succeed");
    assert_eq!(result, "server2-a");
}
