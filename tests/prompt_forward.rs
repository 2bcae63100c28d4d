//! Spec §4.4 "Routing": a prompt whose cached catalog carries no `messages`
//! template can still be rendered, by forwarding `prompts/get` live to the
//! child (registry.rs's cached-template fallback only kicks in when the
//! child's `prompts/get` errors with method-not-found).

mod common;

use std::collections::HashMap;
use std::time::Duration;

use toolbroker::transport::render_prompt;

#[tokio::test]
async fn prompt_get_forwards_live_when_the_child_implements_it() {
    let script = common::prompt_forward_script();
    let registry = common::spawn_registry(&[("server1", &script)], Duration::from_secs(5)).await;

    let text = render_prompt(&registry, "server1", "greet", &HashMap::new(), Duration::from_secs(2))
        .await
        .expect("prompts/get should be forwarded to the child");
    assert_eq!(text, "forwarded-live");
}
