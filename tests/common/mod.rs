//! Shared fixtures for the end-to-end scenarios (spec §8): tiny POSIX shell
//! scripts standing in for child tool servers, driven over real stdio pipes
//! (no mocked process boundary), plus helpers to spawn a [`Registry`] over
//! them.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use toolbroker::registry::Registry;

/// A fixture child that always replies to `tools/call` with a fixed
/// `marker` string, regardless of arguments. Used where the test only
/// needs to tell "which child answered" apart (namespace isolation).
pub fn marker_tool_script(tool_name: &str, marker: &str) -> String {
    let action = format!(
        r#"reply="{marker}"; if [ -n "$id" ]; then printf "{{\"jsonrpc\":\"2.0\",\"id\":%s,\"result\":{{\"content\":[{{\"type\":\"text\",\"text\":\"%s\"}}]}}}}\n" "$id" "$reply"; fi"#
    );
    TEMPLATE.replace("__TOOL__", tool_name).replace("__CALL_ACTION__", &action)
}

/// A fixture child whose `tools/call` echoes back the `text` argument it
/// was given (spec §8 scenario 1: `echo(text)`).
pub fn echo_tool_script(tool_name: &str) -> String {
    let action = r#"text=$(printf "%s" "$line" | grep -o "\"text\":\"[^\"]*\"" | head -1 | cut -d: -f2 | tr -d "\""); if [ -n "$id" ]; then printf "{\"jsonrpc\":\"2.0\",\"id\":%s,\"result\":{\"content\":[{\"type\":\"text\",\"text\":\"%s\"}]}}\n" "$id" "$text"; fi"#;
    TEMPLATE.replace("__TOOL__", tool_name).replace("__CALL_ACTION__", action)
}

/// A fixture child that answers `initialize` and the `*/list` catalog
/// methods normally, but never replies to `tools/call` (spec §8 scenario 3).
pub fn slow_tool_script(tool_name: &str) -> String {
    TEMPLATE.replace("__TOOL__", tool_name).replace("__CALL_ACTION__", ":")
}

/// A fixture child that exits immediately, before ever reading a line (spec
/// §8 scenario 4).
pub fn crasher_script() -> &'static str {
    "exit 0"
}

/// A fixture child that handshakes and answers its first `tools/call`
/// normally, then exits — simulating an unexpected post-handshake crash for
/// the restart-on-crash supervisor (spec §9 supplemental).
pub fn die_after_one_call_script(tool_name: &str) -> String {
    let action = r#"printf "{\"jsonrpc\":\"2.0\",\"id\":%s,\"result\":{\"content\":[{\"type\":\"text\",\"text\":\"ok\"}]}}\n" "$id"; exit 0"#;
    TEMPLATE.replace("__TOOL__", tool_name).replace("__CALL_ACTION__", action)
}

/// A fixture child exposing one prompt, `greet`, whose cached template is
/// `"Hello {{name}}"` (spec §8 scenario 5).
pub fn prompt_fixture_script() -> String {
    PROMPT_TEMPLATE.to_string()
}

/// A fixture child whose `prompts/list` carries no template at all — the
/// only way to render its `greet` prompt is to forward `prompts/get` to
/// the child live (spec §4.4 "Routing").
pub fn prompt_forward_script() -> String {
    PROMPT_GET_TEMPLATE.to_string()
}

/// Spawn a registry over the given `(name, shell_command)` pairs. Each
/// command is wrapped in `sh -c '...'`, so the fixture scripts above must
/// not themselves contain a single quote.
pub async fn spawn_registry(children: &[(&str, &str)], handshake_timeout: Duration) -> Registry {
    let named: Vec<(String, String, Duration)> = children
        .iter()
        .map(|(name, script)| (name.to_string(), format!("sh -c '{script}'"), handshake_timeout))
        .collect();
    Registry::from_specs(named, CancellationToken::new()).await
}

/// Shared read-dispatch loop: parses `id`/`method` out of each JSON-RPC line
/// with `grep`/`cut` rather than a real JSON parser, since POSIX `sh` has
/// none — good enough for the fixed request shapes the broker itself sends.
const TEMPLATE: &str = r#"while IFS= read -r line; do
  id=$(printf "%s" "$line" | grep -o "\"id\":[0-9]*" | head -1 | cut -d: -f2)
  method=$(printf "%s" "$line" | grep -o "\"method\":\"[^\"]*\"" | head -1 | cut -d: -f2 | tr -d "\"")
  case "$method" in
    initialize)
      printf "{\"jsonrpc\":\"2.0\",\"id\":%s,\"result\":{\"protocolVersion\":\"2024-11-05\",\"capabilities\":{},\"serverInfo\":{\"name\":\"fixture\",\"version\":\"0.1\"}}}\n" "$id"
      ;;
    tools/list)
      printf "{\"jsonrpc\":\"2.0\",\"id\":%s,\"result\":{\"tools\":[{\"name\":\"__TOOL__\",\"description\":\"fixture tool\"}]}}\n" "$id"
      ;;
    resources/list)
      printf "{\"jsonrpc\":\"2.0\",\"id\":%s,\"result\":{\"resources\":[]}}\n" "$id"
      ;;
    prompts/list)
      printf "{\"jsonrpc\":\"2.0\",\"id\":%s,\"result\":{\"prompts\":[]}}\n" "$id"
      ;;
    tools/call)
      __CALL_ACTION__
      ;;
    *)
      if [ -n "$id" ]; then
        printf "{\"jsonrpc\":\"2.0\",\"id\":%s,\"error\":{\"code\":-32601,\"message\":\"method not found\"}}\n" "$id"
      fi
      ;;
  esac
done
"#;

/// Like `PROMPT_TEMPLATE`, but `prompts/list` omits `messages` entirely and
/// `prompts/get` is answered live with a distinct marker — so a test can
/// tell "rendered from the cached catalog" apart from "forwarded to the
/// child" (registry.rs's `get_prompt` only falls back to the cached
/// template when the child's `prompts/get` errors with method-not-found).
const PROMPT_GET_TEMPLATE: &str = r#"while IFS= read -r line; do
  id=$(printf "%s" "$line" | grep -o "\"id\":[0-9]*" | head -1 | cut -d: -f2)
  method=$(printf "%s" "$line" | grep -o "\"method\":\"[^\"]*\"" | head -1 | cut -d: -f2 | tr -d "\"")
  case "$method" in
    initialize)
      printf "{\"jsonrpc\":\"2.0\",\"id\":%s,\"result\":{\"protocolVersion\":\"2024-11-05\",\"capabilities\":{},\"serverInfo\":{\"name\":\"fixture\",\"version\":\"0.1\"}}}\n" "$id"
      ;;
    tools/list)
      printf "{\"jsonrpc\":\"2.0\",\"id\":%s,\"result\":{\"tools\":[]}}\n" "$id"
      ;;
    resources/list)
      printf "{\"jsonrpc\":\"2.0\",\"id\":%s,\"result\":{\"resources\":[]}}\n" "$id"
      ;;
    prompts/list)
      printf "{\"jsonrpc\":\"2.0\",\"id\":%s,\"result\":{\"prompts\":[{\"name\":\"greet\",\"description\":\"greets someone\"}]}}\n" "$id"
      ;;
    prompts/get)
      printf "{\"jsonrpc\":\"2.0\",\"id\":%s,\"result\":{\"text\":\"forwarded-live\"}}\n" "$id"
      ;;
    *)
      if [ -n "$id" ]; then
        printf "{\"jsonrpc\":\"2.0\",\"id\":%s,\"error\":{\"code\":-32601,\"message\":\"method not found\"}}\n" "$id"
      fi
      ;;
  esac
done
"#;

const PROMPT_TEMPLATE: &str = r#"while IFS= read -r line; do
  id=$(printf "%s" "$line" | grep -o "\"id\":[0-9]*" | head -1 | cut -d: -f2)
  method=$(printf "%s" "$line" | grep -o "\"method\":\"[^\"]*\"" | head -1 | cut -d: -f2 | tr -d "\"")
  case "$method" in
    initialize)
      printf "{\"jsonrpc\":\"2.0\",\"id\":%s,\"result\":{\"protocolVersion\":\"2024-11-05\",\"capabilities\":{},\"serverInfo\":{\"name\":\"fixture\",\"version\":\"0.1\"}}}\n" "$id"
      ;;
    tools/list)
      printf "{\"jsonrpc\":\"2.0\",\"id\":%s,\"result\":{\"tools\":[]}}\n" "$id"
      ;;
    resources/list)
      printf "{\"jsonrpc\":\"2.0\",\"id\":%s,\"result\":{\"resources\":[]}}\n" "$id"
      ;;
    prompts/list)
      printf "{\"jsonrpc\":\"2.0\",\"id\":%s,\"result\":{\"prompts\":[{\"name\":\"greet\",\"description\":\"greets someone\",\"messages\":\"Hello {{name}}\"}]}}\n" "$id"
      ;;
    *)
      if [ -n "$id" ]; then
        printf "{\"jsonrpc\":\"2.0\",\"id\":%s,\"error\":{\"code\":-32601,\"message\":\"method not found\"}}\n" "$id"
      fi
      ;;
  esac
done
"#;
