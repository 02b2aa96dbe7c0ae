//! Connectivity probe for an MCP server.
//!
//! Runs each step independently and prints a pass/fail line, so a broken
//! event stream does not hide a working RPC endpoint. Only an unreachable
//! base URL fails the command.

use std::time::Duration;

use futures::StreamExt;
use serde_json::{json, Value};

use trainmcp_agent::normalize_tool_result;
use trainmcp_mcp::codec::decode_reply;
use trainmcp_mcp::protocol::{
    CallToolParams, JsonRpcRequest, ListToolsResult, METHOD_TOOLS_CALL, METHOD_TOOLS_LIST,
};
use trainmcp_mcp::{HttpTransport, HttpTransportConfig, Transport};

use crate::AppContext;

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Bytes of the event stream shown.
const STREAM_PREVIEW_BYTES: usize = 200;

/// Characters of a tool result shown.
const RESULT_PREVIEW_CHARS: usize = 500;

pub async fn run(url: &str, tool: &str, ctx: &AppContext) -> anyhow::Result<()> {
    let base = url.trim_end_matches('/');
    println!("Probing MCP server at {}\n", base);

    // 1. base URL
    let client = reqwest::Client::builder()
        .timeout(PROBE_TIMEOUT)
        .no_proxy()
        .build()?;
    match client.get(base).send().await {
        Ok(response) => pass(&format!("Server reachable (HTTP {})", response.status())),
        Err(e) => {
            fail(&format!("Server unreachable: {}", e));
            anyhow::bail!("MCP server at {} is unreachable", base);
        }
    }

    let transport = HttpTransport::new(
        HttpTransportConfig::default().with_verify_ssl(ctx.config.network.verify_ssl),
    );
    transport.open().await?;

    // 2. event stream
    probe_stream(&transport, &format!("{}/sse", base)).await;

    // 3. tools/list
    let endpoint = format!("{}/mcp", base);
    let list = JsonRpcRequest::new(1, METHOD_TOOLS_LIST, json!({}));
    match rpc(&transport, &endpoint, serde_json::to_string(&list)?).await {
        Ok(result) => match serde_json::from_value::<ListToolsResult>(result) {
            Ok(list) => {
                pass(&format!("tools/list returned {} tools", list.tools.len()));
                for descriptor in &list.tools {
                    println!("    - {}", descriptor.name.as_deref().unwrap_or("unknown_tool"));
                }
            }
            Err(e) => fail(&format!("tools/list result not understood: {}", e)),
        },
        Err(e) => fail(&format!("tools/list failed: {}", e)),
    }

    // 4. tools/call
    let call = JsonRpcRequest::new(
        2,
        METHOD_TOOLS_CALL,
        CallToolParams {
            name: tool.to_string(),
            arguments: json!({}),
        },
    );
    match rpc(&transport, &endpoint, serde_json::to_string(&call)?).await {
        Ok(result) => {
            let text: String = normalize_tool_result(&result)
                .chars()
                .take(RESULT_PREVIEW_CHARS)
                .collect();
            pass(&format!("tools/call {} succeeded", tool));
            println!("    {}", text);
        }
        Err(e) => fail(&format!("tools/call {} failed: {}", tool, e)),
    }

    transport.close().await?;
    println!("\nProbe complete.");
    Ok(())
}

/// Open the event stream and show the first chunk.
async fn probe_stream(transport: &HttpTransport, url: &str) {
    let mut stream = match tokio::time::timeout(PROBE_TIMEOUT, transport.open_stream(url)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            fail(&format!("Event stream unavailable: {}", e));
            return;
        }
        Err(_) => {
            fail("Event stream did not answer within the timeout");
            return;
        }
    };

    match tokio::time::timeout(PROBE_TIMEOUT, stream.next()).await {
        Ok(Some(Ok(chunk))) => {
            let shown = &chunk[..chunk.len().min(STREAM_PREVIEW_BYTES)];
            pass("Event stream open");
            println!("    {}", String::from_utf8_lossy(shown).trim_end());
        }
        Ok(Some(Err(e))) => fail(&format!("Event stream error: {}", e)),
        Ok(None) => fail("Event stream closed without data"),
        Err(_) => pass("Event stream open (no event within the timeout)"),
    }
}

/// POST one request and decode the reply into its result.
async fn rpc(transport: &HttpTransport, endpoint: &str, body: String) -> anyhow::Result<Value> {
    let text = transport.post(endpoint, body, PROBE_TIMEOUT).await?;
    let reply = decode_reply(&text)?;
    if let Some(error) = reply.error {
        anyhow::bail!("server error (code {}): {}", error.code, error.message);
    }
    Ok(reply.result.unwrap_or(Value::Null))
}

fn pass(message: &str) {
    println!("  ✓ {}", message);
}

fn fail(message: &str) {
    println!("  ✗ {}", message);
}
