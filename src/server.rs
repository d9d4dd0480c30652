use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::engine::Engine;
use crate::keyword_store::Filters;
use crate::query_expand::expand_query;

/// JSON-RPC-over-stdio loop (spec §10.1). A thin adapter: it deserializes
/// arguments, calls into `Engine`, and serializes the result. No indexing,
/// scoring, or fusion logic lives here — every tool call is a direct mapping
/// onto one of the engine's public operations.
pub async fn run_stdio_server(engine: Engine) -> anyhow::Result<()> {
    let stdin = tokio::io::stdin();
    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(stdin).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let msg: serde_json::Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(_) => continue,
        };

        // JSON-RPC notifications have no "id" field — don't respond.
        if msg.get("id").is_none() {
            continue;
        }

        let id = msg.get("id").cloned().unwrap_or(json!(null));
        let method = msg.get("method").and_then(|m| m.as_str()).unwrap_or("");

        let reply = match method {
            "initialize" => json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": {
                    "protocolVersion": msg.get("params").and_then(|p| p.get("protocolVersion")).cloned().unwrap_or(json!("2024-11-05")),
                    "capabilities": { "tools": { "listChanged": true } },
                    "serverInfo": { "name": "hybridocs", "version": env!("CARGO_PKG_VERSION") }
                }
            }),
            "ping" => json!({ "jsonrpc": "2.0", "id": id, "result": {} }),
            "tools/list" => json!({ "jsonrpc": "2.0", "id": id, "result": { "tools": tool_list() } }),
            "tools/call" => {
                let params = msg.get("params").cloned().unwrap_or(json!({}));
                tool_call(&engine, id.clone(), &params).await
            }
            // Return empty lists for resources/prompts — not implemented.
            "resources/list" => json!({ "jsonrpc": "2.0", "id": id, "result": { "resources": [] } }),
            "prompts/list" => json!({ "jsonrpc": "2.0", "id": id, "result": { "prompts": [] } }),
            _ => json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": { "code": -32601, "message": format!("Method not found: {method}") }
            }),
        };

        stdout.write_all(reply.to_string().as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
    }

    Ok(())
}

fn tool_list() -> serde_json::Value {
    json!([
        { "name": "index_paths", "description": "Index one or more paths into the hybrid retrieval engine" },
        { "name": "search", "description": "Run a hybrid keyword + semantic search" },
        { "name": "retrieve", "description": "Fetch a single chunk by id" },
        { "name": "get_stats", "description": "Return cache and keyword-store counts" },
        { "name": "list_sources", "description": "List every indexed source path" },
        { "name": "clear_tech", "description": "Remove every chunk for a given tech" },
        { "name": "clear_all", "description": "Drop and recreate both stores" },
    ])
}

async fn tool_call(engine: &Engine, id: serde_json::Value, params: &serde_json::Value) -> serde_json::Value {
    let name = params.get("name").and_then(|n| n.as_str()).unwrap_or("");
    let args = params.get("arguments").cloned().unwrap_or(json!({}));

    let result = match name {
        "index_paths" => {
            let paths: Vec<std::path::PathBuf> = args
                .get("paths")
                .and_then(|p| p.as_array())
                .map(|arr| arr.iter().filter_map(|v| v.as_str()).map(std::path::PathBuf::from).collect())
                .unwrap_or_default();
            let force = args.get("force").and_then(|v| v.as_bool()).unwrap_or(false);
            match engine.index_paths(&paths, force).await {
                Ok(stats) => serde_json::to_value(stats).unwrap_or(json!({})),
                Err(e) => return error_reply(id, &e.to_string()),
            }
        }
        "search" => {
            let query = expand_query(args.get("query").and_then(|q| q.as_str()).unwrap_or(""));
            let top_k = args.get("top_k").and_then(|v| v.as_u64()).unwrap_or(10) as usize;
            let filters = Filters {
                tech: args.get("tech").and_then(|v| v.as_str()).map(String::from),
                component: args.get("component").and_then(|v| v.as_str()).map(String::from),
                version: args.get("version").and_then(|v| v.as_str()).map(String::from),
                file_type: args.get("file_type").and_then(|v| v.as_str()).map(String::from),
            };
            let results = engine.search(&query, top_k, filters).await;
            json!(results
                .into_iter()
                .map(|r| json!({
                    "chunk_id": r.chunk_id,
                    "content": r.content,
                    "source_path": r.source_path,
                    "tech": r.tech,
                    "component": r.component,
                    "version": r.version,
                    "topic": r.topic,
                    "final_score": r.final_score,
                }))
                .collect::<Vec<_>>())
        }
        "retrieve" => {
            let chunk_id = args.get("chunk_id").and_then(|v| v.as_str()).unwrap_or("");
            match engine.retrieve(chunk_id).await {
                Some(chunk) => serde_json::to_value(chunk).unwrap_or(json!(null)),
                None => json!(null),
            }
        }
        "get_stats" => {
            let (cache_size, keyword_count) = engine.get_stats().await;
            json!({ "cache_size": cache_size, "keyword_store_count": keyword_count })
        }
        "list_sources" => json!(engine.list_sources().await),
        "clear_tech" => {
            let tech = args.get("tech").and_then(|v| v.as_str()).unwrap_or("");
            match engine.clear_tech(tech).await {
                Ok(n) => json!({ "removed": n }),
                Err(e) => return error_reply(id, &e.to_string()),
            }
        }
        "clear_all" => match engine.clear_all().await {
            Ok(()) => json!({ "ok": true }),
            Err(e) => return error_reply(id, &e.to_string()),
        },
        _ => return error_reply(id, &format!("unknown tool: {name}")),
    };

    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

fn error_reply(id: serde_json::Value, message: &str) -> serde_json::Value {
    json!({ "jsonrpc": "2.0", "id": id, "error": { "code": -32000, "message": message } })
}
