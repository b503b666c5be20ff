//! Built-in line-oriented JSON-RPC worker.
//!
//! Stands in for a real generation backend so tests and `doctor` can
//! exercise the supervisor end to end: it answers over stdout, streams
//! partial results, and misbehaves on demand.
//!
//! Methods: `ping` → `"pong"`; `echo` → its params; `generate` → streamed
//! `stream/chunk` fragments followed by the formal response; `sleep`
//! (`{"ms": N}`) → delayed response; `garbage` → one non-protocol line,
//! then a normal response; `crash` → immediate `exit(9)`.

use std::io::{self, BufRead, Write};
use std::thread;
use std::time::Duration;

use genlink_protocol::{codes, decode_line, Envelope, STREAM_CHUNK_METHOD};
use serde_json::{json, Value};

use crate::cmd::MockWorkerArgs;
use crate::exit::{io_error, CliResult, SUCCESS};

pub fn run(args: MockWorkerArgs) -> CliResult<i32> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = line.map_err(|err| io_error("reading stdin", err))?;
        let Some(Envelope::Request { id, method, params }) = decode_line(&line) else {
            continue;
        };
        match method.as_str() {
            "ping" => respond(&mut stdout, id, json!("pong"))?,
            "echo" => respond(&mut stdout, id, params.unwrap_or(Value::Null))?,
            "generate" => generate(&mut stdout, id, params, args.chunks)?,
            "sleep" => {
                let ms = params
                    .as_ref()
                    .and_then(|p| p.get("ms"))
                    .and_then(Value::as_u64)
                    .unwrap_or(1000);
                thread::sleep(Duration::from_millis(ms));
                respond(&mut stdout, id, json!("slept"))?;
            }
            "garbage" => {
                emit(&mut stdout, "%% this is not a protocol frame %%")?;
                respond(&mut stdout, id, json!("survived"))?;
            }
            "crash" => std::process::exit(9),
            _ => respond_error(
                &mut stdout,
                id,
                codes::METHOD_NOT_FOUND,
                &format!("unknown method {method:?}"),
            )?,
        }
    }
    Ok(SUCCESS)
}

fn generate(out: &mut impl Write, id: u64, params: Option<Value>, chunks: usize) -> CliResult<()> {
    let prompt = params
        .as_ref()
        .and_then(|p| p.get("prompt"))
        .and_then(Value::as_str)
        .unwrap_or("ok");
    let text = format!("generated: {prompt}");

    let pieces = split_chunks(&text, chunks.max(1));
    let last = pieces.len() - 1;
    for (index, piece) in pieces.iter().enumerate() {
        let frame = json!({
            "jsonrpc": "2.0",
            "method": STREAM_CHUNK_METHOD,
            "params": {
                "requestId": id,
                "chunk": piece,
                "done": index == last,
                "index": index as u64,
            }
        });
        emit(out, &frame.to_string())?;
    }
    respond(out, id, json!({ "text": text }))
}

fn split_chunks(text: &str, count: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let size = chars.len().div_ceil(count).max(1);
    let mut pieces: Vec<String> = chars
        .chunks(size)
        .map(|chunk| chunk.iter().collect())
        .collect();
    if pieces.is_empty() {
        pieces.push(String::new());
    }
    pieces
}

fn respond(out: &mut impl Write, id: u64, result: Value) -> CliResult<()> {
    emit(
        out,
        &json!({"jsonrpc": "2.0", "id": id, "result": result}).to_string(),
    )
}

fn respond_error(out: &mut impl Write, id: u64, code: i64, message: &str) -> CliResult<()> {
    emit(
        out,
        &json!({"jsonrpc": "2.0", "id": id, "error": {"code": code, "message": message}})
            .to_string(),
    )
}

fn emit(out: &mut impl Write, line: &str) -> CliResult<()> {
    writeln!(out, "{line}").map_err(|err| io_error("writing stdout", err))?;
    out.flush().map_err(|err| io_error("flushing stdout", err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_chunks_covers_the_whole_text() {
        let pieces = split_chunks("generated: hello", 3);
        assert_eq!(pieces.len(), 3);
        assert_eq!(pieces.concat(), "generated: hello");
    }

    #[test]
    fn split_chunks_handles_short_text() {
        let pieces = split_chunks("ab", 5);
        assert_eq!(pieces.concat(), "ab");
        assert!(pieces.len() <= 5);
    }

    #[test]
    fn split_chunks_handles_empty_text() {
        let pieces = split_chunks("", 3);
        assert_eq!(pieces.concat(), "");
        assert!(!pieces.is_empty());
    }
}
