//! Line-delimited JSON protocol spoken with an external engine.
//!
//! Each request is one JSON object on one line, tagged by `op` and numbered by
//! `id`. The engine answers every request, in order, with one line:
//! `{"id": n, "ok": true, "result": ...}` or `{"id": n, "ok": false, "error": "..."}`.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::io::{BufRead, Write};
use std::path::Path;

use crate::engine::backend::TemplateSpec;

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub(crate) enum Op<'a> {
    Hello {
        client: &'a str,
        version: &'a str,
    },
    OpenSession,
    CloseSession {
        session: u64,
    },
    LoadTarget {
        session: u64,
        path: &'a Path,
    },
    Detect {
        session: u64,
        templates: &'a [TemplateSpec],
    },
    GenerateRefinement {
        session: u64,
        enable_rotating_zones: bool,
    },
    ExportRefinementDict {
        session: u64,
        path: &'a Path,
    },
    ExportCase {
        session: u64,
        case_dir: &'a Path,
        include_rotating_zones: bool,
    },
    ExportSizingField {
        session: u64,
        path: &'a Path,
        base_size: f64,
        refinement_factor: f64,
    },
    Shutdown,
}

#[derive(Serialize)]
struct Request<'a> {
    id: u64,
    #[serde(flatten)]
    op: &'a Op<'a>,
}

#[derive(Debug, Deserialize)]
struct Response {
    id: u64,
    ok: bool,
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<String>,
}

/// Request/response channel over any line-oriented byte streams.
pub(crate) struct Channel {
    reader: Box<dyn BufRead + Send>,
    writer: Box<dyn Write + Send>,
    next_id: u64,
    /// Requests sent by `notify` whose replies are still in the stream.
    unawaited: HashSet<u64>,
}

impl Channel {
    pub(crate) fn new(reader: Box<dyn BufRead + Send>, writer: Box<dyn Write + Send>) -> Self {
        Self {
            reader,
            writer,
            next_id: 1,
            unawaited: HashSet::new(),
        }
    }

    /// Send one request and wait for its response.
    pub(crate) fn call(&mut self, op: &Op<'_>) -> Result<Value> {
        let id = self.send(op)?;
        self.receive(id)
    }

    /// Send one request without waiting; its reply is skipped by a later `call`.
    pub(crate) fn notify(&mut self, op: &Op<'_>) -> Result<()> {
        let id = self.send(op)?;
        self.unawaited.insert(id);
        Ok(())
    }

    fn send(&mut self, op: &Op<'_>) -> Result<u64> {
        let id = self.next_id;
        self.next_id += 1;

        let mut line = serde_json::to_string(&Request { id, op })
            .context("failed to encode engine request")?;
        line.push('\n');
        self.writer
            .write_all(line.as_bytes())
            .and_then(|_| self.writer.flush())
            .context("failed to send request to engine")?;
        Ok(id)
    }

    fn receive(&mut self, id: u64) -> Result<Value> {
        loop {
            let mut reply = String::new();
            let read = self
                .reader
                .read_line(&mut reply)
                .context("failed to read engine response")?;
            if read == 0 {
                return Err(anyhow!("engine closed its output stream"));
            }
            let response: Response = serde_json::from_str(reply.trim_end())
                .with_context(|| format!("malformed engine response: {}", reply.trim_end()))?;
            if response.id != id {
                if self.unawaited.remove(&response.id) {
                    continue;
                }
                return Err(anyhow!(
                    "engine answered request {} while {} was pending",
                    response.id,
                    id
                ));
            }
            if !response.ok {
                return Err(anyhow!(response
                    .error
                    .unwrap_or_else(|| "engine reported failure without detail".to_string())));
            }
            return Ok(response.result);
        }
    }
}
