//! Typed content blocks: the intermediate representation between Markdown
//! text and remote block payloads.
//!
//! Every variant knows how to parse itself from a Markdown fragment, print
//! itself back to Markdown (the inverse of parsing), and serialize itself to
//! the remote API's block payload shape (a JSON object with a `type`
//! discriminator). The reverse mapping from a remote payload is lossy only
//! for block types outside the supported set.

use serde_json::{json, Value};
use tracing::debug;

use crate::error::{SyncError, SyncResult};

/// One structural unit of a document. Order of blocks is significant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Heading {
        level: u8,
        text: String,
    },
    Paragraph {
        text: String,
    },
    Code {
        language: Option<String>,
        code: String,
    },
    Table {
        headers: Vec<String>,
        rows: Vec<Vec<String>>,
    },
    Callout {
        text: String,
        icon: String,
    },
}

impl Block {
    /// Parse a heading line. Returns `None` when the line is not a valid
    /// heading (no `#` marker, more than six, or no space after the marker),
    /// so the caller can fall through to the next variant.
    pub fn heading_from_markdown(line: &str) -> Option<Block> {
        let trimmed = line.trim();
        let level = trimmed.chars().take_while(|c| *c == '#').count();
        if level == 0 || level > 6 {
            return None;
        }
        let rest = &trimmed[level..];
        if !rest.starts_with(' ') && !rest.is_empty() {
            return None;
        }
        Some(Block::Heading {
            level: level as u8,
            text: rest.trim().to_string(),
        })
    }

    /// Build a code block from raw code text plus an explicit language tag.
    pub fn code(code: impl Into<String>, language: Option<String>) -> Block {
        Block::Code {
            language,
            code: code.into(),
        }
    }

    /// Parse a pipe-delimited table: first row headers, second row separator
    /// (discarded), remaining rows data. Rows with a column count different
    /// from the header count are a parse error naming the row index.
    pub fn table_from_markdown(text: &str) -> SyncResult<Block> {
        let lines: Vec<&str> = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();
        if lines.len() < 2 {
            return Err(SyncError::ContentParse(
                "table must have a header row and a separator row".to_string(),
            ));
        }
        let headers = split_table_row(lines[0]);
        if !is_separator_row(lines[1]) {
            return Err(SyncError::ContentParse(
                "table is missing the separator row".to_string(),
            ));
        }
        let mut rows = Vec::new();
        for (idx, line) in lines[2..].iter().enumerate() {
            let cells = split_table_row(line);
            if cells.len() != headers.len() {
                return Err(SyncError::ContentParse(format!(
                    "table row {} has {} columns, expected {}",
                    idx + 1,
                    cells.len(),
                    headers.len()
                )));
            }
            rows.push(cells);
        }
        Ok(Block::Table { headers, rows })
    }

    /// Parse a callout quote of the form `> <icon> <text>`.
    pub fn callout_from_markdown(line: &str) -> Option<Block> {
        let rest = line.trim().strip_prefix("> ")?;
        let mut parts = rest.splitn(2, ' ');
        let icon = parts.next()?.to_string();
        let text = parts.next().unwrap_or("").trim().to_string();
        Some(Block::Callout { text, icon })
    }

    /// Serialize back to Markdown. Inverse of parsing (module round-trip law).
    pub fn to_markdown(&self) -> String {
        match self {
            Block::Heading { level, text } => {
                format!("{} {}", "#".repeat(*level as usize), text)
            }
            Block::Paragraph { text } => text.clone(),
            Block::Code { language, code } => {
                format!("```{}\n{}\n```", language.as_deref().unwrap_or(""), code)
            }
            Block::Table { headers, rows } => {
                let mut out = Vec::with_capacity(rows.len() + 2);
                out.push(format_table_row(headers));
                out.push(format_table_row(
                    &headers.iter().map(|_| "---".to_string()).collect::<Vec<_>>(),
                ));
                for row in rows {
                    out.push(format_table_row(row));
                }
                out.join("\n")
            }
            Block::Callout { text, icon } => format!("> {icon} {text}"),
        }
    }

    /// Serialize to the remote API's block payload shape.
    pub fn to_remote_block(&self) -> Value {
        match self {
            Block::Heading { level, text } => {
                let kind = format!("heading_{level}");
                json!({
                    "type": kind,
                    kind.as_str(): { "rich_text": rich_text(text) },
                })
            }
            Block::Paragraph { text } => json!({
                "type": "paragraph",
                "paragraph": { "rich_text": rich_text(text) },
            }),
            Block::Code { language, code } => json!({
                "type": "code",
                "code": {
                    "language": language.as_deref().unwrap_or("plain text"),
                    "rich_text": rich_text(code),
                },
            }),
            Block::Table { headers, rows } => {
                let mut children = Vec::with_capacity(rows.len() + 1);
                children.push(table_row_block(headers));
                for row in rows {
                    children.push(table_row_block(row));
                }
                json!({
                    "type": "table",
                    "table": {
                        "table_width": headers.len(),
                        "has_column_header": true,
                        "children": children,
                    },
                })
            }
            Block::Callout { text, icon } => json!({
                "type": "callout",
                "callout": {
                    "icon": { "type": "emoji", "emoji": icon },
                    "rich_text": rich_text(text),
                },
            }),
        }
    }

    /// Reverse mapping from a remote block payload. Unknown discriminators
    /// yield `None`; callers skip those blocks.
    pub fn from_remote_block(value: &Value) -> Option<Block> {
        let kind = value.get("type")?.as_str()?;
        match kind {
            "paragraph" => Some(Block::Paragraph {
                text: plain_text(value.get("paragraph")?),
            }),
            "code" => {
                let code = value.get("code")?;
                let language = code
                    .get("language")
                    .and_then(Value::as_str)
                    .filter(|l| *l != "plain text")
                    .map(String::from);
                Some(Block::Code {
                    language,
                    code: plain_text(code),
                })
            }
            "callout" => {
                let callout = value.get("callout")?;
                let icon = callout
                    .get("icon")
                    .and_then(|i| i.get("emoji"))
                    .and_then(Value::as_str)
                    .unwrap_or("💡")
                    .to_string();
                Some(Block::Callout {
                    text: plain_text(callout),
                    icon,
                })
            }
            "table" => {
                let children = value.get("table")?.get("children")?.as_array()?;
                let mut rows: Vec<Vec<String>> = children.iter().filter_map(table_row_cells).collect();
                if rows.is_empty() {
                    return None;
                }
                let headers = rows.remove(0);
                Some(Block::Table { headers, rows })
            }
            _ => {
                if let Some(level) = kind.strip_prefix("heading_") {
                    let level: u8 = level.parse().ok().filter(|l| (1..=6).contains(l))?;
                    return Some(Block::Heading {
                        level,
                        text: plain_text(value.get(kind)?),
                    });
                }
                debug!(kind, "skipping unsupported remote block type");
                None
            }
        }
    }
}

fn rich_text(content: &str) -> Value {
    json!([{ "text": { "content": content } }])
}

fn table_row_block(cells: &[String]) -> Value {
    let cells: Vec<Value> = cells.iter().map(|c| rich_text(c)).collect();
    json!({ "type": "table_row", "table_row": { "cells": cells } })
}

fn table_row_cells(row: &Value) -> Option<Vec<String>> {
    let cells = row.get("table_row")?.get("cells")?.as_array()?;
    Some(
        cells
            .iter()
            .map(|cell| {
                cell.as_array()
                    .map(|parts| parts.iter().map(rich_text_content).collect::<String>())
                    .unwrap_or_default()
            })
            .collect(),
    )
}

/// Concatenated plain text of a block body's `rich_text` array.
fn plain_text(body: &Value) -> String {
    body.get("rich_text")
        .and_then(Value::as_array)
        .map(|parts| parts.iter().map(rich_text_content).collect())
        .unwrap_or_default()
}

fn rich_text_content(part: &Value) -> String {
    part.get("text")
        .and_then(|t| t.get("content"))
        .or_else(|| part.get("plain_text"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn split_table_row(line: &str) -> Vec<String> {
    let inner = line
        .trim()
        .trim_start_matches('|')
        .trim_end_matches('|');
    inner.split('|').map(|c| c.trim().to_string()).collect()
}

fn is_separator_row(line: &str) -> bool {
    let cells = split_table_row(line);
    !cells.is_empty()
        && cells
            .iter()
            .all(|c| !c.is_empty() && c.chars().all(|ch| ch == '-' || ch == ':'))
}

fn format_table_row(cells: &[String]) -> String {
    format!("| {} |", cells.join(" | "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heading_from_markdown_counts_level() {
        let heading = Block::heading_from_markdown("### Title").unwrap();
        assert_eq!(
            heading,
            Block::Heading {
                level: 3,
                text: "Title".to_string()
            }
        );
        assert_eq!(heading.to_markdown(), "### Title");
    }

    #[test]
    fn heading_rejects_malformed_markers() {
        assert!(Block::heading_from_markdown("Title").is_none());
        assert!(Block::heading_from_markdown("####### Seven").is_none());
        assert!(Block::heading_from_markdown("#NoSpace").is_none());
    }

    #[test]
    fn code_block_to_remote_payload() {
        let block = Block::code("print('test')", Some("python".to_string()));
        let payload = block.to_remote_block();
        assert_eq!(payload["type"], "code");
        assert_eq!(payload["code"]["language"], "python");
        assert_eq!(
            payload["code"]["rich_text"][0]["text"]["content"],
            "print('test')"
        );
    }

    #[test]
    fn code_block_without_language_defaults_to_plain_text() {
        let payload = Block::code("x", None).to_remote_block();
        assert_eq!(payload["code"]["language"], "plain text");
    }

    #[test]
    fn table_from_markdown_parses_headers_and_rows() {
        let table = Block::table_from_markdown("| A | B |\n|---|---|\n| 1 | 2 |\n| 3 | 4 |")
            .expect("well-formed table");
        assert_eq!(
            table,
            Block::Table {
                headers: vec!["A".to_string(), "B".to_string()],
                rows: vec![
                    vec!["1".to_string(), "2".to_string()],
                    vec!["3".to_string(), "4".to_string()],
                ],
            }
        );
    }

    #[test]
    fn ragged_table_row_names_offending_index() {
        let err = Block::table_from_markdown("| A | B |\n|---|---|\n| 1 | 2 |\n| only |")
            .expect_err("ragged row must fail");
        match err {
            SyncError::ContentParse(msg) => {
                assert!(msg.contains("row 2"), "message should name row 2: {msg}");
                assert!(msg.contains("expected 2"));
            }
            other => panic!("expected ContentParse, got {other:?}"),
        }
    }

    #[test]
    fn table_to_remote_payload_invariants() {
        let table = Block::Table {
            headers: vec!["A".to_string(), "B".to_string()],
            rows: vec![vec!["1".to_string(), "2".to_string()]],
        };
        let payload = table.to_remote_block();
        assert_eq!(payload["type"], "table");
        assert_eq!(payload["table"]["table_width"], 2);
        assert_eq!(payload["table"]["has_column_header"], true);
        // Header row plus one data row.
        assert_eq!(payload["table"]["children"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn callout_to_remote_payload() {
        let callout = Block::Callout {
            text: "Important information!".to_string(),
            icon: "💡".to_string(),
        };
        let payload = callout.to_remote_block();
        assert_eq!(payload["type"], "callout");
        assert_eq!(payload["callout"]["icon"]["emoji"], "💡");
        assert_eq!(
            payload["callout"]["rich_text"][0]["text"]["content"],
            "Important information!"
        );
    }

    #[test]
    fn remote_payload_round_trips_back_to_block() {
        let blocks = vec![
            Block::Heading {
                level: 2,
                text: "Section".to_string(),
            },
            Block::Paragraph {
                text: "Body".to_string(),
            },
            Block::code("fn main() {}", Some("rust".to_string())),
            Block::Table {
                headers: vec!["K".to_string(), "V".to_string()],
                rows: vec![vec!["a".to_string(), "1".to_string()]],
            },
            Block::Callout {
                text: "Note".to_string(),
                icon: "⚠️".to_string(),
            },
        ];
        for block in blocks {
            let back = Block::from_remote_block(&block.to_remote_block())
                .expect("supported block type");
            assert_eq!(back, block);
        }
    }

    #[test]
    fn unknown_remote_block_type_is_skipped() {
        let value = serde_json::json!({ "type": "bookmark", "bookmark": {} });
        assert!(Block::from_remote_block(&value).is_none());
    }
}
