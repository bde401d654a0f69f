//! Whole-document conversion between Markdown text and remote block payloads.
//!
//! Segmentation is line-oriented and greedy: heading lines, fenced code spans
//! (triple backticks with an optional language tag), pipe tables, callout
//! quotes, and everything else as blank-line-separated paragraphs. The primary
//! correctness property is the round-trip law: converting Markdown to blocks
//! and back is the identity after whitespace normalization.

use serde_json::Value;
use tracing::debug;

use crate::blocks::Block;
use crate::error::{SyncError, SyncResult};

/// Segment raw Markdown into an ordered sequence of blocks.
///
/// A code fence run continues until the matching closing fence; an
/// unterminated fence is a parse error. A ragged table row is a parse error
/// naming the offending row.
pub fn markdown_to_blocks(text: &str) -> SyncResult<Vec<Block>> {
    let lines: Vec<&str> = text.lines().collect();
    let mut blocks = Vec::new();
    let mut paragraph: Vec<&str> = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];
        let trimmed = line.trim();

        if trimmed.is_empty() {
            flush_paragraph(&mut paragraph, &mut blocks);
            i += 1;
            continue;
        }

        if let Some(tag) = trimmed.strip_prefix("```") {
            flush_paragraph(&mut paragraph, &mut blocks);
            let language = match tag.trim() {
                "" => None,
                lang => Some(lang.to_string()),
            };
            let mut body: Vec<&str> = Vec::new();
            let mut j = i + 1;
            loop {
                match lines.get(j) {
                    None => {
                        return Err(SyncError::ContentParse(format!(
                            "unterminated code fence opened on line {}",
                            i + 1
                        )));
                    }
                    Some(l) if l.trim() == "```" => break,
                    Some(l) => {
                        body.push(l);
                        j += 1;
                    }
                }
            }
            blocks.push(Block::code(body.join("\n"), language));
            i = j + 1;
            continue;
        }

        if let Some(heading) = Block::heading_from_markdown(trimmed) {
            flush_paragraph(&mut paragraph, &mut blocks);
            blocks.push(heading);
            i += 1;
            continue;
        }

        if trimmed.starts_with('|') {
            flush_paragraph(&mut paragraph, &mut blocks);
            let mut j = i;
            while j < lines.len() && lines[j].trim().starts_with('|') {
                j += 1;
            }
            blocks.push(Block::table_from_markdown(&lines[i..j].join("\n"))?);
            i = j;
            continue;
        }

        if let Some(callout) = Block::callout_from_markdown(trimmed) {
            flush_paragraph(&mut paragraph, &mut blocks);
            blocks.push(callout);
            i += 1;
            continue;
        }

        paragraph.push(trimmed);
        i += 1;
    }

    flush_paragraph(&mut paragraph, &mut blocks);
    debug!(blocks = blocks.len(), "segmented markdown document");
    Ok(blocks)
}

fn flush_paragraph(paragraph: &mut Vec<&str>, blocks: &mut Vec<Block>) {
    if paragraph.is_empty() {
        return;
    }
    blocks.push(Block::Paragraph {
        text: paragraph.join("\n"),
    });
    paragraph.clear();
}

/// Map each block to its remote API payload; order is preserved.
pub fn blocks_to_remote(blocks: &[Block]) -> Vec<Value> {
    blocks.iter().map(Block::to_remote_block).collect()
}

/// Map remote payloads back to blocks, skipping unsupported types.
pub fn remote_to_blocks(values: &[Value]) -> Vec<Block> {
    values.iter().filter_map(Block::from_remote_block).collect()
}

/// Concatenate each block's Markdown form joined by one blank line.
pub fn blocks_to_markdown(blocks: &[Block]) -> String {
    blocks
        .iter()
        .map(Block::to_markdown)
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Whitespace normalization used by the round-trip law and by content
/// comparisons in the bridge: each line trimmed at both ends (segmentation
/// already drops paragraph indentation), runs of blank lines collapsed to
/// one, leading/trailing blank lines dropped.
pub fn normalize(text: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    let mut blank_pending = false;
    for line in text.lines().map(str::trim) {
        if line.is_empty() {
            blank_pending = !out.is_empty();
            continue;
        }
        if blank_pending {
            out.push("");
            blank_pending = false;
        }
        out.push(line);
    }
    out.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "# Main Title\n\nAn example paragraph with some important information.\n\n## Code Section\n\n```python\ndef hello_world():\n    print('Hello!')\n```\n\n### Subsection\n\n| Name | Age | Role |\n| --- | --- | --- |\n| Joan | 30 | Dev |\n| Maria | 28 | Designer |\n";

    #[test]
    fn segments_sample_document() {
        let blocks = markdown_to_blocks(SAMPLE).unwrap();
        assert_eq!(blocks.len(), 6);
        assert_eq!(
            blocks[0],
            Block::Heading {
                level: 1,
                text: "Main Title".to_string()
            }
        );
        assert!(matches!(&blocks[1], Block::Paragraph { .. }));
        assert!(matches!(
            &blocks[3],
            Block::Code { language: Some(l), .. } if l == "python"
        ));
        assert!(matches!(&blocks[5], Block::Table { headers, rows }
            if headers.len() == 3 && rows.len() == 2));
    }

    #[test]
    fn heading_discriminators_follow_level() {
        let blocks = markdown_to_blocks(SAMPLE).unwrap();
        let payloads = blocks_to_remote(&blocks);
        assert_eq!(payloads.len(), blocks.len());
        assert_eq!(payloads[0]["type"], "heading_1");
        assert_eq!(payloads[2]["type"], "heading_2");
        assert_eq!(payloads[3]["type"], "code");
        assert_eq!(payloads[5]["type"], "table");
    }

    #[test]
    fn round_trip_is_identity_after_normalization() {
        let blocks = markdown_to_blocks(SAMPLE).unwrap();
        let rendered = blocks_to_markdown(&blocks);
        assert_eq!(normalize(&rendered), normalize(SAMPLE));
    }

    #[test]
    fn round_trip_preserves_code_body_exactly() {
        let doc = "```rust\nfn main() {\n    let x = 1;\n}\n```";
        let blocks = markdown_to_blocks(doc).unwrap();
        assert_eq!(
            blocks,
            vec![Block::code("fn main() {\n    let x = 1;\n}", Some("rust".to_string()))]
        );
        assert_eq!(blocks_to_markdown(&blocks), doc);
    }

    #[test]
    fn unterminated_fence_is_an_error() {
        let err = markdown_to_blocks("```python\nprint('x')\n").unwrap_err();
        assert!(matches!(err, SyncError::ContentParse(msg) if msg.contains("unterminated")));
    }

    #[test]
    fn malformed_heading_falls_back_to_paragraph() {
        let blocks = markdown_to_blocks("####### not a heading").unwrap();
        assert_eq!(
            blocks,
            vec![Block::Paragraph {
                text: "####### not a heading".to_string()
            }]
        );
    }

    #[test]
    fn callout_quote_parses_and_round_trips() {
        let blocks = markdown_to_blocks("> 💡 Remember to hydrate.").unwrap();
        assert_eq!(
            blocks,
            vec![Block::Callout {
                text: "Remember to hydrate.".to_string(),
                icon: "💡".to_string()
            }]
        );
        assert_eq!(blocks_to_markdown(&blocks), "> 💡 Remember to hydrate.");
    }

    #[test]
    fn consecutive_blank_lines_collapse_under_normalization() {
        let doc = "# A\n\n\n\nBody   \n";
        let blocks = markdown_to_blocks(doc).unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(normalize(&blocks_to_markdown(&blocks)), "# A\n\nBody");
        assert_eq!(normalize(doc), "# A\n\nBody");
    }

    #[test]
    fn round_trip_holds_for_indented_continuation_lines() {
        let doc = "First line\n   wrapped continuation line";
        let blocks = markdown_to_blocks(doc).unwrap();
        assert_eq!(
            blocks,
            vec![Block::Paragraph {
                text: "First line\nwrapped continuation line".to_string()
            }]
        );
        assert_eq!(normalize(&blocks_to_markdown(&blocks)), normalize(doc));
    }

    #[test]
    fn remote_payloads_convert_back_in_order() {
        let blocks = markdown_to_blocks(SAMPLE).unwrap();
        let payloads = blocks_to_remote(&blocks);
        let back = remote_to_blocks(&payloads);
        assert_eq!(back, blocks);
    }
}
