//! Prompt preprocessing.
//!
//! Expands `@file(path)` tags inline and loads attachment patterns before the
//! prompt is handed to the conversation loop. A tag that names a missing file
//! is an error; unknown `@tag(...)` forms pass through untouched.

use std::path::Path;

use anyhow::{bail, Context, Result};
use regex::Regex;

/// A file loaded for inclusion with a prompt.
#[derive(Debug, Clone)]
pub struct Attachment {
    /// Display identifier, usually the path as given.
    pub name: String,
    pub content: String,
}

impl Attachment {
    /// Render as a fenced block for appending after the prompt text.
    pub fn block(&self) -> String {
        file_block(&self.name, extension(&self.name), &self.content)
    }
}

/// Expand `@file(...)` tags in `prompt` and load `patterns` as attachments.
///
/// Returns the processed prompt text and the loaded attachments. The caller
/// decides how attachments are rendered into the final message.
pub fn preprocess(prompt: &str, patterns: &[String]) -> Result<(String, Vec<Attachment>)> {
    let text = expand_tags(prompt)?;
    let attachments = load_attachments(patterns)?;
    Ok((text, attachments))
}

/// Replace every `@file(path[:start-end])` tag with the file's content as a
/// fenced block. Line ranges are 1-based inclusive.
fn expand_tags(prompt: &str) -> Result<String> {
    let tag_re = Regex::new(r"@(\w+)\(([^)]*)\)").unwrap();

    let mut result = prompt.to_string();
    for caps in tag_re.captures_iter(prompt) {
        let whole = &caps[0];
        let name = &caps[1];
        let args = &caps[2];
        if name != "file" {
            continue;
        }
        let replacement = file_tag(args).with_context(|| format!("file tag {:?}", whole))?;
        result = result.replacen(whole, &replacement, 1);
    }
    Ok(result)
}

fn file_tag(args: &str) -> Result<String> {
    let arg_re = Regex::new(r"^(.*?)(?::(\d+)-(\d+))?$").unwrap();
    let caps = match arg_re.captures(args) {
        Some(c) => c,
        None => bail!("invalid file reference: {:?}", args),
    };
    let path = &caps[1];
    if path.is_empty() {
        bail!("empty file path");
    }

    let content =
        std::fs::read_to_string(path).with_context(|| format!("read {:?}", path))?;
    let mut id = path.to_string();
    let mut text = content.as_str().trim_end_matches('\n').to_string();

    if let (Some(start), Some(end)) = (caps.get(2), caps.get(3)) {
        let start: usize = start.as_str().parse().context("start line")?;
        let end: usize = end.as_str().parse().context("end line")?;
        let lines: Vec<&str> = content.lines().collect();
        if start < 1 || start > end || end > lines.len() {
            bail!("invalid range {}-{} for {} lines", start, end, lines.len());
        }
        text = lines[start - 1..end].join("\n");
        id = format!("{}:{}-{}", path, start, end);
    }

    Ok(file_block(&id, extension(path), &text))
}

fn load_attachments(patterns: &[String]) -> Result<Vec<Attachment>> {
    let mut attachments = Vec::new();
    for pattern in patterns {
        let matches =
            glob::glob(pattern).with_context(|| format!("invalid pattern {:?}", pattern))?;
        for entry in matches.flatten() {
            if entry.is_dir() {
                continue;
            }
            // Binary or unreadable matches are skipped, not fatal.
            let Ok(content) = std::fs::read_to_string(&entry) else {
                continue;
            };
            attachments.push(Attachment {
                name: entry.to_string_lossy().to_string(),
                content,
            });
        }
    }
    Ok(attachments)
}

fn file_block(id: &str, ext: &str, text: &str) -> String {
    format!("\nFile: {}\n\n```{}\n{}\n```\n", id, ext, text)
}

fn extension(path: &str) -> &str {
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
}
