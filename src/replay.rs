//! Conversation replay rewriter (C12, §4.11).
//!
//! When a request carries `previous_response_id`, merges that response's
//! stored input and output items with the current request's input, then
//! strips large image payloads from the merged list before it is replayed to
//! the upstream model — keeping multi-MB base64 image payloads in the replay
//! balloons token usage and latency, and the downstream model does not need
//! the raw bytes to continue the conversation.

use std::sync::OnceLock;

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use regex::Regex;

use crate::error::OrchestratorError;
use crate::model::{ContentPart, InputItem};
use crate::store::ItemStore;

/// Text content shorter than this is never scanned for embedded images (§4.11 rule 3).
const IMAGE_SCAN_MIN_LEN: usize = 5000;

/// Builds the full replay input for a request: merges the prior response's
/// chain (if any) with `current_input`, then strips image payloads (§4.11
/// steps 1-3).
///
/// # Errors
///
/// Returns [`OrchestratorError::PreviousResponseNotFound`] if
/// `previous_response_id` is set but no such response was ever stored.
pub async fn build_replay_input(
    store: &ItemStore,
    previous_response_id: Option<&str>,
    current_input: Vec<InputItem>,
) -> Result<Vec<InputItem>, OrchestratorError> {
    let merged = match previous_response_id {
        None => current_input,
        Some(id) => {
            let mut previous_inputs = store.get_input_items(id).await?;
            let previous_outputs = store.get_output_items(id).await?;
            previous_inputs.extend(previous_outputs);
            previous_inputs.extend(current_input);
            previous_inputs
        }
    };
    Ok(strip_images(merged))
}

/// Rewrites image payloads in `items` to short sentinels, preserving every
/// other field byte-for-byte (§4.11 step 3, §8 property 6: idempotent).
#[must_use]
pub fn strip_images(items: Vec<InputItem>) -> Vec<InputItem> {
    let image_call_ids = collect_image_generation_call_ids(&items);

    items
        .into_iter()
        .map(|item| match item {
            InputItem::FunctionCallOutput { call_id, output } if image_call_ids.contains(&call_id) => {
                let output = if is_sentinel(&output) {
                    output
                } else {
                    sentinel_for(&output)
                };
                InputItem::FunctionCallOutput { call_id, output }
            }
            InputItem::Message { role, content } => InputItem::Message {
                role,
                content: content.into_iter().map(strip_content_part).collect(),
            },
            other => other,
        })
        .collect()
}

fn collect_image_generation_call_ids(items: &[InputItem]) -> std::collections::HashSet<String> {
    items
        .iter()
        .filter_map(|item| match item {
            InputItem::FunctionCall { call_id, name, .. } if name == "image_generation" => Some(call_id.clone()),
            _ => None,
        })
        .collect()
}

fn strip_content_part(part: ContentPart) -> ContentPart {
    match part {
        ContentPart::OutputImage { data } => {
            let data = if is_sentinel(&data) { data } else { "<image>...".to_string() };
            ContentPart::OutputImage { data }
        }
        ContentPart::InputText { text } => ContentPart::InputText { text: maybe_strip_long_text(text) },
        ContentPart::OutputText { text } => ContentPart::OutputText { text: maybe_strip_long_text(text) },
        other @ ContentPart::InputImage { .. } => other,
    }
}

/// Already-rewritten sentinels (e.g. `"<PNG>..."`, `"<image>..."`) are left
/// alone so a second pass over an already-stripped list is a no-op.
fn is_sentinel(text: &str) -> bool {
    sentinel_re().is_match(text)
}

fn sentinel_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        #[allow(clippy::unwrap_used)]
        Regex::new(r"^<[A-Za-z]+>\.\.\.$").unwrap()
    })
}

fn sentinel_for(text: &str) -> String {
    match detect_image_format(text) {
        Some(fmt) => format!("<{fmt}>..."),
        None => "<image>...".to_string(),
    }
}

/// Applies §4.11 rule 3 to one text part: only text longer than
/// [`IMAGE_SCAN_MIN_LEN`] is scanned, and only a confirmed image signature
/// triggers a rewrite — conservative by design to avoid false positives on
/// ordinary long text (§9 "Image detection").
fn maybe_strip_long_text(text: String) -> String {
    if text.len() <= IMAGE_SCAN_MIN_LEN {
        return text;
    }
    match detect_image_format(&text) {
        Some(fmt) => format!("<{fmt}>..."),
        None => text,
    }
}

/// Tries each extraction strategy in turn and returns the first confirmed
/// image format (§4.11 rule 3: data URL, `base64:` prefix, embedded in a URL
/// query parameter, or the raw text itself).
fn detect_image_format(text: &str) -> Option<&'static str> {
    for candidate in candidate_base64_payloads(text) {
        if let Some(fmt) = format_from_base64(&candidate) {
            return Some(fmt);
        }
    }
    None
}

fn candidate_base64_payloads(text: &str) -> Vec<String> {
    let mut candidates = Vec::new();

    if let Some(caps) = data_url_re().captures(text) {
        if let Some(m) = caps.get(1) {
            candidates.push(m.as_str().to_string());
        }
    }
    if let Some(rest) = text.strip_prefix("base64:") {
        candidates.push(rest.to_string());
    }
    for caps in query_param_re().captures_iter(text) {
        if let Some(m) = caps.get(1) {
            candidates.push(m.as_str().to_string());
        }
    }
    if base64_charset_re().is_match(text.trim()) {
        candidates.push(text.trim().to_string());
    }

    candidates
}

fn format_from_base64(candidate: &str) -> Option<&'static str> {
    if !base64_charset_re().is_match(candidate) {
        return None;
    }
    if candidate.starts_with("iVBORw0KGgo") {
        return Some("PNG");
    }
    if candidate.starts_with("/9j/") {
        return Some("JPEG");
    }
    if candidate.starts_with("UklGR") {
        return Some("WEBP");
    }
    if candidate.starts_with("R0lGOD") {
        return Some("GIF");
    }
    let bytes = decode_prefix(candidate)?;
    if bytes.starts_with(&[0xFF, 0xD8]) {
        return Some("JPEG");
    }
    if bytes.starts_with(&[0x89, 0x50, 0x4E, 0x47]) {
        return Some("PNG");
    }
    if bytes.len() >= 4 && &bytes[..4] == b"RIFF" {
        return Some("WEBP");
    }
    if bytes.starts_with(b"GIF8") {
        return Some("GIF");
    }
    None
}

/// Decodes only a small leading slice of `candidate` — enough bytes to check
/// a magic number without paying to decode a multi-MB payload.
fn decode_prefix(candidate: &str) -> Option<Vec<u8>> {
    let take = (candidate.len().min(24) / 4) * 4;
    if take == 0 {
        return None;
    }
    BASE64_STANDARD.decode(&candidate[..take]).ok()
}

fn data_url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        #[allow(clippy::unwrap_used)]
        Regex::new(r"data:image/[a-zA-Z0-9.+-]+;base64,([A-Za-z0-9+/]+={0,2})").unwrap()
    })
}

fn query_param_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        #[allow(clippy::unwrap_used)]
        Regex::new(r"[?&](?:data|image|content|base64)=([A-Za-z0-9+/]+={0,2})").unwrap()
    })
}

fn base64_charset_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        #[allow(clippy::unwrap_used)]
        Regex::new(r"^[A-Za-z0-9+/]*={0,2}$").unwrap()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ItemRole;

    fn png_base64(padding_bytes: usize) -> String {
        let mut bytes = vec![0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
        bytes.extend(std::iter::repeat(0u8).take(padding_bytes));
        BASE64_STANDARD.encode(bytes)
    }

    #[tokio::test]
    async fn build_replay_input_without_previous_response_passes_through() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| unreachable!("{e}"));
        let store = ItemStore::open(dir.path().join("i.db").to_str().unwrap_or_default())
            .unwrap_or_else(|e| unreachable!("{e}"));
        let current = vec![InputItem::text_message(ItemRole::User, "hi")];
        let result = build_replay_input(&store, None, current.clone())
            .await
            .unwrap_or_else(|e| unreachable!("{e}"));
        assert_eq!(result, current);
    }

    #[tokio::test]
    async fn build_replay_input_merges_prior_chain() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| unreachable!("{e}"));
        let store = ItemStore::open(dir.path().join("i.db").to_str().unwrap_or_default())
            .unwrap_or_else(|e| unreachable!("{e}"));
        store
            .store(
                "resp_1",
                &[InputItem::text_message(ItemRole::User, "first question")],
                &[InputItem::text_message(ItemRole::Assistant, "first answer")],
            )
            .await
            .unwrap_or_else(|e| unreachable!("{e}"));

        let current = vec![InputItem::text_message(ItemRole::User, "follow-up")];
        let merged = build_replay_input(&store, Some("resp_1"), current)
            .await
            .unwrap_or_else(|e| unreachable!("{e}"));
        assert_eq!(merged.len(), 3);
    }

    #[tokio::test]
    async fn build_replay_input_missing_previous_response_errors() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| unreachable!("{e}"));
        let store = ItemStore::open(dir.path().join("i.db").to_str().unwrap_or_default())
            .unwrap_or_else(|e| unreachable!("{e}"));
        let result = build_replay_input(&store, Some("nope"), vec![]).await;
        assert!(matches!(result, Err(OrchestratorError::PreviousResponseNotFound(_))));
    }

    #[test]
    fn strips_image_generation_function_call_output() {
        let items = vec![
            InputItem::FunctionCall {
                call_id: "call_1".to_string(),
                name: "image_generation".to_string(),
                arguments: "{}".to_string(),
            },
            InputItem::FunctionCallOutput {
                call_id: "call_1".to_string(),
                output: png_base64(200_000),
            },
        ];
        let stripped = strip_images(items);
        match &stripped[1] {
            InputItem::FunctionCallOutput { output, .. } => assert_eq!(output, "<PNG>..."),
            other => unreachable!("expected FunctionCallOutput, got {other:?}"),
        }
    }

    #[test]
    fn leaves_non_image_function_call_output_untouched() {
        let items = vec![
            InputItem::FunctionCall {
                call_id: "call_1".to_string(),
                name: "file_search".to_string(),
                arguments: "{}".to_string(),
            },
            InputItem::FunctionCallOutput {
                call_id: "call_1".to_string(),
                output: "found: X".to_string(),
            },
        ];
        let stripped = strip_images(items.clone());
        assert_eq!(stripped, items);
    }

    #[test]
    fn strips_output_image_content_part() {
        let items = vec![InputItem::Message {
            role: ItemRole::Assistant,
            content: vec![ContentPart::OutputImage { data: "deadbeef".to_string() }],
        }];
        let stripped = strip_images(items);
        match &stripped[0] {
            InputItem::Message { content, .. } => {
                assert_eq!(content[0], ContentPart::OutputImage { data: "<image>...".to_string() });
            }
            other => unreachable!("expected Message, got {other:?}"),
        }
    }

    #[test]
    fn strips_long_text_data_url() {
        let data_url = format!("data:image/png;base64,{}", png_base64(200_000));
        assert!(data_url.len() > IMAGE_SCAN_MIN_LEN);
        let items = vec![InputItem::Message {
            role: ItemRole::User,
            content: vec![ContentPart::InputText { text: data_url }],
        }];
        let stripped = strip_images(items);
        match &stripped[0] {
            InputItem::Message { content, .. } => {
                assert_eq!(content[0], ContentPart::InputText { text: "<PNG>...".to_string() });
            }
            other => unreachable!("expected Message, got {other:?}"),
        }
    }

    #[test]
    fn leaves_ordinary_long_text_untouched() {
        let long_text = "the quick brown fox jumps over the lazy dog. ".repeat(200);
        assert!(long_text.len() > IMAGE_SCAN_MIN_LEN);
        let items = vec![InputItem::Message {
            role: ItemRole::User,
            content: vec![ContentPart::InputText { text: long_text.clone() }],
        }];
        let stripped = strip_images(items);
        match &stripped[0] {
            InputItem::Message { content, .. } => {
                assert_eq!(content[0], ContentPart::InputText { text: long_text });
            }
            other => unreachable!("expected Message, got {other:?}"),
        }
    }

    #[test]
    fn leaves_short_text_untouched_even_if_base64_shaped() {
        let short = png_base64(0);
        assert!(short.len() < IMAGE_SCAN_MIN_LEN);
        let items = vec![InputItem::Message {
            role: ItemRole::User,
            content: vec![ContentPart::InputText { text: short.clone() }],
        }];
        let stripped = strip_images(items);
        match &stripped[0] {
            InputItem::Message { content, .. } => {
                assert_eq!(content[0], ContentPart::InputText { text: short });
            }
            other => unreachable!("expected Message, got {other:?}"),
        }
    }

    #[test]
    fn strip_images_is_idempotent() {
        let items = vec![
            InputItem::FunctionCall {
                call_id: "call_1".to_string(),
                name: "image_generation".to_string(),
                arguments: "{}".to_string(),
            },
            InputItem::FunctionCallOutput {
                call_id: "call_1".to_string(),
                output: png_base64(200_000),
            },
            InputItem::Message {
                role: ItemRole::Assistant,
                content: vec![ContentPart::OutputImage { data: "rawbytes".to_string() }],
            },
        ];
        let once = strip_images(items);
        let twice = strip_images(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn other_fields_preserved_byte_for_byte() {
        let items = vec![InputItem::Reasoning {
            content: "thinking...".to_string(),
        }];
        let stripped = strip_images(items.clone());
        assert_eq!(stripped, items);
    }
}
