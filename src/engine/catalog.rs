//! Attachment catalog: registration, placeholder resolution, and alias
//! lookup for binary artifacts referenced by name in messages and tool
//! arguments.
//!
//! Canonical keys are attachment names (`diagram.png`). Placeholders are the
//! bracketed form of a key (`[diagram.png]`) found in free text or as a
//! whole-string tool argument value.

use std::collections::HashMap;

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

use crate::core::types::{attachment_source, Attachment, Message, MessageSource, TaskState};

/// How a placeholder name resolved against the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Exact,
    CaseInsensitive,
    SeedreamAlias,
    GenericImageAlias,
}

/// The declarative part of a tool result's attachment mutation, separate
/// from the `merged` add/update map the dispatcher assembles across a batch.
#[derive(Debug, Clone, Default)]
pub struct RawMutations {
    /// Full-catalog replacement. When set, the existing catalog is dropped
    /// and rebuilt from this map before `remove`/merge are applied.
    pub replace: Option<HashMap<String, Attachment>>,
    /// Names to delete from the catalog, applied after `replace`.
    pub remove: Option<Vec<String>>,
}

fn seedream_key_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?i)(.+)_(?:[^_]+)_(\d+)(\.[A-Za-z0-9]+)$").unwrap())
}

fn seedream_placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?i)(.+)_(\d+)(\.[A-Za-z0-9]+)$").unwrap())
}

fn generic_image_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?i)image(?:_(\d+))?(\.[A-Za-z0-9]+)?$").unwrap())
}

fn placeholder_scan_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[([^\[\]]+)\]").unwrap())
}

/// Look up a placeholder name against the catalog using the four-tier
/// precedence: exact key, case-insensitive key, seedream alias by newest
/// iteration, generic image alias by position.
pub fn lookup(name: &str, state: &TaskState) -> Option<(Attachment, String, MatchKind)> {
    let name = name.trim();
    if name.is_empty() {
        return None;
    }

    if let Some(att) = state.attachments.get(name) {
        return Some((att.clone(), name.to_string(), MatchKind::Exact));
    }

    let lower = name.to_lowercase();
    if let Some((key, att)) = state
        .attachments
        .iter()
        .find(|(k, _)| k.to_lowercase() == lower)
    {
        return Some((att.clone(), key.clone(), MatchKind::CaseInsensitive));
    }

    if let Some(caps) = seedream_placeholder_re().captures(name) {
        let prefix = caps.get(1).unwrap().as_str().to_lowercase();
        let ext = caps.get(3).unwrap().as_str().to_lowercase();
        let mut best: Option<(&String, &Attachment, u32)> = None;
        for (key, att) in state.attachments.iter() {
            if att.source.as_deref() != Some(attachment_source::SEEDREAM) {
                continue;
            }
            let Some(kc) = seedream_key_re().captures(key) else {
                continue;
            };
            let key_prefix = kc.get(1).unwrap().as_str().to_lowercase();
            let key_ext = kc.get(3).unwrap().as_str().to_lowercase();
            if key_prefix != prefix || key_ext != ext {
                continue;
            }
            let iteration = state.attachment_iterations.get(key).copied().unwrap_or(0);
            if best.map(|(_, _, i)| iteration > i).unwrap_or(true) {
                best = Some((key, att, iteration));
            }
        }
        if let Some((key, att, _)) = best {
            return Some((att.clone(), key.clone(), MatchKind::SeedreamAlias));
        }
    }

    if let Some(caps) = generic_image_re().captures(name) {
        let index: Option<usize> = caps.get(1).and_then(|m| m.as_str().parse().ok());
        let mut images: Vec<(&String, &Attachment)> = state
            .attachments
            .iter()
            .filter(|(_, att)| att.media_type.starts_with("image/"))
            .collect();
        images.sort_by_key(|(key, att)| {
            let is_user_upload = att.source.as_deref() == Some(attachment_source::USER_UPLOAD);
            let iteration = state.attachment_iterations.get(*key).copied().unwrap_or(0);
            (is_user_upload, iteration, (*key).clone())
        });
        let non_uploads: Vec<_> = images
            .iter()
            .filter(|(_, att)| att.source.as_deref() != Some(attachment_source::USER_UPLOAD))
            .collect();
        let pick = match index {
            Some(n) if n >= 1 => non_uploads.get(n - 1).copied(),
            _ => non_uploads.last().copied(),
        };
        if let Some((key, att)) = pick {
            return Some(((*att).clone(), (*key).clone(), MatchKind::GenericImageAlias));
        }
    }

    None
}

/// Register every attachment carried by a message into the catalog, keyed
/// by its trimmed key (falling back to `att.name`). Returns whether any
/// entry changed content or was newly added.
pub fn register_from_message(state: &mut TaskState, msg: &Message) -> bool {
    let mut changed = false;
    for (key, att) in msg.attachments.iter() {
        let key = {
            let trimmed = key.trim();
            if trimmed.is_empty() {
                att.name.trim()
            } else {
                trimmed
            }
        };
        if key.is_empty() {
            continue;
        }
        let mut att = att.clone();
        if att.name.trim().is_empty() {
            att.name = key.to_string();
        }

        let is_new_or_changed = match state.attachments.get(key) {
            Some(existing) => !existing.content_eq(&att),
            None => true,
        };
        if is_new_or_changed {
            let stamp = state.iterations;
            state.attachment_iterations.insert(key.to_string(), stamp);
            state.attachments.insert(key.to_string(), att);
            changed = true;
        }
    }
    changed
}

fn coalesce(source: Option<String>, default_source: &str) -> Option<String> {
    source.or_else(|| Some(default_source.to_string()))
}

/// Apply a batch's combined attachment mutations to the catalog in the
/// fixed order replace -> remove -> merge. Returns whether anything changed.
pub fn apply_mutations(
    state: &mut TaskState,
    merged: HashMap<String, Attachment>,
    mutations: RawMutations,
    default_source: &str,
) -> bool {
    let mut changed = false;
    let stamp = state.iterations;

    if let Some(replacement) = mutations.replace {
        state.attachments = replacement;
        state.attachment_iterations.clear();
        for key in state.attachments.keys() {
            state.attachment_iterations.insert(key.clone(), stamp);
        }
        changed = true;
    }

    if let Some(names) = mutations.remove {
        for name in names {
            let name = name.trim();
            if state.attachments.remove(name).is_some() {
                state.attachment_iterations.remove(name);
                changed = true;
            }
        }
    }

    for (key, mut att) in merged {
        let key = key.trim().to_string();
        if key.is_empty() {
            continue;
        }
        if att.name.trim().is_empty() {
            att.name = key.clone();
        }
        att.source = coalesce(att.source.take(), default_source);

        let is_new_or_changed = match state.attachments.get(&key) {
            Some(existing) => !existing.content_eq(&att),
            None => true,
        };
        if is_new_or_changed {
            state.attachment_iterations.insert(key.clone(), stamp);
            state.attachments.insert(key, att);
            changed = true;
        }
    }

    changed
}

/// Merge attachment mutations parsed from a tool result's metadata, per the
/// dispatcher's per-call pipeline (§4.2): start from the existing catalog
/// snapshot, apply `add` then `update`, then drop `remove` names, yielding
/// the positional `merged` map that [`apply_mutations`] writes in.
pub fn build_merged_map(
    state: &TaskState,
    mutations: &RawMutations,
    add: HashMap<String, Attachment>,
    update: HashMap<String, Attachment>,
) -> HashMap<String, Attachment> {
    let mut merged = mutations
        .replace
        .clone()
        .unwrap_or_else(|| state.attachments.clone());
    merged.extend(add);
    merged.extend(update);
    if let Some(names) = &mutations.remove {
        for name in names {
            merged.remove(name.trim());
        }
    }
    merged
}

/// The reference string a resolved placeholder expands to: the attachment's
/// URI when present, else a synthesized data URI, else empty.
pub fn attachment_reference_value(att: &Attachment) -> String {
    if let Some(uri) = &att.uri {
        return uri.clone();
    }
    if let Some(data) = &att.data {
        return format!("data:{};base64,{}", att.media_type, data);
    }
    String::new()
}

/// Recursively replace whole-string `[name]` placeholders in a JSON value
/// tree with their resolved reference value. Values that don't resolve are
/// left untouched.
pub fn expand_placeholders(args: &Value, state: &TaskState) -> Value {
    match args {
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.len() >= 2 && trimmed.starts_with('[') && trimmed.ends_with(']') {
                let name = &trimmed[1..trimmed.len() - 1];
                if let Some((att, _, _)) = lookup(name, state) {
                    return Value::String(attachment_reference_value(&att));
                }
            }
            args.clone()
        }
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| expand_placeholders(v, state)).collect())
        }
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), expand_placeholders(v, state)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Scan free text for `[name]` placeholders and return the subset of the
/// catalog they resolve to, keyed by canonical attachment name.
pub fn resolve_content(content: &str, state: &TaskState) -> HashMap<String, Attachment> {
    let mut out = HashMap::new();
    for caps in placeholder_scan_re().captures_iter(content) {
        let name = caps.get(1).unwrap().as_str();
        if let Some((att, canonical_key, _)) = lookup(name, state) {
            out.insert(canonical_key, att);
        }
    }
    out
}

/// Finalize the attachment placeholders of a final answer (spec §4.5):
/// resolved `[name]` placeholders become inline markdown image references
/// (`![name](uri)`), unresolved ones are stripped, and any catalog entries
/// left unmentioned are appended as a trailing list. A final answer with no
/// bracket placeholders at all is returned unchanged — there is nothing to
/// ensure. Returns the rewritten answer plus the attachments actually
/// referenced by it (by canonical key), which is what the terminal event's
/// `attachments` map is built from.
pub fn ensure_attachment_placeholders(
    answer: &str,
    state: &TaskState,
) -> (String, HashMap<String, Attachment>) {
    if !placeholder_scan_re().is_match(answer) {
        return (answer.to_string(), HashMap::new());
    }

    let mut rewritten = if state.attachments.is_empty() {
        placeholder_scan_re().replace_all(answer, "").to_string()
    } else {
        placeholder_scan_re()
            .replace_all(answer, |caps: &regex::Captures| {
                let name = caps.get(1).unwrap().as_str();
                match lookup(name, state) {
                    Some((att, _, _)) => {
                        let reference = attachment_reference_value(&att);
                        if reference.is_empty() {
                            String::new()
                        } else {
                            format!("![{}]({})", name, reference)
                        }
                    }
                    None => String::new(),
                }
            })
            .to_string()
    };

    if !state.attachments.is_empty() {
        let mentioned = resolve_content(&rewritten, state);
        let mut unmentioned: Vec<&String> = state
            .attachments
            .keys()
            .filter(|name| !mentioned.contains_key(*name))
            .collect();
        unmentioned.sort();
        if !unmentioned.is_empty() {
            rewritten.push_str("\n\nAttachments available:");
            for name in unmentioned {
                rewritten.push_str(&format!("\n- [{}]", name));
            }
        }
    }

    let referenced = resolve_content(&rewritten, state);
    (rewritten, referenced)
}

fn catalog_listing_text(state: &TaskState) -> String {
    if state.attachments.is_empty() {
        return String::new();
    }
    let mut names: Vec<&String> = state.attachments.keys().collect();
    names.sort();
    let mut lines = vec!["Available attachments:".to_string()];
    for name in names {
        let att = &state.attachments[name];
        lines.push(format!("- [{}] ({})", name, att.media_type));
    }
    lines.join("\n")
}

/// Rebuild the catalog-listing message if the set of attachments changed
/// since the last listing was emitted, replacing any prior listing message.
/// Returns whether the message list changed.
pub fn update_catalog_message(state: &mut TaskState) -> bool {
    let content = catalog_listing_text(state);
    let existing_idx = state
        .messages
        .iter()
        .position(|m| m.is_attachment_catalog_message());

    if content.is_empty() {
        return if let Some(idx) = existing_idx {
            state.messages.remove(idx);
            true
        } else {
            false
        };
    }

    if let Some(idx) = existing_idx {
        if state.messages[idx].content == content {
            return false;
        }
        state.messages.remove(idx);
    }

    let msg = Message::system(content)
        .with_source(MessageSource::ImportantNotice)
        .with_metadata("attachment_catalog", Value::Bool(true));
    state.messages.push(msg);
    true
}
