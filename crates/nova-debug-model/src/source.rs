use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::protocol;
use crate::session::SessionId;

pub const UNKNOWN_SOURCE_LABEL: &str = "Unknown Source";

/// Scheme used for sources whose content is only retrievable from the adapter.
pub const DEBUG_SCHEME: &str = "debug";

/// 1-based, inclusive line/column range.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRange {
    pub start_line: i64,
    pub start_column: i64,
    pub end_line: i64,
    pub end_column: i64,
}

impl SourceRange {
    pub fn new(start_line: i64, start_column: i64, end_line: i64, end_column: i64) -> Self {
        Self {
            start_line,
            start_column,
            end_line,
            end_column,
        }
    }

    pub fn contains_range(&self, other: &SourceRange) -> bool {
        if other.start_line < self.start_line || other.end_line < self.start_line {
            return false;
        }
        if other.start_line > self.end_line || other.end_line > self.end_line {
            return false;
        }
        if other.start_line == self.start_line && other.start_column < self.start_column {
            return false;
        }
        if other.end_line == self.end_line && other.end_column > self.end_column {
            return false;
        }
        true
    }

    /// Number of lines spanned, used to rank nested scopes.
    pub fn line_extent(&self) -> i64 {
        self.end_line - self.start_line
    }
}

/// Client view of a DAP `Source`.
///
/// Sources are shared between all frames of a session that point at the same uri, so
/// marking one unavailable affects every frame showing it.
#[derive(Debug)]
pub struct Source {
    raw: Mutex<protocol::Source>,
    uri: String,
    in_memory: bool,
    available: AtomicBool,
}

impl Source {
    pub fn new(raw: Option<&protocol::Source>, session_id: &SessionId) -> Self {
        let raw = match raw {
            Some(raw) => raw.clone(),
            None => protocol::Source {
                name: Some(UNKNOWN_SOURCE_LABEL.to_string()),
                ..protocol::Source::default()
            },
        };
        let available = raw.name.as_deref() != Some(UNKNOWN_SOURCE_LABEL);
        let (uri, in_memory) = source_uri(&raw, session_id);

        Self {
            raw: Mutex::new(raw),
            uri,
            in_memory,
            available: AtomicBool::new(available),
        }
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn in_memory(&self) -> bool {
        self.in_memory
    }

    pub fn name(&self) -> String {
        let raw = self.raw.lock();
        raw.name
            .clone()
            .or_else(|| raw.path.as_deref().map(basename).map(str::to_string))
            .unwrap_or_else(|| UNKNOWN_SOURCE_LABEL.to_string())
    }

    pub fn raw(&self) -> protocol::Source {
        self.raw.lock().clone()
    }

    pub fn presentation_hint(&self) -> Option<String> {
        self.raw.lock().presentation_hint.clone()
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Relaxed)
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Relaxed);
    }

    /// Fold a newer report for the same uri into this source. The presentation hint
    /// always follows the latest report, even when it is absent.
    pub fn merge(&self, raw: &protocol::Source) {
        let mut current = self.raw.lock();
        if raw.name.is_some() {
            current.name = raw.name.clone();
        }
        if raw.path.is_some() {
            current.path = raw.path.clone();
        }
        if raw.source_reference.is_some() {
            current.source_reference = raw.source_reference;
        }
        if raw.origin.is_some() {
            current.origin = raw.origin.clone();
        }
        if raw.adapter_data.is_some() {
            current.adapter_data = raw.adapter_data.clone();
        }
        current.presentation_hint = raw.presentation_hint.clone();
    }
}

/// Sources of one session, deduplicated by uri.
#[derive(Debug, Default)]
pub struct SourceRegistry {
    sources: Mutex<HashMap<String, Arc<Source>>>,
}

impl SourceRegistry {
    /// The shared source for `raw`'s uri, merging `raw` into an existing entry.
    pub fn get_or_insert(&self, raw: Option<&protocol::Source>, session_id: &SessionId) -> Arc<Source> {
        let source = Source::new(raw, session_id);
        let mut sources = self.sources.lock();
        if let Some(existing) = sources.get(source.uri()) {
            if let Some(raw) = raw {
                existing.merge(raw);
            }
            return existing.clone();
        }
        let source = Arc::new(source);
        sources.insert(source.uri().to_string(), source.clone());
        source
    }

    pub fn get(&self, uri: &str) -> Option<Arc<Source>> {
        self.sources.lock().get(uri).cloned()
    }

    /// Mark the source with `uri` unavailable; returns whether one was known.
    pub fn mark_unavailable(&self, uri: &str) -> bool {
        match self.sources.lock().get(uri) {
            Some(source) => {
                source.set_available(false);
                true
            }
            None => false,
        }
    }
}

fn source_uri(raw: &protocol::Source, session_id: &SessionId) -> (String, bool) {
    let reference = raw.source_reference.filter(|r| *r > 0);
    if let (Some(path), None) = (raw.path.as_deref(), reference) {
        let uri = Url::from_file_path(path)
            .map(|url| url.to_string())
            .unwrap_or_else(|()| path.to_string());
        return (uri, false);
    }

    let label = raw
        .path
        .as_deref()
        .or(raw.name.as_deref())
        .unwrap_or(UNKNOWN_SOURCE_LABEL);
    let mut uri = format!("{DEBUG_SCHEME}:{label}");
    if let Ok(mut url) = Url::parse(&format!("{DEBUG_SCHEME}:")) {
        url.set_path(label);
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("session", session_id.as_str());
            if let Some(reference) = reference {
                query.append_pair("ref", &reference.to_string());
            }
        }
        uri = url.to_string();
    }
    (uri, true)
}

/// Last path segment of a path or uri, or its authority when the path is empty.
pub fn basename(path: &str) -> &str {
    let trimmed = path.trim_end_matches(['/', '\\']);
    trimmed
        .rsplit(['/', '\\'])
        .next()
        .filter(|segment| !segment.is_empty())
        .unwrap_or(trimmed)
}
