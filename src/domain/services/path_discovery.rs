//! Legacy URL discovery inside arbitrary JSON payloads
//!
//! Walks the payload with an explicit work stack instead of recursion so that
//! hostile or accidentally deep documents cannot exhaust the call stack.

use serde_json::Value;
use tracing::warn;

use crate::domain::document::DiscoveredUrl;

/// Finds every string leaf that contains the legacy host marker
#[derive(Debug, Clone)]
pub struct PathDiscovery {
    marker: String,
    max_depth: usize,
}

/// Outcome of walking one payload
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Discovery {
    pub urls: Vec<DiscoveredUrl>,
    /// Containers past the depth bound that were not expanded
    pub truncated: usize,
    /// Matching leaves under an empty key or a key containing `.`; their
    /// dotted path would resolve to a different field
    pub unaddressable: usize,
}

impl Discovery {
    /// Every legacy URL in the payload was found and can be written back
    pub fn is_complete(&self) -> bool {
        self.truncated == 0 && self.unaddressable == 0
    }
}

struct Frame<'a> {
    value: &'a Value,
    path: String,
    depth: usize,
    addressable: bool,
}

impl PathDiscovery {
    pub fn new(marker: impl Into<String>, max_depth: usize) -> Self {
        Self {
            marker: marker.into(),
            max_depth,
        }
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    /// Discover legacy URLs under `value`, yielding paths joined onto `path_prefix`.
    ///
    /// Results follow depth-first traversal order: sequences by index,
    /// mappings by key in insertion order.
    pub fn discover(&self, value: &Value, path_prefix: &str) -> Discovery {
        let mut discovery = Discovery::default();
        let mut stack = vec![Frame {
            value,
            path: path_prefix.to_string(),
            depth: 0,
            addressable: true,
        }];

        while let Some(frame) = stack.pop() {
            match frame.value {
                Value::Array(items) => {
                    if frame.depth >= self.max_depth {
                        discovery.truncated += 1;
                        continue;
                    }
                    // Reverse push keeps pop order equal to natural order
                    for (index, item) in items.iter().enumerate().rev() {
                        stack.push(Frame {
                            value: item,
                            path: join_path(&frame.path, &index.to_string()),
                            depth: frame.depth + 1,
                            addressable: frame.addressable,
                        });
                    }
                }
                Value::Object(map) => {
                    if frame.depth >= self.max_depth {
                        discovery.truncated += 1;
                        continue;
                    }
                    for (key, item) in map.iter().rev() {
                        stack.push(Frame {
                            value: item,
                            path: join_path(&frame.path, key),
                            depth: frame.depth + 1,
                            addressable: frame.addressable && is_addressable_key(key),
                        });
                    }
                }
                Value::String(text) if text.contains(self.marker.as_str()) => {
                    if frame.addressable {
                        discovery.urls.push(DiscoveredUrl {
                            path: frame.path,
                            url: text.clone(),
                        });
                    } else {
                        discovery.unaddressable += 1;
                    }
                }
                _ => {}
            }
        }

        if discovery.truncated > 0 {
            warn!(
                "Path discovery skipped {} containers nested deeper than {} levels",
                discovery.truncated, self.max_depth
            );
        }
        if discovery.unaddressable > 0 {
            warn!(
                "Path discovery found {} legacy URLs under keys that cannot be addressed by path",
                discovery.unaddressable
            );
        }

        discovery
    }
}

fn is_addressable_key(key: &str) -> bool {
    !key.is_empty() && !key.contains('.')
}

fn join_path(prefix: &str, segment: &str) -> String {
    if prefix.is_empty() {
        segment.to_string()
    } else {
        format!("{prefix}.{segment}")
    }
}
