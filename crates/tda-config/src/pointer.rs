//! JSON-pointer leaf walk over a merged config document.

use serde_json::Value;

/// A scalar (or empty array) and the pointer that reaches it.
pub(crate) struct Leaf<'a> {
    pub pointer: String,
    pub value: &'a Value,
}

/// Every leaf of `root` in document order. Arrays are walked by index and an
/// empty array is itself a leaf; an empty object contributes nothing.
pub(crate) fn leaves(root: &Value) -> Vec<Leaf<'_>> {
    let mut out = Vec::new();
    let mut pending: Vec<(String, &Value)> = vec![(String::new(), root)];

    while let Some((path, node)) = pending.pop() {
        let children: Vec<(String, &Value)> = match node {
            Value::Object(map) => map
                .iter()
                .map(|(k, v)| (format!("{path}/{}", escape(k)), v))
                .collect(),
            Value::Array(items) if !items.is_empty() => items
                .iter()
                .enumerate()
                .map(|(i, v)| (format!("{path}/{i}"), v))
                .collect(),
            _ => {
                let pointer = if path.is_empty() { "/".to_string() } else { path };
                out.push(Leaf { pointer, value: node });
                continue;
            }
        };
        // stack: push reversed so the first child is walked first
        pending.extend(children.into_iter().rev());
    }
    out
}

/// Leading "/", no trailing "/" except for the root itself.
pub(crate) fn normalize(p: &str) -> String {
    let body = p.trim().trim_matches('/');
    format!("/{body}")
}

/// "/a/b" covers "/a/b" and "/a/b/c" but not "/a/bc". "/" covers everything.
pub(crate) fn covers(prefix: &str, leaf: &str) -> bool {
    prefix == "/"
        || leaf
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

fn escape(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}
