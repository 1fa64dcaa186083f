//! Dotted/bracketed path extraction over untyped JSON.
//!
//! Adapter descriptors locate response fields with string paths such as
//! `choices[0].message.content` or `usage.prompt_tokens`. Wire responses
//! are deliberately kept as [`serde_json::Value`] and walked with these
//! paths; modeling them as named structs would defeat the descriptor's
//! schema polymorphism.
//!
//! Usage totals may be arithmetic sums across paths, e.g.
//! `"usage.input_tokens + usage.output_tokens"`; see [`eval_sum`].

use serde_json::Value;

/// Resolve a dotted/bracketed path against a JSON value.
///
/// Each dot-separated segment may carry any number of `[index]` suffixes:
/// `choices[0].message.content`, `data[0].embedding`, `a[1][2].b`.
/// Returns `None` as soon as any step is missing or of the wrong shape.
pub fn extract<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.') {
        let (key, indices) = split_indices(segment)?;
        if !key.is_empty() {
            current = current.get(key)?;
        }
        for idx in indices {
            current = current.get(idx)?;
        }
    }
    Some(current)
}

/// Split `"choices[0]"` into `("choices", [0])`. A bare `"[0]"` yields an
/// empty key, which indexes the current value directly.
fn split_indices(segment: &str) -> Option<(&str, Vec<usize>)> {
    match segment.find('[') {
        None => Some((segment, Vec::new())),
        Some(first) => {
            let key = &segment[..first];
            let mut indices = Vec::new();
            let mut rest = &segment[first..];
            while let Some(stripped) = rest.strip_prefix('[') {
                let close = stripped.find(']')?;
                indices.push(stripped[..close].parse().ok()?);
                rest = &stripped[close + 1..];
            }
            if rest.is_empty() {
                Some((key, indices))
            } else {
                None
            }
        }
    }
}

/// Extract a string at `path`.
pub fn extract_str<'a>(value: &'a Value, path: &str) -> Option<&'a str> {
    extract(value, path).and_then(Value::as_str)
}

/// Extract a non-negative integer at `path`. Numeric strings are
/// accepted; some gateways quote their token counts.
pub fn extract_u64(value: &Value, path: &str) -> Option<u64> {
    let found = extract(value, path)?;
    match found {
        Value::Number(n) => n.as_u64().or_else(|| n.as_f64().map(|f| f as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Evaluate a usage path expression.
///
/// An expression containing `+` is split on it and each operand resolved
/// independently; missing operands count as zero. A plain path resolves
/// the same way, so an absent field yields 0 rather than an error.
pub fn eval_sum(value: &Value, expression: &str) -> u64 {
    expression
        .split('+')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| extract_u64(value, p).unwrap_or(0))
        .sum()
}
