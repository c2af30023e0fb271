//! Operator schema versions
//!
//! Every node is bound to the schema revision ("since version") that was in
//! force for its domain's imported opset. A revision stays in force until the
//! next revision of the same operator, so a node covers the half-open version
//! range `[since, next)`.
//!
//! | Operator | Revisions |
//! |----------|-----------|
//! | Conv / ConvTranspose | 1, 11, 22 |
//! | BatchNormalization | 1, 6, 7, 9, 14, 15 |
//! | Add / Sub / Mul / Div | 1, 6, 7, 13, 14 |
//! | Relu | 1, 6, 13, 14 |
//! | Identity | 1, 13, 14, 16, 19, 21, 23 |
//! | If / Loop | 1, 11, 13, 16, 19, 21, 23 |
//!
//! The table lists revisions up to opset 23. A tabulated operator imported
//! at a newer opset binds to its last listed revision, whose range is open
//! ended. Operators missing from the table get a degenerate range: they only
//! cover the exact version they were resolved to.

use rustc_hash::FxHashMap;

/// Default (ai.onnx) domain, stored as the empty string
pub const ONNX_DOMAIN: &str = "";

/// Alias for the default domain accepted in records
pub const ONNX_DOMAIN_ALIAS: &str = "ai.onnx";

/// Maps domain → imported opset version
pub type OpsetMap = FxHashMap<String, i64>;

/// Known schema revisions of default-domain operators, ascending
const ONNX_REVISIONS: &[(&str, &[i64])] = &[
    ("Add", &[1, 6, 7, 13, 14]),
    ("BatchNormalization", &[1, 6, 7, 9, 14, 15]),
    ("Conv", &[1, 11, 22]),
    ("ConvTranspose", &[1, 11, 22]),
    ("Div", &[1, 6, 7, 13, 14]),
    ("Identity", &[1, 13, 14, 16, 19, 21, 23]),
    ("If", &[1, 11, 13, 16, 19, 21, 23]),
    ("Loop", &[1, 11, 13, 16, 19, 21, 23]),
    ("Mul", &[1, 6, 7, 13, 14]),
    ("Relu", &[1, 6, 13, 14]),
    ("Scan", &[8, 9, 11, 16, 19, 21, 23]),
    ("Sub", &[1, 6, 7, 13, 14]),
];

/// Normalize a domain name, mapping `ai.onnx` onto the default domain
pub fn normalize_domain(domain: &str) -> &str {
    if domain == ONNX_DOMAIN_ALIAS {
        ONNX_DOMAIN
    } else {
        domain
    }
}

/// Known schema revisions for an operator, if tabulated
pub fn schema_revisions(op_type: &str, domain: &str) -> Option<&'static [i64]> {
    if normalize_domain(domain) != ONNX_DOMAIN {
        return None;
    }
    ONNX_REVISIONS
        .binary_search_by(|(op, _)| (*op).cmp(op_type))
        .ok()
        .map(|idx| ONNX_REVISIONS[idx].1)
}

/// Resolve the since version of an operator under the given imported opset
///
/// Picks the newest tabulated revision not newer than `opset`. Operators that
/// are not tabulated resolve to `opset` itself.
pub fn resolve_since_version(op_type: &str, domain: &str, opset: i64) -> i64 {
    schema_revisions(op_type, domain)
        .and_then(|revs| revs.iter().rev().find(|&&v| v <= opset).copied())
        .unwrap_or(opset)
}

/// Version range `[since, until)` in which a schema revision stays in force
///
/// `until` is `None` when no newer revision is known.
pub fn version_range(op_type: &str, domain: &str, since: i64) -> (i64, Option<i64>) {
    let next = schema_revisions(op_type, domain)
        .and_then(|revs| revs.iter().find(|&&v| v > since).copied());
    (since, next)
}

/// Whether a node bound to `since` covers `version`
pub fn covers_version(op_type: &str, domain: &str, since: i64, version: i64) -> bool {
    match schema_revisions(op_type, domain) {
        Some(_) => {
            let (start, until) = version_range(op_type, domain, since);
            start <= version && until.map_or(true, |u| version < u)
        }
        None => since == version,
    }
}

/// Build an [`OpsetMap`] from a model's opset imports
pub fn opset_map(imports: &[crate::proto::OperatorSetIdProto]) -> OpsetMap {
    imports
        .iter()
        .map(|op| (normalize_domain(&op.domain).to_string(), op.version))
        .collect()
}
