//! Pure analysis routines run inside the nucleotide module
//!
//! Nothing here knows about workers; the module calls these functions on its
//! own thread.

use serde_json::{json, Value};

use crate::qc::QcConfig;
use crate::types::{AnalysisResult, Delimiter, SequenceRecord, Substitution};

const TABLE_COLUMNS: [&str; 8] = [
    "index",
    "seqName",
    "qcStatus",
    "qcScore",
    "totalSubstitutions",
    "substitutions",
    "totalMissing",
    "gcContent",
];

fn is_base(nuc: char) -> bool {
    matches!(nuc, 'A' | 'C' | 'G' | 'T')
}

/// Compare `record` position-wise against `reference`
///
/// Only unambiguous bases on both sides count as substitutions. `N` counts as
/// missing anywhere in the query; gaps are ignored.
pub fn analyze(reference: &str, record: &SequenceRecord, qc: &QcConfig) -> AnalysisResult {
    let mut substitutions = Vec::new();
    for (i, (ref_nuc, query_nuc)) in reference.chars().zip(record.sequence.chars()).enumerate() {
        if is_base(ref_nuc) && is_base(query_nuc) && ref_nuc != query_nuc {
            substitutions.push(Substitution {
                position: i + 1,
                ref_nuc,
                query_nuc,
            });
        }
    }

    let mut missing = 0;
    let mut bases = 0;
    let mut gc = 0;
    for nuc in record.sequence.chars() {
        match nuc {
            'N' => missing += 1,
            'G' | 'C' => {
                gc += 1;
                bases += 1;
            }
            'A' | 'T' => bases += 1,
            _ => {}
        }
    }
    let gc_content = if bases == 0 {
        0.0
    } else {
        gc as f64 / bases as f64
    };

    let qc_score = qc.score(missing, substitutions.len());
    AnalysisResult {
        index: record.index,
        name: record.name.clone(),
        missing,
        gc_content,
        length_difference: record.sequence.len() as i64 - reference.len() as i64,
        qc_status: qc.status(qc_score),
        qc_score,
        substitutions,
    }
}

fn escape(field: &str, delimiter: char) -> String {
    if field.contains(delimiter) || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Render results as a delimited table with a header row
///
/// Rows are sorted by input index. Fields containing the delimiter, quotes or
/// newlines are quoted.
pub fn serialize_table(results: &[AnalysisResult], delimiter: Delimiter) -> String {
    let sep = delimiter.as_char();
    let mut sorted: Vec<&AnalysisResult> = results.iter().collect();
    sorted.sort_by_key(|r| r.index);

    let mut out = TABLE_COLUMNS.join(&sep.to_string());
    out.push('\n');

    for result in sorted {
        let substitutions = result
            .substitutions
            .iter()
            .map(Substitution::to_string)
            .collect::<Vec<_>>()
            .join(" ");
        let row = [
            result.index.to_string(),
            escape(&result.name, sep),
            result.qc_status.to_string(),
            format!("{:.2}", result.qc_score),
            result.substitutions.len().to_string(),
            substitutions,
            result.missing.to_string(),
            format!("{:.4}", result.gc_content),
        ];
        out.push_str(&row.join(&sep.to_string()));
        out.push('\n');
    }
    out
}

/// Attach every result as a leaf under the root of `tree`
///
/// Returns `None` if the tree root is not a JSON object or its `children` is
/// not an array.
pub fn attach_results(mut tree: Value, results: &[AnalysisResult]) -> Option<Value> {
    let root = tree.as_object_mut()?;
    let children = root
        .entry("children")
        .or_insert_with(|| Value::Array(Vec::new()))
        .as_array_mut()?;

    for result in results {
        children.push(json!({
            "name": result.name,
            "nodeAttrs": {
                "newNode": true,
                "qcStatus": result.qc_status,
                "totalSubstitutions": result.substitutions.len(),
                "totalMissing": result.missing,
            },
        }));
    }
    Some(tree)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::QcStatus;

    fn record(index: usize, name: &str, sequence: &str) -> SequenceRecord {
        SequenceRecord {
            index,
            name: name.into(),
            sequence: sequence.into(),
        }
    }

    #[test]
    fn test_analyze_counts_differences() {
        let result = analyze("ACGTACGT", &record(0, "q", "ACCTNCGTAA"), &QcConfig::default());

        assert_eq!(
            result.substitutions,
            vec![Substitution {
                position: 3,
                ref_nuc: 'G',
                query_nuc: 'C'
            }]
        );
        assert_eq!(result.missing, 1);
        assert_eq!(result.length_difference, 2);
        assert_eq!(result.qc_score, 2.0);
        assert_eq!(result.qc_status, QcStatus::Good);
        // 4 of the 9 unambiguous bases are G or C
        assert!((result.gc_content - 4.0 / 9.0).abs() < 1e-9);
    }

    #[test]
    fn test_analyze_flags_bad_sequences() {
        let query = "N".repeat(120);
        let result = analyze(&"A".repeat(120), &record(0, "q", &query), &QcConfig::default());
        assert_eq!(result.qc_status, QcStatus::Bad);
        assert_eq!(result.gc_content, 0.0);
    }

    #[test]
    fn test_serialize_table_orders_and_escapes() {
        let qc = QcConfig::default();
        let results = vec![
            analyze("AAAA", &record(1, "second", "AAAT"), &qc),
            analyze("AAAA", &record(0, "first, with comma", "AAAA"), &qc),
        ];

        let table = serialize_table(&results, Delimiter::Comma);
        let lines: Vec<_> = table.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("index,seqName,qcStatus"));
        assert!(lines[1].starts_with("0,\"first, with comma\",good"));
        assert!(lines[2].contains("A4T"));
    }

    #[test]
    fn test_attach_results_adds_leaves() {
        let qc = QcConfig::default();
        let results = vec![analyze("AA", &record(0, "leaf", "AT"), &qc)];
        let tree = json!({"name": "root", "children": [{"name": "existing"}]});

        let tree = attach_results(tree, &results).unwrap();
        let children = tree["children"].as_array().unwrap();
        assert_eq!(children.len(), 2);
        assert_eq!(children[1]["name"], "leaf");
        assert_eq!(children[1]["nodeAttrs"]["totalSubstitutions"], 1);

        assert!(attach_results(json!([1, 2]), &results).is_none());
        assert!(attach_results(json!({"children": 3}), &results).is_none());
    }
}
