use super::{check_identifier, ColumnType, SqlCompiler, SqlSchema, SqlValue};
use crate::backend::FilterBackend;
use crate::errors::FilterError;
use crate::operators::Operator;
use crate::parser::parse_query;
use crate::types::{CompoundExpression, Condition, Scalar};
use serde_json::{json, Value};

fn compile(query: Value) -> (String, Vec<SqlValue>) {
    compile_with(&SqlCompiler::default(), query)
}

fn compile_with(compiler: &SqlCompiler, query: Value) -> (String, Vec<SqlValue>) {
    compiler.convert(&parse_query(&query).unwrap()).unwrap()
}

fn text(s: &str) -> SqlValue {
    SqlValue::String(s.to_string())
}

const TAGS_EXISTS: &str =
    "EXISTS (SELECT 1 FROM json_each(documents.metadata, '$.tags') AS elem WHERE elem.value = ?)";

#[test]
fn test_empty_expression_is_tautology() {
    let (sql, params) = SqlCompiler::default()
        .convert(&CompoundExpression::match_all())
        .unwrap();
    assert_eq!(sql, "1=1");
    assert!(params.is_empty());
}

#[test]
fn test_empty_or_matches_nothing() {
    let (sql, params) = SqlCompiler::default()
        .convert(&CompoundExpression::or(vec![]))
        .unwrap();
    assert_eq!(sql, "1=0");
    assert!(params.is_empty());
}

#[test]
fn test_channel_scenario() {
    let (sql, params) = compile(json!({"$and": [
        {"channel_id": {"$in": ["general", "alerts"]}},
        {"$or": [{"priority": {"$gte": 7}}, {"tags": {"$contains": "urgent"}}]},
        {"processed": {"$ne": true}}
    ]}));
    assert_eq!(
        sql,
        format!(
            "channel_id IN (?, ?) AND (CAST(json_extract(metadata, '$.priority') AS REAL) >= ? \
             OR {}) AND processed IS NOT ?",
            TAGS_EXISTS
        )
    );
    assert_eq!(
        params,
        vec![
            text("general"),
            text("alerts"),
            SqlValue::Integer(7),
            text("urgent"),
            SqlValue::Integer(1),
        ]
    );
}

#[test]
fn test_placeholders_align_with_params() {
    let channels: Vec<String> = (0..5).map(|i| format!("c{}", i)).collect();
    let (sql, params) = compile(json!({
        "channel_id": {"$in": channels},
        "score": {"$between": [0.25, 0.75]},
        "$or": [{"lang": "en"}, {"lang": "de"}]
    }));
    assert_eq!(sql.matches('?').count(), params.len());
    assert_eq!(params.len(), 5 + 4);

    let mut expected: Vec<SqlValue> = (0..5).map(|i| text(&format!("c{}", i))).collect();
    expected.extend([
        SqlValue::Float(0.25),
        SqlValue::Float(0.75),
        text("en"),
        text("de"),
    ]);
    assert_eq!(params, expected);
}

#[test]
fn test_single_equality() {
    let (sql, params) = compile(json!({"priority": 5}));
    assert_eq!(sql, "CAST(json_extract(metadata, '$.priority') AS REAL) = ?");
    assert_eq!(params, vec![SqlValue::Integer(5)]);
}

#[test]
fn test_equality_on_direct_columns() {
    let (sql, params) = compile(json!({"channel_id": "general", "processed": false}));
    assert_eq!(sql, "channel_id = ? AND processed = ?");
    assert_eq!(params, vec![text("general"), SqlValue::Integer(0)]);

    let (sql, _) = compile(json!({"timestamp": {"$gt": 1700000000}}));
    assert_eq!(sql, "timestamp > ?");
}

#[test]
fn test_equality_with_null() {
    let (sql, params) = compile(json!({"deleted_at": null}));
    assert_eq!(
        sql,
        "COALESCE(json_type(metadata, '$.deleted_at'), 'null') = 'null'"
    );
    assert!(params.is_empty());

    let (sql, _) = compile(json!({"deleted_at": {"$ne": null}}));
    assert_eq!(
        sql,
        "COALESCE(json_type(metadata, '$.deleted_at'), 'null') != 'null'"
    );
}

#[test]
fn test_equality_with_composite_value() {
    let (sql, params) = compile(json!({"labels": ["a", "b"]}));
    assert_eq!(sql, "json_extract(metadata, '$.labels') = json(?)");
    assert_eq!(params, vec![text(r#"["a","b"]"#)]);
}

#[test]
fn test_negated_equality_is_two_valued() {
    let (sql, params) = compile(json!({"author": {"$ne": "bob"}}));
    assert_eq!(sql, "json_extract(metadata, '$.author') IS NOT ?");
    assert_eq!(params, vec![text("bob")]);
}

#[test]
fn test_nested_path() {
    let (sql, _) = compile(json!({"author.name": "alice", "items.0.sku": "x-1"}));
    assert_eq!(
        sql,
        "json_extract(metadata, '$.author.name') = ? \
         AND json_extract(metadata, '$.items[0].sku') = ?"
    );
}

#[test]
fn test_negated_comparison_is_coalesced() {
    let (sql, _) = compile(json!({"$not": {"priority": {"$lt": 3}}}));
    assert_eq!(
        sql,
        "NOT COALESCE(CAST(json_extract(metadata, '$.priority') AS REAL) < ?, 0)"
    );
}

#[test]
fn test_not_over_compound() {
    let (sql, params) = compile(json!({"$not": {"a": 1, "b": "x"}}));
    assert_eq!(
        sql,
        "NOT COALESCE(CAST(json_extract(metadata, '$.a') AS REAL) = ? \
         AND json_extract(metadata, '$.b') = ?, 0)"
    );
    assert_eq!(params, vec![SqlValue::Integer(1), text("x")]);
}

#[test]
fn test_in_and_nin() {
    let (sql, params) = compile(json!({"priority": {"$in": [1, 2.5]}}));
    assert_eq!(sql, "CAST(json_extract(metadata, '$.priority') AS REAL) IN (?, ?)");
    assert_eq!(params, vec![SqlValue::Integer(1), SqlValue::Float(2.5)]);

    let (sql, _) = compile(json!({"lang": {"$nin": ["en", "de"]}}));
    assert_eq!(
        sql,
        "NOT COALESCE(json_extract(metadata, '$.lang') IN (?, ?), 0)"
    );
}

#[test]
fn test_empty_in_and_nin() {
    assert_eq!(compile(json!({"lang": {"$in": []}})).0, "1=0");
    assert_eq!(compile(json!({"lang": {"$nin": []}})).0, "1=1");
}

#[test]
fn test_contains_on_json_array() {
    let (sql, params) = compile(json!({"tags": {"$contains": "urgent"}}));
    assert_eq!(sql, TAGS_EXISTS);
    assert_eq!(params, vec![text("urgent")]);

    let (sql, _) = compile(json!({"tags": {"$not_contains": "urgent"}}));
    assert_eq!(sql, format!("NOT ({})", TAGS_EXISTS));
}

#[test]
fn test_contains_on_text_column_escapes_wildcards() {
    let (sql, params) = compile(json!({"content": {"$contains": "50%_off"}}));
    assert_eq!(sql, "content LIKE ? ESCAPE '\\'");
    assert_eq!(params, vec![text("%50\\%\\_off%")]);

    let (sql, _) = compile(json!({"content": {"$not_contains": "spam"}}));
    assert_eq!(sql, "NOT COALESCE(content LIKE ? ESCAPE '\\', 0)");
}

#[test]
fn test_contains_on_non_text_column() {
    let tree = parse_query(&json!({"timestamp": {"$contains": 5}})).unwrap();
    assert!(matches!(
        SqlCompiler::default().convert(&tree),
        Err(FilterError::InvalidFilter { .. })
    ));
}

#[test]
fn test_all_expands_per_element() {
    let (sql, params) = compile(json!({"tags": {"$all": ["a", "b"]}}));
    assert_eq!(sql, format!("({} AND {})", TAGS_EXISTS, TAGS_EXISTS));
    assert_eq!(params, vec![text("a"), text("b")]);

    assert_eq!(compile(json!({"tags": {"$all": []}})).0, "1=1");
}

#[test]
fn test_size() {
    let (sql, params) = compile(json!({"tags": {"$size": 2}}));
    assert_eq!(
        sql,
        "(json_type(metadata, '$.tags') = 'array' AND json_array_length(metadata, '$.tags') = ?)"
    );
    assert_eq!(params, vec![SqlValue::Integer(2)]);

    let tree = parse_query(&json!({"content": {"$size": 2}})).unwrap();
    assert!(SqlCompiler::default().convert(&tree).is_err());
}

#[test]
fn test_exists_and_null() {
    let present = "COALESCE(json_type(metadata, '$.source'), 'null') != 'null'";
    let missing = "COALESCE(json_type(metadata, '$.source'), 'null') = 'null'";
    assert_eq!(compile(json!({"source": {"$exists": true}})).0, present);
    assert_eq!(compile(json!({"source": {"$exists": false}})).0, missing);
    assert_eq!(compile(json!({"source": {"$null": true}})).0, missing);
    assert_eq!(compile(json!({"source": {"$null": false}})).0, present);
    assert_eq!(compile(json!({"channel_id": {"$exists": true}})).0, "channel_id IS NOT NULL");
}

#[test]
fn test_empty() {
    let (sql, params) = compile(json!({"tags": {"$empty": true}}));
    assert!(sql.starts_with("(COALESCE(json_type(metadata, '$.tags'), 'null') = 'null' OR "));
    assert!(sql.contains("json_array_length(metadata, '$.tags') = 0"));
    assert!(sql.contains("json_extract(metadata, '$.tags') = ''"));
    assert!(params.is_empty());

    let (negated, _) = compile(json!({"tags": {"$empty": false}}));
    assert_eq!(negated, format!("NOT {}", sql));

    assert_eq!(
        compile(json!({"content": {"$empty": true}})).0,
        "(content IS NULL OR content = '')"
    );
}

#[test]
fn test_between() {
    let (sql, params) = compile(json!({"priority": {"$between": [3, 8]}}));
    assert_eq!(
        sql,
        "CAST(json_extract(metadata, '$.priority') AS REAL) BETWEEN ? AND ?"
    );
    assert_eq!(params, vec![SqlValue::Integer(3), SqlValue::Integer(8)]);
}

#[test]
fn test_regex_requires_opt_in() {
    let tree = parse_query(&json!({"content": {"$regex": "^urgent"}})).unwrap();
    assert_eq!(
        SqlCompiler::default().convert(&tree),
        Err(FilterError::UnsupportedOperator {
            backend: "relational",
            operator: Operator::Regex,
        })
    );

    let compiler = SqlCompiler::new(SqlSchema::default().with_regexp(true));
    let (sql, params) = compiler.convert(&tree).unwrap();
    assert_eq!(sql, "content REGEXP ?");
    assert_eq!(params, vec![text("^urgent")]);
}

#[test]
fn test_unsupported_operator_fails_before_output() {
    let tree = parse_query(&json!({"$and": [
        {"a": 1},
        {"$or": [{"b": 2}, {"$not": {"c": {"$regex": "x"}}}]}
    ]}))
    .unwrap();
    assert!(matches!(
        SqlCompiler::default().convert(&tree),
        Err(FilterError::UnsupportedOperator { .. })
    ));
}

#[test]
fn test_text_search() {
    let (sql, params) = compile(json!({"content": {"$text": "release notes"}}));
    assert_eq!(sql, "content LIKE ? ESCAPE '\\'");
    assert_eq!(params, vec![text("%release notes%")]);

    let schema = SqlSchema::default().with_fts_table("documents_fts").unwrap();
    let (sql, params) = compile_with(
        &SqlCompiler::new(schema),
        json!({"content": {"$text": "release notes"}}),
    );
    assert_eq!(
        sql,
        "documents.rowid IN (SELECT rowid FROM documents_fts WHERE documents_fts MATCH ?)"
    );
    assert_eq!(params, vec![text("\"release notes\"")]);
}

#[test]
fn test_text_search_is_one_literal_phrase() {
    let schema = SqlSchema::default().with_fts_table("documents_fts").unwrap();
    let compiler = SqlCompiler::new(schema);
    let phrase = |query: &str| compile_with(&compiler, json!({"content": {"$text": query}})).1;
    assert_eq!(phrase("alert OR lunch"), vec![text("\"alert OR lunch\"")]);
    assert_eq!(phrase("node-3"), vec![text("\"node-3\"")]);
    assert_eq!(phrase(r#"say "hi""#), vec![text(r#""say ""hi""""#)]);
}

#[test]
fn test_custom_schema() {
    let schema = SqlSchema::new("events", "payload")
        .unwrap()
        .with_column("kind", "event_kind", ColumnType::Text)
        .unwrap()
        .with_column("attrs", "attributes", ColumnType::Json)
        .unwrap();
    let compiler = SqlCompiler::new(schema);

    let (sql, _) = compile_with(
        &compiler,
        json!({"kind": "click", "attrs.color": "red", "attrs": {"$size": 3}, "user": "u1"}),
    );
    assert_eq!(
        sql,
        "event_kind = ? AND json_extract(attributes, '$.color') = ? \
         AND (json_type(attributes, '$') = 'array' AND json_array_length(attributes, '$') = ?) \
         AND json_extract(payload, '$.user') = ?"
    );
}

#[test]
fn test_nested_path_on_plain_column() {
    let tree = parse_query(&json!({"channel_id.name": "x"})).unwrap();
    assert!(matches!(
        SqlCompiler::default().convert(&tree),
        Err(FilterError::InvalidFilter { .. })
    ));
}

#[test]
fn test_identifiers_are_checked() {
    assert!(check_identifier("documents").is_ok());
    assert!(check_identifier("_fts2").is_ok());
    assert!(check_identifier("").is_err());
    assert!(check_identifier("2fast").is_err());
    assert!(check_identifier("docs; DROP TABLE x").is_err());
    assert!(SqlSchema::new("docs", "meta-data").is_err());
    assert!(SqlSchema::default().with_fts_table("fts'").is_err());
}

#[test]
fn test_handcrafted_negated_condition() {
    let condition =
        Condition::new("lang", Operator::Ne, Scalar::String("en".into()).into()).negate();
    let tree = CompoundExpression::and(vec![condition.into()]);
    let (sql, _) = SqlCompiler::default().convert(&tree).unwrap();
    assert_eq!(sql, "json_extract(metadata, '$.lang') = ?");
}

#[test]
fn test_compiler_shared_across_threads() {
    let compiler = std::sync::Arc::new(SqlCompiler::default());
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let compiler = compiler.clone();
            std::thread::spawn(move || {
                let tree = parse_query(&json!({"priority": {"$in": [i, i + 1]}})).unwrap();
                compiler.convert(&tree).unwrap()
            })
        })
        .collect();
    for (i, handle) in handles.into_iter().enumerate() {
        let (_, params) = handle.join().unwrap();
        let i = i as i64;
        assert_eq!(params, vec![SqlValue::Integer(i), SqlValue::Integer(i + 1)]);
    }
}
