//! Every query here must select the same documents on both backends.

mod common;

use common::{payload_ids, query_ids, setup_test_db};
use search_filter::FilterEngine;
use serde_json::{json, Value};

fn queries() -> Vec<Value> {
    vec![
        json!({}),
        json!({"channel_id": "alerts"}),
        json!({"channel_id": {"$nin": ["alerts"]}}),
        json!({"processed": false}),
        json!({"processed": {"$ne": true}}),
        json!({"lang": "en"}),
        json!({"lang": {"$ne": "en"}}),
        json!({"lang": {"$in": ["de", "fr"]}}),
        json!({"lang": {"$nin": ["de", "fr"]}}),
        json!({"lang": {"$contains": "en"}}),
        json!({"priority": 7}),
        json!({"priority": {"$gte": 7}}),
        json!({"priority": {"$lt": 7}}),
        json!({"priority": {"$gt": 3, "$lte": 9}}),
        json!({"priority": {"$between": [3, 7]}}),
        json!({"priority": {"$in": [3, 9]}}),
        json!({"priority": {"$nin": [3, 9]}}),
        json!({"score": 0.75}),
        json!({"score": {"$in": [0.5, 0.75]}}),
        json!({"score": {"$ne": 0.5}}),
        json!({"timestamp": {"$gt": "2024-01-15"}}),
        json!({"timestamp": {"$between": ["2024-01-01", "2024-02-01"]}}),
        json!({"tags": {"$contains": "ops"}}),
        json!({"tags": {"$not_contains": "ops"}}),
        json!({"tags": {"$all": ["urgent", "deploy"]}}),
        json!({"tags": {"$size": 0}}),
        json!({"tags": {"$size": 2}}),
        json!({"tags": {"$empty": true}}),
        json!({"tags": {"$empty": false}}),
        json!({"lang": null}),
        json!({"lang": {"$ne": null}}),
        json!({"lang": {"$exists": true}}),
        json!({"author": {"$exists": false}}),
        json!({"lang": {"$null": false}}),
        json!({"author.name": "bob"}),
        json!({"author.name": {"$ne": "bob"}}),
        json!({"content": {"$contains": "alert"}}),
        json!({"content": {"$text": "MENU"}}),
        json!({"content": {"$empty": false}}),
        json!({"priority": {"$or": [{"$lt": 4}, {"$gt": 8}]}}),
        json!({"priority": {"$not": {"$gte": 5}}}),
        json!({"$or": [{"lang": "de"}, {"author.name": "bob"}]}),
        json!({"$not": {"$or": [{"lang": "de"}, {"author.name": "bob"}]}}),
        json!({"$not": {"$and": [{"channel_id": "alerts"}, {"processed": false}]}}),
        json!({"$not": {"$not": {"lang": "en"}}}),
        json!({"$and": [
            {"channel_id": {"$in": ["general", "alerts"]}},
            {"$or": [{"priority": {"$gte": 7}}, {"tags": {"$contains": "urgent"}}]},
            {"processed": {"$ne": true}}
        ]}),
        json!({"$or": [
            {"$and": [{"lang": "en"}, {"priority": {"$lt": 8}}]},
            {"$not": {"tags": {"$exists": true}}}
        ]}),
    ]
}

#[tokio::test]
async fn test_backends_select_the_same_documents() {
    let pool = setup_test_db().await;
    let engine = FilterEngine::default();

    for query in queries() {
        let (sql, params) = engine.to_sql(&query).unwrap();
        let relational = query_ids(&pool, &sql, params).await;
        let vector = payload_ids(&engine.to_vector(&query).unwrap());
        assert_eq!(relational, vector, "backends disagree on {}", query);
    }
}

#[tokio::test]
async fn test_de_morgan_holds_on_both_backends() {
    let pool = setup_test_db().await;
    let engine = FilterEngine::default();
    let negated_or = json!({"$not": {"$or": [{"lang": "en"}, {"priority": 3}]}});
    let and_of_nots = json!({"$and": [{"$not": {"lang": "en"}}, {"$not": {"priority": 3}}]});

    let (sql, params) = engine.to_sql(&negated_or).unwrap();
    let left = query_ids(&pool, &sql, params).await;
    let (sql, params) = engine.to_sql(&and_of_nots).unwrap();
    let right = query_ids(&pool, &sql, params).await;
    assert_eq!(left, right);
    assert_eq!(left, vec!["4"]);

    assert_eq!(
        engine.to_vector(&negated_or).unwrap(),
        engine.to_vector(&and_of_nots).unwrap()
    );
}
