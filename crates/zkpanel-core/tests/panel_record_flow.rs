use serde_json::json;
use zkpanel_core::{commit, evaluate, parse_query, AttributeRecord, QueryResult, Salt};

fn doctor() -> AttributeRecord {
    serde_json::from_value(json!({
        "age": 30,
        "occupation": "Doctor",
        "income": "85000"
    }))
    .expect("record")
}

#[test]
fn commitment_and_query_describe_the_same_record() {
    let record = doctor();
    let salt = Salt::generate();
    let committed = commit(&record, &salt);

    let spec = parse_query("age > 25 AND occupation = 'Doctor' AND income >= 80000")
        .expect("query parses");
    let result = QueryResult::from(evaluate(&record, &spec));
    assert_eq!(result, QueryResult::Yes);

    for name in spec.attributes() {
        let value = record.get(name).expect("attribute present");
        assert!(committed.verify_attribute(name, value), "{name} should verify");
    }
}

#[test]
fn identical_records_under_different_salts_do_not_collide() {
    let record = doctor();
    let first = commit(&record, &Salt::generate());
    let second = commit(&record, &Salt::generate());
    assert_ne!(first.record_digest, second.record_digest);
    assert_ne!(first.salt, second.salt);
    for (name, digest) in &first.attribute_digests {
        assert_ne!(Some(digest), second.attribute_digests.get(name));
    }
}
