use crate::models::Record;
use serde_json::Value;

/// Text form of a field value as it is shown in a table cell. Nested
/// objects and arrays flatten to their leaf values joined by spaces.
pub fn value_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        Value::Array(items) => items
            .iter()
            .map(value_text)
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join(" "),
        Value::Object(map) => map
            .values()
            .map(value_text)
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join(" "),
    }
}

/// Case-insensitive substring match over `fields` (dotted paths), or over
/// every top-level field when `fields` is empty. An empty query keeps every
/// record in its original order.
pub fn filter_records<'a>(records: &'a [Record], query: &str, fields: &[&str]) -> Vec<&'a Record> {
    if query.is_empty() {
        return records.iter().collect();
    }
    let needle = query.to_lowercase();
    records
        .iter()
        .filter(|record| record_matches(record, &needle, fields))
        .collect()
}

/// `needle` must already be lower-cased.
pub fn record_matches(record: &Record, needle: &str, fields: &[&str]) -> bool {
    if fields.is_empty() {
        return record
            .fields()
            .any(|(_, value)| value_text(value).to_lowercase().contains(needle));
    }
    fields.iter().any(|path| {
        record
            .lookup(path)
            .map(|value| value_text(value).to_lowercase().contains(needle))
            .unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::{filter_records, value_text};
    use crate::models::Record;
    use serde_json::json;

    fn reports() -> Vec<Record> {
        vec![
            json!({ "id": 1, "driverName": "Salem Mashreq", "plate": "D 4411", "status": "open" }),
            json!({ "id": 2, "driverName": "Huda Karim", "plate": "A 120", "status": "closed" }),
            json!({ "id": 3, "driverName": "Ali Nasser", "plate": "B 77", "status": "open" }),
        ]
        .into_iter()
        .filter_map(Record::from_value)
        .collect()
    }

    #[test]
    fn empty_query_is_identity() {
        let records = reports();
        let view = filter_records(&records, "", &[]);
        assert_eq!(view.len(), records.len());
        assert!(view.iter().zip(records.iter()).all(|(a, b)| *a == b));
    }

    #[test]
    fn mixed_case_field_matches_lowercase_query() {
        let records = reports();
        let view = filter_records(&records, "mashreq", &["driverName", "plate", "status"]);
        assert_eq!(view.len(), 1);
        assert_eq!(view[0].id("id").as_deref(), Some("1"));
    }

    #[test]
    fn numbers_are_matched_as_text() {
        let records = reports();
        let view = filter_records(&records, "12", &["plate"]);
        assert_eq!(view.len(), 1);
        let by_id = filter_records(&records, "3", &[]);
        assert!(by_id.iter().any(|record| record.id("id").as_deref() == Some("3")));
    }

    #[test]
    fn restricted_fields_ignore_other_columns() {
        let records = reports();
        assert!(filter_records(&records, "open", &["driverName"]).is_empty());
    }

    #[test]
    fn nested_values_flatten_to_leaves() {
        let value = json!({ "name": "Claims", "head": { "name": "Rana" }, "tags": ["a", null, 3] });
        let text = value_text(&value);
        assert!(text.contains("Claims"));
        assert!(text.contains("Rana"));
        assert!(text.contains('3'));
    }
}
