use crate::filter::value_text;
use crate::models::{Record, SortConfig, SortDirection};
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde_json::Value;
use std::cmp::Ordering;

/// A sort key that is not stored on the record but computed from it, such
/// as the number of employees in a department. The function must depend on
/// the record alone.
#[derive(Debug, Clone, Copy)]
pub struct DerivedKey {
    pub name: &'static str,
    pub derive: fn(&Record) -> Option<Value>,
}

/// Comparable form of a field value. Date strings are rewritten to a
/// fixed-width UTC timestamp so that text order is chronological order;
/// everything else is the case-folded display text.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct SortCell(String);

impl SortCell {
    fn from_value(value: &Value) -> Self {
        if let Value::String(text) = value {
            if let Some(canonical) = canonical_timestamp(text) {
                return Self(canonical);
            }
        }
        Self(value_text(value).to_lowercase())
    }
}

fn canonical_timestamp(text: &str) -> Option<String> {
    let parsed = if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        parsed.with_timezone(&Utc)
    } else if let Ok(parsed) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f") {
        parsed.and_utc()
    } else {
        NaiveDate::parse_from_str(text, "%Y-%m-%d")
            .ok()?
            .and_hms_opt(0, 0, 0)?
            .and_utc()
    };
    Some(parsed.to_rfc3339_opts(SecondsFormat::Nanos, true).to_lowercase())
}

/// Value used for ordering: a derived key wins over a field of the same name.
pub fn sort_value(record: &Record, key: &str, derived: &[DerivedKey]) -> Option<Value> {
    if let Some(entry) = derived.iter().find(|entry| entry.name == key) {
        return (entry.derive)(record).filter(|value| !value.is_null());
    }
    record.lookup(key).cloned()
}

fn compare_cells(left: Option<&SortCell>, right: Option<&SortCell>, direction: SortDirection) -> Ordering {
    match (left, right) {
        (None, None) => Ordering::Equal,
        // Missing values go last in both directions.
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(left), Some(right)) => {
            let ordering = left.cmp(right);
            match direction {
                SortDirection::Ascending => ordering,
                SortDirection::Descending => ordering.reverse(),
            }
        }
    }
}

pub fn compare_records(
    a: &Record,
    b: &Record,
    key: &str,
    direction: SortDirection,
    derived: &[DerivedKey],
) -> Ordering {
    let left = sort_value(a, key, derived).map(|value| SortCell::from_value(&value));
    let right = sort_value(b, key, derived).map(|value| SortCell::from_value(&value));
    compare_cells(left.as_ref(), right.as_ref(), direction)
}

/// Stable sort of a filtered view. With no key the input order is kept.
pub fn sort_records<'a>(view: Vec<&'a Record>, config: &SortConfig, derived: &[DerivedKey]) -> Vec<&'a Record> {
    let Some(key) = config.key.as_deref() else {
        return view;
    };

    let mut keyed = view
        .into_iter()
        .map(|record| {
            let cell = sort_value(record, key, derived).map(|value| SortCell::from_value(&value));
            (cell, record)
        })
        .collect::<Vec<_>>();

    // `sort_by` is stable, so equal keys keep their filtered order.
    keyed.sort_by(|(left, _), (right, _)| compare_cells(left.as_ref(), right.as_ref(), config.direction));
    keyed.into_iter().map(|(_, record)| record).collect()
}

#[cfg(test)]
mod tests {
    use super::{compare_records, sort_records, DerivedKey};
    use crate::models::{Record, SortConfig, SortDirection};
    use serde_json::{json, Value};
    use std::cmp::Ordering;

    fn records(values: Vec<Value>) -> Vec<Record> {
        values.into_iter().filter_map(Record::from_value).collect()
    }

    fn ids(view: &[&Record]) -> Vec<String> {
        view.iter().filter_map(|record| record.id("id")).collect()
    }

    #[test]
    fn tied_timestamps_keep_input_order_in_both_directions() {
        let data = records(vec![
            json!({ "id": "a", "createdAt": "2024-01-05T09:00:00Z" }),
            json!({ "id": "b", "createdAt": "2024-01-10T09:00:00Z" }),
            json!({ "id": "c", "createdAt": "2024-01-10T09:00:00Z" }),
        ]);
        let desc = sort_records(data.iter().collect(), &SortConfig::by("createdAt", SortDirection::Descending), &[]);
        assert_eq!(ids(&desc), vec!["b", "c", "a"]);
        let asc = sort_records(data.iter().collect(), &SortConfig::by("createdAt", SortDirection::Ascending), &[]);
        assert_eq!(ids(&asc), vec!["a", "b", "c"]);
    }

    #[test]
    fn dates_compare_chronologically_across_offsets() {
        let data = records(vec![
            json!({ "id": "late", "createdAt": "2024-03-01T10:00:00+04:00" }),
            json!({ "id": "early", "createdAt": "2024-03-01T07:00:00Z" }),
        ]);
        let asc = sort_records(data.iter().collect(), &SortConfig::by("createdAt", SortDirection::Ascending), &[]);
        assert_eq!(ids(&asc), vec!["late", "early"]);
    }

    #[test]
    fn missing_values_sort_last_regardless_of_direction() {
        let data = records(vec![
            json!({ "id": "1", "name": null }),
            json!({ "id": "2", "name": "beta" }),
            json!({ "id": "3" }),
            json!({ "id": "4", "name": "Alpha" }),
        ]);
        let asc = sort_records(data.iter().collect(), &SortConfig::by("name", SortDirection::Ascending), &[]);
        assert_eq!(ids(&asc), vec!["4", "2", "1", "3"]);
        let desc = sort_records(data.iter().collect(), &SortConfig::by("name", SortDirection::Descending), &[]);
        assert_eq!(ids(&desc), vec!["2", "4", "1", "3"]);
    }

    #[test]
    fn no_key_keeps_fetch_order() {
        let data = records(vec![json!({ "id": "z" }), json!({ "id": "a" })]);
        let view = sort_records(data.iter().collect(), &SortConfig::default(), &[]);
        assert_eq!(ids(&view), vec!["z", "a"]);
    }

    #[test]
    fn dotted_paths_and_derived_keys_are_supported() {
        fn employee_count(record: &Record) -> Option<Value> {
            record
                .get("employees")
                .and_then(Value::as_array)
                .map(|items| json!(items.len()))
        }
        let derived = [DerivedKey {
            name: "employeeCount",
            derive: employee_count,
        }];
        let data = records(vec![
            json!({ "id": "claims", "headOfEmployee": { "name": "zaid" }, "employees": [1, 2, 3] }),
            json!({ "id": "sales", "headOfEmployee": { "name": "Amal" }, "employees": [1, 2] }),
        ]);
        let by_head = sort_records(data.iter().collect(), &SortConfig::by("headOfEmployee.name", SortDirection::Ascending), &derived);
        assert_eq!(ids(&by_head), vec!["sales", "claims"]);
        let by_count = sort_records(data.iter().collect(), &SortConfig::by("employeeCount", SortDirection::Ascending), &derived);
        assert_eq!(ids(&by_count), vec!["sales", "claims"]);
        assert_eq!(
            compare_records(&data[0], &data[1], "employeeCount", SortDirection::Descending, &derived),
            Ordering::Less
        );
    }

    #[test]
    fn numbers_compare_as_text() {
        let data = records(vec![
            json!({ "id": "nine", "ref": 9 }),
            json!({ "id": "ten", "ref": 10 }),
            json!({ "id": "t", "ref": "5x" }),
        ]);
        let asc = sort_records(data.iter().collect(), &SortConfig::by("ref", SortDirection::Ascending), &[]);
        assert_eq!(ids(&asc), vec!["ten", "t", "nine"]);
    }

    #[test]
    fn date_like_text_sorts_among_plain_text() {
        let data = records(vec![
            json!({ "id": "word", "label": "Archive" }),
            json!({ "id": "date", "label": "2024-05-01" }),
            json!({ "id": "zed", "label": "zulu" }),
        ]);
        let desc = sort_records(data.iter().collect(), &SortConfig::by("label", SortDirection::Descending), &[]);
        assert_eq!(ids(&desc), vec!["zed", "word", "date"]);
    }

    #[test]
    fn text_comparison_ignores_case() {
        let data = records(vec![json!({ "id": "1", "name": "bravo" }), json!({ "id": "2", "name": "Alpha" })]);
        let asc = sort_records(data.iter().collect(), &SortConfig::by("name", SortDirection::Ascending), &[]);
        assert_eq!(ids(&asc), vec!["2", "1"]);
    }
}
