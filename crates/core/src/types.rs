use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

/// A stored span of document text plus its provenance.
///
/// `page_number` is 0-based, exactly as the ingestion side writes it into the index.
/// Conversion to the 1-based page shown to users happens in [`Chunk::source_ref`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub content: String,
    pub source_file: String,
    pub page_number: u32,
}

impl Chunk {
    pub fn new(content: impl Into<String>, source_file: impl Into<String>, page_number: u32) -> Self {
        Self {
            content: content.into(),
            source_file: source_file.into(),
            page_number,
        }
    }

    /// Final `/`-separated segment of the stored source path.
    pub fn file_name(&self) -> &str {
        self.source_file
            .rsplit('/')
            .next()
            .unwrap_or(self.source_file.as_str())
    }

    pub fn source_ref(&self) -> SourceRef {
        SourceRef {
            file: self.file_name().to_string(),
            page: self.page_number.saturating_add(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    pub file: String,
    pub page: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    #[serde(rename = "answer")]
    pub text: String,
    pub sources: Vec<SourceRef>,
}

/// One row of a door schedule. Source documents are inconsistent, so every field is
/// optional free text and nothing is trimmed or normalized.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoorRecord {
    #[serde(default, deserialize_with = "lenient_text")]
    pub mark: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub location: Option<String>,
    #[serde(default, rename = "width_mm", deserialize_with = "lenient_text")]
    pub width: Option<String>,
    #[serde(default, rename = "height_mm", deserialize_with = "lenient_text")]
    pub height: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub fire_rating: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub material: Option<String>,
}

impl DoorRecord {
    pub fn with_mark(mark: impl Into<String>) -> Self {
        Self {
            mark: Some(mark.into()),
            ..Self::default()
        }
    }

    /// Reads one model-produced row. `width_mm`/`height_mm` win over bare `width`/`height`;
    /// unknown keys are ignored.
    pub fn from_object(row: &Map<String, Value>) -> Self {
        Self {
            mark: first_text(row, &["mark"]),
            location: first_text(row, &["location"]),
            width: first_text(row, &["width_mm", "width"]),
            height: first_text(row, &["height_mm", "height"]),
            fire_rating: first_text(row, &["fire_rating"]),
            material: first_text(row, &["material"]),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoorSchedule {
    #[serde(default)]
    pub doors: Vec<DoorRecord>,
}

impl DoorSchedule {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.doors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doors.is_empty()
    }

    /// Builds a schedule from any parsed JSON value.
    ///
    /// A value that is not an object, has no `doors` key, or whose `doors` is not an array
    /// yields an empty schedule. Array entries that are not objects are skipped.
    pub fn from_value(value: &Value) -> Self {
        let Some(rows) = value.get("doors").and_then(Value::as_array) else {
            return Self::empty();
        };
        let doors = rows
            .iter()
            .filter_map(|row| match row.as_object() {
                Some(object) => Some(DoorRecord::from_object(object)),
                None => {
                    debug!(row = %row, "skipping non-object door row");
                    None
                }
            })
            .collect();
        Self { doors }
    }
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}

fn first_text(row: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| row.get(*key).and_then(as_text))
}

fn lenient_text<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Value>::deserialize(deserializer)?
        .as_ref()
        .and_then(as_text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn source_ref_is_one_based_and_strips_directories() {
        let chunk = Chunk::new("text", "Documents/sub/specs.pdf", 0);
        let source = chunk.source_ref();
        assert_eq!(source.file, "specs.pdf");
        assert_eq!(source.page, 1);

        let flat = Chunk::new("text", "schedule.pdf", 41);
        assert_eq!(flat.source_ref().page, 42);
        assert_eq!(flat.file_name(), "schedule.pdf");
    }

    #[test]
    fn door_record_serializes_wire_names_with_nulls() {
        let record = DoorRecord::with_mark("D-101");
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(
            value,
            json!({
                "mark": "D-101",
                "location": null,
                "width_mm": null,
                "height_mm": null,
                "fire_rating": null,
                "material": null,
            })
        );
    }

    #[test]
    fn door_record_keeps_numbers_as_text() {
        let record: DoorRecord =
            serde_json::from_value(json!({"mark": "D-102", "width_mm": 900, "fire_rating": true}))
                .unwrap();
        assert_eq!(record.width.as_deref(), Some("900"));
        assert_eq!(record.fire_rating.as_deref(), Some("true"));
        assert_eq!(record.location, None);

        let schedule = DoorSchedule::from_value(&json!({"doors": [{"height": "2100 "}]}));
        assert_eq!(schedule.doors[0].height.as_deref(), Some("2100 "));
    }

    #[test]
    fn rows_with_both_dimension_spellings_are_kept() {
        let schedule = DoorSchedule::from_value(&json!({"doors": [
            {"mark": "D-101", "width": "850", "width_mm": "900", "height_mm": 2100, "height": "7'"},
            {"mark": "D-102", "width_mm": null, "width": "1000"},
        ]}));
        assert_eq!(schedule.len(), 2);
        assert_eq!(schedule.doors[0].mark.as_deref(), Some("D-101"));
        assert_eq!(schedule.doors[0].width.as_deref(), Some("900"));
        assert_eq!(schedule.doors[0].height.as_deref(), Some("2100"));
        assert_eq!(schedule.doors[1].width.as_deref(), Some("1000"));
    }

    #[test]
    fn schedule_from_value_defaults_when_doors_missing() {
        assert!(DoorSchedule::from_value(&json!({"rows": []})).is_empty());
        assert!(DoorSchedule::from_value(&json!({"doors": "D-101"})).is_empty());
        assert!(DoorSchedule::from_value(&json!([1, 2, 3])).is_empty());

        let schedule =
            DoorSchedule::from_value(&json!({"doors": [{"mark": "D-200"}, "noise", 7]}));
        assert_eq!(schedule.doors, vec![DoorRecord::with_mark("D-200")]);
    }

    #[test]
    fn answer_serializes_text_as_answer() {
        let answer = Answer {
            text: "I cannot find that information".to_string(),
            sources: Vec::new(),
        };
        let value = serde_json::to_value(&answer).unwrap();
        assert_eq!(
            value,
            json!({"answer": "I cannot find that information", "sources": []})
        );
    }
}
