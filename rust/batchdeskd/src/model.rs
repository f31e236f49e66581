use rusqlite::Row;
use serde::Serialize;

/// Cohort category shown next to each batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BatchCategory {
    Existing,
    New,
    Project,
}

impl BatchCategory {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "Existing" => Some(Self::Existing),
            "New" => Some(Self::New),
            "Project" => Some(Self::Project),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Existing => "Existing",
            Self::New => "New",
            Self::Project => "Project",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Batch {
    pub id: String,
    pub name: String,
    pub time_slot: String,
    pub category: BatchCategory,
}

impl Batch {
    pub const COLUMNS: &'static str = "b.id, b.name, b.time_slot, b.category";

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let raw_category: String = row.get(3)?;
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            time_slot: row.get(2)?,
            // Unknown values only appear if the table was edited by hand.
            category: BatchCategory::parse(&raw_category).unwrap_or(BatchCategory::Existing),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    pub name: String,
    pub contact: String,
    pub batch_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_name: Option<String>,
}

impl Student {
    pub const COLUMNS: &'static str = "s.id, s.name, s.contact, s.batch_id, b.name";

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            contact: row.get(2)?,
            batch_id: row.get(3)?,
            batch_name: row.get(4)?,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Topic {
    pub id: String,
    pub batch_id: String,
    pub date: String,
    pub topic: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_name: Option<String>,
}

impl Topic {
    pub const COLUMNS: &'static str = "t.id, t.batch_id, t.date, t.topic, b.name";

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            batch_id: row.get(1)?,
            date: row.get(2)?,
            topic: row.get(3)?,
            batch_name: row.get(4)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Attendance {
    pub id: String,
    pub student_id: String,
    pub batch_id: String,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub student_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_name: Option<String>,
}

impl Attendance {
    /// Expects `attendance a` joined with `students s` and `batches b`.
    pub const COLUMNS: &'static str = "a.id, a.student_id, a.batch_id, a.timestamp, s.name, b.name";

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            student_id: row.get(1)?,
            batch_id: row.get(2)?,
            timestamp: row.get(3)?,
            student_name: row.get(4)?,
            batch_name: row.get(5)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_parse_is_exact() {
        assert_eq!(BatchCategory::parse("Project"), Some(BatchCategory::Project));
        assert_eq!(BatchCategory::parse(" New "), Some(BatchCategory::New));
        assert_eq!(BatchCategory::parse("project"), None);
        assert_eq!(BatchCategory::Existing.as_str(), "Existing");
    }

    #[test]
    fn student_serializes_camel_case_without_missing_join() {
        let s = Student {
            id: "s1".to_string(),
            name: "Asha".to_string(),
            contact: "98765".to_string(),
            batch_id: "b1".to_string(),
            batch_name: None,
        };
        let v = serde_json::to_value(&s).expect("serialize");
        assert_eq!(v["batchId"], "b1");
        assert!(v.get("batchName").is_none());
    }
}
