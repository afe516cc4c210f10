use std::collections::BTreeMap;

use quiz_core::model::{PersistedSession, SubjectId, SubjectStats, UserProfile, UserStats};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::warn;

use crate::repository::StorageError;

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<String, StorageError> {
    serde_json::to_string(value).map_err(|err| StorageError::Serialization(err.to_string()))
}

/// Decodes the stats blob, repairing anything older schemas left out.
///
/// Each section is read on its own: a history entry or bookmark that no
/// longer matches the schema is dropped with a warning and the rest of the
/// record is kept. Only text that is not a JSON object at all is replaced by
/// a fresh record.
pub(crate) fn decode_stats(raw: Option<&str>) -> UserStats {
    let Some(raw) = raw else {
        return UserStats::initial();
    };
    let fields = match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(fields)) => fields,
        Ok(_) => {
            warn!("stats record is not a JSON object, starting from defaults");
            return UserStats::initial();
        }
        Err(err) => {
            warn!(error = %err, "failed to parse stats record, starting from defaults");
            return UserStats::initial();
        }
    };
    let mut stats = UserStats {
        total_questions: field(&fields, "totalQuestions"),
        total_correct: field(&fields, "totalCorrect"),
        subject_stats: subject_stats(fields.get("subjectStats")),
        history: entries(&fields, "history"),
        bookmarks: entries(&fields, "bookmarks"),
    };
    stats.fill_missing_subjects();
    stats
}

fn field<T: DeserializeOwned + Default>(fields: &Map<String, Value>, name: &str) -> T {
    match fields.get(name) {
        None | Some(Value::Null) => T::default(),
        Some(value) => serde_json::from_value(value.clone()).unwrap_or_else(|err| {
            warn!(field = name, error = %err, "unreadable stats field reset");
            T::default()
        }),
    }
}

fn subject_stats(value: Option<&Value>) -> BTreeMap<SubjectId, SubjectStats> {
    let Some(Value::Object(subjects)) = value else {
        return BTreeMap::new();
    };
    subjects
        .iter()
        .filter_map(|(id, counters)| {
            match serde_json::from_value::<SubjectStats>(counters.clone()) {
                Ok(counters) => Some((SubjectId::new(id.as_str()), counters)),
                Err(err) => {
                    warn!(subject = %id, error = %err, "dropping unreadable subject counters");
                    None
                }
            }
        })
        .collect()
}

fn entries<T: DeserializeOwned>(fields: &Map<String, Value>, name: &str) -> Vec<T> {
    let items = match fields.get(name) {
        None | Some(Value::Null) => return Vec::new(),
        Some(Value::Array(items)) => items,
        Some(_) => {
            warn!(field = name, "stats section is not a list, dropping it");
            return Vec::new();
        }
    };
    items
        .iter()
        .enumerate()
        .filter_map(|(position, item)| match serde_json::from_value(item.clone()) {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!(field = name, position, error = %err, "dropping unreadable stats entry");
                None
            }
        })
        .collect()
}

pub(crate) fn decode_session(key: &str, raw: &str) -> Result<PersistedSession, StorageError> {
    serde_json::from_str(raw).map_err(|err| StorageError::Corrupt {
        key: key.to_string(),
        reason: err.to_string(),
    })
}

pub(crate) fn decode_profile(key: &str, raw: &str) -> Result<UserProfile, StorageError> {
    serde_json::from_str(raw).map_err(|err| StorageError::Corrupt {
        key: key.to_string(),
        reason: err.to_string(),
    })
}
