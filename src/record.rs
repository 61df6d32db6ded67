use crate::extract::ExtractedFields;
use crate::fingerprint::{Fingerprint, FingerprintSet};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordStatus {
    New,
    InProgress,
    Done,
}

/// The structured output of the inbound pipeline: one reviewable item per
/// accepted message. Reviewers move it past New; that lifecycle lives in
/// the backend, not here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingRecord {
    /// Assigned by persistence on save.
    pub id: Option<String>,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub apartment: String,
    pub message: String,
    pub received_at: DateTime<Utc>,
    pub status: RecordStatus,
    pub fingerprint: Option<Fingerprint>,
    pub translated_message: Option<String>,
}

/// The external persistence collaborator: an existence check keyed by
/// fingerprint hash plus an insert.
pub trait PendingStore: Send + Sync {
    fn exists_by_fingerprint(&self, hash: &str) -> anyhow::Result<bool>;
    fn save(&self, record: &PendingRecord) -> anyhow::Result<String>;
}

/// Optional external translation capability. Any failure here is tolerated:
/// the record is stored untranslated.
pub trait Translator: Send + Sync {
    fn detect(&self, text: &str) -> anyhow::Result<String>;
    fn translate(&self, text: &str, from: &str, to: &str) -> anyhow::Result<String>;
}

/// Language records are kept in; inbound messages in anything else get a
/// translation attached when a translator is available.
const DEFAULT_LANGUAGE: &str = "sv";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    Created(String),
    Duplicate,
}

pub struct RecordBuilder {
    store: std::sync::Arc<dyn PendingStore>,
    translator: Option<std::sync::Arc<dyn Translator>>,
}

impl RecordBuilder {
    pub fn new(store: std::sync::Arc<dyn PendingStore>) -> Self {
        RecordBuilder {
            store,
            translator: None,
        }
    }

    pub fn with_translator(mut self, translator: std::sync::Arc<dyn Translator>) -> Self {
        self.translator = Some(translator);
        self
    }

    /// Check every computed tier against the store, strongest first; any hit
    /// means the submission was already recorded and we skip silently. No
    /// hit means a new record with status New and the best tier attached.
    pub fn build(
        &self,
        fields: &ExtractedFields,
        fingerprints: &FingerprintSet,
    ) -> anyhow::Result<BuildOutcome> {
        for fingerprint in fingerprints.ordered() {
            if self.store.exists_by_fingerprint(&fingerprint.hash)? {
                log::info!(
                    "Duplicate submission from {} ({:?} tier), skipping",
                    fields.email,
                    fingerprint.tier
                );
                return Ok(BuildOutcome::Duplicate);
            }
        }

        let record = PendingRecord {
            id: None,
            name: fields.name.clone(),
            email: fields.email.clone(),
            phone: fields.phone.clone(),
            apartment: fields.apartment.clone(),
            message: fields.message.clone(),
            received_at: Utc::now(),
            status: RecordStatus::New,
            fingerprint: fingerprints.stored().cloned(),
            translated_message: self.translate_if_foreign(&fields.message),
        };

        let id = self.store.save(&record)?;
        log::info!("Created pending record {id} for {}", fields.email);
        Ok(BuildOutcome::Created(id))
    }

    fn translate_if_foreign(&self, message: &str) -> Option<String> {
        let translator = self.translator.as_ref()?;
        if message.is_empty() {
            return None;
        }
        let detected = match translator.detect(message) {
            Ok(lang) => lang,
            Err(e) => {
                log::warn!("Language detection failed, storing untranslated: {e}");
                return None;
            }
        };
        if detected == DEFAULT_LANGUAGE {
            return None;
        }
        match translator.translate(message, &detected, DEFAULT_LANGUAGE) {
            Ok(text) => Some(text),
            Err(e) => {
                log::warn!("Translation from {detected} failed, storing untranslated: {e}");
                None
            }
        }
    }
}

/// Append-only JSONL store. Stands in for the backend's document store so
/// the daemon runs standalone; the dedup contract is the same narrow
/// existence-check-plus-insert the backend exposes.
pub struct JsonFileStore {
    path: String,
    // Hashes seen this process plus those loaded from the file at startup.
    known_hashes: Mutex<std::collections::HashSet<String>>,
    counter: Mutex<u64>,
}

impl JsonFileStore {
    pub fn open(path: &str) -> anyhow::Result<Self> {
        let mut known = std::collections::HashSet::new();
        let mut count = 0u64;
        if let Ok(content) = std::fs::read_to_string(path) {
            for line in content.lines().filter(|l| !l.trim().is_empty()) {
                count += 1;
                if let Ok(record) = serde_json::from_str::<PendingRecord>(line) {
                    if let Some(fp) = record.fingerprint {
                        known.insert(fp.hash);
                    }
                }
            }
        }
        Ok(JsonFileStore {
            path: path.to_string(),
            known_hashes: Mutex::new(known),
            counter: Mutex::new(count),
        })
    }
}

impl PendingStore for JsonFileStore {
    fn exists_by_fingerprint(&self, hash: &str) -> anyhow::Result<bool> {
        Ok(self.known_hashes.lock().unwrap().contains(hash))
    }

    fn save(&self, record: &PendingRecord) -> anyhow::Result<String> {
        let mut counter = self.counter.lock().unwrap();
        *counter += 1;
        let id = format!("rec-{}", *counter);

        let mut stored = record.clone();
        stored.id = Some(id.clone());
        let line = serde_json::to_string(&stored)?;

        use std::io::Write;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")?;

        if let Some(fp) = &record.fingerprint {
            self.known_hashes.lock().unwrap().insert(fp.hash.clone());
        }
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::fingerprints;
    use std::sync::Arc;

    /// In-memory store mirroring the collaborator contract.
    #[derive(Default)]
    pub struct MemoryStore {
        records: Mutex<Vec<PendingRecord>>,
    }

    impl PendingStore for MemoryStore {
        fn exists_by_fingerprint(&self, hash: &str) -> anyhow::Result<bool> {
            Ok(self.records.lock().unwrap().iter().any(|r| {
                r.fingerprint
                    .as_ref()
                    .map(|fp| fp.hash == hash)
                    .unwrap_or(false)
            }))
        }

        fn save(&self, record: &PendingRecord) -> anyhow::Result<String> {
            let mut records = self.records.lock().unwrap();
            let id = format!("rec-{}", records.len() + 1);
            let mut stored = record.clone();
            stored.id = Some(id.clone());
            records.push(stored);
            Ok(id)
        }
    }

    fn anna() -> ExtractedFields {
        ExtractedFields {
            name: "Anna Svensson".to_string(),
            email: "anna@example.com".to_string(),
            phone: "0701234567".to_string(),
            apartment: "12B".to_string(),
            message: "Diskmaskinen läcker".to_string(),
        }
    }

    #[test]
    fn test_first_build_creates_record() {
        let store = Arc::new(MemoryStore::default());
        let builder = RecordBuilder::new(store.clone());
        let fields = anna();
        let outcome = builder.build(&fields, &fingerprints(&fields)).unwrap();
        assert_eq!(outcome, BuildOutcome::Created("rec-1".to_string()));

        let records = store.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, RecordStatus::New);
        assert!(records[0].fingerprint.is_some());
    }

    #[test]
    fn test_second_build_is_duplicate() {
        let store = Arc::new(MemoryStore::default());
        let builder = RecordBuilder::new(store.clone());
        let fields = anna();
        let set = fingerprints(&fields);
        builder.build(&fields, &set).unwrap();
        let outcome = builder.build(&fields, &set).unwrap();
        assert_eq!(outcome, BuildOutcome::Duplicate);
        assert_eq!(store.records.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_dedup_across_normalized_variants() {
        let store = Arc::new(MemoryStore::default());
        let builder = RecordBuilder::new(store.clone());
        let first = anna();
        builder.build(&first, &fingerprints(&first)).unwrap();

        let mut second = anna();
        second.email = " Anna@Example.COM ".to_string();
        let outcome = builder.build(&second, &fingerprints(&second)).unwrap();
        assert_eq!(outcome, BuildOutcome::Duplicate);
    }

    #[test]
    fn test_empty_fields_still_create_record() {
        let store = Arc::new(MemoryStore::default());
        let builder = RecordBuilder::new(store.clone());
        let fields = ExtractedFields::default();
        let outcome = builder.build(&fields, &fingerprints(&fields)).unwrap();
        assert!(matches!(outcome, BuildOutcome::Created(_)));

        let records = store.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].fingerprint.is_none());
        assert_eq!(records[0].status, RecordStatus::New);
    }

    struct FailingTranslator;
    impl Translator for FailingTranslator {
        fn detect(&self, _: &str) -> anyhow::Result<String> {
            anyhow::bail!("translation service down")
        }
        fn translate(&self, _: &str, _: &str, _: &str) -> anyhow::Result<String> {
            anyhow::bail!("translation service down")
        }
    }

    #[test]
    fn test_translator_failure_does_not_abort_record() {
        let store = Arc::new(MemoryStore::default());
        let builder =
            RecordBuilder::new(store.clone()).with_translator(Arc::new(FailingTranslator));
        let fields = anna();
        let outcome = builder.build(&fields, &fingerprints(&fields)).unwrap();
        assert!(matches!(outcome, BuildOutcome::Created(_)));
        assert!(store.records.lock().unwrap()[0].translated_message.is_none());
    }

    struct EnglishTranslator;
    impl Translator for EnglishTranslator {
        fn detect(&self, _: &str) -> anyhow::Result<String> {
            Ok("en".to_string())
        }
        fn translate(&self, text: &str, _: &str, _: &str) -> anyhow::Result<String> {
            Ok(format!("[sv] {text}"))
        }
    }

    #[test]
    fn test_foreign_message_gets_translation() {
        let store = Arc::new(MemoryStore::default());
        let builder =
            RecordBuilder::new(store.clone()).with_translator(Arc::new(EnglishTranslator));
        let mut fields = anna();
        fields.message = "The dishwasher is leaking".to_string();
        builder.build(&fields, &fingerprints(&fields)).unwrap();
        let records = store.records.lock().unwrap();
        assert_eq!(
            records[0].translated_message.as_deref(),
            Some("[sv] The dishwasher is leaking")
        );
    }
}
