//! Channel Ingestor (C6): three entry points that all resolve to the same
//! per-file logic — derive a title/hash, parse the caption's topic path
//! (C4), get-or-create the folder it belongs to (C5), and upsert a file
//! record (C1).

use crate::domain::{BotError, FileRecord, MimeClass};
use crate::ports::StorePort;
use crate::usecases::folder_tree::{assemble_topic_index, FolderTreeService, TopicNode};
use crate::usecases::topic_parser::parse_topic_path;
use std::collections::HashMap;
use std::sync::Arc;

/// One sighted media message, already stripped of its `grammers_client`
/// envelope by the caller.
#[derive(Debug, Clone)]
pub struct IncomingFile {
    pub chat_id: i64,
    pub msg_id: i32,
    pub file_unique_id: String,
    pub file_name: Option<String>,
    pub caption: String,
    pub size: u64,
    pub mime: MimeClass,
}

/// Characters the original collapses to a single space when deriving a
/// display title: `. , | _ '`.
const TITLE_PUNCTUATION: &str = ".,|_'";

/// Prefers the media's file name, falling back to the caption, then the
/// file id itself; strips a trailing extension and collapses punctuation.
pub fn derive_title(file_name: Option<&str>, caption: &str, fallback_id: &str) -> String {
    let raw = file_name
        .filter(|s| !s.is_empty())
        .or_else(|| if caption.is_empty() { None } else { Some(caption) })
        .unwrap_or(fallback_id);

    let stem = match raw.rfind('.') {
        Some(idx) if idx != 0 => &raw[..idx],
        _ => raw,
    };

    stem.chars()
        .map(|c| if TITLE_PUNCTUATION.contains(c) { ' ' } else { c })
        .collect()
}

/// 6-character prefix of Telegram's unique file id, used as the dedup hash.
pub fn derive_hash(file_unique_id: &str) -> String {
    file_unique_id.chars().take(6).collect()
}

fn new_file_id() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Outcome of ingesting one file: whether it carried a topic path, and
/// whether the store actually wrote a new record (`false` on a dup).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestOutcome {
    pub had_topic: bool,
    pub novel: bool,
}

pub struct ChannelIndexer {
    store: Arc<dyn StorePort>,
    folder_tree: Arc<FolderTreeService>,
    auth_channels: Vec<i64>,
}

impl ChannelIndexer {
    pub fn new(store: Arc<dyn StorePort>, folder_tree: Arc<FolderTreeService>, auth_channels: Vec<i64>) -> Self {
        Self { store, folder_tree, auth_channels }
    }

    /// The authorized set comes from store config (`auth_channel` CSV) with
    /// process configuration as fallback; callers resolve that precedence
    /// and pass the merged list in at construction.
    pub fn is_authorized(&self, channel_id: i64) -> bool {
        self.auth_channels.contains(&channel_id)
    }

    /// Shared by the push handler and the bulk `/index` loop: derive,
    /// get-or-create the folder if a topic path is present, and upsert.
    pub async fn ingest_one(&self, file: IncomingFile) -> Result<IngestOutcome, BotError> {
        let title = derive_title(file.file_name.as_deref(), &file.caption, &file.file_unique_id);
        let hash = derive_hash(&file.file_unique_id);
        let topic_path = parse_topic_path(&file.caption);

        let topic_folder_id = match &topic_path {
            Some(path) => Some(self.folder_tree.get_or_create_path(path, file.chat_id).await?),
            None => None,
        };

        let novel = self
            .store
            .add_file_if_novel(FileRecord {
                id: new_file_id(),
                chat_id: file.chat_id,
                msg_id: file.msg_id,
                hash,
                name: title,
                size: file.size,
                mime: file.mime,
                topic_folder_id: topic_folder_id.clone(),
            })
            .await?;

        Ok(IngestOutcome { had_topic: topic_folder_id.is_some(), novel })
    }

    /// Bulk `/index`: the caller has already paged through channel history
    /// (message ids `1..=last_id`) and collected every document/video; this
    /// just folds `ingest_one` over them and reports the split the original
    /// reports back to the user.
    pub async fn ingest_bulk(&self, files: Vec<IncomingFile>) -> Result<BulkSummary, BotError> {
        let mut with_topic = 0u32;
        let mut without_topic = 0u32;
        for file in files {
            let outcome = self.ingest_one(file).await?;
            if outcome.had_topic {
                with_topic += 1;
            } else {
                without_topic += 1;
            }
        }
        Ok(BulkSummary { with_topic, without_topic })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BulkSummary {
    pub with_topic: u32,
    pub without_topic: u32,
}

/// Live `/createindex`: builds the topic tree purely in memory from a scan
/// of channel history, without touching the store. Folder identity here is
/// the joined path itself (`"A/B/C"`), since nothing needs to survive past
/// this single render.
pub struct LiveIndexBuilder {
    /// Synthetic folders keyed by joined-path id, built incrementally by
    /// `observe`. Reuses C5's `assemble_topic_index` aggregation once scanning
    /// finishes, so the propagation logic only has one implementation.
    folders: HashMap<String, crate::domain::Folder>,
    /// `(folder_id, msg_id)` pairs, one per observed file with a topic path.
    pending_files: Vec<(String, i32)>,
}

impl LiveIndexBuilder {
    pub fn new() -> Self {
        Self { folders: HashMap::new(), pending_files: Vec::new() }
    }

    /// Feeds one scanned message's caption + msg id into the tree. No-op if
    /// the caption carries no topic path.
    pub fn observe(&mut self, caption: &str, msg_id: i32) -> bool {
        let Some(path) = parse_topic_path(caption) else {
            return false;
        };

        let mut parent = crate::domain::ROOT_FOLDER.to_string();
        let mut joined = String::new();
        for (i, segment) in path.iter().enumerate() {
            if i > 0 {
                joined.push('/');
            }
            joined.push_str(segment);
            self.folders.entry(joined.clone()).or_insert_with(|| crate::domain::Folder {
                id: joined.clone(),
                name: segment.clone(),
                parent_id: parent.clone(),
                source_channel: None,
                auto_created: true,
            });
            parent = joined.clone();
        }

        // Every file touches a synthetic leaf-only file record at the final
        // folder id; `assemble_topic_index` handles the propagation.
        self.pending_files.push((joined, msg_id));
        true
    }

    /// Finalizes the scan into `(folder_map, root_ids)`, same shape C5
    /// returns for the store-backed variant.
    pub fn finish(self) -> (HashMap<String, TopicNode>, Vec<String>) {
        let files = self
            .pending_files
            .into_iter()
            .enumerate()
            .map(|(i, (folder_id, msg_id))| FileRecord {
                id: format!("live{i}"),
                chat_id: 0,
                msg_id,
                hash: String::new(),
                name: String::new(),
                size: 0,
                mime: MimeClass::Document,
                topic_folder_id: Some(folder_id),
            })
            .collect();
        let folders = self.folders.into_values().collect();
        assemble_topic_index(folders, files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_title_prefers_file_name_and_strips_extension() {
        let title = derive_title(Some("my.video_file.mp4"), "caption", "fallback");
        assert_eq!(title, "my video file");
    }

    #[test]
    fn derive_title_falls_back_to_caption_then_id() {
        assert_eq!(derive_title(None, "A Caption", "fallback"), "A Caption");
        assert_eq!(derive_title(None, "", "abc123"), "abc123");
    }

    #[test]
    fn derive_title_collapses_punctuation_set() {
        assert_eq!(derive_title(Some("a.b,c|d_e'f.mkv"), "", "x"), "a b c d e f");
    }

    #[test]
    fn derive_hash_takes_six_chars() {
        assert_eq!(derive_hash("AgADBQADq6cxG84"), "AgADBQ");
        assert_eq!(derive_hash("abc"), "abc");
    }
}
