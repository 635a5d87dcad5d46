//! Folder Tree Service (C5): get-or-create path walking, and the aggregated
//! topic-index build (folder_map with propagated `first_msg_id`/`total_files`).

use crate::domain::{BotError, FileRecord, Folder, ROOT_FOLDER};
use crate::ports::StorePort;
use std::collections::HashMap;
use std::sync::Arc;

/// One node of the aggregated topic index returned by `build_topic_index`.
#[derive(Debug, Clone)]
pub struct TopicNode {
    pub id: String,
    pub name: String,
    pub parent_id: String,
    pub first_msg_id: Option<i32>,
    pub file_count: u32,
    pub total_files: u32,
    pub children: Vec<String>,
}

pub struct FolderTreeService {
    store: Arc<dyn StorePort>,
}

impl FolderTreeService {
    pub fn new(store: Arc<dyn StorePort>) -> Self {
        Self { store }
    }

    /// Walks `path` from `root`, calling `getOrCreateFolder` at each level.
    /// Returns the leaf folder id.
    pub async fn get_or_create_path(
        &self,
        path: &[String],
        source_channel: i64,
    ) -> Result<String, BotError> {
        let mut parent = ROOT_FOLDER.to_string();
        for name in path {
            parent = self
                .store
                .get_or_create_folder(&parent, name, Some(source_channel))
                .await?;
        }
        Ok(parent)
    }

    /// Assembles `(folder_map, root_ids)` for `chat_id`: all auto-created
    /// folders sourced from that channel, plus the file counts and
    /// propagated `first_msg_id`/`total_files` aggregates.
    pub async fn build_topic_index(
        &self,
        chat_id: i64,
    ) -> Result<(HashMap<String, TopicNode>, Vec<String>), BotError> {
        let folders = self.store.list_auto_created_folders(chat_id).await?;
        let files = self.store.list_files_with_topic(chat_id).await?;
        Ok(assemble_topic_index(folders, files))
    }
}

/// Pure aggregation, factored out so it can be unit-tested without a store.
pub fn assemble_topic_index(
    folders: Vec<Folder>,
    mut files: Vec<FileRecord>,
) -> (HashMap<String, TopicNode>, Vec<String>) {
    let mut folder_map: HashMap<String, TopicNode> = folders
        .into_iter()
        .map(|f| {
            (
                f.id.clone(),
                TopicNode {
                    id: f.id,
                    name: f.name,
                    parent_id: f.parent_id,
                    first_msg_id: None,
                    file_count: 0,
                    total_files: 0,
                    children: Vec::new(),
                },
            )
        })
        .collect();

    let mut root_ids = Vec::new();
    let ids: Vec<String> = folder_map.keys().cloned().collect();
    for id in &ids {
        let parent_id = folder_map[id].parent_id.clone();
        if parent_id == ROOT_FOLDER {
            root_ids.push(id.clone());
        } else if folder_map.contains_key(&parent_id) {
            folder_map.get_mut(&parent_id).unwrap().children.push(id.clone());
        }
    }

    // Ascending msg_id: each file's first sighting sets first_msg_id.
    files.sort_by_key(|f| f.msg_id);
    for file in &files {
        let Some(folder_id) = file.topic_folder_id.as_ref() else {
            continue;
        };
        if let Some(node) = folder_map.get_mut(folder_id) {
            node.file_count += 1;
            if node.first_msg_id.is_none() {
                node.first_msg_id = Some(file.msg_id);
            }
        }
    }

    for root in &root_ids {
        propagate_up(&mut folder_map, root);
    }

    (folder_map, root_ids)
}

/// Post-order: a folder's `total_files` is its own count plus every
/// descendant's, and `first_msg_id` is the minimum non-null value in the
/// subtree rooted at it.
fn propagate_up(folder_map: &mut HashMap<String, TopicNode>, id: &str) -> (u32, Option<i32>) {
    let children = folder_map[id].children.clone();
    let mut total = folder_map[id].file_count;
    let mut min_msg = folder_map[id].first_msg_id;

    for child in &children {
        let (child_total, child_min) = propagate_up(folder_map, child);
        total += child_total;
        min_msg = match (min_msg, child_min) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) => Some(a),
            (None, b) => b,
        };
    }

    let node = folder_map.get_mut(id).unwrap();
    node.total_files = total;
    node.first_msg_id = min_msg;
    (total, min_msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MimeClass;

    fn folder(id: &str, name: &str, parent: &str) -> Folder {
        Folder {
            id: id.into(),
            name: name.into(),
            parent_id: parent.into(),
            source_channel: Some(1),
            auto_created: true,
        }
    }

    fn file(msg_id: i32, folder_id: &str) -> FileRecord {
        FileRecord {
            id: format!("f{msg_id}"),
            chat_id: 1,
            msg_id,
            hash: format!("h{msg_id}"),
            name: format!("n{msg_id}.mp4"),
            size: 1,
            mime: MimeClass::Video,
            topic_folder_id: Some(folder_id.into()),
        }
    }

    #[test]
    fn propagates_file_counts_and_first_msg_id_through_two_levels() {
        let folders = vec![
            folder("class10", "Class 10", ROOT_FOLDER),
            folder("math", "Math", "class10"),
        ];
        let files = vec![file(5, "math"), file(2, "math"), file(9, "class10")];
        let (map, roots) = assemble_topic_index(folders, files);

        assert_eq!(roots, vec!["class10".to_string()]);
        let math = &map["math"];
        assert_eq!(math.file_count, 2);
        assert_eq!(math.total_files, 2);
        assert_eq!(math.first_msg_id, Some(2));

        let class10 = &map["class10"];
        assert_eq!(class10.file_count, 1);
        assert_eq!(class10.total_files, 3);
        assert_eq!(class10.first_msg_id, Some(2));
    }

    #[test]
    fn folder_with_no_files_has_null_first_msg_id() {
        let folders = vec![folder("empty", "Empty", ROOT_FOLDER)];
        let (map, _) = assemble_topic_index(folders, vec![]);
        assert_eq!(map["empty"].first_msg_id, None);
        assert_eq!(map["empty"].total_files, 0);
    }
}
