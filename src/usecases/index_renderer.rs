//! Index Renderer (C7): walks the folder forest built by C5 and renders it
//! as tree-drawing glyph lines, chunked into messages no larger than
//! `CHUNK_LIMIT` characters.

use crate::usecases::folder_tree::TopicNode;
use std::collections::HashMap;

pub const CHUNK_LIMIT: usize = 3800;

/// Strips the `-100` channel-id prefix Telegram uses internally for the
/// bot-API-style chat id, leaving the raw numeric id used in `t.me/c/...` links.
pub fn clean_chat_id(chat_id: i64) -> i64 {
    let s = chat_id.to_string();
    s.strip_prefix("-100")
        .and_then(|rest| rest.parse().ok())
        .unwrap_or(chat_id)
}

/// Renders one line for `node` at `depth`, given whether it's the last
/// sibling and the ancestor continuation prefix built by the caller.
fn render_line(node: &TopicNode, depth: usize, is_last: bool, ancestor_prefix: &str, base_url: &str, chat_id: i64) -> String {
    let branch = if depth == 0 {
        "📂 ".to_string()
    } else {
        format!("{}{}", ancestor_prefix, if is_last { "┗ " } else { "┣ " })
    };

    let label = match node.first_msg_id {
        Some(msg_id) => format!(
            "[{}]({}/c/{}/{})",
            node.name,
            base_url.trim_end_matches('/'),
            clean_chat_id(chat_id),
            msg_id
        ),
        None => format!("**{}**", node.name),
    };

    let suffix = if node.total_files > 0 {
        format!(" · {}", node.total_files)
    } else {
        String::new()
    };

    format!("{branch}{label}{suffix}")
}

/// Depth-first render of the whole forest into flat lines, ordered by
/// ascending `first_msg_id` among siblings (nodes without one sort last).
pub fn render_lines(
    folder_map: &HashMap<String, TopicNode>,
    root_ids: &[String],
    base_url: &str,
    chat_id: i64,
) -> Vec<String> {
    let mut lines = Vec::new();
    let mut sorted_roots = root_ids.to_vec();
    sort_by_first_msg_id(folder_map, &mut sorted_roots);
    let n = sorted_roots.len();
    for (i, id) in sorted_roots.iter().enumerate() {
        walk(folder_map, id, 0, i == n - 1, "", base_url, chat_id, &mut lines);
    }
    lines
}

fn sort_by_first_msg_id(folder_map: &HashMap<String, TopicNode>, ids: &mut [String]) {
    ids.sort_by_key(|id| folder_map[id].first_msg_id.unwrap_or(i32::MAX));
}

fn walk(
    folder_map: &HashMap<String, TopicNode>,
    id: &str,
    depth: usize,
    is_last: bool,
    ancestor_prefix: &str,
    base_url: &str,
    chat_id: i64,
    out: &mut Vec<String>,
) {
    let node = &folder_map[id];
    out.push(render_line(node, depth, is_last, ancestor_prefix, base_url, chat_id));

    let mut children = node.children.clone();
    sort_by_first_msg_id(folder_map, &mut children);
    let n = children.len();
    let child_prefix = if depth == 0 {
        String::new()
    } else {
        format!("{}{}", ancestor_prefix, if is_last { "    " } else { "┃   " })
    };
    for (i, child) in children.iter().enumerate() {
        walk(folder_map, child, depth + 1, i == n - 1, &child_prefix, base_url, chat_id, out);
    }
}

/// Greedily packs `lines` into chunks of at most `CHUNK_LIMIT` characters.
/// Chunks after the first are prefixed with a continuation header.
pub fn chunk_lines(lines: &[String]) -> Vec<String> {
    const HEADER: &str = "*(continued)*\n\n";
    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();

    for line in lines {
        if !current.is_empty() && current.len() + line.len() + 1 > CHUNK_LIMIT {
            chunks.push(std::mem::take(&mut current));
        }
        if current.is_empty() && !chunks.is_empty() {
            current.push_str(HEADER);
        }
        current.push_str(line);
        current.push('\n');
    }
    if !current.is_empty() || chunks.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(id: &str, name: &str, parent: &str, first: Option<i32>, total: u32) -> TopicNode {
        TopicNode {
            id: id.into(),
            name: name.into(),
            parent_id: parent.into(),
            first_msg_id: first,
            file_count: total,
            total_files: total,
            children: vec![],
        }
    }

    #[test]
    fn clean_chat_id_strips_bot_api_prefix() {
        assert_eq!(clean_chat_id(-1001234567890), 1234567890);
        assert_eq!(clean_chat_id(42), 42);
    }

    #[test]
    fn node_without_first_msg_id_falls_back_to_bold_text() {
        let mut map = HashMap::new();
        map.insert("a".to_string(), leaf("a", "Orphan", "root", None, 0));
        let lines = render_lines(&map, &["a".to_string()], "https://host", 100);
        assert_eq!(lines[0], "📂 **Orphan**");
    }

    #[test]
    fn chunking_splits_at_the_limit_with_continuation_header() {
        let long_line = "x".repeat(100);
        let lines: Vec<String> = (0..200).map(|_| long_line.clone()).collect();
        let chunks = chunk_lines(&lines);
        assert!(chunks.len() > 1);
        for chunk in &chunks[1..] {
            assert!(chunk.starts_with("*(continued)*"));
        }
        for chunk in &chunks {
            assert!(chunk.len() <= CHUNK_LIMIT);
        }
    }
}
