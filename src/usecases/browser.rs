//! Browser Controller (C8): paginated inline UI over the folder/file
//! listing C1 serves, plus the callback-data grammar every inline button in
//! the bot speaks. Pure view-model construction — the adapter that actually
//! holds an inline keyboard type turns `(label, callback_data)` pairs into
//! whatever button type its Telegram binding wants.

use crate::domain::{FileRecord, Folder, MimeClass};
use crate::ports::ItemPage;

/// Items per folder page, per the original's `ITEMS_PER_PAGE`.
pub const ITEMS_PER_PAGE: u32 = 8;

/// Telegram's hard cap on `callback_data` length.
const CALLBACK_DATA_LIMIT: usize = 64;

/// One button: visible label plus its payload. The payload is either a
/// `callback_data` string (routed back through [`parse`]) or, when it starts
/// with `http`, a URL button — the adapter that builds the actual inline
/// keyboard type distinguishes the two the same way.
pub type Button = (String, String);

/// Parsed form of every `b*`-prefixed callback route. `Plan` is the one
/// non-`b`-prefixed button (`p_<key>`), listed here too since it shares the
/// same encode/parse boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackAction {
    ChannelRoot { chat_id: String },
    FolderPage { folder_id: String, chat_id: String, page: u32 },
    FileMenu { msg_id: i32, chat_id: String, hash: String, folder_id: String },
    SendToBot { msg_id: i32, chat_id: String },
    VcStart { msg_id: i32, chat_id: String, hash: String },
    VcPause { chat_id: String },
    VcResume { chat_id: String },
    VcSeek { chat_id: String, delta_secs: i64 },
    VcSeekTo { chat_id: String, abs_secs: i64 },
    VcStop { chat_id: String },
    VcOpenPlayer { chat_id: String },
    VcBack { chat_id: String },
    Plan { key: String },
}

/// Encodes an action into its pipe-delimited `callback_data`, truncating to
/// `CALLBACK_DATA_LIMIT` bytes if needed — acceptable per spec because the
/// leading identifier (and for most routes, the chat id) survives truncation.
pub fn encode(action: &CallbackAction) -> String {
    let raw = match action {
        CallbackAction::ChannelRoot { chat_id } => format!("bch|{chat_id}"),
        CallbackAction::FolderPage { folder_id, chat_id, page } => {
            format!("bf|{folder_id}|{chat_id}|{page}")
        }
        CallbackAction::FileMenu { msg_id, chat_id, hash, folder_id } => {
            format!("bfi|{msg_id}|{chat_id}|{hash}|{folder_id}")
        }
        CallbackAction::SendToBot { msg_id, chat_id } => format!("bs|{msg_id}|{chat_id}"),
        CallbackAction::VcStart { msg_id, chat_id, hash } => format!("bvc|{msg_id}|{chat_id}|{hash}"),
        CallbackAction::VcPause { chat_id } => format!("bvp|{chat_id}"),
        CallbackAction::VcResume { chat_id } => format!("bvr|{chat_id}"),
        CallbackAction::VcSeek { chat_id, delta_secs } => format!("bvk|{chat_id}|{delta_secs}"),
        CallbackAction::VcSeekTo { chat_id, abs_secs } => format!("bvj|{chat_id}|{abs_secs}"),
        CallbackAction::VcStop { chat_id } => format!("bvs|{chat_id}"),
        CallbackAction::VcOpenPlayer { chat_id } => format!("bvo|{chat_id}"),
        CallbackAction::VcBack { chat_id } => format!("bvb|{chat_id}"),
        CallbackAction::Plan { key } => format!("p_{key}"),
    };
    if raw.len() > CALLBACK_DATA_LIMIT {
        raw.chars().take(CALLBACK_DATA_LIMIT).collect()
    } else {
        raw
    }
}

/// Parses `callback_data` back into an action. `None` on an unrecognised or
/// truncated-beyond-use prefix.
pub fn parse(data: &str) -> Option<CallbackAction> {
    if let Some(key) = data.strip_prefix("p_") {
        return Some(CallbackAction::Plan { key: key.to_string() });
    }
    let mut parts = data.split('|');
    let tag = parts.next()?;
    match tag {
        "bch" => Some(CallbackAction::ChannelRoot { chat_id: parts.next()?.to_string() }),
        "bf" => Some(CallbackAction::FolderPage {
            folder_id: parts.next()?.to_string(),
            chat_id: parts.next()?.to_string(),
            page: parts.next()?.parse().ok()?,
        }),
        "bfi" => Some(CallbackAction::FileMenu {
            msg_id: parts.next()?.parse().ok()?,
            chat_id: parts.next()?.to_string(),
            hash: parts.next()?.to_string(),
            folder_id: parts.next()?.to_string(),
        }),
        "bs" => Some(CallbackAction::SendToBot {
            msg_id: parts.next()?.parse().ok()?,
            chat_id: parts.next()?.to_string(),
        }),
        "bvc" => Some(CallbackAction::VcStart {
            msg_id: parts.next()?.parse().ok()?,
            chat_id: parts.next()?.to_string(),
            hash: parts.next()?.to_string(),
        }),
        "bvp" => Some(CallbackAction::VcPause { chat_id: parts.next()?.to_string() }),
        "bvr" => Some(CallbackAction::VcResume { chat_id: parts.next()?.to_string() }),
        "bvk" => Some(CallbackAction::VcSeek {
            chat_id: parts.next()?.to_string(),
            delta_secs: parts.next()?.parse().ok()?,
        }),
        "bvj" => Some(CallbackAction::VcSeekTo {
            chat_id: parts.next()?.to_string(),
            abs_secs: parts.next()?.parse().ok()?,
        }),
        "bvs" => Some(CallbackAction::VcStop { chat_id: parts.next()?.to_string() }),
        "bvo" => Some(CallbackAction::VcOpenPlayer { chat_id: parts.next()?.to_string() }),
        "bvb" => Some(CallbackAction::VcBack { chat_id: parts.next()?.to_string() }),
        _ => None,
    }
}

/// The `📂 N Folders | 🎬 V Videos | 📕 P PDFs | 📄 Others` counts line.
pub fn build_header(page: &ItemPage) -> String {
    let others = page.file_count.saturating_sub(page.video_count).saturating_sub(page.pdf_count);
    format!(
        "📂 {} Folders | 🎬 {} Videos | 📕 {} PDFs | 📄 {} Others",
        page.folder_count, page.video_count, page.pdf_count, others
    )
}

/// A fully-built folder view: header text (with an optional Now-Playing
/// banner prefixed) and button rows, ready for an inline keyboard.
#[derive(Debug, Clone)]
pub struct FolderView {
    pub header: String,
    pub rows: Vec<Vec<Button>>,
}

/// Builds one folder-listing page. `parent_id` is `None` at a channel root
/// (so `Back` goes to the channel list instead of a parent folder).
#[allow(clippy::too_many_arguments)]
pub fn build_folder_view(
    page: &ItemPage,
    folder_id: &str,
    parent_id: Option<&str>,
    chat_id: i64,
    page_num: u32,
    vc_active: bool,
    now_playing_title: Option<&str>,
) -> FolderView {
    let chat = chat_id.to_string();
    let mut header = build_header(page);
    if vc_active {
        if let Some(title) = now_playing_title {
            header = format!("🎵 Now Playing: {title}\n\n{header}");
        }
    }

    let mut rows: Vec<Vec<Button>> = Vec::new();

    if vc_active {
        rows.push(vec![
            ("⏹ Stop VC".to_string(), encode(&CallbackAction::VcStop { chat_id: chat.clone() })),
            ("▶ Open Player".to_string(), encode(&CallbackAction::VcOpenPlayer { chat_id: chat.clone() })),
        ]);
    }

    for pair in page.folders.chunks(2) {
        let row = pair
            .iter()
            .map(|f| folder_button(f, chat_id))
            .collect();
        rows.push(row);
    }

    for file in &page.files {
        rows.push(vec![file_button(file, chat_id, folder_id)]);
    }

    let back_target = parent_id.unwrap_or("root");
    rows.push(vec![
        ("⬅ Back".to_string(), encode(&CallbackAction::FolderPage {
            folder_id: back_target.to_string(),
            chat_id: chat.clone(),
            page: 0,
        })),
    ]);

    // Prev/Next keep the keyboard shape stable by re-targeting the same
    // page at either end instead of disappearing.
    let prev_page = page_num.saturating_sub(1);
    let next_page = if page.has_more { page_num + 1 } else { page_num };
    rows.push(vec![
        ("◀ Prev".to_string(), encode(&CallbackAction::FolderPage {
            folder_id: folder_id.to_string(),
            chat_id: chat.clone(),
            page: prev_page,
        })),
        ("Next ▶".to_string(), encode(&CallbackAction::FolderPage {
            folder_id: folder_id.to_string(),
            chat_id: chat.clone(),
            page: next_page,
        })),
    ]);

    FolderView { header, rows }
}

fn folder_button(folder: &Folder, chat_id: i64) -> Button {
    (
        format!("📁 {}", folder.name),
        encode(&CallbackAction::FolderPage {
            folder_id: folder.id.clone(),
            chat_id: chat_id.to_string(),
            page: 0,
        }),
    )
}

fn file_button(file: &FileRecord, chat_id: i64, folder_id: &str) -> Button {
    (
        format!("{} {}", file.mime.icon(), file.name),
        encode(&CallbackAction::FileMenu {
            msg_id: file.msg_id,
            chat_id: chat_id.to_string(),
            hash: file.hash.clone(),
            folder_id: folder_id.to_string(),
        }),
    )
}

/// File action menu: branches on MIME, always ends with `Send to Bot`,
/// `Jump to Message`, `Back` (back to the folder page the file was opened
/// from).
pub fn build_file_actions(file: &FileRecord, chat_id: i64, folder_id: &str, base_url: &str) -> Vec<Vec<Button>> {
    let chat = chat_id.to_string();
    let mut rows = Vec::new();

    match file.mime {
        MimeClass::Video => {
            rows.push(vec![
                ("▶ Watch/Stream".to_string(), stream_url(base_url, chat_id, &file.name, file.msg_id, &file.hash)),
                ("🔊 Play in VC".to_string(), encode(&CallbackAction::VcStart {
                    msg_id: file.msg_id,
                    chat_id: chat.clone(),
                    hash: file.hash.clone(),
                })),
            ]);
        }
        MimeClass::Pdf => {
            rows.push(vec![
                ("📄 Open PDF".to_string(), stream_url(base_url, chat_id, &file.name, file.msg_id, &file.hash)),
                ("⬇ Download".to_string(), encode(&CallbackAction::SendToBot {
                    msg_id: file.msg_id,
                    chat_id: chat.clone(),
                })),
            ]);
        }
        _ => {}
    }

    rows.push(vec![
        ("📤 Send to Bot".to_string(), encode(&CallbackAction::SendToBot { msg_id: file.msg_id, chat_id: chat.clone() })),
    ]);
    rows.push(vec![
        ("🔗 Jump to Message".to_string(), deep_link(chat_id, file.msg_id)),
    ]);
    rows.push(vec![
        ("⬅ Back".to_string(), encode(&CallbackAction::FolderPage {
            folder_id: folder_id.to_string(),
            chat_id: chat.clone(),
            page: 0,
        })),
    ]);
    rows
}

fn stream_url(base_url: &str, chat_id: i64, name: &str, msg_id: i32, hash: &str) -> String {
    let clean_id = crate::usecases::index_renderer::clean_chat_id(chat_id);
    format!(
        "{}/{}/{}?id={}&hash={}",
        base_url.trim_end_matches('/'),
        clean_id,
        urlencode(name),
        msg_id,
        hash
    )
}

fn deep_link(chat_id: i64, msg_id: i32) -> String {
    let clean_id = crate::usecases::index_renderer::clean_chat_id(chat_id);
    format!("https://t.me/c/{clean_id}/{msg_id}")
}

/// Minimal percent-encoding for the filename segment of the stream URL —
/// only the characters that would otherwise break the query string.
fn urlencode(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for b in name.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(b as char),
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ROOT_FOLDER;

    fn sample_page() -> ItemPage {
        ItemPage {
            folders: vec![Folder {
                id: "f1".into(),
                name: "Math".into(),
                parent_id: ROOT_FOLDER.into(),
                source_channel: Some(1),
                auto_created: true,
            }],
            files: vec![FileRecord {
                id: "x".into(),
                chat_id: 1,
                msg_id: 10,
                hash: "abc123".into(),
                name: "lecture.mp4".into(),
                size: 100,
                mime: MimeClass::Video,
                topic_folder_id: Some("f1".into()),
            }],
            has_more: false,
            folder_count: 1,
            file_count: 1,
            video_count: 1,
            pdf_count: 0,
        }
    }

    #[test]
    fn round_trips_every_action_through_encode_and_parse() {
        let actions = vec![
            CallbackAction::ChannelRoot { chat_id: "1".into() },
            CallbackAction::FolderPage { folder_id: "f1".into(), chat_id: "1".into(), page: 2 },
            CallbackAction::FileMenu { msg_id: 10, chat_id: "1".into(), hash: "abc".into(), folder_id: "f1".into() },
            CallbackAction::SendToBot { msg_id: 10, chat_id: "1".into() },
            CallbackAction::VcStart { msg_id: 10, chat_id: "1".into(), hash: "abc".into() },
            CallbackAction::VcSeek { chat_id: "1".into(), delta_secs: -30 },
            CallbackAction::VcSeekTo { chat_id: "1".into(), abs_secs: 120 },
            CallbackAction::Plan { key: "m".into() },
        ];
        for action in actions {
            assert_eq!(parse(&encode(&action)), Some(action));
        }
    }

    #[test]
    fn header_reports_counts_with_video_pdf_broken_out() {
        let page = sample_page();
        assert_eq!(build_header(&page), "📂 1 Folders | 🎬 1 Videos | 📕 0 PDFs | 📄 0 Others");
    }

    #[test]
    fn prev_next_retarget_same_page_at_the_ends() {
        let page = sample_page();
        let view = build_folder_view(&page, "f1", Some(ROOT_FOLDER), 1, 0, false, None);
        let nav = view.rows.last().unwrap();
        assert!(parse(&nav[0].1).unwrap() == CallbackAction::FolderPage { folder_id: "f1".into(), chat_id: "1".into(), page: 0 });
        assert!(parse(&nav[1].1).unwrap() == CallbackAction::FolderPage { folder_id: "f1".into(), chat_id: "1".into(), page: 0 });
    }

    #[test]
    fn vc_active_prepends_banner_and_control_row() {
        let page = sample_page();
        let view = build_folder_view(&page, "f1", None, 1, 0, true, Some("Song"));
        assert!(view.header.starts_with("🎵 Now Playing: Song"));
        assert!(view.rows[0].iter().any(|(label, _)| label.contains("Stop VC")));
    }

    #[test]
    fn video_file_actions_include_stream_and_vc() {
        let file = sample_page().files.remove(0);
        let rows = build_file_actions(&file, 1, "f1", "https://example.com");
        let labels: Vec<&str> = rows.iter().flatten().map(|(l, _)| l.as_str()).collect();
        assert!(labels.iter().any(|l| l.contains("Watch/Stream")));
        assert!(labels.iter().any(|l| l.contains("Play in VC")));
        assert!(labels.iter().any(|l| l.contains("Send to Bot")));
    }
}
