//! 章节切块模块
//!
//! 把一个章节的标记内容切分为不超过指定大小的文本块，切分只发生在顶层元素之间，
//! 任何单个元素都不会被拆到两个块中。

use crate::error::Result;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::ops::Range;

/// 没有结束标签的HTML元素，`<br>` 这类写法不能增加嵌套深度
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param",
    "source", "track", "wbr",
];

fn markup_reader(markup: &str) -> Reader<&[u8]> {
    let mut reader = Reader::from_str(markup);
    let config = reader.config_mut();
    config.trim_text(false);
    config.check_end_names = false;
    config.allow_unmatched_ends = true;
    reader
}

fn is_void(name: &[u8]) -> bool {
    VOID_ELEMENTS
        .iter()
        .any(|void| void.as_bytes().eq_ignore_ascii_case(name))
}

fn is_body(name: &[u8]) -> bool {
    name.eq_ignore_ascii_case(b"body")
}

/// 查找 `<body>` 的内部范围（不含起止标签）
///
/// 没有 `<body>` 时返回 `None`；缺少 `</body>` 时范围延伸到文本末尾。
pub fn body_range(markup: &str) -> Result<Option<Range<usize>>> {
    let mut reader = markup_reader(markup);
    let mut inner_start: Option<usize> = None;

    loop {
        let before = reader.buffer_position() as usize;
        let event = reader.read_event()?;
        let after = reader.buffer_position() as usize;
        match event {
            Event::Eof => break,
            Event::Start(e) if inner_start.is_none() && is_body(e.local_name().as_ref()) => {
                inner_start = Some(after);
            }
            Event::Empty(e) if inner_start.is_none() && is_body(e.local_name().as_ref()) => {
                return Ok(Some(after..after));
            }
            Event::End(e) if is_body(e.local_name().as_ref()) => {
                if let Some(start) = inner_start {
                    return Ok(Some(start..before));
                }
            }
            _ => {}
        }
    }

    Ok(inner_start.map(|start| start..markup.len()))
}

/// 把片段按顶层节点切开，返回每个节点在原文中的原样文本
///
/// 相邻节点首尾相接，所以全部节点按顺序拼接后与输入完全一致。
/// 未闭合的元素一直延伸到片段末尾。
pub fn top_level_nodes(fragment: &str) -> Result<Vec<&str>> {
    let mut reader = markup_reader(fragment);
    let mut nodes = Vec::new();
    let mut start = 0;
    let mut depth = 0usize;

    loop {
        let event = reader.read_event()?;
        let end = reader.buffer_position() as usize;
        match event {
            Event::Eof => break,
            Event::Start(e) if !is_void(e.local_name().as_ref()) => depth += 1,
            // `<br></br>` 的结束标签与开始标签一样不改变深度
            Event::End(e) if depth > 0 && !is_void(e.local_name().as_ref()) => depth -= 1,
            _ => {}
        }
        if depth == 0 && end > start {
            nodes.push(&fragment[start..end]);
            start = end;
        }
    }

    if start < fragment.len() {
        nodes.push(&fragment[start..]);
    }
    Ok(nodes)
}

/// 切分章节标记
///
/// 有 `<body>` 时只处理其子节点，否则处理整个文档的顶层节点。逐个累积节点，
/// 当加入下一个节点会使当前块超过 `max_size` 个字符且当前块非空时，先输出当前块。
/// 单个超大的元素仍然整块输出。
///
/// 输入为空时返回空列表；输入非空但没有任何子节点时，整段原文作为唯一的块返回。
///
/// # 示例
///
/// ```rust
/// use epub_translator::chunker::split_markup;
///
/// let chunks = split_markup("<p>one</p><p>two</p><p>three</p>", 20).unwrap();
/// assert_eq!(chunks, vec!["<p>one</p><p>two</p>", "<p>three</p>"]);
/// ```
pub fn split_markup(markup: &str, max_size: usize) -> Result<Vec<String>> {
    if markup.is_empty() {
        return Ok(Vec::new());
    }

    let root = match body_range(markup)? {
        Some(range) => &markup[range],
        None => markup,
    };

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for node in top_level_nodes(root)? {
        let node_len = node.chars().count();
        if current_len + node_len > max_size && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        current.push_str(node);
        current_len += node_len;
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    if chunks.is_empty() {
        chunks.push(markup.to_string());
    }

    Ok(chunks)
}

/// 用原文档的外壳包裹新的 body 内容
///
/// 原文档没有 `<body>` 时直接返回新内容。
pub fn rewrap_body(original: &str, body: &str) -> Result<String> {
    Ok(match body_range(original)? {
        Some(range) => {
            let mut out = String::with_capacity(original.len() - range.len() + body.len());
            out.push_str(&original[..range.start]);
            out.push_str(body);
            out.push_str(&original[range.end..]);
            out
        }
        None => body.to_string(),
    })
}

/// 提取标记中的纯文本（去掉标签、还原实体）
pub fn text_content(markup: &str) -> Result<String> {
    let mut reader = markup_reader(markup);
    let mut text = String::new();

    loop {
        match reader.read_event()? {
            Event::Eof => break,
            Event::Text(t) => match t.unescape() {
                Ok(unescaped) => text.push_str(&unescaped),
                Err(_) => text.push_str(&String::from_utf8_lossy(&t)),
            },
            Event::CData(t) => text.push_str(&String::from_utf8_lossy(&t)),
            _ => {}
        }
    }

    Ok(text)
}
