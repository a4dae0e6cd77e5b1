//! 文档模块
//!
//! 电子书在内存中的表示：按清单顺序排列的条目列表。负责EPUB容器的读写、
//! 章节编号与范围选择，以及章节预览。

use crate::chunker;
use crate::error::{Result, TranslationError};
use crate::types::{Chapter, ItemId};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::OnceLock;
use tracing::{debug, info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const CONTAINER_PATH: &str = "META-INF/container.xml";
const PREVIEW_CHARS: usize = 250;

/// 条目类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    /// 可翻译的正文章节
    Chapter,
    /// 导航文档（nav）
    Navigation,
    /// 图片、样式表、字体等其他资源
    Other,
}

impl ItemKind {
    pub fn classify(media_type: &str, properties: &str) -> Self {
        let is_document = matches!(
            media_type.trim().to_ascii_lowercase().as_str(),
            "application/xhtml+xml" | "text/html"
        );
        if !is_document {
            ItemKind::Other
        } else if properties.split_whitespace().any(|p| p == "nav") {
            ItemKind::Navigation
        } else {
            ItemKind::Chapter
        }
    }
}

/// 文档中的一个条目
#[derive(Debug, Clone)]
pub struct DocumentItem {
    pub id: String,
    /// 在容器中的完整路径
    pub href: String,
    pub media_type: String,
    pub kind: ItemKind,
    content: Vec<u8>,
    /// 第一次被替换前的内容
    original: Option<Vec<u8>>,
    entry: Option<usize>,
}

impl DocumentItem {
    pub fn new(
        id: impl Into<String>,
        href: impl Into<String>,
        media_type: impl Into<String>,
        content: impl Into<Vec<u8>>,
    ) -> Self {
        let media_type = media_type.into();
        Self {
            id: id.into(),
            href: href.into(),
            kind: ItemKind::classify(&media_type, ""),
            media_type,
            content: content.into(),
            original: None,
            entry: None,
        }
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    pub fn is_replaced(&self) -> bool {
        self.original.is_some()
    }

    /// 写回容器时使用的字节：被替换的章节如果只剩 body 片段，套回原文件的外壳
    fn bytes_for_output(&self) -> Vec<u8> {
        let Some(original) = &self.original else {
            return self.content.clone();
        };
        let content = String::from_utf8_lossy(&self.content);
        if self.kind != ItemKind::Chapter || content.to_ascii_lowercase().contains("<html") {
            return self.content.clone();
        }
        match chunker::rewrap_body(&String::from_utf8_lossy(original), &content) {
            Ok(wrapped) => wrapped.into_bytes(),
            Err(e) => {
                warn!("Could not rewrap {}: {}; writing the fragment as is", self.href, e);
                self.content.clone()
            }
        }
    }
}

struct PackageEntry {
    name: String,
    data: Vec<u8>,
    compression: CompressionMethod,
    last_modified: zip::DateTime,
    unix_mode: Option<u32>,
    is_dir: bool,
}

/// 电子书文档
///
/// 条目顺序稳定，章节号由章节类条目在其中的先后位置决定。
pub struct Document {
    items: Vec<DocumentItem>,
    entries: Vec<PackageEntry>,
}

impl Document {
    /// 不依赖容器，直接由条目构建文档
    pub fn from_items(items: Vec<DocumentItem>) -> Self {
        Self {
            items,
            entries: Vec::new(),
        }
    }

    /// 读取EPUB文件
    pub fn read_epub<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let mut zip = ZipArchive::new(file)?;

        let mut entries = Vec::with_capacity(zip.len());
        for i in 0..zip.len() {
            let mut file = zip.by_index(i)?;
            let mut data = Vec::with_capacity(file.size() as usize);
            file.read_to_end(&mut data)?;
            entries.push(PackageEntry {
                name: file.name().to_string(),
                data,
                compression: file.compression(),
                last_modified: file.last_modified().unwrap_or_default(),
                unix_mode: file.unix_mode(),
                is_dir: file.is_dir(),
            });
        }

        let index: HashMap<&str, usize> = entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.name.as_str(), i))
            .collect();

        let container = index
            .get(CONTAINER_PATH)
            .map(|&i| &entries[i].data)
            .ok_or_else(|| TranslationError::Epub(format!("missing {}", CONTAINER_PATH)))?;
        let opf_path = rootfile_path(container)?;
        let opf = index
            .get(opf_path.as_str())
            .map(|&i| &entries[i].data)
            .ok_or_else(|| TranslationError::Epub(format!("missing package document {}", opf_path)))?;
        let opf_dir = opf_path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("");

        let mut items = Vec::new();
        for manifest in manifest_items(opf)? {
            let href = resolve_href(opf_dir, &manifest.href);
            let Some(&entry) = index.get(href.as_str()) else {
                warn!("Manifest item {} points to missing file {}", manifest.id, href);
                continue;
            };
            items.push(DocumentItem {
                kind: ItemKind::classify(&manifest.media_type, &manifest.properties),
                id: manifest.id,
                href,
                media_type: manifest.media_type,
                content: entries[entry].data.clone(),
                original: None,
                entry: Some(entry),
            });
        }

        info!(
            "Read {} ({} items, {} chapters)",
            path.display(),
            items.len(),
            items.iter().filter(|i| i.kind == ItemKind::Chapter).count()
        );
        Ok(Self { items, entries })
    }

    /// 写出EPUB文件，条目顺序和压缩方式与原文件一致
    pub fn write_epub<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        if self.entries.is_empty() {
            return Err(TranslationError::Epub(
                "document was not read from an EPUB container".to_string(),
            ));
        }

        let replacements: HashMap<usize, Vec<u8>> = self
            .items
            .iter()
            .filter(|item| item.is_replaced())
            .filter_map(|item| item.entry.map(|entry| (entry, item.bytes_for_output())))
            .collect();

        let path = path.as_ref();
        let file = File::create(path)?;
        let mut zout = ZipWriter::new(file);
        for (i, ent) in self.entries.iter().enumerate() {
            let mut opts = SimpleFileOptions::default()
                .compression_method(ent.compression)
                .last_modified_time(ent.last_modified);
            if let Some(mode) = ent.unix_mode {
                opts = opts.unix_permissions(mode);
            }
            if ent.is_dir || ent.name.ends_with('/') {
                zout.add_directory(ent.name.as_str(), opts)?;
            } else {
                zout.start_file(ent.name.as_str(), opts)?;
                zout.write_all(replacements.get(&i).unwrap_or(&ent.data))?;
            }
        }
        zout.finish()?;

        info!("Wrote {} ({} chapters replaced)", path.display(), replacements.len());
        Ok(())
    }

    pub fn items(&self) -> &[DocumentItem] {
        &self.items
    }

    pub fn item(&self, id: ItemId) -> Option<&DocumentItem> {
        self.items.get(id.0)
    }

    pub fn chapter_count(&self) -> usize {
        self.items
            .iter()
            .filter(|item| item.kind == ItemKind::Chapter)
            .count()
    }

    /// 替换条目内容，这是翻译结果写回文档的唯一入口
    pub fn replace_content(&mut self, id: ItemId, content: Vec<u8>) -> Result<()> {
        let item = self
            .items
            .get_mut(id.0)
            .ok_or_else(|| TranslationError::Custom(format!("no document item at {}", id.0)))?;
        let previous = std::mem::replace(&mut item.content, content);
        if item.original.is_none() {
            item.original = Some(previous);
        }
        debug!("Replaced content of {}", item.href);
        Ok(())
    }
}

/// 按章节范围选择章节
///
/// 章节号从1开始，只对章节类条目计数；其他条目不影响编号也不会被选中。
/// `from_chapter` 与 `to_chapter` 都是闭区间端点。
pub fn select_chapters(document: &Document, from_chapter: usize, to_chapter: usize) -> Vec<Chapter> {
    document
        .items
        .iter()
        .enumerate()
        .filter(|(_, item)| item.kind == ItemKind::Chapter)
        .enumerate()
        .map(|(n, (index, item))| (n + 1, index, item))
        .filter(|(number, _, _)| (from_chapter..=to_chapter).contains(number))
        .map(|(number, index, item)| Chapter {
            number,
            content: String::from_utf8_lossy(&item.content).into_owned(),
            item: ItemId(index),
        })
        .collect()
}

/// 章节预览
#[derive(Debug, Clone)]
pub struct ChapterPreview {
    pub number: usize,
    pub total: usize,
    /// 章节原始内容的字节数
    pub length: usize,
    /// 正文开头的纯文本
    pub beginning: String,
}

impl fmt::Display for ChapterPreview {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "▶️  Chapter {}/{} ({} characters)",
            self.number, self.total, self.length
        )?;
        write!(f, "{}\n\n", self.beginning)
    }
}

/// 列出所有章节及其开头文字，编号与 `select_chapters` 一致
pub fn chapter_previews(document: &Document) -> Result<Vec<ChapterPreview>> {
    let total = document.chapter_count();
    select_chapters(document, 0, usize::MAX)
        .into_iter()
        .map(|chapter| {
            let text = chunker::text_content(&chapter.content)?;
            let beginning: String = text.chars().take(PREVIEW_CHARS).collect();
            Ok(ChapterPreview {
                number: chapter.number,
                total,
                length: document
                    .item(chapter.item)
                    .map(|item| item.content().len())
                    .unwrap_or_else(|| chapter.content.len()),
                beginning: collapse_blank_lines(&beginning),
            })
        })
        .collect()
}

fn collapse_blank_lines(text: &str) -> String {
    static BLANK_LINES: OnceLock<std::result::Result<Regex, regex::Error>> = OnceLock::new();
    match BLANK_LINES.get_or_init(|| Regex::new(r"\n{2,}")) {
        Ok(re) => re.replace_all(text, "\n").into_owned(),
        Err(_) => text.to_string(),
    }
}

struct ManifestItem {
    id: String,
    href: String,
    media_type: String,
    properties: String,
}

fn xml_reader(data: &[u8]) -> Reader<&[u8]> {
    let mut reader = Reader::from_reader(data);
    reader.config_mut().trim_text(true);
    reader
}

fn attr(e: &BytesStart<'_>, name: &str) -> Result<Option<String>> {
    match e.try_get_attribute(name).map_err(markup_error)? {
        Some(a) => Ok(Some(a.unescape_value().map_err(markup_error)?.into_owned())),
        None => Ok(None),
    }
}

fn markup_error(e: impl fmt::Display) -> TranslationError {
    TranslationError::Markup(e.to_string())
}

fn rootfile_path(container: &[u8]) -> Result<String> {
    let mut reader = xml_reader(container);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_event_into(&mut buf)? {
            Event::Eof => break,
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"rootfile" => {
                if let Some(path) = attr(&e, "full-path")? {
                    return Ok(path);
                }
            }
            _ => {}
        }
    }
    Err(TranslationError::Epub("container.xml has no rootfile".to_string()))
}

fn manifest_items(opf: &[u8]) -> Result<Vec<ManifestItem>> {
    let mut reader = xml_reader(opf);
    let mut buf = Vec::new();
    let mut items = Vec::new();
    loop {
        buf.clear();
        match reader.read_event_into(&mut buf)? {
            Event::Eof => break,
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"item" => {
                let (Some(id), Some(href)) = (attr(&e, "id")?, attr(&e, "href")?) else {
                    warn!("Skipping manifest item without id or href");
                    continue;
                };
                items.push(ManifestItem {
                    id,
                    href,
                    media_type: attr(&e, "media-type")?.unwrap_or_default(),
                    properties: attr(&e, "properties")?.unwrap_or_default(),
                });
            }
            _ => {}
        }
    }
    Ok(items)
}

/// 把相对于OPF目录的 href 解析为容器内路径
fn resolve_href(base_dir: &str, href: &str) -> String {
    let href = href.split('#').next().unwrap_or(href);
    let mut segments: Vec<String> = base_dir
        .split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    for segment in percent_decode(href).split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other.to_string()),
        }
    }
    segments.join("/")
}

fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hi = (bytes[i + 1] as char).to_digit(16);
            let lo = (bytes[i + 2] as char).to_digit(16);
            if let (Some(hi), Some(lo)) = (hi, lo) {
                out.push((hi * 16 + lo) as u8);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn chapter_xhtml(title: &str, body: &str) -> String {
        format!(
            "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n\
             <html xmlns=\"http://www.w3.org/1999/xhtml\"><head><title>{}</title></head>\
             <body>{}</body></html>",
            title, body
        )
    }

    /// 写一个最小的EPUB：mimetype、container、OPF、若干章节和一张图片
    pub(crate) fn write_test_epub(path: &Path, chapters: &[(&str, String)]) {
        let file = File::create(path).unwrap();
        let mut zip = ZipWriter::new(file);
        let stored = || SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        let deflated = || SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        zip.start_file("mimetype", stored()).unwrap();
        zip.write_all(b"application/epub+zip").unwrap();

        zip.start_file(CONTAINER_PATH, deflated()).unwrap();
        zip.write_all(
            br#"<?xml version="1.0"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#,
        )
        .unwrap();

        let mut manifest = String::new();
        manifest.push_str(
            r#"<item id="nav" href="nav.xhtml" media-type="application/xhtml+xml" properties="nav"/>"#,
        );
        manifest.push_str(r#"<item id="cover" href="images/cover%20art.png" media-type="image/png"/>"#);
        for (name, _) in chapters {
            manifest.push_str(&format!(
                r#"<item id="{0}" href="text/{0}.xhtml" media-type="application/xhtml+xml"/>"#,
                name
            ));
        }
        manifest.push_str(r#"<item id="css" href="style.css" media-type="text/css"/>"#);
        let opf = format!(
            r#"<?xml version="1.0" encoding="utf-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0">
  <manifest>{}</manifest>
  <spine><itemref idref="nav"/></spine>
</package>"#,
            manifest
        );
        zip.start_file("OEBPS/content.opf", deflated()).unwrap();
        zip.write_all(opf.as_bytes()).unwrap();

        zip.start_file("OEBPS/nav.xhtml", deflated()).unwrap();
        zip.write_all(chapter_xhtml("Nav", "<nav><p>toc</p></nav>").as_bytes()).unwrap();
        zip.start_file("OEBPS/images/cover art.png", stored()).unwrap();
        zip.write_all(&[0x89, b'P', b'N', b'G']).unwrap();
        for (name, content) in chapters {
            zip.start_file(format!("OEBPS/text/{}.xhtml", name), deflated()).unwrap();
            zip.write_all(content.as_bytes()).unwrap();
        }
        zip.start_file("OEBPS/style.css", deflated()).unwrap();
        zip.write_all(b"p { margin: 0 }").unwrap();
        zip.finish().unwrap();
    }

    fn five_chapter_document() -> Document {
        let mut items = vec![DocumentItem::new("css", "style.css", "text/css", "p {}")];
        for n in 1..=5 {
            items.push(DocumentItem::new(
                format!("c{}", n),
                format!("c{}.xhtml", n),
                "application/xhtml+xml",
                format!("<p>chapter {}</p>", n),
            ));
            items.push(DocumentItem::new(
                format!("img{}", n),
                format!("img{}.png", n),
                "image/png",
                vec![0u8; 4],
            ));
        }
        Document::from_items(items)
    }

    #[test]
    fn classifies_items() {
        assert_eq!(ItemKind::classify("application/xhtml+xml", ""), ItemKind::Chapter);
        assert_eq!(ItemKind::classify("application/xhtml+xml", "nav scripted"), ItemKind::Navigation);
        assert_eq!(ItemKind::classify("image/jpeg", ""), ItemKind::Other);
        assert_eq!(ItemKind::classify("text/css", ""), ItemKind::Other);
    }

    #[test]
    fn selects_a_single_chapter_among_other_items() {
        let document = five_chapter_document();
        let chapters = select_chapters(&document, 2, 2);
        assert_eq!(chapters.len(), 1);
        assert_eq!(chapters[0].number, 2);
        assert_eq!(chapters[0].content, "<p>chapter 2</p>");
        assert_eq!(document.item(chapters[0].item).unwrap().id, "c2");
    }

    #[test]
    fn default_range_selects_everything() {
        let document = five_chapter_document();
        let numbers: Vec<usize> = select_chapters(&document, 0, 9999)
            .iter()
            .map(|c| c.number)
            .collect();
        assert_eq!(numbers, vec![1, 2, 3, 4, 5]);
        assert!(select_chapters(&document, 6, 9999).is_empty());
        assert!(select_chapters(&document, 4, 3).is_empty());
    }

    #[test]
    fn resolves_hrefs_against_the_package_directory() {
        assert_eq!(resolve_href("OEBPS", "text/ch1.xhtml"), "OEBPS/text/ch1.xhtml");
        assert_eq!(resolve_href("OEBPS/text", "../images/a%20b.png"), "OEBPS/images/a b.png");
        assert_eq!(resolve_href("", "ch1.xhtml#start"), "ch1.xhtml");
        assert_eq!(percent_decode("100%"), "100%");
    }

    #[test]
    fn reads_manifest_items_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.epub");
        write_test_epub(
            &path,
            &[
                ("one", chapter_xhtml("One", "<p>First</p>")),
                ("two", chapter_xhtml("Two", "<p>Second</p>")),
            ],
        );

        let document = Document::read_epub(&path).unwrap();
        let kinds: Vec<ItemKind> = document.items().iter().map(|i| i.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ItemKind::Navigation,
                ItemKind::Other,
                ItemKind::Chapter,
                ItemKind::Chapter,
                ItemKind::Other
            ]
        );
        assert_eq!(document.items()[1].href, "OEBPS/images/cover art.png");
        assert_eq!(document.chapter_count(), 2);
    }

    #[test]
    fn replaced_fragments_are_rewrapped_on_write() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.epub");
        let output = dir.path().join("out.epub");
        write_test_epub(&input, &[("one", chapter_xhtml("One", "<p>First</p>"))]);

        let mut document = Document::read_epub(&input).unwrap();
        let chapter = select_chapters(&document, 1, 1).remove(0);
        document
            .replace_content(chapter.item, b"<p>Pierwszy</p>".to_vec())
            .unwrap();
        document.write_epub(&output).unwrap();

        let written = Document::read_epub(&output).unwrap();
        let content = String::from_utf8_lossy(written.items()[2].content()).into_owned();
        assert_eq!(content, chapter_xhtml("One", "<p>Pierwszy</p>"));
        assert_eq!(written.items()[1].content(), &[0x89, b'P', b'N', b'G']);

        let mut names = Vec::new();
        let mut zip = ZipArchive::new(File::open(&output).unwrap()).unwrap();
        for i in 0..zip.len() {
            names.push(zip.by_index(i).unwrap().name().to_string());
        }
        assert_eq!(names[0], "mimetype");
    }

    #[test]
    fn writing_requires_a_container() {
        let dir = tempfile::tempdir().unwrap();
        let document = five_chapter_document();
        let err = document.write_epub(dir.path().join("x.epub")).unwrap_err();
        assert!(matches!(err, TranslationError::Epub(_)));
    }

    #[test]
    fn previews_strip_markup_and_blank_lines() {
        let long = "word ".repeat(100);
        let document = Document::from_items(vec![
            DocumentItem::new("a", "a.xhtml", "application/xhtml+xml", "<h1>Title</h1>\n\n\n<p>Body</p>"),
            DocumentItem::new("b", "b.xhtml", "application/xhtml+xml", format!("<p>{}</p>", long)),
        ]);

        let previews = chapter_previews(&document).unwrap();
        assert_eq!(previews.len(), 2);
        assert_eq!(previews[0].beginning, "Title\nBody");
        assert_eq!(previews[0].total, 2);
        assert_eq!(previews[1].beginning.chars().count(), PREVIEW_CHARS);
        assert!(previews[0].to_string().starts_with("▶️  Chapter 1/2 ("));

        // 字节数，不是字符数
        let accented = Document::from_items(vec![DocumentItem::new(
            "c",
            "c.xhtml",
            "application/xhtml+xml",
            "<p>żółw</p>",
        )]);
        let previews = chapter_previews(&accented).unwrap();
        assert_eq!(previews[0].length, "<p>żółw</p>".len());
        assert_eq!(previews[0].length, 14);
        assert!(previews[0].to_string().contains("(14 characters)"));
    }
}
