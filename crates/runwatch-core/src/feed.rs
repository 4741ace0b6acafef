use crate::record::LineRecord;
use chrono::Local;
use regex::Regex;
use std::borrow::Cow;
use std::sync::OnceLock;

pub const DEFAULT_FEED_CAPACITY: usize = 800;

/// Capacity-bounded display lines backing the live feed.
#[derive(Debug, Clone)]
pub struct RunFeed {
    lines: Vec<String>,
    capacity: usize,
    dirty: usize,
}

impl RunFeed {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            lines: Vec::with_capacity(capacity),
            capacity,
            dirty: 0,
        }
    }

    /// Returns true when the head was trimmed.
    pub fn append(&mut self, line: String) -> bool {
        self.lines.push(line);
        self.dirty += 1;
        self.trim()
    }

    /// Appends a whole batch, trimming at most once.
    pub fn extend<I>(&mut self, lines: I) -> bool
    where
        I: IntoIterator<Item = String>,
    {
        let before = self.lines.len();
        self.lines.extend(lines);
        self.dirty += self.lines.len() - before;
        self.trim()
    }

    // A drained prefix would keep the grown allocation alive, so the retained
    // window moves into a fresh exact-capacity vector.
    fn trim(&mut self) -> bool {
        if self.lines.len() <= self.capacity {
            return false;
        }
        let start = self.lines.len() - self.capacity;
        let mut fresh = Vec::with_capacity(self.capacity);
        fresh.extend(self.lines.drain(start..));
        self.lines = fresh;
        true
    }

    pub fn render(&self) -> String {
        self.lines.join("\n")
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn allocated(&self) -> usize {
        self.lines.capacity()
    }

    pub fn dirty(&self) -> usize {
        self.dirty
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = 0;
    }

    pub fn clear(&mut self) {
        self.lines = Vec::with_capacity(self.capacity);
        self.dirty = 0;
    }
}

/// Scroll state of the rendered feed. Follow mode is derived from the scroll
/// position after every user scroll.
#[derive(Debug, Clone, Default)]
pub struct FeedViewport {
    content: String,
    line_count: usize,
    offset: usize,
    height: usize,
    follow: bool,
}

impl FeedViewport {
    pub fn new() -> Self {
        Self {
            follow: true,
            ..Self::default()
        }
    }

    pub fn set_content(&mut self, content: String) {
        self.line_count = if content.is_empty() {
            0
        } else {
            content.lines().count()
        };
        self.content = content;
        if self.follow {
            self.offset = self.max_offset();
        } else {
            self.offset = self.offset.min(self.max_offset());
        }
    }

    pub fn set_height(&mut self, height: usize) {
        if self.height == height {
            return;
        }
        self.height = height;
        if self.follow {
            self.offset = self.max_offset();
        } else {
            self.offset = self.offset.min(self.max_offset());
        }
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn line_count(&self) -> usize {
        self.line_count
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn follow(&self) -> bool {
        self.follow
    }

    pub fn max_offset(&self) -> usize {
        self.line_count.saturating_sub(self.height)
    }

    pub fn is_at_bottom(&self) -> bool {
        self.offset >= self.max_offset()
    }

    pub fn scroll_up(&mut self, lines: usize) {
        self.offset = self.offset.saturating_sub(lines);
        self.follow = self.is_at_bottom();
    }

    pub fn scroll_down(&mut self, lines: usize) {
        self.offset = (self.offset + lines).min(self.max_offset());
        self.follow = self.is_at_bottom();
    }

    pub fn page_up(&mut self) {
        self.scroll_up(self.height.max(1));
    }

    pub fn page_down(&mut self) {
        self.scroll_down(self.height.max(1));
    }

    pub fn goto_top(&mut self) {
        self.offset = 0;
        self.follow = self.is_at_bottom();
    }

    pub fn goto_bottom(&mut self) {
        self.offset = self.max_offset();
        self.follow = true;
    }

    pub fn toggle_follow(&mut self) {
        if self.follow {
            self.follow = false;
        } else {
            self.goto_bottom();
        }
    }

    pub fn reset(&mut self) {
        self.content.clear();
        self.line_count = 0;
        self.offset = 0;
        self.follow = true;
    }
}

pub fn format_feed_line(record: &LineRecord) -> String {
    let stamp = record.timestamp.with_timezone(&Local).format("%H:%M:%S");
    let text = strip_ansi(&record.text);
    if record.is_error {
        format!("{stamp} ! {text}")
    } else {
        format!("{stamp}   {text}")
    }
}

pub fn strip_ansi(text: &str) -> Cow<'_, str> {
    if !text.contains('\u{1b}') {
        return Cow::Borrowed(text);
    }
    ansi_pattern().replace_all(text, "")
}

fn ansi_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\x1b(?:\[[0-?]*[ -/]*[@-~]|\][^\x07\x1b]*(?:\x07|\x1b\\)|[@-Z\\-_])")
            .expect("valid regex")
    })
}
