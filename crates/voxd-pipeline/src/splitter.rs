//! Boundary-aware splitter that turns a stream of LLM tokens into
//! sentence-sized text chunks for TTS (§4.6.1 step 5). Adapted from a
//! batch-oriented markdown-to-speech preprocessor into an incremental
//! feeder: tokens accumulate in a buffer and a chunk is emitted as soon as a
//! sentence terminator or `CHUNK_MAX_CHARS` is reached.

/// Feed LLM tokens one at a time; collect emitted chunks via `push_token`
/// and the tail via `flush`.
pub struct ChunkSplitter {
    buffer: String,
    max_chars: usize,
}

impl ChunkSplitter {
    #[must_use]
    pub fn new(max_chars: usize) -> Self {
        Self {
            buffer: String::new(),
            max_chars: max_chars.max(1),
        }
    }

    /// Append one token and return every chunk that became ready.
    pub fn push_token(&mut self, token: &str) -> Vec<String> {
        self.buffer.push_str(token);
        self.drain_ready()
    }

    /// Emit whatever remains once the token stream ends.
    pub fn flush(&mut self) -> Option<String> {
        let remaining = std::mem::take(&mut self.buffer);
        to_chunk(&remaining)
    }

    fn drain_ready(&mut self) -> Vec<String> {
        let mut chunks = Vec::new();
        while let Some(boundary) = self.next_boundary() {
            let piece: String = self.buffer.drain(..boundary).collect();
            if let Some(chunk) = to_chunk(&piece) {
                chunks.push(chunk);
            }
        }
        chunks
    }

    fn next_boundary(&self) -> Option<usize> {
        if let Some(at) = sentence_terminator(&self.buffer) {
            return Some(at);
        }
        if self.buffer.len() >= self.max_chars {
            return Some(soft_boundary(&self.buffer, self.max_chars));
        }
        None
    }
}

fn to_chunk(raw: &str) -> Option<String> {
    let stripped = strip_markdown(raw);
    let trimmed = stripped.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// First `.`/`!`/`?` followed by whitespace or end-of-buffer, returned as a
/// byte offset just past the terminator.
fn sentence_terminator(text: &str) -> Option<usize> {
    for (i, ch) in text.char_indices() {
        if matches!(ch, '.' | '!' | '?') {
            let after = i + ch.len_utf8();
            if after >= text.len() || text[after..].starts_with(char::is_whitespace) {
                return Some(after);
            }
        }
    }
    None
}

/// When no sentence terminator has arrived but the buffer has grown past
/// `max_chars`, cut at the last clause punctuation before the limit, else
/// the last word boundary, else hard-cut at a char boundary.
fn soft_boundary(text: &str, max_chars: usize) -> usize {
    let limit = byte_limit(text, max_chars);
    let window = &text[..limit];

    if let Some(pos) = window.rfind([',', ';', ':', '\u{2014}', '\u{2013}']) {
        let mut end = pos + window[pos..].chars().next().map_or(1, char::len_utf8);
        while !text.is_char_boundary(end) {
            end += 1;
        }
        return end;
    }

    if let Some(pos) = window.rfind(char::is_whitespace) {
        if pos > 0 {
            return pos;
        }
    }

    limit
}

fn byte_limit(text: &str, max_chars: usize) -> usize {
    let mut limit = max_chars.min(text.len());
    while limit > 0 && !text.is_char_boundary(limit) {
        limit -= 1;
    }
    limit
}

/// Strip markdown and reasoning-block markup so TTS never has to "speak"
/// formatting syntax or hidden chain-of-thought.
#[must_use]
pub fn strip_markdown(text: &str) -> String {
    let without_thinking = strip_thinking_blocks(text);
    let mut lines: Vec<String> = Vec::new();

    for line in without_thinking.lines() {
        if is_horizontal_rule(line) {
            continue;
        }
        let stripped = strip_line_markdown(line);
        if !stripped.trim().is_empty() {
            lines.push(stripped);
        }
    }

    collapse_whitespace(&lines.join(" "))
}

fn strip_thinking_blocks(text: &str) -> String {
    let mut result = text.to_string();
    result = strip_tag_block_pair(&result, "<think", "</think>");
    result = strip_tag_block_pair(&result, "<reasoning>", "</reasoning>");
    result = strip_tag_block_pair(&result, "<seed:think>", "</seed:think>");
    result
}

fn strip_tag_block_pair(text: &str, open_prefix: &str, close_tag: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let haystack = text.to_ascii_lowercase();
    let open_lower = open_prefix.to_ascii_lowercase();
    let close_lower = close_tag.to_ascii_lowercase();
    let mut cursor = 0;

    while cursor < text.len() {
        if let Some(open_start) = haystack[cursor..].find(&open_lower) {
            let abs_open = cursor + open_start;
            if let Some(tag_end_offset) = haystack[abs_open..].find('>') {
                let tag_end = abs_open + tag_end_offset + 1;
                if let Some(close_offset) = haystack[tag_end..].find(&close_lower) {
                    let close_end = tag_end + close_offset + close_tag.len();
                    result.push_str(&text[cursor..abs_open]);
                    cursor = close_end;
                    continue;
                }
            }
            result.push_str(&text[cursor..abs_open + open_prefix.len()]);
            cursor = abs_open + open_prefix.len();
        } else {
            result.push_str(&text[cursor..]);
            break;
        }
    }
    result
}

fn is_horizontal_rule(line: &str) -> bool {
    let chars: Vec<char> = line.chars().filter(|c| !c.is_whitespace()).collect();
    chars.len() >= 3
        && chars.iter().all(|&c| c == '-' || c == '*' || c == '_')
        && chars.windows(2).all(|w| w[0] == w[1])
}

fn strip_line_markdown(line: &str) -> String {
    let mut s = line.to_string();
    while s.starts_with('>') {
        s = s.trim_start_matches('>').trim_start().to_string();
    }
    if s.starts_with('#') {
        s = s.trim_start_matches('#').trim_start().to_string();
    }
    s = strip_list_marker(&s);
    s = strip_images(&s);
    s = strip_links(&s);
    s = strip_inline_code(&s);
    s = strip_emphasis(&s);
    strip_html_tags(&s)
}

fn strip_list_marker(line: &str) -> String {
    let trimmed = line.trim_start();
    let indent = line.len() - trimmed.len();
    let prefix = &line[..indent];

    if let Some(rest) = trimmed
        .strip_prefix("- ")
        .or_else(|| trimmed.strip_prefix("* "))
        .or_else(|| trimmed.strip_prefix("+ "))
    {
        return format!("{prefix}{rest}");
    }

    if let Some(pos) = trimmed.find(|c: char| !c.is_ascii_digit()) {
        let after = &trimmed[pos..];
        if after.starts_with(". ") || after.starts_with(") ") {
            return format!("{prefix}{}", &after[2..]);
        }
    }
    line.to_string()
}

fn strip_images(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '!' && chars.peek() == Some(&'[') {
            chars.next();
            let alt: String = chars.by_ref().take_while(|&c| c != ']').collect();
            if chars.peek() == Some(&'(') {
                chars.next();
                let _url: String = chars.by_ref().take_while(|&c| c != ')').collect();
                if !alt.is_empty() {
                    result.push_str("image: ");
                    result.push_str(&alt);
                }
                continue;
            }
            result.push('!');
            result.push('[');
            result.push_str(&alt);
            result.push(']');
        } else {
            result.push(c);
        }
    }
    result
}

fn strip_links(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '[' {
            let link_text: String = chars.by_ref().take_while(|&c| c != ']').collect();
            if chars.peek() == Some(&'(') {
                chars.next();
                let _url: String = chars.by_ref().take_while(|&c| c != ')').collect();
                result.push_str(&link_text);
                continue;
            }
            result.push('[');
            result.push_str(&link_text);
            result.push(']');
        } else {
            result.push(c);
        }
    }
    result
}

fn strip_inline_code(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let bytes = text.as_bytes();
    let len = bytes.len();
    let mut i = 0;
    while i < len {
        if bytes[i] == b'`' {
            let start = i + 1;
            if let Some(end) = text[start..].find('`') {
                result.push_str(&text[start..start + end]);
                i = start + end + 1;
            } else {
                i += 1;
            }
        } else {
            result.push(bytes[i] as char);
            i += 1;
        }
    }
    result
}

fn strip_emphasis(text: &str) -> String {
    text.replace("**", "").replace("__", "").replace("~~", "").replace('*', "")
}

fn strip_html_tags(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut in_tag = false;
    for c in text.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => result.push(c),
            _ => {}
        }
    }
    result
}

fn collapse_whitespace(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut prev_space = false;
    for c in text.chars() {
        if c.is_whitespace() {
            if !prev_space {
                result.push(' ');
                prev_space = true;
            }
        } else {
            result.push(c);
            prev_space = false;
        }
    }
    result.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emits_a_chunk_on_sentence_terminator() {
        let mut splitter = ChunkSplitter::new(160);
        let mut chunks = Vec::new();
        for token in ["Hello", " world", ".", " More", " text"] {
            chunks.extend(splitter.push_token(token));
        }
        assert_eq!(chunks, vec!["Hello world."]);
        assert_eq!(splitter.flush(), Some("More text".to_string()));
    }

    #[test]
    fn forces_a_chunk_once_max_chars_is_exceeded_without_terminator() {
        let mut splitter = ChunkSplitter::new(20);
        let mut chunks = Vec::new();
        for token in ["this", " is", " a", " very", " long", " run", " of", " words", " with", " no", " punctuation"] {
            chunks.extend(splitter.push_token(token));
        }
        assert!(!chunks.is_empty());
        for chunk in &chunks {
            assert!(chunk.len() <= 30, "chunk too long: {chunk:?}");
        }
    }

    #[test]
    fn strips_markdown_emphasis_and_links() {
        let mut splitter = ChunkSplitter::new(160);
        splitter.push_token("**Hello** [world](https://example.com).");
        assert_eq!(splitter.flush(), Some("Hello world.".to_string()));
    }

    #[test]
    fn strips_thinking_blocks_across_the_whole_buffer() {
        let mut splitter = ChunkSplitter::new(160);
        splitter.push_token("<think>internal monologue</think>The actual answer.");
        assert_eq!(splitter.flush(), Some("The actual answer.".to_string()));
    }

    #[test]
    fn empty_stream_flushes_to_none() {
        let mut splitter = ChunkSplitter::new(160);
        assert_eq!(splitter.flush(), None);
    }
}
