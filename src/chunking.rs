//! Splits chapter bodies into translation-sized chunks.
//!
//! Lengths are counted in characters, not bytes. Paragraphs are never split
//! unless a single paragraph is longer than the chunk size, in which case it
//! is cut at sentence ends (`。！？`). Runs of dialogue are kept in one chunk
//! when they fit within 120% of the chunk size.

const DIALOGUE_MARKERS: &[&str] = &["说道", "道：", "说：", "问道", "笑道", "叫道"];
const SHORT_NARRATION: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub text: String,
    /// Tail of the previous chunk, given to the translator for continuity.
    pub context: Option<String>,
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn is_dialogue(paragraph: &str) -> bool {
    paragraph.contains(['"', '“', '”', '「', '」'])
        || DIALOGUE_MARKERS.iter().any(|m| paragraph.contains(m))
}

/// Index of the last paragraph in the dialogue block starting at `start`.
/// Short narration lines sandwiched between dialogue stay in the block.
fn dialogue_block_end(paragraphs: &[&str], start: usize) -> usize {
    let mut end = start;
    for i in start..paragraphs.len() {
        if is_dialogue(paragraphs[i]) {
            end = i;
        } else if char_len(paragraphs[i]) < SHORT_NARRATION
            && paragraphs.get(i + 1).is_some_and(|next| is_dialogue(next))
        {
            continue;
        } else {
            break;
        }
    }
    end
}

struct Builder {
    chunk_size: usize,
    chunks: Vec<String>,
    current: Vec<String>,
    current_len: usize,
}

impl Builder {
    fn flush(&mut self) {
        if !self.current.is_empty() {
            self.chunks.push(self.current.join("\n\n"));
            self.current.clear();
        }
        self.current_len = 0;
    }

    fn start_with(&mut self, parts: Vec<String>, len: usize) {
        self.flush();
        self.current = parts;
        self.current_len = len;
    }

    fn split_long_paragraph(&mut self, paragraph: &str) {
        self.flush();
        let mut buf = String::new();
        let mut buf_len = 0;
        for sentence in split_sentences(paragraph) {
            let len = char_len(&sentence);
            if len > self.chunk_size {
                if !buf.is_empty() {
                    self.chunks.push(std::mem::take(&mut buf));
                    buf_len = 0;
                }
                let chars = sentence.chars().collect::<Vec<_>>();
                for piece in chars.chunks(self.chunk_size) {
                    self.chunks.push(piece.iter().collect());
                }
            } else if buf_len + len > self.chunk_size {
                self.chunks.push(std::mem::replace(&mut buf, sentence));
                buf_len = len;
            } else {
                buf.push_str(&sentence);
                buf_len += len;
            }
        }
        if !buf.is_empty() {
            self.current = vec![buf];
            self.current_len = buf_len;
        }
    }
}

/// Splits after each `。`, `！` or `？`, keeping the terminator.
fn split_sentences(paragraph: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut buf = String::new();
    for ch in paragraph.chars() {
        buf.push(ch);
        if matches!(ch, '。' | '！' | '？') {
            out.push(std::mem::take(&mut buf));
        }
    }
    if !buf.is_empty() {
        out.push(buf);
    }
    out
}

pub fn chunk_text(text: &str, chunk_size: usize) -> Vec<String> {
    let chunk_size = chunk_size.max(1);
    let paragraphs = text
        .split("\n\n")
        .filter(|p| !p.trim().is_empty())
        .collect::<Vec<_>>();

    let mut b = Builder {
        chunk_size,
        chunks: Vec::new(),
        current: Vec::new(),
        current_len: 0,
    };

    let mut i = 0;
    while i < paragraphs.len() {
        let paragraph = paragraphs[i];

        if is_dialogue(paragraph) {
            let end = dialogue_block_end(&paragraphs, i);
            let block = paragraphs[i..=end]
                .iter()
                .map(|p| (*p).to_owned())
                .collect::<Vec<_>>();
            let block_len = char_len(&block.join("\n\n"));

            if b.current_len + block_len + 2 <= chunk_size {
                b.current.extend(block);
                b.current_len += block_len + 2;
                i = end + 1;
                continue;
            }
            if block_len * 5 <= chunk_size * 6 {
                b.start_with(block, block_len);
                i = end + 1;
                continue;
            }
            // Too big even with slack: fall through and treat paragraph by paragraph.
        }

        let len = char_len(paragraph);
        if len > chunk_size {
            b.split_long_paragraph(paragraph);
        } else if b.current_len + len + 2 > chunk_size {
            b.start_with(vec![paragraph.to_owned()], len);
        } else {
            b.current.push(paragraph.to_owned());
            b.current_len += len + 2;
        }
        i += 1;
    }
    b.flush();
    b.chunks
}

/// Like [`chunk_text`], but each chunk after the first carries the last
/// `overlap` characters of its predecessor as context.
pub fn chunk_with_context(text: &str, chunk_size: usize, overlap: usize) -> Vec<Chunk> {
    let raw = chunk_text(text, chunk_size);
    let mut out = Vec::with_capacity(raw.len());
    for (i, chunk) in raw.iter().enumerate() {
        let context = (i > 0 && overlap > 0).then(|| tail_chars(&raw[i - 1], overlap));
        out.push(Chunk {
            text: chunk.clone(),
            context,
        });
    }
    out
}

fn tail_chars(s: &str, n: usize) -> String {
    let len = char_len(s);
    s.chars().skip(len.saturating_sub(n)).collect()
}
