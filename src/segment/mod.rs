//! Sentence segmentation and transcript punctuation.
//!
//! Speech-to-text output arrives as a stream of fragments with little or no
//! punctuation. The segmenter splits the joined transcript into sentences
//! (tokens with their trailing whitespace preserved), and [`punctuate`]
//! reconstructs the text with terminal punctuation after every sentence
//! boundary.

/// One token plus whatever whitespace followed it in the source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub text: String,
    pub ws: String,
}

/// A run of tokens forming one sentence.
#[derive(Debug, Clone, Default)]
pub struct Sentence {
    pub tokens: Vec<Token>,
}

impl Sentence {
    /// Sentence text: tokens joined with their original trailing whitespace,
    /// then trimmed at the end.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for token in &self.tokens {
            out.push_str(&token.text);
            out.push_str(&token.ws);
        }
        out.trim_end().to_string()
    }
}

/// Capability interface over the sentence-boundary model.
pub trait Segmenter: Send + Sync {
    fn segment(&self, text: &str) -> Vec<Sentence>;
}

/// Heuristic segmenter.
///
/// Splits after tokens carrying terminal punctuation (`.` `!` `?`, with an
/// optional trailing quote), and additionally after `max_tokens` tokens so a
/// long unpunctuated dictation still breaks into sentences rather than one
/// run-on line.
#[derive(Debug, Clone)]
pub struct RuleSegmenter {
    max_tokens: usize,
}

impl Default for RuleSegmenter {
    fn default() -> Self {
        // Roughly the length of a long spoken sentence.
        Self { max_tokens: 18 }
    }
}

impl RuleSegmenter {
    pub fn new(max_tokens: usize) -> Self {
        Self {
            max_tokens: max_tokens.max(1),
        }
    }
}

fn ends_sentence(token: &str) -> bool {
    let trimmed = token.trim_end_matches(['"', '\'', ')', ']']);
    trimmed.ends_with(['.', '!', '?'])
}

/// Split `text` into (token, trailing whitespace) pairs.
fn tokenize(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();

    while chars.peek().is_some() {
        let mut word = String::new();
        while let Some(&c) = chars.peek() {
            if c.is_whitespace() {
                break;
            }
            word.push(c);
            chars.next();
        }

        let mut ws = String::new();
        while let Some(&c) = chars.peek() {
            if !c.is_whitespace() {
                break;
            }
            ws.push(c);
            chars.next();
        }

        if !word.is_empty() {
            tokens.push(Token { text: word, ws });
        }
    }

    tokens
}

impl Segmenter for RuleSegmenter {
    fn segment(&self, text: &str) -> Vec<Sentence> {
        let tokens = tokenize(text);
        let mut sentences = Vec::new();
        let mut current = Sentence::default();

        for token in tokens {
            let boundary = ends_sentence(&token.text);
            current.tokens.push(token);

            if boundary || current.tokens.len() >= self.max_tokens {
                sentences.push(std::mem::take(&mut current));
            }
        }

        if !current.tokens.is_empty() {
            sentences.push(current);
        }

        sentences
    }
}

/// Reconstruct punctuated text from segmented sentences.
///
/// Each sentence keeps its tokens' original trailing whitespace; a period
/// and a space are appended after every sentence boundary, even when the
/// sentence already carries terminal punctuation, and trailing whitespace
/// is trimmed.
pub fn punctuate(sentences: &[Sentence]) -> String {
    let mut out = String::new();

    for sentence in sentences {
        let text = sentence.text();
        if text.is_empty() {
            continue;
        }

        out.push_str(&text);
        out.push_str(". ");
    }

    out.trim_end().to_string()
}

/// Segment and punctuate in one step.
pub fn punctuate_text(segmenter: &dyn Segmenter, text: &str) -> String {
    punctuate(&segmenter.segment(text))
}
