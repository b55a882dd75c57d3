//! Text pre-pass applied before any speech synthesis

use regex::Regex;
use std::sync::LazyLock;

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

static BOLD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*\*(.*?)\*\*").expect("valid regex"));

static ITALIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*(.*?)\*").expect("valid regex"));

static FENCED_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```.*?```").expect("valid regex"));

static INLINE_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"`(.*?)`").expect("valid regex"));

static URL_SCHEME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://(\S+)").expect("valid regex"));

static REPEATED_DOTS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.{2,}").expect("valid regex"));

static REPEATED_BANGS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!{2,}").expect("valid regex"));

static REPEATED_QUESTIONS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\?{2,}").expect("valid regex"));

/// Symbols read out as words
pub const SPOKEN_SYMBOLS: &[(char, &str)] = &[
    ('&', "and"),
    ('@', "at"),
    ('#', "hash"),
    ('%', "percent"),
    ('$', "dollar"),
    ('+', "plus"),
    ('=', "equals"),
    ('<', "less than"),
    ('>', "greater than"),
    ('|', "pipe"),
    ('\\', "backslash"),
    ('/', "slash"),
    ('~', "tilde"),
    ('^', "caret"),
    ('`', "backtick"),
    ('[', "left bracket"),
    (']', "right bracket"),
    ('{', "left brace"),
    ('}', "right brace"),
    ('(', "left parenthesis"),
    (')', "right parenthesis"),
];

/// Prepare model output for a speech engine
///
/// Strips markdown emphasis and code, drops URL schemes, spells out
/// symbols and normalizes whitespace and repeated terminal punctuation.
/// Applying it twice gives the same result as applying it once.
#[must_use]
pub fn clean_for_speech(text: &str) -> String {
    // Newlines would stop the non-greedy patterns below from pairing markers
    let text = WHITESPACE.replace_all(text, " ");

    let text = BOLD.replace_all(&text, "$1");
    let text = ITALIC.replace_all(&text, "$1");
    let text = FENCED_CODE.replace_all(&text, "");
    let text = INLINE_CODE.replace_all(&text, "$1");
    let text = URL_SCHEME.replace_all(&text, "$1");

    let text = spell_symbols(&text);

    let text = WHITESPACE.replace_all(&text, " ");
    let text = REPEATED_DOTS.replace_all(&text, ".");
    let text = REPEATED_BANGS.replace_all(&text, "!");
    let text = REPEATED_QUESTIONS.replace_all(&text, "?");

    text.trim().to_string()
}

fn spell_symbols(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match SPOKEN_SYMBOLS.iter().find(|(symbol, _)| *symbol == c) {
            Some((_, word)) => {
                out.push(' ');
                out.push_str(word);
                out.push(' ');
            }
            None => out.push(c),
        }
    }
    out
}
