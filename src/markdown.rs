use regex::Regex;
use std::sync::LazyLock;

const FENCE: &str = "```";
const DEFAULT_LANGUAGE: &str = "text";

static FENCED_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```([^\n`]*)\n(.*?)```").expect("fenced block pattern is valid")
});

static INLINE_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"`([^`]+)`").expect("inline code pattern is valid"));

static CODE_HINTS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?s)```.*?```",
        r"`[^`]+`",
        r"function\s+\w+",
        r"const\s+\w+\s*=",
        r"let\s+\w+\s*=",
        r"var\s+\w+\s*=",
        r"class\s+\w+",
        r"import\s+.*from",
        r"console\.log",
        r"\.map\(|\.filter\(|\.reduce\(",
    ]
    .iter()
    .filter_map(|pattern| Regex::new(pattern).ok())
    .collect()
});

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SegmentKind {
    PlainText,
    InlineCode,
    FencedCode,
}

/// One renderable piece of a chat message.
///
/// `language` is only ever set on [`SegmentKind::FencedCode`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Segment {
    pub kind: SegmentKind,
    pub text: String,
    pub language: Option<String>,
}

impl Segment {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            kind: SegmentKind::PlainText,
            text: text.into(),
            language: None,
        }
    }

    pub fn inline_code(text: impl Into<String>) -> Self {
        Self {
            kind: SegmentKind::InlineCode,
            text: text.into(),
            language: None,
        }
    }

    pub fn fenced(language: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            kind: SegmentKind::FencedCode,
            text: text.into(),
            language: Some(language.into()),
        }
    }

    pub fn is_code(&self) -> bool {
        !matches!(self.kind, SegmentKind::PlainText)
    }

    pub fn language(&self) -> &str {
        self.language.as_deref().unwrap_or(DEFAULT_LANGUAGE)
    }

    /// What the copy button puts on the clipboard.
    pub fn copy_text(&self) -> &str {
        &self.text
    }
}

/// Splits a response into plain text, inline code and fenced code segments,
/// in source order.
///
/// Fences are matched first, non-overlapping and left to right, so nothing
/// inside a fence body is reinterpreted. An opening fence without a closing
/// one never matches and is kept as plain text.
pub fn extract_segments(text: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut cursor = 0;

    for caps in FENCED_BLOCK.captures_iter(text) {
        let (Some(whole), Some(body)) = (caps.get(0), caps.get(2)) else {
            continue;
        };

        push_inline_segments(&mut segments, &text[cursor..whole.start()]);

        let language = caps
            .get(1)
            .map(|tag| tag.as_str().trim())
            .filter(|tag| !tag.is_empty())
            .unwrap_or(DEFAULT_LANGUAGE);
        segments.push(Segment::fenced(language, trim_one_newline(body.as_str())));

        cursor = whole.end();
    }

    push_inline_segments(&mut segments, &text[cursor..]);
    segments
}

fn push_inline_segments(out: &mut Vec<Segment>, run: &str) {
    // Blank text between fences carries nothing to show.
    if run.trim().is_empty() {
        return;
    }

    // Anything from a stray fence onwards is an unterminated block: plain text.
    let (scannable, unterminated) = match run.find(FENCE) {
        Some(pos) => (&run[..pos], &run[pos..]),
        None => (run, ""),
    };

    let mut cursor = 0;
    for caps in INLINE_CODE.captures_iter(scannable) {
        let (Some(whole), Some(code)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        push_plain(out, &scannable[cursor..whole.start()]);
        out.push(Segment::inline_code(code.as_str()));
        cursor = whole.end();
    }
    push_plain(out, &scannable[cursor..]);
    push_plain(out, unterminated);
}

/// Pieces are kept verbatim, a lone space between two code spans included.
/// Adjacent plain pieces (text before an unterminated fence) become one segment.
fn push_plain(out: &mut Vec<Segment>, piece: &str) {
    if piece.is_empty() {
        return;
    }
    if let Some(last) = out.last_mut() {
        if last.kind == SegmentKind::PlainText {
            last.text.push_str(piece);
            return;
        }
    }
    out.push(Segment::plain(piece));
}

fn trim_one_newline(body: &str) -> &str {
    let body = body
        .strip_prefix("\r\n")
        .or_else(|| body.strip_prefix('\n'))
        .unwrap_or(body);
    body.strip_suffix("\r\n")
        .or_else(|| body.strip_suffix('\n'))
        .unwrap_or(body)
}

/// Rebuilds markdown source from segments, re-wrapping code markers.
pub fn to_markdown(segments: &[Segment]) -> String {
    let mut out = String::new();
    for segment in segments {
        match segment.kind {
            SegmentKind::PlainText => out.push_str(&segment.text),
            SegmentKind::InlineCode => {
                out.push('`');
                out.push_str(&segment.text);
                out.push('`');
            }
            SegmentKind::FencedCode => {
                out.push_str(FENCE);
                out.push_str(segment.language());
                out.push('\n');
                out.push_str(&segment.text);
                out.push('\n');
                out.push_str(FENCE);
            }
        }
    }
    out
}

/// Terminal rendering used by the one-shot CLI mode.
pub fn render_plain(segments: &[Segment]) -> String {
    let mut out = String::new();
    for segment in segments {
        match segment.kind {
            SegmentKind::PlainText => out.push_str(&segment.text),
            SegmentKind::InlineCode => {
                out.push('`');
                out.push_str(&segment.text);
                out.push('`');
            }
            SegmentKind::FencedCode => {
                if !out.is_empty() && !out.ends_with('\n') {
                    out.push('\n');
                }
                out.push_str(&format!("--- {} ---\n", segment.language()));
                out.push_str(&segment.text);
                if !segment.text.ends_with('\n') {
                    out.push('\n');
                }
                out.push_str("---\n");
            }
        }
    }
    out
}

pub fn has_code_content(text: &str) -> bool {
    CODE_HINTS.iter().any(|pattern| pattern.is_match(text))
}

pub fn language_class(language: &str) -> &'static str {
    match language.to_ascii_lowercase().as_str() {
        "javascript" => "language-javascript",
        "typescript" => "language-typescript",
        "python" => "language-python",
        "java" => "language-java",
        "cpp" => "language-cpp",
        "c" => "language-c",
        "csharp" => "language-csharp",
        "go" => "language-go",
        "rust" => "language-rust",
        "php" => "language-php",
        "ruby" => "language-ruby",
        "html" => "language-html",
        "css" => "language-css",
        "scss" => "language-scss",
        "sass" => "language-sass",
        "json" => "language-json",
        "xml" => "language-xml",
        "yaml" | "yml" => "language-yaml",
        "markdown" | "md" => "language-markdown",
        "sql" => "language-sql",
        "bash" | "shell" | "sh" => "language-bash",
        "powershell" | "ps1" => "language-powershell",
        "dockerfile" => "language-dockerfile",
        _ => "language-text",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn text_without_backticks_is_one_plain_segment() {
        let input = "Bonjour, voici une reponse\nsur deux lignes.";

        let segments = extract_segments(input);

        assert_eq!(segments, vec![Segment::plain(input)]);
    }

    #[test]
    fn whitespace_only_input_yields_nothing() {
        assert!(extract_segments("").is_empty());
        assert!(extract_segments("  \n\t ").is_empty());
    }

    #[test]
    fn single_inline_span() {
        assert_eq!(extract_segments("`x`"), vec![Segment::inline_code("x")]);
    }

    #[test]
    fn fenced_block_with_language() {
        let segments = extract_segments("```go\nfmt.Println()\n```");

        assert_eq!(segments, vec![Segment::fenced("go", "fmt.Println()")]);
    }

    #[test]
    fn fenced_block_without_tag_defaults_to_text() {
        let segments = extract_segments("```\nls -la\n```");

        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].language.as_deref(), Some("text"));
        assert_eq!(segments[0].text, "ls -la");
    }

    #[test]
    fn empty_fence_body_is_kept() {
        let segments = extract_segments("before\n```rust\n```\nafter");

        assert_eq!(
            segments,
            vec![
                Segment::plain("before\n"),
                Segment::fenced("rust", ""),
                Segment::plain("\nafter"),
            ]
        );
    }

    #[test]
    fn order_follows_source() {
        let input = "Use `cargo` like this:\n```sh\ncargo build\n```\nthen run `cargo test`.";

        let segments = extract_segments(input);

        let kinds: Vec<SegmentKind> = segments.iter().map(|s| s.kind).collect();
        assert_eq!(
            kinds,
            vec![
                SegmentKind::PlainText,
                SegmentKind::InlineCode,
                SegmentKind::PlainText,
                SegmentKind::FencedCode,
                SegmentKind::PlainText,
                SegmentKind::InlineCode,
                SegmentKind::PlainText,
            ]
        );
        assert_eq!(segments[1].text, "cargo");
        assert_eq!(segments[3].text, "cargo build");
        assert_eq!(segments[5].text, "cargo test");
    }

    #[test]
    fn backticks_inside_fence_are_not_inline_code() {
        let segments = extract_segments("```md\nuse `foo` here\n```");

        assert_eq!(segments, vec![Segment::fenced("md", "use `foo` here")]);
    }

    #[test]
    fn first_fence_wins_without_nesting() {
        let input = "```a\none\n```b\ntwo\n```";

        let segments = extract_segments(input);

        assert_eq!(segments[0], Segment::fenced("a", "one"));
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[1].kind, SegmentKind::PlainText);
    }

    #[test]
    fn unterminated_fence_is_plain_text() {
        let input = "Voici:\n```python\nprint(`x`)\n";

        let segments = extract_segments(input);

        assert_eq!(segments, vec![Segment::plain(input)]);
    }

    #[test]
    fn language_tag_is_taken_verbatim() {
        let segments = extract_segments("```objective-c++ (legacy)\nint x;\n```");

        assert_eq!(segments[0].language(), "objective-c++ (legacy)");
    }

    #[test]
    fn lone_backtick_stays_plain() {
        let segments = extract_segments("it's a ` tick");

        assert_eq!(segments, vec![Segment::plain("it's a ` tick")]);
    }

    #[test]
    fn only_one_newline_is_trimmed_around_body() {
        let segments = extract_segments("```\n\n  indented\n\n```");

        assert_eq!(segments[0].text, "  indented\n");
    }

    #[test]
    fn markdown_round_trip_for_balanced_markers() {
        let input = "Intro `a` and\n```rust\nfn main() {}\n```\nend `b`";

        let segments = extract_segments(input);

        assert_eq!(to_markdown(&segments), input);
    }

    #[test]
    fn space_between_inline_spans_is_kept() {
        let input = "Run `a` `b` now";

        let segments = extract_segments(input);

        assert_eq!(
            segments,
            vec![
                Segment::plain("Run "),
                Segment::inline_code("a"),
                Segment::plain(" "),
                Segment::inline_code("b"),
                Segment::plain(" now"),
            ]
        );
        assert_eq!(to_markdown(&segments), input);
    }

    #[test]
    fn blank_text_between_fences_is_dropped() {
        let segments = extract_segments("```sh\nls\n```\n\n```sh\npwd\n```");

        assert_eq!(
            segments,
            vec![Segment::fenced("sh", "ls"), Segment::fenced("sh", "pwd")]
        );
    }

    #[test]
    fn newline_next_to_inline_span_is_kept() {
        let segments = extract_segments("```sh\nls\n```\n`a`\n");

        assert_eq!(
            segments,
            vec![
                Segment::fenced("sh", "ls"),
                Segment::plain("\n"),
                Segment::inline_code("a"),
                Segment::plain("\n"),
            ]
        );
    }

    #[test]
    fn render_plain_frames_fenced_blocks() {
        let segments = extract_segments("Run:\n```sh\nmake\n```");

        assert_eq!(render_plain(&segments), "Run:\n--- sh ---\nmake\n---\n");
    }

    #[test]
    fn copy_text_is_code_body() {
        let segment = Segment::fenced("rust", "let x = 1;");
        assert_eq!(segment.copy_text(), "let x = 1;");
        assert!(segment.is_code());
    }

    #[test]
    fn code_detection_heuristics() {
        assert!(has_code_content("const answer = 42"));
        assert!(has_code_content("try `ls`"));
        assert!(has_code_content("items.map(f)"));
        assert!(!has_code_content("Le ciel est bleu."));
    }

    #[test]
    fn language_class_is_case_insensitive_with_fallback() {
        assert_eq!(language_class("Rust"), "language-rust");
        assert_eq!(language_class("yml"), "language-yaml");
        assert_eq!(language_class("sh"), "language-bash");
        assert_eq!(language_class("brainfuck"), "language-text");
    }

    #[derive(Clone, Debug)]
    enum Piece {
        Text(String),
        Inline(String),
        Fence(String, String),
    }

    impl Piece {
        fn write(&self, out: &mut String) {
            match self {
                Piece::Text(text) => out.push_str(text),
                Piece::Inline(code) => out.push_str(&format!("`{code}`")),
                Piece::Fence(lang, body) => out.push_str(&format!("```{lang}\n{body}\n```")),
            }
        }
    }

    fn arb_text() -> impl Strategy<Value = String> {
        "[^`]{0,12}[a-zA-Z0-9.,:!?][^`]{0,12}"
    }

    fn arb_piece() -> impl Strategy<Value = Piece> {
        prop_oneof![
            arb_text().prop_map(Piece::Text),
            "[a-z_()]{1,10}".prop_map(Piece::Inline),
            ("[a-z]{1,6}", "[a-z]([a-z ;=\n]{0,20}[a-z;])?")
                .prop_map(|(lang, body)| Piece::Fence(lang, body)),
        ]
    }

    proptest! {
        #[test]
        fn prop_backtick_free_text_is_one_plain_segment(input in arb_text()) {
            prop_assert_eq!(extract_segments(&input), vec![Segment::plain(&input)]);
        }

        #[test]
        fn prop_balanced_markers_round_trip(pieces in prop::collection::vec(arb_piece(), 0..8)) {
            let mut input = String::new();
            for piece in &pieces {
                piece.write(&mut input);
            }

            let segments = extract_segments(&input);

            prop_assert_eq!(to_markdown(&segments), input);
        }

        #[test]
        fn prop_unterminated_fence_stays_plain(
            prefix in arb_text(),
            tag in "[a-z]{0,6}",
            body in "[^`]{0,30}",
        ) {
            let input = format!("{prefix}```{tag}\n{body}");

            prop_assert_eq!(extract_segments(&input), vec![Segment::plain(&input)]);
        }

        #[test]
        fn prop_any_input_terminates(input in "[a-z `\n]{0,60}") {
            let segments = extract_segments(&input);

            for pair in segments.windows(2) {
                prop_assert!(pair[0].kind != SegmentKind::PlainText || pair[1].kind != SegmentKind::PlainText);
            }
            for segment in &segments {
                prop_assert!(segment.kind != SegmentKind::PlainText || !segment.text.is_empty());
            }
        }
    }
}
