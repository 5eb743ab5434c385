//! Minimal markdown to styled text for model replies.
//!
//! Handles headings, bullets, block quotes, fenced code, and inline
//! `**bold**`, `*italic*`, `` `code` `` and `[links](url)`. Markers without
//! a closing partner are kept as literal text.

use ratatui::{
    style::{Color, Modifier, Style},
    text::{Line, Span},
};

pub const LINK_COLOR: Color = Color::Rgb(0x1e, 0x90, 0xff);
const CODE_COLOR: Color = Color::Rgb(0xf0, 0xe6, 0x8c);

/// Convert a whole reply into lines, all styled on top of `base`.
pub fn render_markdown(text: &str, base: Style) -> Vec<Line<'static>> {
    let mut lines = Vec::new();
    let mut in_code_block = false;

    for raw in text.lines() {
        let trimmed = raw.trim_start();

        if trimmed.starts_with("```") {
            in_code_block = !in_code_block;
            continue;
        }

        if in_code_block {
            lines.push(Line::from(Span::styled(raw.to_string(), base.fg(CODE_COLOR))));
            continue;
        }

        lines.push(render_block_line(trimmed, base));
    }

    lines
}

fn render_block_line(line: &str, base: Style) -> Line<'static> {
    if let Some((level, heading)) = heading(line) {
        let mut style = base.add_modifier(Modifier::BOLD);
        if level == 1 {
            style = style.add_modifier(Modifier::UNDERLINED);
        }
        return Line::from(parse_inline(heading, style));
    }

    if let Some(item) = ["- ", "* ", "+ "].iter().find_map(|marker| line.strip_prefix(marker)) {
        let mut spans = vec![Span::styled("  • ", base)];
        spans.extend(parse_inline(item, base));
        return Line::from(spans);
    }

    if let Some(quote) = line.strip_prefix('>') {
        let style = base.add_modifier(Modifier::ITALIC);
        let mut spans = vec![Span::styled("│ ", base.add_modifier(Modifier::DIM))];
        spans.extend(parse_inline(quote.trim_start(), style));
        return Line::from(spans);
    }

    let spans = parse_inline(line, base);
    if spans.is_empty() {
        Line::default()
    } else {
        Line::from(spans)
    }
}

/// `# Title` through `###### Title`
fn heading(line: &str) -> Option<(usize, &str)> {
    let level = line.chars().take_while(|c| *c == '#').count();
    if level == 0 || level > 6 {
        return None;
    }
    line[level..].strip_prefix(' ').map(|rest| (level, rest.trim()))
}

/// Parse inline markers within one line.
pub fn parse_inline(text: &str, base: Style) -> Vec<Span<'static>> {
    let chars: Vec<char> = text.chars().collect();
    let mut spans: Vec<Span<'static>> = Vec::new();
    let mut plain = String::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '*' | '_' if chars.get(i + 1) == Some(&c) => {
                if let Some(end) = find_closing(&chars, i + 2, &[c, c]) {
                    if end > i + 2 {
                        flush(&mut plain, &mut spans, base);
                        let inner: String = chars[i + 2..end].iter().collect();
                        spans.extend(parse_inline(&inner, base.add_modifier(Modifier::BOLD)));
                        i = end + 2;
                        continue;
                    }
                }
            }
            '*' | '_' => {
                // snake_case words are not emphasis
                let at_word_start = i == 0 || !chars[i - 1].is_alphanumeric();
                let opens = chars.get(i + 1).is_some_and(|n| !n.is_whitespace());
                if (c == '*' || at_word_start) && opens {
                    if let Some(end) = find_closing(&chars, i + 1, &[c]) {
                        flush(&mut plain, &mut spans, base);
                        let inner: String = chars[i + 1..end].iter().collect();
                        spans.extend(parse_inline(&inner, base.add_modifier(Modifier::ITALIC)));
                        i = end + 1;
                        continue;
                    }
                }
            }
            '`' => {
                if let Some(end) = find_closing(&chars, i + 1, &['`']) {
                    flush(&mut plain, &mut spans, base);
                    let code: String = chars[i + 1..end].iter().collect();
                    spans.push(Span::styled(code, base.fg(CODE_COLOR)));
                    i = end + 1;
                    continue;
                }
            }
            '[' => {
                if let Some((label, url, next)) = link_at(&chars, i) {
                    flush(&mut plain, &mut spans, base);
                    spans.push(Span::styled(
                        label.clone(),
                        base.fg(LINK_COLOR).add_modifier(Modifier::UNDERLINED),
                    ));
                    if url != label {
                        spans.push(Span::styled(
                            format!(" ({})", url),
                            base.add_modifier(Modifier::DIM),
                        ));
                    }
                    i = next;
                    continue;
                }
            }
            _ => {}
        }

        plain.push(c);
        i += 1;
    }

    flush(&mut plain, &mut spans, base);
    spans
}

/// `[label](url)` starting at `start`; returns label, url and the index after `)`
fn link_at(chars: &[char], start: usize) -> Option<(String, String, usize)> {
    let close = find_closing(chars, start + 1, &[']'])?;
    if chars.get(close + 1) != Some(&'(') {
        return None;
    }
    let end = find_closing(chars, close + 2, &[')'])?;
    let label: String = chars[start + 1..close].iter().collect();
    let url: String = chars[close + 2..end].iter().collect();
    if label.is_empty() || url.is_empty() {
        return None;
    }
    Some((label, url, end + 1))
}

fn find_closing(chars: &[char], from: usize, marker: &[char]) -> Option<usize> {
    if from >= chars.len() {
        return None;
    }
    chars[from..]
        .windows(marker.len())
        .position(|w| w == marker)
        .map(|pos| pos + from)
}

fn flush(plain: &mut String, spans: &mut Vec<Span<'static>>, style: Style) {
    if !plain.is_empty() {
        spans.push(Span::styled(std::mem::take(plain), style));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(spans: &[Span]) -> Vec<String> {
        spans.iter().map(|s| s.content.to_string()).collect()
    }

    fn has(span: &Span, modifier: Modifier) -> bool {
        span.style.add_modifier.contains(modifier)
    }

    #[test]
    fn test_plain_text_is_one_span() {
        let spans = parse_inline("just words", Style::default());
        assert_eq!(texts(&spans), vec!["just words"]);
    }

    #[test]
    fn test_bold_and_italic() {
        let spans = parse_inline("a **bold** and *soft* word", Style::default());
        assert_eq!(texts(&spans), vec!["a ", "bold", " and ", "soft", " word"]);
        assert!(has(&spans[1], Modifier::BOLD));
        assert!(has(&spans[3], Modifier::ITALIC));
        assert!(!has(&spans[0], Modifier::BOLD));
    }

    #[test]
    fn test_italic_nested_in_bold() {
        let spans = parse_inline("**very *much* so**", Style::default());
        assert_eq!(texts(&spans), vec!["very ", "much", " so"]);
        assert!(spans.iter().all(|s| has(s, Modifier::BOLD)));
        assert!(has(&spans[1], Modifier::ITALIC));
    }

    #[test]
    fn test_unclosed_markers_stay_literal() {
        let spans = parse_inline("2 * 3 and **open", Style::default());
        assert_eq!(texts(&spans).concat(), "2 * 3 and **open");
    }

    #[test]
    fn test_snake_case_is_not_italic() {
        let spans = parse_inline("call my_func_name now", Style::default());
        assert_eq!(texts(&spans), vec!["call my_func_name now"]);
    }

    #[test]
    fn test_inline_code() {
        let spans = parse_inline("run `cargo *build*` now", Style::default());
        assert_eq!(texts(&spans), vec!["run ", "cargo *build*", " now"]);
        assert_eq!(spans[1].style.fg, Some(CODE_COLOR));
    }

    #[test]
    fn test_link_shows_label_and_url() {
        let spans = parse_inline("see [docs](https://ai.google.dev) here", Style::default());
        assert_eq!(texts(&spans), vec!["see ", "docs", " (https://ai.google.dev)", " here"]);
        assert_eq!(spans[1].style.fg, Some(LINK_COLOR));
        assert!(has(&spans[1], Modifier::UNDERLINED));
    }

    #[test]
    fn test_brackets_without_url_are_literal() {
        let spans = parse_inline("an [aside] only", Style::default());
        assert_eq!(texts(&spans), vec!["an [aside] only"]);
    }

    #[test]
    fn test_headings() {
        let lines = render_markdown("# Title\n### Sub *part*\n#nospace", Style::default());
        assert_eq!(lines.len(), 3);
        assert_eq!(texts(&lines[0].spans), vec!["Title"]);
        assert!(has(&lines[0].spans[0], Modifier::BOLD));
        assert!(has(&lines[0].spans[0], Modifier::UNDERLINED));
        assert_eq!(texts(&lines[1].spans), vec!["Sub ", "part"]);
        assert!(!has(&lines[1].spans[0], Modifier::UNDERLINED));
        assert_eq!(texts(&lines[2].spans), vec!["#nospace"]);
    }

    #[test]
    fn test_bullets_and_code_block() {
        let text = "- one\n* **two**\n```\nlet x = *y;\n```\nafter";
        let lines = render_markdown(text, Style::default());
        assert_eq!(lines.len(), 4);
        assert_eq!(texts(&lines[0].spans), vec!["  • ", "one"]);
        assert_eq!(texts(&lines[1].spans), vec!["  • ", "two"]);
        assert_eq!(texts(&lines[2].spans), vec!["let x = *y;"]);
        assert_eq!(texts(&lines[3].spans), vec!["after"]);
    }

    #[test]
    fn test_base_style_is_kept() {
        let base = Style::default().bg(Color::Green);
        let lines = render_markdown("plain **bold**", base);
        assert!(lines[0].spans.iter().all(|s| s.style.bg == Some(Color::Green)));
    }

    #[test]
    fn test_blank_lines_are_preserved() {
        let lines = render_markdown("first\n\nsecond", Style::default());
        assert_eq!(lines.len(), 3);
        assert!(lines[1].spans.is_empty());
    }
}
