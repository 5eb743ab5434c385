use ratatui::{
    Frame,
    layout::{Alignment, Constraint, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Clear, Paragraph},
};
use chatguru_core::{ChatRole, ContextMode, SessionSnapshot};
use crate::app::{App, InputMode, NoticeKind};
use crate::markdown::render_markdown;

const USER_BUBBLE: Color = Color::Rgb(0x28, 0x68, 0xc6);
const MODEL_BUBBLE: Color = Color::Rgb(0x44, 0x82, 0x43);
const ACCENT: Color = Color::Rgb(0x00, 0x7b, 0xff);
const SPINNER: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

/// Wrap text to fit within a given width, returning multiple lines
/// Uses word boundaries for wrapping (doesn't break mid-word)
fn wrap_text_to_width(text: &str, width: usize) -> Vec<String> {
    if width == 0 {
        return vec![text.to_string()];
    }

    let mut lines = Vec::new();
    let mut current_line = String::new();
    let mut current_len = 0;

    for word in text.split_whitespace() {
        let word_len = word.chars().count();

        if current_len == 0 {
            current_line = word.to_string();
            current_len = word_len;
        } else if current_len + 1 + word_len <= width {
            current_line.push(' ');
            current_line.push_str(word);
            current_len += 1 + word_len;
        } else {
            lines.push(std::mem::take(&mut current_line));
            current_line = word.to_string();
            current_len = word_len;
        }

        // Words longer than the bubble are split hard
        while current_len > width {
            let head: String = current_line.chars().take(width).collect();
            current_line = current_line.chars().skip(width).collect();
            current_len -= width;
            lines.push(head);
        }
    }

    if !current_line.is_empty() {
        lines.push(current_line);
    }

    if lines.is_empty() {
        lines.push(String::new());
    }

    lines
}

/// Wrap a styled line so no row is wider than `width`, keeping span styles.
///
/// Breaks at spaces where possible and splits words longer than a row.
/// Every returned line takes exactly one terminal row.
fn wrap_line(line: Line<'static>, width: usize) -> Vec<Line<'static>> {
    if width == 0 || line.width() <= width {
        return vec![line];
    }

    let alignment = line.alignment;
    let cells: Vec<(char, Style)> = line
        .spans
        .iter()
        .flat_map(|span| span.content.chars().map(move |c| (c, span.style)))
        .collect();

    let mut rows: Vec<Vec<(char, Style)>> = Vec::new();
    let mut row: Vec<(char, Style)> = Vec::new();
    let mut row_width = 0;
    let mut i = 0;

    while i < cells.len() {
        let start = i;
        let is_space = cells[i].0 == ' ';
        while i < cells.len() && (cells[i].0 == ' ') == is_space {
            i += 1;
        }
        let token = &cells[start..i];
        let token_width: usize = token.iter().map(|(c, _)| char_width(*c)).sum();

        if is_space {
            if row_width + token_width > width {
                if !row.is_empty() {
                    rows.push(std::mem::take(&mut row));
                    row_width = 0;
                }
            } else if !row.is_empty() || rows.is_empty() {
                // Leading indentation survives on the first row only
                row.extend_from_slice(token);
                row_width += token_width;
            }
            continue;
        }

        if row_width + token_width > width && token_width <= width {
            while row.last().is_some_and(|(c, _)| *c == ' ') {
                row.pop();
            }
            if !row.is_empty() {
                rows.push(std::mem::take(&mut row));
            }
            row_width = 0;
        }

        for &cell in token {
            let w = char_width(cell.0);
            if row_width + w > width && !row.is_empty() {
                rows.push(std::mem::take(&mut row));
                row_width = 0;
            }
            row.push(cell);
            row_width += w;
        }
    }

    if !row.is_empty() || rows.is_empty() {
        rows.push(row);
    }

    rows.into_iter()
        .map(|row| {
            let mut out = Line::from(styled_spans(row));
            out.alignment = alignment;
            out
        })
        .collect()
}

/// Display columns of one character, as ratatui measures it
fn char_width(c: char) -> usize {
    let mut buf = [0u8; 4];
    Span::raw(&*c.encode_utf8(&mut buf)).width()
}

/// Group consecutive cells of the same style back into spans
fn styled_spans(cells: Vec<(char, Style)>) -> Vec<Span<'static>> {
    let mut spans: Vec<Span<'static>> = Vec::new();
    let mut text = String::new();
    let mut current: Option<Style> = None;

    for (c, style) in cells {
        if current.is_some_and(|s| s != style) {
            spans.push(Span::styled(std::mem::take(&mut text), current.unwrap_or_default()));
        }
        current = Some(style);
        text.push(c);
    }
    if let Some(style) = current {
        spans.push(Span::styled(text, style));
    }

    spans
}

fn spinner(frame: usize) -> &'static str {
    SPINNER[frame % SPINNER.len()]
}

/// Build the conversation as bubbles: user on the right, model on the left.
///
/// Lines come back pre-wrapped to `width`, one terminal row each.
fn chat_lines(snapshot: &SessionSnapshot, width: u16, spinner_frame: usize) -> Vec<Line<'static>> {
    let width = width as usize;
    let bubble_width = (width * 7 / 10).max(10).min(width);
    let content_width = bubble_width.saturating_sub(2).max(1);
    let user_style = Style::default().bg(USER_BUBBLE).fg(Color::White);
    let model_style = Style::default().bg(MODEL_BUBBLE).fg(Color::White);
    let model_label = Line::from(Span::styled(
        "ChatGuru",
        Style::default().fg(MODEL_BUBBLE).add_modifier(Modifier::BOLD),
    ));

    let mut lines: Vec<Line<'static>> = Vec::new();

    for msg in snapshot.messages.iter() {
        match msg.role() {
            ChatRole::User => {
                lines.push(
                    Line::from(Span::styled(
                        "You",
                        Style::default().fg(USER_BUBBLE).add_modifier(Modifier::BOLD),
                    ))
                    .alignment(Alignment::Right),
                );

                let wrapped: Vec<String> = msg
                    .content()
                    .lines()
                    .flat_map(|line| wrap_text_to_width(line, content_width))
                    .collect();
                let inner = wrapped.iter().map(|l| l.chars().count()).max().unwrap_or(0);

                for line in wrapped {
                    lines.push(
                        Line::from(Span::styled(format!(" {:<inner$} ", line), user_style))
                            .alignment(Alignment::Right),
                    );
                }
            }
            ChatRole::Model => {
                lines.push(model_label.clone());
                for line in render_markdown(msg.content(), model_style) {
                    for row in wrap_line(line, content_width) {
                        let mut spans = vec![Span::styled(" ", model_style)];
                        spans.extend(row.spans);
                        spans.push(Span::styled(" ", model_style));
                        lines.push(Line::from(spans));
                    }
                }
            }
        }
        lines.push(Line::default());
    }

    let unanswered = snapshot
        .messages
        .last()
        .is_some_and(|msg| msg.role() == ChatRole::User);
    if !snapshot.pending && unanswered && snapshot.last_error.is_some() {
        // Drop the trailing spacer so the marker sits under the bubble
        lines.pop();
        lines.push(
            Line::from(Span::styled("no reply", Style::default().fg(Color::Red).italic()))
                .alignment(Alignment::Right),
        );
        lines.push(Line::default());
    }

    if snapshot.pending {
        lines.push(model_label);
        lines.push(Line::from(vec![
            Span::styled(format!(" {} ", spinner(spinner_frame)), model_style),
            Span::styled("Thinking ", model_style.add_modifier(Modifier::ITALIC)),
        ]));
    }

    lines.into_iter().flat_map(|line| wrap_line(line, width)).collect()
}

pub fn render(app: &mut App, frame: &mut Frame) {
    let area = frame.area();

    // Main layout: header, conversation, input, footer
    let [header_area, chat_area, input_area, footer_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(0),
        Constraint::Length(3),
        Constraint::Length(1),
    ])
    .areas(area);

    render_header(app, frame, header_area);
    render_chat(app, frame, chat_area);
    render_input(app, frame, input_area);
    render_footer(app, frame, footer_area);

    if app.show_api_key_input {
        render_api_key_input(app, frame, area);
    }
}

fn render_header(app: &App, frame: &mut Frame, area: Rect) {
    let title = Line::from(vec![
        Span::styled(" ChatGuru ", Style::default().fg(Color::Cyan).bold()),
        Span::styled(format!(" {} ", app.model_label()), Style::default().fg(Color::White)),
        Span::styled(
            format!("v{}", env!("CARGO_PKG_VERSION")),
            Style::default().fg(Color::Gray),
        ),
    ]);

    let header = Paragraph::new(title).style(Style::default().bg(Color::DarkGray));
    frame.render_widget(header, area);
}

fn render_chat(app: &mut App, frame: &mut Frame, area: Rect) {
    let title = match app.session.context_mode() {
        ContextMode::Isolated => " Chat ",
        ContextMode::Replay => " Chat (full history) ",
    };
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray))
        .title(title);
    let inner = block.inner(area);

    // Store dimensions for mouse hit-testing and scroll calculations
    app.chat_area = Some(area);
    app.chat_height = inner.height;
    app.chat_width = inner.width;

    if app.snapshot.messages.is_empty() && !app.snapshot.pending {
        frame.render_widget(block, area);
        render_empty_state(app, frame, inner);
        return;
    }

    let lines = chat_lines(&app.snapshot, inner.width, app.spinner_frame);
    let height = inner.height as usize;
    let max_offset = lines.len().saturating_sub(height);
    let offset = if app.follow_latest {
        max_offset
    } else {
        (app.chat_scroll as usize).min(max_offset)
    };

    // Scroll state is u16; very long sessions clamp there, the view itself does not
    let clamp = |rows: usize| rows.min(u16::MAX as usize) as u16;
    app.max_scroll = clamp(max_offset);
    app.chat_scroll = clamp(offset);

    let visible: Vec<Line<'static>> = lines.into_iter().skip(offset).take(height).collect();
    frame.render_widget(Paragraph::new(Text::from(visible)).block(block), area);
}

fn render_empty_state(app: &App, frame: &mut Frame, area: Rect) {
    let [_, center, _] = Layout::vertical([
        Constraint::Fill(1),
        Constraint::Length(3),
        Constraint::Fill(1),
    ])
    .areas(area);

    let hint = if app.session.config_error().is_some() {
        "Set GEMINI_API_KEY or press K in normal mode to add a key"
    } else {
        "Type a message and press Enter"
    };

    let text = Text::from(vec![
        Line::from(Span::styled("Start Chat", Style::default().add_modifier(Modifier::BOLD))),
        Line::default(),
        Line::from(Span::styled(hint, Style::default().fg(Color::DarkGray))),
    ]);

    frame.render_widget(Paragraph::new(text).alignment(Alignment::Center), center);
}

fn render_input(app: &App, frame: &mut Frame, area: Rect) {
    let [text_area, send_area] = Layout::horizontal([
        Constraint::Min(0),
        Constraint::Length(8),
    ])
    .areas(area);

    let editing = app.input_mode == InputMode::Editing && !app.show_api_key_input;
    let border_color = if editing { Color::Yellow } else { Color::DarkGray };

    let input_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(" Message ");

    // Inner width = total width - 2 (for borders)
    let inner_width = text_area.width.saturating_sub(2) as usize;
    let cursor_pos = app.cursor;

    // Scroll horizontally to keep the cursor visible
    let scroll_offset = if inner_width == 0 {
        0
    } else if cursor_pos >= inner_width {
        cursor_pos - inner_width + 1
    } else {
        0
    };

    let input = if app.input.is_empty() {
        Paragraph::new("Type your message...").style(Style::default().fg(Color::DarkGray))
    } else {
        let visible_text: String = app.input
            .chars()
            .skip(scroll_offset)
            .take(inner_width)
            .collect();
        Paragraph::new(visible_text).style(Style::default().fg(Color::White))
    };

    frame.render_widget(input.block(input_block), text_area);

    let send_label = if app.is_pending() {
        Span::styled(spinner(app.spinner_frame), Style::default().fg(ACCENT).bold())
    } else if app.input.trim().is_empty() {
        Span::styled("Send", Style::default().fg(Color::DarkGray))
    } else {
        Span::styled("Send", Style::default().fg(ACCENT).bold())
    };
    let send = Paragraph::new(Line::from(send_label))
        .alignment(Alignment::Center)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::DarkGray)),
        );
    frame.render_widget(send, send_area);

    if editing {
        let cursor_x = (cursor_pos - scroll_offset) as u16;
        frame.set_cursor_position((text_area.x + cursor_x + 1, text_area.y + 1));
    }
}

fn render_footer(app: &App, frame: &mut Frame, area: Rect) {
    if let Some(notice) = &app.notice {
        let style = match notice.kind {
            NoticeKind::Info => Style::default().bg(Color::Blue).fg(Color::White),
            NoticeKind::Warning => Style::default().bg(Color::Yellow).fg(Color::Black),
            NoticeKind::Error => Style::default().bg(Color::Red).fg(Color::White),
        };
        let line = Line::from(Span::styled(format!(" {} ", notice.text), style));
        frame.render_widget(Paragraph::new(line), area);
        return;
    }

    let (mode_text, mode_style) = match app.input_mode {
        InputMode::Normal => (" NORMAL ", Style::default().bg(Color::Blue).fg(Color::White)),
        InputMode::Editing => (" INSERT ", Style::default().bg(Color::Yellow).fg(Color::Black)),
    };

    // Key style: dark background with bright text for visibility on both light/dark terminals
    let key_style = Style::default().bg(Color::DarkGray).fg(Color::White);
    let label_style = Style::default().bg(Color::Black).fg(Color::White);

    let mut hints = vec![Span::styled(mode_text, mode_style), Span::raw(" ")];
    let keys: &[(&str, &str)] = match app.input_mode {
        InputMode::Editing => &[
            ("Enter", "send"),
            ("Esc", "normal"),
            ("↑/↓", "scroll"),
            ("C-l", "clear"),
            ("C-c", "quit"),
        ],
        InputMode::Normal => &[
            ("i", "type"),
            ("j/k", "scroll"),
            ("g/G", "top/bottom"),
            ("d", "clear"),
            ("K", "API key"),
            ("q", "quit"),
        ],
    };
    for (key, label) in keys {
        hints.push(Span::styled(format!(" {} ", key), key_style));
        hints.push(Span::styled(format!(" {} ", label), label_style));
    }

    frame.render_widget(Paragraph::new(Line::from(hints)), area);
}

fn render_api_key_input(app: &App, frame: &mut Frame, area: Rect) {
    // Calculate popup size and position (centered)
    let popup_width = 60.min(area.width.saturating_sub(4));
    let popup_height = 7;

    let popup_x = (area.width.saturating_sub(popup_width)) / 2;
    let popup_y = (area.height.saturating_sub(popup_height)) / 2;

    let popup_area = Rect::new(popup_x, popup_y, popup_width, popup_height);

    // Clear the area behind the popup
    frame.render_widget(Clear, popup_area);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow))
        .title(" Gemini API Key ");

    let inner = block.inner(popup_area);
    frame.render_widget(block, popup_area);

    let instructions = Paragraph::new("Paste your API key. Enter to save, Esc to cancel.")
        .style(Style::default().fg(Color::DarkGray));
    frame.render_widget(instructions, Rect::new(inner.x, inner.y, inner.width, 1));

    let input_area = Rect::new(inner.x, inner.y + 2, inner.width, 1);

    // Mask all but the last four characters
    let char_count = app.api_key_input.chars().count();
    let display_text = if char_count <= 4 {
        "*".repeat(char_count)
    } else {
        let masked_len = char_count - 4;
        let last_four: String = app.api_key_input.chars().skip(masked_len).collect();
        format!("{}{}", "*".repeat(masked_len), last_four)
    };
    let visible: String = display_text
        .chars()
        .skip(char_count.saturating_sub(input_area.width as usize))
        .collect();

    let key_line = Paragraph::new(visible).style(Style::default().fg(Color::Cyan));
    frame.render_widget(key_line, input_area);

    let cursor_x = app.api_key_input_cursor.min(input_area.width.saturating_sub(1) as usize) as u16;
    frame.set_cursor_position((input_area.x + cursor_x, input_area.y));

    let status = Paragraph::new(format!("{} characters", char_count))
        .style(Style::default().fg(Color::DarkGray));
    frame.render_widget(status, Rect::new(inner.x, inner.y + 4, inner.width, 1));
}
