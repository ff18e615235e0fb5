//! Full-screen terminal front end for the [`Menu`] prompts.

use std::collections::BTreeSet;
use std::io;

use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    Frame, Terminal,
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph, Wrap},
};
use tracing::debug;
use unicode_truncate::UnicodeTruncateStr;

use crate::menu::Menu;

/// Filterable list selection, independent of the terminal.
#[derive(Debug, Clone)]
pub struct Picker {
    items: Vec<String>,
    filter: String,
    cursor: usize,
    marked: BTreeSet<usize>,
    multi: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PickerEvent {
    Pending,
    Done(Vec<usize>),
    Cancelled,
}

impl Picker {
    pub fn new(items: &[String], multi: bool) -> Self {
        Self {
            items: items.to_vec(),
            filter: String::new(),
            cursor: 0,
            marked: BTreeSet::new(),
            multi,
        }
    }

    /// Indices of items matching the filter, in list order.
    pub fn visible(&self) -> Vec<usize> {
        let needle = self.filter.to_lowercase();
        self.items
            .iter()
            .enumerate()
            .filter(|(_, item)| needle.is_empty() || item.to_lowercase().contains(&needle))
            .map(|(i, _)| i)
            .collect()
    }

    pub fn filter(&self) -> &str {
        &self.filter
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Item under the cursor.
    pub fn current(&self) -> Option<usize> {
        self.visible().get(self.cursor).copied()
    }

    pub fn is_marked(&self, index: usize) -> bool {
        self.marked.contains(&index)
    }

    pub fn move_by(&mut self, delta: isize) {
        let len = self.visible().len();
        if len == 0 {
            self.cursor = 0;
            return;
        }
        self.cursor = (self.cursor as isize + delta).clamp(0, len as isize - 1) as usize;
    }

    fn set_filter(&mut self, filter: String) {
        self.filter = filter;
        self.cursor = 0;
    }

    pub fn toggle(&mut self) {
        if let Some(index) = self.current()
            && !self.marked.remove(&index)
        {
            self.marked.insert(index);
        }
    }

    fn toggle_all(&mut self) {
        let visible = self.visible();
        if visible.iter().all(|i| self.marked.contains(i)) {
            for i in &visible {
                self.marked.remove(i);
            }
        } else {
            self.marked.extend(visible);
        }
    }

    /// Marked items, or the current one when nothing is marked.
    pub fn selected(&self) -> Vec<usize> {
        if self.multi && !self.marked.is_empty() {
            return self.marked.iter().copied().collect();
        }
        self.current().into_iter().collect()
    }

    pub fn handle_key(&mut self, key: KeyEvent) -> PickerEvent {
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        match key.code {
            KeyCode::Esc => return PickerEvent::Cancelled,
            KeyCode::Enter => {
                let selected = self.selected();
                if self.multi || !selected.is_empty() {
                    return PickerEvent::Done(selected);
                }
            }
            KeyCode::Up => self.move_by(-1),
            KeyCode::Down => self.move_by(1),
            KeyCode::PageUp => self.move_by(-10),
            KeyCode::PageDown => self.move_by(10),
            KeyCode::Char(' ') | KeyCode::Tab if self.multi => {
                self.toggle();
                self.move_by(1);
            }
            KeyCode::Char('a') if ctrl && self.multi => self.toggle_all(),
            KeyCode::Backspace => {
                let mut filter = self.filter.clone();
                filter.pop();
                self.set_filter(filter);
            }
            KeyCode::Char(c) if !ctrl => {
                let filter = format!("{}{}", self.filter, c);
                self.set_filter(filter);
            }
            _ => {}
        }
        PickerEvent::Pending
    }
}

fn restore_terminal() {
    let _ = disable_raw_mode();
    let _ = execute!(io::stdout(), LeaveAlternateScreen);
}

fn is_interrupt(key: &KeyEvent) -> bool {
    key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL)
}

fn interrupted() -> io::Error {
    io::Error::new(io::ErrorKind::Interrupted, "interrupted")
}

fn truncate(text: &str, width: u16) -> String {
    let (truncated, used) = text.unicode_truncate(width as usize);
    if truncated.len() < text.len() && used > 1 {
        let (shorter, _) = text.unicode_truncate(width as usize - 1);
        format!("{shorter}…")
    } else {
        truncated.to_string()
    }
}

/// Ratatui implementation of [`Menu`]; restores the terminal on drop.
pub struct TerminalMenu {
    terminal: Terminal<CrosstermBackend<io::Stdout>>,
    status: Option<String>,
}

impl TerminalMenu {
    pub fn new() -> io::Result<Self> {
        let original_hook = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |panic_info| {
            restore_terminal();
            original_hook(panic_info);
        }));

        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let terminal = Terminal::new(backend)?;
        Ok(Self {
            terminal,
            status: None,
        })
    }

    /// Next key press; Ctrl-C becomes an `Interrupted` error.
    fn next_key() -> io::Result<KeyEvent> {
        loop {
            if let Event::Key(key) = event::read()?
                && key.kind == KeyEventKind::Press
            {
                if is_interrupt(&key) {
                    return Err(interrupted());
                }
                return Ok(key);
            }
        }
    }

    fn pick(&mut self, label: &str, items: &[String], multi: bool) -> io::Result<Option<Vec<usize>>> {
        let mut picker = Picker::new(items, multi);
        self.status = None;
        loop {
            self.terminal
                .draw(|f| draw_picker(f, label, &picker))?;
            match picker.handle_key(Self::next_key()?) {
                PickerEvent::Pending => {}
                PickerEvent::Done(selected) => return Ok(Some(selected)),
                PickerEvent::Cancelled => return Ok(None),
            }
        }
    }
}

impl Drop for TerminalMenu {
    fn drop(&mut self) {
        restore_terminal();
        let _ = self.terminal.show_cursor();
    }
}

impl Menu for TerminalMenu {
    fn select_one(&mut self, label: &str, items: &[String]) -> io::Result<Option<usize>> {
        Ok(self
            .pick(label, items, false)?
            .and_then(|selected| selected.first().copied()))
    }

    fn select_many(&mut self, label: &str, items: &[String]) -> io::Result<Option<Vec<usize>>> {
        self.pick(label, items, true)
    }

    fn prompt(&mut self, label: &str) -> io::Result<Option<String>> {
        let mut input = String::new();
        loop {
            let status = self.status.clone();
            self.terminal
                .draw(|f| draw_prompt(f, label, &input, status.as_deref()))?;
            let key = Self::next_key()?;
            match key.code {
                KeyCode::Esc => return Ok(None),
                KeyCode::Enter => {
                    self.status = None;
                    return Ok(Some(input));
                }
                KeyCode::Backspace => {
                    input.pop();
                }
                KeyCode::Char(c) if !key.modifiers.contains(KeyModifiers::CONTROL) => {
                    input.push(c)
                }
                _ => {}
            }
        }
    }

    fn notify(&mut self, message: &str) -> io::Result<()> {
        debug!(message, "notify");
        self.terminal
            .draw(|f| draw_message(f, message, "Press any key to continue", Color::White))?;
        Self::next_key()?;
        Ok(())
    }

    fn show_status(&mut self, message: &str) -> io::Result<()> {
        self.status = Some(message.to_string());
        self.terminal
            .draw(|f| draw_message(f, message, "", Color::Yellow))?;
        Ok(())
    }
}

fn title_line(label: &str) -> Paragraph<'_> {
    Paragraph::new(label).style(
        Style::default()
            .fg(Color::Cyan)
            .add_modifier(Modifier::BOLD),
    )
}

fn layout(area: Rect) -> std::rc::Rc<[Rect]> {
    Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([
            Constraint::Length(1), // Title
            Constraint::Length(3), // Filter / input
            Constraint::Min(0),    // Body
            Constraint::Length(1), // Help
        ])
        .split(area)
}

fn draw_picker(frame: &mut Frame, label: &str, picker: &Picker) {
    let chunks = layout(frame.area());
    frame.render_widget(title_line(label), chunks[0]);

    let filter = Paragraph::new(picker.filter())
        .style(Style::default().fg(Color::White))
        .block(Block::default().borders(Borders::ALL).title("Filter"));
    frame.render_widget(filter, chunks[1]);

    let width = chunks[2].width.saturating_sub(6);
    let visible = picker.visible();
    let items: Vec<ListItem> = visible
        .iter()
        .map(|&i| {
            let mark = if picker.multi {
                if picker.is_marked(i) { "[x] " } else { "[ ] " }
            } else {
                ""
            };
            let text = truncate(&picker.items[i], width.saturating_sub(mark.len() as u16));
            ListItem::new(Line::from(vec![
                Span::styled(mark, Style::default().fg(Color::Green)),
                Span::raw(text),
            ]))
        })
        .collect();

    let title = format!("{} / {}", visible.len(), picker.items.len());
    let list = List::new(items)
        .block(Block::default().borders(Borders::ALL).title(title))
        .highlight_style(
            Style::default()
                .fg(Color::Black)
                .bg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        );
    let mut state = ListState::default();
    if !visible.is_empty() {
        state.select(Some(picker.cursor()));
    }
    frame.render_stateful_widget(list, chunks[2], &mut state);

    let help = if picker.multi {
        "↑/↓: navigate | Space: mark | Ctrl-A: mark all | Enter: confirm | Esc: back"
    } else {
        "↑/↓: navigate | type to filter | Enter: select | Esc: back"
    };
    frame.render_widget(
        Paragraph::new(help).style(Style::default().fg(Color::DarkGray)),
        chunks[3],
    );
}

fn draw_prompt(frame: &mut Frame, label: &str, input: &str, status: Option<&str>) {
    let chunks = layout(frame.area());
    frame.render_widget(title_line("anistream"), chunks[0]);

    let field = Paragraph::new(input)
        .style(Style::default().fg(Color::White))
        .block(Block::default().borders(Borders::ALL).title(label));
    frame.render_widget(field, chunks[1]);
    frame.set_cursor_position((chunks[1].x + input.chars().count() as u16 + 1, chunks[1].y + 1));

    if let Some(status) = status {
        frame.render_widget(
            Paragraph::new(status)
                .style(Style::default().fg(Color::Yellow))
                .wrap(Wrap { trim: true }),
            chunks[2],
        );
    }
    frame.render_widget(
        Paragraph::new("Enter: search | Esc: back | Ctrl-C: quit")
            .style(Style::default().fg(Color::DarkGray)),
        chunks[3],
    );
}

fn draw_message(frame: &mut Frame, message: &str, help: &str, color: Color) {
    let chunks = layout(frame.area());
    frame.render_widget(title_line("anistream"), chunks[0]);
    let lines: Vec<Line> = message.lines().map(Line::from).collect();
    frame.render_widget(
        Paragraph::new(lines)
            .style(Style::default().fg(color))
            .wrap(Wrap { trim: false }),
        chunks[2],
    );
    frame.render_widget(
        Paragraph::new(help).style(Style::default().fg(Color::DarkGray)),
        chunks[3],
    );
}
