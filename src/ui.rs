use crate::aggregate::{AggregationResult, Aggregator, BucketSummary, Granularity, PeriodKey};
use crate::expense::ExpenseRecord;
use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table, TableState},
    Frame, Terminal,
};
use std::io;

/// Dashboard over one set of expenses, re-aggregated when the granularity changes
pub struct App {
    pub expenses: Vec<ExpenseRecord>,
    pub known_categories: Vec<String>,
    pub granularity: Granularity,
    pub result: AggregationResult,
    pub state: TableState,
    pub show_detail: bool,
}

impl App {
    pub fn new(expenses: Vec<ExpenseRecord>, known_categories: Vec<String>) -> Self {
        let mut app = Self {
            expenses,
            known_categories,
            granularity: Granularity::Day,
            result: AggregationResult::default(),
            state: TableState::default(),
            show_detail: false,
        };
        app.set_granularity(Granularity::Month);
        app
    }

    pub fn set_granularity(&mut self, granularity: Granularity) {
        self.granularity = granularity;
        self.result = Aggregator::new(granularity)
            .with_known_categories(self.known_categories.iter().cloned())
            .aggregate(&self.expenses);

        // Newest bucket first in view; select it
        self.state
            .select(if self.result.is_empty() { None } else { Some(0) });
    }

    /// Buckets newest first
    pub fn rows(&self) -> Vec<(&PeriodKey, &BucketSummary)> {
        self.result.iter().rev().collect()
    }

    pub fn selected_bucket(&self) -> Option<(&PeriodKey, &BucketSummary)> {
        self.state
            .selected()
            .and_then(|i| self.result.iter().rev().nth(i))
    }

    pub fn toggle_detail(&mut self) {
        self.show_detail = !self.show_detail;
    }

    pub fn next(&mut self) {
        let len = self.result.len();
        if len == 0 {
            return;
        }
        let i = match self.state.selected() {
            Some(i) if i + 1 < len => i + 1,
            _ => 0,
        };
        self.state.select(Some(i));
    }

    pub fn previous(&mut self) {
        let len = self.result.len();
        if len == 0 {
            return;
        }
        let i = match self.state.selected() {
            Some(0) | None => len - 1,
            Some(i) => i - 1,
        };
        self.state.select(Some(i));
    }
}

pub fn run_ui(app: &mut App) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let res = run_app(&mut terminal, app);

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    res?;
    Ok(())
}

fn run_app<B: ratatui::backend::Backend>(
    terminal: &mut Terminal<B>,
    app: &mut App,
) -> io::Result<()> {
    loop {
        terminal.draw(|f| ui(f, app))?;

        if let Event::Key(key) = event::read()? {
            if key.kind != KeyEventKind::Press {
                continue;
            }
            match key.code {
                KeyCode::Char('q') | KeyCode::Esc => return Ok(()),
                KeyCode::Enter => app.toggle_detail(),
                KeyCode::Char('d') => app.set_granularity(Granularity::Day),
                KeyCode::Char('w') => app.set_granularity(Granularity::Week),
                KeyCode::Char('m') => app.set_granularity(Granularity::Month),
                KeyCode::Down | KeyCode::Char('j') => app.next(),
                KeyCode::Up | KeyCode::Char('k') => app.previous(),
                _ => {}
            }
        }
    }
}

fn ui(f: &mut Frame, app: &mut App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header
            Constraint::Min(0),    // Buckets
            Constraint::Length(3), // Key help
        ])
        .split(f.size());

    render_header(f, chunks[0], app);

    if app.show_detail {
        let content = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
            .split(chunks[1]);

        render_table(f, content[0], app);
        render_detail_panel(f, content[1], app);
    } else {
        render_table(f, chunks[1], app);
    }

    render_status_bar(f, chunks[2]);
}

fn render_header(f: &mut Frame, area: Rect, app: &App) {
    let mut spans = Vec::new();
    for (i, granularity) in [Granularity::Day, Granularity::Week, Granularity::Month]
        .iter()
        .enumerate()
    {
        if i > 0 {
            spans.push(Span::raw(" │ "));
        }
        let style = if *granularity == app.granularity {
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD | Modifier::UNDERLINED)
        } else {
            Style::default().fg(Color::DarkGray)
        };
        spans.push(Span::styled(granularity.as_str(), style));
    }

    spans.push(Span::raw("  |  "));
    spans.push(Span::styled(
        format!("Expenses: {}", app.expenses.len()),
        Style::default().fg(Color::White),
    ));
    spans.push(Span::raw("  |  "));
    spans.push(Span::styled(
        format!("Total: {:.2}", app.result.grand_total()),
        Style::default().fg(Color::Red),
    ));

    let header = Paragraph::new(Line::from(spans)).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Cyan)),
    );

    f.render_widget(header, area);
}

fn render_table(f: &mut Frame, area: Rect, app: &mut App) {
    let header = Row::new(["Period", "Categories", "Total"].iter().map(|h| {
        Cell::from(*h).style(
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        )
    }))
    .style(Style::default().bg(Color::DarkGray))
    .height(1);

    let rows: Vec<Row> = app
        .rows()
        .into_iter()
        .map(|(key, bucket)| {
            let spent = bucket
                .category_totals
                .values()
                .filter(|amount| !amount.is_zero())
                .count();
            Row::new(vec![
                Cell::from(key.to_string()),
                Cell::from(format!("{}/{}", spent, bucket.category_totals.len())),
                Cell::from(format!("{:.2}", bucket.total)).style(Style::default().fg(Color::Red)),
            ])
        })
        .collect();

    let table = Table::new(
        rows,
        [
            Constraint::Length(12),
            Constraint::Length(12),
            Constraint::Length(14),
        ],
    )
    .header(header)
    .block(
        Block::default()
            .borders(Borders::ALL)
            .title(format!(" Expenses by {} ", app.granularity)),
    )
    .highlight_style(
        Style::default()
            .bg(Color::DarkGray)
            .add_modifier(Modifier::BOLD),
    )
    .highlight_symbol("→ ");

    f.render_stateful_widget(table, area, &mut app.state);
}

fn render_detail_panel(f: &mut Frame, area: Rect, app: &App) {
    let mut lines = Vec::new();

    match app.selected_bucket() {
        Some((key, bucket)) => {
            lines.push(Line::from(Span::styled(
                key.to_string(),
                Style::default().add_modifier(Modifier::BOLD),
            )));
            lines.push(Line::from(""));

            for (category, amount) in &bucket.category_totals {
                let color = if amount.is_zero() {
                    Color::DarkGray
                } else {
                    Color::White
                };
                lines.push(Line::from(vec![
                    Span::styled(format!("{:<16}", category), Style::default().fg(color)),
                    Span::styled(format!("{:>12.2}", amount), Style::default().fg(color)),
                ]));
            }

            lines.push(Line::from(""));
            lines.push(Line::from(vec![
                Span::styled(format!("{:<16}", "Total"), Style::default().fg(Color::Yellow)),
                Span::styled(
                    format!("{:>12.2}", bucket.total),
                    Style::default().fg(Color::Yellow),
                ),
            ]));
        }
        None => lines.push(Line::from("No expenses")),
    }

    let panel = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title(" Breakdown "));

    f.render_widget(panel, area);
}

fn render_status_bar(f: &mut Frame, area: Rect) {
    let key = Style::default().fg(Color::Yellow);
    let spans = vec![
        Span::styled(" d/w/m", key),
        Span::raw(" Day/Week/Month | "),
        Span::styled("Enter", key),
        Span::raw(" Breakdown | "),
        Span::styled("↑/↓", key),
        Span::raw(" Nav | "),
        Span::styled("q", Style::default().fg(Color::Red)),
        Span::raw(" Quit"),
    ];

    let status_bar = Paragraph::new(Line::from(spans)).block(Block::default().borders(Borders::ALL));

    f.render_widget(status_bar, area);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn expense(category: &str, date: (i32, u32, u32)) -> ExpenseRecord {
        let date = NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap();
        ExpenseRecord::new(category, dec!(10), date, None).unwrap()
    }

    fn sample_app() -> App {
        App::new(
            vec![
                expense("Food", (2024, 1, 15)),
                expense("Travel", (2024, 2, 3)),
                expense("Food", (2024, 2, 20)),
            ],
            vec!["Food".to_string(), "Travel".to_string()],
        )
    }

    #[test]
    fn test_starts_monthly_with_newest_selected() {
        let app = sample_app();

        assert_eq!(app.granularity, Granularity::Month);
        let (key, bucket) = app.selected_bucket().unwrap();
        assert_eq!(key.as_str(), "2024-02");
        assert_eq!(bucket.total, dec!(20));
    }

    #[test]
    fn test_switching_granularity_reaggregates() {
        let mut app = sample_app();

        app.set_granularity(Granularity::Day);
        assert_eq!(app.result.len(), 3);
        assert_eq!(app.selected_bucket().unwrap().0.as_str(), "2024-02-20");

        app.set_granularity(Granularity::Week);
        assert_eq!(app.result.len(), 3);
        assert_eq!(app.result.grand_total(), dec!(30));
    }

    #[test]
    fn test_navigation_wraps() {
        let mut app = sample_app();

        app.next();
        assert_eq!(app.selected_bucket().unwrap().0.as_str(), "2024-01");
        app.next();
        assert_eq!(app.selected_bucket().unwrap().0.as_str(), "2024-02");
        app.previous();
        assert_eq!(app.selected_bucket().unwrap().0.as_str(), "2024-01");
    }

    #[test]
    fn test_zero_filled_categories_in_every_bucket() {
        let app = sample_app();
        assert!(app
            .rows()
            .iter()
            .all(|(_, bucket)| bucket.category_totals.len() == 2));
    }

    #[test]
    fn test_empty_app_has_no_selection() {
        let mut app = App::new(Vec::new(), Vec::new());
        assert!(app.selected_bucket().is_none());
        app.next();
        assert!(app.state.selected().is_none());
    }
}
