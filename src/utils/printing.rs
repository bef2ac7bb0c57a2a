use std::io::{stdout, Write};
use termimad::crossterm::style::Color;
use termimad::{FmtText, MadSkin};

/// Prints answers as markdown in the terminal, and errors in their own skin.
pub struct MarkdownPrinter {
    pub skin: MadSkin,
    pub error_skin: MadSkin,
    pub wrap_width: Option<usize>,
}

impl Default for MarkdownPrinter {
    fn default() -> Self {
        let mut skin = MadSkin::default();
        skin.set_headers_fg(Color::Cyan);
        skin.bold.set_fg(Color::Yellow);
        let mut error_skin = MadSkin::default();
        error_skin.paragraph.compound_style.set_fg(Color::Red);
        error_skin.bold.set_fg(Color::Red);
        Self {
            skin,
            error_skin,
            wrap_width: None,
        }
    }
}

impl MarkdownPrinter {
    pub fn with_wrap_width(mut self, wrap_width: usize) -> Self {
        self.wrap_width = Some(wrap_width);
        self
    }

    /// `markdown` under a `## title` header, rendered with the answer skin.
    pub fn render_answer(&self, title: &str, markdown: &str) -> String {
        let text = format!("## {}\n\n{}\n", title, markdown);
        format!("{}", FmtText::from(&self.skin, &text, self.wrap_width))
    }

    pub fn render_error(&self, message: &str) -> String {
        let text = format!("**Error:** {}\n", message);
        format!("{}", FmtText::from(&self.error_skin, &text, self.wrap_width))
    }

    pub fn print_answer(&self, title: &str, markdown: &str) -> std::io::Result<()> {
        let mut out = stdout();
        write!(out, "{}", self.render_answer(title, markdown))?;
        out.flush()
    }

    pub fn print_error(&self, message: &str) -> std::io::Result<()> {
        let mut out = stdout();
        write!(out, "{}", self.render_error(message))?;
        out.flush()
    }
}
