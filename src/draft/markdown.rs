use docx_rs::{BreakType, Docx, Paragraph, Run};
use pulldown_cmark::{Event, HeadingLevel, Options, Parser, Tag, TagEnd};
use std::fs::File;
use std::path::Path;

use super::DraftError;
use crate::compose::writer::{clean_text, page_break};

fn heading_size(level: HeadingLevel) -> usize {
    match level {
        HeadingLevel::H1 => 40,
        HeadingLevel::H2 => 32,
        HeadingLevel::H3 => 28,
        _ => 24,
    }
}

/// markdown 事件流 → docx-rs 段落
struct Renderer {
    paragraphs: Vec<Paragraph>,
    runs: Vec<Run>,
    open: bool,
    bold: usize,
    italic: usize,
    heading: Option<HeadingLevel>,
    /// one entry per open list: next number for ordered lists
    lists: Vec<Option<u64>>,
    in_code_block: bool,
    cell: usize,
}

impl Renderer {
    fn new() -> Self {
        Self {
            paragraphs: Vec::new(),
            runs: Vec::new(),
            open: false,
            bold: 0,
            italic: 0,
            heading: None,
            lists: Vec::new(),
            in_code_block: false,
            cell: 0,
        }
    }

    fn begin(&mut self) {
        if self.open {
            self.flush();
        }
        self.open = true;
    }

    fn flush(&mut self) {
        if !self.open {
            return;
        }
        let mut paragraph = Paragraph::new();
        for run in self.runs.drain(..) {
            paragraph = paragraph.add_run(run);
        }
        self.paragraphs.push(paragraph);
        self.open = false;
    }

    fn text(&mut self, text: &str) {
        if !self.open {
            self.begin();
        }
        let mut run = Run::new().add_text(clean_text(text));
        if self.bold > 0 || self.heading.is_some() {
            run = run.bold();
        }
        if self.italic > 0 {
            run = run.italic();
        }
        if let Some(level) = self.heading {
            run = run.size(heading_size(level));
        }
        self.runs.push(run);
    }

    fn line_break(&mut self) {
        if !self.open {
            self.begin();
        }
        self.runs.push(Run::new().add_break(BreakType::TextWrapping));
    }

    fn start_item(&mut self) {
        self.begin();
        let depth = self.lists.len().saturating_sub(1);
        let marker = match self.lists.last_mut() {
            Some(Some(n)) => {
                let marker = format!("{}. ", n);
                *n += 1;
                marker
            }
            _ => "• ".to_string(),
        };
        self.runs
            .push(Run::new().add_text(format!("{}{}", "    ".repeat(depth), marker)));
    }

    fn event(&mut self, event: Event<'_>) {
        match event {
            Event::Start(tag) => match tag {
                Tag::Heading { level, .. } => {
                    self.begin();
                    self.heading = Some(level);
                }
                Tag::Paragraph => {
                    // a tight list item already opened its paragraph
                    if !(self.open && self.runs.len() == 1 && !self.lists.is_empty()) {
                        self.begin();
                    }
                }
                Tag::Strong => self.bold += 1,
                Tag::Emphasis => self.italic += 1,
                Tag::List(start) => {
                    self.flush();
                    self.lists.push(start);
                }
                Tag::Item => self.start_item(),
                Tag::CodeBlock(_) => {
                    self.begin();
                    self.in_code_block = true;
                }
                Tag::TableHead | Tag::TableRow => {
                    self.begin();
                    self.cell = 0;
                }
                Tag::TableCell => {
                    if self.cell > 0 {
                        self.text(" | ");
                    }
                    self.cell += 1;
                }
                _ => {}
            },
            Event::End(tag) => match tag {
                TagEnd::Heading(_) => {
                    self.flush();
                    self.heading = None;
                }
                TagEnd::Paragraph | TagEnd::Item | TagEnd::TableHead | TagEnd::TableRow => self.flush(),
                TagEnd::Strong => self.bold = self.bold.saturating_sub(1),
                TagEnd::Emphasis => self.italic = self.italic.saturating_sub(1),
                TagEnd::List(_) => {
                    self.flush();
                    self.lists.pop();
                }
                TagEnd::CodeBlock => {
                    self.flush();
                    self.in_code_block = false;
                }
                _ => {}
            },
            Event::Text(text) => {
                if self.in_code_block {
                    let mut lines = text.lines().peekable();
                    while let Some(line) = lines.next() {
                        self.text(line);
                        if lines.peek().is_some() {
                            self.line_break();
                        }
                    }
                } else {
                    self.text(&text);
                }
            }
            Event::Code(code) => self.text(&code),
            Event::SoftBreak => self.text(" "),
            Event::HardBreak => self.line_break(),
            Event::Rule => {
                self.flush();
                self.paragraphs.push(page_break());
            }
            _ => {}
        }
    }

    fn finish(mut self) -> Docx {
        self.flush();
        self.paragraphs
            .into_iter()
            .fold(Docx::new(), |docx, paragraph| docx.add_paragraph(paragraph))
    }
}

/// 把 markdown 渲染成 DOCX
///
/// Headings become bold sized runs, `**`/`*` become bold/italic runs,
/// list items get a bullet or number prefix and a horizontal rule becomes
/// a page break.
pub fn render_markdown_docx(markdown: &str, output: &Path) -> Result<(), DraftError> {
    let mut renderer = Renderer::new();
    for event in Parser::new_ext(markdown, Options::ENABLE_TABLES | Options::ENABLE_STRIKETHROUGH) {
        renderer.event(event);
    }
    let file = File::create(output)?;
    renderer
        .finish()
        .build()
        .pack(file)
        .map_err(|e| DraftError::Package(e.to_string()))?;
    Ok(())
}
