use owo_colors::{OwoColorize, Style};
use std::sync::OnceLock;

static STDOUT: OnceLock<Palette> = OnceLock::new();
static STDERR: OnceLock<Palette> = OnceLock::new();

/// What a piece of CLI output is, independent of how it is drawn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Title,
    Label,
    Kind,
    Faint,
    Good,
    Bad,
    Caution,
}

/// Colors for one output stream; plain when the stream is not a terminal
#[derive(Debug, Clone, Copy)]
pub struct Palette {
    colored: bool,
}

impl Palette {
    pub fn for_term(term: &console::Term) -> Self {
        Self { colored: term.is_term() }
    }

    pub fn plain() -> Self {
        Self { colored: false }
    }

    pub fn colored() -> Self {
        Self { colored: true }
    }

    pub fn style(&self, tone: Tone) -> Style {
        if !self.colored {
            return Style::new();
        }
        match tone {
            Tone::Title => Style::new().cyan().bold(),
            Tone::Label => Style::new().white().dimmed(),
            Tone::Kind => Style::new().blue().bold(),
            Tone::Faint => Style::new().bright_black(),
            Tone::Good => Style::new().green().bold(),
            Tone::Bad => Style::new().red().bold(),
            Tone::Caution => Style::new().yellow().bold(),
        }
    }

    pub fn paint(&self, tone: Tone, text: &str) -> String {
        text.style(self.style(tone)).to_string()
    }
}

pub fn stdout() -> &'static Palette {
    STDOUT.get_or_init(|| Palette::for_term(&console::Term::stdout()))
}

pub fn stderr() -> &'static Palette {
    STDERR.get_or_init(|| Palette::for_term(&console::Term::stderr()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_palette_leaves_text_alone() {
        let palette = Palette::plain();
        for tone in [Tone::Title, Tone::Label, Tone::Kind, Tone::Faint, Tone::Good, Tone::Bad, Tone::Caution] {
            assert_eq!(palette.paint(tone, "uniprot"), "uniprot");
        }
    }

    #[test]
    fn test_colored_palette_escapes() {
        let painted = Palette::colored().paint(Tone::Bad, "failed");
        assert!(painted.starts_with('\u{1b}'));
        assert!(painted.contains("failed"));
    }
}
