//! Terminal text sanitizer.
//!
//! Strips control sequences and box-drawing glyphs from captured pane text so
//! that clients receive plain text and so that cosmetic redraws do not count
//! as screen changes.

use std::sync::LazyLock;

use regex::Regex;

/// CSI sequences, OSC sequences terminated by BEL, lone BELs and carriage returns.
static CONTROL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b\[[0-9;?]*[a-zA-Z]|\x1b\][^\x07]*\x07|\x07|\r")
        .expect("static regex pattern is valid")
});

/// Box-drawing glyphs removed from captured text.
pub const BOX_DRAWING: &[char] = &[
    '│', '┃', '┌', '┐', '└', '┘', '├', '┤', '┬', '┴', '┼', '═', '║', '╔', '╗', '╚', '╝', '╠',
    '╣', '╦', '╩', '╬', '─', '━', '╭', '╮', '╯', '╰',
];

/// Removes control sequences and box-drawing glyphs.
pub fn sanitize(text: &str) -> String {
    CONTROL_RE
        .replace_all(text, "")
        .chars()
        .filter(|c| !BOX_DRAWING.contains(c))
        .collect()
}

/// Sanitized text with trailing newlines removed, as broadcast to clients.
pub fn display_text(raw: &str) -> String {
    let mut clean = sanitize(raw);
    let trimmed = clean.trim_end_matches('\n').len();
    clean.truncate(trimmed);
    clean
}

/// Whether the text has nothing worth showing.
pub fn is_blank(text: &str) -> bool {
    text.trim().is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_untouched() {
        assert_eq!(sanitize("hello world\nsecond line"), "hello world\nsecond line");
    }

    #[test]
    fn test_strips_sgr_sequences() {
        assert_eq!(sanitize("\x1b[1;32mgreen\x1b[0m text"), "green text");
    }

    #[test]
    fn test_strips_cursor_and_private_modes() {
        assert_eq!(sanitize("\x1b[?25l\x1b[2Jscreen\x1b[H\x1b[?25h"), "screen");
    }

    #[test]
    fn test_strips_osc_title() {
        assert_eq!(sanitize("\x1b]0;user@host: ~\x07$ ls"), "$ ls");
    }

    #[test]
    fn test_strips_bell_and_carriage_return() {
        assert_eq!(sanitize("done\x07\r\nnext\r"), "done\nnext");
    }

    #[test]
    fn test_strips_box_drawing() {
        let framed = "╭──────╮\n│ menu │\n╰──────╯";
        assert_eq!(sanitize(framed), "\n menu \n");
    }

    #[test]
    fn test_keeps_other_unicode() {
        assert_eq!(sanitize("naïve ✓ → λ"), "naïve ✓ → λ");
    }

    #[test]
    fn test_display_text_trims_trailing_newlines_only() {
        assert_eq!(display_text("  $ ls\nfile\n\n\n"), "  $ ls\nfile");
        assert_eq!(display_text("x  \n"), "x  ");
    }

    #[test]
    fn test_display_text_of_empty_pane() {
        assert_eq!(display_text("\n\n\n"), "");
    }

    #[test]
    fn test_is_blank() {
        assert!(is_blank(""));
        assert!(is_blank(" \n\t\n"));
        assert!(!is_blank("\n$\n"));
    }
}
