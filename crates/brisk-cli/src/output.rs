//! Colored terminal output helpers.
//!
//! Respects the `NO_COLOR` environment variable.

use std::io::Write;

use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

fn color_choice() -> ColorChoice {
    if std::env::var_os("NO_COLOR").is_some() {
        ColorChoice::Never
    } else {
        ColorChoice::Auto
    }
}

fn writeln_colored(color: Color, text: &str) {
    let mut stdout = StandardStream::stdout(color_choice());
    let mut spec = ColorSpec::new();
    spec.set_fg(Some(color)).set_bold(true);
    let _ = stdout.set_color(&spec);
    let _ = writeln!(stdout, "{}", text);
    let _ = stdout.reset();
}

/// Green bold line.
pub fn success(text: &str) {
    writeln_colored(Color::Green, text);
}

/// Cyan informational line.
pub fn info(text: &str) {
    writeln_colored(Color::Cyan, text);
}

/// Yellow notice line.
pub fn notice(text: &str) {
    writeln_colored(Color::Yellow, text);
}
