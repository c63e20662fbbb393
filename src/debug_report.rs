use bh::{Engine, RenderMetrics};

mod ansi {
    pub const RESET: &str = "\x1b[0m";
    pub const DIM: &str = "\x1b[2m";
    pub const BOLD: &str = "\x1b[1m";

    pub const GREEN: &str = "\x1b[32m";
    pub const YELLOW: &str = "\x1b[33m";
    pub const BLUE: &str = "\x1b[34m";
    pub const CYAN: &str = "\x1b[36m";
    pub const GRAY: &str = "\x1b[90m";

    pub struct Palette {
        enabled: bool,
    }

    impl Palette {
        pub fn new(enabled: bool) -> Self {
            Self { enabled }
        }

        pub fn paint(&self, s: impl AsRef<str>, color: &str) -> String {
            if self.enabled { format!("{}{}{}", color, s.as_ref(), RESET) } else { s.as_ref().to_string() }
        }

        pub fn bold(&self, s: impl AsRef<str>) -> String {
            if self.enabled { format!("{}{}{}", BOLD, s.as_ref(), RESET) } else { s.as_ref().to_string() }
        }

        pub fn dim(&self, s: impl AsRef<str>) -> String {
            if self.enabled { format!("{}{}{}", DIM, s.as_ref(), RESET) } else { s.as_ref().to_string() }
        }
    }
}

/// Metrics report, written to stderr so stdout stays pure HTML.
pub fn print_run(engine: &Engine, metrics: &RenderMetrics, color: bool) {
    let palette = ansi::Palette::new(color);
    let expand = &metrics.expand;
    eprintln!("\n{}", palette.bold(palette.paint(format!("⚙  Rendered {} bytes", metrics.output_bytes), ansi::CYAN)));

    eprintln!("\n{}", palette.paint("━━━ Expansion ━━━", ansi::GRAY));
    eprintln!(
        "  {} {}  {} {}  {} {}  {} {}",
        palette.dim("slots:"),
        palette.paint(expand.slots.to_string(), ansi::BLUE),
        palette.dim("dispatches:"),
        palette.paint(expand.dispatches.to_string(), ansi::BLUE),
        palette.dim("replacements:"),
        palette.paint(expand.replacements.to_string(), ansi::YELLOW),
        palette.dim("max queue:"),
        palette.paint(expand.max_queue.to_string(), ansi::YELLOW),
    );

    eprintln!("\n{}", palette.paint("━━━ Rules ━━━", ansi::GRAY));
    if expand.fired.is_empty() {
        eprintln!("{}", palette.dim(format!("  No rules fired ({} registered)", engine.rule_count())));
    } else {
        for fire in &expand.fired {
            eprintln!(
                "  {} {}",
                palette.paint(&fire.rule, ansi::CYAN),
                palette.paint(format!("×{}", fire.count), ansi::GREEN)
            );
        }
    }

    eprintln!("\n{}", palette.paint("━━━ Timing ━━━", ansi::GRAY));
    eprintln!(
        "  Total: {}  │  Expand: {}  │  Serialize: {}",
        palette.paint(format!("{:?}", metrics.total), ansi::GREEN),
        palette.paint(format!("{:?}", expand.duration), ansi::CYAN),
        palette.dim(format!("{:?}", metrics.serialize)),
    );
    eprintln!();
}
