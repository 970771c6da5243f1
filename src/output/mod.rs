mod exports;
mod progress;
mod styling;
mod summary;
mod tables;

pub use exports::export_report;
pub use progress::PhaseProgress;
pub use styling::{dim, magenta_bold};
pub use summary::{print_summary, render_summary};

/// Prints the `cilog` banner to stderr.
pub fn print_banner() {
    eprintln!(
        r"
{} {}
  {}
",
        magenta_bold("🔍 cilog"),
        dim(env!("CARGO_PKG_VERSION")),
        dim("CI Log Analyzer")
    );
}
