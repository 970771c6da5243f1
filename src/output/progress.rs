use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use super::styling::{bright, bright_green, bright_yellow};

/// Progress tracking for the load and analyze phases
pub struct PhaseProgress {
    pb: ProgressBar,
}

impl PhaseProgress {
    pub fn start_loading() -> Self {
        eprintln!("{}  {}", bright("⚙️"), bright("Phases").underlined());
        let pb = create_spinner(bright_yellow("Phase 1/2: Loading run logs").to_string());
        Self { pb }
    }

    pub fn finish_loading_start_analyzing(self, runs: usize) -> Self {
        self.pb.finish_with_message(
            bright_green(format!("Phase 1/2: Loaded {runs} run log(s) ✓")).to_string(),
        );
        let pb = create_spinner(bright_yellow("Phase 2/2: Analyzing runs").to_string());
        Self { pb }
    }

    pub fn finish_analyzing(self, pending: usize) {
        let message = if pending == 0 {
            bright_green("Phase 2/2: Analysis complete ✓").to_string()
        } else {
            bright_yellow(format!("Phase 2/2: Timed out with {pending} run(s) pending")).to_string()
        };
        self.pb.finish_with_message(message);
        eprintln!("\n");
    }
}

fn create_spinner(message: String) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_draw_target(ProgressDrawTarget::stderr());
    if let Ok(style) = ProgressStyle::default_spinner().template("  {msg} {spinner}") {
        pb.set_style(style);
    }
    pb.set_message(message);
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}
