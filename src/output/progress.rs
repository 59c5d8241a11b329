use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use super::styling::{bright_green, bright_red, bright_yellow};

/// Spinner tracking one bug's walk through the triage phases.
pub struct PhaseProgress {
    pb: ProgressBar,
}

impl PhaseProgress {
    pub fn start(bug_id: &str) -> Self {
        let pb = create_spinner(bright_yellow(format!("Triaging {bug_id}")).to_string());
        Self { pb }
    }

    pub fn fetching(&self) {
        self.pb
            .set_message(bright_yellow("Fetching bug report").to_string());
    }

    pub fn parsing(&self) {
        self.pb
            .set_message(bright_yellow("Parsing crash table").to_string());
    }

    pub fn reproducing(&self) {
        self.pb
            .set_message(bright_yellow("Reproducing crash").to_string());
    }

    pub fn finish(self, outcome: &str) {
        self.pb
            .finish_with_message(bright_green(format!("Triage complete: {outcome} ✓")).to_string());
    }

    pub fn abandon(self, stage: &str) {
        self.pb
            .finish_with_message(bright_red(format!("Triage failed during {stage} ✗")).to_string());
    }
}

fn create_spinner(message: String) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_draw_target(ProgressDrawTarget::stderr());
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("  {msg} {spinner}")
            .unwrap(),
    );
    pb.set_message(message);
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}
