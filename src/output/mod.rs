mod progress;
mod styling;
mod summary;

pub use progress::PhaseProgress;
pub use styling::{dim, magenta_bold};
pub use summary::print_summary;

/// Prints the `syztriage` banner to stderr.
///
/// Displays the tool name, version, and description at the start of execution.
pub fn print_banner() {
    eprintln!(
        r"
{} {}
  {}
",
        magenta_bold("🐞 syztriage"),
        dim(env!("CARGO_PKG_VERSION")),
        dim("Kernel Fuzzer Bug Triage Tool")
    );
}
