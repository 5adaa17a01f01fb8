//! covsmith CLI binary entry point.

use std::process::ExitCode;

fn main() -> ExitCode {
    covsmith::cli::run()
}
