use std::process::ExitCode;

fn main() -> ExitCode {
    ventix_cli::run()
}
