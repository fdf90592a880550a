use std::process::ExitCode;

fn main() -> ExitCode {
    tempra_cli::run()
}
