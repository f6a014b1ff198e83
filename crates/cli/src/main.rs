use std::process::ExitCode;

fn main() -> ExitCode {
    crmchat_cli::run()
}
