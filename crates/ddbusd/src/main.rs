use std::process::ExitCode;

fn main() -> ExitCode {
    match ddbusd::run_daemon() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            #[expect(
                clippy::print_stderr,
                reason = "the daemon has no subscriber once launch fails"
            )]
            {
                eprintln!("ddbusd: {error}");
            }
            ExitCode::FAILURE
        }
    }
}
