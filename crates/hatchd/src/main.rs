use std::process::ExitCode;

fn main() -> ExitCode {
    match hatchd::run_daemon() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("hatchd: {error}");
            ExitCode::FAILURE
        }
    }
}
