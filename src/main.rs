//! `bidstage` binary: parse arguments, run, map the outcome to an exit code.

use bidstage::cli::Cli;
use bidstage::error::{ExitCode, StructuredError};
use clap::Parser;

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    let json_errors = cli.json_errors;

    let code = match bidstage::run_app(cli) {
        Ok(code) => code,
        Err(err) => {
            let code = ExitCode::GeneralError;
            let rendered = json_errors
                .then(|| serde_json::to_string_pretty(&StructuredError::new(&err, code)).ok())
                .flatten();
            match rendered {
                Some(json) => eprintln!("{json}"),
                None => eprintln!("[{}] Error: {err:#}", code.code_prefix()),
            }
            code
        }
    };
    code.into()
}
