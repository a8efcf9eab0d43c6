// src/main.rs

use parci::{cli, exit_code_for, logging, run};

#[tokio::main]
async fn main() {
    let args = cli::parse();
    if let Err(err) = logging::init_logging(args.log_level) {
        eprintln!("parci error: {err:#}");
        std::process::exit(1);
    }

    let code = match run(args).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("parci error: {err:#}");
            exit_code_for(&err)
        }
    };
    std::process::exit(code);
}
